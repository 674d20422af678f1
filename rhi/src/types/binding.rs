//! Binding layout descriptors.

use super::ShaderStages;

/// Kind of resource bound at a register slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    TextureSrv,
    TextureUav,
    TypedBufferSrv,
    TypedBufferUav,
    StructuredBufferSrv,
    StructuredBufferUav,
    RawBufferSrv,
    RawBufferUav,
    ConstantBuffer,
    Sampler,
}

impl ResourceType {
    /// Whether the shader may write through a binding of this type.
    pub fn is_unordered_access(&self) -> bool {
        matches!(
            self,
            Self::TextureUav
                | Self::TypedBufferUav
                | Self::StructuredBufferUav
                | Self::RawBufferUav
        )
    }

    /// Whether the binding refers to a buffer.
    pub fn is_buffer(&self) -> bool {
        matches!(
            self,
            Self::TypedBufferSrv
                | Self::TypedBufferUav
                | Self::StructuredBufferSrv
                | Self::StructuredBufferUav
                | Self::RawBufferSrv
                | Self::RawBufferUav
                | Self::ConstantBuffer
        )
    }
}

/// One entry of a binding layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingLayoutItem {
    pub slot: u32,
    pub resource_type: ResourceType,
    pub array_size: u32,
}

impl BindingLayoutItem {
    pub fn new(slot: u32, resource_type: ResourceType) -> Self {
        Self {
            slot,
            resource_type,
            array_size: 1,
        }
    }

    pub fn texture_srv(slot: u32) -> Self {
        Self::new(slot, ResourceType::TextureSrv)
    }

    pub fn texture_uav(slot: u32) -> Self {
        Self::new(slot, ResourceType::TextureUav)
    }

    pub fn typed_buffer_srv(slot: u32) -> Self {
        Self::new(slot, ResourceType::TypedBufferSrv)
    }

    pub fn typed_buffer_uav(slot: u32) -> Self {
        Self::new(slot, ResourceType::TypedBufferUav)
    }

    pub fn structured_buffer_srv(slot: u32) -> Self {
        Self::new(slot, ResourceType::StructuredBufferSrv)
    }

    pub fn structured_buffer_uav(slot: u32) -> Self {
        Self::new(slot, ResourceType::StructuredBufferUav)
    }

    pub fn raw_buffer_srv(slot: u32) -> Self {
        Self::new(slot, ResourceType::RawBufferSrv)
    }

    pub fn raw_buffer_uav(slot: u32) -> Self {
        Self::new(slot, ResourceType::RawBufferUav)
    }

    pub fn constant_buffer(slot: u32) -> Self {
        Self::new(slot, ResourceType::ConstantBuffer)
    }

    pub fn sampler(slot: u32) -> Self {
        Self::new(slot, ResourceType::Sampler)
    }

    pub fn with_array_size(mut self, array_size: u32) -> Self {
        self.array_size = array_size;
        self
    }
}

/// Descriptor for creating a binding layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BindingLayoutDescriptor {
    /// Shader stages that see the bindings.
    pub visibility: ShaderStages,
    pub items: Vec<BindingLayoutItem>,
}

impl BindingLayoutDescriptor {
    pub fn new(visibility: ShaderStages) -> Self {
        Self {
            visibility,
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, item: BindingLayoutItem) -> Self {
        self.items.push(item);
        self
    }
}
