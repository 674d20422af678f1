//! Binding layouts and binding sets.
//!
//! A [`BindingLayout`] declares which register slots a shader reads, and maps
//! each `(slot, resource type)` pair to a native binding number using the
//! device's [`BindingOffsets`](crate::config::BindingOffsets). A
//! [`BindingSet`] fills a layout with concrete buffers, textures and
//! samplers, and remembers which state each resource must be in when the set
//! is used.

use std::sync::Arc;

use super::{Buffer, Sampler, Texture};
use crate::backend::{
    DescriptorLayoutBinding, DescriptorResource, DescriptorSetHandle, DescriptorSetLayoutHandle,
    DescriptorType, DescriptorWrite,
};
use crate::binding_key::{ResourceBindingKey, ResourceBindingMap};
use crate::context::DeviceContext;
use crate::error::RhiError;
use crate::types::{
    BindingLayoutDescriptor, BufferRange, BufferUsage, Format, ImageLayout, ResourceId,
    ResourceStates, ResourceType, TextureSubresourceSet, TextureViewKind,
};

/// Native descriptor type used for a resource type.
pub(crate) fn descriptor_type(resource_type: ResourceType) -> DescriptorType {
    match resource_type {
        ResourceType::TextureSrv => DescriptorType::SampledImage,
        ResourceType::TextureUav => DescriptorType::StorageImage,
        ResourceType::TypedBufferSrv => DescriptorType::UniformTexelBuffer,
        ResourceType::TypedBufferUav => DescriptorType::StorageTexelBuffer,
        ResourceType::StructuredBufferSrv
        | ResourceType::StructuredBufferUav
        | ResourceType::RawBufferSrv
        | ResourceType::RawBufferUav => DescriptorType::StorageBuffer,
        ResourceType::ConstantBuffer => DescriptorType::UniformBuffer,
        ResourceType::Sampler => DescriptorType::Sampler,
    }
}

fn required_state(resource_type: ResourceType) -> ResourceStates {
    match resource_type {
        ResourceType::ConstantBuffer => ResourceStates::CONSTANT_BUFFER,
        ty if ty.is_unordered_access() => ResourceStates::UNORDERED_ACCESS,
        _ => ResourceStates::SHADER_RESOURCE,
    }
}

/// Native descriptor set layout built from a [`BindingLayoutDescriptor`].
pub struct BindingLayout {
    context: Arc<DeviceContext>,
    id: ResourceId,
    descriptor: BindingLayoutDescriptor,
    native: DescriptorSetLayoutHandle,
    bindings: Vec<DescriptorLayoutBinding>,
    binding_map: ResourceBindingMap<u32>,
}

impl BindingLayout {
    pub(crate) fn create(
        context: Arc<DeviceContext>,
        descriptor: &BindingLayoutDescriptor,
    ) -> Result<Arc<Self>, RhiError> {
        if descriptor.visibility.is_empty() {
            return Err(RhiError::InvalidParameter(
                "binding layout is visible to no shader stage".to_string(),
            ));
        }

        let offsets = context.config().binding_offsets;
        let mut binding_map = ResourceBindingMap::new();
        let mut bindings = Vec::with_capacity(descriptor.items.len());
        for item in &descriptor.items {
            if item.array_size == 0 {
                return Err(RhiError::InvalidParameter(format!(
                    "binding slot {} has an empty array",
                    item.slot
                )));
            }
            let key = ResourceBindingKey::new(item.slot, item.resource_type);
            if binding_map.contains_key(&key) {
                return Err(RhiError::InvalidParameter(format!(
                    "duplicate binding {:?} at slot {}",
                    item.resource_type, item.slot
                )));
            }
            let binding = item.slot + offsets.offset_for(item.resource_type);
            if bindings
                .iter()
                .any(|b: &DescriptorLayoutBinding| b.binding == binding)
            {
                return Err(RhiError::InvalidParameter(format!(
                    "{:?} at slot {} conflicts with another item on native binding {binding}",
                    item.resource_type, item.slot
                )));
            }
            binding_map.insert(key, binding);
            bindings.push(DescriptorLayoutBinding {
                binding,
                descriptor_type: descriptor_type(item.resource_type),
                count: item.array_size,
                stages: descriptor.visibility,
            });
        }

        let native = context.backend().create_descriptor_set_layout(&bindings)?;
        log::trace!("Created binding layout with {} bindings", bindings.len());
        Ok(Arc::new(Self {
            context,
            id: ResourceId::next(),
            descriptor: descriptor.clone(),
            native,
            bindings,
            binding_map,
        }))
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn descriptor(&self) -> &BindingLayoutDescriptor {
        &self.descriptor
    }

    pub fn native(&self) -> DescriptorSetLayoutHandle {
        self.native
    }

    /// Native layout bindings in declaration order.
    pub fn bindings(&self) -> &[DescriptorLayoutBinding] {
        &self.bindings
    }

    /// Native binding number of a slot, if the layout declares it.
    pub fn native_binding(&self, key: ResourceBindingKey) -> Option<u32> {
        self.binding_map.get(&key).copied()
    }

    fn array_size(&self, key: ResourceBindingKey) -> u32 {
        self.descriptor
            .items
            .iter()
            .find(|item| item.slot == key.slot && item.resource_type == key.resource_type)
            .map_or(0, |item| item.array_size)
    }
}

impl Drop for BindingLayout {
    fn drop(&mut self) {
        self.context
            .backend()
            .destroy_descriptor_set_layout(self.native);
    }
}

impl std::fmt::Debug for BindingLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingLayout")
            .field("visibility", &self.descriptor.visibility)
            .field("bindings", &self.bindings.len())
            .field("native", &self.native)
            .finish()
    }
}

/// A resource placed into a binding set slot.
#[derive(Debug, Clone)]
pub enum BindingResource {
    Buffer {
        buffer: Arc<Buffer>,
        range: BufferRange,
        /// Typed views only. `Format::Unknown` selects the buffer format.
        format: Format,
    },
    Texture {
        texture: Arc<Texture>,
        subresources: TextureSubresourceSet,
        /// `Format::Unknown` selects the texture format.
        format: Format,
    },
    Sampler(Arc<Sampler>),
}

/// One entry of a [`BindingSetDescriptor`].
#[derive(Debug, Clone)]
pub struct BindingSetItem {
    pub slot: u32,
    pub resource_type: ResourceType,
    pub array_element: u32,
    pub resource: BindingResource,
}

impl BindingSetItem {
    fn buffer(slot: u32, resource_type: ResourceType, buffer: Arc<Buffer>) -> Self {
        Self {
            slot,
            resource_type,
            array_element: 0,
            resource: BindingResource::Buffer {
                buffer,
                range: BufferRange::ENTIRE,
                format: Format::Unknown,
            },
        }
    }

    fn texture(slot: u32, resource_type: ResourceType, texture: Arc<Texture>) -> Self {
        Self {
            slot,
            resource_type,
            array_element: 0,
            resource: BindingResource::Texture {
                texture,
                subresources: TextureSubresourceSet::ALL,
                format: Format::Unknown,
            },
        }
    }

    pub fn texture_srv(slot: u32, texture: Arc<Texture>) -> Self {
        Self::texture(slot, ResourceType::TextureSrv, texture)
    }

    /// Storage view of mip level zero.
    pub fn texture_uav(slot: u32, texture: Arc<Texture>) -> Self {
        Self::texture(slot, ResourceType::TextureUav, texture)
            .with_subresources(TextureSubresourceSet::mip(0))
    }

    pub fn typed_buffer_srv(slot: u32, buffer: Arc<Buffer>) -> Self {
        Self::buffer(slot, ResourceType::TypedBufferSrv, buffer)
    }

    pub fn typed_buffer_uav(slot: u32, buffer: Arc<Buffer>) -> Self {
        Self::buffer(slot, ResourceType::TypedBufferUav, buffer)
    }

    pub fn structured_buffer_srv(slot: u32, buffer: Arc<Buffer>) -> Self {
        Self::buffer(slot, ResourceType::StructuredBufferSrv, buffer)
    }

    pub fn structured_buffer_uav(slot: u32, buffer: Arc<Buffer>) -> Self {
        Self::buffer(slot, ResourceType::StructuredBufferUav, buffer)
    }

    pub fn raw_buffer_srv(slot: u32, buffer: Arc<Buffer>) -> Self {
        Self::buffer(slot, ResourceType::RawBufferSrv, buffer)
    }

    pub fn raw_buffer_uav(slot: u32, buffer: Arc<Buffer>) -> Self {
        Self::buffer(slot, ResourceType::RawBufferUav, buffer)
    }

    pub fn constant_buffer(slot: u32, buffer: Arc<Buffer>) -> Self {
        Self::buffer(slot, ResourceType::ConstantBuffer, buffer)
    }

    pub fn sampler(slot: u32, sampler: Arc<Sampler>) -> Self {
        Self {
            slot,
            resource_type: ResourceType::Sampler,
            array_element: 0,
            resource: BindingResource::Sampler(sampler),
        }
    }

    /// Bind part of a buffer. Ignored for textures and samplers.
    pub fn with_range(mut self, new_range: BufferRange) -> Self {
        if let BindingResource::Buffer { range, .. } = &mut self.resource {
            *range = new_range;
        }
        self
    }

    /// Bind part of a texture. Ignored for buffers and samplers.
    pub fn with_subresources(mut self, set: TextureSubresourceSet) -> Self {
        if let BindingResource::Texture { subresources, .. } = &mut self.resource {
            *subresources = set;
        }
        self
    }

    /// Override the view format.
    pub fn with_format(mut self, view_format: Format) -> Self {
        match &mut self.resource {
            BindingResource::Buffer { format, .. } | BindingResource::Texture { format, .. } => {
                *format = view_format;
            }
            BindingResource::Sampler(_) => {}
        }
        self
    }

    pub fn with_array_element(mut self, element: u32) -> Self {
        self.array_element = element;
        self
    }

    pub fn key(&self) -> ResourceBindingKey {
        ResourceBindingKey::new(self.slot, self.resource_type)
    }

    /// Hashable identity of the item, used to deduplicate binding sets.
    pub(crate) fn cache_key(&self) -> BindingItemKey {
        let (resource, range, subresources, format) = match &self.resource {
            BindingResource::Buffer {
                buffer,
                range,
                format,
            } => (
                buffer.id(),
                range.resolve(buffer.size()),
                TextureSubresourceSet::ALL,
                *format,
            ),
            BindingResource::Texture {
                texture,
                subresources,
                format,
            } => (
                texture.id(),
                BufferRange::ENTIRE,
                subresources.resolve(texture.descriptor(), false),
                *format,
            ),
            BindingResource::Sampler(sampler) => (
                sampler.id(),
                BufferRange::ENTIRE,
                TextureSubresourceSet::ALL,
                Format::Unknown,
            ),
        };
        BindingItemKey::from_parts(
            self.key(),
            self.array_element,
            resource,
            range,
            subresources,
            format,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct BindingItemKey {
    binding: ResourceBindingKey,
    array_element: u32,
    resource: ResourceId,
    range: (u64, u64),
    subresources: (u32, u32, u32, u32),
    format: u32,
}

// Ranges are stored as plain tuples so the whole key is `Ord`.
impl BindingItemKey {
    fn from_parts(
        binding: ResourceBindingKey,
        array_element: u32,
        resource: ResourceId,
        range: BufferRange,
        subresources: TextureSubresourceSet,
        format: Format,
    ) -> Self {
        Self {
            binding,
            array_element,
            resource,
            range: (range.byte_offset, range.byte_size),
            subresources: (
                subresources.base_mip_level,
                subresources.num_mip_levels,
                subresources.base_array_slice,
                subresources.num_array_slices,
            ),
            format: format as u32,
        }
    }
}

/// Items of a binding set.
#[derive(Debug, Clone, Default)]
pub struct BindingSetDescriptor {
    pub items: Vec<BindingSetItem>,
}

impl BindingSetDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, item: BindingSetItem) -> Self {
        self.items.push(item);
        self
    }

    /// Sorted item keys identifying this set's contents.
    pub(crate) fn cache_keys(&self) -> Vec<BindingItemKey> {
        let mut keys: Vec<_> = self.items.iter().map(BindingSetItem::cache_key).collect();
        keys.sort_unstable();
        keys
    }
}

/// A resource a binding set accesses and the state it must be in.
#[derive(Debug, Clone)]
pub enum BindingResourceUse {
    Buffer {
        buffer: Arc<Buffer>,
        state: ResourceStates,
    },
    Texture {
        texture: Arc<Texture>,
        subresources: TextureSubresourceSet,
        state: ResourceStates,
    },
}

impl BindingResourceUse {
    /// Whether shaders may write the resource through the set.
    pub fn is_write(&self) -> bool {
        match self {
            Self::Buffer { state, .. } | Self::Texture { state, .. } => state.is_write(),
        }
    }
}

/// A filled descriptor set bound to a [`BindingLayout`].
///
/// Holds strong references to every bound resource.
pub struct BindingSet {
    context: Arc<DeviceContext>,
    id: ResourceId,
    layout: Arc<BindingLayout>,
    descriptor: BindingSetDescriptor,
    native: DescriptorSetHandle,
    uses: Vec<BindingResourceUse>,
}

impl BindingSet {
    pub(crate) fn create(
        context: Arc<DeviceContext>,
        layout: Arc<BindingLayout>,
        descriptor: &BindingSetDescriptor,
    ) -> Result<Arc<Self>, RhiError> {
        let mut writes = Vec::with_capacity(descriptor.items.len());
        let mut uses = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for item in &descriptor.items {
            let key = item.key();
            let Some(binding) = layout.native_binding(key) else {
                return Err(RhiError::InvalidParameter(format!(
                    "layout has no {:?} binding at slot {}",
                    item.resource_type, item.slot
                )));
            };
            if item.array_element >= layout.array_size(key) {
                return Err(RhiError::InvalidParameter(format!(
                    "array element {} is out of range for slot {}",
                    item.array_element, item.slot
                )));
            }
            if !seen.insert((key, item.array_element)) {
                return Err(RhiError::InvalidParameter(format!(
                    "slot {} element {} is bound twice",
                    item.slot, item.array_element
                )));
            }

            let descriptor_type = descriptor_type(item.resource_type);
            let state = required_state(item.resource_type);
            let resource = match (&item.resource, item.resource_type) {
                (BindingResource::Sampler(sampler), ResourceType::Sampler) => {
                    DescriptorResource::Sampler(sampler.native())
                }
                (
                    BindingResource::Texture {
                        texture,
                        subresources,
                        format,
                    },
                    ResourceType::TextureSrv | ResourceType::TextureUav,
                ) => {
                    let (kind, image_layout) = if item.resource_type == ResourceType::TextureUav {
                        (TextureViewKind::UnorderedAccess, ImageLayout::General)
                    } else {
                        (TextureViewKind::ShaderResource, ImageLayout::ShaderReadOnly)
                    };
                    let view = texture.get_view(kind, *format, *subresources, false)?;
                    uses.push(BindingResourceUse::Texture {
                        texture: Arc::clone(texture),
                        subresources: subresources
                            .resolve(texture.descriptor(), kind.is_single_mip()),
                        state,
                    });
                    DescriptorResource::Image {
                        view,
                        layout: image_layout,
                    }
                }
                (
                    BindingResource::Buffer {
                        buffer,
                        range,
                        format,
                    },
                    ty,
                ) if ty.is_buffer() => {
                    let resource =
                        buffer_descriptor(&context, buffer, ty, *range, *format)?;
                    uses.push(BindingResourceUse::Buffer {
                        buffer: Arc::clone(buffer),
                        state,
                    });
                    resource
                }
                (_, ty) => {
                    return Err(RhiError::InvalidParameter(format!(
                        "slot {} of type {ty:?} was given the wrong kind of resource",
                        item.slot
                    )));
                }
            };

            writes.push(DescriptorWrite {
                binding,
                array_element: item.array_element,
                descriptor_type,
                resource,
            });
        }

        let native =
            context
                .backend()
                .create_descriptor_set(layout.native(), layout.bindings(), &writes)?;
        log::trace!("Created binding set with {} items", writes.len());
        Ok(Arc::new(Self {
            context,
            id: ResourceId::next(),
            layout,
            descriptor: descriptor.clone(),
            native,
            uses,
        }))
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn layout(&self) -> &Arc<BindingLayout> {
        &self.layout
    }

    pub fn descriptor(&self) -> &BindingSetDescriptor {
        &self.descriptor
    }

    pub fn native(&self) -> DescriptorSetHandle {
        self.native
    }

    /// Buffers and textures accessed through this set.
    pub fn resource_uses(&self) -> &[BindingResourceUse] {
        &self.uses
    }
}

fn buffer_descriptor(
    context: &DeviceContext,
    buffer: &Buffer,
    resource_type: ResourceType,
    range: BufferRange,
    format: Format,
) -> Result<DescriptorResource, RhiError> {
    let usage = buffer.descriptor().usage;
    let needed = match resource_type {
        ResourceType::ConstantBuffer => BufferUsage::CONSTANT,
        ty if ty.is_unordered_access() => BufferUsage::UNORDERED_ACCESS,
        _ => BufferUsage::SHADER_RESOURCE,
    };
    if !usage.contains(needed) {
        return Err(RhiError::InvalidParameter(format!(
            "buffer {:?} lacks {needed:?} usage for a {resource_type:?} binding",
            buffer.label()
        )));
    }

    let resolved = range.resolve(buffer.size());
    if resolved.byte_size == 0 {
        return Err(RhiError::InvalidParameter(format!(
            "binding range {range:?} is empty for buffer {:?}",
            buffer.label()
        )));
    }

    match resource_type {
        ResourceType::TypedBufferSrv | ResourceType::TypedBufferUav => Ok(
            DescriptorResource::TexelBuffer(buffer.get_typed_view(format, range)?),
        ),
        ResourceType::StructuredBufferSrv | ResourceType::StructuredBufferUav
            if buffer.descriptor().struct_stride == 0 =>
        {
            Err(RhiError::InvalidParameter(format!(
                "buffer {:?} has no struct stride",
                buffer.label()
            )))
        }
        ResourceType::ConstantBuffer => {
            let alignment = context.limits().min_uniform_buffer_offset_alignment.max(1);
            if resolved.byte_offset % alignment != 0 {
                return Err(RhiError::InvalidParameter(format!(
                    "constant buffer offset {} is not aligned to {alignment}",
                    resolved.byte_offset
                )));
            }
            Ok(DescriptorResource::Buffer {
                buffer: buffer.native(),
                range: resolved,
            })
        }
        _ => Ok(DescriptorResource::Buffer {
            buffer: buffer.native(),
            range: resolved,
        }),
    }
}

impl Drop for BindingSet {
    fn drop(&mut self) {
        self.context.backend().destroy_descriptor_set(self.native);
    }
}

impl std::fmt::Debug for BindingSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingSet")
            .field("items", &self.descriptor.items.len())
            .field("native", &self.native)
            .finish()
    }
}

static_assertions::assert_impl_all!(BindingLayout: Send, Sync);
static_assertions::assert_impl_all!(BindingSet: Send, Sync);
