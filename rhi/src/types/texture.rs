//! Texture types and descriptors.

use bitflags::bitflags;

use super::{Extent3d, Format, ResourceStates};

/// Dimensionality of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    Texture1D,
    #[default]
    Texture2D,
    Texture2DArray,
    TextureCube,
    Texture3D,
}

impl TextureDimension {
    /// Whether the dimension addresses more than one array slice.
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Texture2DArray | Self::TextureCube)
    }
}

bitflags! {
    /// How a texture may be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const SHADER_RESOURCE = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        /// Colour or depth attachment, picked from the format.
        const RENDER_TARGET = 1 << 4;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::COPY_DST | Self::SHADER_RESOURCE
    }
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug label for the texture.
    pub label: Option<String>,
    pub dimension: TextureDimension,
    pub extent: Extent3d,
    pub array_size: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub format: Format,
    pub usage: TextureUsage,
    /// State the texture is in when tracking starts.
    pub initial_state: ResourceStates,
    /// Start every command list from `initial_state` and return to it on close.
    pub keep_initial_state: bool,
}

impl TextureDescriptor {
    /// Create a 2D texture descriptor.
    pub fn new_2d(width: u32, height: u32, format: Format, usage: TextureUsage) -> Self {
        Self {
            label: None,
            dimension: TextureDimension::Texture2D,
            extent: Extent3d::new_2d(width, height),
            array_size: 1,
            mip_levels: 1,
            sample_count: 1,
            format,
            usage,
            initial_state: ResourceStates::UNKNOWN,
            keep_initial_state: false,
        }
    }

    /// Create a 2D array texture descriptor.
    pub fn new_2d_array(
        width: u32,
        height: u32,
        array_size: u32,
        format: Format,
        usage: TextureUsage,
    ) -> Self {
        Self {
            dimension: TextureDimension::Texture2DArray,
            array_size,
            ..Self::new_2d(width, height, format, usage)
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_levels = count;
        self
    }

    /// Set the sample count.
    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    /// Set the initial state and keep it across command lists.
    pub fn with_initial_state(mut self, state: ResourceStates) -> Self {
        self.initial_state = state;
        self.keep_initial_state = true;
        self
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self::new_2d(1, 1, Format::Rgba8Unorm, TextureUsage::default())
    }
}

/// A range of mip levels and array slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSubresourceSet {
    pub base_mip_level: u32,
    pub num_mip_levels: u32,
    pub base_array_slice: u32,
    pub num_array_slices: u32,
}

impl TextureSubresourceSet {
    /// Sentinel meaning "every remaining mip level".
    pub const ALL_MIP_LEVELS: u32 = u32::MAX;
    /// Sentinel meaning "every remaining array slice".
    pub const ALL_ARRAY_SLICES: u32 = u32::MAX;

    /// Every subresource of the texture.
    pub const ALL: TextureSubresourceSet = TextureSubresourceSet {
        base_mip_level: 0,
        num_mip_levels: Self::ALL_MIP_LEVELS,
        base_array_slice: 0,
        num_array_slices: Self::ALL_ARRAY_SLICES,
    };

    pub fn new(
        base_mip_level: u32,
        num_mip_levels: u32,
        base_array_slice: u32,
        num_array_slices: u32,
    ) -> Self {
        Self {
            base_mip_level,
            num_mip_levels,
            base_array_slice,
            num_array_slices,
        }
    }

    /// A single mip level of slice zero.
    pub fn mip(level: u32) -> Self {
        Self::new(level, 1, 0, 1)
    }

    /// Clamp the set to a texture and replace sentinels with explicit counts.
    ///
    /// `single_mip_level` forces a one-level range, as render target, depth
    /// and UAV views address exactly one mip.
    pub fn resolve(&self, desc: &TextureDescriptor, single_mip_level: bool) -> Self {
        let num_mip_levels = if single_mip_level {
            1
        } else {
            let last = self
                .base_mip_level
                .saturating_add(self.num_mip_levels)
                .min(desc.mip_levels);
            last.saturating_sub(self.base_mip_level)
        };

        let (base_array_slice, num_array_slices) = if desc.dimension.is_array() {
            let last = self
                .base_array_slice
                .saturating_add(self.num_array_slices)
                .min(desc.array_size);
            (
                self.base_array_slice,
                last.saturating_sub(self.base_array_slice),
            )
        } else {
            (0, 1)
        };

        Self {
            base_mip_level: self.base_mip_level,
            num_mip_levels,
            base_array_slice,
            num_array_slices,
        }
    }

    /// Whether the resolved set covers every subresource of the texture.
    pub fn is_entire_texture(&self, desc: &TextureDescriptor) -> bool {
        let resolved = self.resolve(desc, false);
        resolved.base_mip_level == 0
            && resolved.num_mip_levels >= desc.mip_levels
            && resolved.base_array_slice == 0
            && (!desc.dimension.is_array() || resolved.num_array_slices >= desc.array_size)
    }
}

impl Default for TextureSubresourceSet {
    fn default() -> Self {
        Self::ALL
    }
}

/// Purpose of a texture view. Decides the aspect and whether one mip is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureViewKind {
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthStencil,
}

impl TextureViewKind {
    pub fn is_single_mip(&self) -> bool {
        !matches!(self, Self::ShaderResource)
    }
}
