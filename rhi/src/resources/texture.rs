//! GPU texture resource.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::GpuResource;
use crate::backend::{NativeObject, TextureHandle, TextureViewHandle, TextureViewInfo};
use crate::binding_key::TextureBindingKey;
use crate::context::DeviceContext;
use crate::error::RhiError;
use crate::memory::MemoryResource;
use crate::sync::SyncObjectPool;
use crate::types::{
    Extent3d, Format, ResourceId, TextureDescriptor, TextureDimension, TextureSubresourceSet,
    TextureUsage, TextureViewKind,
};

/// A GPU texture with its memory and a cache of views.
///
/// Textures are created by [`Device::create_texture`](crate::Device::create_texture).
/// Views are created on demand by [`get_view`](Self::get_view) and live as
/// long as the texture.
pub struct Texture {
    context: Arc<DeviceContext>,
    descriptor: TextureDescriptor,
    native: TextureHandle,
    resource: MemoryResource,
    views: Mutex<HashMap<(TextureViewKind, TextureBindingKey), TextureViewHandle>>,
}

impl Texture {
    pub(crate) fn create(
        context: Arc<DeviceContext>,
        sync_pool: Arc<SyncObjectPool>,
        descriptor: &TextureDescriptor,
    ) -> Result<Arc<Self>, RhiError> {
        validate_descriptor(&context, descriptor)?;

        let native = context.backend().create_texture(descriptor)?;
        let mut resource = MemoryResource::new(sync_pool);
        if let Err(e) = context
            .allocator()
            .allocate_texture_memory(&context, native, &mut resource)
        {
            context.backend().destroy_texture(native);
            return Err(e);
        }

        if let Some(label) = &descriptor.label {
            context.name_object(NativeObject::Texture(native), label);
        }
        log::trace!(
            "Created texture {:?} ({}x{}x{}, {:?})",
            descriptor.label,
            descriptor.extent.width,
            descriptor.extent.height,
            descriptor.extent.depth,
            descriptor.format
        );

        Ok(Arc::new(Self {
            context,
            descriptor: descriptor.clone(),
            native,
            resource,
            views: Mutex::new(HashMap::new()),
        }))
    }

    /// Get the texture descriptor.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    /// Get the texture extent.
    pub fn extent(&self) -> Extent3d {
        self.descriptor.extent
    }

    /// Get the texture format.
    pub fn format(&self) -> Format {
        self.descriptor.format
    }

    /// Get the texture label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn id(&self) -> ResourceId {
        self.resource.id()
    }

    pub fn native(&self) -> TextureHandle {
        self.native
    }

    /// View of `subresources` for the given purpose, created on first use.
    ///
    /// `Format::Unknown` selects the texture format. Subresources are
    /// resolved against the texture first, so `ALL` and an explicit full
    /// range return the same view.
    pub fn get_view(
        &self,
        kind: TextureViewKind,
        format: Format,
        subresources: TextureSubresourceSet,
        read_only_dsv: bool,
    ) -> Result<TextureViewHandle, RhiError> {
        let format = format.or(self.descriptor.format);
        self.check_view_kind(kind, format)?;

        let subresources = subresources.resolve(&self.descriptor, kind.is_single_mip());
        if subresources.base_mip_level >= self.descriptor.mip_levels
            || subresources.num_mip_levels == 0
            || subresources.num_array_slices == 0
        {
            return Err(RhiError::InvalidParameter(format!(
                "view range {subresources:?} is outside texture {:?}",
                self.descriptor.label
            )));
        }

        let key = TextureBindingKey::new(subresources, format)
            .read_only_dsv(read_only_dsv && kind == TextureViewKind::DepthStencil);
        let mut views = self.views.lock();
        if let Some(view) = views.get(&(kind, key)) {
            return Ok(*view);
        }

        let dimension = match (self.descriptor.dimension, kind) {
            // Cube faces are addressed as array slices when rendering.
            (TextureDimension::TextureCube, TextureViewKind::RenderTarget)
            | (TextureDimension::TextureCube, TextureViewKind::DepthStencil)
            | (TextureDimension::TextureCube, TextureViewKind::UnorderedAccess) => {
                TextureDimension::Texture2DArray
            }
            (dimension, _) => dimension,
        };
        let view = self.context.backend().create_texture_view(
            self.native,
            &TextureViewInfo {
                kind,
                format,
                dimension,
                subresources,
            },
        )?;
        views.insert((kind, key), view);
        Ok(view)
    }

    /// Number of cached views.
    pub fn view_count(&self) -> usize {
        self.views.lock().len()
    }

    fn check_view_kind(&self, kind: TextureViewKind, format: Format) -> Result<(), RhiError> {
        let usage = self.descriptor.usage;
        let problem = match kind {
            TextureViewKind::ShaderResource if !usage.contains(TextureUsage::SHADER_RESOURCE) => {
                Some("is not a shader resource")
            }
            TextureViewKind::UnorderedAccess
                if !usage.contains(TextureUsage::UNORDERED_ACCESS) =>
            {
                Some("does not allow unordered access")
            }
            TextureViewKind::RenderTarget | TextureViewKind::DepthStencil
                if !usage.contains(TextureUsage::RENDER_TARGET) =>
            {
                Some("is not a render target")
            }
            TextureViewKind::RenderTarget if format.is_depth() => {
                Some("has a depth format and cannot be a colour target")
            }
            TextureViewKind::DepthStencil if !format.is_depth() => {
                Some("has a colour format and cannot be a depth target")
            }
            _ => None,
        };
        match problem {
            Some(problem) => Err(RhiError::InvalidParameter(format!(
                "texture {:?} {problem}",
                self.descriptor.label
            ))),
            None => Ok(()),
        }
    }
}

fn validate_descriptor(
    context: &DeviceContext,
    descriptor: &TextureDescriptor,
) -> Result<(), RhiError> {
    let extent = descriptor.extent;
    if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
        return Err(RhiError::InvalidParameter(
            "texture extent must be non-zero".to_string(),
        ));
    }
    if descriptor.format == Format::Unknown {
        return Err(RhiError::InvalidParameter(
            "texture format must be known".to_string(),
        ));
    }
    if descriptor.mip_levels == 0 || descriptor.array_size == 0 || descriptor.sample_count == 0 {
        return Err(RhiError::InvalidParameter(
            "texture mip, array and sample counts must be non-zero".to_string(),
        ));
    }
    let max_mips = 32 - extent.width.max(extent.height).max(1).leading_zeros();
    if descriptor.mip_levels > max_mips {
        return Err(RhiError::InvalidParameter(format!(
            "{} mip levels exceed the {max_mips} possible for {}x{}",
            descriptor.mip_levels, extent.width, extent.height
        )));
    }
    let max_dimension = context.limits().max_texture_dimension_2d;
    if extent.width > max_dimension || extent.height > max_dimension {
        return Err(RhiError::InvalidParameter(format!(
            "texture extent {}x{} exceeds the device limit {max_dimension}",
            extent.width, extent.height
        )));
    }
    if descriptor.dimension == TextureDimension::TextureCube && descriptor.array_size % 6 != 0 {
        return Err(RhiError::InvalidParameter(
            "cube textures need a multiple of six array slices".to_string(),
        ));
    }
    if descriptor.sample_count > 1 && descriptor.mip_levels > 1 {
        return Err(RhiError::InvalidParameter(
            "multisampled textures cannot have mip levels".to_string(),
        ));
    }
    Ok(())
}

impl GpuResource for Texture {
    fn memory_resource(&self) -> &MemoryResource {
        &self.resource
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        for (_, view) in self.views.get_mut().drain() {
            self.context.backend().destroy_texture_view(view);
        }
        self.context.backend().destroy_texture(self.native);
        if self.resource.is_managed() {
            self.context
                .allocator()
                .free_memory(&self.context, &mut self.resource);
        }
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("extent", &self.descriptor.extent)
            .field("format", &self.descriptor.format)
            .field("mip_levels", &self.descriptor.mip_levels)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);
