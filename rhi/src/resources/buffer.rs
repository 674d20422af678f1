//! GPU buffer resource.

use std::sync::Arc;

use parking_lot::Mutex;

use super::GpuResource;
use crate::backend::{BufferHandle, BufferViewHandle, BufferViewInfo, NativeObject};
use crate::binding_key::{BufferBindingKey, BufferBindingMap};
use crate::context::DeviceContext;
use crate::error::RhiError;
use crate::memory::MemoryResource;
use crate::sync::SyncObjectPool;
use crate::types::{BufferDescriptor, BufferRange, BufferUsage, Format, ResourceId};

/// A GPU buffer with its memory and a cache of typed views.
///
/// Buffers are created by [`Device::create_buffer`](crate::Device::create_buffer)
/// and are reference-counted.
///
/// # Example
///
/// ```ignore
/// let buffer = device.create_buffer(
///     &BufferDescriptor::new(1024, BufferUsage::SHADER_RESOURCE | BufferUsage::TYPED_VIEWS)
///         .with_format(Format::R32Uint),
/// )?;
/// let view = buffer.get_typed_view(Format::Unknown, BufferRange::ENTIRE)?;
/// ```
pub struct Buffer {
    context: Arc<DeviceContext>,
    descriptor: BufferDescriptor,
    native: BufferHandle,
    resource: MemoryResource,
    views: Mutex<BufferBindingMap<BufferViewHandle>>,
}

impl Buffer {
    /// Create the native buffer and back it with memory from the device allocator.
    pub(crate) fn create(
        context: Arc<DeviceContext>,
        sync_pool: Arc<SyncObjectPool>,
        descriptor: &BufferDescriptor,
    ) -> Result<Arc<Self>, RhiError> {
        if descriptor.size == 0 {
            return Err(RhiError::InvalidParameter(
                "buffer size must be greater than zero".to_string(),
            ));
        }
        if descriptor.usage.contains(BufferUsage::TYPED_VIEWS) && descriptor.format == Format::Unknown
        {
            log::debug!(
                "Buffer {:?} allows typed views without a default format",
                descriptor.label
            );
        }

        let native = context.backend().create_buffer(descriptor)?;
        let mut resource = MemoryResource::new(sync_pool);
        if let Err(e) = context.allocator().allocate_buffer_memory(
            &context,
            native,
            descriptor.cpu_access,
            &mut resource,
        ) {
            context.backend().destroy_buffer(native);
            return Err(e);
        }

        if let Some(label) = &descriptor.label {
            context.name_object(NativeObject::Buffer(native), label);
        }
        log::trace!(
            "Created buffer {:?} ({} bytes, {:?})",
            descriptor.label,
            descriptor.size,
            resource.property_flags()
        );

        Ok(Arc::new(Self {
            context,
            descriptor: descriptor.clone(),
            native,
            resource,
            views: Mutex::new(BufferBindingMap::new()),
        }))
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn id(&self) -> ResourceId {
        self.resource.id()
    }

    /// Native buffer.
    pub fn native(&self) -> BufferHandle {
        self.native
    }

    /// Whether the CPU maps this buffer.
    pub fn is_cpu_accessible(&self) -> bool {
        self.descriptor.cpu_access.is_cpu_accessible()
    }

    /// Typed view of `range`, created on first use and cached.
    ///
    /// `Format::Unknown` selects the buffer's own format.
    pub fn get_typed_view(
        &self,
        format: Format,
        range: BufferRange,
    ) -> Result<BufferViewHandle, RhiError> {
        if !self.descriptor.usage.contains(BufferUsage::TYPED_VIEWS) {
            return Err(RhiError::InvalidParameter(format!(
                "buffer {:?} was not created with typed views",
                self.descriptor.label
            )));
        }
        let format = format.or(self.descriptor.format);
        if format == Format::Unknown {
            return Err(RhiError::InvalidParameter(
                "typed buffer view needs a format".to_string(),
            ));
        }
        let range = range.resolve(self.descriptor.size);
        if range.byte_size == 0 {
            return Err(RhiError::InvalidParameter(
                "buffer view range is empty".to_string(),
            ));
        }

        let key = BufferBindingKey::new(range, format);
        let mut views = self.views.lock();
        if let Some(view) = views.get(&key) {
            return Ok(*view);
        }
        let view = self
            .context
            .backend()
            .create_buffer_view(self.native, &BufferViewInfo { format, range })?;
        views.insert(key, view);
        Ok(view)
    }

    /// Number of cached views.
    pub fn view_count(&self) -> usize {
        self.views.lock().len()
    }
}

impl GpuResource for Buffer {
    fn memory_resource(&self) -> &MemoryResource {
        &self.resource
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        for (_, view) in self.views.get_mut().drain() {
            self.context.backend().destroy_buffer_view(view);
        }
        self.context.backend().destroy_buffer(self.native);
        if self.resource.is_managed() {
            self.context
                .allocator()
                .free_memory(&self.context, &mut self.resource);
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .field("native", &self.native)
            .finish()
    }
}

static_assertions::assert_impl_all!(Buffer: Send, Sync);
