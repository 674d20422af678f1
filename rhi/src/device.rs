//! The device: the entry point that owns queues, pools and caches.
//!
//! # Example
//!
//! ```ignore
//! use redlilium_rhi::*;
//!
//! let device = Device::from_config(DeviceConfig::new().with_backend(BackendKind::Dummy))?;
//! let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::UNORDERED_ACCESS))?;
//! let mut list = device.create_command_list(CommandListParameters::default())?;
//! list.open()?;
//! list.clear_buffer_uint(&buffer, 0)?;
//! list.close()?;
//! device.execute_command_list(&mut list)?;
//! device.wait_for_idle()?;
//! ```

use std::sync::Arc;

use crate::backend::{GpuBackend, create_backend};
use crate::command_list::{CommandList, CommandListParameters};
use crate::config::DeviceConfig;
use crate::context::DeviceContext;
use crate::error::RhiError;
use crate::memory::{DeviceAllocator, MemoryAllocator, SyncSlot};
use crate::profile_function;
use crate::queue::Queue;
use crate::resources::{
    BindingCache, BindingLayout, BindingSet, BindingSetDescriptor, Buffer, ComputePipeline,
    ComputePipelineDescriptor, Framebuffer, FramebufferDescriptor, FramebufferInfo,
    GraphicsPipeline, GraphicsPipelineDescriptor, GpuResource, Sampler, Shader, Texture,
};
use crate::sync::SyncObjectPool;
use crate::types::{
    BindingLayoutDescriptor, BufferDescriptor, CpuAccessMode, QueueId, SamplerDescriptor,
    ShaderDescriptor, TextureDescriptor,
};

/// A logical GPU device.
///
/// Internally synchronized: every method takes `&self` and the device can be
/// shared between threads behind an `Arc`.
pub struct Device {
    context: Arc<DeviceContext>,
    sync_pool: Arc<SyncObjectPool>,
    queues: [Option<Arc<Queue>>; 3],
    binding_cache: BindingCache,
}

impl Device {
    /// Create the backend selected by `config` and a device on top of it.
    pub fn from_config(config: DeviceConfig) -> Result<Self, RhiError> {
        let backend = create_backend(&config)?;
        Self::new(backend, config)
    }

    /// Create a device on `backend` with dedicated allocations.
    pub fn new(backend: Arc<dyn GpuBackend>, config: DeviceConfig) -> Result<Self, RhiError> {
        Self::with_allocator(backend, config, Arc::new(DeviceAllocator))
    }

    /// Create a device on `backend` with a custom memory allocator.
    pub fn with_allocator(
        backend: Arc<dyn GpuBackend>,
        config: DeviceConfig,
        allocator: Arc<dyn MemoryAllocator>,
    ) -> Result<Self, RhiError> {
        profile_function!();

        let info = backend.device_info();
        if !info.has_queue(QueueId::Graphics) {
            return Err(RhiError::InitializationFailed(format!(
                "{} backend exposes no graphics queue",
                backend.name()
            )));
        }
        log::info!("Creating device on {} ({})", info.name, backend.name());

        let context = Arc::new(DeviceContext::new(backend, config, allocator));
        let sync_pool = Arc::new(SyncObjectPool::new(context.clone())?);

        let mut queues: [Option<Arc<Queue>>; 3] = Default::default();
        for id in QueueId::ALL {
            let enabled = match id {
                QueueId::Graphics => true,
                QueueId::Compute => context.config().enable_compute_queue,
                QueueId::Transfer => context.config().enable_transfer_queue,
            };
            if enabled && context.info().has_queue(id) {
                queues[id.index()] = Some(Arc::new(Queue::new(
                    id,
                    context.clone(),
                    sync_pool.clone(),
                )?));
            }
        }

        Ok(Self {
            context,
            sync_pool,
            queues,
            binding_cache: BindingCache::new(),
        })
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.context
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        self.context.backend()
    }

    pub fn config(&self) -> &DeviceConfig {
        self.context.config()
    }

    pub fn sync_pool(&self) -> &Arc<SyncObjectPool> {
        &self.sync_pool
    }

    pub fn binding_cache(&self) -> &BindingCache {
        &self.binding_cache
    }

    /// The queue with the given role, if the device created one.
    pub fn queue(&self, id: QueueId) -> Option<&Arc<Queue>> {
        self.queues[id.index()].as_ref()
    }

    /// Queues the device created, in [`QueueId::ALL`] order.
    pub fn queues(&self) -> impl Iterator<Item = &Arc<Queue>> {
        self.queues.iter().flatten()
    }

    // --- Resources -----------------------------------------------------------

    pub fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<Arc<Buffer>, RhiError> {
        Buffer::create(self.context.clone(), self.sync_pool.clone(), descriptor)
    }

    pub fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<Arc<Texture>, RhiError> {
        Texture::create(self.context.clone(), self.sync_pool.clone(), descriptor)
    }

    pub fn create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<Arc<Sampler>, RhiError> {
        Sampler::create(self.context.clone(), descriptor)
    }

    /// Create a shader module from backend bytecode (SPIR-V for Vulkan).
    pub fn create_shader(
        &self,
        descriptor: &ShaderDescriptor,
        bytecode: &[u8],
    ) -> Result<Arc<Shader>, RhiError> {
        Shader::create(self.context.clone(), descriptor, bytecode)
    }

    pub fn create_binding_layout(
        &self,
        descriptor: &BindingLayoutDescriptor,
    ) -> Result<Arc<BindingLayout>, RhiError> {
        BindingLayout::create(self.context.clone(), descriptor)
    }

    /// Return a live layout with the same descriptor or create one.
    pub fn get_or_create_binding_layout(
        &self,
        descriptor: &BindingLayoutDescriptor,
    ) -> Result<Arc<BindingLayout>, RhiError> {
        self.binding_cache.get_or_create_layout(descriptor, || {
            self.create_binding_layout(descriptor)
        })
    }

    pub fn create_binding_set(
        &self,
        layout: &Arc<BindingLayout>,
        descriptor: &BindingSetDescriptor,
    ) -> Result<Arc<BindingSet>, RhiError> {
        BindingSet::create(self.context.clone(), layout.clone(), descriptor)
    }

    /// Return a live set with the same layout and items or create one.
    pub fn get_or_create_binding_set(
        &self,
        layout: &Arc<BindingLayout>,
        descriptor: &BindingSetDescriptor,
    ) -> Result<Arc<BindingSet>, RhiError> {
        self.binding_cache.get_or_create_set(layout, descriptor, || {
            self.create_binding_set(layout, descriptor)
        })
    }

    pub fn create_framebuffer(
        &self,
        descriptor: &FramebufferDescriptor,
    ) -> Result<Arc<Framebuffer>, RhiError> {
        Framebuffer::create(self.context.clone(), descriptor)
    }

    pub fn create_compute_pipeline(
        &self,
        descriptor: &ComputePipelineDescriptor,
    ) -> Result<Arc<ComputePipeline>, RhiError> {
        ComputePipeline::create(self.context.clone(), descriptor)
    }

    /// Create a graphics pipeline for framebuffers shaped like `framebuffer_info`.
    pub fn create_graphics_pipeline(
        &self,
        descriptor: &GraphicsPipelineDescriptor,
        framebuffer_info: &FramebufferInfo,
    ) -> Result<Arc<GraphicsPipeline>, RhiError> {
        GraphicsPipeline::create(self.context.clone(), descriptor, framebuffer_info)
    }

    // --- Command lists -------------------------------------------------------

    /// Command list parameters with the device's default UAV barrier setting.
    pub fn command_list_parameters(&self, queue: QueueId) -> CommandListParameters {
        CommandListParameters::new(queue).with_uav_barriers(self.config().enable_uav_barriers)
    }

    pub fn create_command_list(
        &self,
        parameters: CommandListParameters,
    ) -> Result<CommandList, RhiError> {
        let queue = self.queue(parameters.queue).ok_or_else(|| {
            RhiError::FeatureNotSupported(format!("device has no {} queue", parameters.queue))
        })?;
        Ok(CommandList::new(
            self.context.clone(),
            queue.clone(),
            parameters,
        ))
    }

    /// Submit a closed command list to its queue. Returns the submission id.
    pub fn execute_command_list(&self, list: &mut CommandList) -> Result<u64, RhiError> {
        profile_function!();

        let command_buffer = list.take_closed()?;
        list.queue().submit(command_buffer)
    }

    // --- Lifetime ------------------------------------------------------------

    /// Retire finished submissions on every queue and prune dead cache entries.
    pub fn run_garbage_collection(&self) -> Result<(), RhiError> {
        profile_function!();

        let mut first_error = None;
        for queue in self.queues() {
            if let Err(e) = queue.retire_command_buffers() {
                log::error!("Failed to retire {} queue: {e}", queue.id());
                first_error.get_or_insert(e);
            }
        }
        let pruned = self.binding_cache.prune();
        if pruned > 0 {
            log::trace!("Pruned {pruned} binding cache entries");
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Block until every queue drained, then retire all submissions.
    pub fn wait_for_idle(&self) -> Result<(), RhiError> {
        profile_function!();

        for queue in self.queues() {
            queue.idle()?;
        }
        self.run_garbage_collection()
    }

    // --- Host access ---------------------------------------------------------

    /// Copy `out.len()` bytes of a CPU-readable buffer into `out`.
    ///
    /// Waits for the last GPU write of the buffer first.
    pub fn read_buffer(&self, buffer: &Buffer, offset: u64, out: &mut [u8]) -> Result<(), RhiError> {
        profile_function!();

        if buffer.descriptor().cpu_access != CpuAccessMode::Read {
            return Err(RhiError::InvalidParameter(format!(
                "buffer {:?} was not created for CPU reads",
                buffer.label()
            )));
        }
        self.check_host_range(buffer, offset, out.len())?;
        self.wait_for_last_write(buffer)?;

        let memory = self.host_memory(buffer)?;
        self.context.backend().read_memory(memory, offset, out)
    }

    /// Read `count` elements of `T` starting at `offset`.
    pub fn read_buffer_typed<T: bytemuck::Pod>(
        &self,
        buffer: &Buffer,
        offset: u64,
        count: usize,
    ) -> Result<Vec<T>, RhiError> {
        let mut values = vec![T::zeroed(); count];
        self.read_buffer(buffer, offset, bytemuck::cast_slice_mut(&mut values))?;
        Ok(values)
    }

    /// Copy `data` into a CPU-writable buffer.
    ///
    /// The caller must not overwrite memory the GPU still reads.
    pub fn write_buffer_host(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<(), RhiError> {
        if buffer.descriptor().cpu_access != CpuAccessMode::Write {
            return Err(RhiError::InvalidParameter(format!(
                "buffer {:?} was not created for CPU writes",
                buffer.label()
            )));
        }
        self.check_host_range(buffer, offset, data.len())?;
        let memory = self.host_memory(buffer)?;
        self.context.backend().write_memory(memory, offset, data)
    }

    fn check_host_range(&self, buffer: &Buffer, offset: u64, len: usize) -> Result<(), RhiError> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= buffer.size() => Ok(()),
            _ => Err(RhiError::InvalidParameter(format!(
                "host access {offset}+{len} is outside buffer {:?} of {} bytes",
                buffer.label(),
                buffer.size()
            ))),
        }
    }

    fn host_memory(&self, buffer: &Buffer) -> Result<crate::backend::MemoryHandle, RhiError> {
        let memory = buffer.memory_resource();
        if !memory.is_host_visible() {
            return Err(RhiError::InvalidParameter(format!(
                "buffer {:?} is not in host-visible memory",
                buffer.label()
            )));
        }
        memory
            .memory()
            .ok_or_else(|| RhiError::Internal("buffer has no memory bound".to_string()))
    }

    fn wait_for_last_write(&self, buffer: &Buffer) -> Result<(), RhiError> {
        let Some(fence) = buffer.memory_resource().acquire_fence(SyncSlot::Write) else {
            return Ok(());
        };
        let result = fence.wait(&self.context);
        self.sync_pool.release_fence(fence);
        result
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.wait_for_idle() {
            log::error!("Failed to idle device on drop: {e}");
        }
        log::debug!(
            "Destroying device, sync pool stats: {:?}",
            self.sync_pool.stats()
        );
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("context", &self.context)
            .field("queues", &self.queues().map(|q| q.id()).collect::<Vec<_>>())
            .field("binding_cache", &self.binding_cache)
            .finish()
    }
}

static_assertions::assert_impl_all!(Device: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::config::BackendKind;
    use crate::types::BufferUsage;

    fn dummy_device(config: DeviceConfig) -> Device {
        Device::new(Arc::new(DummyBackend::new()), config).unwrap()
    }

    #[test]
    fn test_from_config_dummy() {
        let device = Device::from_config(DeviceConfig::new().with_backend(BackendKind::Dummy)).unwrap();
        assert_eq!(device.backend().name(), "Dummy");
        assert!(device.queue(QueueId::Graphics).is_some());
    }

    #[test]
    fn test_disabled_queues_are_not_created() {
        let device = dummy_device(
            DeviceConfig::new()
                .with_compute_queue(false)
                .with_transfer_queue(false),
        );
        assert_eq!(device.queues().count(), 1);
        let err = device
            .create_command_list(CommandListParameters::new(QueueId::Compute))
            .unwrap_err();
        assert!(matches!(err, RhiError::FeatureNotSupported(_)));
    }

    #[test]
    fn test_missing_graphics_queue_fails() {
        let backend = DummyBackend::new().with_queue(QueueId::Graphics, false);
        let err = Device::new(Arc::new(backend), DeviceConfig::default()).unwrap_err();
        assert!(matches!(err, RhiError::InitializationFailed(_)));
    }

    #[test]
    fn test_read_buffer_requires_cpu_read() {
        let device = dummy_device(DeviceConfig::default());
        let buffer = device
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::COPY_DST))
            .unwrap();
        let mut out = [0u8; 4];
        assert!(device.read_buffer(&buffer, 0, &mut out).is_err());
    }

    #[test]
    fn test_read_buffer_out_of_range() {
        let device = dummy_device(DeviceConfig::default());
        let buffer = device
            .create_buffer(
                &BufferDescriptor::new(16, BufferUsage::COPY_DST)
                    .with_cpu_access(CpuAccessMode::Read),
            )
            .unwrap();
        let mut out = [0u8; 8];
        assert!(device.read_buffer(&buffer, 12, &mut out).is_err());
        assert!(device.read_buffer(&buffer, 8, &mut out).is_ok());
    }

    #[test]
    fn test_execute_requires_closed_list() {
        let device = dummy_device(DeviceConfig::default());
        let mut list = device
            .create_command_list(device.command_list_parameters(QueueId::Graphics))
            .unwrap();
        assert!(device.execute_command_list(&mut list).is_err());
        list.open().unwrap();
        assert!(device.execute_command_list(&mut list).is_err());
        list.close().unwrap();
        device.execute_command_list(&mut list).unwrap();
        device.wait_for_idle().unwrap();
    }
}
