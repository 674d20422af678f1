//! GPU backend abstraction layer.
//!
//! The device layer owns all bookkeeping (pools, tracking, caches); a backend
//! only creates, records and submits native objects.
//!
//! # Available Backends
//!
//! - `dummy` (always compiled): CPU simulation of a GPU with manual or
//!   automatic completion, used by tests and headless tools
//! - `vulkan-backend` (default feature): native Vulkan through `ash`
//!
//! # Architecture
//!
//! Each backend implements [`GpuBackend`]. Handles are opaque `Copy` enums
//! from [`handles`]; commands and submissions are plain data from
//! [`command`].

pub mod command;
pub mod dummy;
pub mod handles;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::sync::Arc;

pub use command::*;
pub use dummy::DummyBackend;
pub use handles::*;

use crate::config::{BackendKind, DeviceConfig, SyncTimeout};
use crate::error::RhiError;
use crate::types::{
    BufferDescriptor, Extent3d, MemoryRequirements, QueueId, SamplerDescriptor, ShaderStages,
    TextureDescriptor,
};

/// Native API a [`Device`](crate::Device) runs on.
pub trait GpuBackend: Send + Sync + 'static {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Memory types, queues, extensions and limits of the device.
    fn device_info(&self) -> &DeviceInfo;

    // --- Synchronization ---------------------------------------------------

    fn create_semaphore(&self) -> Result<SemaphoreHandle, RhiError>;
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    /// Create an unsignaled fence.
    fn create_fence(&self) -> Result<FenceHandle, RhiError>;
    fn reset_fence(&self, fence: FenceHandle) -> Result<(), RhiError>;
    /// Non-blocking completion query.
    fn fence_status(&self, fence: FenceHandle) -> Result<bool, RhiError>;
    /// Block until the fence signals. `Ok(false)` when the timeout expired.
    fn wait_fence(&self, fence: FenceHandle, timeout: SyncTimeout) -> Result<bool, RhiError>;
    fn destroy_fence(&self, fence: FenceHandle);

    // --- Memory ------------------------------------------------------------

    fn allocate_memory(&self, size: u64, memory_type_index: u32)
    -> Result<MemoryHandle, RhiError>;
    fn free_memory(&self, memory: MemoryHandle);
    /// Copy into host-visible memory.
    fn write_memory(&self, memory: MemoryHandle, offset: u64, data: &[u8])
    -> Result<(), RhiError>;
    /// Copy out of host-visible memory.
    fn read_memory(&self, memory: MemoryHandle, offset: u64, out: &mut [u8])
    -> Result<(), RhiError>;

    // --- Buffers and textures ----------------------------------------------

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<BufferHandle, RhiError>;
    fn buffer_memory_requirements(&self, buffer: BufferHandle) -> MemoryRequirements;
    fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> Result<(), RhiError>;
    fn destroy_buffer(&self, buffer: BufferHandle);
    fn create_buffer_view(
        &self,
        buffer: BufferHandle,
        info: &BufferViewInfo,
    ) -> Result<BufferViewHandle, RhiError>;
    fn destroy_buffer_view(&self, view: BufferViewHandle);

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<TextureHandle, RhiError>;
    fn texture_memory_requirements(&self, texture: TextureHandle) -> MemoryRequirements;
    fn bind_texture_memory(
        &self,
        texture: TextureHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> Result<(), RhiError>;
    fn destroy_texture(&self, texture: TextureHandle);
    fn create_texture_view(
        &self,
        texture: TextureHandle,
        info: &TextureViewInfo,
    ) -> Result<TextureViewHandle, RhiError>;
    fn destroy_texture_view(&self, view: TextureViewHandle);

    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<SamplerHandle, RhiError>;
    fn destroy_sampler(&self, sampler: SamplerHandle);

    // --- Shaders, bindings and pipelines -------------------------------------

    fn create_shader_module(
        &self,
        stage: ShaderStages,
        bytecode: &[u8],
    ) -> Result<ShaderModuleHandle, RhiError>;
    fn destroy_shader_module(&self, module: ShaderModuleHandle);

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorLayoutBinding],
    ) -> Result<DescriptorSetLayoutHandle, RhiError>;
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);
    /// Allocate a set for `layout` and fill it with `writes`.
    fn create_descriptor_set(
        &self,
        layout: DescriptorSetLayoutHandle,
        bindings: &[DescriptorLayoutBinding],
        writes: &[DescriptorWrite],
    ) -> Result<DescriptorSetHandle, RhiError>;
    fn destroy_descriptor_set(&self, set: DescriptorSetHandle);

    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
    ) -> Result<PipelineLayoutHandle, RhiError>;
    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle);
    fn create_compute_pipeline(
        &self,
        info: &ComputePipelineInfo,
    ) -> Result<PipelineHandle, RhiError>;
    fn create_graphics_pipeline(
        &self,
        info: &GraphicsPipelineInfo,
    ) -> Result<PipelineHandle, RhiError>;
    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    fn create_render_pass(&self, info: &RenderPassInfo) -> Result<RenderPassHandle, RhiError>;
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);
    /// `extent.depth` is the layer count.
    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        attachments: &[TextureViewHandle],
        extent: Extent3d,
    ) -> Result<FramebufferHandle, RhiError>;
    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);

    // --- Command buffers and queues ------------------------------------------

    fn create_command_pool(&self, queue: QueueId) -> Result<CommandPoolHandle, RhiError>;
    fn destroy_command_pool(&self, pool: CommandPoolHandle);
    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
    ) -> Result<CommandBufferHandle, RhiError>;
    fn free_command_buffer(&self, pool: CommandPoolHandle, command_buffer: CommandBufferHandle);
    fn reset_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<(), RhiError>;
    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<(), RhiError>;
    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<(), RhiError>;
    fn record(
        &self,
        command_buffer: CommandBufferHandle,
        command: NativeCommand,
    ) -> Result<(), RhiError>;

    fn submit(&self, queue: QueueId, submit: &NativeSubmit) -> Result<(), RhiError>;
    /// Block until `queue` drained. `Ok(false)` when the timeout expired.
    fn queue_wait_idle(&self, queue: QueueId, timeout: SyncTimeout) -> Result<bool, RhiError>;
    fn device_wait_idle(&self) -> Result<(), RhiError>;

    // --- Debugging -----------------------------------------------------------

    /// Attach a debug name. Silently ignored when unsupported.
    fn set_object_name(&self, object: NativeObject, name: &str);
}

/// Create a backend according to `config.backend`.
///
/// `BackendKind::Auto` tries Vulkan first and falls back to the dummy
/// backend when Vulkan is unavailable.
pub fn create_backend(config: &DeviceConfig) -> Result<Arc<dyn GpuBackend>, RhiError> {
    match config.backend {
        BackendKind::Dummy => {
            log::info!("Using dummy backend");
            Ok(Arc::new(DummyBackend::new()))
        }
        BackendKind::Vulkan => create_vulkan_backend(config),
        BackendKind::Auto => match create_vulkan_backend(config) {
            Ok(backend) => Ok(backend),
            Err(e) => {
                log::warn!("Vulkan backend unavailable ({e}), falling back to dummy backend");
                Ok(Arc::new(DummyBackend::new()))
            }
        },
    }
}

#[cfg(feature = "vulkan-backend")]
fn create_vulkan_backend(config: &DeviceConfig) -> Result<Arc<dyn GpuBackend>, RhiError> {
    let backend = vulkan::VulkanBackend::new(config)?;
    log::info!("Using Vulkan backend on {}", backend.device_info().name);
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "vulkan-backend"))]
fn create_vulkan_backend(_config: &DeviceConfig) -> Result<Arc<dyn GpuBackend>, RhiError> {
    Err(RhiError::FeatureNotSupported(
        "crate built without the vulkan-backend feature".to_string(),
    ))
}
