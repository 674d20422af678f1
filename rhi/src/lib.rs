//! # RedLilium RHI
//!
//! Backend-agnostic render hardware interface with automatic resource state
//! tracking and cross-queue synchronization.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Device`] - Entry point owning queues, sync pools and the binding cache
//! - [`CommandList`] - Command recording with automatic barriers
//! - [`Queue`] - Submission and retirement of tracked command buffers
//! - [`SyncObjectPool`] - Pooled, reference-counted semaphores and fences
//! - [`MemoryAllocator`] - Strategy for backing resources with device memory
//! - Backends: Vulkan (default feature) and Dummy (always available, for testing)
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_rhi::*;
//!
//! let device = Device::from_config(DeviceConfig::new())?;
//! let readback = device.create_buffer(
//!     &BufferDescriptor::new(256, BufferUsage::COPY_DST).with_cpu_access(CpuAccessMode::Read),
//! )?;
//! let mut list = device.create_command_list(CommandListParameters::default())?;
//! list.open()?;
//! list.clear_buffer_uint(&readback, 7)?;
//! list.close()?;
//! device.execute_command_list(&mut list)?;
//! let values: Vec<u32> = device.read_buffer_typed(&readback, 0, 64)?;
//! ```

pub mod backend;
pub mod binding_key;
pub mod command_list;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod memory;
pub mod pool;
pub mod profiling;
pub mod queue;
pub mod resources;
pub mod state_tracking;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use backend::{DummyBackend, GpuBackend, create_backend};
pub use binding_key::{BufferBindingKey, ResourceBindingKey, TextureBindingKey};
pub use command_list::{
    CommandList, CommandListParameters, ComputeState, DrawArguments, GraphicsState,
    IndexBufferBinding, VertexBufferBinding,
};
pub use config::{BackendKind, BindingOffsets, DeviceConfig, SyncTimeout};
pub use context::DeviceContext;
pub use device::Device;
pub use error::{RhiError, RhiResult};
pub use memory::{DeviceAllocator, MemoryAllocator, MemoryResource, SyncSlot};
pub use pool::{ObjectPool, PoolMode, Poolable, ReferenceCounter};
pub use queue::{CommandBufferSubmission, Queue, TrackedCommandBuffer};
pub use resources::{
    BindingCache, BindingLayout, BindingSet, BindingSetDescriptor, BindingSetItem, Buffer,
    ComputePipeline, ComputePipelineDescriptor, Framebuffer, FramebufferAttachment,
    FramebufferDescriptor, FramebufferInfo, GpuResource, GraphicsPipeline,
    GraphicsPipelineDescriptor, Sampler, Shader, Texture,
};
pub use state_tracking::ResourceStateTracker;
pub use sync::{Fence, FenceStatus, PooledFence, Semaphore, SyncObjectPool, SyncPoolStats};
pub use types::*;

/// RHI library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the RHI.
///
/// Only logs the version; devices are created through [`Device`].
pub fn init() {
    log::info!("RedLilium RHI v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_backend() {
        let backend = DummyBackend::new();
        assert!(backend.name() == "Dummy");
    }
}
