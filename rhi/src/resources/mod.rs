//! GPU resources.
//!
//! This module contains the objects created by [`Device`](crate::Device):
//! - [`Buffer`] and [`Texture`] - memory-backed resources with view caches
//! - [`Sampler`] and [`Shader`]
//! - [`BindingLayout`] and [`BindingSet`] - what shaders see, cached by
//!   [`BindingCache`]
//! - [`Framebuffer`] - attachments plus the render pass they are used with
//! - [`ComputePipeline`] and [`GraphicsPipeline`]
//!
//! Resources are reference-counted with [`Arc`](std::sync::Arc) and can be
//! shared across threads. Each resource keeps the device context alive and
//! destroys its native objects when the last reference is dropped.

mod binding;
mod binding_cache;
mod buffer;
mod framebuffer;
mod pipeline;
mod sampler;
mod shader;
mod texture;

pub use binding::{
    BindingLayout, BindingResource, BindingResourceUse, BindingSet, BindingSetDescriptor,
    BindingSetItem,
};
pub use binding_cache::BindingCache;
pub use buffer::Buffer;
pub use framebuffer::{Framebuffer, FramebufferAttachment, FramebufferDescriptor, FramebufferInfo};
pub use pipeline::{
    ComputePipeline, ComputePipelineDescriptor, GraphicsPipeline, GraphicsPipelineDescriptor,
};
pub use sampler::Sampler;
pub use shader::Shader;
pub use texture::Texture;

use crate::memory::MemoryResource;

/// A resource whose GPU accesses are tracked across submissions.
pub trait GpuResource: Send + Sync + 'static {
    fn memory_resource(&self) -> &MemoryResource;
}
