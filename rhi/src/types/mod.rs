//! Plain-data types shared by the device, command lists and backends.

mod binding;
mod buffer;
mod common;
mod format;
mod memory;
mod pipeline;
mod queue;
mod sampler;
mod states;
mod texture;

pub use binding::{BindingLayoutDescriptor, BindingLayoutItem, ResourceType};
pub use buffer::{BufferDescriptor, BufferRange, BufferUsage, CpuAccessMode};
pub use common::{Color, Extent3d, ResourceId, ScissorRect, Viewport};
pub use format::Format;
pub use memory::{MemoryHeap, MemoryProperties, MemoryPropertyFlags, MemoryRequirements, MemoryType};
pub use pipeline::{
    CullMode, DepthState, IndexFormat, PrimitiveTopology, RasterState, RenderState,
    ShaderDescriptor, ShaderStages, VertexAttribute,
};
pub use queue::QueueId;
pub use sampler::{AddressMode, CompareFunction, FilterMode, SamplerDescriptor};
pub use states::{
    AccessFlags, ImageLayout, PipelineStages, ResourceStates, StateMapping, convert_resource_state,
};
pub use texture::{
    TextureDescriptor, TextureDimension, TextureSubresourceSet, TextureUsage, TextureViewKind,
};

/// Maximum number of binding layouts a pipeline may use.
pub const MAX_BINDING_LAYOUTS: usize = 5;

/// Maximum number of semaphores one submission may wait on.
pub const MAX_WAIT_SEMAPHORES: usize = 64;

/// Maximum number of colour attachments in a framebuffer.
pub const MAX_RENDER_TARGETS: usize = 8;
