//! Backend-facing descriptions of commands, submissions and native objects.
//!
//! The device layer translates its high-level objects into these plain
//! structs; backends translate them into API calls (Vulkan) or simulate them
//! (dummy).

use bitflags::bitflags;

use super::handles::*;
use crate::types::{
    BufferRange, Extent3d, Format, ImageLayout, IndexFormat, MemoryProperties, PipelineStages,
    PrimitiveTopology, QueueId, RenderState, ScissorRect, ShaderStages, StateMapping,
    TextureDimension, TextureSubresourceSet, TextureViewKind, VertexAttribute, Viewport,
};

bitflags! {
    /// Optional device extensions a backend enabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceExtensions: u32 {
        /// Debug object names and validation messenger.
        const DEBUG_UTILS = 1 << 0;
        const SYNCHRONIZATION_2 = 1 << 1;
        const TIMELINE_SEMAPHORE = 1 << 2;
        const BUFFER_DEVICE_ADDRESS = 1 << 3;
    }
}

impl Default for DeviceExtensions {
    fn default() -> Self {
        Self::empty()
    }
}

/// Limits the device layer validates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceLimits {
    pub max_bound_descriptor_sets: u32,
    pub max_texture_dimension_2d: u32,
    pub min_uniform_buffer_offset_alignment: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_bound_descriptor_sets: 8,
            max_texture_dimension_2d: 16384,
            min_uniform_buffer_offset_alignment: 256,
        }
    }
}

/// Static facts about the device a backend drives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub name: String,
    pub memory_properties: MemoryProperties,
    /// Which queues exist, indexed by [`QueueId::index`].
    pub queues: [bool; 3],
    pub extensions: DeviceExtensions,
    pub limits: DeviceLimits,
}

impl DeviceInfo {
    pub fn has_queue(&self, queue: QueueId) -> bool {
        self.queues[queue.index()]
    }
}

/// Native descriptor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    SampledImage,
    StorageImage,
    UniformTexelBuffer,
    StorageTexelBuffer,
    UniformBuffer,
    StorageBuffer,
    Sampler,
}

/// One binding of a native descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorLayoutBinding {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub count: u32,
    pub stages: ShaderStages,
}

/// Resource written into a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorResource {
    Image {
        view: TextureViewHandle,
        layout: ImageLayout,
    },
    Buffer {
        buffer: BufferHandle,
        range: BufferRange,
    },
    TexelBuffer(BufferViewHandle),
    Sampler(SamplerHandle),
}

/// One descriptor update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub array_element: u32,
    pub descriptor_type: DescriptorType,
    pub resource: DescriptorResource,
}

/// Parameters of a native image view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewInfo {
    pub kind: TextureViewKind,
    pub format: Format,
    pub dimension: TextureDimension,
    /// Already resolved against the texture.
    pub subresources: TextureSubresourceSet,
}

/// Parameters of a native texel buffer view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferViewInfo {
    pub format: Format,
    /// Already resolved against the buffer.
    pub range: BufferRange,
}

/// One attachment of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentInfo {
    pub format: Format,
    pub sample_count: u32,
    /// Layout the attachment is in during and after the pass.
    pub layout: ImageLayout,
}

/// Render pass shape. Attachments are loaded and stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RenderPassInfo {
    pub color_attachments: Vec<AttachmentInfo>,
    pub depth_attachment: Option<AttachmentInfo>,
}

/// Compute pipeline creation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputePipelineInfo {
    pub layout: PipelineLayoutHandle,
    pub shader: ShaderModuleHandle,
    pub entry_point: String,
}

/// Graphics pipeline creation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphicsPipelineInfo {
    pub layout: PipelineLayoutHandle,
    pub render_pass: RenderPassHandle,
    pub vertex_shader: ShaderModuleHandle,
    pub vertex_entry_point: String,
    pub pixel_shader: Option<(ShaderModuleHandle, String)>,
    pub topology: PrimitiveTopology,
    pub vertex_attributes: Vec<VertexAttribute>,
    pub render_state: RenderState,
    pub color_attachment_count: u32,
    pub sample_count: u32,
}

/// Where a pipeline or descriptor set is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
}

/// Barrier on a whole buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeBufferBarrier {
    pub buffer: BufferHandle,
    pub before: StateMapping,
    pub after: StateMapping,
}

/// Barrier on a range of texture subresources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeTextureBarrier {
    pub texture: TextureHandle,
    pub format: Format,
    pub subresources: TextureSubresourceSet,
    pub before: StateMapping,
    pub after: StateMapping,
}

/// A command recorded into a native command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCommand {
    PipelineBarrier {
        buffers: Vec<NativeBufferBarrier>,
        textures: Vec<NativeTextureBarrier>,
    },
    BindPipeline {
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    },
    BindDescriptorSets {
        bind_point: PipelineBindPoint,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: Vec<DescriptorSetHandle>,
    },
    BeginRenderPass {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        extent: Extent3d,
    },
    EndRenderPass,
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<(BufferHandle, u64)>,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    UpdateBuffer {
        buffer: BufferHandle,
        offset: u64,
        data: Vec<u8>,
    },
    FillBuffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        value: u32,
    },
    CopyBuffer {
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    },
    ClearColorImage {
        texture: TextureHandle,
        color: [f32; 4],
        subresources: TextureSubresourceSet,
    },
    ClearDepthStencilImage {
        texture: TextureHandle,
        format: Format,
        depth: Option<f32>,
        stencil: Option<u8>,
        subresources: TextureSubresourceSet,
    },
}

/// One batch handed to a native queue.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NativeSubmit {
    pub command_buffers: Vec<CommandBufferHandle>,
    /// Semaphores to wait on with the stages the wait blocks.
    pub waits: Vec<(SemaphoreHandle, PipelineStages)>,
    pub signals: Vec<SemaphoreHandle>,
    pub fence: Option<FenceHandle>,
}
