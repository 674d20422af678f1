//! Command lists: the recording interface on top of tracked command buffers.
//!
//! A [`CommandList`] records into a [`TrackedCommandBuffer`] taken from its
//! queue. Every command declares the states it needs through the list's
//! [`ResourceStateTracker`], commits barriers outside of render passes, marks
//! the resources it reads and writes for cross-queue synchronization and
//! keeps the objects it uses alive until the GPU is done with them.
//!
//! # Example
//!
//! ```ignore
//! let mut list = device.create_command_list(CommandListParameters::default())?;
//! list.open()?;
//! list.write_buffer(&buffer, &data, 0)?;
//! list.set_compute_state(ComputeState::new(pipeline).with_binding_set(set))?;
//! list.dispatch(64, 1, 1)?;
//! list.close()?;
//! device.execute_command_list(&mut list)?;
//! ```

use std::sync::Arc;

use crate::backend::{NativeCommand, PipelineBindPoint};
use crate::context::DeviceContext;
use crate::error::RhiError;
use crate::profile_function;
use crate::queue::{Queue, TrackedCommandBuffer};
use crate::resources::{
    BindingLayout, BindingResourceUse, BindingSet, Buffer, ComputePipeline, Framebuffer,
    GpuResource, GraphicsPipeline, Texture,
};
use crate::state_tracking::ResourceStateTracker;
use crate::types::{
    Color, IndexFormat, QueueId, ResourceId, ResourceStates, ScissorRect, TextureSubresourceSet,
    Viewport,
};

/// Largest inline update recorded by [`CommandList::write_buffer`].
pub const MAX_INLINE_UPDATE_SIZE: usize = 65536;

/// Parameters for creating a command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandListParameters {
    pub queue: QueueId,
    pub enable_uav_barriers: bool,
}

impl CommandListParameters {
    pub fn new(queue: QueueId) -> Self {
        Self {
            queue,
            enable_uav_barriers: true,
        }
    }

    pub fn with_uav_barriers(mut self, enabled: bool) -> Self {
        self.enable_uav_barriers = enabled;
        self
    }
}

impl Default for CommandListParameters {
    fn default() -> Self {
        Self::new(QueueId::Graphics)
    }
}

/// Pipeline and binding sets for dispatches.
#[derive(Debug, Clone)]
pub struct ComputeState {
    pub pipeline: Arc<ComputePipeline>,
    pub bindings: Vec<Arc<BindingSet>>,
}

impl ComputeState {
    pub fn new(pipeline: Arc<ComputePipeline>) -> Self {
        Self {
            pipeline,
            bindings: Vec::new(),
        }
    }

    pub fn with_binding_set(mut self, set: Arc<BindingSet>) -> Self {
        self.bindings.push(set);
        self
    }
}

/// A vertex buffer bound to an input slot.
#[derive(Debug, Clone)]
pub struct VertexBufferBinding {
    pub buffer: Arc<Buffer>,
    pub slot: u32,
    pub offset: u64,
}

/// The index buffer of a draw.
#[derive(Debug, Clone)]
pub struct IndexBufferBinding {
    pub buffer: Arc<Buffer>,
    pub format: IndexFormat,
    pub offset: u64,
}

/// Everything a draw needs: pipeline, target, bindings and geometry.
#[derive(Debug, Clone)]
pub struct GraphicsState {
    pub pipeline: Arc<GraphicsPipeline>,
    pub framebuffer: Arc<Framebuffer>,
    pub bindings: Vec<Arc<BindingSet>>,
    pub vertex_buffers: Vec<VertexBufferBinding>,
    pub index_buffer: Option<IndexBufferBinding>,
    /// Defaults to the whole framebuffer.
    pub viewport: Option<Viewport>,
    /// Defaults to the viewport.
    pub scissor: Option<ScissorRect>,
}

impl GraphicsState {
    pub fn new(pipeline: Arc<GraphicsPipeline>, framebuffer: Arc<Framebuffer>) -> Self {
        Self {
            pipeline,
            framebuffer,
            bindings: Vec::new(),
            vertex_buffers: Vec::new(),
            index_buffer: None,
            viewport: None,
            scissor: None,
        }
    }

    pub fn with_binding_set(mut self, set: Arc<BindingSet>) -> Self {
        self.bindings.push(set);
        self
    }

    pub fn with_vertex_buffer(mut self, slot: u32, buffer: Arc<Buffer>, offset: u64) -> Self {
        self.vertex_buffers.push(VertexBufferBinding {
            buffer,
            slot,
            offset,
        });
        self
    }

    pub fn with_index_buffer(mut self, buffer: Arc<Buffer>, format: IndexFormat) -> Self {
        self.index_buffer = Some(IndexBufferBinding {
            buffer,
            format,
            offset: 0,
        });
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    pub fn with_scissor(mut self, scissor: ScissorRect) -> Self {
        self.scissor = Some(scissor);
        self
    }
}

/// Parameters of a draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawArguments {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub start_index_location: u32,
    pub start_vertex_location: u32,
    pub start_instance_location: u32,
}

impl DrawArguments {
    /// One instance of `vertex_count` vertices (or indices).
    pub fn new(vertex_count: u32) -> Self {
        Self {
            vertex_count,
            instance_count: 1,
            ..Default::default()
        }
    }

    pub fn with_instance_count(mut self, count: u32) -> Self {
        self.instance_count = count;
        self
    }
}

enum Recording {
    Idle,
    Open(TrackedCommandBuffer),
    Closed(TrackedCommandBuffer),
}

/// Records GPU work for one queue.
///
/// Single-threaded: recording takes `&mut self`.
pub struct CommandList {
    context: Arc<DeviceContext>,
    queue: Arc<Queue>,
    parameters: CommandListParameters,
    recording: Recording,
    tracker: ResourceStateTracker,
    compute_state: Option<ComputeState>,
    graphics_state: Option<GraphicsState>,
}

impl CommandList {
    pub(crate) fn new(
        context: Arc<DeviceContext>,
        queue: Arc<Queue>,
        parameters: CommandListParameters,
    ) -> Self {
        Self {
            context,
            queue,
            parameters,
            recording: Recording::Idle,
            tracker: ResourceStateTracker::new(parameters.enable_uav_barriers),
            compute_state: None,
            graphics_state: None,
        }
    }

    pub fn parameters(&self) -> &CommandListParameters {
        &self.parameters
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn is_open(&self) -> bool {
        matches!(self.recording, Recording::Open(_))
    }

    /// Resource states as seen by this list.
    pub fn state_tracker(&self) -> &ResourceStateTracker {
        &self.tracker
    }

    /// Start recording into a fresh command buffer.
    pub fn open(&mut self) -> Result<(), RhiError> {
        match std::mem::replace(&mut self.recording, Recording::Idle) {
            Recording::Open(command_buffer) => {
                self.recording = Recording::Open(command_buffer);
                return Err(RhiError::InvalidParameter(
                    "command list is already open".to_string(),
                ));
            }
            Recording::Closed(command_buffer) => {
                log::warn!("Reopening a closed command list that was never executed");
                self.queue.release_cmd_buf(command_buffer);
            }
            Recording::Idle => {}
        }

        let command_buffer = self.queue.create_one_shot_cmd_buf()?;
        self.tracker.clear();
        self.tracker
            .set_enable_uav_barriers(self.parameters.enable_uav_barriers);
        self.compute_state = None;
        self.graphics_state = None;
        self.recording = Recording::Open(command_buffer);
        Ok(())
    }

    /// Finish recording. Restores kept initial states and flushes barriers.
    pub fn close(&mut self) -> Result<(), RhiError> {
        let Recording::Open(command_buffer) = &mut self.recording else {
            return Err(RhiError::InvalidParameter(
                "command list is not open".to_string(),
            ));
        };
        command_buffer.unbind_fb()?;
        self.tracker.keep_initial_states();
        commit(command_buffer, &mut self.tracker)?;

        self.compute_state = None;
        self.graphics_state = None;
        if let Recording::Open(command_buffer) =
            std::mem::replace(&mut self.recording, Recording::Idle)
        {
            self.recording = Recording::Closed(command_buffer);
        }
        Ok(())
    }

    /// Hand the closed command buffer to the device for submission.
    pub(crate) fn take_closed(&mut self) -> Result<TrackedCommandBuffer, RhiError> {
        match std::mem::replace(&mut self.recording, Recording::Idle) {
            Recording::Closed(command_buffer) => Ok(command_buffer),
            other => {
                self.recording = other;
                Err(RhiError::InvalidParameter(
                    "only closed command lists can be executed".to_string(),
                ))
            }
        }
    }

    pub fn set_enable_uav_barriers(&mut self, enabled: bool) {
        self.parameters.enable_uav_barriers = enabled;
        self.tracker.set_enable_uav_barriers(enabled);
    }

    /// Declare the state a buffer is in at this point of the list.
    pub fn begin_tracking_buffer_state(
        &mut self,
        buffer: &Arc<Buffer>,
        state: ResourceStates,
    ) -> Result<(), RhiError> {
        self.command_buffer()?;
        self.tracker.begin_tracking_buffer_state(buffer, state);
        Ok(())
    }

    /// Declare the state a texture is in at this point of the list.
    pub fn begin_tracking_texture_state(
        &mut self,
        texture: &Arc<Texture>,
        state: ResourceStates,
    ) -> Result<(), RhiError> {
        self.command_buffer()?;
        self.tracker.begin_tracking_texture_state(texture, state);
        Ok(())
    }

    /// Request a state transition. Takes effect at the next barrier commit.
    pub fn set_buffer_state(
        &mut self,
        buffer: &Arc<Buffer>,
        state: ResourceStates,
    ) -> Result<(), RhiError> {
        let command_buffer = self.command_buffer()?;
        command_buffer.reference(buffer.clone());
        self.tracker.require_buffer_state(buffer, state);
        Ok(())
    }

    /// Request a state transition. Takes effect at the next barrier commit.
    pub fn set_texture_state(
        &mut self,
        texture: &Arc<Texture>,
        state: ResourceStates,
    ) -> Result<(), RhiError> {
        let command_buffer = self.command_buffer()?;
        command_buffer.reference(texture.clone());
        self.tracker.require_texture_state(texture, state);
        Ok(())
    }

    /// Record all pending barriers now.
    pub fn commit_barriers(&mut self) -> Result<(), RhiError> {
        let Recording::Open(command_buffer) = &mut self.recording else {
            return Err(not_open());
        };
        commit(command_buffer, &mut self.tracker)
    }

    /// Write `data` into `buffer` at `offset` from the command stream.
    ///
    /// Offset and size must be multiples of 4. Large writes are split into
    /// several inline updates.
    pub fn write_buffer(
        &mut self,
        buffer: &Arc<Buffer>,
        data: &[u8],
        offset: u64,
    ) -> Result<(), RhiError> {
        profile_function!();

        if data.is_empty() {
            return Ok(());
        }
        if offset % 4 != 0 || data.len() % 4 != 0 {
            return Err(RhiError::InvalidParameter(format!(
                "buffer write at {offset} of {} bytes is not 4-byte aligned",
                data.len()
            )));
        }
        check_range(buffer, offset, data.len() as u64)?;

        let Recording::Open(command_buffer) = &mut self.recording else {
            return Err(not_open());
        };
        command_buffer.unbind_fb()?;
        self.graphics_state = None;
        self.tracker
            .require_buffer_state(buffer, ResourceStates::COPY_DEST);
        commit(command_buffer, &mut self.tracker)?;

        for (index, chunk) in data.chunks(MAX_INLINE_UPDATE_SIZE).enumerate() {
            command_buffer.record(NativeCommand::UpdateBuffer {
                buffer: buffer.native(),
                offset: offset + (index * MAX_INLINE_UPDATE_SIZE) as u64,
                data: chunk.to_vec(),
            })?;
        }
        command_buffer.mark_write(buffer.clone());
        Ok(())
    }

    /// Typed convenience wrapper around [`write_buffer`](Self::write_buffer).
    pub fn write_buffer_typed<T: bytemuck::Pod>(
        &mut self,
        buffer: &Arc<Buffer>,
        data: &[T],
        offset: u64,
    ) -> Result<(), RhiError> {
        self.write_buffer(buffer, bytemuck::cast_slice(data), offset)
    }

    /// Fill the whole buffer with a repeated 32-bit value.
    pub fn clear_buffer_uint(&mut self, buffer: &Arc<Buffer>, value: u32) -> Result<(), RhiError> {
        let size = buffer.size() & !3;
        if size == 0 {
            return Err(RhiError::InvalidParameter(
                "buffer is too small to clear with 32-bit values".to_string(),
            ));
        }
        let Recording::Open(command_buffer) = &mut self.recording else {
            return Err(not_open());
        };
        command_buffer.unbind_fb()?;
        self.graphics_state = None;
        self.tracker
            .require_buffer_state(buffer, ResourceStates::COPY_DEST);
        commit(command_buffer, &mut self.tracker)?;
        command_buffer.record(NativeCommand::FillBuffer {
            buffer: buffer.native(),
            offset: 0,
            size,
            value,
        })?;
        command_buffer.mark_write(buffer.clone());
        Ok(())
    }

    /// Copy `size` bytes between buffers.
    pub fn copy_buffer(
        &mut self,
        dst: &Arc<Buffer>,
        dst_offset: u64,
        src: &Arc<Buffer>,
        src_offset: u64,
        size: u64,
    ) -> Result<(), RhiError> {
        if size == 0 {
            return Ok(());
        }
        check_range(src, src_offset, size)?;
        check_range(dst, dst_offset, size)?;
        if src.id() == dst.id()
            && src_offset < dst_offset + size
            && dst_offset < src_offset + size
        {
            return Err(RhiError::InvalidParameter(
                "source and destination ranges overlap".to_string(),
            ));
        }

        let Recording::Open(command_buffer) = &mut self.recording else {
            return Err(not_open());
        };
        command_buffer.unbind_fb()?;
        self.graphics_state = None;
        self.tracker
            .require_buffer_state(src, ResourceStates::COPY_SOURCE);
        self.tracker.require_buffer_state(dst, ResourceStates::COPY_DEST);
        commit(command_buffer, &mut self.tracker)?;
        command_buffer.record(NativeCommand::CopyBuffer {
            src: src.native(),
            src_offset,
            dst: dst.native(),
            dst_offset,
            size,
        })?;
        command_buffer.mark_read(src.clone());
        command_buffer.mark_write(dst.clone());
        Ok(())
    }

    /// Clear colour subresources of a texture.
    pub fn clear_texture_float(
        &mut self,
        texture: &Arc<Texture>,
        subresources: TextureSubresourceSet,
        color: Color,
    ) -> Result<(), RhiError> {
        if texture.format().is_depth() {
            return Err(RhiError::InvalidParameter(format!(
                "texture {:?} has a depth format; use clear_depth_stencil_texture",
                texture.label()
            )));
        }
        let subresources = resolve_clear_range(texture, subresources)?;

        let Recording::Open(command_buffer) = &mut self.recording else {
            return Err(not_open());
        };
        command_buffer.unbind_fb()?;
        self.graphics_state = None;
        self.tracker
            .require_texture_state(texture, ResourceStates::COPY_DEST);
        commit(command_buffer, &mut self.tracker)?;
        command_buffer.record(NativeCommand::ClearColorImage {
            texture: texture.native(),
            color: color.to_array(),
            subresources,
        })?;
        command_buffer.mark_write(texture.clone());
        Ok(())
    }

    /// Clear depth and/or stencil of a depth texture.
    ///
    /// The stencil value is ignored for formats without stencil.
    pub fn clear_depth_stencil_texture(
        &mut self,
        texture: &Arc<Texture>,
        subresources: TextureSubresourceSet,
        depth: Option<f32>,
        stencil: Option<u8>,
    ) -> Result<(), RhiError> {
        let format = texture.format();
        if !format.is_depth() {
            return Err(RhiError::InvalidParameter(format!(
                "texture {:?} has no depth aspect",
                texture.label()
            )));
        }
        let stencil = stencil.filter(|_| format.has_stencil());
        if depth.is_none() && stencil.is_none() {
            return Ok(());
        }
        let subresources = resolve_clear_range(texture, subresources)?;

        let Recording::Open(command_buffer) = &mut self.recording else {
            return Err(not_open());
        };
        command_buffer.unbind_fb()?;
        self.graphics_state = None;
        self.tracker
            .require_texture_state(texture, ResourceStates::COPY_DEST);
        commit(command_buffer, &mut self.tracker)?;
        command_buffer.record(NativeCommand::ClearDepthStencilImage {
            texture: texture.native(),
            format,
            depth,
            stencil,
            subresources,
        })?;
        command_buffer.mark_write(texture.clone());
        Ok(())
    }

    /// Bind a compute pipeline and its binding sets.
    pub fn set_compute_state(&mut self, state: ComputeState) -> Result<(), RhiError> {
        profile_function!();

        check_bindings(&state.pipeline.descriptor().binding_layouts, &state.bindings)?;
        let Recording::Open(command_buffer) = &mut self.recording else {
            return Err(not_open());
        };
        command_buffer.unbind_fb()?;
        self.graphics_state = None;

        require_binding_states(command_buffer, &mut self.tracker, &state.bindings);
        commit(command_buffer, &mut self.tracker)?;

        let pipeline = &state.pipeline;
        command_buffer.bind_pso(PipelineBindPoint::Compute, pipeline.native(), pipeline.layout())?;
        let sets: Vec<_> = state.bindings.iter().map(|set| set.native()).collect();
        command_buffer.bind_descriptor_sets(PipelineBindPoint::Compute, pipeline.layout(), &sets)?;
        command_buffer.reference(pipeline.clone());

        self.compute_state = Some(state);
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), RhiError> {
        let Recording::Open(command_buffer) = &mut self.recording else {
            return Err(not_open());
        };
        if self.compute_state.is_none() {
            return Err(RhiError::InvalidParameter(
                "dispatch without a compute state".to_string(),
            ));
        }
        commit(command_buffer, &mut self.tracker)?;
        command_buffer.record(NativeCommand::Dispatch { x, y, z })
    }

    /// Bind a graphics pipeline, framebuffer, binding sets and geometry.
    ///
    /// Begins the framebuffer's render pass. Barriers needed by the new state
    /// are committed before the pass starts.
    pub fn set_graphics_state(&mut self, state: GraphicsState) -> Result<(), RhiError> {
        profile_function!();

        let pipeline = &state.pipeline;
        let framebuffer = &state.framebuffer;
        if !pipeline.framebuffer_info().is_compatible(framebuffer.info()) {
            return Err(RhiError::InvalidParameter(
                "graphics pipeline was created for a different framebuffer shape".to_string(),
            ));
        }
        check_bindings(&pipeline.descriptor().binding_layouts, &state.bindings)?;
        if let Some(index) = &state.index_buffer
            && index.offset >= index.buffer.size()
        {
            return Err(RhiError::InvalidParameter(
                "index buffer offset is past the end of the buffer".to_string(),
            ));
        }

        let Recording::Open(command_buffer) = &mut self.recording else {
            return Err(not_open());
        };
        self.compute_state = None;

        if command_buffer.current_framebuffer() != Some(framebuffer.native()) {
            command_buffer.unbind_fb()?;
        }
        require_binding_states(command_buffer, &mut self.tracker, &state.bindings);
        for binding in &state.vertex_buffers {
            self.tracker
                .require_buffer_state(&binding.buffer, ResourceStates::VERTEX_BUFFER);
            command_buffer.mark_read(binding.buffer.clone());
        }
        if let Some(index) = &state.index_buffer {
            self.tracker
                .require_buffer_state(&index.buffer, ResourceStates::INDEX_BUFFER);
            command_buffer.mark_read(index.buffer.clone());
        }
        for (texture, _, attachment_state) in framebuffer.attachment_states() {
            self.tracker.require_texture_state(texture, attachment_state);
            if attachment_state.is_write() {
                command_buffer.mark_write(texture.clone());
            } else {
                command_buffer.mark_read(texture.clone());
            }
        }
        if self.tracker.has_pending_barriers() {
            command_buffer.unbind_fb()?;
            commit(command_buffer, &mut self.tracker)?;
        }

        command_buffer.bind_fb(framebuffer.render_pass(), framebuffer.native(), framebuffer.extent())?;
        command_buffer.bind_pso(PipelineBindPoint::Graphics, pipeline.native(), pipeline.layout())?;
        let sets: Vec<_> = state.bindings.iter().map(|set| set.native()).collect();
        command_buffer.bind_descriptor_sets(PipelineBindPoint::Graphics, pipeline.layout(), &sets)?;

        let mut vertex_buffers = state.vertex_buffers.clone();
        vertex_buffers.sort_by_key(|binding| binding.slot);
        for binding in &vertex_buffers {
            command_buffer.record(NativeCommand::BindVertexBuffers {
                first_binding: binding.slot,
                buffers: vec![(binding.buffer.native(), binding.offset)],
            })?;
        }
        if let Some(index) = &state.index_buffer {
            command_buffer.record(NativeCommand::BindIndexBuffer {
                buffer: index.buffer.native(),
                offset: index.offset,
                format: index.format,
            })?;
        }

        let info = framebuffer.info();
        let viewport = state
            .viewport
            .unwrap_or_else(|| Viewport::from_dimensions(info.width, info.height));
        let scissor = state.scissor.unwrap_or_else(|| viewport.to_scissor());
        command_buffer.record(NativeCommand::SetViewport(viewport))?;
        command_buffer.record(NativeCommand::SetScissor(scissor))?;

        command_buffer.reference(pipeline.clone());
        command_buffer.reference(framebuffer.clone());
        self.graphics_state = Some(state);
        Ok(())
    }

    pub fn draw(&mut self, args: DrawArguments) -> Result<(), RhiError> {
        let command_buffer = self.draw_target()?;
        command_buffer.record(NativeCommand::Draw {
            vertex_count: args.vertex_count,
            instance_count: args.instance_count,
            first_vertex: args.start_vertex_location,
            first_instance: args.start_instance_location,
        })
    }

    pub fn draw_indexed(&mut self, args: DrawArguments) -> Result<(), RhiError> {
        if self
            .graphics_state
            .as_ref()
            .is_some_and(|state| state.index_buffer.is_none())
        {
            return Err(RhiError::InvalidParameter(
                "indexed draw without an index buffer".to_string(),
            ));
        }
        let command_buffer = self.draw_target()?;
        command_buffer.record(NativeCommand::DrawIndexed {
            index_count: args.vertex_count,
            instance_count: args.instance_count,
            first_index: args.start_index_location,
            vertex_offset: args.start_vertex_location as i32,
            first_instance: args.start_instance_location,
        })
    }

    fn draw_target(&mut self) -> Result<&mut TrackedCommandBuffer, RhiError> {
        let Recording::Open(command_buffer) = &mut self.recording else {
            return Err(not_open());
        };
        if self.graphics_state.is_none() {
            return Err(RhiError::InvalidParameter(
                "draw without a graphics state".to_string(),
            ));
        }
        if command_buffer.current_framebuffer().is_none() {
            return Err(RhiError::InvalidParameter(
                "render pass was closed; set the graphics state again".to_string(),
            ));
        }
        Ok(command_buffer)
    }

    fn command_buffer(&mut self) -> Result<&mut TrackedCommandBuffer, RhiError> {
        match &mut self.recording {
            Recording::Open(command_buffer) => Ok(command_buffer),
            _ => Err(not_open()),
        }
    }

    /// State this list last left a buffer or texture in.
    pub fn tracked_state(&self, id: ResourceId) -> Option<ResourceStates> {
        self.tracker
            .buffer_state(id)
            .or_else(|| self.tracker.texture_state(id))
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.recording, Recording::Idle) {
            Recording::Idle => {}
            Recording::Open(command_buffer) | Recording::Closed(command_buffer) => {
                log::debug!("Command list dropped before execution");
                self.queue.release_cmd_buf(command_buffer);
            }
        }
    }
}

impl std::fmt::Debug for CommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let recording = match self.recording {
            Recording::Idle => "idle",
            Recording::Open(_) => "open",
            Recording::Closed(_) => "closed",
        };
        f.debug_struct("CommandList")
            .field("queue", &self.parameters.queue)
            .field("recording", &recording)
            .field("device", &self.context.info().name)
            .finish()
    }
}

fn not_open() -> RhiError {
    RhiError::InvalidParameter("command list is not open".to_string())
}

fn commit(
    command_buffer: &mut TrackedCommandBuffer,
    tracker: &mut ResourceStateTracker,
) -> Result<(), RhiError> {
    if let Some(barrier) = tracker.commit_barriers() {
        command_buffer.unbind_fb()?;
        command_buffer.record(barrier)?;
    }
    Ok(())
}

fn check_range(buffer: &Buffer, offset: u64, size: u64) -> Result<(), RhiError> {
    match offset.checked_add(size) {
        Some(end) if end <= buffer.size() => Ok(()),
        _ => Err(RhiError::InvalidParameter(format!(
            "range {offset}+{size} is outside buffer {:?} of {} bytes",
            buffer.label(),
            buffer.size()
        ))),
    }
}

fn resolve_clear_range(
    texture: &Texture,
    subresources: TextureSubresourceSet,
) -> Result<TextureSubresourceSet, RhiError> {
    let resolved = subresources.resolve(texture.descriptor(), false);
    if resolved.num_mip_levels == 0 || resolved.num_array_slices == 0 {
        return Err(RhiError::InvalidParameter(format!(
            "clear range {subresources:?} is outside texture {:?}",
            texture.label()
        )));
    }
    Ok(resolved)
}

fn check_bindings(
    layouts: &[Arc<BindingLayout>],
    bindings: &[Arc<BindingSet>],
) -> Result<(), RhiError> {
    if layouts.len() != bindings.len() {
        return Err(RhiError::InvalidParameter(format!(
            "pipeline expects {} binding sets, got {}",
            layouts.len(),
            bindings.len()
        )));
    }
    for (index, (layout, set)) in layouts.iter().zip(bindings).enumerate() {
        if !Arc::ptr_eq(layout, set.layout()) {
            return Err(RhiError::InvalidParameter(format!(
                "binding set {index} was created for a different layout"
            )));
        }
    }
    Ok(())
}

fn require_binding_states(
    command_buffer: &mut TrackedCommandBuffer,
    tracker: &mut ResourceStateTracker,
    bindings: &[Arc<BindingSet>],
) {
    for set in bindings {
        for resource_use in set.resource_uses() {
            let resource: Arc<dyn GpuResource> = match resource_use {
                BindingResourceUse::Buffer { buffer, state } => {
                    tracker.require_buffer_state(buffer, *state);
                    buffer.clone()
                }
                BindingResourceUse::Texture { texture, state, .. } => {
                    tracker.require_texture_state(texture, *state);
                    texture.clone()
                }
            };
            if resource_use.is_write() {
                command_buffer.mark_write(resource);
            } else {
                command_buffer.mark_read(resource);
            }
        }
        command_buffer.reference(set.clone());
    }
}
