//! Command buffers that remember what they touch.

use std::any::Any;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::backend::{
    CommandBufferHandle, CommandPoolHandle, DescriptorSetHandle, FramebufferHandle, NativeCommand,
    NativeObject, PipelineBindPoint, PipelineHandle, PipelineLayoutHandle, RenderPassHandle,
};
use crate::context::DeviceContext;
use crate::error::RhiError;
use crate::pool::{ObjectPool, Poolable};
use crate::resources::GpuResource;
use crate::types::{Extent3d, MAX_BINDING_LAYOUTS, QueueId, ResourceId};

/// Pool of command buffers owned by one queue.
pub type CommandBufferPool = Mutex<ObjectPool<CommandPoolContext, TrackedCommandBuffer>>;

/// Per-queue native command pool shared by the queue's command buffers.
pub struct CommandPoolContext {
    device: Arc<DeviceContext>,
    queue: QueueId,
    pool: CommandPoolHandle,
}

impl CommandPoolContext {
    pub fn new(device: Arc<DeviceContext>, queue: QueueId) -> Result<Self, RhiError> {
        let pool = device.backend().create_command_pool(queue)?;
        log::debug!("Created command pool for {queue} queue");
        Ok(Self {
            device,
            queue,
            pool,
        })
    }

    pub fn device(&self) -> &Arc<DeviceContext> {
        &self.device
    }

    pub fn queue(&self) -> QueueId {
        self.queue
    }
}

impl Drop for CommandPoolContext {
    fn drop(&mut self) {
        self.device.backend().destroy_command_pool(self.pool);
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct BindState {
    pipeline: Option<PipelineHandle>,
    layout: Option<PipelineLayoutHandle>,
    sets: [Option<DescriptorSetHandle>; MAX_BINDING_LAYOUTS],
}

fn bind_index(bind_point: PipelineBindPoint) -> usize {
    match bind_point {
        PipelineBindPoint::Graphics => 0,
        PipelineBindPoint::Compute => 1,
    }
}

/// A native command buffer plus everything its execution depends on.
///
/// Written and read resources are kept in insertion order and get their
/// synchronization slots updated when the buffer is submitted. Every object
/// passed to [`reference`](Self::reference) stays alive until the queue
/// retires the buffer.
pub struct TrackedCommandBuffer {
    device: Arc<DeviceContext>,
    target_queue: QueueId,
    pool: CommandPoolHandle,
    command_buffer: CommandBufferHandle,
    write_list: IndexMap<ResourceId, Arc<dyn GpuResource>>,
    read_list: IndexMap<ResourceId, Arc<dyn GpuResource>>,
    bind_state: [BindState; 2],
    framebuffer: Option<FramebufferHandle>,
    referenced: Vec<Arc<dyn Any + Send + Sync>>,
    recording: bool,
    origin: Weak<CommandBufferPool>,
}

impl TrackedCommandBuffer {
    pub fn target_queue(&self) -> QueueId {
        self.target_queue
    }

    /// Native command buffer.
    pub fn native(&self) -> CommandBufferHandle {
        self.command_buffer
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Start recording.
    pub fn begin(&mut self) -> Result<(), RhiError> {
        self.device.backend().begin_command_buffer(self.command_buffer)?;
        self.recording = true;
        Ok(())
    }

    /// Finish recording. Closes an open render pass first.
    pub fn end(&mut self) -> Result<(), RhiError> {
        if !self.recording {
            return Ok(());
        }
        self.unbind_fb()?;
        self.device.backend().end_command_buffer(self.command_buffer)?;
        self.recording = false;
        Ok(())
    }

    /// Record a native command.
    pub fn record(&mut self, command: NativeCommand) -> Result<(), RhiError> {
        if !self.recording {
            return Err(RhiError::InvalidParameter(
                "command buffer is not recording".to_string(),
            ));
        }
        self.device.backend().record(self.command_buffer, command)
    }

    /// Note that the GPU reads `resource`.
    pub fn mark_read(&mut self, resource: Arc<dyn GpuResource>) {
        let id = resource.memory_resource().id();
        self.read_list.entry(id).or_insert(resource);
    }

    /// Note that the GPU writes `resource`.
    pub fn mark_write(&mut self, resource: Arc<dyn GpuResource>) {
        let id = resource.memory_resource().id();
        self.write_list.entry(id).or_insert(resource);
    }

    /// Whether `id` is in the read or write list.
    pub fn is_resource_marked(&self, id: ResourceId) -> bool {
        self.read_list.contains_key(&id) || self.write_list.contains_key(&id)
    }

    pub fn write_list(&self) -> impl Iterator<Item = &Arc<dyn GpuResource>> {
        self.write_list.values()
    }

    pub fn read_list(&self) -> impl Iterator<Item = &Arc<dyn GpuResource>> {
        self.read_list.values()
    }

    pub fn has_resources(&self) -> bool {
        !self.read_list.is_empty() || !self.write_list.is_empty()
    }

    /// Keep `object` alive until the buffer is retired.
    pub fn reference(&mut self, object: Arc<dyn Any + Send + Sync>) {
        self.referenced.push(object);
    }

    pub fn referenced_count(&self) -> usize {
        self.referenced.len()
    }

    /// Bind a pipeline unless it is already bound.
    ///
    /// A different layout invalidates the descriptor sets bound for the bind
    /// point. Returns whether a native bind was recorded.
    pub fn bind_pso(
        &mut self,
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
        layout: PipelineLayoutHandle,
    ) -> Result<bool, RhiError> {
        let state = self.bind_state[bind_index(bind_point)];
        if state.layout != Some(layout) {
            self.bind_state[bind_index(bind_point)].sets = Default::default();
            self.bind_state[bind_index(bind_point)].layout = Some(layout);
        }
        if state.pipeline == Some(pipeline) {
            return Ok(false);
        }
        self.record(NativeCommand::BindPipeline {
            bind_point,
            pipeline,
        })?;
        self.bind_state[bind_index(bind_point)].pipeline = Some(pipeline);
        Ok(true)
    }

    /// Bind descriptor sets starting at set zero unless they are already bound.
    pub fn bind_descriptor_sets(
        &mut self,
        bind_point: PipelineBindPoint,
        layout: PipelineLayoutHandle,
        sets: &[DescriptorSetHandle],
    ) -> Result<bool, RhiError> {
        if sets.len() > MAX_BINDING_LAYOUTS {
            return Err(RhiError::InvalidParameter(format!(
                "{} descriptor sets exceed the limit of {MAX_BINDING_LAYOUTS}",
                sets.len()
            )));
        }
        let state = &self.bind_state[bind_index(bind_point)];
        let current = state.layout == Some(layout)
            && sets
                .iter()
                .zip(state.sets.iter())
                .all(|(wanted, bound)| Some(*wanted) == *bound);
        if current || sets.is_empty() {
            return Ok(false);
        }

        self.record(NativeCommand::BindDescriptorSets {
            bind_point,
            layout,
            first_set: 0,
            sets: sets.to_vec(),
        })?;
        let state = &mut self.bind_state[bind_index(bind_point)];
        state.layout = Some(layout);
        state.sets = std::array::from_fn(|slot| sets.get(slot).copied());
        Ok(true)
    }

    /// Begin a render pass on `framebuffer` unless it is already active.
    pub fn bind_fb(
        &mut self,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        extent: Extent3d,
    ) -> Result<bool, RhiError> {
        if self.framebuffer == Some(framebuffer) {
            return Ok(false);
        }
        self.unbind_fb()?;
        self.record(NativeCommand::BeginRenderPass {
            render_pass,
            framebuffer,
            extent,
        })?;
        self.framebuffer = Some(framebuffer);
        Ok(true)
    }

    /// End the active render pass, if any.
    pub fn unbind_fb(&mut self) -> Result<bool, RhiError> {
        if self.framebuffer.is_none() {
            return Ok(false);
        }
        self.record(NativeCommand::EndRenderPass)?;
        self.framebuffer = None;
        Ok(true)
    }

    pub fn current_framebuffer(&self) -> Option<FramebufferHandle> {
        self.framebuffer
    }

    pub fn current_pipeline(&self, bind_point: PipelineBindPoint) -> Option<PipelineHandle> {
        self.bind_state[bind_index(bind_point)].pipeline
    }

    /// Pool the buffer was checked out of.
    pub fn origin(&self) -> &Weak<CommandBufferPool> {
        &self.origin
    }

    pub(crate) fn set_origin(&mut self, origin: Weak<CommandBufferPool>) {
        self.origin = origin;
    }

    /// Free the native command buffer without returning it to its pool.
    ///
    /// Used when the pool it came from no longer exists.
    pub fn discard(mut self) {
        self.clear_tracking();
        self.device
            .backend()
            .free_command_buffer(self.pool, self.command_buffer);
    }

    fn clear_tracking(&mut self) {
        self.write_list.clear();
        self.read_list.clear();
        self.referenced.clear();
        self.bind_state = Default::default();
        self.framebuffer = None;
        self.recording = false;
    }
}

impl Poolable<CommandPoolContext> for TrackedCommandBuffer {
    fn create(context: &CommandPoolContext) -> Result<Self, RhiError> {
        let command_buffer = context
            .device
            .backend()
            .allocate_command_buffer(context.pool)?;
        context.device.name_object(
            NativeObject::CommandBuffer(command_buffer),
            &format!("{} command buffer", context.queue),
        );
        Ok(Self {
            device: context.device.clone(),
            target_queue: context.queue,
            pool: context.pool,
            command_buffer,
            write_list: IndexMap::new(),
            read_list: IndexMap::new(),
            bind_state: Default::default(),
            framebuffer: None,
            referenced: Vec::new(),
            recording: false,
            origin: Weak::new(),
        })
    }

    fn reset(&mut self, context: &CommandPoolContext) -> Result<(), RhiError> {
        self.clear_tracking();
        context
            .device
            .backend()
            .reset_command_buffer(self.command_buffer)
    }

    fn destroy(&mut self, context: &CommandPoolContext) {
        self.clear_tracking();
        context
            .device
            .backend()
            .free_command_buffer(context.pool, self.command_buffer);
    }
}

impl std::fmt::Debug for TrackedCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedCommandBuffer")
            .field("target_queue", &self.target_queue)
            .field("command_buffer", &self.command_buffer)
            .field("writes", &self.write_list.len())
            .field("reads", &self.read_list.len())
            .field("referenced", &self.referenced.len())
            .finish()
    }
}
