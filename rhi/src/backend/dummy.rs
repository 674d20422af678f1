//! Dummy GPU backend for testing and development.
//!
//! The dummy backend simulates a GPU on the CPU. Memory allocations are byte
//! vectors, command buffers store the [`NativeCommand`]s recorded into them
//! and submissions wait in per-queue FIFOs until the simulated GPU completes
//! them. Completion happens:
//!
//! - explicitly, through [`DummyBackend::complete_next`],
//!   [`DummyBackend::complete_queue`], [`DummyBackend::complete_all`] or
//!   [`DummyBackend::signal_fence`];
//! - implicitly, when the CPU waits on a fence or drains a queue;
//! - immediately on submit when auto-complete is enabled.
//!
//! Completing a submission first completes everything queued before it on the
//! same queue and every submission on other queues that signals a semaphore it
//! waits on. Buffer updates, fills and copies take effect at completion.
//!
//! Every submission is also kept in a log so tests can inspect wait and
//! signal semaphores, stage masks and the recorded commands.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::command::*;
use super::handles::*;
use super::GpuBackend;
use crate::config::SyncTimeout;
use crate::error::RhiError;
use crate::types::{
    BufferDescriptor, Extent3d, MemoryProperties, MemoryPropertyFlags, MemoryRequirements,
    PipelineStages, QueueId, SamplerDescriptor, ShaderStages, TextureDescriptor,
};

/// One submission as seen by the simulated GPU.
#[derive(Debug, Clone, PartialEq)]
pub struct DummySubmission {
    /// Global submission order across all queues.
    pub serial: u64,
    pub queue: QueueId,
    pub waits: Vec<(SemaphoreHandle, PipelineStages)>,
    pub signals: Vec<SemaphoreHandle>,
    pub fence: Option<FenceHandle>,
    pub commands: Vec<NativeCommand>,
}

#[derive(Debug)]
struct DummyMemory {
    memory_type_index: u32,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct DummyBuffer {
    size: u64,
    binding: Option<(u64, u64)>,
}

#[derive(Debug)]
struct DummyTexture {
    size: u64,
    bound: bool,
}

#[derive(Debug)]
struct DummyCommandBuffer {
    pool: u64,
    recording: bool,
    commands: Vec<NativeCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ObjectKind {
    BufferView,
    TextureView,
    Sampler,
    ShaderModule,
    DescriptorSetLayout,
    DescriptorSet,
    PipelineLayout,
    Pipeline,
    RenderPass,
    Framebuffer,
}

#[derive(Debug, Default)]
struct DummyState {
    next_id: u64,
    next_serial: u64,
    /// Semaphore id -> signaled.
    semaphores: HashMap<u64, bool>,
    /// Fence id -> signaled.
    fences: HashMap<u64, bool>,
    memory: HashMap<u64, DummyMemory>,
    buffers: HashMap<u64, DummyBuffer>,
    textures: HashMap<u64, DummyTexture>,
    objects: HashMap<u64, ObjectKind>,
    command_pools: HashMap<u64, QueueId>,
    command_buffers: HashMap<u64, DummyCommandBuffer>,
    pending: [VecDeque<DummySubmission>; 3],
    log: Vec<DummySubmission>,
    names: HashMap<NativeObject, String>,
}

impl DummyState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn semaphore_has_pending_signal(&self, semaphore: u64) -> bool {
        self.pending.iter().flatten().any(|submission| {
            submission
                .signals
                .iter()
                .any(|signal| signal.as_dummy() == Some(semaphore))
        })
    }

    /// Complete every submission on `queue` up to and including `serial`.
    fn complete_through(&mut self, queue: QueueId, serial: u64) -> Result<(), RhiError> {
        while self.pending[queue.index()]
            .front()
            .is_some_and(|front| front.serial <= serial)
        {
            if let Some(submission) = self.pending[queue.index()].pop_front() {
                self.execute(submission)?;
            }
        }
        Ok(())
    }

    fn execute(&mut self, submission: DummySubmission) -> Result<(), RhiError> {
        for (semaphore, _) in &submission.waits {
            let id = dummy_id(semaphore.as_dummy())?;
            if !self.semaphores.get(&id).copied().unwrap_or(false) {
                let signaler = self.pending.iter().flatten().find_map(|pending| {
                    pending
                        .signals
                        .iter()
                        .any(|signal| signal.as_dummy() == Some(id))
                        .then_some((pending.queue, pending.serial))
                });
                match signaler {
                    Some((queue, serial)) => self.complete_through(queue, serial)?,
                    None => {
                        return Err(RhiError::Internal(format!(
                            "submission {} waits on semaphore {} that is never signaled",
                            submission.serial, id
                        )));
                    }
                }
            }
            if let Some(signaled) = self.semaphores.get_mut(&id) {
                *signaled = false;
            }
        }

        for command in &submission.commands {
            self.run_command(command)?;
        }

        for semaphore in &submission.signals {
            if let Some(signaled) = semaphore
                .as_dummy()
                .and_then(|id| self.semaphores.get_mut(&id))
            {
                *signaled = true;
            }
        }
        if let Some(signaled) = submission
            .fence
            .and_then(|fence| fence.as_dummy())
            .and_then(|id| self.fences.get_mut(&id))
        {
            *signaled = true;
        }

        log::trace!(
            "DummyBackend: completed submission {} on {} queue",
            submission.serial,
            submission.queue
        );
        Ok(())
    }

    fn run_command(&mut self, command: &NativeCommand) -> Result<(), RhiError> {
        match command {
            NativeCommand::UpdateBuffer {
                buffer,
                offset,
                data,
            } => self.write_buffer(*buffer, *offset, data),
            NativeCommand::FillBuffer {
                buffer,
                offset,
                size,
                value,
            } => {
                let bytes: Vec<u8> = value
                    .to_le_bytes()
                    .iter()
                    .copied()
                    .cycle()
                    .take(*size as usize)
                    .collect();
                self.write_buffer(*buffer, *offset, &bytes)
            }
            NativeCommand::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let mut bytes = vec![0u8; *size as usize];
                self.read_buffer(*src, *src_offset, &mut bytes)?;
                self.write_buffer(*dst, *dst_offset, &bytes)
            }
            _ => Ok(()),
        }
    }

    fn buffer_memory(&mut self, buffer: BufferHandle) -> Result<(&mut DummyMemory, u64), RhiError> {
        let id = dummy_id(buffer.as_dummy())?;
        let (memory_id, base) = self
            .buffers
            .get(&id)
            .and_then(|buffer| buffer.binding)
            .ok_or_else(|| {
                RhiError::InvalidParameter(format!("buffer {id} has no memory bound"))
            })?;
        let memory = self
            .memory
            .get_mut(&memory_id)
            .ok_or_else(|| RhiError::Internal(format!("memory {memory_id} was freed")))?;
        Ok((memory, base))
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), RhiError> {
        let (memory, base) = self.buffer_memory(buffer)?;
        let start = (base + offset) as usize;
        let end = start + data.len();
        let target = memory.bytes.get_mut(start..end).ok_or_else(|| {
            RhiError::InvalidParameter(format!("buffer write {start}..{end} out of bounds"))
        })?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), RhiError> {
        let (memory, base) = self.buffer_memory(buffer)?;
        let start = (base + offset) as usize;
        let end = start + out.len();
        let source = memory.bytes.get(start..end).ok_or_else(|| {
            RhiError::InvalidParameter(format!("buffer read {start}..{end} out of bounds"))
        })?;
        out.copy_from_slice(source);
        Ok(())
    }

    fn create_object(&mut self, kind: ObjectKind) -> u64 {
        let id = self.allocate_id();
        self.objects.insert(id, kind);
        id
    }

    fn destroy_object(&mut self, id: Option<u64>, kind: ObjectKind) {
        match id.and_then(|id| self.objects.remove(&id)) {
            Some(found) if found == kind => {}
            Some(found) => log::error!("DummyBackend: destroyed {found:?} as {kind:?}"),
            None => log::error!("DummyBackend: destroying unknown {kind:?} {id:?}"),
        }
    }
}

fn dummy_id(id: Option<u64>) -> Result<u64, RhiError> {
    id.ok_or_else(|| RhiError::Internal("non-dummy handle passed to the dummy backend".into()))
}

/// CPU-simulated GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    info: DeviceInfo,
    buffer_memory_type_bits: u32,
    texture_memory_type_bits: u32,
    auto_complete: AtomicBool,
    hung: AtomicBool,
    device_lost: AtomicBool,
    state: Mutex<DummyState>,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Create a dummy backend with graphics, compute and transfer queues and
    /// a discrete-GPU memory layout.
    pub fn new() -> Self {
        let memory_properties = MemoryProperties::discrete_gpu();
        let all_types = (1u32 << memory_properties.memory_types.len()) - 1;
        Self {
            info: DeviceInfo {
                name: "Dummy Device".to_string(),
                memory_properties,
                queues: [true; 3],
                extensions: DeviceExtensions::DEBUG_UTILS,
                limits: DeviceLimits::default(),
            },
            buffer_memory_type_bits: all_types,
            texture_memory_type_bits: all_types,
            auto_complete: AtomicBool::new(false),
            hung: AtomicBool::new(false),
            device_lost: AtomicBool::new(false),
            state: Mutex::new(DummyState::default()),
        }
    }

    /// Replace the simulated memory types and heaps.
    pub fn with_memory_properties(mut self, properties: MemoryProperties) -> Self {
        let all_types = (1u32 << properties.memory_types.len()) - 1;
        self.buffer_memory_type_bits = all_types;
        self.texture_memory_type_bits = all_types;
        self.info.memory_properties = properties;
        self
    }

    /// Memory type mask reported for every buffer.
    pub fn with_buffer_memory_type_bits(mut self, bits: u32) -> Self {
        self.buffer_memory_type_bits = bits;
        self
    }

    /// Memory type mask reported for every texture.
    pub fn with_texture_memory_type_bits(mut self, bits: u32) -> Self {
        self.texture_memory_type_bits = bits;
        self
    }

    /// Expose or hide a queue.
    pub fn with_queue(mut self, queue: QueueId, present: bool) -> Self {
        self.info.queues[queue.index()] = present;
        self
    }

    /// Complete every submission as soon as it is submitted.
    pub fn with_auto_complete(self, enabled: bool) -> Self {
        self.auto_complete.store(enabled, Ordering::Relaxed);
        self
    }

    /// Simulate a lost device: every submission fails with `DeviceLost`.
    pub fn set_device_lost(&self, lost: bool) {
        self.device_lost.store(lost, Ordering::Relaxed);
    }

    /// Simulate a hung GPU: nothing completes and bounded waits time out.
    pub fn set_hung(&self, hung: bool) {
        self.hung.store(hung, Ordering::Relaxed);
    }

    /// Complete the oldest pending submission on `queue`.
    ///
    /// Returns `false` when nothing was pending.
    pub fn complete_next(&self, queue: QueueId) -> Result<bool, RhiError> {
        let mut state = self.state.lock();
        let Some(serial) = state.pending[queue.index()].front().map(|s| s.serial) else {
            return Ok(false);
        };
        state.complete_through(queue, serial)?;
        Ok(true)
    }

    /// Complete every pending submission on `queue`.
    pub fn complete_queue(&self, queue: QueueId) -> Result<(), RhiError> {
        let mut state = self.state.lock();
        if let Some(serial) = state.pending[queue.index()].back().map(|s| s.serial) {
            state.complete_through(queue, serial)?;
        }
        Ok(())
    }

    /// Complete every pending submission on every queue.
    pub fn complete_all(&self) -> Result<(), RhiError> {
        for queue in QueueId::ALL {
            self.complete_queue(queue)?;
        }
        Ok(())
    }

    /// Signal `fence` by completing the submission that carries it.
    ///
    /// Earlier submissions on the same queue complete first.
    pub fn signal_fence(&self, fence: FenceHandle) -> Result<(), RhiError> {
        let mut state = self.state.lock();
        let id = dummy_id(fence.as_dummy())?;
        let carrier = state.pending.iter().flatten().find_map(|submission| {
            (submission.fence == Some(fence)).then_some((submission.queue, submission.serial))
        });
        match carrier {
            Some((queue, serial)) => state.complete_through(queue, serial),
            None => {
                let signaled = state.fences.get_mut(&id).ok_or_else(|| {
                    RhiError::InvalidParameter(format!("unknown fence {id}"))
                })?;
                *signaled = true;
                Ok(())
            }
        }
    }

    /// Every submission made so far, in submission order.
    pub fn submissions(&self) -> Vec<DummySubmission> {
        self.state.lock().log.clone()
    }

    /// Number of submissions waiting on `queue`.
    pub fn pending_count(&self, queue: QueueId) -> usize {
        self.state.lock().pending[queue.index()].len()
    }

    /// Number of live native semaphores.
    pub fn live_semaphores(&self) -> usize {
        self.state.lock().semaphores.len()
    }

    /// Number of live native fences.
    pub fn live_fences(&self) -> usize {
        self.state.lock().fences.len()
    }

    /// Number of live memory allocations.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().memory.len()
    }

    /// Number of live buffers and textures.
    pub fn live_resources(&self) -> usize {
        let state = self.state.lock();
        state.buffers.len() + state.textures.len()
    }

    /// Number of live views, samplers, layouts, pipelines and framebuffers.
    pub fn live_objects(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Number of live command buffers.
    pub fn live_command_buffers(&self) -> usize {
        self.state.lock().command_buffers.len()
    }

    /// Debug name given to an object.
    pub fn object_name(&self, object: NativeObject) -> Option<String> {
        self.state.lock().names.get(&object).cloned()
    }

    fn memory_type_flags(&self, index: u32) -> Option<MemoryPropertyFlags> {
        self.info
            .memory_properties
            .memory_types
            .get(index as usize)
            .map(|memory_type| memory_type.property_flags)
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_semaphore(&self) -> Result<SemaphoreHandle, RhiError> {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.semaphores.insert(id, false);
        Ok(SemaphoreHandle::Dummy(id))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        let mut state = self.state.lock();
        if let Some(id) = semaphore.as_dummy() {
            if state.semaphore_has_pending_signal(id) {
                log::error!("DummyBackend: destroying semaphore {id} with a pending signal");
            }
            if state.semaphores.remove(&id).is_none() {
                log::error!("DummyBackend: destroying unknown semaphore {id}");
            }
        }
    }

    fn create_fence(&self) -> Result<FenceHandle, RhiError> {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.fences.insert(id, false);
        Ok(FenceHandle::Dummy(id))
    }

    fn reset_fence(&self, fence: FenceHandle) -> Result<(), RhiError> {
        let mut state = self.state.lock();
        let id = dummy_id(fence.as_dummy())?;
        let signaled = state
            .fences
            .get_mut(&id)
            .ok_or_else(|| RhiError::InvalidParameter(format!("unknown fence {id}")))?;
        *signaled = false;
        Ok(())
    }

    fn fence_status(&self, fence: FenceHandle) -> Result<bool, RhiError> {
        let state = self.state.lock();
        let id = dummy_id(fence.as_dummy())?;
        state
            .fences
            .get(&id)
            .copied()
            .ok_or_else(|| RhiError::InvalidParameter(format!("unknown fence {id}")))
    }

    fn wait_fence(&self, fence: FenceHandle, timeout: SyncTimeout) -> Result<bool, RhiError> {
        if self.fence_status(fence)? {
            return Ok(true);
        }
        if self.hung.load(Ordering::Relaxed) {
            log::warn!("DummyBackend: GPU hung, wait on {fence:?} expires ({timeout:?})");
            return Ok(false);
        }

        let mut state = self.state.lock();
        let carrier = state.pending.iter().flatten().find_map(|submission| {
            (submission.fence == Some(fence)).then_some((submission.queue, submission.serial))
        });
        match carrier {
            Some((queue, serial)) => {
                state.complete_through(queue, serial)?;
                Ok(true)
            }
            None => {
                log::warn!("DummyBackend: waiting on {fence:?} that was never submitted");
                match timeout {
                    SyncTimeout::Infinite => Err(RhiError::Internal(
                        "infinite wait on a fence that will never signal".to_string(),
                    )),
                    SyncTimeout::Bounded(_) => Ok(false),
                }
            }
        }
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        if let Some(id) = fence.as_dummy()
            && state.fences.remove(&id).is_none()
        {
            log::error!("DummyBackend: destroying unknown fence {id}");
        }
    }

    fn allocate_memory(
        &self,
        size: u64,
        memory_type_index: u32,
    ) -> Result<MemoryHandle, RhiError> {
        if self.memory_type_flags(memory_type_index).is_none() {
            return Err(RhiError::InvalidParameter(format!(
                "memory type {memory_type_index} does not exist"
            )));
        }
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.memory.insert(
            id,
            DummyMemory {
                memory_type_index,
                bytes: vec![0; size as usize],
            },
        );
        log::trace!("DummyBackend: allocated {size} bytes of memory type {memory_type_index}");
        Ok(MemoryHandle::Dummy(id))
    }

    fn free_memory(&self, memory: MemoryHandle) {
        let mut state = self.state.lock();
        if let Some(id) = memory.as_dummy()
            && state.memory.remove(&id).is_none()
        {
            log::error!("DummyBackend: freeing unknown memory {id}");
        }
    }

    fn write_memory(&self, memory: MemoryHandle, offset: u64, data: &[u8]) -> Result<(), RhiError> {
        let id = dummy_id(memory.as_dummy())?;
        let mut state = self.state.lock();
        let allocation = state
            .memory
            .get_mut(&id)
            .ok_or_else(|| RhiError::InvalidParameter(format!("unknown memory {id}")))?;
        let host_visible = self
            .memory_type_flags(allocation.memory_type_index)
            .is_some_and(|flags| flags.contains(MemoryPropertyFlags::HOST_VISIBLE));
        if !host_visible {
            return Err(RhiError::InvalidParameter(
                "memory is not host visible".to_string(),
            ));
        }
        let start = offset as usize;
        let target = allocation
            .bytes
            .get_mut(start..start + data.len())
            .ok_or_else(|| RhiError::InvalidParameter("memory write out of bounds".into()))?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn read_memory(&self, memory: MemoryHandle, offset: u64, out: &mut [u8]) -> Result<(), RhiError> {
        let id = dummy_id(memory.as_dummy())?;
        let state = self.state.lock();
        let allocation = state
            .memory
            .get(&id)
            .ok_or_else(|| RhiError::InvalidParameter(format!("unknown memory {id}")))?;
        let host_visible = self
            .memory_type_flags(allocation.memory_type_index)
            .is_some_and(|flags| flags.contains(MemoryPropertyFlags::HOST_VISIBLE));
        if !host_visible {
            return Err(RhiError::InvalidParameter(
                "memory is not host visible".to_string(),
            ));
        }
        let start = offset as usize;
        let source = allocation
            .bytes
            .get(start..start + out.len())
            .ok_or_else(|| RhiError::InvalidParameter("memory read out of bounds".into()))?;
        out.copy_from_slice(source);
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<BufferHandle, RhiError> {
        if desc.size == 0 {
            return Err(RhiError::InvalidParameter("buffer size is zero".to_string()));
        }
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.buffers.insert(
            id,
            DummyBuffer {
                size: desc.size,
                binding: None,
            },
        );
        Ok(BufferHandle::Dummy(id))
    }

    fn buffer_memory_requirements(&self, buffer: BufferHandle) -> MemoryRequirements {
        let state = self.state.lock();
        let size = buffer
            .as_dummy()
            .and_then(|id| state.buffers.get(&id))
            .map_or(0, |buffer| buffer.size);
        MemoryRequirements {
            size: size.next_multiple_of(4),
            alignment: 256,
            memory_type_bits: self.buffer_memory_type_bits,
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> Result<(), RhiError> {
        let buffer_id = dummy_id(buffer.as_dummy())?;
        let memory_id = dummy_id(memory.as_dummy())?;
        let mut state = self.state.lock();
        let available = state
            .memory
            .get(&memory_id)
            .map(|memory| memory.bytes.len() as u64)
            .ok_or_else(|| RhiError::InvalidParameter(format!("unknown memory {memory_id}")))?;
        let entry = state
            .buffers
            .get_mut(&buffer_id)
            .ok_or_else(|| RhiError::InvalidParameter(format!("unknown buffer {buffer_id}")))?;
        if entry.binding.is_some() {
            return Err(RhiError::InvalidParameter(format!(
                "buffer {buffer_id} already has memory bound"
            )));
        }
        if offset + entry.size > available {
            return Err(RhiError::InvalidParameter(
                "memory too small for buffer".to_string(),
            ));
        }
        entry.binding = Some((memory_id, offset));
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        if let Some(id) = buffer.as_dummy()
            && state.buffers.remove(&id).is_none()
        {
            log::error!("DummyBackend: destroying unknown buffer {id}");
        }
    }

    fn create_buffer_view(
        &self,
        buffer: BufferHandle,
        info: &BufferViewInfo,
    ) -> Result<BufferViewHandle, RhiError> {
        let buffer_id = dummy_id(buffer.as_dummy())?;
        let mut state = self.state.lock();
        let size = state
            .buffers
            .get(&buffer_id)
            .map(|buffer| buffer.size)
            .ok_or_else(|| RhiError::InvalidParameter(format!("unknown buffer {buffer_id}")))?;
        if info.range.byte_offset + info.range.byte_size > size {
            return Err(RhiError::InvalidParameter(
                "buffer view range out of bounds".to_string(),
            ));
        }
        Ok(BufferViewHandle::Dummy(
            state.create_object(ObjectKind::BufferView),
        ))
    }

    fn destroy_buffer_view(&self, view: BufferViewHandle) {
        self.state
            .lock()
            .destroy_object(view.as_dummy(), ObjectKind::BufferView);
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<TextureHandle, RhiError> {
        if desc.extent.width == 0 || desc.extent.height == 0 || desc.mip_levels == 0 {
            return Err(RhiError::InvalidParameter(
                "texture has a zero dimension".to_string(),
            ));
        }
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}x{})",
            desc.label,
            desc.extent.width,
            desc.extent.height,
            desc.extent.depth
        );
        let texel_bytes = u64::from(desc.format.bytes_per_block().max(1));
        let size = (0..desc.mip_levels)
            .map(|level| {
                let extent = desc.extent.mip_level(level);
                u64::from(extent.width) * u64::from(extent.height) * u64::from(extent.depth)
            })
            .sum::<u64>()
            * u64::from(desc.array_size.max(1))
            * u64::from(desc.sample_count.max(1))
            * texel_bytes;

        let mut state = self.state.lock();
        let id = state.allocate_id();
        state
            .textures
            .insert(id, DummyTexture { size, bound: false });
        Ok(TextureHandle::Dummy(id))
    }

    fn texture_memory_requirements(&self, texture: TextureHandle) -> MemoryRequirements {
        let state = self.state.lock();
        let size = texture
            .as_dummy()
            .and_then(|id| state.textures.get(&id))
            .map_or(0, |texture| texture.size);
        MemoryRequirements {
            size: size.next_multiple_of(4096),
            alignment: 4096,
            memory_type_bits: self.texture_memory_type_bits,
        }
    }

    fn bind_texture_memory(
        &self,
        texture: TextureHandle,
        memory: MemoryHandle,
        _offset: u64,
    ) -> Result<(), RhiError> {
        let texture_id = dummy_id(texture.as_dummy())?;
        let memory_id = dummy_id(memory.as_dummy())?;
        let mut state = self.state.lock();
        if !state.memory.contains_key(&memory_id) {
            return Err(RhiError::InvalidParameter(format!(
                "unknown memory {memory_id}"
            )));
        }
        let entry = state
            .textures
            .get_mut(&texture_id)
            .ok_or_else(|| RhiError::InvalidParameter(format!("unknown texture {texture_id}")))?;
        if entry.bound {
            return Err(RhiError::InvalidParameter(format!(
                "texture {texture_id} already has memory bound"
            )));
        }
        entry.bound = true;
        Ok(())
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let mut state = self.state.lock();
        if let Some(id) = texture.as_dummy()
            && state.textures.remove(&id).is_none()
        {
            log::error!("DummyBackend: destroying unknown texture {id}");
        }
    }

    fn create_texture_view(
        &self,
        texture: TextureHandle,
        info: &TextureViewInfo,
    ) -> Result<TextureViewHandle, RhiError> {
        let texture_id = dummy_id(texture.as_dummy())?;
        let mut state = self.state.lock();
        if !state.textures.contains_key(&texture_id) {
            return Err(RhiError::InvalidParameter(format!(
                "unknown texture {texture_id}"
            )));
        }
        if info.subresources.num_mip_levels == 0 || info.subresources.num_array_slices == 0 {
            return Err(RhiError::InvalidParameter(
                "texture view covers no subresources".to_string(),
            ));
        }
        Ok(TextureViewHandle::Dummy(
            state.create_object(ObjectKind::TextureView),
        ))
    }

    fn destroy_texture_view(&self, view: TextureViewHandle) {
        self.state
            .lock()
            .destroy_object(view.as_dummy(), ObjectKind::TextureView);
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<SamplerHandle, RhiError> {
        log::trace!("DummyBackend: creating sampler {:?}", desc.label);
        Ok(SamplerHandle::Dummy(
            self.state.lock().create_object(ObjectKind::Sampler),
        ))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.state
            .lock()
            .destroy_object(sampler.as_dummy(), ObjectKind::Sampler);
    }

    fn create_shader_module(
        &self,
        _stage: ShaderStages,
        bytecode: &[u8],
    ) -> Result<ShaderModuleHandle, RhiError> {
        if bytecode.is_empty() {
            return Err(RhiError::InvalidParameter(
                "shader bytecode is empty".to_string(),
            ));
        }
        Ok(ShaderModuleHandle::Dummy(
            self.state.lock().create_object(ObjectKind::ShaderModule),
        ))
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        self.state
            .lock()
            .destroy_object(module.as_dummy(), ObjectKind::ShaderModule);
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[DescriptorLayoutBinding],
    ) -> Result<DescriptorSetLayoutHandle, RhiError> {
        Ok(DescriptorSetLayoutHandle::Dummy(
            self.state
                .lock()
                .create_object(ObjectKind::DescriptorSetLayout),
        ))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        self.state
            .lock()
            .destroy_object(layout.as_dummy(), ObjectKind::DescriptorSetLayout);
    }

    fn create_descriptor_set(
        &self,
        layout: DescriptorSetLayoutHandle,
        bindings: &[DescriptorLayoutBinding],
        writes: &[DescriptorWrite],
    ) -> Result<DescriptorSetHandle, RhiError> {
        let mut state = self.state.lock();
        let layout_id = dummy_id(layout.as_dummy())?;
        if state.objects.get(&layout_id) != Some(&ObjectKind::DescriptorSetLayout) {
            return Err(RhiError::InvalidParameter(format!(
                "unknown descriptor set layout {layout_id}"
            )));
        }
        for write in writes {
            let declared = bindings.iter().find(|b| b.binding == write.binding);
            match declared {
                Some(binding) if binding.descriptor_type == write.descriptor_type => {}
                _ => {
                    return Err(RhiError::InvalidParameter(format!(
                        "descriptor write to binding {} does not match the layout",
                        write.binding
                    )));
                }
            }
        }
        Ok(DescriptorSetHandle::Dummy(
            state.create_object(ObjectKind::DescriptorSet),
        ))
    }

    fn destroy_descriptor_set(&self, set: DescriptorSetHandle) {
        self.state
            .lock()
            .destroy_object(set.as_dummy(), ObjectKind::DescriptorSet);
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[DescriptorSetLayoutHandle],
    ) -> Result<PipelineLayoutHandle, RhiError> {
        Ok(PipelineLayoutHandle::Dummy(
            self.state.lock().create_object(ObjectKind::PipelineLayout),
        ))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        self.state
            .lock()
            .destroy_object(layout.as_dummy(), ObjectKind::PipelineLayout);
    }

    fn create_compute_pipeline(
        &self,
        _info: &ComputePipelineInfo,
    ) -> Result<PipelineHandle, RhiError> {
        Ok(PipelineHandle::Dummy(
            self.state.lock().create_object(ObjectKind::Pipeline),
        ))
    }

    fn create_graphics_pipeline(
        &self,
        _info: &GraphicsPipelineInfo,
    ) -> Result<PipelineHandle, RhiError> {
        Ok(PipelineHandle::Dummy(
            self.state.lock().create_object(ObjectKind::Pipeline),
        ))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.state
            .lock()
            .destroy_object(pipeline.as_dummy(), ObjectKind::Pipeline);
    }

    fn create_render_pass(&self, _info: &RenderPassInfo) -> Result<RenderPassHandle, RhiError> {
        Ok(RenderPassHandle::Dummy(
            self.state.lock().create_object(ObjectKind::RenderPass),
        ))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        self.state
            .lock()
            .destroy_object(render_pass.as_dummy(), ObjectKind::RenderPass);
    }

    fn create_framebuffer(
        &self,
        _render_pass: RenderPassHandle,
        attachments: &[TextureViewHandle],
        _extent: Extent3d,
    ) -> Result<FramebufferHandle, RhiError> {
        if attachments.is_empty() {
            return Err(RhiError::InvalidParameter(
                "framebuffer has no attachments".to_string(),
            ));
        }
        Ok(FramebufferHandle::Dummy(
            self.state.lock().create_object(ObjectKind::Framebuffer),
        ))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        self.state
            .lock()
            .destroy_object(framebuffer.as_dummy(), ObjectKind::Framebuffer);
    }

    fn create_command_pool(&self, queue: QueueId) -> Result<CommandPoolHandle, RhiError> {
        if !self.info.has_queue(queue) {
            return Err(RhiError::FeatureNotSupported(format!(
                "no {queue} queue on this device"
            )));
        }
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.command_pools.insert(id, queue);
        Ok(CommandPoolHandle::Dummy(id))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        let mut state = self.state.lock();
        if let Some(id) = pool.as_dummy() {
            state.command_pools.remove(&id);
            state.command_buffers.retain(|_, buffer| buffer.pool != id);
        }
    }

    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
    ) -> Result<CommandBufferHandle, RhiError> {
        let pool_id = dummy_id(pool.as_dummy())?;
        let mut state = self.state.lock();
        if !state.command_pools.contains_key(&pool_id) {
            return Err(RhiError::InvalidParameter(format!(
                "unknown command pool {pool_id}"
            )));
        }
        let id = state.allocate_id();
        state.command_buffers.insert(
            id,
            DummyCommandBuffer {
                pool: pool_id,
                recording: false,
                commands: Vec::new(),
            },
        );
        Ok(CommandBufferHandle::Dummy(id))
    }

    fn free_command_buffer(&self, _pool: CommandPoolHandle, command_buffer: CommandBufferHandle) {
        let mut state = self.state.lock();
        if let Some(id) = command_buffer.as_dummy()
            && state.command_buffers.remove(&id).is_none()
        {
            log::error!("DummyBackend: freeing unknown command buffer {id}");
        }
    }

    fn reset_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<(), RhiError> {
        let id = dummy_id(command_buffer.as_dummy())?;
        let mut state = self.state.lock();
        let buffer = state
            .command_buffers
            .get_mut(&id)
            .ok_or_else(|| RhiError::InvalidParameter(format!("unknown command buffer {id}")))?;
        buffer.recording = false;
        buffer.commands.clear();
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<(), RhiError> {
        let id = dummy_id(command_buffer.as_dummy())?;
        let mut state = self.state.lock();
        let buffer = state
            .command_buffers
            .get_mut(&id)
            .ok_or_else(|| RhiError::InvalidParameter(format!("unknown command buffer {id}")))?;
        buffer.recording = true;
        buffer.commands.clear();
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<(), RhiError> {
        let id = dummy_id(command_buffer.as_dummy())?;
        let mut state = self.state.lock();
        let buffer = state
            .command_buffers
            .get_mut(&id)
            .ok_or_else(|| RhiError::InvalidParameter(format!("unknown command buffer {id}")))?;
        if !buffer.recording {
            return Err(RhiError::InvalidParameter(format!(
                "command buffer {id} is not recording"
            )));
        }
        buffer.recording = false;
        Ok(())
    }

    fn record(
        &self,
        command_buffer: CommandBufferHandle,
        command: NativeCommand,
    ) -> Result<(), RhiError> {
        let id = dummy_id(command_buffer.as_dummy())?;
        let mut state = self.state.lock();
        let buffer = state
            .command_buffers
            .get_mut(&id)
            .ok_or_else(|| RhiError::InvalidParameter(format!("unknown command buffer {id}")))?;
        if !buffer.recording {
            return Err(RhiError::InvalidParameter(format!(
                "command buffer {id} is not recording"
            )));
        }
        buffer.commands.push(command);
        Ok(())
    }

    fn submit(&self, queue: QueueId, submit: &NativeSubmit) -> Result<(), RhiError> {
        if !self.info.has_queue(queue) {
            return Err(RhiError::FeatureNotSupported(format!(
                "no {queue} queue on this device"
            )));
        }
        if self.device_lost.load(Ordering::Relaxed) {
            log::error!("DummyBackend: device lost, rejecting {queue} submission");
            return Err(RhiError::DeviceLost);
        }

        let mut state = self.state.lock();

        let mut commands = Vec::new();
        for command_buffer in &submit.command_buffers {
            let id = dummy_id(command_buffer.as_dummy())?;
            let buffer = state.command_buffers.get(&id).ok_or_else(|| {
                RhiError::InvalidParameter(format!("unknown command buffer {id}"))
            })?;
            if buffer.recording {
                return Err(RhiError::InvalidParameter(format!(
                    "command buffer {id} submitted while recording"
                )));
            }
            if state.command_pools.get(&buffer.pool) != Some(&queue) {
                return Err(RhiError::InvalidParameter(format!(
                    "command buffer {id} belongs to another queue's pool"
                )));
            }
            commands.extend(buffer.commands.iter().cloned());
        }

        for (semaphore, _) in &submit.waits {
            let id = dummy_id(semaphore.as_dummy())?;
            let signaled = state.semaphores.get(&id).copied().ok_or_else(|| {
                RhiError::InvalidParameter(format!("unknown semaphore {id}"))
            })?;
            if !signaled && !state.semaphore_has_pending_signal(id) {
                return Err(RhiError::InvalidParameter(format!(
                    "wait on semaphore {id} without a pending signal"
                )));
            }
        }

        for semaphore in &submit.signals {
            let id = dummy_id(semaphore.as_dummy())?;
            let signaled = state.semaphores.get(&id).copied().ok_or_else(|| {
                RhiError::InvalidParameter(format!("unknown semaphore {id}"))
            })?;
            if signaled || state.semaphore_has_pending_signal(id) {
                return Err(RhiError::InvalidParameter(format!(
                    "semaphore {id} signaled twice without a wait"
                )));
            }
        }

        if let Some(fence) = submit.fence {
            let id = dummy_id(fence.as_dummy())?;
            let signaled = state
                .fences
                .get(&id)
                .copied()
                .ok_or_else(|| RhiError::InvalidParameter(format!("unknown fence {id}")))?;
            let pending = state
                .pending
                .iter()
                .flatten()
                .any(|submission| submission.fence == Some(fence));
            if signaled || pending {
                return Err(RhiError::InvalidParameter(format!(
                    "fence {id} submitted while signaled or in use"
                )));
            }
        }

        state.next_serial += 1;
        let submission = DummySubmission {
            serial: state.next_serial,
            queue,
            waits: submit.waits.clone(),
            signals: submit.signals.clone(),
            fence: submit.fence,
            commands,
        };
        log::trace!(
            "DummyBackend: submission {} on {} queue ({} waits, {} signals)",
            submission.serial,
            queue,
            submission.waits.len(),
            submission.signals.len()
        );
        let serial = submission.serial;
        state.log.push(submission.clone());
        state.pending[queue.index()].push_back(submission);

        if self.auto_complete.load(Ordering::Relaxed) && !self.hung.load(Ordering::Relaxed) {
            state.complete_through(queue, serial)?;
        }
        Ok(())
    }

    fn queue_wait_idle(&self, queue: QueueId, timeout: SyncTimeout) -> Result<bool, RhiError> {
        if self.hung.load(Ordering::Relaxed) && self.pending_count(queue) > 0 {
            log::warn!("DummyBackend: GPU hung, {queue} queue drain expires ({timeout:?})");
            return Ok(false);
        }
        self.complete_queue(queue)?;
        Ok(true)
    }

    fn device_wait_idle(&self) -> Result<(), RhiError> {
        if self.hung.load(Ordering::Relaxed) {
            return Err(RhiError::DeviceLost);
        }
        self.complete_all()
    }

    fn set_object_name(&self, object: NativeObject, name: &str) {
        self.state.lock().names.insert(object, name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferUsage, Format, TextureUsage};

    fn recorded(backend: &DummyBackend, queue: QueueId, commands: Vec<NativeCommand>) -> CommandBufferHandle {
        let pool = backend.create_command_pool(queue).unwrap();
        let command_buffer = backend.allocate_command_buffer(pool).unwrap();
        backend.begin_command_buffer(command_buffer).unwrap();
        for command in commands {
            backend.record(command_buffer, command).unwrap();
        }
        backend.end_command_buffer(command_buffer).unwrap();
        command_buffer
    }

    fn host_buffer(backend: &DummyBackend, size: u64) -> (BufferHandle, MemoryHandle) {
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(size, BufferUsage::default()))
            .unwrap();
        // memory type 2 is host visible + cached
        let memory = backend.allocate_memory(size, 2).unwrap();
        backend.bind_buffer_memory(buffer, memory, 0).unwrap();
        (buffer, memory)
    }

    #[test]
    fn test_dummy_backend_name() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy");
        assert_eq!(backend.device_info().memory_properties.memory_types.len(), 3);
    }

    #[test]
    fn test_fence_stays_pending_until_completed() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence().unwrap();
        let command_buffer = recorded(&backend, QueueId::Graphics, Vec::new());
        backend
            .submit(
                QueueId::Graphics,
                &NativeSubmit {
                    command_buffers: vec![command_buffer],
                    fence: Some(fence),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(!backend.fence_status(fence).unwrap());
        assert!(backend.complete_next(QueueId::Graphics).unwrap());
        assert!(backend.fence_status(fence).unwrap());
    }

    #[test]
    fn test_updates_execute_on_completion() {
        let backend = DummyBackend::new();
        let (buffer, memory) = host_buffer(&backend, 16);
        let command_buffer = recorded(
            &backend,
            QueueId::Transfer,
            vec![
                NativeCommand::FillBuffer {
                    buffer,
                    offset: 0,
                    size: 16,
                    value: 0x0101_0101,
                },
                NativeCommand::UpdateBuffer {
                    buffer,
                    offset: 4,
                    data: vec![9, 9, 9, 9],
                },
            ],
        );
        backend
            .submit(
                QueueId::Transfer,
                &NativeSubmit {
                    command_buffers: vec![command_buffer],
                    ..Default::default()
                },
            )
            .unwrap();

        let mut out = [0u8; 8];
        backend.read_memory(memory, 0, &mut out).unwrap();
        assert_eq!(out, [0; 8]);

        backend.complete_all().unwrap();
        backend.read_memory(memory, 0, &mut out).unwrap();
        assert_eq!(out, [1, 1, 1, 1, 9, 9, 9, 9]);
    }

    #[test]
    fn test_cross_queue_wait_completes_signaler_first() {
        let backend = DummyBackend::new();
        let semaphore = backend.create_semaphore().unwrap();
        let transfer_fence = backend.create_fence().unwrap();
        let graphics_fence = backend.create_fence().unwrap();

        let transfer_cb = recorded(&backend, QueueId::Transfer, Vec::new());
        backend
            .submit(
                QueueId::Transfer,
                &NativeSubmit {
                    command_buffers: vec![transfer_cb],
                    signals: vec![semaphore],
                    fence: Some(transfer_fence),
                    ..Default::default()
                },
            )
            .unwrap();

        let graphics_cb = recorded(&backend, QueueId::Graphics, Vec::new());
        backend
            .submit(
                QueueId::Graphics,
                &NativeSubmit {
                    command_buffers: vec![graphics_cb],
                    waits: vec![(semaphore, PipelineStages::TRANSFER)],
                    fence: Some(graphics_fence),
                    ..Default::default()
                },
            )
            .unwrap();

        backend.complete_queue(QueueId::Graphics).unwrap();
        assert!(backend.fence_status(transfer_fence).unwrap());
        assert!(backend.fence_status(graphics_fence).unwrap());
    }

    #[test]
    fn test_wait_without_signal_is_rejected() {
        let backend = DummyBackend::new();
        let semaphore = backend.create_semaphore().unwrap();
        let command_buffer = recorded(&backend, QueueId::Graphics, Vec::new());
        let result = backend.submit(
            QueueId::Graphics,
            &NativeSubmit {
                command_buffers: vec![command_buffer],
                waits: vec![(semaphore, PipelineStages::ALL_COMMANDS)],
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(RhiError::InvalidParameter(_))));
    }

    #[test]
    fn test_hung_gpu_times_out() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence().unwrap();
        let command_buffer = recorded(&backend, QueueId::Graphics, Vec::new());
        backend
            .submit(
                QueueId::Graphics,
                &NativeSubmit {
                    command_buffers: vec![command_buffer],
                    fence: Some(fence),
                    ..Default::default()
                },
            )
            .unwrap();

        backend.set_hung(true);
        assert!(!backend.wait_fence(fence, SyncTimeout::default()).unwrap());
        assert!(!backend
            .queue_wait_idle(QueueId::Graphics, SyncTimeout::default())
            .unwrap());

        backend.set_hung(false);
        assert!(backend.wait_fence(fence, SyncTimeout::default()).unwrap());
    }

    #[test]
    fn test_texture_memory_requirements() {
        let backend = DummyBackend::new();
        let texture = backend
            .create_texture(&TextureDescriptor::new_2d(
                64,
                64,
                Format::Rgba8Unorm,
                TextureUsage::default(),
            ))
            .unwrap();
        let requirements = backend.texture_memory_requirements(texture);
        assert_eq!(requirements.size, 64 * 64 * 4);
        assert_eq!(requirements.memory_type_bits, 0b111);
        backend.destroy_texture(texture);
        assert_eq!(backend.live_resources(), 0);
    }
}
