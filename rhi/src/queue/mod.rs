//! Hardware queues: submission and retirement of tracked command buffers.
//!
//! # Synchronization model
//!
//! Work on one queue executes in submission order, so same-queue hazards need
//! no semaphores. Across queues, every submission that touched resources
//! signals a completion semaphore which is stored in the resources' read or
//! write slots. A later submission on a different queue that touches the same
//! resources waits on those semaphores:
//!
//! | Access by the new submission | Slots waited on   |
//! |------------------------------|-------------------|
//! | write                        | read and write    |
//! | read                         | write             |
//!
//! Semaphores are binary: the first cross-queue submission that waits on a
//! signal consumes it.
//!
//! Every submission also gets a fence. [`Queue::retire_command_buffers`]
//! polls the fences and recycles command buffers and sync objects of
//! finished submissions.

mod submission;
mod tracked;

pub use submission::{CommandBufferSubmission, WaitSemaphores};
pub use tracked::{CommandBufferPool, CommandPoolContext, TrackedCommandBuffer};

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::backend::NativeSubmit;
use crate::context::DeviceContext;
use crate::error::RhiError;
use crate::memory::SyncSlot;
use crate::pool::{ObjectPool, PoolMode};
use crate::resources::GpuResource;
use crate::sync::{Fence, PooledFence, Semaphore, SyncObjectPool};
use crate::types::{MAX_WAIT_SEMAPHORES, QueueId};
use crate::{profile_function, profile_scope};

/// A semaphore moved out of a resource slot by a submission in progress.
struct TakenWait {
    resource: Arc<dyn GpuResource>,
    slot: SyncSlot,
    semaphore: Arc<Semaphore>,
}

/// Callback invoked with the completion fence of every submission.
pub type SubmitFenceListener = Arc<dyn Fn(PooledFence) + Send + Sync>;

/// One hardware queue.
///
/// Internally synchronized; all methods take `&self`.
pub struct Queue {
    id: QueueId,
    context: Arc<DeviceContext>,
    sync_pool: Arc<SyncObjectPool>,
    command_buffers: Arc<CommandBufferPool>,
    in_flight: Mutex<VecDeque<CommandBufferSubmission>>,
    listeners: Mutex<Vec<SubmitFenceListener>>,
    last_submitted_fence: Mutex<Option<PooledFence>>,
    next_submission_id: AtomicU64,
}

impl Queue {
    pub fn new(
        id: QueueId,
        context: Arc<DeviceContext>,
        sync_pool: Arc<SyncObjectPool>,
    ) -> Result<Self, RhiError> {
        let pool_context = Arc::new(CommandPoolContext::new(context.clone(), id)?);
        log::debug!("Created {id} queue");
        Ok(Self {
            id,
            context,
            sync_pool,
            command_buffers: Arc::new(Mutex::new(ObjectPool::new(
                pool_context,
                PoolMode::Growable,
            )?)),
            in_flight: Mutex::new(VecDeque::new()),
            listeners: Mutex::new(Vec::new()),
            last_submitted_fence: Mutex::new(None),
            next_submission_id: AtomicU64::new(1),
        })
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Take a command buffer from the pool and begin recording.
    pub fn create_one_shot_cmd_buf(&self) -> Result<TrackedCommandBuffer, RhiError> {
        let mut command_buffer = self
            .command_buffers
            .lock()
            .get()?
            .ok_or(RhiError::PoolExhausted)?;
        command_buffer.set_origin(Arc::downgrade(&self.command_buffers));
        if let Err(e) = command_buffer.begin() {
            self.recycle(command_buffer);
            return Err(e);
        }
        Ok(command_buffer)
    }

    /// Return a command buffer to the pool without submitting it.
    pub fn release_cmd_buf(&self, command_buffer: TrackedCommandBuffer) {
        if command_buffer.target_queue() != self.id {
            Self::return_to_origin(command_buffer);
            return;
        }
        self.recycle(command_buffer);
    }

    /// Send a command buffer back to the queue it was taken from.
    fn return_to_origin(command_buffer: TrackedCommandBuffer) {
        let origin = command_buffer.origin().upgrade();
        match origin {
            Some(pool) => {
                if let Err(e) = pool.lock().retire(command_buffer) {
                    log::error!("Failed to recycle command buffer: {e}");
                }
            }
            None => command_buffer.discard(),
        }
    }

    /// Register a callback that receives the fence of every later submission.
    pub fn add_submit_fence_listener(&self, listener: impl Fn(PooledFence) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Fence of the most recent submission, `None` once it has been retired.
    pub fn last_submitted_fence(&self) -> Option<PooledFence> {
        self.last_submitted_fence.lock().clone()
    }

    /// Number of submissions not yet retired.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Number of command buffers currently checked out of the pool.
    pub fn outstanding_command_buffers(&self) -> usize {
        self.command_buffers.lock().num_objects_outstanding()
    }

    /// Number of command buffers the pool has created.
    pub fn allocated_command_buffers(&self) -> usize {
        self.command_buffers.lock().num_objects_allocated()
    }

    /// Submit `command_buffer` and return its submission id.
    ///
    /// On failure everything acquired for the submission is released, the
    /// resource slots are left as they were and the command buffer goes back
    /// to the pool.
    pub fn submit(&self, mut command_buffer: TrackedCommandBuffer) -> Result<u64, RhiError> {
        profile_function!();

        if command_buffer.target_queue() != self.id {
            let target = command_buffer.target_queue();
            log::error!("Command buffer for the {target} queue submitted to the {} queue", self.id);
            Self::return_to_origin(command_buffer);
            return Err(RhiError::InvalidParameter(format!(
                "command buffer for the {target} queue submitted to the {} queue",
                self.id
            )));
        }

        if let Err(e) = command_buffer.end() {
            self.recycle(command_buffer);
            return Err(e);
        }

        let pending = self.count_pending_waits(&command_buffer);
        if pending > MAX_WAIT_SEMAPHORES {
            self.recycle(command_buffer);
            return Err(RhiError::InvalidParameter(format!(
                "submission would wait on {pending} semaphores, the limit is {MAX_WAIT_SEMAPHORES}"
            )));
        }

        let (completion, fence) = match self.acquire_sync_objects(&command_buffer) {
            Ok(objects) => objects,
            Err(e) => {
                log::debug!("No sync objects for {} queue submission: {e}", self.id);
                self.recycle(command_buffer);
                return Err(e);
            }
        };

        let taken = self.gather_waits(&command_buffer);
        match self.submit_native(command_buffer, taken, completion, fence) {
            Ok(id) => Ok(id),
            Err((command_buffer, e)) => {
                log::error!("Submission to {} queue failed: {e}", self.id);
                self.recycle(command_buffer);
                Err(e)
            }
        }
    }

    /// Resource slots a submission has to consider for waits.
    fn wait_candidates(
        command_buffer: &TrackedCommandBuffer,
    ) -> impl Iterator<Item = (&Arc<dyn GpuResource>, SyncSlot)> {
        let writes = command_buffer
            .write_list()
            .flat_map(|resource| [(resource, SyncSlot::Read), (resource, SyncSlot::Write)]);
        let reads = command_buffer
            .read_list()
            .map(|resource| (resource, SyncSlot::Write));
        writes.chain(reads)
    }

    fn count_pending_waits(&self, command_buffer: &TrackedCommandBuffer) -> usize {
        let mut seen: Vec<Arc<Semaphore>> = Vec::new();
        for (resource, slot) in Self::wait_candidates(command_buffer) {
            if let Some(semaphore) = resource.memory_resource().semaphore(slot)
                && semaphore.needs_wait(self.id)
                && !seen.iter().any(|s| Arc::ptr_eq(s, &semaphore))
            {
                seen.push(semaphore);
            }
        }
        seen.len()
    }

    /// Completion semaphore (only when resources were touched) and fence.
    fn acquire_sync_objects(
        &self,
        command_buffer: &TrackedCommandBuffer,
    ) -> Result<(Option<Arc<Semaphore>>, Arc<Fence>), RhiError> {
        let completion = if command_buffer.has_resources() {
            Some(self.sync_pool.get_semaphore(self.id.completion_stages())?)
        } else {
            None
        };
        match self.sync_pool.get_fence() {
            Ok(fence) => Ok((completion, fence)),
            Err(e) => {
                if let Some(completion) = completion {
                    self.sync_pool.release_semaphore(completion);
                }
                Err(e)
            }
        }
    }

    /// Move pending cross-queue semaphores out of the resource slots.
    ///
    /// Signals are not consumed here; a semaphore shared by several slots is
    /// taken once per slot.
    fn gather_waits(&self, command_buffer: &TrackedCommandBuffer) -> Vec<TakenWait> {
        let mut taken = Vec::new();
        for (resource, slot) in Self::wait_candidates(command_buffer) {
            let semaphore = resource
                .memory_resource()
                .take_semaphore_if(slot, |semaphore| semaphore.needs_wait(self.id));
            if let Some(semaphore) = semaphore {
                taken.push(TakenWait {
                    resource: resource.clone(),
                    slot,
                    semaphore,
                });
            }
        }
        taken
    }

    /// Put taken semaphores back after a failed submission.
    fn restore_waits(taken: Vec<TakenWait>) {
        for wait in taken {
            wait.resource
                .memory_resource()
                .restore_semaphore(wait.slot, wait.semaphore);
        }
    }

    /// Consume the signals of a successful submission and keep one
    /// reference per distinct semaphore until retirement.
    fn consume_waits(&self, taken: Vec<TakenWait>) -> WaitSemaphores {
        let mut waits = WaitSemaphores::new();
        for wait in taken {
            if waits.iter().any(|w| Arc::ptr_eq(w, &wait.semaphore)) {
                self.sync_pool.release_semaphore(wait.semaphore);
            } else {
                wait.semaphore.consume_signal(self.id);
                waits.push(wait.semaphore);
            }
        }
        waits
    }

    fn submit_native(
        &self,
        command_buffer: TrackedCommandBuffer,
        taken: Vec<TakenWait>,
        completion: Option<Arc<Semaphore>>,
        fence: Arc<Fence>,
    ) -> Result<u64, (TrackedCommandBuffer, RhiError)> {
        let mut native = NativeSubmit {
            command_buffers: vec![command_buffer.native()],
            ..Default::default()
        };
        let mut lost_signal = false;
        for (index, wait) in taken.iter().enumerate() {
            if taken[..index]
                .iter()
                .any(|earlier| Arc::ptr_eq(&earlier.semaphore, &wait.semaphore))
            {
                continue;
            }
            match (
                wait.semaphore.native(),
                wait.semaphore.pending_wait_stages(self.id),
            ) {
                (Some(handle), Some(stages)) => native.waits.push((handle, stages)),
                _ => lost_signal = true,
            }
        }

        let handles = (
            completion.as_ref().map(|semaphore| semaphore.native()),
            fence.native(),
        );
        let result = match handles {
            _ if lost_signal => Err(RhiError::Internal(
                "wait semaphore lost its pending signal".to_string(),
            )),
            (Some(None), _) | (_, None) => Err(RhiError::Internal(
                "pooled sync object has no native handle".to_string(),
            )),
            (completion_handle, Some(fence_handle)) => {
                native.signals.extend(completion_handle.flatten());
                native.fence = Some(fence_handle);
                self.context.backend().submit(self.id, &native)
            }
        };

        if let Err(e) = result {
            Self::restore_waits(taken);
            if let Some(completion) = completion {
                self.sync_pool.release_semaphore(completion);
            }
            self.sync_pool.release_fence(fence);
            return Err((command_buffer, e));
        }

        let waits = self.consume_waits(taken);
        if let Some(completion) = &completion {
            completion.mark_in_flight(self.id);
        }

        for resource in command_buffer.write_list() {
            let memory = resource.memory_resource();
            memory.set_semaphore(SyncSlot::Write, completion.as_ref());
            memory.set_fence(SyncSlot::Write, Some(&fence));
        }
        for resource in command_buffer.read_list() {
            let memory = resource.memory_resource();
            memory.set_semaphore(SyncSlot::Read, completion.as_ref());
            memory.set_fence(SyncSlot::Read, Some(&fence));
        }

        let listeners: Vec<SubmitFenceListener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(PooledFence::new(self.sync_pool.clone(), fence.clone()));
        }
        *self.last_submitted_fence.lock() =
            Some(PooledFence::new(self.sync_pool.clone(), fence.clone()));

        let id = self.next_submission_id.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "Submitted #{id} to {} queue ({} waits, {} signals)",
            self.id,
            native.waits.len(),
            native.signals.len()
        );
        self.in_flight.lock().push_back(CommandBufferSubmission {
            id,
            command_buffer,
            native,
            wait_semaphores: waits,
            completion_semaphore: completion,
            fence,
        });
        Ok(id)
    }

    /// Recycle every finished submission. Returns how many were retired.
    ///
    /// Unfinished submissions stay in flight in submission order.
    pub fn retire_command_buffers(&self) -> Result<usize, RhiError> {
        profile_function!();

        let submissions = std::mem::take(&mut *self.in_flight.lock());
        let mut unfinished = VecDeque::new();
        let mut retired = 0;
        let mut first_error = None;

        for submission in submissions {
            match submission.fence.check(&self.context) {
                Ok(true) => {
                    self.retire_submission(submission);
                    retired += 1;
                }
                Ok(false) => unfinished.push_back(submission),
                Err(e) => {
                    unfinished.push_back(submission);
                    first_error.get_or_insert(e);
                }
            }
        }

        if !unfinished.is_empty() {
            let mut in_flight = self.in_flight.lock();
            unfinished.extend(in_flight.drain(..));
            *in_flight = unfinished;
        }

        if retired > 0 {
            log::trace!("Retired {retired} submissions on {} queue", self.id);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(retired),
        }
    }

    fn retire_submission(&self, submission: CommandBufferSubmission) {
        profile_scope!("retire_submission");

        let CommandBufferSubmission {
            command_buffer,
            wait_semaphores,
            completion_semaphore,
            fence,
            ..
        } = submission;

        let slots = command_buffer
            .write_list()
            .map(|resource| (resource, SyncSlot::Write))
            .chain(
                command_buffer
                    .read_list()
                    .map(|resource| (resource, SyncSlot::Read)),
            );
        for (resource, slot) in slots {
            let memory = resource.memory_resource();
            memory.clear_fence_if(slot, &fence);
            if let Some(completion) = &completion_semaphore {
                memory.clear_semaphore_if(slot, completion);
            }
        }

        {
            let mut last = self.last_submitted_fence.lock();
            if last.as_ref().is_some_and(|pooled| pooled.same_fence(&fence)) {
                *last = None;
            }
        }

        self.sync_pool.release_fence(fence);
        if let Some(completion) = completion_semaphore {
            self.sync_pool.release_semaphore(completion);
        }
        self.release_waits(wait_semaphores);
        self.recycle(command_buffer);
    }

    fn release_waits(&self, waits: WaitSemaphores) {
        for semaphore in waits {
            self.sync_pool.release_semaphore(semaphore);
        }
    }

    fn recycle(&self, command_buffer: TrackedCommandBuffer) {
        if let Err(e) = self.command_buffers.lock().retire(command_buffer) {
            log::error!("Failed to recycle command buffer: {e}");
        }
    }

    /// Block until the queue finished all submitted work.
    pub fn idle(&self) -> Result<(), RhiError> {
        let timeout = self.context.sync_timeout();
        if self.context.backend().queue_wait_idle(self.id, timeout)? {
            Ok(())
        } else {
            log::warn!("{} queue did not drain within {timeout:?}", self.id);
            Err(RhiError::Timeout)
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Err(e) = self.idle() {
            log::error!("Failed to drain {} queue on drop: {e}", self.id);
        }
        if let Err(e) = self.retire_command_buffers() {
            log::error!("Failed to retire {} queue on drop: {e}", self.id);
        }
        self.last_submitted_fence.lock().take();
        let remaining = self.in_flight.get_mut().len();
        if remaining > 0 {
            log::warn!("{} queue dropped with {remaining} submissions in flight", self.id);
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("id", &self.id)
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, NativeCommand};
    use crate::config::DeviceConfig;
    use crate::memory::{DeviceAllocator, MemoryResource};
    use crate::types::PipelineStages;

    struct TestResource(MemoryResource);

    impl GpuResource for TestResource {
        fn memory_resource(&self) -> &MemoryResource {
            &self.0
        }
    }

    struct Fixture {
        backend: Arc<DummyBackend>,
        sync_pool: Arc<SyncObjectPool>,
        graphics: Queue,
        transfer: Queue,
    }

    fn fixture() -> Fixture {
        fixture_with(DeviceConfig::default())
    }

    fn fixture_with(config: DeviceConfig) -> Fixture {
        let backend = Arc::new(DummyBackend::new());
        let context = Arc::new(DeviceContext::new(
            backend.clone(),
            config,
            Arc::new(DeviceAllocator),
        ));
        let sync_pool = Arc::new(SyncObjectPool::new(context.clone()).unwrap());
        Fixture {
            graphics: Queue::new(QueueId::Graphics, context.clone(), sync_pool.clone()).unwrap(),
            transfer: Queue::new(QueueId::Transfer, context, sync_pool.clone()).unwrap(),
            backend,
            sync_pool,
        }
    }

    fn resource(pool: &Arc<SyncObjectPool>) -> Arc<TestResource> {
        Arc::new(TestResource(MemoryResource::new(pool.clone())))
    }

    #[test]
    fn test_empty_submission_has_no_semaphores() {
        let f = fixture();
        let command_buffer = f.graphics.create_one_shot_cmd_buf().unwrap();
        f.graphics.submit(command_buffer).unwrap();

        let log = f.backend.submissions();
        assert_eq!(log.len(), 1);
        assert!(log[0].waits.is_empty());
        assert!(log[0].signals.is_empty());
        assert!(log[0].fence.is_some());
    }

    #[test]
    fn test_same_queue_does_not_wait() {
        let f = fixture();
        let buffer = resource(&f.sync_pool);

        for _ in 0..2 {
            let mut command_buffer = f.graphics.create_one_shot_cmd_buf().unwrap();
            command_buffer.mark_write(buffer.clone());
            f.graphics.submit(command_buffer).unwrap();
        }

        let log = f.backend.submissions();
        assert!(log[1].waits.is_empty());
        assert_eq!(log[1].signals.len(), 1);
    }

    #[test]
    fn test_cross_queue_wait_on_transfer_semaphore() {
        let f = fixture();
        let buffer = resource(&f.sync_pool);

        let mut upload = f.transfer.create_one_shot_cmd_buf().unwrap();
        upload.mark_write(buffer.clone());
        f.transfer.submit(upload).unwrap();
        let signal = f.backend.submissions()[0].signals[0];

        let mut draw = f.graphics.create_one_shot_cmd_buf().unwrap();
        draw.mark_read(buffer.clone());
        f.graphics.submit(draw).unwrap();

        let log = f.backend.submissions();
        assert_eq!(log[1].waits, vec![(signal, PipelineStages::TRANSFER)]);
        // the signal was consumed and moved out of the slot
        assert!(buffer.memory_resource().write_semaphore().is_none());
    }

    #[test]
    fn test_failed_submit_keeps_cross_queue_wait() {
        let f = fixture_with(DeviceConfig::default().with_max_sync_objects(2));
        let shared = resource(&f.sync_pool);
        let other = resource(&f.sync_pool);

        let mut upload = f.transfer.create_one_shot_cmd_buf().unwrap();
        upload.mark_write(shared.clone());
        f.transfer.submit(upload).unwrap();
        let signal = f.backend.submissions()[0].signals[0];

        let mut fill = f.graphics.create_one_shot_cmd_buf().unwrap();
        fill.mark_write(other.clone());
        f.graphics.submit(fill).unwrap();

        // Both semaphores are in flight, the read cannot get a completion semaphore
        let mut read = f.graphics.create_one_shot_cmd_buf().unwrap();
        read.mark_read(shared.clone());
        assert_eq!(f.graphics.submit(read), Err(RhiError::PoolExhausted));

        let pending = shared.memory_resource().write_semaphore().unwrap();
        assert_eq!(pending.native(), Some(signal));
        assert!(pending.needs_wait(QueueId::Graphics));
        drop(pending);
        assert_eq!(f.graphics.outstanding_command_buffers(), 0);

        f.backend.complete_queue(QueueId::Graphics).unwrap();
        assert_eq!(f.graphics.retire_command_buffers().unwrap(), 1);
        assert_eq!(f.backend.pending_count(QueueId::Transfer), 1);

        let mut retry = f.graphics.create_one_shot_cmd_buf().unwrap();
        retry.mark_read(shared.clone());
        f.graphics.submit(retry).unwrap();

        let log = f.backend.submissions();
        assert_eq!(
            log.last().unwrap().waits,
            vec![(signal, PipelineStages::TRANSFER)]
        );
    }

    #[test]
    fn test_failed_native_submit_restores_slots() {
        let f = fixture();
        let shared = resource(&f.sync_pool);

        let mut upload = f.transfer.create_one_shot_cmd_buf().unwrap();
        upload.mark_write(shared.clone());
        f.transfer.submit(upload).unwrap();
        let stats = f.sync_pool.stats();

        let mut read = f.graphics.create_one_shot_cmd_buf().unwrap();
        read.mark_read(shared.clone());
        f.backend.set_device_lost(true);
        assert_eq!(f.graphics.submit(read), Err(RhiError::DeviceLost));
        f.backend.set_device_lost(false);

        let pending = shared.memory_resource().write_semaphore().unwrap();
        assert!(pending.needs_wait(QueueId::Graphics));
        drop(pending);
        let after = f.sync_pool.stats();
        assert_eq!(after.semaphores_outstanding, stats.semaphores_outstanding);
        assert_eq!(after.fences_outstanding, stats.fences_outstanding);
        assert_eq!(f.graphics.outstanding_command_buffers(), 0);
    }

    #[test]
    fn test_same_queue_fences_signal_in_order() {
        let f = fixture();
        let fences = Arc::new(Mutex::new(Vec::new()));
        let sink = fences.clone();
        f.graphics
            .add_submit_fence_listener(move |fence| sink.lock().push(fence));

        for _ in 0..2 {
            let command_buffer = f.graphics.create_one_shot_cmd_buf().unwrap();
            f.graphics.submit(command_buffer).unwrap();
        }

        assert!(f.backend.complete_next(QueueId::Graphics).unwrap());
        let fences = std::mem::take(&mut *fences.lock());
        assert!(fences[0].is_signaled().unwrap());
        assert!(!fences[1].is_signaled().unwrap());
        assert_eq!(f.graphics.retire_command_buffers().unwrap(), 1);
        assert_eq!(f.graphics.in_flight_count(), 1);
    }

    #[test]
    fn test_retire_returns_everything_to_pools() {
        let f = fixture();
        let buffer = resource(&f.sync_pool);

        let mut upload = f.transfer.create_one_shot_cmd_buf().unwrap();
        upload.mark_write(buffer.clone());
        f.transfer.submit(upload).unwrap();
        let mut draw = f.graphics.create_one_shot_cmd_buf().unwrap();
        draw.mark_read(buffer.clone());
        f.graphics.submit(draw).unwrap();

        assert_eq!(f.graphics.retire_command_buffers().unwrap(), 0);
        f.backend.complete_all().unwrap();
        assert_eq!(f.transfer.retire_command_buffers().unwrap(), 1);
        assert_eq!(f.graphics.retire_command_buffers().unwrap(), 1);

        let stats = f.sync_pool.stats();
        assert_eq!(stats.semaphores_outstanding, 0);
        assert_eq!(stats.fences_outstanding, 0);
        assert_eq!(f.graphics.outstanding_command_buffers(), 0);
        assert_eq!(f.transfer.outstanding_command_buffers(), 0);
        assert!(f.graphics.last_submitted_fence().is_none());
    }

    #[test]
    fn test_submit_to_wrong_queue_is_rejected() {
        let f = fixture();
        let command_buffer = f.transfer.create_one_shot_cmd_buf().unwrap();
        assert!(matches!(
            f.graphics.submit(command_buffer),
            Err(RhiError::InvalidParameter(_))
        ));
        assert_eq!(f.transfer.outstanding_command_buffers(), 0);
        assert_eq!(f.transfer.allocated_command_buffers(), 1);
        assert_eq!(f.graphics.allocated_command_buffers(), 0);
    }

    #[test]
    fn test_listener_receives_fence() {
        let f = fixture();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        f.graphics
            .add_submit_fence_listener(move |fence| sink.lock().push(fence));

        let mut command_buffer = f.graphics.create_one_shot_cmd_buf().unwrap();
        command_buffer
            .record(NativeCommand::Dispatch { x: 1, y: 1, z: 1 })
            .unwrap();
        f.graphics.submit(command_buffer).unwrap();

        let fence = received.lock().pop().unwrap();
        assert!(!fence.is_signaled().unwrap());
        fence.wait().unwrap();
        assert!(fence.is_signaled().unwrap());
    }

    #[test]
    fn test_idle_times_out_on_hung_gpu() {
        let f = fixture();
        let command_buffer = f.graphics.create_one_shot_cmd_buf().unwrap();
        f.graphics.submit(command_buffer).unwrap();
        f.backend.set_hung(true);
        assert_eq!(f.graphics.idle(), Err(RhiError::Timeout));
        f.backend.set_hung(false);
        f.graphics.idle().unwrap();
    }
}
