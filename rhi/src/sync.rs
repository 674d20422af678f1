//! GPU synchronization primitives and their pool.
//!
//! - [`Semaphore`] orders GPU work across queues. A binary semaphore is
//!   signalled by one submission and consumed by at most one wait.
//! - [`Fence`] lets the CPU observe completion of a submission.
//! - [`SyncObjectPool`] recycles both. Objects are reference counted; an
//!   object goes back to its pool when its last holder releases it.
//! - [`PooledFence`] is an RAII reference to a pooled fence handed to
//!   submit listeners.
//!
//! # Example
//!
//! ```ignore
//! let fence = sync_pool.get_fence()?;
//! // ... submit work signalling fence ...
//! fence.wait(sync_pool.context())?;
//! sync_pool.release_fence(fence);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{FenceHandle, NativeObject, SemaphoreHandle};
use crate::config::SyncTimeout;
use crate::context::DeviceContext;
use crate::error::RhiError;
use crate::pool::{ObjectPool, PoolMode, Poolable, ReferenceCounter};
use crate::types::{PipelineStages, QueueId};

/// Lifecycle of a native handle owned by a pooled object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandleState<H> {
    #[default]
    Uninitialized,
    Live(H),
    Destroyed,
}

impl<H: Copy> HandleState<H> {
    /// The handle, if live.
    pub fn live(&self) -> Option<H> {
        match self {
            Self::Live(handle) => Some(*handle),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct SemaphoreState {
    handle: HandleState<SemaphoreHandle>,
    stage_flags: PipelineStages,
    submitted: bool,
    signal_queue: Option<QueueId>,
}

/// Pooled binary semaphore.
#[derive(Debug, Default)]
pub struct Semaphore {
    refcount: ReferenceCounter,
    state: Mutex<SemaphoreState>,
}

impl Semaphore {
    /// Create a semaphore without a native handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Native semaphore, if live.
    pub fn native(&self) -> Option<SemaphoreHandle> {
        self.state.lock().handle.live()
    }

    pub fn handle_state(&self) -> HandleState<SemaphoreHandle> {
        self.state.lock().handle
    }

    /// Pipeline stages a wait on this semaphore applies to.
    pub fn stage_flags(&self) -> PipelineStages {
        self.state.lock().stage_flags
    }

    pub fn set_stage_flags(&self, stages: PipelineStages) {
        self.state.lock().stage_flags = stages;
    }

    /// Whether a signal is pending and nobody waited on it yet.
    pub fn is_submitted(&self) -> bool {
        self.state.lock().submitted
    }

    /// Queue the pending signal comes from.
    pub fn signal_queue(&self) -> Option<QueueId> {
        self.state.lock().signal_queue
    }

    /// Record that a submission on `queue` will signal this semaphore.
    pub fn mark_in_flight(&self, queue: QueueId) {
        let mut state = self.state.lock();
        if state.submitted {
            log::error!("Semaphore marked in flight twice without a wait");
            debug_assert!(false, "semaphore already in flight");
        }
        state.submitted = true;
        state.signal_queue = Some(queue);
    }

    /// Whether a submission on `waiting_queue` has to wait on this semaphore.
    ///
    /// Same-queue work is ordered by the queue itself and never waits.
    pub fn needs_wait(&self, waiting_queue: QueueId) -> bool {
        let state = self.state.lock();
        state.submitted && state.signal_queue != Some(waiting_queue)
    }

    /// Stage mask a wait on `waiting_queue` would use, without consuming
    /// the signal.
    pub fn pending_wait_stages(&self, waiting_queue: QueueId) -> Option<PipelineStages> {
        let state = self.state.lock();
        if !state.submitted || state.signal_queue == Some(waiting_queue) {
            return None;
        }
        Some(waiting_queue.wait_stages(state.stage_flags))
    }

    /// Consume the pending signal for a wait on `waiting_queue`.
    ///
    /// Returns the stage mask to wait at, or `None` if no wait is needed.
    pub fn consume_signal(&self, waiting_queue: QueueId) -> Option<PipelineStages> {
        let mut state = self.state.lock();
        if !state.submitted || state.signal_queue == Some(waiting_queue) {
            return None;
        }
        state.submitted = false;
        Some(waiting_queue.wait_stages(state.stage_flags))
    }

    pub fn addref(&self) -> i32 {
        self.refcount.addref()
    }

    pub fn release(&self) -> i32 {
        self.refcount.release()
    }

    pub fn refcount(&self) -> i32 {
        self.refcount.count()
    }

    /// Replace the native semaphore with a fresh one and clear all state.
    ///
    /// Binary semaphores cannot be unsignalled from the CPU, so a signal that
    /// was never waited on is discarded together with the old handle.
    pub fn reset(&self, context: &DeviceContext) -> Result<(), RhiError> {
        let mut state = self.state.lock();
        if let HandleState::Live(handle) = state.handle {
            context.backend().destroy_semaphore(handle);
            state.handle = HandleState::Destroyed;
        }
        let handle = context.backend().create_semaphore()?;
        context.name_object(NativeObject::Semaphore(handle), "pooled semaphore");
        state.handle = HandleState::Live(handle);
        state.stage_flags = PipelineStages::empty();
        state.submitted = false;
        state.signal_queue = None;
        Ok(())
    }

    /// Destroy the native semaphore.
    pub fn destroy(&self, context: &DeviceContext) {
        let mut state = self.state.lock();
        if let HandleState::Live(handle) = state.handle {
            context.backend().destroy_semaphore(handle);
        }
        state.handle = HandleState::Destroyed;
    }
}

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

#[derive(Debug, Default)]
struct FenceState {
    handle: HandleState<FenceHandle>,
    signaled: bool,
}

/// Pooled CPU-visible fence.
///
/// Completion is cached: once [`check`](Self::check) observed the signal it
/// keeps returning `true` without asking the backend until the fence is reset.
#[derive(Debug, Default)]
pub struct Fence {
    refcount: ReferenceCounter,
    state: Mutex<FenceState>,
}

impl Fence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Native fence, if live.
    pub fn native(&self) -> Option<FenceHandle> {
        self.state.lock().handle.live()
    }

    pub fn handle_state(&self) -> HandleState<FenceHandle> {
        self.state.lock().handle
    }

    /// Cached status without querying the backend.
    pub fn status(&self) -> FenceStatus {
        if self.state.lock().signaled {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        }
    }

    /// Non-blocking completion query.
    pub fn check(&self, context: &DeviceContext) -> Result<bool, RhiError> {
        let mut state = self.state.lock();
        if state.signaled {
            return Ok(true);
        }
        let Some(handle) = state.handle.live() else {
            return Ok(false);
        };
        if context.backend().fence_status(handle)? {
            state.signaled = true;
        }
        Ok(state.signaled)
    }

    /// Block until the fence signals, bounded by the device's timeout policy.
    pub fn wait(&self, context: &DeviceContext) -> Result<(), RhiError> {
        self.wait_timeout(context, context.sync_timeout())
    }

    /// Block until the fence signals or `timeout` expires.
    pub fn wait_timeout(
        &self,
        context: &DeviceContext,
        timeout: SyncTimeout,
    ) -> Result<(), RhiError> {
        let handle = {
            let state = self.state.lock();
            if state.signaled {
                return Ok(());
            }
            state.handle.live()
        };
        let Some(handle) = handle else {
            log::error!("Waiting on a fence without a native handle");
            debug_assert!(false, "fence has no native handle");
            return Err(RhiError::InvalidParameter(
                "fence has no native handle".to_string(),
            ));
        };

        if context.backend().wait_fence(handle, timeout)? {
            self.state.lock().signaled = true;
            Ok(())
        } else {
            log::warn!("Fence wait timed out after {timeout:?}");
            Err(RhiError::Timeout)
        }
    }

    pub fn addref(&self) -> i32 {
        self.refcount.addref()
    }

    pub fn release(&self) -> i32 {
        self.refcount.release()
    }

    pub fn refcount(&self) -> i32 {
        self.refcount.count()
    }

    /// Create the native fence if missing, otherwise reset it to unsignaled.
    pub fn reset(&self, context: &DeviceContext) -> Result<(), RhiError> {
        let mut state = self.state.lock();
        match state.handle {
            HandleState::Live(handle) => context.backend().reset_fence(handle)?,
            HandleState::Uninitialized | HandleState::Destroyed => {
                let handle = context.backend().create_fence()?;
                context.name_object(NativeObject::Fence(handle), "pooled fence");
                state.handle = HandleState::Live(handle);
            }
        }
        state.signaled = false;
        Ok(())
    }

    /// Destroy the native fence.
    pub fn destroy(&self, context: &DeviceContext) {
        let mut state = self.state.lock();
        if let HandleState::Live(handle) = state.handle {
            context.backend().destroy_fence(handle);
        }
        state.handle = HandleState::Destroyed;
    }
}

impl Poolable<DeviceContext> for Arc<Semaphore> {
    fn create(_context: &DeviceContext) -> Result<Self, RhiError> {
        Ok(Arc::new(Semaphore::new()))
    }

    fn reset(&mut self, context: &DeviceContext) -> Result<(), RhiError> {
        Semaphore::reset(self, context)
    }

    fn destroy(&mut self, context: &DeviceContext) {
        Semaphore::destroy(self, context)
    }
}

impl Poolable<DeviceContext> for Arc<Fence> {
    fn create(_context: &DeviceContext) -> Result<Self, RhiError> {
        Ok(Arc::new(Fence::new()))
    }

    fn reset(&mut self, context: &DeviceContext) -> Result<(), RhiError> {
        Fence::reset(self, context)
    }

    fn destroy(&mut self, context: &DeviceContext) {
        Fence::destroy(self, context)
    }
}

/// Allocation counters of a [`SyncObjectPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncPoolStats {
    pub semaphores_allocated: usize,
    pub semaphores_outstanding: usize,
    pub fences_allocated: usize,
    pub fences_outstanding: usize,
}

/// Pool of reference-counted semaphores and fences shared by all queues.
pub struct SyncObjectPool {
    context: Arc<DeviceContext>,
    semaphores: Mutex<ObjectPool<DeviceContext, Arc<Semaphore>>>,
    fences: Mutex<ObjectPool<DeviceContext, Arc<Fence>>>,
}

impl SyncObjectPool {
    /// Create the pools. `config.max_sync_objects` selects fixed pools.
    pub fn new(context: Arc<DeviceContext>) -> Result<Self, RhiError> {
        let mode = match context.config().max_sync_objects {
            Some(capacity) => PoolMode::Fixed { capacity },
            None => PoolMode::Growable,
        };
        log::debug!("Creating sync object pool ({mode:?})");
        Ok(Self {
            semaphores: Mutex::new(ObjectPool::new(context.clone(), mode)?),
            fences: Mutex::new(ObjectPool::new(context.clone(), mode)?),
            context,
        })
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.context
    }

    /// Take a semaphore with a reference count of one and the given wait stages.
    pub fn get_semaphore(&self, stages: PipelineStages) -> Result<Arc<Semaphore>, RhiError> {
        let semaphore = self
            .semaphores
            .lock()
            .get()?
            .ok_or(RhiError::PoolExhausted)?;
        let count = semaphore.addref();
        debug_assert_eq!(count, 1, "pooled semaphore was still referenced");
        semaphore.set_stage_flags(stages);
        Ok(semaphore)
    }

    /// Take a fence with a reference count of one.
    pub fn get_fence(&self) -> Result<Arc<Fence>, RhiError> {
        let fence = self.fences.lock().get()?.ok_or(RhiError::PoolExhausted)?;
        let count = fence.addref();
        debug_assert_eq!(count, 1, "pooled fence was still referenced");
        Ok(fence)
    }

    /// Drop one reference; the semaphore returns to the pool at zero.
    pub fn release_semaphore(&self, semaphore: Arc<Semaphore>) {
        if semaphore.release() == 0
            && let Err(e) = self.semaphores.lock().retire(semaphore)
        {
            log::error!("Failed to recycle semaphore: {e}");
        }
    }

    /// Drop one reference; the fence returns to the pool at zero.
    pub fn release_fence(&self, fence: Arc<Fence>) {
        if fence.release() == 0
            && let Err(e) = self.fences.lock().retire(fence)
        {
            log::error!("Failed to recycle fence: {e}");
        }
    }

    pub fn stats(&self) -> SyncPoolStats {
        let semaphores = self.semaphores.lock();
        let fences = self.fences.lock();
        SyncPoolStats {
            semaphores_allocated: semaphores.num_objects_allocated(),
            semaphores_outstanding: semaphores.num_objects_outstanding(),
            fences_allocated: fences.num_objects_allocated(),
            fences_outstanding: fences.num_objects_outstanding(),
        }
    }
}

impl std::fmt::Debug for SyncObjectPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncObjectPool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// One reference to a pooled fence, released when dropped.
pub struct PooledFence {
    pool: Arc<SyncObjectPool>,
    fence: Option<Arc<Fence>>,
}

impl PooledFence {
    /// Take an additional reference to `fence`.
    pub fn new(pool: Arc<SyncObjectPool>, fence: Arc<Fence>) -> Self {
        fence.addref();
        Self {
            pool,
            fence: Some(fence),
        }
    }

    pub fn fence(&self) -> Option<&Arc<Fence>> {
        self.fence.as_ref()
    }

    /// Whether the GPU finished the submission this fence belongs to.
    pub fn is_signaled(&self) -> Result<bool, RhiError> {
        match &self.fence {
            Some(fence) => fence.check(self.pool.context()),
            None => Ok(true),
        }
    }

    /// Block until the fence signals, bounded by the device's timeout policy.
    pub fn wait(&self) -> Result<(), RhiError> {
        match &self.fence {
            Some(fence) => fence.wait(self.pool.context()),
            None => Ok(()),
        }
    }

    /// Whether both guards reference the same fence.
    pub fn same_fence(&self, other: &Arc<Fence>) -> bool {
        self.fence.as_ref().is_some_and(|f| Arc::ptr_eq(f, other))
    }
}

impl Clone for PooledFence {
    fn clone(&self) -> Self {
        match &self.fence {
            Some(fence) => Self::new(self.pool.clone(), fence.clone()),
            None => Self {
                pool: self.pool.clone(),
                fence: None,
            },
        }
    }
}

impl Drop for PooledFence {
    fn drop(&mut self) {
        if let Some(fence) = self.fence.take() {
            self.pool.release_fence(fence);
        }
    }
}

impl std::fmt::Debug for PooledFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledFence")
            .field("fence", &self.fence.as_ref().and_then(|f| f.native()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, GpuBackend, NativeSubmit};
    use crate::config::DeviceConfig;
    use crate::memory::DeviceAllocator;

    fn pool_with(config: DeviceConfig) -> (Arc<DummyBackend>, Arc<SyncObjectPool>) {
        let backend = Arc::new(DummyBackend::new());
        let context = Arc::new(DeviceContext::new(
            backend.clone(),
            config,
            Arc::new(DeviceAllocator),
        ));
        (backend, Arc::new(SyncObjectPool::new(context).unwrap()))
    }

    fn submit_signalling(backend: &DummyBackend, fence: &Fence) {
        let pool = backend.create_command_pool(QueueId::Graphics).unwrap();
        let command_buffer = backend.allocate_command_buffer(pool).unwrap();
        backend.begin_command_buffer(command_buffer).unwrap();
        backend.end_command_buffer(command_buffer).unwrap();
        backend
            .submit(
                QueueId::Graphics,
                &NativeSubmit {
                    command_buffers: vec![command_buffer],
                    fence: fence.native(),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_semaphore_refcount_returns_to_pool() {
        let (backend, pool) = pool_with(DeviceConfig::default());
        let semaphore = pool.get_semaphore(PipelineStages::TRANSFER).unwrap();
        assert_eq!(semaphore.refcount(), 1);
        assert_eq!(semaphore.stage_flags(), PipelineStages::TRANSFER);

        semaphore.addref();
        pool.release_semaphore(semaphore.clone());
        assert_eq!(pool.stats().semaphores_outstanding, 1);

        pool.release_semaphore(semaphore);
        assert_eq!(pool.stats().semaphores_outstanding, 0);
        assert_eq!(pool.stats().semaphores_allocated, 1);
        assert_eq!(backend.live_semaphores(), 1);
    }

    #[test]
    fn test_semaphore_reset_recreates_handle() {
        let (_backend, pool) = pool_with(DeviceConfig::default());
        let semaphore = pool.get_semaphore(PipelineStages::ALL_GRAPHICS).unwrap();
        let first = semaphore.native();
        semaphore.mark_in_flight(QueueId::Graphics);

        pool.release_semaphore(semaphore);
        let semaphore = pool.get_semaphore(PipelineStages::TRANSFER).unwrap();
        assert_ne!(semaphore.native(), first);
        assert!(!semaphore.is_submitted());
        assert_eq!(semaphore.signal_queue(), None);
        pool.release_semaphore(semaphore);
    }

    #[test]
    fn test_consume_signal_only_across_queues() {
        let semaphore = Semaphore::new();
        semaphore.set_stage_flags(PipelineStages::ALL_GRAPHICS);
        semaphore.mark_in_flight(QueueId::Graphics);

        assert!(!semaphore.needs_wait(QueueId::Graphics));
        assert_eq!(semaphore.consume_signal(QueueId::Graphics), None);

        // compute cannot wait at graphics stages
        assert_eq!(
            semaphore.consume_signal(QueueId::Compute),
            Some(PipelineStages::ALL_COMMANDS)
        );
        assert!(!semaphore.is_submitted());
        assert_eq!(semaphore.consume_signal(QueueId::Transfer), None);
    }

    #[test]
    fn test_fence_check_is_monotonic() {
        let (backend, pool) = pool_with(DeviceConfig::default());
        let fence = pool.get_fence().unwrap();
        let context = pool.context().clone();
        assert!(!fence.check(&context).unwrap());

        submit_signalling(&backend, &fence);
        assert!(!fence.check(&context).unwrap());

        backend.complete_all().unwrap();
        assert!(fence.check(&context).unwrap());
        assert_eq!(fence.status(), FenceStatus::Signaled);
        assert!(fence.check(&context).unwrap());

        Fence::reset(&fence, &context).unwrap();
        assert!(!fence.check(&context).unwrap());
        pool.release_fence(fence);
    }

    #[test]
    fn test_fence_wait_times_out_on_hung_gpu() {
        let (backend, pool) = pool_with(DeviceConfig::default());
        let fence = pool.get_fence().unwrap();
        submit_signalling(&backend, &fence);

        backend.set_hung(true);
        assert_eq!(fence.wait(pool.context()), Err(RhiError::Timeout));

        backend.set_hung(false);
        fence.wait(pool.context()).unwrap();
        assert_eq!(fence.status(), FenceStatus::Signaled);
        pool.release_fence(fence);
    }

    #[test]
    fn test_fixed_pool_exhaustion() {
        let (_backend, pool) = pool_with(DeviceConfig::default().with_max_sync_objects(1));
        let fence = pool.get_fence().unwrap();
        assert_eq!(pool.get_fence().unwrap_err(), RhiError::PoolExhausted);
        pool.release_fence(fence);
        let fence = pool.get_fence().unwrap();
        pool.release_fence(fence);
    }

    #[test]
    fn test_pooled_fence_releases_on_drop() {
        let (_backend, pool) = pool_with(DeviceConfig::default());
        let fence = pool.get_fence().unwrap();
        let guard = PooledFence::new(pool.clone(), fence.clone());
        let copy = guard.clone();
        assert_eq!(fence.refcount(), 3);

        pool.release_fence(fence);
        drop(guard);
        assert_eq!(pool.stats().fences_outstanding, 1);
        drop(copy);
        assert_eq!(pool.stats().fences_outstanding, 0);
    }
}
