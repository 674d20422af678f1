//! In-flight submission records.

use std::sync::Arc;

use smallvec::SmallVec;

use super::TrackedCommandBuffer;
use crate::backend::NativeSubmit;
use crate::sync::{Fence, Semaphore};

/// Semaphores a submission waits on. Most submissions wait on a handful.
pub type WaitSemaphores = SmallVec<[Arc<Semaphore>; 4]>;

/// A submitted command buffer and the sync objects it holds references to.
///
/// Lives in its queue's in-flight list until the fence signals and the
/// queue retires it.
#[derive(Debug)]
pub struct CommandBufferSubmission {
    pub id: u64,
    pub command_buffer: TrackedCommandBuffer,
    pub native: NativeSubmit,
    pub wait_semaphores: WaitSemaphores,
    /// Signalled on completion when the command buffer touched resources.
    pub completion_semaphore: Option<Arc<Semaphore>>,
    pub fence: Arc<Fence>,
}
