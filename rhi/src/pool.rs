//! Reference counting and object pooling for short-lived GPU objects.
//!
//! Semaphores, fences and command buffers are needed every frame. Creating
//! native objects that often is expensive, so they are recycled through an
//! [`ObjectPool`]. Objects shared between several pending waits carry a
//! [`ReferenceCounter`] and only return to their pool when the last holder
//! releases them.
//!
//! # Example
//!
//! ```ignore
//! let mut pool = ObjectPool::new(context, PoolMode::Growable);
//! let fence = pool.get()?.ok_or(RhiError::PoolExhausted)?;
//! // ... use the fence ...
//! pool.retire(fence)?;
//! assert_eq!(pool.num_objects_outstanding(), 0);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::RhiError;

/// Manual reference count for pooled objects.
///
/// Starts at zero. Not `Clone`: one counter is one logical object identity.
#[derive(Debug, Default)]
pub struct ReferenceCounter {
    refcount: AtomicI32,
}

impl ReferenceCounter {
    /// Create a counter at zero.
    pub const fn new() -> Self {
        Self {
            refcount: AtomicI32::new(0),
        }
    }

    /// Increment and return the new count.
    pub fn addref(&self) -> i32 {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement and return the new count.
    ///
    /// Releasing a counter that is already zero is a contract violation. It
    /// asserts in debug builds; in release builds the count stays at zero and
    /// `-1` is returned so callers never treat it as a drop to zero.
    pub fn release(&self) -> i32 {
        let previous = self
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count > 0).then(|| count - 1)
            });
        match previous {
            Ok(count) => count - 1,
            Err(_) => {
                log::error!("ReferenceCounter::release called on a zero refcount");
                debug_assert!(false, "reference count underflow");
                -1
            }
        }
    }

    /// Current count.
    pub fn count(&self) -> i32 {
        self.refcount.load(Ordering::Acquire)
    }
}

/// An object that can live in an [`ObjectPool`].
pub trait Poolable<C>: Sized {
    /// Construct a new object. Native state may be deferred to [`reset`](Self::reset).
    fn create(context: &C) -> Result<Self, RhiError>;

    /// Bring the object into a clean, reusable state.
    fn reset(&mut self, context: &C) -> Result<(), RhiError>;

    /// Release native state. Called once, when the object leaves the pool for good.
    fn destroy(&mut self, context: &C);
}

/// Whether a pool may construct new objects on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PoolMode {
    /// Construct a new object whenever the pool is empty.
    #[default]
    Growable,
    /// Preallocate `capacity` objects and never construct more.
    Fixed { capacity: usize },
}

/// Reuse pool for GPU helper objects.
///
/// Not thread-safe; owners wrap it in a mutex when it is shared.
pub struct ObjectPool<C, T: Poolable<C>> {
    context: Arc<C>,
    mode: PoolMode,
    idle: Vec<T>,
    objects_allocated: usize,
}

impl<C, T: Poolable<C>> ObjectPool<C, T> {
    /// Create a pool. Fixed pools construct all of their objects immediately.
    pub fn new(context: Arc<C>, mode: PoolMode) -> Result<Self, RhiError> {
        let mut pool = Self {
            context,
            mode,
            idle: Vec::new(),
            objects_allocated: 0,
        };

        if let PoolMode::Fixed { capacity } = mode {
            pool.idle.reserve_exact(capacity);
            for _ in 0..capacity {
                let object = pool.construct()?;
                pool.idle.push(object);
            }
        }

        Ok(pool)
    }

    /// Take an object from the pool.
    ///
    /// Returns `Ok(None)` only when the pool is fixed and every object is
    /// checked out; the caller has to retire work before asking again.
    pub fn get(&mut self) -> Result<Option<T>, RhiError> {
        if let Some(object) = self.idle.pop() {
            return Ok(Some(object));
        }

        match self.mode {
            PoolMode::Growable => self.construct().map(Some),
            PoolMode::Fixed { .. } => Ok(None),
        }
    }

    /// Reset an object and return it to the pool.
    ///
    /// If the reset fails the object is destroyed instead and stops counting
    /// as allocated.
    pub fn retire(&mut self, mut object: T) -> Result<(), RhiError> {
        match object.reset(&self.context) {
            Ok(()) => {
                self.idle.push(object);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to reset pooled object, destroying it: {e}");
                object.destroy(&self.context);
                self.objects_allocated -= 1;
                Err(e)
            }
        }
    }

    /// Total number of objects created by this pool and still alive.
    pub fn num_objects_allocated(&self) -> usize {
        self.objects_allocated
    }

    /// Number of objects currently checked out.
    pub fn num_objects_outstanding(&self) -> usize {
        self.objects_allocated - self.idle.len()
    }

    /// Number of objects waiting in the pool.
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Construction mode.
    pub fn mode(&self) -> PoolMode {
        self.mode
    }

    /// Shared context passed to every object.
    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    fn construct(&mut self) -> Result<T, RhiError> {
        let mut object = T::create(&self.context)?;
        if let Err(e) = object.reset(&self.context) {
            object.destroy(&self.context);
            return Err(e);
        }
        self.objects_allocated += 1;
        Ok(object)
    }
}

impl<C, T: Poolable<C>> Drop for ObjectPool<C, T> {
    fn drop(&mut self) {
        let outstanding = self.num_objects_outstanding();
        if outstanding > 0 {
            log::warn!(
                "Object pool dropped with {} of {} objects still checked out",
                outstanding,
                self.objects_allocated
            );
        }

        for mut object in self.idle.drain(..) {
            object.destroy(&self.context);
        }
    }
}
