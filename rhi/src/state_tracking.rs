//! Resource state tracking and automatic barrier placement.
//!
//! Each command list owns a [`ResourceStateTracker`]. Commands declare the
//! state they need a resource in; the tracker compares it with the state the
//! resource was last left in and queues a barrier when they differ. Queued
//! barriers are flushed as one [`NativeCommand::PipelineBarrier`] by
//! [`ResourceStateTracker::commit_barriers`].
//!
//! # Rules
//!
//! - Buffers the CPU maps never transition.
//! - The first use of a resource starts from its initial state when it keeps
//!   one, and from the unknown state otherwise.
//! - A resource that stays in unordered access gets a UAV barrier between
//!   uses while UAV barriers are enabled. With UAV barriers disabled only the
//!   first one is placed.
//! - Requiring another state for a buffer that already has a queued barrier
//!   widens that barrier instead of adding a second one. A texture's queued
//!   barrier is retargeted to the new state.
//! - [`keep_initial_states`](ResourceStateTracker::keep_initial_states)
//!   returns resources created with `keep_initial_state` to their initial
//!   state before the command list is closed.

use indexmap::IndexMap;

use crate::backend::{
    BufferHandle, NativeBufferBarrier, NativeCommand, NativeTextureBarrier, TextureHandle,
};
use crate::profile_function;
use crate::resources::{Buffer, Texture};
use crate::types::{
    Format, ResourceId, ResourceStates, TextureSubresourceSet, convert_resource_state,
};

#[derive(Debug, Clone, Copy)]
struct BufferTracking {
    native: BufferHandle,
    state: ResourceStates,
    initial_state: ResourceStates,
    keep_initial_state: bool,
    first_uav_barrier_placed: bool,
}

#[derive(Debug, Clone, Copy)]
struct TextureTracking {
    native: TextureHandle,
    format: Format,
    subresources: TextureSubresourceSet,
    state: ResourceStates,
    initial_state: ResourceStates,
    keep_initial_state: bool,
    first_uav_barrier_placed: bool,
}

/// A queued buffer transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    pub id: ResourceId,
    pub buffer: BufferHandle,
    pub before: ResourceStates,
    pub after: ResourceStates,
}

/// A queued texture transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBarrier {
    pub id: ResourceId,
    pub texture: TextureHandle,
    pub format: Format,
    pub subresources: TextureSubresourceSet,
    pub before: ResourceStates,
    pub after: ResourceStates,
}

/// Per-command-list resource states and pending barriers.
#[derive(Debug)]
pub struct ResourceStateTracker {
    enable_uav_barriers: bool,
    buffers: IndexMap<ResourceId, BufferTracking>,
    textures: IndexMap<ResourceId, TextureTracking>,
    buffer_barriers: Vec<BufferBarrier>,
    texture_barriers: Vec<TextureBarrier>,
}

impl ResourceStateTracker {
    pub fn new(enable_uav_barriers: bool) -> Self {
        Self {
            enable_uav_barriers,
            buffers: IndexMap::new(),
            textures: IndexMap::new(),
            buffer_barriers: Vec::new(),
            texture_barriers: Vec::new(),
        }
    }

    pub fn set_enable_uav_barriers(&mut self, enabled: bool) {
        self.enable_uav_barriers = enabled;
        if enabled {
            for tracking in self.buffers.values_mut() {
                tracking.first_uav_barrier_placed = false;
            }
            for tracking in self.textures.values_mut() {
                tracking.first_uav_barrier_placed = false;
            }
        }
    }

    pub fn uav_barriers_enabled(&self) -> bool {
        self.enable_uav_barriers
    }

    /// Forget every state and pending barrier.
    pub fn clear(&mut self) {
        self.buffers.clear();
        self.textures.clear();
        self.buffer_barriers.clear();
        self.texture_barriers.clear();
    }

    /// Declare the state a buffer is in without placing a barrier.
    pub fn begin_tracking_buffer_state(&mut self, buffer: &Buffer, state: ResourceStates) {
        let tracking = self.buffer_tracking(buffer);
        tracking.state = state;
    }

    /// Declare the state a texture is in without placing a barrier.
    pub fn begin_tracking_texture_state(&mut self, texture: &Texture, state: ResourceStates) {
        let tracking = self.texture_tracking(texture);
        tracking.state = state;
    }

    /// Last known state of a buffer, if tracked.
    pub fn buffer_state(&self, id: ResourceId) -> Option<ResourceStates> {
        self.buffers.get(&id).map(|t| t.state)
    }

    /// Last known state of a texture, if tracked.
    pub fn texture_state(&self, id: ResourceId) -> Option<ResourceStates> {
        self.textures.get(&id).map(|t| t.state)
    }

    /// Make `buffer` usable in `state`, queueing a barrier when needed.
    pub fn require_buffer_state(&mut self, buffer: &Buffer, state: ResourceStates) {
        if buffer.is_cpu_accessible() {
            return;
        }
        self.buffer_tracking(buffer);
        self.transition_buffer(buffer.id(), state);
    }

    /// Make the whole `texture` usable in `state`, queueing a barrier when needed.
    pub fn require_texture_state(&mut self, texture: &Texture, state: ResourceStates) {
        self.texture_tracking(texture);
        self.transition_texture(texture.id(), state);
    }

    /// Queue transitions back to the initial state of every resource that keeps one.
    pub fn keep_initial_states(&mut self) {
        let buffers: Vec<_> = self
            .buffers
            .iter()
            .filter(|(_, t)| t.keep_initial_state && t.state != t.initial_state)
            .map(|(id, t)| (*id, t.initial_state))
            .collect();
        for (id, state) in buffers {
            self.transition_buffer(id, state);
        }

        let textures: Vec<_> = self
            .textures
            .iter()
            .filter(|(_, t)| t.keep_initial_state && t.state != t.initial_state)
            .map(|(id, t)| (*id, t.initial_state))
            .collect();
        for (id, state) in textures {
            self.transition_texture(id, state);
        }
    }

    pub fn buffer_barriers(&self) -> &[BufferBarrier] {
        &self.buffer_barriers
    }

    pub fn texture_barriers(&self) -> &[TextureBarrier] {
        &self.texture_barriers
    }

    pub fn has_pending_barriers(&self) -> bool {
        !self.buffer_barriers.is_empty() || !self.texture_barriers.is_empty()
    }

    /// Drain pending barriers into one native barrier command.
    pub fn commit_barriers(&mut self) -> Option<NativeCommand> {
        profile_function!();

        if !self.has_pending_barriers() {
            return None;
        }
        let buffers = self
            .buffer_barriers
            .drain(..)
            .map(|b| NativeBufferBarrier {
                buffer: b.buffer,
                before: convert_resource_state(b.before),
                after: convert_resource_state(b.after),
            })
            .collect();
        let textures = self
            .texture_barriers
            .drain(..)
            .map(|b| NativeTextureBarrier {
                texture: b.texture,
                format: b.format,
                subresources: b.subresources,
                before: convert_resource_state(b.before),
                after: convert_resource_state(b.after),
            })
            .collect();
        Some(NativeCommand::PipelineBarrier { buffers, textures })
    }

    fn buffer_tracking(&mut self, buffer: &Buffer) -> &mut BufferTracking {
        let desc = buffer.descriptor();
        self.buffers.entry(buffer.id()).or_insert_with(|| {
            let state = if desc.keep_initial_state {
                desc.initial_state
            } else {
                ResourceStates::UNKNOWN
            };
            BufferTracking {
                native: buffer.native(),
                state,
                initial_state: desc.initial_state,
                keep_initial_state: desc.keep_initial_state,
                first_uav_barrier_placed: false,
            }
        })
    }

    fn texture_tracking(&mut self, texture: &Texture) -> &mut TextureTracking {
        let desc = texture.descriptor();
        self.textures.entry(texture.id()).or_insert_with(|| {
            let state = if desc.keep_initial_state {
                desc.initial_state
            } else {
                ResourceStates::UNKNOWN
            };
            TextureTracking {
                native: texture.native(),
                format: desc.format,
                subresources: TextureSubresourceSet::ALL.resolve(desc, false),
                state,
                initial_state: desc.initial_state,
                keep_initial_state: desc.keep_initial_state,
                first_uav_barrier_placed: false,
            }
        })
    }

    fn transition_buffer(&mut self, id: ResourceId, state: ResourceStates) {
        let enable_uav_barriers = self.enable_uav_barriers;
        let Some(tracking) = self.buffers.get_mut(&id) else {
            return;
        };
        if tracking.state == ResourceStates::UNKNOWN {
            log::error!(
                "Buffer {id:?} has an unknown state; call begin_tracking_buffer_state or create it with an initial state"
            );
        }

        let transition_necessary = !tracking.state.contains(state);
        let uav_necessary = state.contains(ResourceStates::UNORDERED_ACCESS)
            && tracking.state.contains(ResourceStates::UNORDERED_ACCESS)
            && (enable_uav_barriers || !tracking.first_uav_barrier_placed);

        if transition_necessary
            && let Some(barrier) = self.buffer_barriers.iter_mut().find(|b| b.id == id)
        {
            barrier.after |= state;
            tracking.state = barrier.after;
            return;
        }

        if transition_necessary || uav_necessary {
            self.buffer_barriers.push(BufferBarrier {
                id,
                buffer: tracking.native,
                before: tracking.state,
                after: state,
            });
            if uav_necessary && !transition_necessary {
                tracking.first_uav_barrier_placed = true;
            }
        }
        if transition_necessary {
            tracking.state = state;
        }
    }

    fn transition_texture(&mut self, id: ResourceId, state: ResourceStates) {
        let enable_uav_barriers = self.enable_uav_barriers;
        let Some(tracking) = self.textures.get_mut(&id) else {
            return;
        };
        if tracking.state == ResourceStates::UNKNOWN {
            log::error!(
                "Texture {id:?} has an unknown state; call begin_tracking_texture_state or create it with an initial state"
            );
        }

        let transition_necessary = tracking.state != state;
        let uav_necessary = state.contains(ResourceStates::UNORDERED_ACCESS)
            && tracking.state.contains(ResourceStates::UNORDERED_ACCESS)
            && (enable_uav_barriers || !tracking.first_uav_barrier_placed);

        if transition_necessary
            && let Some(barrier) = self.texture_barriers.iter_mut().find(|b| b.id == id)
        {
            barrier.after = state;
            tracking.state = state;
            return;
        }

        if transition_necessary || uav_necessary {
            self.texture_barriers.push(TextureBarrier {
                id,
                texture: tracking.native,
                format: tracking.format,
                subresources: tracking.subresources,
                before: tracking.state,
                after: state,
            });
            if uav_necessary && !transition_necessary {
                tracking.first_uav_barrier_placed = true;
            }
        }
        tracking.state = state;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::DummyBackend;
    use crate::config::DeviceConfig;
    use crate::context::DeviceContext;
    use crate::memory::DeviceAllocator;
    use crate::sync::SyncObjectPool;
    use crate::types::{BufferDescriptor, BufferUsage, CpuAccessMode, TextureDescriptor, TextureUsage};

    struct Fixture {
        context: Arc<DeviceContext>,
        sync_pool: Arc<SyncObjectPool>,
    }

    fn fixture() -> Fixture {
        let context = Arc::new(DeviceContext::new(
            Arc::new(DummyBackend::new()),
            DeviceConfig::default(),
            Arc::new(DeviceAllocator),
        ));
        let sync_pool = Arc::new(SyncObjectPool::new(context.clone()).unwrap());
        Fixture { context, sync_pool }
    }

    impl Fixture {
        fn buffer(&self, desc: BufferDescriptor) -> Arc<Buffer> {
            Buffer::create(self.context.clone(), self.sync_pool.clone(), &desc).unwrap()
        }

        fn texture(&self, desc: TextureDescriptor) -> Arc<Texture> {
            Texture::create(self.context.clone(), self.sync_pool.clone(), &desc).unwrap()
        }
    }

    fn storage_buffer() -> BufferDescriptor {
        BufferDescriptor::new(256, BufferUsage::UNORDERED_ACCESS | BufferUsage::COPY_DST)
            .with_initial_state(ResourceStates::COPY_DEST)
    }

    #[test]
    fn test_transition_from_initial_state() {
        let f = fixture();
        let buffer = f.buffer(storage_buffer());
        let mut tracker = ResourceStateTracker::new(true);

        tracker.require_buffer_state(&buffer, ResourceStates::UNORDERED_ACCESS);
        assert_eq!(tracker.buffer_barriers().len(), 1);
        assert_eq!(tracker.buffer_barriers()[0].before, ResourceStates::COPY_DEST);
        assert_eq!(
            tracker.buffer_barriers()[0].after,
            ResourceStates::UNORDERED_ACCESS
        );
    }

    #[test]
    fn test_same_state_needs_no_barrier() {
        let f = fixture();
        let buffer = f.buffer(storage_buffer());
        let mut tracker = ResourceStateTracker::new(true);

        tracker.require_buffer_state(&buffer, ResourceStates::COPY_DEST);
        assert!(!tracker.has_pending_barriers());
    }

    #[test]
    fn test_cpu_accessible_buffers_never_transition() {
        let f = fixture();
        let buffer = f.buffer(
            BufferDescriptor::new(64, BufferUsage::COPY_DST).with_cpu_access(CpuAccessMode::Read),
        );
        let mut tracker = ResourceStateTracker::new(true);

        tracker.require_buffer_state(&buffer, ResourceStates::COPY_DEST);
        assert!(!tracker.has_pending_barriers());
        assert_eq!(tracker.buffer_state(buffer.id()), None);
    }

    #[test]
    fn test_uav_barriers_between_uav_uses() {
        let f = fixture();
        let buffer = f.buffer(storage_buffer());
        let mut tracker = ResourceStateTracker::new(true);

        tracker.require_buffer_state(&buffer, ResourceStates::UNORDERED_ACCESS);
        tracker.commit_barriers();
        tracker.require_buffer_state(&buffer, ResourceStates::UNORDERED_ACCESS);
        assert_eq!(tracker.buffer_barriers().len(), 1);
        tracker.commit_barriers();
        tracker.require_buffer_state(&buffer, ResourceStates::UNORDERED_ACCESS);
        assert_eq!(tracker.buffer_barriers().len(), 1);
    }

    #[test]
    fn test_only_first_uav_barrier_when_disabled() {
        let f = fixture();
        let buffer = f.buffer(storage_buffer());
        let mut tracker = ResourceStateTracker::new(false);

        tracker.require_buffer_state(&buffer, ResourceStates::UNORDERED_ACCESS);
        tracker.commit_barriers();
        tracker.require_buffer_state(&buffer, ResourceStates::UNORDERED_ACCESS);
        assert_eq!(tracker.buffer_barriers().len(), 1);
        tracker.commit_barriers();
        tracker.require_buffer_state(&buffer, ResourceStates::UNORDERED_ACCESS);
        assert!(!tracker.has_pending_barriers());
    }

    #[test]
    fn test_pending_buffer_barrier_is_widened() {
        let f = fixture();
        let buffer = f.buffer(
            BufferDescriptor::new(64, BufferUsage::VERTEX | BufferUsage::INDEX)
                .with_initial_state(ResourceStates::COPY_DEST),
        );
        let mut tracker = ResourceStateTracker::new(true);

        tracker.require_buffer_state(&buffer, ResourceStates::VERTEX_BUFFER);
        tracker.require_buffer_state(&buffer, ResourceStates::INDEX_BUFFER);
        assert_eq!(tracker.buffer_barriers().len(), 1);
        assert_eq!(
            tracker.buffer_barriers()[0].after,
            ResourceStates::VERTEX_BUFFER | ResourceStates::INDEX_BUFFER
        );
        assert_eq!(
            tracker.buffer_state(buffer.id()),
            Some(ResourceStates::VERTEX_BUFFER | ResourceStates::INDEX_BUFFER)
        );
    }

    #[test]
    fn test_keep_initial_states() {
        let f = fixture();
        let texture = f.texture(
            TextureDescriptor::new_2d(
                8,
                8,
                Format::Rgba8Unorm,
                TextureUsage::SHADER_RESOURCE | TextureUsage::COPY_DST,
            )
            .with_initial_state(ResourceStates::SHADER_RESOURCE),
        );
        let mut tracker = ResourceStateTracker::new(true);

        tracker.require_texture_state(&texture, ResourceStates::COPY_DEST);
        tracker.commit_barriers();
        tracker.keep_initial_states();
        let barriers = tracker.texture_barriers();
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].before, ResourceStates::COPY_DEST);
        assert_eq!(barriers[0].after, ResourceStates::SHADER_RESOURCE);
        assert_eq!(barriers[0].subresources, TextureSubresourceSet::new(0, 1, 0, 1));
    }

    #[test]
    fn test_begin_tracking_overrides_state() {
        let f = fixture();
        let texture = f.texture(TextureDescriptor::new_2d(
            4,
            4,
            Format::Rgba8Unorm,
            TextureUsage::COPY_DST,
        ));
        let mut tracker = ResourceStateTracker::new(true);

        tracker.begin_tracking_texture_state(&texture, ResourceStates::COPY_DEST);
        tracker.require_texture_state(&texture, ResourceStates::COPY_DEST);
        assert!(!tracker.has_pending_barriers());
        assert_eq!(
            tracker.texture_state(texture.id()),
            Some(ResourceStates::COPY_DEST)
        );
    }

    #[test]
    fn test_commit_converts_states() {
        let f = fixture();
        let buffer = f.buffer(storage_buffer());
        let mut tracker = ResourceStateTracker::new(true);

        tracker.require_buffer_state(&buffer, ResourceStates::COPY_SOURCE);
        let Some(NativeCommand::PipelineBarrier { buffers, textures }) = tracker.commit_barriers()
        else {
            panic!("expected a barrier");
        };
        assert!(textures.is_empty());
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].after, convert_resource_state(ResourceStates::COPY_SOURCE));
        assert!(tracker.commit_barriers().is_none());
    }
}
