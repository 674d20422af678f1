//! Device memory: the per-resource synchronization slots and the allocator.
//!
//! Every buffer and texture embeds a [`MemoryResource`]. It records where the
//! resource's memory lives and which semaphores and fences protect the last
//! GPU read and write of it.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{BufferHandle, MemoryHandle, NativeObject, TextureHandle};
use crate::context::DeviceContext;
use crate::error::RhiError;
use crate::sync::{Fence, Semaphore, SyncObjectPool};
use crate::types::{CpuAccessMode, MemoryPropertyFlags, ResourceId};

/// Which access a synchronization slot protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncSlot {
    Read,
    Write,
}

#[derive(Debug, Default)]
struct SyncSlots {
    read_semaphore: Option<Arc<Semaphore>>,
    write_semaphore: Option<Arc<Semaphore>>,
    read_fence: Option<Arc<Fence>>,
    write_fence: Option<Arc<Fence>>,
}

impl SyncSlots {
    fn semaphore_mut(&mut self, slot: SyncSlot) -> &mut Option<Arc<Semaphore>> {
        match slot {
            SyncSlot::Read => &mut self.read_semaphore,
            SyncSlot::Write => &mut self.write_semaphore,
        }
    }

    fn fence(&self, slot: SyncSlot) -> Option<&Arc<Fence>> {
        match slot {
            SyncSlot::Read => self.read_fence.as_ref(),
            SyncSlot::Write => self.write_fence.as_ref(),
        }
    }

    fn fence_mut(&mut self, slot: SyncSlot) -> &mut Option<Arc<Fence>> {
        match slot {
            SyncSlot::Read => &mut self.read_fence,
            SyncSlot::Write => &mut self.write_fence,
        }
    }
}

/// Memory binding and synchronization state of a buffer or texture.
pub struct MemoryResource {
    id: ResourceId,
    sync_pool: Arc<SyncObjectPool>,
    managed: bool,
    memory: Option<MemoryHandle>,
    memory_type_index: u32,
    property_flags: MemoryPropertyFlags,
    slots: Mutex<SyncSlots>,
}

impl MemoryResource {
    pub fn new(sync_pool: Arc<SyncObjectPool>) -> Self {
        Self {
            id: ResourceId::next(),
            sync_pool,
            managed: false,
            memory: None,
            memory_type_index: 0,
            property_flags: MemoryPropertyFlags::empty(),
            slots: Mutex::new(SyncSlots::default()),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Whether the memory was allocated by a [`MemoryAllocator`] and must be freed by it.
    pub fn is_managed(&self) -> bool {
        self.managed
    }

    pub fn memory(&self) -> Option<MemoryHandle> {
        self.memory
    }

    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    /// Property flags of the memory type the resource lives in.
    pub fn property_flags(&self) -> MemoryPropertyFlags {
        self.property_flags
    }

    pub fn is_host_visible(&self) -> bool {
        self.property_flags
            .contains(MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// Record a successful allocation. Called by allocators.
    pub fn set_allocation(
        &mut self,
        memory: MemoryHandle,
        memory_type_index: u32,
        property_flags: MemoryPropertyFlags,
    ) {
        self.memory = Some(memory);
        self.memory_type_index = memory_type_index;
        self.property_flags = property_flags;
        self.managed = true;
    }

    /// Hand the memory back for freeing. Called by allocators.
    pub fn take_allocation(&mut self) -> Option<MemoryHandle> {
        self.managed = false;
        self.memory.take()
    }

    pub fn semaphore(&self, slot: SyncSlot) -> Option<Arc<Semaphore>> {
        self.slots.lock().semaphore_mut(slot).clone()
    }

    pub fn fence(&self, slot: SyncSlot) -> Option<Arc<Fence>> {
        self.slots.lock().fence_mut(slot).clone()
    }

    pub fn read_semaphore(&self) -> Option<Arc<Semaphore>> {
        self.semaphore(SyncSlot::Read)
    }

    pub fn write_semaphore(&self) -> Option<Arc<Semaphore>> {
        self.semaphore(SyncSlot::Write)
    }

    pub fn read_fence(&self) -> Option<Arc<Fence>> {
        self.fence(SyncSlot::Read)
    }

    pub fn write_fence(&self) -> Option<Arc<Fence>> {
        self.fence(SyncSlot::Write)
    }

    /// Take a reference to the fence in `slot` while the slot is locked.
    ///
    /// The caller owns the reference and hands it back through
    /// [`SyncObjectPool::release_fence`].
    pub fn acquire_fence(&self, slot: SyncSlot) -> Option<Arc<Fence>> {
        let slots = self.slots.lock();
        let fence = slots.fence(slot)?;
        fence.addref();
        Some(fence.clone())
    }

    /// Put back a semaphore moved out by [`take_semaphore_if`](Self::take_semaphore_if).
    ///
    /// The caller's reference moves into the slot. If a newer semaphore took
    /// the slot in the meantime, the reference is released instead.
    pub fn restore_semaphore(&self, slot: SyncSlot, semaphore: Arc<Semaphore>) {
        let rejected = {
            let mut slots = self.slots.lock();
            let entry = slots.semaphore_mut(slot);
            if entry.is_none() {
                *entry = Some(semaphore);
                None
            } else {
                Some(semaphore)
            }
        };
        if let Some(rejected) = rejected {
            self.sync_pool.release_semaphore(rejected);
        }
    }

    /// Store `semaphore` in `slot`, taking a reference to it and releasing
    /// the previous occupant.
    pub fn set_semaphore(&self, slot: SyncSlot, semaphore: Option<&Arc<Semaphore>>) {
        if let Some(semaphore) = semaphore {
            semaphore.addref();
        }
        let previous = std::mem::replace(
            self.slots.lock().semaphore_mut(slot),
            semaphore.cloned(),
        );
        if let Some(previous) = previous {
            self.sync_pool.release_semaphore(previous);
        }
    }

    /// Store `fence` in `slot`, taking a reference to it and releasing the
    /// previous occupant.
    pub fn set_fence(&self, slot: SyncSlot, fence: Option<&Arc<Fence>>) {
        if let Some(fence) = fence {
            fence.addref();
        }
        let previous = std::mem::replace(self.slots.lock().fence_mut(slot), fence.cloned());
        if let Some(previous) = previous {
            self.sync_pool.release_fence(previous);
        }
    }

    /// Move the semaphore out of `slot` if `predicate` accepts it.
    ///
    /// The slot's reference moves to the caller.
    pub fn take_semaphore_if(
        &self,
        slot: SyncSlot,
        predicate: impl FnOnce(&Arc<Semaphore>) -> bool,
    ) -> Option<Arc<Semaphore>> {
        let mut slots = self.slots.lock();
        let entry = slots.semaphore_mut(slot);
        if entry.as_ref().is_some_and(predicate) {
            entry.take()
        } else {
            None
        }
    }

    /// Clear `slot` if it still holds `semaphore`.
    pub fn clear_semaphore_if(&self, slot: SyncSlot, semaphore: &Arc<Semaphore>) -> bool {
        let removed = self
            .take_semaphore_if(slot, |current| Arc::ptr_eq(current, semaphore));
        match removed {
            Some(removed) => {
                self.sync_pool.release_semaphore(removed);
                true
            }
            None => false,
        }
    }

    /// Clear `slot` if it still holds `fence`.
    pub fn clear_fence_if(&self, slot: SyncSlot, fence: &Arc<Fence>) -> bool {
        let removed = {
            let mut slots = self.slots.lock();
            let entry = slots.fence_mut(slot);
            if entry.as_ref().is_some_and(|current| Arc::ptr_eq(current, fence)) {
                entry.take()
            } else {
                None
            }
        };
        match removed {
            Some(removed) => {
                self.sync_pool.release_fence(removed);
                true
            }
            None => false,
        }
    }

    pub fn sync_pool(&self) -> &Arc<SyncObjectPool> {
        &self.sync_pool
    }
}

impl Drop for MemoryResource {
    fn drop(&mut self) {
        let slots = std::mem::take(self.slots.get_mut());
        for semaphore in [slots.read_semaphore, slots.write_semaphore]
            .into_iter()
            .flatten()
        {
            self.sync_pool.release_semaphore(semaphore);
        }
        for fence in [slots.read_fence, slots.write_fence].into_iter().flatten() {
            self.sync_pool.release_fence(fence);
        }
        if self.managed {
            log::warn!("MemoryResource {:?} dropped with its memory still allocated", self.id);
        }
    }
}

impl std::fmt::Debug for MemoryResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryResource")
            .field("id", &self.id)
            .field("managed", &self.managed)
            .field("memory", &self.memory)
            .field("property_flags", &self.property_flags)
            .finish()
    }
}

/// Strategy for backing buffers and textures with device memory.
pub trait MemoryAllocator: Send + Sync {
    /// Allocate and bind memory for `buffer`.
    fn allocate_buffer_memory(
        &self,
        context: &DeviceContext,
        buffer: BufferHandle,
        cpu_access: CpuAccessMode,
        resource: &mut MemoryResource,
    ) -> Result<(), RhiError>;

    /// Allocate and bind memory for `texture`.
    fn allocate_texture_memory(
        &self,
        context: &DeviceContext,
        texture: TextureHandle,
        resource: &mut MemoryResource,
    ) -> Result<(), RhiError>;

    /// Free memory previously allocated for `resource`.
    fn free_memory(&self, context: &DeviceContext, resource: &mut MemoryResource);
}

/// One dedicated device allocation per resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceAllocator;

impl DeviceAllocator {
    /// Memory properties a buffer with the given CPU access needs.
    pub fn pick_buffer_memory_properties(cpu_access: CpuAccessMode) -> MemoryPropertyFlags {
        match cpu_access {
            CpuAccessMode::None => MemoryPropertyFlags::DEVICE_LOCAL,
            CpuAccessMode::Read | CpuAccessMode::Write => {
                MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_CACHED
            }
        }
    }

    /// Memory properties every texture needs.
    pub fn pick_texture_memory_properties() -> MemoryPropertyFlags {
        MemoryPropertyFlags::DEVICE_LOCAL
    }

    /// First memory type allowed by `type_bits` whose flags contain `required`.
    pub fn find_memory_type(
        context: &DeviceContext,
        type_bits: u32,
        required: MemoryPropertyFlags,
    ) -> Option<u32> {
        context
            .memory_properties()
            .memory_types
            .iter()
            .enumerate()
            .find(|(index, memory_type)| {
                *index < 32
                    && type_bits & (1 << index) != 0
                    && memory_type.property_flags.contains(required)
            })
            .map(|(index, _)| index as u32)
    }

    fn allocate(
        context: &DeviceContext,
        size: u64,
        type_bits: u32,
        required: MemoryPropertyFlags,
        resource: &mut MemoryResource,
    ) -> Result<MemoryHandle, RhiError> {
        let Some(type_index) = Self::find_memory_type(context, type_bits, required) else {
            log::error!(
                "No memory type matches bits {type_bits:#x} with properties {required:?}"
            );
            return Err(RhiError::OutOfMemory);
        };
        let memory = context.backend().allocate_memory(size, type_index)?;
        let flags = context.memory_properties().memory_types[type_index as usize].property_flags;
        resource.set_allocation(memory, type_index, flags);
        context.name_object(NativeObject::Memory(memory), "resource memory");
        log::trace!("Allocated {size} bytes from memory type {type_index}");
        Ok(memory)
    }

    fn undo(context: &DeviceContext, resource: &mut MemoryResource) {
        if let Some(memory) = resource.take_allocation() {
            context.backend().free_memory(memory);
        }
    }
}

impl MemoryAllocator for DeviceAllocator {
    fn allocate_buffer_memory(
        &self,
        context: &DeviceContext,
        buffer: BufferHandle,
        cpu_access: CpuAccessMode,
        resource: &mut MemoryResource,
    ) -> Result<(), RhiError> {
        let requirements = context.backend().buffer_memory_requirements(buffer);
        let required = Self::pick_buffer_memory_properties(cpu_access);
        let memory = Self::allocate(
            context,
            requirements.size,
            requirements.memory_type_bits,
            required,
            resource,
        )?;
        if let Err(e) = context.backend().bind_buffer_memory(buffer, memory, 0) {
            Self::undo(context, resource);
            return Err(e);
        }
        Ok(())
    }

    fn allocate_texture_memory(
        &self,
        context: &DeviceContext,
        texture: TextureHandle,
        resource: &mut MemoryResource,
    ) -> Result<(), RhiError> {
        let requirements = context.backend().texture_memory_requirements(texture);
        let required = Self::pick_texture_memory_properties();
        let memory = Self::allocate(
            context,
            requirements.size,
            requirements.memory_type_bits,
            required,
            resource,
        )?;
        if let Err(e) = context.backend().bind_texture_memory(texture, memory, 0) {
            Self::undo(context, resource);
            return Err(e);
        }
        Ok(())
    }

    fn free_memory(&self, context: &DeviceContext, resource: &mut MemoryResource) {
        if !resource.is_managed() {
            log::error!("Freeing memory of unmanaged resource {:?}", resource.id());
            debug_assert!(false, "free_memory on an unmanaged resource");
            return;
        }
        Self::undo(context, resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, GpuBackend};
    use crate::config::DeviceConfig;
    use crate::types::{BufferDescriptor, BufferUsage, PipelineStages};

    fn setup(backend: DummyBackend) -> (Arc<DummyBackend>, Arc<SyncObjectPool>) {
        let backend = Arc::new(backend);
        let context = Arc::new(DeviceContext::new(
            backend.clone(),
            DeviceConfig::default(),
            Arc::new(DeviceAllocator),
        ));
        (backend, Arc::new(SyncObjectPool::new(context).unwrap()))
    }

    #[test]
    fn test_pick_buffer_memory_properties() {
        assert_eq!(
            DeviceAllocator::pick_buffer_memory_properties(CpuAccessMode::None),
            MemoryPropertyFlags::DEVICE_LOCAL
        );
        for access in [CpuAccessMode::Read, CpuAccessMode::Write] {
            assert_eq!(
                DeviceAllocator::pick_buffer_memory_properties(access),
                MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_CACHED
            );
        }
    }

    #[test]
    fn test_find_memory_type_respects_bits() {
        let (_backend, pool) = setup(DummyBackend::new());
        let context = pool.context();
        let host = MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(DeviceAllocator::find_memory_type(context, 0b111, host), Some(1));
        assert_eq!(DeviceAllocator::find_memory_type(context, 0b100, host), Some(2));
        assert_eq!(DeviceAllocator::find_memory_type(context, 0b001, host), None);
    }

    #[test]
    fn test_allocation_records_flags() {
        let (backend, pool) = setup(DummyBackend::new());
        let context = pool.context().clone();
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::default()))
            .unwrap();
        let mut resource = MemoryResource::new(pool.clone());
        DeviceAllocator
            .allocate_buffer_memory(&context, buffer, CpuAccessMode::Read, &mut resource)
            .unwrap();
        assert!(resource.is_managed());
        assert_eq!(resource.memory_type_index(), 2);
        assert!(resource.is_host_visible());

        DeviceAllocator.free_memory(&context, &mut resource);
        assert!(!resource.is_managed());
        assert_eq!(backend.live_allocations(), 0);
        backend.destroy_buffer(buffer);
    }

    #[test]
    fn test_no_matching_type_is_out_of_memory() {
        // only the device-local type is allowed
        let (backend, pool) = setup(DummyBackend::new().with_buffer_memory_type_bits(0b001));
        let context = pool.context().clone();
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::default()))
            .unwrap();
        let mut resource = MemoryResource::new(pool.clone());
        let result =
            DeviceAllocator.allocate_buffer_memory(&context, buffer, CpuAccessMode::Read, &mut resource);
        assert_eq!(result, Err(RhiError::OutOfMemory));
        assert!(!resource.is_managed());
        assert_eq!(backend.live_allocations(), 0);
        backend.destroy_buffer(buffer);
    }

    #[test]
    fn test_acquired_fence_outlives_slot() {
        let (_backend, pool) = setup(DummyBackend::new());
        let resource = MemoryResource::new(pool.clone());
        let fence = pool.get_fence().unwrap();
        resource.set_fence(SyncSlot::Write, Some(&fence));
        pool.release_fence(fence);

        let held = resource.acquire_fence(SyncSlot::Write).unwrap();
        assert_eq!(held.refcount(), 2);
        assert!(resource.acquire_fence(SyncSlot::Read).is_none());

        // A retire clearing the slot leaves the caller's reference intact
        assert!(resource.clear_fence_if(SyncSlot::Write, &held));
        assert_eq!(held.refcount(), 1);
        assert_eq!(pool.stats().fences_outstanding, 1);

        pool.release_fence(held);
        assert_eq!(pool.stats().fences_outstanding, 0);
    }

    #[test]
    fn test_restore_semaphore_yields_to_newer_occupant() {
        let (_backend, pool) = setup(DummyBackend::new());
        let resource = MemoryResource::new(pool.clone());
        let old = pool.get_semaphore(PipelineStages::TRANSFER).unwrap();
        resource.set_semaphore(SyncSlot::Write, Some(&old));

        let taken = resource.take_semaphore_if(SyncSlot::Write, |_| true).unwrap();
        resource.restore_semaphore(SyncSlot::Write, taken);
        assert!(resource.write_semaphore().is_some_and(|s| Arc::ptr_eq(&s, &old)));

        let taken = resource.take_semaphore_if(SyncSlot::Write, |_| true).unwrap();
        let newer = pool.get_semaphore(PipelineStages::TRANSFER).unwrap();
        resource.set_semaphore(SyncSlot::Write, Some(&newer));
        resource.restore_semaphore(SyncSlot::Write, taken);
        assert!(resource.write_semaphore().is_some_and(|s| Arc::ptr_eq(&s, &newer)));
        assert_eq!(old.refcount(), 1);

        resource.set_semaphore(SyncSlot::Write, None);
        pool.release_semaphore(old);
        pool.release_semaphore(newer);
        assert_eq!(pool.stats().semaphores_outstanding, 0);
    }

    #[test]
    fn test_slot_replacement_releases_previous() {
        let (_backend, pool) = setup(DummyBackend::new());
        let resource = MemoryResource::new(pool.clone());
        let first = pool.get_semaphore(PipelineStages::TRANSFER).unwrap();
        let second = pool.get_semaphore(PipelineStages::TRANSFER).unwrap();

        resource.set_semaphore(SyncSlot::Write, Some(&first));
        assert_eq!(first.refcount(), 2);
        resource.set_semaphore(SyncSlot::Write, Some(&second));
        assert_eq!(first.refcount(), 1);
        assert_eq!(second.refcount(), 2);

        assert!(!resource.clear_semaphore_if(SyncSlot::Write, &first));
        assert!(resource.clear_semaphore_if(SyncSlot::Write, &second));
        assert_eq!(second.refcount(), 1);

        pool.release_semaphore(first);
        pool.release_semaphore(second);
        assert_eq!(pool.stats().semaphores_outstanding, 0);
    }

    #[test]
    fn test_drop_releases_slots() {
        let (_backend, pool) = setup(DummyBackend::new());
        let fence = pool.get_fence().unwrap();
        {
            let resource = MemoryResource::new(pool.clone());
            resource.set_fence(SyncSlot::Read, Some(&fence));
            resource.set_fence(SyncSlot::Write, Some(&fence));
            assert_eq!(fence.refcount(), 3);
        }
        assert_eq!(fence.refcount(), 1);
        pool.release_fence(fence);
        assert_eq!(pool.stats().fences_outstanding, 0);
    }
}
