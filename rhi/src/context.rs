//! Shared device context.
//!
//! [`DeviceContext`] is the state every queue, pool and resource of a device
//! shares: the backend (which owns the native device), the configuration and
//! the memory allocator.

use std::sync::Arc;

use crate::backend::{DeviceExtensions, DeviceInfo, DeviceLimits, GpuBackend, NativeObject};
use crate::config::{DeviceConfig, SyncTimeout};
use crate::memory::MemoryAllocator;
use crate::types::MemoryProperties;

/// State shared by everything created from one device.
pub struct DeviceContext {
    backend: Arc<dyn GpuBackend>,
    config: DeviceConfig,
    allocator: Arc<dyn MemoryAllocator>,
}

impl DeviceContext {
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        config: DeviceConfig,
        allocator: Arc<dyn MemoryAllocator>,
    ) -> Self {
        Self {
            backend,
            config,
            allocator,
        }
    }

    /// The native backend.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn info(&self) -> &DeviceInfo {
        self.backend.device_info()
    }

    /// Optional extensions the backend enabled.
    pub fn extensions(&self) -> DeviceExtensions {
        self.info().extensions
    }

    pub fn memory_properties(&self) -> &MemoryProperties {
        &self.info().memory_properties
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.info().limits
    }

    /// The allocator buffers and textures get their memory from.
    pub fn allocator(&self) -> &Arc<dyn MemoryAllocator> {
        &self.allocator
    }

    /// Timeout policy for fence waits and queue drains.
    pub fn sync_timeout(&self) -> SyncTimeout {
        self.config.sync_timeout
    }

    /// Attach a debug name to a native object.
    ///
    /// Does nothing unless debug names are enabled and the backend supports them.
    pub fn name_object(&self, object: NativeObject, name: &str) {
        if self.config.debug_names && self.extensions().contains(DeviceExtensions::DEBUG_UTILS) {
            self.backend.set_object_name(object, name);
        }
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("backend", &self.backend.name())
            .field("device", &self.info().name)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferHandle, DummyBackend};
    use crate::memory::DeviceAllocator;

    fn context(debug_names: bool) -> (Arc<DummyBackend>, DeviceContext) {
        let backend = Arc::new(DummyBackend::new());
        let config = DeviceConfig::default().with_debug_names(debug_names);
        let context = DeviceContext::new(backend.clone(), config, Arc::new(DeviceAllocator));
        (backend, context)
    }

    #[test]
    fn test_name_object_when_enabled() {
        let (backend, context) = context(true);
        let object = NativeObject::Buffer(BufferHandle::Dummy(1));
        context.name_object(object, "vertices");
        assert_eq!(backend.object_name(object).as_deref(), Some("vertices"));
    }

    #[test]
    fn test_name_object_when_disabled() {
        let (backend, context) = context(false);
        let object = NativeObject::Buffer(BufferHandle::Dummy(1));
        context.name_object(object, "vertices");
        assert_eq!(backend.object_name(object), None);
    }
}
