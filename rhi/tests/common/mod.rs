//! Common utilities for RHI integration tests.
//!
//! This module provides shared test infrastructure that can be reused
//! across different backend implementations.

use std::sync::Arc;

use redlilium_rhi::{
    BackendKind, Buffer, BufferDescriptor, BufferUsage, CommandList, CpuAccessMode, Device,
    DeviceConfig, DummyBackend, Format, QueueId, SyncTimeout, Texture, TextureDescriptor,
    TextureUsage,
};

/// Initialize logging once per test binary. Honors `RUST_LOG`.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available GPU backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Dummy backend (CPU-simulated queues and memory).
    Dummy,
    /// Vulkan backend (native via ash).
    Vulkan,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            // Dummy backend is always available
            Backend::Dummy => true,
            #[cfg(feature = "vulkan-backend")]
            Backend::Vulkan => true,
            #[cfg(not(feature = "vulkan-backend"))]
            Backend::Vulkan => false,
        }
    }

    /// Get the backend name for display.
    #[allow(dead_code)]
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Dummy => "dummy",
            Backend::Vulkan => "vulkan",
        }
    }

    /// Device configuration used by the tests.
    pub fn to_config(self) -> DeviceConfig {
        let kind = match self {
            Backend::Dummy => BackendKind::Dummy,
            Backend::Vulkan => BackendKind::Vulkan,
        };
        DeviceConfig::new()
            .with_backend(kind)
            .with_validation(false)
            .with_debug_names(true)
            .with_sync_timeout(SyncTimeout::Bounded(std::time::Duration::from_secs(5)))
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// Test context owning a device and, for the dummy backend, a handle to the
/// simulated GPU so tests can inspect submissions.
pub struct TestContext {
    /// The backend being tested.
    #[allow(dead_code)]
    pub backend: Backend,
    /// Device for creating resources and command lists.
    pub device: Device,
    /// Simulated GPU, `None` for real backends.
    #[allow(dead_code)]
    pub dummy: Option<Arc<DummyBackend>>,
}

impl TestContext {
    /// Create a new test context for the given backend.
    ///
    /// Returns `None` if the backend is not available or no device could be
    /// created (for example, no Vulkan driver on the machine).
    pub fn new(backend: Backend) -> Option<Self> {
        init_logging();
        if !backend.is_available() {
            return None;
        }

        match backend {
            Backend::Dummy => Some(Self::with_dummy(DummyBackend::new(), backend.to_config())),
            Backend::Vulkan => {
                let device = Device::from_config(backend.to_config()).ok()?;
                Some(Self {
                    backend,
                    device,
                    dummy: None,
                })
            }
        }
    }

    /// Create a context on a preconfigured dummy backend.
    #[allow(dead_code)]
    pub fn with_dummy(dummy: DummyBackend, config: DeviceConfig) -> Self {
        init_logging();
        let dummy = Arc::new(dummy);
        let device = Device::new(dummy.clone(), config).expect("Failed to create dummy device");
        Self {
            backend: Backend::Dummy,
            device,
            dummy: Some(dummy),
        }
    }

    /// The simulated GPU. Panics on real backends.
    #[allow(dead_code)]
    pub fn dummy(&self) -> &DummyBackend {
        self.dummy.as_deref().expect("Test requires the dummy backend")
    }

    /// Create a GPU-only buffer.
    #[allow(dead_code)]
    pub fn create_buffer(&self, size: u64, usage: BufferUsage) -> Arc<Buffer> {
        self.device
            .create_buffer(&BufferDescriptor::new(size, usage).with_label("test_buffer"))
            .expect("Failed to create buffer")
    }

    /// Create a CPU-readable buffer for read-back.
    #[allow(dead_code)]
    pub fn create_readback_buffer(&self, size: u64) -> Arc<Buffer> {
        self.device
            .create_buffer(
                &BufferDescriptor::new(size, BufferUsage::COPY_DST | BufferUsage::COPY_SRC)
                    .with_cpu_access(CpuAccessMode::Read)
                    .with_label("readback_buffer"),
            )
            .expect("Failed to create readback buffer")
    }

    /// Create a CPU-writable buffer for uploads.
    #[allow(dead_code)]
    pub fn create_upload_buffer(&self, size: u64) -> Arc<Buffer> {
        self.device
            .create_buffer(
                &BufferDescriptor::new(size, BufferUsage::COPY_SRC)
                    .with_cpu_access(CpuAccessMode::Write)
                    .with_label("upload_buffer"),
            )
            .expect("Failed to create upload buffer")
    }

    /// Create a 2D texture.
    #[allow(dead_code)]
    pub fn create_texture(
        &self,
        width: u32,
        height: u32,
        format: Format,
        usage: TextureUsage,
    ) -> Arc<Texture> {
        self.device
            .create_texture(
                &TextureDescriptor::new_2d(width, height, format, usage).with_label("test_texture"),
            )
            .expect("Failed to create texture")
    }

    /// Create an open command list for `queue`.
    #[allow(dead_code)]
    pub fn open_list(&self, queue: QueueId) -> CommandList {
        let mut list = self
            .device
            .create_command_list(self.device.command_list_parameters(queue))
            .expect("Failed to create command list");
        list.open().expect("Failed to open command list");
        list
    }

    /// Close and execute a command list. Returns the submission id.
    #[allow(dead_code)]
    pub fn execute(&self, list: &mut CommandList) -> u64 {
        list.close().expect("Failed to close command list");
        self.device
            .execute_command_list(list)
            .expect("Failed to execute command list")
    }

    /// Execute a command list and block until the device is idle.
    #[allow(dead_code)]
    pub fn execute_and_wait(&self, list: &mut CommandList) {
        self.execute(list);
        self.device.wait_for_idle().expect("Failed to wait for idle");
    }

    /// Read `count` u32 values from a CPU-readable buffer.
    #[allow(dead_code)]
    pub fn read_u32(&self, buffer: &Buffer, count: usize) -> Vec<u32> {
        self.device
            .read_buffer_typed(buffer, 0, count)
            .expect("Failed to read buffer")
    }

    /// Whether the device created a dedicated queue for `queue`.
    #[allow(dead_code)]
    pub fn has_queue(&self, queue: QueueId) -> bool {
        self.device.queue(queue).is_some()
    }
}
