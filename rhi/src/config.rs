//! Device configuration.
//!
//! [`DeviceConfig`] collects every knob the device, its queues and the sync
//! object pools read at construction time.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use redlilium_rhi::{BackendKind, DeviceConfig, SyncTimeout};
//!
//! let config = DeviceConfig::default()
//!     .with_backend(BackendKind::Vulkan)
//!     .with_validation(true)
//!     .with_sync_timeout(SyncTimeout::Bounded(Duration::from_secs(2)));
//! ```

use std::time::Duration;

use crate::types::ResourceType;

/// Which backend [`create_backend`](crate::backend::create_backend) should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    /// Try Vulkan first, fall back to the dummy backend.
    #[default]
    Auto,
    /// Vulkan via `ash`. Fails if the feature is disabled or no GPU is found.
    Vulkan,
    /// CPU-simulated backend.
    Dummy,
}

/// How long CPU-side waits on GPU work may block.
///
/// Used by both [`Fence::wait`](crate::sync::Fence::wait) and
/// [`Queue::idle`](crate::queue::Queue::idle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTimeout {
    /// Block until the GPU signals.
    Infinite,
    /// Give up with [`RhiError::Timeout`](crate::RhiError::Timeout) after the duration.
    Bounded(Duration),
}

impl SyncTimeout {
    /// Timeout in nanoseconds as native wait calls expect it.
    pub fn as_nanos(&self) -> u64 {
        match self {
            Self::Infinite => u64::MAX,
            Self::Bounded(duration) => u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    /// Duration of a bounded timeout, `None` when infinite.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::Bounded(duration) => Some(*duration),
        }
    }
}

impl Default for SyncTimeout {
    fn default() -> Self {
        Self::Bounded(Duration::from_secs(10))
    }
}

/// Native binding-number offsets per register class.
///
/// A binding layout item at `slot` of a given class lands on native binding
/// `slot + offset`, so registers of different classes never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingOffsets {
    pub shader_resource: u32,
    pub sampler: u32,
    pub constant_buffer: u32,
    pub unordered_access: u32,
}

impl BindingOffsets {
    /// Offset applied to a resource type.
    pub fn offset_for(&self, resource_type: ResourceType) -> u32 {
        match resource_type {
            ResourceType::TextureSrv
            | ResourceType::TypedBufferSrv
            | ResourceType::StructuredBufferSrv
            | ResourceType::RawBufferSrv => self.shader_resource,
            ResourceType::TextureUav
            | ResourceType::TypedBufferUav
            | ResourceType::StructuredBufferUav
            | ResourceType::RawBufferUav => self.unordered_access,
            ResourceType::ConstantBuffer => self.constant_buffer,
            ResourceType::Sampler => self.sampler,
        }
    }
}

impl Default for BindingOffsets {
    fn default() -> Self {
        Self {
            shader_resource: 0,
            sampler: 128,
            constant_buffer: 256,
            unordered_access: 384,
        }
    }
}

/// Configuration for creating a [`Device`](crate::Device).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Backend selection policy.
    pub backend: BackendKind,
    /// Enable Vulkan validation layers and route their messages to `log`.
    pub validation: bool,
    /// Attach debug names to native objects.
    pub debug_names: bool,
    /// Timeout policy for fence waits and queue drains.
    pub sync_timeout: SyncTimeout,
    /// Default UAV barrier behaviour for new command lists.
    pub enable_uav_barriers: bool,
    /// Native binding offsets per register class.
    pub binding_offsets: BindingOffsets,
    /// `None` for growable sync pools, `Some(n)` for fixed pools of `n` objects each.
    pub max_sync_objects: Option<usize>,
    /// Create a dedicated compute queue if the backend exposes one.
    pub enable_compute_queue: bool,
    /// Create a dedicated transfer queue if the backend exposes one.
    pub enable_transfer_queue: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            validation: cfg!(debug_assertions),
            debug_names: cfg!(debug_assertions),
            sync_timeout: SyncTimeout::default(),
            enable_uav_barriers: true,
            binding_offsets: BindingOffsets::default(),
            max_sync_objects: None,
            enable_compute_queue: true,
            enable_transfer_queue: true,
        }
    }
}

impl DeviceConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend selection policy.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }

    /// Enable or disable debug object names.
    pub fn with_debug_names(mut self, enabled: bool) -> Self {
        self.debug_names = enabled;
        self
    }

    /// Set the timeout policy for CPU waits.
    pub fn with_sync_timeout(mut self, timeout: SyncTimeout) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Set the default UAV barrier behaviour for command lists.
    pub fn with_uav_barriers(mut self, enabled: bool) -> Self {
        self.enable_uav_barriers = enabled;
        self
    }

    /// Set the native binding offsets.
    pub fn with_binding_offsets(mut self, offsets: BindingOffsets) -> Self {
        self.binding_offsets = offsets;
        self
    }

    /// Use fixed-capacity sync object pools.
    pub fn with_max_sync_objects(mut self, count: usize) -> Self {
        self.max_sync_objects = Some(count);
        self
    }

    /// Enable or disable the dedicated compute queue.
    pub fn with_compute_queue(mut self, enabled: bool) -> Self {
        self.enable_compute_queue = enabled;
        self
    }

    /// Enable or disable the dedicated transfer queue.
    pub fn with_transfer_queue(mut self, enabled: bool) -> Self {
        self.enable_transfer_queue = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout_is_ten_seconds() {
        let config = DeviceConfig::default();
        assert_eq!(
            config.sync_timeout,
            SyncTimeout::Bounded(Duration::from_secs(10))
        );
        assert_eq!(config.sync_timeout.as_nanos(), 10_000_000_000);
    }

    #[test]
    fn test_infinite_timeout() {
        assert_eq!(SyncTimeout::Infinite.as_nanos(), u64::MAX);
        assert_eq!(SyncTimeout::Infinite.duration(), None);
    }

    #[test]
    fn test_builder() {
        let config = DeviceConfig::new()
            .with_backend(BackendKind::Dummy)
            .with_max_sync_objects(4)
            .with_uav_barriers(false);
        assert_eq!(config.backend, BackendKind::Dummy);
        assert_eq!(config.max_sync_objects, Some(4));
        assert!(!config.enable_uav_barriers);
    }

    #[test]
    fn test_binding_offsets() {
        let offsets = BindingOffsets::default();
        assert_eq!(offsets.offset_for(ResourceType::TextureSrv), 0);
        assert_eq!(offsets.offset_for(ResourceType::Sampler), 128);
        assert_eq!(offsets.offset_for(ResourceType::ConstantBuffer), 256);
        assert_eq!(offsets.offset_for(ResourceType::RawBufferUav), 384);
    }
}
