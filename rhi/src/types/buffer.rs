//! Buffer types and descriptors.

use bitflags::bitflags;

use super::{Format, ResourceStates};

bitflags! {
    /// How a buffer may be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be the source of a copy.
        const COPY_SRC = 1 << 0;
        /// Buffer can be the destination of a copy, fill or inline update.
        const COPY_DST = 1 << 1;
        /// Buffer can be bound as a vertex buffer.
        const VERTEX = 1 << 2;
        /// Buffer can be bound as an index buffer.
        const INDEX = 1 << 3;
        /// Buffer can be bound as a constant (uniform) buffer.
        const CONSTANT = 1 << 4;
        /// Buffer can be read as a structured or raw shader resource.
        const SHADER_RESOURCE = 1 << 5;
        /// Buffer can be written as an unordered access resource.
        const UNORDERED_ACCESS = 1 << 6;
        /// Buffer can have typed (texel) views.
        const TYPED_VIEWS = 1 << 7;
        /// Buffer can hold indirect draw/dispatch arguments.
        const INDIRECT = 1 << 8;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::COPY_SRC | Self::COPY_DST
    }
}

/// CPU visibility of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CpuAccessMode {
    /// GPU-only memory.
    #[default]
    None,
    /// The CPU reads results back.
    Read,
    /// The CPU writes data that the GPU consumes.
    Write,
}

impl CpuAccessMode {
    pub fn is_cpu_accessible(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size of the buffer in bytes.
    pub size: u64,
    /// Element format used by typed views when a view does not name one.
    pub format: Format,
    /// Element stride of structured views.
    pub struct_stride: u32,
    /// Usage flags.
    pub usage: BufferUsage,
    /// CPU visibility.
    pub cpu_access: CpuAccessMode,
    /// State the buffer is in when tracking starts.
    pub initial_state: ResourceStates,
    /// Start every command list from `initial_state` and return to it on close.
    pub keep_initial_state: bool,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            format: Format::Unknown,
            struct_stride: 0,
            usage,
            cpu_access: CpuAccessMode::None,
            initial_state: ResourceStates::UNKNOWN,
            keep_initial_state: false,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the default typed-view format.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Set the structured element stride.
    pub fn with_struct_stride(mut self, stride: u32) -> Self {
        self.struct_stride = stride;
        self
    }

    /// Set CPU visibility.
    pub fn with_cpu_access(mut self, access: CpuAccessMode) -> Self {
        self.cpu_access = access;
        self
    }

    /// Set the initial state and keep it across command lists.
    pub fn with_initial_state(mut self, state: ResourceStates) -> Self {
        self.initial_state = state;
        self.keep_initial_state = true;
        self
    }
}

impl Default for BufferDescriptor {
    fn default() -> Self {
        Self::new(0, BufferUsage::default())
    }
}

/// A byte range inside a buffer.
///
/// A `byte_size` of zero means "to the end of the buffer".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferRange {
    pub byte_offset: u64,
    pub byte_size: u64,
}

impl BufferRange {
    /// The whole buffer.
    pub const ENTIRE: BufferRange = BufferRange {
        byte_offset: 0,
        byte_size: 0,
    };

    pub fn new(byte_offset: u64, byte_size: u64) -> Self {
        Self {
            byte_offset,
            byte_size,
        }
    }

    /// Clamp the range to a buffer of `buffer_size` bytes and make the size explicit.
    pub fn resolve(&self, buffer_size: u64) -> BufferRange {
        let byte_offset = self.byte_offset.min(buffer_size);
        let remaining = buffer_size - byte_offset;
        let byte_size = if self.byte_size == 0 {
            remaining
        } else {
            self.byte_size.min(remaining)
        };
        BufferRange {
            byte_offset,
            byte_size,
        }
    }

    /// Whether the range covers the whole buffer.
    pub fn is_entire_buffer(&self, buffer_size: u64) -> bool {
        let resolved = self.resolve(buffer_size);
        resolved.byte_offset == 0 && resolved.byte_size == buffer_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entire_range_resolves_to_buffer_size() {
        assert_eq!(BufferRange::ENTIRE.resolve(256), BufferRange::new(0, 256));
        assert!(BufferRange::ENTIRE.is_entire_buffer(256));
    }

    #[test]
    fn test_range_is_clamped() {
        assert_eq!(BufferRange::new(200, 100).resolve(256), BufferRange::new(200, 56));
        assert_eq!(BufferRange::new(300, 4).resolve(256), BufferRange::new(256, 0));
    }

    #[test]
    fn test_descriptor_builder() {
        let desc = BufferDescriptor::new(64, BufferUsage::CONSTANT)
            .with_label("constants")
            .with_cpu_access(CpuAccessMode::Write)
            .with_initial_state(ResourceStates::CONSTANT_BUFFER);
        assert_eq!(desc.label.as_deref(), Some("constants"));
        assert!(desc.cpu_access.is_cpu_accessible());
        assert!(desc.keep_initial_state);
    }
}
