//! Memory heaps, types and requirements reported by a backend.

use bitflags::bitflags;

bitflags! {
    /// Properties of a memory type. Bit values match Vulkan.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryPropertyFlags: u32 {
        const DEVICE_LOCAL = 0x01;
        const HOST_VISIBLE = 0x02;
        const HOST_COHERENT = 0x04;
        const HOST_CACHED = 0x08;
        const LAZILY_ALLOCATED = 0x10;
    }
}

impl Default for MemoryPropertyFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// One memory type of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryType {
    pub property_flags: MemoryPropertyFlags,
    pub heap_index: u32,
}

/// One memory heap of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryHeap {
    pub size: u64,
    pub device_local: bool,
}

/// All memory types and heaps of a device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryProperties {
    pub memory_types: Vec<MemoryType>,
    pub memory_heaps: Vec<MemoryHeap>,
}

impl MemoryProperties {
    /// A typical discrete GPU layout: device-local, host-visible coherent and
    /// host-visible cached types over two heaps.
    pub fn discrete_gpu() -> Self {
        Self {
            memory_types: vec![
                MemoryType {
                    property_flags: MemoryPropertyFlags::DEVICE_LOCAL,
                    heap_index: 0,
                },
                MemoryType {
                    property_flags: MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT,
                    heap_index: 1,
                },
                MemoryType {
                    property_flags: MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT
                        | MemoryPropertyFlags::HOST_CACHED,
                    heap_index: 1,
                },
            ],
            memory_heaps: vec![
                MemoryHeap {
                    size: 8 << 30,
                    device_local: true,
                },
                MemoryHeap {
                    size: 16 << 30,
                    device_local: false,
                },
            ],
        }
    }
}

/// Size, alignment and acceptable memory types for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
    /// Bit `i` is set when memory type `i` may back the resource.
    pub memory_type_bits: u32,
}
