//! Resource states, pipeline stages and the mapping between them.
//!
//! Command lists speak in [`ResourceStates`]. Backends need pipeline stages,
//! access masks and image layouts; [`convert_resource_state`] bridges the two.
//! [`PipelineStages`] and [`AccessFlags`] use the same bit values as Vulkan so
//! the Vulkan backend converts them with `from_raw`.

use bitflags::bitflags;

bitflags! {
    /// Logical usage states of a buffer or texture.
    ///
    /// The empty set means the state is unknown.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceStates: u32 {
        const CONSTANT_BUFFER = 1 << 0;
        const VERTEX_BUFFER = 1 << 1;
        const INDEX_BUFFER = 1 << 2;
        const INDIRECT_ARGUMENT = 1 << 3;
        const SHADER_RESOURCE = 1 << 4;
        const UNORDERED_ACCESS = 1 << 5;
        const RENDER_TARGET = 1 << 6;
        const DEPTH_WRITE = 1 << 7;
        const DEPTH_READ = 1 << 8;
        const COPY_DEST = 1 << 9;
        const COPY_SOURCE = 1 << 10;
        const RESOLVE_DEST = 1 << 11;
        const RESOLVE_SOURCE = 1 << 12;
        const PRESENT = 1 << 13;
    }
}

impl ResourceStates {
    /// The unknown state.
    pub const UNKNOWN: Self = Self::empty();

    /// Whether the state contains any writing usage.
    pub fn is_write(&self) -> bool {
        self.intersects(
            Self::UNORDERED_ACCESS
                | Self::RENDER_TARGET
                | Self::DEPTH_WRITE
                | Self::COPY_DEST
                | Self::RESOLVE_DEST,
        )
    }
}

impl Default for ResourceStates {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

bitflags! {
    /// Pipeline stages a dependency applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 0x0000_0001;
        const DRAW_INDIRECT = 0x0000_0002;
        const VERTEX_INPUT = 0x0000_0004;
        const VERTEX_SHADER = 0x0000_0008;
        const TESSELLATION_CONTROL_SHADER = 0x0000_0010;
        const TESSELLATION_EVALUATION_SHADER = 0x0000_0020;
        const GEOMETRY_SHADER = 0x0000_0040;
        const FRAGMENT_SHADER = 0x0000_0080;
        const EARLY_FRAGMENT_TESTS = 0x0000_0100;
        const LATE_FRAGMENT_TESTS = 0x0000_0200;
        const COLOR_ATTACHMENT_OUTPUT = 0x0000_0400;
        const COMPUTE_SHADER = 0x0000_0800;
        const TRANSFER = 0x0000_1000;
        const BOTTOM_OF_PIPE = 0x0000_2000;
        const HOST = 0x0000_4000;
        const ALL_GRAPHICS = 0x0000_8000;
        const ALL_COMMANDS = 0x0001_0000;
    }
}

impl Default for PipelineStages {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Memory access kinds covered by a barrier.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 0x0000_0001;
        const INDEX_READ = 0x0000_0002;
        const VERTEX_ATTRIBUTE_READ = 0x0000_0004;
        const UNIFORM_READ = 0x0000_0008;
        const INPUT_ATTACHMENT_READ = 0x0000_0010;
        const SHADER_READ = 0x0000_0020;
        const SHADER_WRITE = 0x0000_0040;
        const COLOR_ATTACHMENT_READ = 0x0000_0080;
        const COLOR_ATTACHMENT_WRITE = 0x0000_0100;
        const DEPTH_STENCIL_ATTACHMENT_READ = 0x0000_0200;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 0x0000_0400;
        const TRANSFER_READ = 0x0000_0800;
        const TRANSFER_WRITE = 0x0000_1000;
        const HOST_READ = 0x0000_2000;
        const HOST_WRITE = 0x0000_4000;
        const MEMORY_READ = 0x0000_8000;
        const MEMORY_WRITE = 0x0001_0000;
    }
}

impl Default for AccessFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Image layouts a texture can be transitioned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    #[default]
    Undefined,
    General,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
}

/// Native view of a [`ResourceStates`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateMapping {
    pub stages: PipelineStages,
    pub access: AccessFlags,
    pub layout: ImageLayout,
}

const STATE_MAPPINGS: &[(ResourceStates, PipelineStages, AccessFlags, ImageLayout)] = &[
    (
        ResourceStates::CONSTANT_BUFFER,
        PipelineStages::ALL_COMMANDS,
        AccessFlags::UNIFORM_READ,
        ImageLayout::Undefined,
    ),
    (
        ResourceStates::VERTEX_BUFFER,
        PipelineStages::VERTEX_INPUT,
        AccessFlags::VERTEX_ATTRIBUTE_READ,
        ImageLayout::Undefined,
    ),
    (
        ResourceStates::INDEX_BUFFER,
        PipelineStages::VERTEX_INPUT,
        AccessFlags::INDEX_READ,
        ImageLayout::Undefined,
    ),
    (
        ResourceStates::INDIRECT_ARGUMENT,
        PipelineStages::DRAW_INDIRECT,
        AccessFlags::INDIRECT_COMMAND_READ,
        ImageLayout::Undefined,
    ),
    (
        ResourceStates::SHADER_RESOURCE,
        PipelineStages::ALL_COMMANDS,
        AccessFlags::SHADER_READ,
        ImageLayout::ShaderReadOnly,
    ),
    (
        ResourceStates::UNORDERED_ACCESS,
        PipelineStages::ALL_COMMANDS,
        AccessFlags::SHADER_READ.union(AccessFlags::SHADER_WRITE),
        ImageLayout::General,
    ),
    (
        ResourceStates::RENDER_TARGET,
        PipelineStages::COLOR_ATTACHMENT_OUTPUT,
        AccessFlags::COLOR_ATTACHMENT_READ.union(AccessFlags::COLOR_ATTACHMENT_WRITE),
        ImageLayout::ColorAttachment,
    ),
    (
        ResourceStates::DEPTH_WRITE,
        PipelineStages::EARLY_FRAGMENT_TESTS.union(PipelineStages::LATE_FRAGMENT_TESTS),
        AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            .union(AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE),
        ImageLayout::DepthStencilAttachment,
    ),
    (
        ResourceStates::DEPTH_READ,
        PipelineStages::EARLY_FRAGMENT_TESTS.union(PipelineStages::LATE_FRAGMENT_TESTS),
        AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ImageLayout::DepthStencilReadOnly,
    ),
    (
        ResourceStates::COPY_DEST,
        PipelineStages::TRANSFER,
        AccessFlags::TRANSFER_WRITE,
        ImageLayout::TransferDst,
    ),
    (
        ResourceStates::COPY_SOURCE,
        PipelineStages::TRANSFER,
        AccessFlags::TRANSFER_READ,
        ImageLayout::TransferSrc,
    ),
    (
        ResourceStates::RESOLVE_DEST,
        PipelineStages::TRANSFER,
        AccessFlags::TRANSFER_WRITE,
        ImageLayout::TransferDst,
    ),
    (
        ResourceStates::RESOLVE_SOURCE,
        PipelineStages::TRANSFER,
        AccessFlags::TRANSFER_READ,
        ImageLayout::TransferSrc,
    ),
    (
        ResourceStates::PRESENT,
        PipelineStages::ALL_COMMANDS,
        AccessFlags::MEMORY_READ,
        ImageLayout::PresentSrc,
    ),
];

/// Convert a combination of resource states into stages, access and layout.
///
/// Stages and access masks are unions over all set bits. Combined states
/// with conflicting layouts resolve to the last matching entry, so callers
/// should not combine image states that need different layouts.
pub fn convert_resource_state(state: ResourceStates) -> StateMapping {
    let mut mapping = StateMapping::default();
    for (bit, stages, access, layout) in STATE_MAPPINGS {
        if state.contains(*bit) {
            mapping.stages |= *stages;
            mapping.access |= *access;
            if *layout != ImageLayout::Undefined {
                mapping.layout = *layout;
            }
        }
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_state_maps_to_nothing() {
        let mapping = convert_resource_state(ResourceStates::UNKNOWN);
        assert!(mapping.stages.is_empty());
        assert!(mapping.access.is_empty());
        assert_eq!(mapping.layout, ImageLayout::Undefined);
    }

    #[test]
    fn test_copy_dest() {
        let mapping = convert_resource_state(ResourceStates::COPY_DEST);
        assert_eq!(mapping.stages, PipelineStages::TRANSFER);
        assert_eq!(mapping.access, AccessFlags::TRANSFER_WRITE);
        assert_eq!(mapping.layout, ImageLayout::TransferDst);
    }

    #[test]
    fn test_combined_buffer_states() {
        let mapping =
            convert_resource_state(ResourceStates::VERTEX_BUFFER | ResourceStates::INDEX_BUFFER);
        assert_eq!(mapping.stages, PipelineStages::VERTEX_INPUT);
        assert_eq!(
            mapping.access,
            AccessFlags::VERTEX_ATTRIBUTE_READ | AccessFlags::INDEX_READ
        );
    }

    #[test]
    fn test_write_states() {
        assert!(ResourceStates::COPY_DEST.is_write());
        assert!(ResourceStates::UNORDERED_ACCESS.is_write());
        assert!(!ResourceStates::SHADER_RESOURCE.is_write());
    }
}
