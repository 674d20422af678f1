//! Shader and pipeline state types.

use bitflags::bitflags;

use super::{CompareFunction, Format};

bitflags! {
    /// Shader stages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const PIXEL = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

impl ShaderStages {
    pub const ALL_GRAPHICS: Self = Self::VERTEX.union(Self::PIXEL);
}

impl Default for ShaderStages {
    fn default() -> Self {
        Self::all()
    }
}

/// Descriptor for creating a shader module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderDescriptor {
    pub label: Option<String>,
    /// Exactly one stage.
    pub stage: ShaderStages,
    pub entry_point: String,
}

impl ShaderDescriptor {
    pub fn new(stage: ShaderStages) -> Self {
        Self {
            label: None,
            stage,
            entry_point: "main".to_string(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }
}

/// Primitive assembly mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Face culling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Index element size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    Uint16,
    #[default]
    Uint32,
}

/// One vertex attribute fetched from a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: Format,
    pub buffer_index: u32,
    pub offset: u32,
    pub element_stride: u32,
    pub is_instanced: bool,
}

/// Rasterizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RasterState {
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
    pub wireframe: bool,
}

/// Depth test state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test_enable: bool,
    pub write_enable: bool,
    pub compare: CompareFunction,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test_enable: true,
            write_enable: true,
            compare: CompareFunction::Less,
        }
    }
}

/// Fixed-function state of a graphics pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderState {
    pub raster: RasterState,
    pub depth: DepthState,
    /// Standard alpha blending on every colour target.
    pub alpha_blend: bool,
}
