//! Compute and graphics pipelines.

use std::collections::HashSet;
use std::sync::Arc;

use super::{BindingLayout, FramebufferInfo, Shader};
use crate::backend::{
    ComputePipelineInfo, GraphicsPipelineInfo, NativeObject, PipelineHandle, PipelineLayoutHandle,
    RenderPassHandle,
};
use crate::context::DeviceContext;
use crate::error::RhiError;
use crate::types::{
    MAX_BINDING_LAYOUTS, PrimitiveTopology, RenderState, ShaderStages, VertexAttribute,
};

/// Descriptor for creating a compute pipeline.
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub shader: Arc<Shader>,
    pub binding_layouts: Vec<Arc<BindingLayout>>,
}

impl ComputePipelineDescriptor {
    pub fn new(shader: Arc<Shader>) -> Self {
        Self {
            shader,
            binding_layouts: Vec::new(),
        }
    }

    pub fn with_binding_layout(mut self, layout: Arc<BindingLayout>) -> Self {
        self.binding_layouts.push(layout);
        self
    }
}

/// Descriptor for creating a graphics pipeline.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor {
    pub vertex_shader: Arc<Shader>,
    pub pixel_shader: Option<Arc<Shader>>,
    pub binding_layouts: Vec<Arc<BindingLayout>>,
    pub topology: PrimitiveTopology,
    pub vertex_attributes: Vec<VertexAttribute>,
    pub render_state: RenderState,
}

impl GraphicsPipelineDescriptor {
    pub fn new(vertex_shader: Arc<Shader>) -> Self {
        Self {
            vertex_shader,
            pixel_shader: None,
            binding_layouts: Vec::new(),
            topology: PrimitiveTopology::default(),
            vertex_attributes: Vec::new(),
            render_state: RenderState::default(),
        }
    }

    pub fn with_pixel_shader(mut self, shader: Arc<Shader>) -> Self {
        self.pixel_shader = Some(shader);
        self
    }

    pub fn with_binding_layout(mut self, layout: Arc<BindingLayout>) -> Self {
        self.binding_layouts.push(layout);
        self
    }

    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_vertex_attribute(mut self, attribute: VertexAttribute) -> Self {
        self.vertex_attributes.push(attribute);
        self
    }

    pub fn with_render_state(mut self, render_state: RenderState) -> Self {
        self.render_state = render_state;
        self
    }
}

fn check_stage(shader: &Shader, stage: ShaderStages) -> Result<(), RhiError> {
    if shader.stage() != stage {
        return Err(RhiError::InvalidParameter(format!(
            "expected a {stage:?} shader, got {:?}",
            shader.stage()
        )));
    }
    Ok(())
}

fn create_layout(
    context: &DeviceContext,
    binding_layouts: &[Arc<BindingLayout>],
) -> Result<PipelineLayoutHandle, RhiError> {
    let limit = MAX_BINDING_LAYOUTS.min(context.limits().max_bound_descriptor_sets as usize);
    if binding_layouts.len() > limit {
        return Err(RhiError::InvalidParameter(format!(
            "{} binding layouts exceed the limit of {limit}",
            binding_layouts.len()
        )));
    }
    let set_layouts: Vec<_> = binding_layouts.iter().map(|l| l.native()).collect();
    context.backend().create_pipeline_layout(&set_layouts)
}

/// A compute pipeline and its pipeline layout.
pub struct ComputePipeline {
    context: Arc<DeviceContext>,
    descriptor: ComputePipelineDescriptor,
    layout: PipelineLayoutHandle,
    native: PipelineHandle,
}

impl ComputePipeline {
    pub(crate) fn create(
        context: Arc<DeviceContext>,
        descriptor: &ComputePipelineDescriptor,
    ) -> Result<Arc<Self>, RhiError> {
        check_stage(&descriptor.shader, ShaderStages::COMPUTE)?;
        let layout = create_layout(&context, &descriptor.binding_layouts)?;
        let info = ComputePipelineInfo {
            layout,
            shader: descriptor.shader.native(),
            entry_point: descriptor.shader.entry_point().to_string(),
        };
        let native = match context.backend().create_compute_pipeline(&info) {
            Ok(native) => native,
            Err(e) => {
                context.backend().destroy_pipeline_layout(layout);
                return Err(e);
            }
        };
        if let Some(label) = &descriptor.shader.descriptor().label {
            context.name_object(NativeObject::Pipeline(native), label);
        }
        Ok(Arc::new(Self {
            context,
            descriptor: descriptor.clone(),
            layout,
            native,
        }))
    }

    pub fn descriptor(&self) -> &ComputePipelineDescriptor {
        &self.descriptor
    }

    pub fn native(&self) -> PipelineHandle {
        self.native
    }

    pub fn layout(&self) -> PipelineLayoutHandle {
        self.layout
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        let backend = self.context.backend();
        backend.destroy_pipeline(self.native);
        backend.destroy_pipeline_layout(self.layout);
    }
}

impl std::fmt::Debug for ComputePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePipeline")
            .field("shader", &self.descriptor.shader)
            .field("binding_layouts", &self.descriptor.binding_layouts.len())
            .field("native", &self.native)
            .finish()
    }
}

/// A graphics pipeline compiled for one framebuffer shape.
///
/// Owns a render pass compatible with every framebuffer whose
/// [`FramebufferInfo`] matches.
pub struct GraphicsPipeline {
    context: Arc<DeviceContext>,
    descriptor: GraphicsPipelineDescriptor,
    framebuffer_info: FramebufferInfo,
    render_pass: RenderPassHandle,
    layout: PipelineLayoutHandle,
    native: PipelineHandle,
}

impl GraphicsPipeline {
    pub(crate) fn create(
        context: Arc<DeviceContext>,
        descriptor: &GraphicsPipelineDescriptor,
        framebuffer_info: &FramebufferInfo,
    ) -> Result<Arc<Self>, RhiError> {
        check_stage(&descriptor.vertex_shader, ShaderStages::VERTEX)?;
        if let Some(pixel) = &descriptor.pixel_shader {
            check_stage(pixel, ShaderStages::PIXEL)?;
        }
        let mut locations = HashSet::new();
        for attribute in &descriptor.vertex_attributes {
            if !locations.insert(attribute.location) {
                return Err(RhiError::InvalidParameter(format!(
                    "vertex attribute location {} is used twice",
                    attribute.location
                )));
            }
        }
        if descriptor.render_state.depth.test_enable && framebuffer_info.depth_format.is_none() {
            log::debug!("Graphics pipeline enables depth testing without a depth attachment");
        }

        let backend = context.backend();
        let render_pass = backend.create_render_pass(&framebuffer_info.render_pass_info(false))?;
        let layout = match create_layout(&context, &descriptor.binding_layouts) {
            Ok(layout) => layout,
            Err(e) => {
                backend.destroy_render_pass(render_pass);
                return Err(e);
            }
        };
        let info = GraphicsPipelineInfo {
            layout,
            render_pass,
            vertex_shader: descriptor.vertex_shader.native(),
            vertex_entry_point: descriptor.vertex_shader.entry_point().to_string(),
            pixel_shader: descriptor
                .pixel_shader
                .as_ref()
                .map(|s| (s.native(), s.entry_point().to_string())),
            topology: descriptor.topology,
            vertex_attributes: descriptor.vertex_attributes.clone(),
            render_state: descriptor.render_state,
            color_attachment_count: framebuffer_info.color_formats.len() as u32,
            sample_count: framebuffer_info.sample_count,
        };
        let native = match backend.create_graphics_pipeline(&info) {
            Ok(native) => native,
            Err(e) => {
                backend.destroy_pipeline_layout(layout);
                backend.destroy_render_pass(render_pass);
                return Err(e);
            }
        };
        log::trace!(
            "Created graphics pipeline for {} colour targets",
            framebuffer_info.color_formats.len()
        );

        Ok(Arc::new(Self {
            context,
            descriptor: descriptor.clone(),
            framebuffer_info: framebuffer_info.clone(),
            render_pass,
            layout,
            native,
        }))
    }

    pub fn descriptor(&self) -> &GraphicsPipelineDescriptor {
        &self.descriptor
    }

    pub fn framebuffer_info(&self) -> &FramebufferInfo {
        &self.framebuffer_info
    }

    pub fn native(&self) -> PipelineHandle {
        self.native
    }

    pub fn layout(&self) -> PipelineLayoutHandle {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        let backend = self.context.backend();
        backend.destroy_pipeline(self.native);
        backend.destroy_pipeline_layout(self.layout);
        backend.destroy_render_pass(self.render_pass);
    }
}

impl std::fmt::Debug for GraphicsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsPipeline")
            .field("topology", &self.descriptor.topology)
            .field("framebuffer_info", &self.framebuffer_info)
            .field("native", &self.native)
            .finish()
    }
}

static_assertions::assert_impl_all!(ComputePipeline: Send, Sync);
static_assertions::assert_impl_all!(GraphicsPipeline: Send, Sync);
