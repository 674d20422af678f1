//! Descriptor sets, render passes and pipeline creation.

use std::collections::HashMap;
use std::ffi::CString;

use ash::vk;

use super::conversion::{
    convert_compare_function, convert_cull_mode, convert_descriptor_type, convert_format,
    convert_image_layout, convert_sample_count, convert_shader_stages, convert_topology,
    map_vk_error,
};
use crate::backend::{
    AttachmentInfo, ComputePipelineInfo, DescriptorLayoutBinding, DescriptorResource,
    DescriptorWrite, GraphicsPipelineInfo, RenderPassInfo,
};
use crate::error::RhiError;

fn entry_point_name(name: &str) -> Result<CString, RhiError> {
    CString::new(name)
        .map_err(|_| RhiError::InvalidParameter(format!("invalid entry point name {name:?}")))
}

pub fn create_descriptor_set_layout(
    device: &ash::Device,
    bindings: &[DescriptorLayoutBinding],
) -> Result<vk::DescriptorSetLayout, RhiError> {
    let vk_bindings: Vec<_> = bindings
        .iter()
        .map(|binding| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding.binding)
                .descriptor_type(convert_descriptor_type(binding.descriptor_type))
                .descriptor_count(binding.count)
                .stage_flags(convert_shader_stages(binding.stages))
        })
        .collect();

    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
    unsafe { device.create_descriptor_set_layout(&create_info, None) }
        .map_err(|e| map_vk_error(e, "Failed to create descriptor set layout"))
}

/// Allocate a set from a pool sized for exactly this layout and fill it.
pub fn create_descriptor_set(
    device: &ash::Device,
    layout: vk::DescriptorSetLayout,
    bindings: &[DescriptorLayoutBinding],
    writes: &[DescriptorWrite],
) -> Result<(vk::DescriptorPool, vk::DescriptorSet), RhiError> {
    let mut counts: HashMap<vk::DescriptorType, u32> = HashMap::new();
    for binding in bindings {
        *counts
            .entry(convert_descriptor_type(binding.descriptor_type))
            .or_default() += binding.count.max(1);
    }
    let pool_sizes: Vec<_> = counts
        .into_iter()
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
            ty,
            descriptor_count,
        })
        .collect();

    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(1)
        .pool_sizes(&pool_sizes);
    let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
        .map_err(|e| map_vk_error(e, "Failed to create descriptor pool"))?;

    let layouts = [layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&layouts);
    let set = match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
        Ok(sets) if !sets.is_empty() => sets[0],
        Ok(_) => {
            unsafe { device.destroy_descriptor_pool(pool, None) };
            return Err(RhiError::Internal("descriptor set allocation returned nothing".into()));
        }
        Err(e) => {
            unsafe { device.destroy_descriptor_pool(pool, None) };
            return Err(map_vk_error(e, "Failed to allocate descriptor set"));
        }
    };

    if let Err(e) = write_descriptors(device, set, writes) {
        unsafe { device.destroy_descriptor_pool(pool, None) };
        return Err(e);
    }

    Ok((pool, set))
}

enum DescriptorInfo {
    Image(vk::DescriptorImageInfo),
    Buffer(vk::DescriptorBufferInfo),
    TexelBuffer(vk::BufferView),
}

fn write_descriptors(
    device: &ash::Device,
    set: vk::DescriptorSet,
    writes: &[DescriptorWrite],
) -> Result<(), RhiError> {
    let foreign = || RhiError::Internal("descriptor resource from another backend".into());

    // Infos first so the writes below can borrow them
    let mut infos = Vec::with_capacity(writes.len());
    for write in writes {
        let info = match write.resource {
            DescriptorResource::Image { view, layout } => {
                DescriptorInfo::Image(vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: view.as_vulkan().ok_or_else(foreign)?,
                    image_layout: convert_image_layout(layout),
                })
            }
            DescriptorResource::Buffer { buffer, range } => {
                DescriptorInfo::Buffer(vk::DescriptorBufferInfo {
                    buffer: buffer.as_vulkan().ok_or_else(foreign)?,
                    offset: range.byte_offset,
                    range: range.byte_size,
                })
            }
            DescriptorResource::TexelBuffer(view) => {
                DescriptorInfo::TexelBuffer(view.as_vulkan().ok_or_else(foreign)?)
            }
            DescriptorResource::Sampler(sampler) => {
                DescriptorInfo::Image(vk::DescriptorImageInfo {
                    sampler: sampler.as_vulkan().ok_or_else(foreign)?,
                    image_view: vk::ImageView::null(),
                    image_layout: vk::ImageLayout::UNDEFINED,
                })
            }
        };
        infos.push(info);
    }

    let vk_writes: Vec<_> = writes
        .iter()
        .zip(&infos)
        .map(|(write, info)| {
            let vk_write = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(write.binding)
                .dst_array_element(write.array_element)
                .descriptor_type(convert_descriptor_type(write.descriptor_type));
            match info {
                DescriptorInfo::Image(image) => vk_write.image_info(std::slice::from_ref(image)),
                DescriptorInfo::Buffer(buffer) => {
                    vk_write.buffer_info(std::slice::from_ref(buffer))
                }
                DescriptorInfo::TexelBuffer(view) => {
                    vk_write.texel_buffer_view(std::slice::from_ref(view))
                }
            }
        })
        .collect();

    // SAFETY: the set was just allocated and is not bound by any command
    // buffer yet; the info arrays referenced by `vk_writes` are still alive
    unsafe { device.update_descriptor_sets(&vk_writes, &[]) };
    Ok(())
}

pub fn create_pipeline_layout(
    device: &ash::Device,
    set_layouts: &[vk::DescriptorSetLayout],
) -> Result<vk::PipelineLayout, RhiError> {
    let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
    unsafe { device.create_pipeline_layout(&create_info, None) }
        .map_err(|e| map_vk_error(e, "Failed to create pipeline layout"))
}

pub fn create_compute_pipeline(
    device: &ash::Device,
    info: &ComputePipelineInfo,
) -> Result<vk::Pipeline, RhiError> {
    let (Some(layout), Some(module)) = (info.layout.as_vulkan(), info.shader.as_vulkan()) else {
        return Err(RhiError::Internal("pipeline inputs from another backend".into()));
    };
    let entry_point = entry_point_name(&info.entry_point)?;

    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(&entry_point);
    let create_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(layout);

    // SAFETY: shader module and layout outlive the call; the entry point
    // string is owned by this frame
    let pipelines = unsafe {
        device.create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
    }
    .map_err(|(_, e)| map_vk_error(e, "Failed to create compute pipeline"))?;

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::Internal("compute pipeline creation returned nothing".into()))
}

pub fn create_graphics_pipeline(
    device: &ash::Device,
    info: &GraphicsPipelineInfo,
) -> Result<vk::Pipeline, RhiError> {
    let foreign = || RhiError::Internal("pipeline inputs from another backend".into());
    let layout = info.layout.as_vulkan().ok_or_else(foreign)?;
    let render_pass = info.render_pass.as_vulkan().ok_or_else(foreign)?;
    let vertex_module = info.vertex_shader.as_vulkan().ok_or_else(foreign)?;

    let vertex_entry = entry_point_name(&info.vertex_entry_point)?;
    let pixel = match &info.pixel_shader {
        Some((module, entry)) => Some((
            module.as_vulkan().ok_or_else(foreign)?,
            entry_point_name(entry)?,
        )),
        None => None,
    };

    let mut stages = vec![
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_module)
            .name(&vertex_entry),
    ];
    if let Some((module, entry)) = &pixel {
        stages.push(
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(*module)
                .name(entry),
        );
    }

    // One binding per distinct buffer index
    let mut vertex_bindings: Vec<vk::VertexInputBindingDescription> = Vec::new();
    for attribute in &info.vertex_attributes {
        if vertex_bindings
            .iter()
            .all(|binding| binding.binding != attribute.buffer_index)
        {
            vertex_bindings.push(vk::VertexInputBindingDescription {
                binding: attribute.buffer_index,
                stride: attribute.element_stride,
                input_rate: if attribute.is_instanced {
                    vk::VertexInputRate::INSTANCE
                } else {
                    vk::VertexInputRate::VERTEX
                },
            });
        }
    }
    let vertex_attributes: Vec<_> = info
        .vertex_attributes
        .iter()
        .map(|attribute| vk::VertexInputAttributeDescription {
            location: attribute.location,
            binding: attribute.buffer_index,
            format: convert_format(attribute.format),
            offset: attribute.offset,
        })
        .collect();

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&vertex_bindings)
        .vertex_attribute_descriptions(&vertex_attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert_topology(info.topology))
        .primitive_restart_enable(false);

    // Viewport and scissor are dynamic
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let raster = &info.render_state.raster;
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(if raster.wireframe {
            vk::PolygonMode::LINE
        } else {
            vk::PolygonMode::FILL
        })
        .cull_mode(convert_cull_mode(raster.cull_mode))
        .front_face(if raster.front_counter_clockwise {
            vk::FrontFace::COUNTER_CLOCKWISE
        } else {
            vk::FrontFace::CLOCKWISE
        })
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(convert_sample_count(info.sample_count));

    let depth = &info.render_state.depth;
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(depth.test_enable)
        .depth_write_enable(depth.write_enable)
        .depth_compare_op(convert_compare_function(depth.compare));

    let blend_attachment = if info.render_state.alpha_blend {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    } else {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    };
    let blend_attachments = vec![blend_attachment; info.color_attachment_count as usize];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    // SAFETY: every state struct referenced by `create_info` lives on this
    // stack frame until the call returns
    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
    }
    .map_err(|(_, e)| map_vk_error(e, "Failed to create graphics pipeline"))?;

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::Internal("graphics pipeline creation returned nothing".into()))
}

fn attachment_description(attachment: &AttachmentInfo) -> vk::AttachmentDescription {
    let layout = convert_image_layout(attachment.layout);
    let (stencil_load, stencil_store) = if attachment.format.has_stencil() {
        (vk::AttachmentLoadOp::LOAD, vk::AttachmentStoreOp::STORE)
    } else {
        (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
    };
    vk::AttachmentDescription::default()
        .format(convert_format(attachment.format))
        .samples(convert_sample_count(attachment.sample_count))
        .load_op(vk::AttachmentLoadOp::LOAD)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(stencil_load)
        .stencil_store_op(stencil_store)
        .initial_layout(layout)
        .final_layout(layout)
}

/// Single-subpass render pass that loads and stores every attachment in
/// the layout the state tracker already put it in.
pub fn create_render_pass(
    device: &ash::Device,
    info: &RenderPassInfo,
) -> Result<vk::RenderPass, RhiError> {
    let mut attachments: Vec<_> = info
        .color_attachments
        .iter()
        .map(attachment_description)
        .collect();
    let color_refs: Vec<_> = info
        .color_attachments
        .iter()
        .enumerate()
        .map(|(index, attachment)| vk::AttachmentReference {
            attachment: index as u32,
            layout: convert_image_layout(attachment.layout),
        })
        .collect();

    let depth_ref = info.depth_attachment.as_ref().map(|attachment| {
        attachments.push(attachment_description(attachment));
        vk::AttachmentReference {
            attachment: color_refs.len() as u32,
            layout: convert_image_layout(attachment.layout),
        }
    });

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if let Some(depth_ref) = &depth_ref {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }
    let subpasses = [subpass];

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses);
    unsafe { device.create_render_pass(&create_info, None) }
        .map_err(|e| map_vk_error(e, "Failed to create render pass"))
}
