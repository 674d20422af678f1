//! Translation of recorded commands into Vulkan command buffer calls.

use ash::vk;

use super::barriers::BarrierBatch;
use super::conversion::{aspect_mask, convert_index_format, convert_subresource_range};
use crate::backend::{NativeCommand, PipelineBindPoint};
use crate::error::RhiError;
use crate::types::Format;

fn foreign(what: &str) -> RhiError {
    RhiError::Internal(format!("{what} belongs to another backend"))
}

fn bind_point(point: PipelineBindPoint) -> vk::PipelineBindPoint {
    match point {
        PipelineBindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
        PipelineBindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
    }
}

fn depth_stencil_aspects(format: Format, depth: bool, stencil: bool) -> vk::ImageAspectFlags {
    let mut aspects = vk::ImageAspectFlags::empty();
    if depth {
        aspects |= vk::ImageAspectFlags::DEPTH;
    }
    if stencil && format.has_stencil() {
        aspects |= vk::ImageAspectFlags::STENCIL;
    }
    aspects
}

/// Record one command into `cmd`.
///
/// The `unsafe` blocks below share one contract: `cmd` is in the recording
/// state and owned by the calling [`TrackedCommandBuffer`](crate::queue::TrackedCommandBuffer),
/// which is never recorded from two threads at once, and every handle was
/// created by `device` and is kept alive by the command buffer's references.
pub fn record_command(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    command: NativeCommand,
) -> Result<(), RhiError> {
    match command {
        NativeCommand::PipelineBarrier { buffers, textures } => {
            BarrierBatch::from_native(&buffers, &textures)?.submit(device, cmd);
        }
        NativeCommand::BindPipeline {
            bind_point: point,
            pipeline,
        } => {
            let pipeline = pipeline.as_vulkan().ok_or_else(|| foreign("pipeline"))?;
            unsafe { device.cmd_bind_pipeline(cmd, bind_point(point), pipeline) };
        }
        NativeCommand::BindDescriptorSets {
            bind_point: point,
            layout,
            first_set,
            sets,
        } => {
            let layout = layout.as_vulkan().ok_or_else(|| foreign("pipeline layout"))?;
            let sets = sets
                .iter()
                .map(|set| {
                    set.as_vulkan()
                        .map(|(_, set)| set)
                        .ok_or_else(|| foreign("descriptor set"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            unsafe {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    bind_point(point),
                    layout,
                    first_set,
                    &sets,
                    &[],
                )
            };
        }
        NativeCommand::BeginRenderPass {
            render_pass,
            framebuffer,
            extent,
        } => {
            let render_pass = render_pass.as_vulkan().ok_or_else(|| foreign("render pass"))?;
            let framebuffer = framebuffer.as_vulkan().ok_or_else(|| foreign("framebuffer"))?;
            // Attachments are loaded, so no clear values
            let begin_info = vk::RenderPassBeginInfo::default()
                .render_pass(render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: vk::Extent2D {
                        width: extent.width,
                        height: extent.height,
                    },
                });
            unsafe { device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE) };
        }
        NativeCommand::EndRenderPass => unsafe { device.cmd_end_render_pass(cmd) },
        NativeCommand::SetViewport(viewport) => {
            let vk_viewport = vk::Viewport {
                x: viewport.x,
                y: viewport.y,
                width: viewport.width,
                height: viewport.height,
                min_depth: viewport.min_depth,
                max_depth: viewport.max_depth,
            };
            unsafe { device.cmd_set_viewport(cmd, 0, &[vk_viewport]) };
        }
        NativeCommand::SetScissor(scissor) => {
            let rect = vk::Rect2D {
                offset: vk::Offset2D {
                    x: scissor.x,
                    y: scissor.y,
                },
                extent: vk::Extent2D {
                    width: scissor.width,
                    height: scissor.height,
                },
            };
            unsafe { device.cmd_set_scissor(cmd, 0, &[rect]) };
        }
        NativeCommand::BindVertexBuffers {
            first_binding,
            buffers,
        } => {
            let mut handles = Vec::with_capacity(buffers.len());
            let mut offsets = Vec::with_capacity(buffers.len());
            for (buffer, offset) in buffers {
                handles.push(buffer.as_vulkan().ok_or_else(|| foreign("vertex buffer"))?);
                offsets.push(offset);
            }
            unsafe { device.cmd_bind_vertex_buffers(cmd, first_binding, &handles, &offsets) };
        }
        NativeCommand::BindIndexBuffer {
            buffer,
            offset,
            format,
        } => {
            let buffer = buffer.as_vulkan().ok_or_else(|| foreign("index buffer"))?;
            unsafe {
                device.cmd_bind_index_buffer(cmd, buffer, offset, convert_index_format(format))
            };
        }
        NativeCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        } => unsafe {
            device.cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance)
        },
        NativeCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        } => unsafe {
            device.cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        },
        NativeCommand::Dispatch { x, y, z } => unsafe { device.cmd_dispatch(cmd, x, y, z) },
        NativeCommand::UpdateBuffer {
            buffer,
            offset,
            data,
        } => {
            let buffer = buffer.as_vulkan().ok_or_else(|| foreign("buffer"))?;
            // SAFETY: the command list splits writes into chunks of at most
            // 65536 bytes with 4-byte aligned offset and size
            unsafe { device.cmd_update_buffer(cmd, buffer, offset, &data) };
        }
        NativeCommand::FillBuffer {
            buffer,
            offset,
            size,
            value,
        } => {
            let buffer = buffer.as_vulkan().ok_or_else(|| foreign("buffer"))?;
            unsafe { device.cmd_fill_buffer(cmd, buffer, offset, size, value) };
        }
        NativeCommand::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        } => {
            let src = src.as_vulkan().ok_or_else(|| foreign("source buffer"))?;
            let dst = dst.as_vulkan().ok_or_else(|| foreign("destination buffer"))?;
            let region = vk::BufferCopy {
                src_offset,
                dst_offset,
                size,
            };
            unsafe { device.cmd_copy_buffer(cmd, src, dst, &[region]) };
        }
        NativeCommand::ClearColorImage {
            texture,
            color,
            subresources,
        } => {
            let image = texture.as_vulkan().ok_or_else(|| foreign("texture"))?;
            let clear = vk::ClearColorValue { float32: color };
            let range = convert_subresource_range(subresources, vk::ImageAspectFlags::COLOR);
            unsafe {
                device.cmd_clear_color_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear,
                    &[range],
                )
            };
        }
        NativeCommand::ClearDepthStencilImage {
            texture,
            format,
            depth,
            stencil,
            subresources,
        } => {
            let image = texture.as_vulkan().ok_or_else(|| foreign("texture"))?;
            let aspects = depth_stencil_aspects(format, depth.is_some(), stencil.is_some())
                & aspect_mask(format);
            if aspects.is_empty() {
                return Ok(());
            }
            let clear = vk::ClearDepthStencilValue {
                depth: depth.unwrap_or(0.0),
                stencil: u32::from(stencil.unwrap_or(0)),
            };
            let range = convert_subresource_range(subresources, aspects);
            unsafe {
                device.cmd_clear_depth_stencil_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear,
                    &[range],
                )
            };
        }
    }
    Ok(())
}
