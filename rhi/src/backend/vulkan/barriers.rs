//! Barrier batching for the Vulkan backend.
//!
//! The state tracker already produced the transitions; this module turns
//! them into a single `vkCmdPipelineBarrier` call.

use ash::vk;

use super::conversion::{
    aspect_mask, convert_access_flags, convert_image_layout, convert_pipeline_stages,
    convert_subresource_range,
};
use crate::backend::{NativeBufferBarrier, NativeTextureBarrier};
use crate::error::RhiError;

/// Buffer and image barriers submitted together.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    buffer_barriers: Vec<vk::BufferMemoryBarrier<'static>>,
    image_barriers: Vec<vk::ImageMemoryBarrier<'static>>,
    /// Source pipeline stage mask (union of all barriers).
    src_stage_mask: vk::PipelineStageFlags,
    /// Destination pipeline stage mask (union of all barriers).
    dst_stage_mask: vk::PipelineStageFlags,
}

impl BarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch from tracker output.
    pub fn from_native(
        buffers: &[NativeBufferBarrier],
        textures: &[NativeTextureBarrier],
    ) -> Result<Self, RhiError> {
        let mut batch = Self::new();
        for barrier in buffers {
            let buffer = barrier
                .buffer
                .as_vulkan()
                .ok_or_else(|| RhiError::Internal("barrier on a foreign buffer".into()))?;
            batch.add_buffer_barrier(buffer, barrier);
        }
        for barrier in textures {
            let image = barrier
                .texture
                .as_vulkan()
                .ok_or_else(|| RhiError::Internal("barrier on a foreign texture".into()))?;
            batch.add_image_barrier(image, barrier);
        }
        Ok(batch)
    }

    pub fn add_buffer_barrier(&mut self, buffer: vk::Buffer, barrier: &NativeBufferBarrier) {
        self.buffer_barriers.push(
            vk::BufferMemoryBarrier::default()
                .src_access_mask(convert_access_flags(barrier.before.access))
                .dst_access_mask(convert_access_flags(barrier.after.access))
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE),
        );
        self.src_stage_mask |= convert_pipeline_stages(barrier.before.stages);
        self.dst_stage_mask |= convert_pipeline_stages(barrier.after.stages);
    }

    pub fn add_image_barrier(&mut self, image: vk::Image, barrier: &NativeTextureBarrier) {
        self.image_barriers.push(
            vk::ImageMemoryBarrier::default()
                .src_access_mask(convert_access_flags(barrier.before.access))
                .dst_access_mask(convert_access_flags(barrier.after.access))
                .old_layout(convert_image_layout(barrier.before.layout))
                .new_layout(convert_image_layout(barrier.after.layout))
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(convert_subresource_range(
                    barrier.subresources,
                    aspect_mask(barrier.format),
                )),
        );
        self.src_stage_mask |= convert_pipeline_stages(barrier.before.stages);
        self.dst_stage_mask |= convert_pipeline_stages(barrier.after.stages);
    }

    pub fn is_empty(&self) -> bool {
        self.buffer_barriers.is_empty() && self.image_barriers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer_barriers.len() + self.image_barriers.len()
    }

    /// Stage masks with empty sides widened to the pipe ends.
    pub fn stage_masks(&self) -> (vk::PipelineStageFlags, vk::PipelineStageFlags) {
        let src = if self.src_stage_mask.is_empty() {
            vk::PipelineStageFlags::TOP_OF_PIPE
        } else {
            self.src_stage_mask
        };
        let dst = if self.dst_stage_mask.is_empty() {
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        } else {
            self.dst_stage_mask
        };
        (src, dst)
    }

    /// Record the batch. Does nothing when empty.
    pub fn submit(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }
        let (src, dst) = self.stage_masks();
        // SAFETY: `cmd` is recording and outside a render pass; barriers
        // are only committed between passes
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                src,
                dst,
                vk::DependencyFlags::empty(),
                &[],
                &self.buffer_barriers,
                &self.image_barriers,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Format, ResourceStates, TextureSubresourceSet, convert_resource_state};
    use ash::vk::Handle;

    #[test]
    fn test_barrier_batch_empty() {
        let batch = BarrierBatch::new();
        assert!(batch.is_empty());
        assert_eq!(
            batch.stage_masks(),
            (
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE
            )
        );
    }

    #[test]
    fn test_barrier_batch_collects_stages() {
        let mut batch = BarrierBatch::new();
        batch.add_buffer_barrier(
            vk::Buffer::from_raw(1),
            &NativeBufferBarrier {
                buffer: crate::backend::BufferHandle::Vulkan(vk::Buffer::from_raw(1)),
                before: convert_resource_state(ResourceStates::COPY_DEST),
                after: convert_resource_state(ResourceStates::UNORDERED_ACCESS),
            },
        );
        batch.add_image_barrier(
            vk::Image::from_raw(2),
            &NativeTextureBarrier {
                texture: crate::backend::TextureHandle::Vulkan(vk::Image::from_raw(2)),
                format: Format::Depth24UnormStencil8,
                subresources: TextureSubresourceSet::new(0, 1, 0, 1),
                before: convert_resource_state(ResourceStates::COPY_DEST),
                after: convert_resource_state(ResourceStates::DEPTH_WRITE),
            },
        );

        assert_eq!(batch.len(), 2);
        let (src, dst) = batch.stage_masks();
        assert!(src.contains(vk::PipelineStageFlags::TRANSFER));
        assert!(dst.contains(vk::PipelineStageFlags::ALL_COMMANDS));
        assert!(dst.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert_eq!(
            batch.image_barriers[0].subresource_range.aspect_mask,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            batch.image_barriers[0].new_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }
}
