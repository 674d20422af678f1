//! Framebuffers and the render passes they are drawn with.

use std::sync::Arc;

use super::Texture;
use crate::backend::{
    AttachmentInfo, FramebufferHandle, NativeObject, RenderPassHandle, RenderPassInfo,
    TextureViewHandle,
};
use crate::context::DeviceContext;
use crate::error::RhiError;
use crate::types::{
    Extent3d, Format, ImageLayout, MAX_RENDER_TARGETS, ResourceStates, TextureSubresourceSet,
    TextureViewKind,
};

/// One texture attached to a framebuffer.
#[derive(Debug, Clone)]
pub struct FramebufferAttachment {
    pub texture: Arc<Texture>,
    /// Mip level and array slices rendered to. Only one mip is used.
    pub subresources: TextureSubresourceSet,
    /// `Format::Unknown` selects the texture format.
    pub format: Format,
    /// Depth attachments only: bind for depth testing without writes.
    pub read_only: bool,
}

impl FramebufferAttachment {
    pub fn new(texture: Arc<Texture>) -> Self {
        Self {
            texture,
            subresources: TextureSubresourceSet::new(0, 1, 0, 1),
            format: Format::Unknown,
            read_only: false,
        }
    }

    pub fn with_subresources(mut self, subresources: TextureSubresourceSet) -> Self {
        self.subresources = subresources;
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    fn resolved_format(&self) -> Format {
        self.format.or(self.texture.format())
    }

    fn resolved_subresources(&self) -> TextureSubresourceSet {
        self.subresources.resolve(self.texture.descriptor(), true)
    }
}

/// Attachments of a framebuffer.
#[derive(Debug, Clone, Default)]
pub struct FramebufferDescriptor {
    pub color_attachments: Vec<FramebufferAttachment>,
    pub depth_attachment: Option<FramebufferAttachment>,
}

impl FramebufferDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_color_attachment(mut self, attachment: FramebufferAttachment) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    pub fn with_depth_attachment(mut self, attachment: FramebufferAttachment) -> Self {
        self.depth_attachment = Some(attachment);
        self
    }
}

/// Formats and dimensions a graphics pipeline is compiled against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferInfo {
    pub color_formats: Vec<Format>,
    pub depth_format: Option<Format>,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
}

impl FramebufferInfo {
    /// Whether a pipeline built for `self` can draw into `other`.
    pub fn is_compatible(&self, other: &FramebufferInfo) -> bool {
        self.color_formats == other.color_formats
            && self.depth_format == other.depth_format
            && self.sample_count == other.sample_count
    }

    pub(crate) fn render_pass_info(&self, depth_read_only: bool) -> RenderPassInfo {
        RenderPassInfo {
            color_attachments: self
                .color_formats
                .iter()
                .map(|format| AttachmentInfo {
                    format: *format,
                    sample_count: self.sample_count,
                    layout: ImageLayout::ColorAttachment,
                })
                .collect(),
            depth_attachment: self.depth_format.map(|format| AttachmentInfo {
                format,
                sample_count: self.sample_count,
                layout: if depth_read_only {
                    ImageLayout::DepthStencilReadOnly
                } else {
                    ImageLayout::DepthStencilAttachment
                },
            }),
        }
    }
}

/// Render targets plus the native render pass and framebuffer objects.
pub struct Framebuffer {
    context: Arc<DeviceContext>,
    descriptor: FramebufferDescriptor,
    info: FramebufferInfo,
    layers: u32,
    render_pass: RenderPassHandle,
    native: FramebufferHandle,
}

impl Framebuffer {
    pub(crate) fn create(
        context: Arc<DeviceContext>,
        descriptor: &FramebufferDescriptor,
    ) -> Result<Arc<Self>, RhiError> {
        if descriptor.color_attachments.is_empty() && descriptor.depth_attachment.is_none() {
            return Err(RhiError::InvalidParameter(
                "framebuffer needs at least one attachment".to_string(),
            ));
        }
        if descriptor.color_attachments.len() > MAX_RENDER_TARGETS {
            return Err(RhiError::InvalidParameter(format!(
                "{} colour attachments exceed the limit of {MAX_RENDER_TARGETS}",
                descriptor.color_attachments.len()
            )));
        }

        let mut views: Vec<TextureViewHandle> = Vec::new();
        let mut shape: Option<(Extent3d, u32, u32)> = None;
        let attachments = descriptor
            .color_attachments
            .iter()
            .map(|a| (a, TextureViewKind::RenderTarget))
            .chain(
                descriptor
                    .depth_attachment
                    .iter()
                    .map(|a| (a, TextureViewKind::DepthStencil)),
            );
        for (attachment, kind) in attachments {
            let subresources = attachment.resolved_subresources();
            let texture = &attachment.texture;
            let extent = texture.extent().mip_level(subresources.base_mip_level);
            let current = (
                Extent3d::new_2d(extent.width, extent.height),
                texture.descriptor().sample_count,
                subresources.num_array_slices,
            );
            match shape {
                None => shape = Some(current),
                Some(expected) if expected != current => {
                    return Err(RhiError::InvalidParameter(format!(
                        "attachment {:?} has extent, samples and layers {current:?}, expected {expected:?}",
                        texture.label()
                    )));
                }
                Some(_) => {}
            }
            views.push(texture.get_view(
                kind,
                attachment.format,
                attachment.subresources,
                attachment.read_only,
            )?);
        }
        let Some((extent, sample_count, layers)) = shape else {
            return Err(RhiError::Internal("framebuffer shape missing".to_string()));
        };

        let info = FramebufferInfo {
            color_formats: descriptor
                .color_attachments
                .iter()
                .map(FramebufferAttachment::resolved_format)
                .collect(),
            depth_format: descriptor
                .depth_attachment
                .as_ref()
                .map(FramebufferAttachment::resolved_format),
            sample_count,
            width: extent.width,
            height: extent.height,
        };
        let depth_read_only = descriptor
            .depth_attachment
            .as_ref()
            .is_some_and(|a| a.read_only);

        let backend = context.backend();
        let render_pass = backend.create_render_pass(&info.render_pass_info(depth_read_only))?;
        let native = match backend.create_framebuffer(
            render_pass,
            &views,
            Extent3d::new_3d(extent.width, extent.height, layers),
        ) {
            Ok(native) => native,
            Err(e) => {
                backend.destroy_render_pass(render_pass);
                return Err(e);
            }
        };
        context.name_object(
            NativeObject::Framebuffer(native),
            &format!("framebuffer {}x{}", extent.width, extent.height),
        );

        Ok(Arc::new(Self {
            context,
            descriptor: descriptor.clone(),
            info,
            layers,
            render_pass,
            native,
        }))
    }

    pub fn descriptor(&self) -> &FramebufferDescriptor {
        &self.descriptor
    }

    pub fn info(&self) -> &FramebufferInfo {
        &self.info
    }

    /// Width, height and layer count.
    pub fn extent(&self) -> Extent3d {
        Extent3d::new_3d(self.info.width, self.info.height, self.layers)
    }

    pub fn native(&self) -> FramebufferHandle {
        self.native
    }

    pub fn render_pass(&self) -> RenderPassHandle {
        self.render_pass
    }

    /// Attachments with the subresources drawn to and the state they need.
    pub(crate) fn attachment_states(
        &self,
    ) -> impl Iterator<Item = (&Arc<Texture>, TextureSubresourceSet, ResourceStates)> {
        let colors = self.descriptor.color_attachments.iter().map(|a| {
            (
                &a.texture,
                a.resolved_subresources(),
                ResourceStates::RENDER_TARGET,
            )
        });
        let depth = self.descriptor.depth_attachment.iter().map(|a| {
            let state = if a.read_only {
                ResourceStates::DEPTH_READ
            } else {
                ResourceStates::DEPTH_WRITE
            };
            (&a.texture, a.resolved_subresources(), state)
        });
        colors.chain(depth)
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        let backend = self.context.backend();
        backend.destroy_framebuffer(self.native);
        backend.destroy_render_pass(self.render_pass);
    }
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("info", &self.info)
            .field("layers", &self.layers)
            .field("native", &self.native)
            .finish()
    }
}

static_assertions::assert_impl_all!(Framebuffer: Send, Sync);
