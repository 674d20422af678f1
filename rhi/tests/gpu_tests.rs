//! GPU integration tests run against every available backend.
//!
//! Each test is parameterized over the backends with rstest. Backends that
//! are not compiled in, or that cannot create a device on this machine, are
//! skipped with a message instead of failing.

mod common;

use common::{Backend, TestContext};
use redlilium_rhi::{
    BufferUsage, Color, Format, GpuResource, QueueId, ResourceStates, RhiError,
    TextureSubresourceSet, TextureUsage,
};
use rstest::rstest;

macro_rules! require_context {
    ($backend:expr) => {
        match TestContext::new($backend) {
            Some(ctx) => ctx,
            None => {
                eprintln!("Skipping test: {} backend not available", $backend.name());
                return;
            }
        }
    };
}

// ============================================================================
// Buffer Writes and Read-back
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_write_buffer_readback(#[case] backend: Backend) {
    let ctx = require_context!(backend);

    let data: Vec<u32> = (0..64).map(|i| i * 3 + 1).collect();
    let readback = ctx.create_readback_buffer(256);

    let mut list = ctx.open_list(QueueId::Graphics);
    list.write_buffer_typed(&readback, &data, 0).unwrap();
    ctx.execute(&mut list);

    // read_buffer waits for the last write on its own
    assert_eq!(ctx.read_u32(&readback, 64), data);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_clear_buffer_uint(#[case] backend: Backend) {
    let ctx = require_context!(backend);

    let readback = ctx.create_readback_buffer(128);
    let mut list = ctx.open_list(QueueId::Graphics);
    list.clear_buffer_uint(&readback, 0xDEAD_BEEF).unwrap();
    ctx.execute_and_wait(&mut list);

    assert!(ctx.read_u32(&readback, 32).iter().all(|&v| v == 0xDEAD_BEEF));
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_copy_buffer_roundtrip(#[case] backend: Backend) {
    let ctx = require_context!(backend);

    let data: Vec<u32> = (0..32).map(|i| 1000 + i).collect();
    let upload = ctx.create_upload_buffer(128);
    ctx.device
        .write_buffer_host(&upload, 0, bytemuck::cast_slice(&data))
        .unwrap();

    let gpu = ctx.create_buffer(128, BufferUsage::COPY_SRC | BufferUsage::COPY_DST);
    let readback = ctx.create_readback_buffer(128);

    let mut list = ctx.open_list(QueueId::Graphics);
    list.begin_tracking_buffer_state(&gpu, ResourceStates::COPY_DEST)
        .unwrap();
    list.copy_buffer(&gpu, 0, &upload, 0, 128).unwrap();
    list.copy_buffer(&readback, 0, &gpu, 0, 128).unwrap();
    assert_eq!(
        list.tracked_state(gpu.id()),
        Some(ResourceStates::COPY_SOURCE)
    );
    ctx.execute_and_wait(&mut list);

    assert_eq!(ctx.read_u32(&readback, 32), data);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_copy_buffer_partial(#[case] backend: Backend) {
    let ctx = require_context!(backend);

    let readback = ctx.create_readback_buffer(64);
    let source = ctx.create_buffer(64, BufferUsage::COPY_SRC | BufferUsage::COPY_DST);

    let mut list = ctx.open_list(QueueId::Graphics);
    list.begin_tracking_buffer_state(&source, ResourceStates::COPY_DEST)
        .unwrap();
    list.write_buffer_typed(&source, &[7u32; 16], 0).unwrap();
    list.clear_buffer_uint(&readback, 0).unwrap();
    // Middle 32 bytes only
    list.copy_buffer(&readback, 16, &source, 16, 32).unwrap();
    ctx.execute_and_wait(&mut list);

    let values = ctx.read_u32(&readback, 16);
    assert_eq!(&values[..4], &[0; 4]);
    assert_eq!(&values[4..12], &[7; 8]);
    assert_eq!(&values[12..], &[0; 4]);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_large_write_is_split(#[case] backend: Backend) {
    let ctx = require_context!(backend);

    let count = 40_000usize; // 160 KB, three inline updates
    let data: Vec<u32> = (0..count as u32).collect();
    let readback = ctx.create_readback_buffer((count * 4) as u64);

    let mut list = ctx.open_list(QueueId::Graphics);
    list.write_buffer_typed(&readback, &data, 0).unwrap();
    ctx.execute_and_wait(&mut list);

    let values: Vec<u32> = ctx.device.read_buffer_typed(&readback, 0, count).unwrap();
    assert_eq!(values, data);
}

// ============================================================================
// Multi-queue
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_transfer_then_graphics_copy(#[case] backend: Backend) {
    let ctx = require_context!(backend);
    if !ctx.has_queue(QueueId::Transfer) {
        eprintln!("Skipping test: no dedicated transfer queue");
        return;
    }

    let staging = ctx.create_buffer(64, BufferUsage::COPY_SRC | BufferUsage::COPY_DST);
    let readback = ctx.create_readback_buffer(64);

    let mut upload = ctx.open_list(QueueId::Transfer);
    upload
        .begin_tracking_buffer_state(&staging, ResourceStates::COPY_DEST)
        .unwrap();
    upload.write_buffer_typed(&staging, &[42u32; 16], 0).unwrap();
    ctx.execute(&mut upload);

    let mut copy = ctx.open_list(QueueId::Graphics);
    copy.begin_tracking_buffer_state(&staging, ResourceStates::COPY_DEST)
        .unwrap();
    copy.copy_buffer(&readback, 0, &staging, 0, 64).unwrap();
    ctx.execute_and_wait(&mut copy);

    assert_eq!(ctx.read_u32(&readback, 16), vec![42; 16]);
}

// ============================================================================
// Lifetime and Pooling
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_sync_objects_return_to_pool(#[case] backend: Backend) {
    let ctx = require_context!(backend);

    let buffer = ctx.create_buffer(256, BufferUsage::COPY_DST);
    for i in 0..16u32 {
        let mut list = ctx.open_list(QueueId::Graphics);
        list.begin_tracking_buffer_state(&buffer, ResourceStates::COPY_DEST)
            .unwrap();
        list.clear_buffer_uint(&buffer, i).unwrap();
        ctx.execute(&mut list);
    }
    ctx.device.wait_for_idle().unwrap();

    let stats = ctx.device.sync_pool().stats();
    assert_eq!(stats.fences_outstanding, 0);
    assert_eq!(stats.semaphores_outstanding, 0);

    let graphics = ctx.device.queue(QueueId::Graphics).unwrap();
    assert_eq!(graphics.in_flight_count(), 0);
    assert_eq!(graphics.outstanding_command_buffers(), 0);
    assert!(buffer.memory_resource().write_fence().is_none());
    assert!(buffer.memory_resource().write_semaphore().is_none());
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_dropped_list_recycles_command_buffer(#[case] backend: Backend) {
    let ctx = require_context!(backend);

    let graphics = ctx.device.queue(QueueId::Graphics).unwrap().clone();
    {
        let list = ctx.open_list(QueueId::Graphics);
        assert!(list.is_open());
        assert_eq!(graphics.outstanding_command_buffers(), 1);
    }
    assert_eq!(graphics.outstanding_command_buffers(), 0);
}

// ============================================================================
// Textures
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_clear_color_and_depth(#[case] backend: Backend) {
    let ctx = require_context!(backend);

    let color = ctx.create_texture(
        32,
        32,
        Format::Rgba8Unorm,
        TextureUsage::COPY_DST | TextureUsage::RENDER_TARGET,
    );
    let depth = ctx.create_texture(
        32,
        32,
        Format::Depth32Float,
        TextureUsage::COPY_DST | TextureUsage::RENDER_TARGET,
    );

    let mut list = ctx.open_list(QueueId::Graphics);
    list.begin_tracking_texture_state(&color, ResourceStates::SHADER_RESOURCE)
        .unwrap();
    list.begin_tracking_texture_state(&depth, ResourceStates::DEPTH_READ)
        .unwrap();
    list.clear_texture_float(&color, TextureSubresourceSet::ALL, Color::new(1.0, 0.0, 0.0, 1.0))
        .unwrap();
    list.clear_depth_stencil_texture(&depth, TextureSubresourceSet::ALL, Some(1.0), Some(0))
        .unwrap();

    // Depth formats are rejected by the colour clear
    let err = list
        .clear_texture_float(&depth, TextureSubresourceSet::ALL, Color::BLACK)
        .unwrap_err();
    assert!(matches!(err, RhiError::InvalidParameter(_)));

    assert_eq!(list.tracked_state(color.id()), Some(ResourceStates::COPY_DEST));
    assert_eq!(list.tracked_state(depth.id()), Some(ResourceStates::COPY_DEST));
    ctx.execute_and_wait(&mut list);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_texture_view_cache(#[case] backend: Backend) {
    use redlilium_rhi::TextureViewKind;

    let ctx = require_context!(backend);
    let texture = ctx.device
        .create_texture(
            &redlilium_rhi::TextureDescriptor::new_2d(
                64,
                64,
                Format::Rgba8Unorm,
                TextureUsage::SHADER_RESOURCE | TextureUsage::UNORDERED_ACCESS,
            )
            .with_mip_levels(4),
        )
        .unwrap();

    let all = texture
        .get_view(
            TextureViewKind::ShaderResource,
            Format::Unknown,
            TextureSubresourceSet::ALL,
            false,
        )
        .unwrap();
    let explicit = texture
        .get_view(
            TextureViewKind::ShaderResource,
            Format::Rgba8Unorm,
            TextureSubresourceSet::new(0, 4, 0, 1),
            false,
        )
        .unwrap();
    assert_eq!(all, explicit);
    assert_eq!(texture.view_count(), 1);

    let mip = texture
        .get_view(
            TextureViewKind::UnorderedAccess,
            Format::Unknown,
            TextureSubresourceSet::mip(2),
            false,
        )
        .unwrap();
    assert_ne!(mip, all);
    assert_eq!(texture.view_count(), 2);

    assert!(texture
        .get_view(
            TextureViewKind::ShaderResource,
            Format::Unknown,
            TextureSubresourceSet::mip(7),
            false,
        )
        .is_err());
}
