//! Integration tests that inspect the simulated GPU.
//!
//! These run on the dummy backend only: they look at the submission log,
//! the live native object counts and drive completion by hand.

mod common;

use std::sync::Arc;

use common::TestContext;
use parking_lot::Mutex;
use redlilium_rhi::backend::{NativeCommand, NativeObject};
use redlilium_rhi::backend::dummy::DummySubmission;
use redlilium_rhi::*;

fn context() -> TestContext {
    TestContext::with_dummy(DummyBackend::new(), DeviceConfig::new().with_debug_names(true))
}

fn barrier_count(submission: &DummySubmission) -> usize {
    submission
        .commands
        .iter()
        .filter(|command| matches!(command, NativeCommand::PipelineBarrier { .. }))
        .count()
}

/// A GPU-only buffer tracked from `COPY_DEST` in every list.
fn staging_buffer(ctx: &TestContext, size: u64) -> Arc<Buffer> {
    ctx.device
        .create_buffer(
            &BufferDescriptor::new(size, BufferUsage::COPY_SRC | BufferUsage::COPY_DST)
                .with_initial_state(ResourceStates::COPY_DEST)
                .with_label("staging"),
        )
        .unwrap()
}

const COMPUTE_BYTECODE: &[u8] = &[0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];

fn compute_pipeline(ctx: &TestContext) -> (Arc<BindingLayout>, Arc<ComputePipeline>) {
    let layout = ctx
        .device
        .get_or_create_binding_layout(
            &BindingLayoutDescriptor::new(ShaderStages::COMPUTE)
                .with_item(BindingLayoutItem::raw_buffer_uav(0)),
        )
        .unwrap();
    let shader = ctx
        .device
        .create_shader(
            &ShaderDescriptor::new(ShaderStages::COMPUTE).with_label("fill_cs"),
            COMPUTE_BYTECODE,
        )
        .unwrap();
    let pipeline = ctx
        .device
        .create_compute_pipeline(
            &ComputePipelineDescriptor::new(shader).with_binding_layout(layout.clone()),
        )
        .unwrap();
    (layout, pipeline)
}

fn uav_buffer(ctx: &TestContext) -> Arc<Buffer> {
    ctx.device
        .create_buffer(
            &BufferDescriptor::new(1024, BufferUsage::UNORDERED_ACCESS)
                .with_initial_state(ResourceStates::UNORDERED_ACCESS),
        )
        .unwrap()
}

// ============================================================================
// Cross-queue Synchronization
// ============================================================================

#[test]
fn test_cross_queue_read_waits_on_write() {
    let ctx = context();
    let staging = staging_buffer(&ctx, 64);
    let readback = ctx.create_readback_buffer(64);

    let mut upload = ctx.open_list(QueueId::Transfer);
    upload.write_buffer_typed(&staging, &[5u32; 16], 0).unwrap();
    ctx.execute(&mut upload);

    let mut copy = ctx.open_list(QueueId::Graphics);
    copy.copy_buffer(&readback, 0, &staging, 0, 64).unwrap();
    ctx.execute(&mut copy);

    let submissions = ctx.dummy().submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].queue, QueueId::Transfer);
    assert_eq!(submissions[0].signals.len(), 1);
    assert!(submissions[0].waits.is_empty());

    assert_eq!(submissions[1].queue, QueueId::Graphics);
    assert_eq!(submissions[1].waits.len(), 1);
    assert_eq!(submissions[1].waits[0].0, submissions[0].signals[0]);

    // Nothing ran yet; reading completes both queues in order
    assert_eq!(ctx.dummy().pending_count(QueueId::Transfer), 1);
    assert_eq!(ctx.read_u32(&readback, 16), vec![5; 16]);
}

#[test]
fn test_same_queue_needs_no_semaphore_wait() {
    let ctx = context();
    let staging = staging_buffer(&ctx, 64);

    for value in 0..3u32 {
        let mut list = ctx.open_list(QueueId::Graphics);
        list.clear_buffer_uint(&staging, value).unwrap();
        ctx.execute(&mut list);
    }

    let submissions = ctx.dummy().submissions();
    assert_eq!(submissions.len(), 3);
    assert!(submissions.iter().all(|s| s.waits.is_empty()));
    assert!(submissions.iter().all(|s| s.signals.len() == 1));
    assert!(submissions.iter().all(|s| s.fence.is_some()));
}

#[test]
fn test_write_after_cross_queue_read_waits_on_reader() {
    let ctx = context();
    let staging = staging_buffer(&ctx, 64);
    let readback = ctx.create_readback_buffer(64);

    let mut first = ctx.open_list(QueueId::Transfer);
    first.clear_buffer_uint(&staging, 1).unwrap();
    ctx.execute(&mut first);

    let mut read = ctx.open_list(QueueId::Graphics);
    read.copy_buffer(&readback, 0, &staging, 0, 64).unwrap();
    ctx.execute(&mut read);

    let mut second = ctx.open_list(QueueId::Transfer);
    second.clear_buffer_uint(&staging, 2).unwrap();
    ctx.execute(&mut second);

    let submissions = ctx.dummy().submissions();
    assert_eq!(submissions.len(), 3);
    let reader_signal = submissions[1].signals[0];
    assert_eq!(submissions[2].waits.len(), 1);
    assert_eq!(submissions[2].waits[0].0, reader_signal);

    ctx.device.wait_for_idle().unwrap();
    assert_eq!(ctx.read_u32(&readback, 16), vec![1; 16]);
}

#[test]
fn test_empty_submission_has_no_semaphores() {
    let ctx = context();
    let mut list = ctx.open_list(QueueId::Compute);
    ctx.execute(&mut list);

    let submissions = ctx.dummy().submissions();
    assert_eq!(submissions.len(), 1);
    assert!(submissions[0].signals.is_empty());
    assert!(submissions[0].fence.is_some());
}

// ============================================================================
// Retirement and Pooling
// ============================================================================

#[test]
fn test_retire_waits_for_completion() {
    let ctx = context();
    let staging = staging_buffer(&ctx, 64);
    let graphics = ctx.device.queue(QueueId::Graphics).unwrap().clone();

    let mut list = ctx.open_list(QueueId::Graphics);
    list.clear_buffer_uint(&staging, 9).unwrap();
    ctx.execute(&mut list);

    assert_eq!(graphics.retire_command_buffers().unwrap(), 0);
    assert_eq!(graphics.in_flight_count(), 1);
    assert!(staging.memory_resource().write_fence().is_some());
    assert!(graphics.last_submitted_fence().is_some());

    assert!(ctx.dummy().complete_next(QueueId::Graphics).unwrap());
    assert_eq!(graphics.retire_command_buffers().unwrap(), 1);
    assert_eq!(graphics.in_flight_count(), 0);
    assert!(staging.memory_resource().write_fence().is_none());
    assert!(staging.memory_resource().write_semaphore().is_none());
    assert!(graphics.last_submitted_fence().is_none());
}

#[test]
fn test_one_shot_buffer_retires_after_external_signal() {
    let ctx = context();
    let readback = ctx.create_readback_buffer(256);
    assert!(readback.memory_resource().property_flags().contains(
        MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_CACHED
    ));

    let graphics = ctx.device.queue(QueueId::Graphics).unwrap().clone();
    let mut command_buffer = graphics.create_one_shot_cmd_buf().unwrap();
    command_buffer.mark_write(readback.clone());
    command_buffer.mark_read(readback.clone());
    graphics.submit(command_buffer).unwrap();
    assert!(readback.memory_resource().write_fence().is_some());
    assert!(readback.memory_resource().read_fence().is_some());

    let fence = {
        let pooled = graphics.last_submitted_fence().unwrap();
        pooled.fence().unwrap().native().unwrap()
    };
    assert_eq!(graphics.retire_command_buffers().unwrap(), 0);
    ctx.dummy().signal_fence(fence).unwrap();
    assert_eq!(graphics.retire_command_buffers().unwrap(), 1);

    assert_eq!(graphics.outstanding_command_buffers(), 0);
    let stats = ctx.device.sync_pool().stats();
    assert_eq!(stats.semaphores_outstanding, 0);
    assert_eq!(stats.fences_outstanding, 0);
    assert!(readback.memory_resource().write_semaphore().is_none());
    assert!(readback.memory_resource().read_semaphore().is_none());
}

#[test]
fn test_sync_objects_are_reused() {
    let ctx = context();
    let staging = staging_buffer(&ctx, 64);

    for value in 0..32u32 {
        let mut list = ctx.open_list(QueueId::Graphics);
        list.clear_buffer_uint(&staging, value).unwrap();
        ctx.execute_and_wait(&mut list);
    }

    let stats = ctx.device.sync_pool().stats();
    assert_eq!(stats.fences_outstanding, 0);
    assert_eq!(stats.semaphores_outstanding, 0);
    assert!(stats.fences_allocated <= 2);
    assert!(stats.semaphores_allocated <= 2);
    assert_eq!(ctx.dummy().live_fences(), stats.fences_allocated);
    assert_eq!(ctx.dummy().live_semaphores(), stats.semaphores_allocated);

    let graphics = ctx.device.queue(QueueId::Graphics).unwrap();
    assert_eq!(graphics.allocated_command_buffers(), 1);
}

#[test]
fn test_fixed_sync_pool_exhausts() {
    let ctx = TestContext::with_dummy(
        DummyBackend::new(),
        DeviceConfig::new().with_max_sync_objects(2),
    );

    for _ in 0..2 {
        let mut list = ctx.open_list(QueueId::Graphics);
        ctx.execute(&mut list);
    }

    let mut list = ctx.open_list(QueueId::Graphics);
    list.close().unwrap();
    let err = ctx.device.execute_command_list(&mut list).unwrap_err();
    assert_eq!(err, RhiError::PoolExhausted);

    // Retiring frees the fences again
    ctx.device.wait_for_idle().unwrap();
    let mut list = ctx.open_list(QueueId::Graphics);
    ctx.execute(&mut list);
}

#[test]
fn test_submit_fence_listener() {
    let ctx = context();
    let graphics = ctx.device.queue(QueueId::Graphics).unwrap().clone();
    let observed: Arc<Mutex<Vec<PooledFence>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = observed.clone();
    graphics.add_submit_fence_listener(move |fence| sink.lock().push(fence));

    let mut list = ctx.open_list(QueueId::Graphics);
    ctx.execute(&mut list);

    let fences = std::mem::take(&mut *observed.lock());
    assert_eq!(fences.len(), 1);
    assert!(!fences[0].is_signaled().unwrap());
    ctx.dummy().complete_all().unwrap();
    assert!(fences[0].is_signaled().unwrap());

    // The listener's reference keeps the fence out of the pool until dropped
    ctx.device.wait_for_idle().unwrap();
    assert_eq!(ctx.device.sync_pool().stats().fences_outstanding, 1);
    drop(fences);
    assert_eq!(ctx.device.sync_pool().stats().fences_outstanding, 0);
}

#[test]
fn test_auto_complete_backend() {
    let ctx = TestContext::with_dummy(
        DummyBackend::new().with_auto_complete(true),
        DeviceConfig::new(),
    );
    let mut list = ctx.open_list(QueueId::Graphics);
    ctx.execute(&mut list);

    assert_eq!(ctx.dummy().pending_count(QueueId::Graphics), 0);
    let graphics = ctx.device.queue(QueueId::Graphics).unwrap();
    assert_eq!(graphics.retire_command_buffers().unwrap(), 1);
}

// ============================================================================
// Timeouts
// ============================================================================

#[test]
fn test_hung_gpu_times_out() {
    let ctx = context();
    let readback = ctx.create_readback_buffer(64);

    ctx.dummy().set_hung(true);
    let mut list = ctx.open_list(QueueId::Graphics);
    list.clear_buffer_uint(&readback, 3).unwrap();
    ctx.execute(&mut list);

    let graphics = ctx.device.queue(QueueId::Graphics).unwrap();
    assert_eq!(graphics.idle(), Err(RhiError::Timeout));
    let mut out = [0u8; 16];
    assert_eq!(
        ctx.device.read_buffer(&readback, 0, &mut out),
        Err(RhiError::Timeout)
    );
    assert_eq!(ctx.device.wait_for_idle(), Err(RhiError::Timeout));

    ctx.dummy().set_hung(false);
    ctx.device.wait_for_idle().unwrap();
    assert_eq!(ctx.read_u32(&readback, 4), vec![3; 4]);
}

// ============================================================================
// Barriers
// ============================================================================

#[test]
fn test_initial_state_is_restored_on_close() {
    let ctx = context();
    let buffer = ctx
        .device
        .create_buffer(
            &BufferDescriptor::new(64, BufferUsage::COPY_DST | BufferUsage::SHADER_RESOURCE)
                .with_initial_state(ResourceStates::SHADER_RESOURCE),
        )
        .unwrap();

    let mut list = ctx.open_list(QueueId::Graphics);
    list.write_buffer_typed(&buffer, &[1u32; 16], 0).unwrap();
    assert_eq!(list.tracked_state(buffer.id()), Some(ResourceStates::COPY_DEST));
    list.close().unwrap();
    assert_eq!(
        list.tracked_state(buffer.id()),
        Some(ResourceStates::SHADER_RESOURCE)
    );
    ctx.device.execute_command_list(&mut list).unwrap();

    let submission = &ctx.dummy().submissions()[0];
    assert!(matches!(
        submission.commands.as_slice(),
        [
            NativeCommand::PipelineBarrier { .. },
            NativeCommand::UpdateBuffer { .. },
            NativeCommand::PipelineBarrier { .. },
        ]
    ));
    let NativeCommand::PipelineBarrier { buffers, textures } = &submission.commands[0] else {
        unreachable!();
    };
    assert!(textures.is_empty());
    assert_eq!(buffers.len(), 1);
    assert_eq!(
        buffers[0].before,
        convert_resource_state(ResourceStates::SHADER_RESOURCE)
    );
    assert_eq!(
        buffers[0].after,
        convert_resource_state(ResourceStates::COPY_DEST)
    );
}

#[test]
fn test_redundant_transitions_emit_no_barrier() {
    let ctx = context();
    let staging = staging_buffer(&ctx, 64);

    let mut list = ctx.open_list(QueueId::Graphics);
    list.clear_buffer_uint(&staging, 0).unwrap();
    list.clear_buffer_uint(&staging, 1).unwrap();
    list.set_buffer_state(&staging, ResourceStates::COPY_DEST)
        .unwrap();
    list.commit_barriers().unwrap();
    ctx.execute(&mut list);

    assert_eq!(barrier_count(&ctx.dummy().submissions()[0]), 0);
}

#[test]
fn test_large_write_is_chunked() {
    let ctx = context();
    let staging = staging_buffer(&ctx, 200_000);

    let mut list = ctx.open_list(QueueId::Graphics);
    list.write_buffer(&staging, &vec![0xAB; 200_000], 0).unwrap();
    ctx.execute(&mut list);

    let updates: Vec<_> = ctx.dummy().submissions()[0]
        .commands
        .iter()
        .filter_map(|command| match command {
            NativeCommand::UpdateBuffer { offset, data, .. } => Some((*offset, data.len())),
            _ => None,
        })
        .collect();
    assert_eq!(
        updates,
        vec![(0, 65536), (65536, 65536), (131072, 65536), (196608, 3392)]
    );
}

#[rstest::rstest]
#[case::enabled(true, 2)]
#[case::disabled(false, 1)]
fn test_uav_barriers_between_dispatches(#[case] enabled: bool, #[case] expected: usize) {
    let ctx = context();
    let (layout, pipeline) = compute_pipeline(&ctx);
    let buffer = uav_buffer(&ctx);
    let set = ctx
        .device
        .create_binding_set(
            &layout,
            &BindingSetDescriptor::new().with_item(BindingSetItem::raw_buffer_uav(0, buffer.clone())),
        )
        .unwrap();

    let mut list = ctx.open_list(QueueId::Compute);
    list.set_enable_uav_barriers(enabled);
    for _ in 0..2 {
        list.set_compute_state(ComputeState::new(pipeline.clone()).with_binding_set(set.clone()))
            .unwrap();
        list.dispatch(8, 1, 1).unwrap();
    }
    ctx.execute(&mut list);

    let submission = &ctx.dummy().submissions()[0];
    assert_eq!(barrier_count(submission), expected);
    assert_eq!(
        submission
            .commands
            .iter()
            .filter(|c| matches!(c, NativeCommand::Dispatch { x: 8, y: 1, z: 1 }))
            .count(),
        2
    );
    // The dispatch writes the buffer through the UAV binding
    assert!(buffer.memory_resource().write_fence().is_some());
}

// ============================================================================
// Command List Misuse
// ============================================================================

#[test]
fn test_command_list_misuse() {
    let ctx = context();
    let staging = staging_buffer(&ctx, 64);
    let mut list = ctx
        .device
        .create_command_list(ctx.device.command_list_parameters(QueueId::Graphics))
        .unwrap();

    // Not open yet
    assert!(matches!(
        list.clear_buffer_uint(&staging, 0),
        Err(RhiError::InvalidParameter(_))
    ));
    assert!(list.close().is_err());

    list.open().unwrap();
    assert!(list.open().is_err());

    // Unaligned and out-of-range writes
    assert!(list.write_buffer(&staging, &[1, 2, 3], 0).is_err());
    assert!(list.write_buffer(&staging, &[0; 4], 2).is_err());
    assert!(list.write_buffer(&staging, &[0; 8], 60).is_err());
    assert!(list.copy_buffer(&staging, 0, &staging, 16, 32).is_err());
    assert!(list.copy_buffer(&staging, 0, &staging, 32, 32).is_ok());

    assert!(matches!(
        list.dispatch(1, 1, 1),
        Err(RhiError::InvalidParameter(_))
    ));
    assert!(list.draw(DrawArguments::new(3)).is_err());
    ctx.execute(&mut list);
}

#[test]
fn test_compute_state_validation() {
    let ctx = context();
    let (_, pipeline) = compute_pipeline(&ctx);
    let other_layout = ctx
        .device
        .create_binding_layout(
            &BindingLayoutDescriptor::new(ShaderStages::COMPUTE)
                .with_item(BindingLayoutItem::raw_buffer_uav(0)),
        )
        .unwrap();
    let buffer = uav_buffer(&ctx);
    let foreign_set = ctx
        .device
        .create_binding_set(
            &other_layout,
            &BindingSetDescriptor::new().with_item(BindingSetItem::raw_buffer_uav(0, buffer)),
        )
        .unwrap();

    let mut list = ctx.open_list(QueueId::Compute);
    assert!(list.set_compute_state(ComputeState::new(pipeline.clone())).is_err());
    assert!(list
        .set_compute_state(ComputeState::new(pipeline).with_binding_set(foreign_set))
        .is_err());
}

#[test]
fn test_missing_queue() {
    let ctx = TestContext::with_dummy(
        DummyBackend::new().with_queue(QueueId::Compute, false),
        DeviceConfig::new(),
    );
    assert!(ctx.device.queue(QueueId::Compute).is_none());
    let err = ctx
        .device
        .create_command_list(CommandListParameters::new(QueueId::Compute))
        .unwrap_err();
    assert!(matches!(err, RhiError::FeatureNotSupported(_)));
}

// ============================================================================
// Graphics
// ============================================================================

#[test]
fn test_draw_in_render_pass() {
    let ctx = context();
    let target = ctx.create_texture(
        64,
        32,
        Format::Rgba8Unorm,
        TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
    );
    let framebuffer = ctx
        .device
        .create_framebuffer(
            &FramebufferDescriptor::new()
                .with_color_attachment(FramebufferAttachment::new(target.clone())),
        )
        .unwrap();
    let info = framebuffer.info().clone();
    assert_eq!(info.color_formats, vec![Format::Rgba8Unorm]);
    assert_eq!((info.width, info.height), (64, 32));

    let vs = ctx
        .device
        .create_shader(&ShaderDescriptor::new(ShaderStages::VERTEX), COMPUTE_BYTECODE)
        .unwrap();
    let ps = ctx
        .device
        .create_shader(&ShaderDescriptor::new(ShaderStages::PIXEL), COMPUTE_BYTECODE)
        .unwrap();
    let pipeline = ctx
        .device
        .create_graphics_pipeline(&GraphicsPipelineDescriptor::new(vs).with_pixel_shader(ps), &info)
        .unwrap();

    let mut list = ctx.open_list(QueueId::Graphics);
    list.begin_tracking_texture_state(&target, ResourceStates::SHADER_RESOURCE)
        .unwrap();
    list.set_graphics_state(GraphicsState::new(pipeline.clone(), framebuffer.clone()))
        .unwrap();
    list.draw(DrawArguments::new(3)).unwrap();
    assert!(list.draw_indexed(DrawArguments::new(3)).is_err());
    assert_eq!(
        list.tracked_state(target.id()),
        Some(ResourceStates::RENDER_TARGET)
    );
    ctx.execute(&mut list);

    let commands = &ctx.dummy().submissions()[0].commands;
    let begin = commands
        .iter()
        .position(|c| matches!(c, NativeCommand::BeginRenderPass { .. }))
        .unwrap();
    let draw = commands
        .iter()
        .position(|c| matches!(c, NativeCommand::Draw { vertex_count: 3, .. }))
        .unwrap();
    let end = commands
        .iter()
        .position(|c| matches!(c, NativeCommand::EndRenderPass))
        .unwrap();
    assert!(matches!(commands[0], NativeCommand::PipelineBarrier { .. }));
    assert!(begin < draw && draw < end);
    assert_eq!(end, commands.len() - 1);
}

#[test]
fn test_indexed_draw() {
    let ctx = context();
    let target = ctx.create_texture(16, 16, Format::Bgra8Unorm, TextureUsage::RENDER_TARGET);
    let framebuffer = ctx
        .device
        .create_framebuffer(
            &FramebufferDescriptor::new().with_color_attachment(FramebufferAttachment::new(target.clone())),
        )
        .unwrap();
    let vs = ctx
        .device
        .create_shader(&ShaderDescriptor::new(ShaderStages::VERTEX), COMPUTE_BYTECODE)
        .unwrap();
    let pipeline = ctx
        .device
        .create_graphics_pipeline(&GraphicsPipelineDescriptor::new(vs), framebuffer.info())
        .unwrap();
    let indices = ctx
        .device
        .create_buffer(
            &BufferDescriptor::new(24, BufferUsage::INDEX | BufferUsage::COPY_DST)
                .with_initial_state(ResourceStates::INDEX_BUFFER),
        )
        .unwrap();

    let mut list = ctx.open_list(QueueId::Graphics);
    list.begin_tracking_texture_state(&target, ResourceStates::RENDER_TARGET)
        .unwrap();
    list.set_graphics_state(
        GraphicsState::new(pipeline, framebuffer).with_index_buffer(indices.clone(), IndexFormat::Uint16),
    )
    .unwrap();
    list.draw_indexed(DrawArguments::new(6).with_instance_count(2))
        .unwrap();

    // A copy ends the render pass; drawing needs the state again
    list.clear_buffer_uint(&indices, 0).unwrap();
    assert!(list.draw_indexed(DrawArguments::new(6)).is_err());
    ctx.execute(&mut list);

    let commands = &ctx.dummy().submissions()[0].commands;
    assert!(commands.iter().any(|c| matches!(
        c,
        NativeCommand::DrawIndexed {
            index_count: 6,
            instance_count: 2,
            ..
        }
    )));
    assert!(commands.iter().any(|c| matches!(
        c,
        NativeCommand::BindIndexBuffer {
            format: IndexFormat::Uint16,
            ..
        }
    )));
}

// ============================================================================
// Caches and Views
// ============================================================================

#[test]
fn test_binding_cache_deduplicates() {
    let ctx = context();
    let descriptor = BindingLayoutDescriptor::new(ShaderStages::COMPUTE)
        .with_item(BindingLayoutItem::raw_buffer_uav(0));
    let a = ctx.device.get_or_create_binding_layout(&descriptor).unwrap();
    let b = ctx.device.get_or_create_binding_layout(&descriptor).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(ctx.device.binding_cache().layout_count(), 1);

    let first = uav_buffer(&ctx);
    let second = uav_buffer(&ctx);
    let items = |buffer: &Arc<Buffer>| {
        BindingSetDescriptor::new().with_item(BindingSetItem::raw_buffer_uav(0, buffer.clone()))
    };
    let set_a = ctx.device.get_or_create_binding_set(&a, &items(&first)).unwrap();
    let set_b = ctx.device.get_or_create_binding_set(&a, &items(&first)).unwrap();
    let set_c = ctx.device.get_or_create_binding_set(&a, &items(&second)).unwrap();
    assert!(Arc::ptr_eq(&set_a, &set_b));
    assert!(!Arc::ptr_eq(&set_a, &set_c));
    assert_eq!(ctx.device.binding_cache().set_count(), 2);

    drop((set_a, set_b, set_c));
    ctx.device.run_garbage_collection().unwrap();
    assert_eq!(ctx.device.binding_cache().set_count(), 0);
    assert_eq!(ctx.device.binding_cache().layout_count(), 1);
}

#[test]
fn test_typed_buffer_views_are_cached() {
    let ctx = context();
    let buffer = ctx
        .device
        .create_buffer(
            &BufferDescriptor::new(256, BufferUsage::TYPED_VIEWS | BufferUsage::SHADER_RESOURCE)
                .with_format(Format::R32Uint),
        )
        .unwrap();

    let whole = buffer
        .get_typed_view(Format::Unknown, BufferRange::ENTIRE)
        .unwrap();
    let explicit = buffer
        .get_typed_view(Format::R32Uint, BufferRange::new(0, 256))
        .unwrap();
    assert_eq!(whole, explicit);
    let half = buffer
        .get_typed_view(Format::R32Float, BufferRange::new(128, 128))
        .unwrap();
    assert_ne!(whole, half);
    assert_eq!(buffer.view_count(), 2);

    let plain = ctx.create_buffer(256, BufferUsage::SHADER_RESOURCE);
    assert!(plain.get_typed_view(Format::R32Uint, BufferRange::ENTIRE).is_err());
}

#[test]
fn test_objects_are_destroyed_with_their_owners() {
    let ctx = context();
    let resources = ctx.dummy().live_resources();
    let allocations = ctx.dummy().live_allocations();

    let buffer = ctx.create_buffer(64, BufferUsage::COPY_DST);
    let texture = ctx.create_texture(8, 8, Format::Rgba8Unorm, TextureUsage::SHADER_RESOURCE);
    assert_eq!(ctx.dummy().live_resources(), resources + 2);
    assert_eq!(ctx.dummy().live_allocations(), allocations + 2);
    assert_eq!(
        ctx.dummy().object_name(NativeObject::Buffer(buffer.native())),
        Some("test_buffer".to_string())
    );

    drop(buffer);
    drop(texture);
    assert_eq!(ctx.dummy().live_resources(), resources);
    assert_eq!(ctx.dummy().live_allocations(), allocations);
}

#[test]
fn test_in_flight_resources_outlive_their_handles() {
    let ctx = context();
    let resources = ctx.dummy().live_resources();

    let staging = staging_buffer(&ctx, 64);
    let mut list = ctx.open_list(QueueId::Graphics);
    list.clear_buffer_uint(&staging, 4).unwrap();
    ctx.execute(&mut list);
    drop(staging);

    // The submission still references the buffer
    assert_eq!(ctx.dummy().live_resources(), resources + 1);
    ctx.device.wait_for_idle().unwrap();
    assert_eq!(ctx.dummy().live_resources(), resources);
}
