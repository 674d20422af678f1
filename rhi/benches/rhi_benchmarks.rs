use std::collections::HashMap;
use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redlilium_rhi::{
    BindingLayoutDescriptor, BindingLayoutItem, BindingSetDescriptor, BindingSetItem,
    BufferBindingKey, BufferDescriptor, BufferRange, BufferUsage, Device, DeviceConfig,
    DummyBackend, Format, PipelineStages, QueueId, ResourceStateTracker, ResourceStates,
    ShaderStages, TextureBindingKey, TextureSubresourceSet,
};

fn dummy_device() -> Device {
    Device::new(
        Arc::new(DummyBackend::new().with_auto_complete(true)),
        DeviceConfig::new().with_debug_names(false),
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// State tracking
// ---------------------------------------------------------------------------

fn bench_state_tracker_transitions(c: &mut Criterion) {
    let device = dummy_device();
    let buffers: Vec<_> = (0..64)
        .map(|_| {
            device
                .create_buffer(
                    &BufferDescriptor::new(256, BufferUsage::COPY_DST | BufferUsage::SHADER_RESOURCE)
                        .with_initial_state(ResourceStates::SHADER_RESOURCE),
                )
                .unwrap()
        })
        .collect();

    c.bench_function("state_tracker_64_buffers_roundtrip", |b| {
        b.iter(|| {
            let mut tracker = ResourceStateTracker::new(true);
            for buffer in &buffers {
                tracker.require_buffer_state(buffer, ResourceStates::COPY_DEST);
            }
            black_box(tracker.commit_barriers());
            for buffer in &buffers {
                tracker.require_buffer_state(buffer, ResourceStates::SHADER_RESOURCE);
            }
            black_box(tracker.commit_barriers());
        });
    });
}

// ---------------------------------------------------------------------------
// Sync object pool
// ---------------------------------------------------------------------------

fn bench_sync_pool_get_release(c: &mut Criterion) {
    let device = dummy_device();
    let pool = device.sync_pool().clone();

    c.bench_function("sync_pool_semaphore_and_fence", |b| {
        b.iter(|| {
            let semaphore = pool.get_semaphore(PipelineStages::ALL_COMMANDS).unwrap();
            let fence = pool.get_fence().unwrap();
            pool.release_semaphore(black_box(semaphore));
            pool.release_fence(black_box(fence));
        });
    });
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

fn bench_submit_and_retire(c: &mut Criterion) {
    let device = dummy_device();
    let buffer = device
        .create_buffer(
            &BufferDescriptor::new(4096, BufferUsage::COPY_DST)
                .with_initial_state(ResourceStates::COPY_DEST),
        )
        .unwrap();
    let mut list = device
        .create_command_list(device.command_list_parameters(QueueId::Graphics))
        .unwrap();

    c.bench_function("command_list_clear_submit_retire", |b| {
        b.iter(|| {
            list.open().unwrap();
            list.clear_buffer_uint(&buffer, 0).unwrap();
            list.close().unwrap();
            black_box(device.execute_command_list(&mut list).unwrap());
            device.run_garbage_collection().unwrap();
        });
    });
}

fn bench_cross_queue_submit(c: &mut Criterion) {
    let device = dummy_device();
    let buffer = device
        .create_buffer(
            &BufferDescriptor::new(4096, BufferUsage::COPY_DST | BufferUsage::COPY_SRC)
                .with_initial_state(ResourceStates::COPY_DEST),
        )
        .unwrap();
    let target = device
        .create_buffer(
            &BufferDescriptor::new(4096, BufferUsage::COPY_DST)
                .with_initial_state(ResourceStates::COPY_DEST),
        )
        .unwrap();
    let mut upload = device
        .create_command_list(device.command_list_parameters(QueueId::Transfer))
        .unwrap();
    let mut copy = device
        .create_command_list(device.command_list_parameters(QueueId::Graphics))
        .unwrap();

    c.bench_function("transfer_to_graphics_handoff", |b| {
        b.iter(|| {
            upload.open().unwrap();
            upload.clear_buffer_uint(&buffer, 1).unwrap();
            upload.close().unwrap();
            device.execute_command_list(&mut upload).unwrap();

            copy.open().unwrap();
            copy.copy_buffer(&target, 0, &buffer, 0, 4096).unwrap();
            copy.close().unwrap();
            device.execute_command_list(&mut copy).unwrap();

            device.run_garbage_collection().unwrap();
        });
    });
}

// ---------------------------------------------------------------------------
// Binding keys and caches
// ---------------------------------------------------------------------------

fn bench_binding_key_lookup(c: &mut Criterion) {
    let mut texture_views = HashMap::new();
    for mip in 0..12u32 {
        for slice in 0..8u32 {
            let key = TextureBindingKey::new(
                TextureSubresourceSet::new(mip, 1, slice, 1),
                Format::Rgba8Unorm,
            );
            texture_views.insert(key, mip * 8 + slice);
        }
    }
    let mut buffer_views = HashMap::new();
    for chunk in 0..96u64 {
        buffer_views.insert(
            BufferBindingKey::new(BufferRange::new(chunk * 256, 256), Format::R32Uint),
            chunk,
        );
    }

    c.bench_function("binding_key_lookup_96_textures_96_buffers", |b| {
        b.iter(|| {
            let mut hits = 0u64;
            for mip in 0..12u32 {
                for slice in 0..8u32 {
                    let key = TextureBindingKey::new(
                        TextureSubresourceSet::new(mip, 1, slice, 1),
                        Format::Rgba8Unorm,
                    );
                    hits += u64::from(texture_views.contains_key(black_box(&key)));
                }
            }
            for chunk in 0..96u64 {
                let key =
                    BufferBindingKey::new(BufferRange::new(chunk * 256, 256), Format::R32Uint);
                hits += u64::from(buffer_views.contains_key(black_box(&key)));
            }
            black_box(hits)
        });
    });
}

fn bench_binding_set_cache_hit(c: &mut Criterion) {
    let device = dummy_device();
    let layout = device
        .get_or_create_binding_layout(
            &BindingLayoutDescriptor::new(ShaderStages::COMPUTE)
                .with_item(BindingLayoutItem::raw_buffer_uav(0))
                .with_item(BindingLayoutItem::raw_buffer_srv(1)),
        )
        .unwrap();
    let output = device
        .create_buffer(&BufferDescriptor::new(1024, BufferUsage::UNORDERED_ACCESS))
        .unwrap();
    let input = device
        .create_buffer(&BufferDescriptor::new(1024, BufferUsage::SHADER_RESOURCE))
        .unwrap();
    let descriptor = BindingSetDescriptor::new()
        .with_item(BindingSetItem::raw_buffer_uav(0, output))
        .with_item(BindingSetItem::raw_buffer_srv(1, input));
    let _live = device.get_or_create_binding_set(&layout, &descriptor).unwrap();

    c.bench_function("binding_set_cache_hit", |b| {
        b.iter(|| {
            black_box(
                device
                    .get_or_create_binding_set(&layout, black_box(&descriptor))
                    .unwrap(),
            );
        });
    });
}

// ---------------------------------------------------------------------------
// Resource creation
// ---------------------------------------------------------------------------

fn bench_dummy_create_buffer(c: &mut Criterion) {
    let device = dummy_device();

    c.bench_function("dummy_create_buffer", |b| {
        b.iter(|| {
            black_box(
                device
                    .create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))
                    .unwrap(),
            );
        });
    });
}

criterion_group!(
    benches,
    bench_state_tracker_transitions,
    bench_sync_pool_get_release,
    bench_submit_and_retire,
    bench_cross_queue_submit,
    bench_binding_key_lookup,
    bench_binding_set_cache_hit,
    bench_dummy_create_buffer,
);
criterion_main!(benches);
