//! Native Vulkan backend implementation using ash.
//!
//! The backend is headless: no surface or swapchain extensions are enabled.
//! Every RHI queue maps to one `VkQueue`. Compute and transfer only exist
//! when the device exposes a dedicated family for them. Resources are created
//! with concurrent sharing across all used families, so cross-queue use only
//! needs the semaphores the device layer already inserts.
//!
//! Host-visible allocations stay persistently mapped. Non-coherent memory is
//! invalidated before reads and flushed after writes.

pub mod barriers;
mod command;
pub(crate) mod conversion;
mod debug;
mod device;
mod instance;
mod pipeline;

use std::collections::HashMap;
use std::ffi::CString;

use ash::vk;
use ash::vk::Handle;
use parking_lot::Mutex;

use self::conversion::{
    aspect_mask, convert_address_mode, convert_buffer_usage, convert_compare_function,
    convert_filter_mode, convert_format, convert_image_type, convert_memory_properties,
    convert_mipmap_filter_mode, convert_pipeline_stages, convert_sample_count,
    convert_subresource_range, convert_texture_usage, convert_view_type, map_vk_error,
};
use self::device::QueueFamilies;
use super::command::*;
use super::handles::*;
use super::GpuBackend;
use crate::config::{DeviceConfig, SyncTimeout};
use crate::error::RhiError;
use crate::profile_function;
use crate::types::{
    BufferDescriptor, Extent3d, MemoryHeap, MemoryProperties, MemoryRequirements, MemoryType,
    QueueId, SamplerDescriptor, ShaderStages, TextureDescriptor, TextureDimension,
    TextureViewKind,
};

/// Host mapping of one allocation.
#[derive(Debug, Clone, Copy)]
struct MappedMemory {
    /// Base address, stored as an integer so the map stays `Send`.
    address: usize,
    size: u64,
    coherent: bool,
}

/// Vulkan-based GPU backend using ash.
pub struct VulkanBackend {
    /// Vulkan entry points (function loader). Must outlive the instance.
    _entry: ash::Entry,
    /// Vulkan instance.
    instance: ash::Instance,
    /// Debug utils extension instance.
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    /// Debug messenger for validation layer output.
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    /// Object naming, present when debug names were requested and supported.
    debug_utils_device: Option<ash::ext::debug_utils::Device>,
    /// Selected physical device.
    physical_device: vk::PhysicalDevice,
    /// Logical device.
    device: ash::Device,
    /// Family of each RHI queue.
    families: QueueFamilies,
    /// Distinct families in use, for concurrent sharing.
    unique_families: Vec<u32>,
    /// Native queues by [`QueueId::index`]. Submission is externally
    /// synchronized, hence the locks.
    queues: [Option<Mutex<vk::Queue>>; 3],
    /// Persistent mappings of host-visible allocations.
    mappings: Mutex<HashMap<vk::DeviceMemory, MappedMemory>>,
    /// Idle-wait fences whose wait timed out. Destroyed once the device is idle.
    abandoned_fences: Mutex<Vec<vk::Fence>>,
    info: DeviceInfo,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("device", &self.info.name)
            .field("families", &self.families)
            .finish()
    }
}

fn native<T>(handle: Option<T>, what: &str) -> Result<T, RhiError> {
    handle.ok_or_else(|| RhiError::Internal(format!("{what} belongs to another backend")))
}

macro_rules! vulkan_or_return {
    ($handle:expr, $what:literal) => {
        match $handle.as_vulkan() {
            Some(handle) => handle,
            None => {
                log::error!("Cannot destroy {}: handle belongs to another backend", $what);
                return;
            }
        }
    };
}

impl VulkanBackend {
    /// Create a Vulkan backend according to `config`.
    pub fn new(config: &DeviceConfig) -> Result<Self, RhiError> {
        profile_function!();

        // SAFETY: the loader library stays loaded for as long as `entry` lives,
        // and the backend keeps `entry` next to the instance
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            RhiError::InitializationFailed(format!("Failed to load Vulkan: {e:?}"))
        })?;

        let bundle = instance::create_instance(&entry, config.validation, config.debug_names)?;
        let instance = bundle.instance;

        // SAFETY: only used on error paths before any child object of the
        // instance other than the messenger exists
        let destroy_instance = |instance: &ash::Instance| unsafe {
            if let (Some(debug_utils), Some(messenger)) =
                (&bundle.debug_utils, bundle.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            instance.destroy_instance(None);
        };

        let physical_device = match device::select_physical_device(&instance) {
            Ok(physical_device) => physical_device,
            Err(e) => {
                destroy_instance(&instance);
                return Err(e);
            }
        };
        let families = match device::find_queue_families(&instance, physical_device) {
            Ok(families) => families,
            Err(e) => {
                destroy_instance(&instance);
                return Err(e);
            }
        };
        let device = match device::create_logical_device(&instance, physical_device, &families) {
            Ok(device) => device,
            Err(e) => {
                destroy_instance(&instance);
                return Err(e);
            }
        };

        let mut unique_families = vec![families.graphics];
        for family in [families.compute, families.transfer].into_iter().flatten() {
            if !unique_families.contains(&family) {
                unique_families.push(family);
            }
        }

        let queues = [QueueId::Graphics, QueueId::Compute, QueueId::Transfer].map(|queue| {
            families
                .family(queue)
                // SAFETY: one queue of every chosen family was requested at device creation
                .map(|family| Mutex::new(unsafe { device.get_device_queue(family, 0) }))
        });

        let debug_utils_device = (config.debug_names && bundle.debug_utils.is_some())
            .then(|| ash::ext::debug_utils::Device::new(&instance, &device));

        let info = Self::query_device_info(
            &instance,
            physical_device,
            &families,
            debug_utils_device.is_some(),
        );

        log::info!(
            "Vulkan device: {} (graphics family {}, compute {:?}, transfer {:?})",
            info.name,
            families.graphics,
            families.compute,
            families.transfer
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug_utils: bundle.debug_utils,
            debug_messenger: bundle.debug_messenger,
            debug_utils_device,
            physical_device,
            device,
            families,
            unique_families,
            queues,
            mappings: Mutex::new(HashMap::new()),
            abandoned_fences: Mutex::new(Vec::new()),
            info,
        })
    }

    fn query_device_info(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: &QueueFamilies,
        debug_utils: bool,
    ) -> DeviceInfo {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory = unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let memory_types = memory.memory_types[..memory.memory_type_count as usize]
            .iter()
            .map(|memory_type| MemoryType {
                property_flags: convert_memory_properties(memory_type.property_flags),
                heap_index: memory_type.heap_index,
            })
            .collect();
        let memory_heaps = memory.memory_heaps[..memory.memory_heap_count as usize]
            .iter()
            .map(|heap| MemoryHeap {
                size: heap.size,
                device_local: heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL),
            })
            .collect();

        let mut extensions = DeviceExtensions::empty();
        if debug_utils {
            extensions |= DeviceExtensions::DEBUG_UTILS;
        }

        DeviceInfo {
            name: properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "Unknown Vulkan device".to_string()),
            memory_properties: MemoryProperties {
                memory_types,
                memory_heaps,
            },
            queues: [
                true,
                families.compute.is_some(),
                families.transfer.is_some(),
            ],
            extensions,
            limits: DeviceLimits {
                max_bound_descriptor_sets: properties.limits.max_bound_descriptor_sets,
                max_texture_dimension_2d: properties.limits.max_image_dimension2_d,
                min_uniform_buffer_offset_alignment: properties
                    .limits
                    .min_uniform_buffer_offset_alignment,
            },
        }
    }

    /// Get the logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the selected physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    fn queue(&self, queue: QueueId) -> Result<&Mutex<vk::Queue>, RhiError> {
        self.queues[queue.index()]
            .as_ref()
            .ok_or_else(|| RhiError::FeatureNotSupported(format!("{queue:?} queue")))
    }

    fn sharing_mode(&self) -> vk::SharingMode {
        if self.unique_families.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        }
    }

    fn mapping(
        &self,
        memory: vk::DeviceMemory,
        offset: u64,
        len: usize,
    ) -> Result<MappedMemory, RhiError> {
        let mapping = self
            .mappings
            .lock()
            .get(&memory)
            .copied()
            .ok_or_else(|| RhiError::InvalidParameter("memory is not host visible".to_string()))?;
        if offset.saturating_add(len as u64) > mapping.size {
            return Err(RhiError::InvalidParameter(
                "memory access out of bounds".to_string(),
            ));
        }
        Ok(mapping)
    }

    fn whole_range(memory: vk::DeviceMemory) -> vk::MappedMemoryRange<'static> {
        vk::MappedMemoryRange::default()
            .memory(memory)
            .offset(0)
            .size(vk::WHOLE_SIZE)
    }

    fn name_object<T: Handle>(&self, handle: T, name: &str) {
        let Some(debug_utils) = &self.debug_utils_device else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            log::warn!("Debug name {name:?} contains a NUL byte, skipping");
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&name_info) } {
            log::warn!("Failed to set debug name: {e:?}");
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        // SAFETY: every RHI object holds the device context alive, so by now no
        // child object is left except abandoned fences, destroyed after the idle
        unsafe {
            let _ = self.device.device_wait_idle();

            for fence in self.abandoned_fences.get_mut().drain(..) {
                self.device.destroy_fence(fence, None);
            }

            self.device.destroy_device(None);

            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_semaphore(&self) -> Result<SemaphoreHandle, RhiError> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.device.create_semaphore(&create_info, None) }
            .map_err(|e| map_vk_error(e, "Failed to create semaphore"))?;
        Ok(SemaphoreHandle::Vulkan(semaphore))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        let semaphore = vulkan_or_return!(semaphore, "semaphore");
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&self) -> Result<FenceHandle, RhiError> {
        let create_info = vk::FenceCreateInfo::default();
        let fence = unsafe { self.device.create_fence(&create_info, None) }
            .map_err(|e| map_vk_error(e, "Failed to create fence"))?;
        Ok(FenceHandle::Vulkan(fence))
    }

    fn reset_fence(&self, fence: FenceHandle) -> Result<(), RhiError> {
        let fence = native(fence.as_vulkan(), "fence")?;
        unsafe { self.device.reset_fences(&[fence]) }
            .map_err(|e| map_vk_error(e, "Failed to reset fence"))
    }

    fn fence_status(&self, fence: FenceHandle) -> Result<bool, RhiError> {
        let fence = native(fence.as_vulkan(), "fence")?;
        unsafe { self.device.get_fence_status(fence) }
            .map_err(|e| map_vk_error(e, "Failed to query fence"))
    }

    fn wait_fence(&self, fence: FenceHandle, timeout: SyncTimeout) -> Result<bool, RhiError> {
        profile_function!();
        let fence = native(fence.as_vulkan(), "fence")?;
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout.as_nanos()) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(map_vk_error(e, "Failed to wait for fence")),
        }
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let fence = vulkan_or_return!(fence, "fence");
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn allocate_memory(
        &self,
        size: u64,
        memory_type_index: u32,
    ) -> Result<MemoryHandle, RhiError> {
        let flags = self
            .info
            .memory_properties
            .memory_types
            .get(memory_type_index as usize)
            .map(|memory_type| memory_type.property_flags)
            .ok_or_else(|| {
                RhiError::InvalidParameter(format!("unknown memory type {memory_type_index}"))
            })?;

        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { self.device.allocate_memory(&allocate_info, None) }
            .map_err(|e| map_vk_error(e, "Failed to allocate memory"))?;

        if flags.contains(crate::types::MemoryPropertyFlags::HOST_VISIBLE) {
            // SAFETY: fresh allocation from a host-visible type, mapped once
            let address = match unsafe {
                self.device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            } {
                Ok(pointer) => pointer as usize,
                Err(e) => {
                    unsafe { self.device.free_memory(memory, None) };
                    return Err(map_vk_error(e, "Failed to map memory"));
                }
            };
            self.mappings.lock().insert(
                memory,
                MappedMemory {
                    address,
                    size,
                    coherent: flags.contains(crate::types::MemoryPropertyFlags::HOST_COHERENT),
                },
            );
        }

        Ok(MemoryHandle::Vulkan(memory))
    }

    fn free_memory(&self, memory: MemoryHandle) {
        let memory = vulkan_or_return!(memory, "memory");
        // Freeing implicitly unmaps
        self.mappings.lock().remove(&memory);
        // SAFETY: the allocator frees memory only after its resource was
        // destroyed, which happens after the last submission using it retired
        unsafe { self.device.free_memory(memory, None) };
    }

    fn write_memory(&self, memory: MemoryHandle, offset: u64, data: &[u8]) -> Result<(), RhiError> {
        let memory = native(memory.as_vulkan(), "memory")?;
        let mapping = self.mapping(memory, offset, data.len())?;
        // SAFETY: the range was checked against the mapped allocation size
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                (mapping.address as *mut u8).add(offset as usize),
                data.len(),
            );
        }
        if !mapping.coherent {
            // SAFETY: the memory is currently mapped
            unsafe {
                self.device
                    .flush_mapped_memory_ranges(&[Self::whole_range(memory)])
            }
            .map_err(|e| map_vk_error(e, "Failed to flush memory"))?;
        }
        Ok(())
    }

    fn read_memory(&self, memory: MemoryHandle, offset: u64, out: &mut [u8]) -> Result<(), RhiError> {
        let memory = native(memory.as_vulkan(), "memory")?;
        let mapping = self.mapping(memory, offset, out.len())?;
        if !mapping.coherent {
            // SAFETY: the memory is currently mapped
            unsafe {
                self.device
                    .invalidate_mapped_memory_ranges(&[Self::whole_range(memory)])
            }
            .map_err(|e| map_vk_error(e, "Failed to invalidate memory"))?;
        }
        // SAFETY: the range was checked against the mapped allocation size
        unsafe {
            std::ptr::copy_nonoverlapping(
                (mapping.address as *const u8).add(offset as usize),
                out.as_mut_ptr(),
                out.len(),
            );
        }
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<BufferHandle, RhiError> {
        // Writes and fills go through transfer commands regardless of usage
        let usage = convert_buffer_usage(desc.usage)
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::TRANSFER_DST;
        let create_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(usage)
            .sharing_mode(self.sharing_mode())
            .queue_family_indices(&self.unique_families);
        let buffer = unsafe { self.device.create_buffer(&create_info, None) }
            .map_err(|e| map_vk_error(e, "Failed to create buffer"))?;
        Ok(BufferHandle::Vulkan(buffer))
    }

    fn buffer_memory_requirements(&self, buffer: BufferHandle) -> MemoryRequirements {
        let Some(buffer) = buffer.as_vulkan() else {
            log::error!("Memory requirements requested for a foreign buffer");
            return MemoryRequirements::default();
        };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        MemoryRequirements {
            size: requirements.size,
            alignment: requirements.alignment,
            memory_type_bits: requirements.memory_type_bits,
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> Result<(), RhiError> {
        let buffer = native(buffer.as_vulkan(), "buffer")?;
        let memory = native(memory.as_vulkan(), "memory")?;
        // SAFETY: the allocator picked `memory` from the buffer's requirements
        // and binds each buffer exactly once
        unsafe { self.device.bind_buffer_memory(buffer, memory, offset) }
            .map_err(|e| map_vk_error(e, "Failed to bind buffer memory"))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let buffer = vulkan_or_return!(buffer, "buffer");
        unsafe { self.device.destroy_buffer(buffer, None) };
    }

    fn create_buffer_view(
        &self,
        buffer: BufferHandle,
        info: &BufferViewInfo,
    ) -> Result<BufferViewHandle, RhiError> {
        let buffer = native(buffer.as_vulkan(), "buffer")?;
        let create_info = vk::BufferViewCreateInfo::default()
            .buffer(buffer)
            .format(convert_format(info.format))
            .offset(info.range.byte_offset)
            .range(info.range.byte_size);
        let view = unsafe { self.device.create_buffer_view(&create_info, None) }
            .map_err(|e| map_vk_error(e, "Failed to create buffer view"))?;
        Ok(BufferViewHandle::Vulkan(view))
    }

    fn destroy_buffer_view(&self, view: BufferViewHandle) {
        let view = vulkan_or_return!(view, "buffer view");
        unsafe { self.device.destroy_buffer_view(view, None) };
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<TextureHandle, RhiError> {
        let depth = if desc.dimension == TextureDimension::Texture3D {
            desc.extent.depth.max(1)
        } else {
            1
        };
        let flags = if desc.dimension == TextureDimension::TextureCube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let usage = convert_texture_usage(desc.usage, desc.format)
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;

        let create_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(convert_image_type(desc.dimension))
            .format(convert_format(desc.format))
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth,
            })
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(desc.array_size.max(1))
            .samples(convert_sample_count(desc.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(self.sharing_mode())
            .queue_family_indices(&self.unique_families)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&create_info, None) }
            .map_err(|e| map_vk_error(e, "Failed to create image"))?;
        Ok(TextureHandle::Vulkan(image))
    }

    fn texture_memory_requirements(&self, texture: TextureHandle) -> MemoryRequirements {
        let Some(image) = texture.as_vulkan() else {
            log::error!("Memory requirements requested for a foreign texture");
            return MemoryRequirements::default();
        };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        MemoryRequirements {
            size: requirements.size,
            alignment: requirements.alignment,
            memory_type_bits: requirements.memory_type_bits,
        }
    }

    fn bind_texture_memory(
        &self,
        texture: TextureHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> Result<(), RhiError> {
        let image = native(texture.as_vulkan(), "texture")?;
        let memory = native(memory.as_vulkan(), "memory")?;
        // SAFETY: same contract as buffer binding
        unsafe { self.device.bind_image_memory(image, memory, offset) }
            .map_err(|e| map_vk_error(e, "Failed to bind image memory"))
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let image = vulkan_or_return!(texture, "texture");
        unsafe { self.device.destroy_image(image, None) };
    }

    fn create_texture_view(
        &self,
        texture: TextureHandle,
        info: &TextureViewInfo,
    ) -> Result<TextureViewHandle, RhiError> {
        let image = native(texture.as_vulkan(), "texture")?;
        // Sampling and storage see only the depth aspect of depth/stencil formats
        let aspects = match info.kind {
            TextureViewKind::ShaderResource | TextureViewKind::UnorderedAccess
                if info.format.is_depth() =>
            {
                vk::ImageAspectFlags::DEPTH
            }
            _ => aspect_mask(info.format),
        };
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(convert_view_type(info.dimension))
            .format(convert_format(info.format))
            .subresource_range(convert_subresource_range(info.subresources, aspects));
        let view = unsafe { self.device.create_image_view(&create_info, None) }
            .map_err(|e| map_vk_error(e, "Failed to create image view"))?;
        Ok(TextureViewHandle::Vulkan(view))
    }

    fn destroy_texture_view(&self, view: TextureViewHandle) {
        let view = vulkan_or_return!(view, "texture view");
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<SamplerHandle, RhiError> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter_mode(desc.mag_filter))
            .min_filter(convert_filter_mode(desc.min_filter))
            .mipmap_mode(convert_mipmap_filter_mode(desc.mipmap_filter))
            .address_mode_u(convert_address_mode(desc.address_mode_u))
            .address_mode_v(convert_address_mode(desc.address_mode_v))
            .address_mode_w(convert_address_mode(desc.address_mode_w))
            .mip_lod_bias(0.0)
            .anisotropy_enable(desc.anisotropy_clamp > 1)
            .max_anisotropy(desc.anisotropy_clamp as f32)
            .compare_enable(desc.compare.is_some())
            .compare_op(
                desc.compare
                    .map(convert_compare_function)
                    .unwrap_or(vk::CompareOp::ALWAYS),
            )
            .min_lod(desc.lod_min_clamp)
            .max_lod(desc.lod_max_clamp)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
            .unnormalized_coordinates(false);

        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }
            .map_err(|e| map_vk_error(e, "Failed to create sampler"))?;
        Ok(SamplerHandle::Vulkan(sampler))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        let sampler = vulkan_or_return!(sampler, "sampler");
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn create_shader_module(
        &self,
        _stage: ShaderStages,
        bytecode: &[u8],
    ) -> Result<ShaderModuleHandle, RhiError> {
        let code = ash::util::read_spv(&mut std::io::Cursor::new(bytecode))
            .map_err(|e| RhiError::InvalidParameter(format!("Invalid SPIR-V: {e}")))?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { self.device.create_shader_module(&create_info, None) }
            .map_err(|e| map_vk_error(e, "Failed to create shader module"))?;
        Ok(ShaderModuleHandle::Vulkan(module))
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        let module = vulkan_or_return!(module, "shader module");
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorLayoutBinding],
    ) -> Result<DescriptorSetLayoutHandle, RhiError> {
        pipeline::create_descriptor_set_layout(&self.device, bindings)
            .map(DescriptorSetLayoutHandle::Vulkan)
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        let layout = vulkan_or_return!(layout, "descriptor set layout");
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_set(
        &self,
        layout: DescriptorSetLayoutHandle,
        bindings: &[DescriptorLayoutBinding],
        writes: &[DescriptorWrite],
    ) -> Result<DescriptorSetHandle, RhiError> {
        let layout = native(layout.as_vulkan(), "descriptor set layout")?;
        pipeline::create_descriptor_set(&self.device, layout, bindings, writes)
            .map(DescriptorSetHandle::Vulkan)
    }

    fn destroy_descriptor_set(&self, set: DescriptorSetHandle) {
        // The pool owns exactly this set
        let (pool, _) = vulkan_or_return!(set, "descriptor set");
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
    ) -> Result<PipelineLayoutHandle, RhiError> {
        let set_layouts = set_layouts
            .iter()
            .map(|layout| native(layout.as_vulkan(), "descriptor set layout"))
            .collect::<Result<Vec<_>, _>>()?;
        pipeline::create_pipeline_layout(&self.device, &set_layouts)
            .map(PipelineLayoutHandle::Vulkan)
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        let layout = vulkan_or_return!(layout, "pipeline layout");
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_compute_pipeline(
        &self,
        info: &ComputePipelineInfo,
    ) -> Result<PipelineHandle, RhiError> {
        profile_function!();
        pipeline::create_compute_pipeline(&self.device, info).map(PipelineHandle::Vulkan)
    }

    fn create_graphics_pipeline(
        &self,
        info: &GraphicsPipelineInfo,
    ) -> Result<PipelineHandle, RhiError> {
        profile_function!();
        pipeline::create_graphics_pipeline(&self.device, info).map(PipelineHandle::Vulkan)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        let pipeline = vulkan_or_return!(pipeline, "pipeline");
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn create_render_pass(&self, info: &RenderPassInfo) -> Result<RenderPassHandle, RhiError> {
        pipeline::create_render_pass(&self.device, info).map(RenderPassHandle::Vulkan)
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        let render_pass = vulkan_or_return!(render_pass, "render pass");
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        attachments: &[TextureViewHandle],
        extent: Extent3d,
    ) -> Result<FramebufferHandle, RhiError> {
        let render_pass = native(render_pass.as_vulkan(), "render pass")?;
        let attachments = attachments
            .iter()
            .map(|view| native(view.as_vulkan(), "texture view"))
            .collect::<Result<Vec<_>, _>>()?;
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(extent.depth.max(1));
        let framebuffer = unsafe { self.device.create_framebuffer(&create_info, None) }
            .map_err(|e| map_vk_error(e, "Failed to create framebuffer"))?;
        Ok(FramebufferHandle::Vulkan(framebuffer))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        let framebuffer = vulkan_or_return!(framebuffer, "framebuffer");
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_command_pool(&self, queue: QueueId) -> Result<CommandPoolHandle, RhiError> {
        let family = self
            .families
            .family(queue)
            .ok_or_else(|| RhiError::FeatureNotSupported(format!("{queue:?} queue")))?;
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(family);
        let pool = unsafe { self.device.create_command_pool(&create_info, None) }
            .map_err(|e| map_vk_error(e, "Failed to create command pool"))?;
        Ok(CommandPoolHandle::Vulkan(pool))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        let pool = vulkan_or_return!(pool, "command pool");
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
    ) -> Result<CommandBufferHandle, RhiError> {
        let pool = native(pool.as_vulkan(), "command pool")?;
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&allocate_info) }
            .map_err(|e| map_vk_error(e, "Failed to allocate command buffer"))?;
        buffers
            .into_iter()
            .next()
            .map(CommandBufferHandle::Vulkan)
            .ok_or_else(|| RhiError::Internal("command buffer allocation returned nothing".into()))
    }

    fn free_command_buffer(&self, pool: CommandPoolHandle, command_buffer: CommandBufferHandle) {
        let pool = vulkan_or_return!(pool, "command pool");
        let command_buffer = vulkan_or_return!(command_buffer, "command buffer");
        unsafe { self.device.free_command_buffers(pool, &[command_buffer]) };
    }

    fn reset_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<(), RhiError> {
        let command_buffer = native(command_buffer.as_vulkan(), "command buffer")?;
        // SAFETY: command buffers are reset when they return to their pool,
        // after the fence of their last submission signalled
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }
        .map_err(|e| map_vk_error(e, "Failed to reset command buffer"))
    }

    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<(), RhiError> {
        let command_buffer = native(command_buffer.as_vulkan(), "command buffer")?;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }
            .map_err(|e| map_vk_error(e, "Failed to begin command buffer"))
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<(), RhiError> {
        let command_buffer = native(command_buffer.as_vulkan(), "command buffer")?;
        unsafe { self.device.end_command_buffer(command_buffer) }
            .map_err(|e| map_vk_error(e, "Failed to end command buffer"))
    }

    fn record(
        &self,
        command_buffer: CommandBufferHandle,
        command: NativeCommand,
    ) -> Result<(), RhiError> {
        let command_buffer = native(command_buffer.as_vulkan(), "command buffer")?;
        command::record_command(&self.device, command_buffer, command)
    }

    fn submit(&self, queue: QueueId, submit: &NativeSubmit) -> Result<(), RhiError> {
        profile_function!();
        let command_buffers = submit
            .command_buffers
            .iter()
            .map(|cmd| native(cmd.as_vulkan(), "command buffer"))
            .collect::<Result<Vec<_>, _>>()?;
        let mut wait_semaphores = Vec::with_capacity(submit.waits.len());
        let mut wait_stages = Vec::with_capacity(submit.waits.len());
        for (semaphore, stages) in &submit.waits {
            wait_semaphores.push(native(semaphore.as_vulkan(), "semaphore")?);
            wait_stages.push(convert_pipeline_stages(*stages));
        }
        let signal_semaphores = submit
            .signals
            .iter()
            .map(|semaphore| native(semaphore.as_vulkan(), "semaphore"))
            .collect::<Result<Vec<_>, _>>()?;
        let fence = match submit.fence {
            Some(fence) => native(fence.as_vulkan(), "fence")?,
            None => vk::Fence::null(),
        };

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let native_queue = self.queue(queue)?.lock();
        // SAFETY: the queue mutex provides the external synchronization vkQueueSubmit
        // requires; every array referenced by `submit_info` outlives the call
        unsafe { self.device.queue_submit(*native_queue, &[submit_info], fence) }
            .map_err(|e| map_vk_error(e, "Failed to submit"))
    }

    fn queue_wait_idle(&self, queue: QueueId, timeout: SyncTimeout) -> Result<bool, RhiError> {
        profile_function!();
        let native_queue = self.queue(queue)?;

        if timeout == SyncTimeout::Infinite {
            let native_queue = native_queue.lock();
            // SAFETY: queue externally synchronized by its mutex
            return unsafe { self.device.queue_wait_idle(*native_queue) }
                .map(|()| true)
                .map_err(|e| map_vk_error(e, "Failed to wait for queue"));
        }

        // Bounded wait: an empty fenced submit completes after all prior work
        let create_info = vk::FenceCreateInfo::default();
        let fence = unsafe { self.device.create_fence(&create_info, None) }
            .map_err(|e| map_vk_error(e, "Failed to create fence"))?;
        {
            let native_queue = native_queue.lock();
            // SAFETY: queue externally synchronized by its mutex, `fence` is unsignalled
            if let Err(e) = unsafe { self.device.queue_submit(*native_queue, &[], fence) } {
                unsafe { self.device.destroy_fence(fence, None) };
                return Err(map_vk_error(e, "Failed to submit idle fence"));
            }
        }

        match unsafe { self.device.wait_for_fences(&[fence], true, timeout.as_nanos()) } {
            Ok(()) => {
                unsafe { self.device.destroy_fence(fence, None) };
                Ok(true)
            }
            Err(vk::Result::TIMEOUT) => {
                // Still pending, so it cannot be destroyed yet
                self.abandoned_fences.lock().push(fence);
                Ok(false)
            }
            Err(e) => {
                self.abandoned_fences.lock().push(fence);
                Err(map_vk_error(e, "Failed to wait for queue"))
            }
        }
    }

    fn device_wait_idle(&self) -> Result<(), RhiError> {
        profile_function!();
        // vkDeviceWaitIdle needs every queue externally synchronized
        let _guards: Vec<_> = self.queues.iter().flatten().map(|queue| queue.lock()).collect();
        // SAFETY: every queue mutex is held for the duration of the call
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| map_vk_error(e, "Failed to wait for device idle"))?;
        for fence in self.abandoned_fences.lock().drain(..) {
            // SAFETY: the device is idle, so abandoned fences are no longer pending
            unsafe { self.device.destroy_fence(fence, None) };
        }
        Ok(())
    }

    fn set_object_name(&self, object: NativeObject, name: &str) {
        match object {
            NativeObject::Semaphore(h) => h.as_vulkan().map(|h| self.name_object(h, name)),
            NativeObject::Fence(h) => h.as_vulkan().map(|h| self.name_object(h, name)),
            NativeObject::Memory(h) => h.as_vulkan().map(|h| self.name_object(h, name)),
            NativeObject::Buffer(h) => h.as_vulkan().map(|h| self.name_object(h, name)),
            NativeObject::Texture(h) => h.as_vulkan().map(|h| self.name_object(h, name)),
            NativeObject::TextureView(h) => h.as_vulkan().map(|h| self.name_object(h, name)),
            NativeObject::Sampler(h) => h.as_vulkan().map(|h| self.name_object(h, name)),
            NativeObject::ShaderModule(h) => h.as_vulkan().map(|h| self.name_object(h, name)),
            NativeObject::Pipeline(h) => h.as_vulkan().map(|h| self.name_object(h, name)),
            NativeObject::Framebuffer(h) => h.as_vulkan().map(|h| self.name_object(h, name)),
            NativeObject::CommandBuffer(h) => h.as_vulkan().map(|h| self.name_object(h, name)),
        };
    }
}

static_assertions::assert_impl_all!(VulkanBackend: Send, Sync);
