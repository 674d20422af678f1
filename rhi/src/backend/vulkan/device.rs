//! Vulkan physical and logical device management.

use ash::vk;

use crate::error::RhiError;
use crate::types::QueueId;

/// Queue family chosen for each RHI queue.
///
/// Compute and transfer only get a family when the device exposes a
/// dedicated one; otherwise that queue does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilies {
    pub fn family(&self, queue: QueueId) -> Option<u32> {
        match queue {
            QueueId::Graphics => Some(self.graphics),
            QueueId::Compute => self.compute,
            QueueId::Transfer => self.transfer,
        }
    }
}

/// Select the best physical device.
///
/// Prefers discrete GPUs over integrated GPUs, then larger texture limits.
pub fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        RhiError::InitializationFailed(format!("Failed to enumerate physical devices: {e:?}"))
    })?;

    if devices.is_empty() {
        return Err(RhiError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best_device = None;
    let mut best_score = 0;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };

        // Score starts at 1 so that any device beats "none"
        let mut score = 1;
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }
        score += properties.limits.max_image_dimension2_d / 1024;

        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            properties.device_name_as_c_str().unwrap_or(c"<unnamed>"),
            properties.device_type,
            score
        );

        if score > best_score {
            best_score = score;
            best_device = Some(device);
        }
    }

    best_device
        .ok_or_else(|| RhiError::InitializationFailed("No suitable GPU found".to_string()))
}

/// Find the graphics family and any dedicated compute or transfer family.
pub fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<QueueFamilies, RhiError> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let find = |predicate: &dyn Fn(vk::QueueFlags) -> bool| {
        queue_families
            .iter()
            .position(|family| family.queue_count > 0 && predicate(family.queue_flags))
            .map(|index| index as u32)
    };

    let graphics = find(&|flags| flags.contains(vk::QueueFlags::GRAPHICS)).ok_or_else(|| {
        RhiError::InitializationFailed("No graphics queue family found".to_string())
    })?;
    let compute = find(&|flags| {
        flags.contains(vk::QueueFlags::COMPUTE) && !flags.contains(vk::QueueFlags::GRAPHICS)
    });
    let transfer = find(&|flags| {
        flags.contains(vk::QueueFlags::TRANSFER)
            && !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
    });

    Ok(QueueFamilies {
        graphics,
        compute,
        transfer,
    })
}

/// Create a logical device with one queue per distinct family.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: &QueueFamilies,
) -> Result<ash::Device, RhiError> {
    let queue_priorities = [1.0f32];

    let mut unique_families = vec![families.graphics];
    for family in [families.compute, families.transfer].into_iter().flatten() {
        if !unique_families.contains(&family) {
            unique_families.push(family);
        }
    }

    let queue_create_infos: Vec<_> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
        })
        .collect();

    let supported = unsafe { instance.get_physical_device_features(physical_device) };
    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
        .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_features(&features);

    // SAFETY: queue family indices and counts come from the family
    // properties of `physical_device`; only supported features are enabled
    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        RhiError::InitializationFailed(format!("Failed to create logical device: {e:?}"))
    })
}
