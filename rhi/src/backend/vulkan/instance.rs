//! Vulkan instance creation.

use std::ffi::CStr;

use ash::vk;

use super::debug;
use crate::error::RhiError;

/// Timeline semaphores and synchronization2 are core in 1.3; only binary
/// semaphores and classic barriers are used, so 1.2 is enough.
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance plus the optional debug utils it was created with.
pub struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug_utils: Option<ash::ext::debug_utils::Instance>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

/// Create a headless Vulkan instance.
///
/// Debug utils are enabled when validation or debug names are requested and
/// the extension exists; the messenger only with validation.
pub fn create_instance(
    entry: &ash::Entry,
    validation: bool,
    debug_names: bool,
) -> Result<InstanceBundle, RhiError> {
    let validation_available = validation && check_validation_layer_support(entry);
    if validation && !validation_available {
        log::warn!("Validation layers requested but not available");
    }
    let debug_utils_available = (validation_available || debug_names)
        && check_instance_extension(entry, ash::ext::debug_utils::NAME);

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"RedLilium")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"RedLilium RHI")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut extensions = Vec::new();
    if debug_utils_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let layer_names: Vec<*const std::ffi::c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    // SAFETY: layer and extension names were checked against what the
    // loader reports and their CStrings outlive the call
    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        RhiError::InitializationFailed(format!("Failed to create Vulkan instance: {e:?}"))
    })?;

    let debug_utils =
        debug_utils_available.then(|| ash::ext::debug_utils::Instance::new(entry, &instance));
    let debug_messenger = match (&debug_utils, validation_available) {
        (Some(debug_utils), true) => match debug::create_debug_messenger(debug_utils) {
            Ok(messenger) => Some(messenger),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        },
        _ => None,
    };

    Ok(InstanceBundle {
        instance,
        debug_utils,
        debug_messenger,
    })
}

fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let Ok(available_layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    available_layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER_NAME))
}

fn check_instance_extension(entry: &ash::Entry, name: &CStr) -> bool {
    let Ok(extensions) = (unsafe { entry.enumerate_instance_extension_properties(None) }) else {
        return false;
    };
    extensions
        .iter()
        .any(|extension| extension.extension_name_as_c_str() == Ok(name))
}
