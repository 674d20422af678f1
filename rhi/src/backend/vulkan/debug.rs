//! Validation output routed into `log`.
//!
//! Severities map onto log levels with [`log_level`]. Verbose loader chatter
//! is only requested from the driver when `trace` logging is enabled.

use std::ffi::CStr;

use ash::vk;

use crate::error::RhiError;

/// Log level a validation message of `severity` is emitted at.
pub fn log_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Debug
    } else {
        log::Level::Trace
    }
}

fn requested_severities() -> vk::DebugUtilsMessageSeverityFlagsEXT {
    let mut severities = vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO;
    if log::max_level() >= log::LevelFilter::Trace {
        severities |= vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE;
    }
    severities
}

/// Install the messenger on `debug_utils`.
pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> Result<vk::DebugUtilsMessengerEXT, RhiError> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(requested_severities())
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(on_validation_message));

    // SAFETY: the create info outlives the call and the callback is a plain
    // function without user data.
    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(|e| {
        RhiError::InitializationFailed(format!("debug messenger creation failed: {e:?}"))
    })
}

/// Copy a driver-owned C string, tolerating null.
///
/// # Safety
///
/// `ptr` must be null or point to a nul-terminated string that stays valid
/// for the duration of the call.
unsafe fn driver_string(ptr: *const std::ffi::c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and nul-terminated per the caller's contract
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

unsafe extern "system" fn on_validation_message(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // SAFETY: the loader passes either null or callback data that is valid
    // until this function returns.
    let Some(data) = (unsafe { callback_data.as_ref() }) else {
        return vk::FALSE;
    };
    // SAFETY: both strings belong to `data` and live as long as it does
    let (id, message) = unsafe {
        (
            driver_string(data.p_message_id_name),
            driver_string(data.p_message),
        )
    };

    let kind = if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    };
    log::log!(
        log_level(severity),
        "vulkan {kind} [{}]: {}",
        id.as_deref().unwrap_or("-"),
        message.as_deref().unwrap_or("(no message)")
    );

    // Never abort the call that triggered the message
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_to_log_level() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

        assert_eq!(log_level(Severity::ERROR), log::Level::Error);
        assert_eq!(log_level(Severity::WARNING), log::Level::Warn);
        assert_eq!(log_level(Severity::INFO), log::Level::Debug);
        assert_eq!(log_level(Severity::VERBOSE), log::Level::Trace);
        assert_eq!(log_level(Severity::WARNING | Severity::ERROR), log::Level::Error);
    }
}
