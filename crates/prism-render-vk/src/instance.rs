// SPDX-License-Identifier: CEPL-1.0
use crate::error::{VkError, VkResult};
use ash::ext::debug_utils;
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_void, CStr, CString};
use tracing::{debug, error, info, warn};

const APP_NAME: &CStr = c"prism";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{:?}: {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{:?}: {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        info!(target: "vulkan", "{:?}: {}", types, msg);
    } else {
        debug!(target: "vulkan", "{:?}: {}", types, msg);
    }
    vk::FALSE
}

/// First requested name missing from `available`, if any.
pub fn first_missing<'a>(requested: &[&'a CStr], available: &[&CStr]) -> Option<&'a CStr> {
    requested
        .iter()
        .copied()
        .find(|want| !available.contains(want))
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

/// Loader entry, instance and (with validation) the debug messenger.
pub struct VulkanInstance {
    pub entry: Entry,
    pub instance: ash::Instance,
    debug: Option<DebugMessenger>,
}

impl VulkanInstance {
    pub unsafe fn new(display_raw: RawDisplayHandle, layers: &[String]) -> VkResult<Self> {
        let entry = Entry::linked();

        let layer_names: Vec<CString> = layers
            .iter()
            .map(|l| CString::new(l.as_str()).map_err(|_| VkError::LayerNotPresent(l.clone())))
            .collect::<VkResult<_>>()?;
        let available_layers = entry.enumerate_instance_layer_properties()?;
        let available: Vec<&CStr> = available_layers
            .iter()
            .filter_map(|l| l.layer_name_as_c_str().ok())
            .collect();
        let wanted: Vec<&CStr> = layer_names.iter().map(|c| c.as_c_str()).collect();
        if let Some(missing) = first_missing(&wanted, &available) {
            return Err(VkError::LayerNotPresent(missing.to_string_lossy().into_owned()));
        }

        let validation = !layer_names.is_empty();
        let mut ext_ptrs = ash_window::enumerate_required_extensions(display_raw)?.to_vec();
        if validation {
            ext_ptrs.push(debug_utils::NAME.as_ptr());
        }
        let available_exts = entry.enumerate_instance_extension_properties(None)?;
        let available: Vec<&CStr> = available_exts
            .iter()
            .filter_map(|e| e.extension_name_as_c_str().ok())
            .collect();
        let wanted: Vec<&CStr> = ext_ptrs.iter().map(|&p| CStr::from_ptr(p)).collect();
        if let Some(missing) = first_missing(&wanted, &available) {
            return Err(VkError::ExtensionNotPresent(
                missing.to_string_lossy().into_owned(),
            ));
        }

        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: APP_NAME.as_ptr(),
            application_version: vk::make_api_version(0, 0, 1, 0),
            p_engine_name: APP_NAME.as_ptr(),
            engine_version: vk::make_api_version(0, 0, 1, 0),
            api_version: vk::API_VERSION_1_1,
            ..Default::default()
        };
        let layer_ptrs: Vec<*const std::ffi::c_char> =
            layer_names.iter().map(|c| c.as_ptr()).collect();
        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            enabled_layer_count: layer_ptrs.len() as u32,
            pp_enabled_layer_names: layer_ptrs.as_ptr(),
            ..Default::default()
        };
        let instance = entry.create_instance(&create_info, None)?;
        info!(
            "vk instance created (layers: {:?}, {} extensions)",
            layers,
            ext_ptrs.len()
        );

        let debug = if validation {
            match create_debug_messenger(&entry, &instance) {
                Ok(d) => Some(d),
                Err(e) => {
                    instance.destroy_instance(None);
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug,
        })
    }

    /// Instance goes last; everything created from it must already be gone.
    pub unsafe fn destroy(&mut self) {
        if let Some(d) = self.debug.take() {
            d.loader.destroy_debug_utils_messenger(d.handle, None);
        }
        self.instance.destroy_instance(None);
    }
}

unsafe fn create_debug_messenger(entry: &Entry, instance: &ash::Instance) -> VkResult<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let handle = loader.create_debug_utils_messenger(&ci, None)?;
    Ok(DebugMessenger { loader, handle })
}
