//! Device & Memory Allocator.
//!
//! Owns the Vulkan instance and logical device, the queue family indices,
//! a small format-property cache, the negotiated feature/extension flags the
//! rest of the core branches on, and a `vk-mem` sub-allocator that subdivides
//! device memory heaps into buffer/image commitments.

mod features;
mod memory;
mod selection;

pub use features::{DeviceFeatures, DynamicState3Support};
pub use memory::{MemoryClass, MemoryCommitment};
pub use selection::PhysicalDeviceInfo;

use ash::extensions::ext::DebugUtils;
use ash::vk;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::sync::Mutex;

/// Errors raised by the device layer and propagated by every Vulkan-facing module.
#[derive(thiserror::Error, Debug)]
pub enum VulkanError {
    /// A raw Vulkan API call returned a non-success result.
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// A resource lookup by id/handle failed.
    #[error("resource not found: {id}")]
    ResourceNotFound {
        /// Opaque identifier of the resource that could not be located.
        id: u64,
    },

    /// A caller violated an API precondition (e.g. double-begin a command buffer).
    #[error("invalid operation: {reason}")]
    InvalidOperation {
        /// Human-readable description of the violated precondition.
        reason: String,
    },

    /// The allocator could not satisfy a commitment even after growing.
    #[error("out of memory: requested {requested} bytes")]
    OutOfMemory {
        /// Size of the failed allocation request, in bytes.
        requested: u64,
    },

    /// No physical device satisfies mandatory extensions/features.
    #[error("device selection failed: {0}")]
    DeviceSelectionFailed(String),

    /// Instance/device/allocator construction failed.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// No memory type satisfies the requested usage and requirements.
    #[error("no suitable memory type")]
    NoSuitableMemoryType,

    /// An operation that requires an unsupported extension/feature was attempted.
    ///
    /// The operation becomes a no-op and is logged once, rather than aborting.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result alias for device- and Vulkan-facing operations.
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Owns the Vulkan instance, logical device, queues, format-property cache, and
/// the `vk-mem` sub-allocator. All other core modules borrow a `&Device`.
pub struct Device {
    entry: ash::Entry,
    instance: ash::Instance,
    #[cfg(debug_assertions)]
    debug_utils: Option<DebugUtils>,
    #[cfg(debug_assertions)]
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    physical: PhysicalDeviceInfo,
    logical: ash::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    features: DeviceFeatures,
    allocator: vk_mem::Allocator,
    format_properties: Mutex<HashMap<vk::Format, vk::FormatProperties>>,
}

impl Device {
    /// Create the Vulkan instance, select a physical device, create the logical
    /// device and queues, and stand up the memory allocator.
    ///
    /// # Errors
    /// Returns [`VulkanError::DeviceSelectionFailed`] if no physical device carries
    /// the mandatory extensions (`VK_KHR_swapchain`) and features this core requires,
    /// or [`VulkanError::InitializationFailed`] if instance/device creation fails.
    pub fn new(
        application_name: &str,
        required_instance_extensions: &[CString],
        surface_for_selection: Option<vk::SurfaceKHR>,
        surface_loader: Option<&ash::extensions::khr::Surface>,
        enable_validation: bool,
    ) -> VulkanResult<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("failed to load Vulkan: {e}")))?;

        let instance = Self::create_instance(
            &entry,
            application_name,
            required_instance_extensions,
            enable_validation,
        )?;

        #[cfg(debug_assertions)]
        let (debug_utils, debug_messenger) = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        let physical = PhysicalDeviceInfo::select_suitable(
            &instance,
            surface_for_selection,
            surface_loader,
        )?;
        let features = DeviceFeatures::query(&instance, physical.device);
        let (logical, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, &physical, &features)?;

        let allocator = Self::create_allocator(&entry, &instance, physical.device, &logical)?;

        log::info!(
            "selected device {:?} (timeline_semaphore={}, dynamic_rendering={}, ext_dyn_state3={})",
            physical.properties.device_name_as_c_str().unwrap_or_default(),
            features.timeline_semaphore,
            features.dynamic_rendering,
            features.extended_dynamic_state3 != features::DynamicState3Support::empty(),
        );

        Ok(Self {
            entry,
            instance,
            #[cfg(debug_assertions)]
            debug_utils,
            #[cfg(debug_assertions)]
            debug_messenger,
            physical,
            logical,
            graphics_queue,
            present_queue,
            features,
            allocator,
            format_properties: Mutex::new(HashMap::new()),
        })
    }

    fn create_instance(
        entry: &ash::Entry,
        application_name: &str,
        required_extensions: &[CString],
        enable_validation: bool,
    ) -> VulkanResult<ash::Instance> {
        let app_name = CString::new(application_name).unwrap_or_default();
        let engine_name = CString::new("vk-render-core").unwrap();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions: Vec<*const i8> = required_extensions.iter().map(|e| e.as_ptr()).collect();
        #[cfg(debug_assertions)]
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if cfg!(debug_assertions) && enable_validation {
            vec![CString::new("VK_LAYER_KHRONOS_validation").unwrap()]
        } else {
            Vec::new()
        };
        let layer_ptrs: Vec<*const i8> = layer_names.iter().map(|l| l.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_ptrs);

        unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| VulkanError::InitializationFailed(format!("vkCreateInstance: {e:?}")))
    }

    #[cfg(debug_assertions)]
    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));
        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(VulkanError::Api)
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical: &PhysicalDeviceInfo,
        features: &DeviceFeatures,
    ) -> VulkanResult<(ash::Device, vk::Queue, vk::Queue)> {
        let mut unique_families = vec![physical.graphics_family];
        if physical.present_family != physical.graphics_family {
            unique_families.push(physical.present_family);
        }

        let priority = [1.0f32];
        let queue_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priority)
                    .build()
            })
            .collect();

        let mut extension_names = vec![ash::extensions::khr::Swapchain::name().as_ptr()];
        if features.timeline_semaphore {
            extension_names.push(vk::KhrTimelineSemaphoreFn::name().as_ptr());
        }
        if features.dynamic_rendering {
            extension_names.push(vk::KhrDynamicRenderingFn::name().as_ptr());
        }

        let mut timeline_features =
            vk::PhysicalDeviceTimelineSemaphoreFeatures::builder().timeline_semaphore(features.timeline_semaphore);
        let mut dynamic_rendering_features =
            vk::PhysicalDeviceDynamicRenderingFeatures::builder().dynamic_rendering(features.dynamic_rendering);

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(true)
            .fill_mode_non_solid(features.wireframe_fill);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&device_features)
            .push_next(&mut timeline_features)
            .push_next(&mut dynamic_rendering_features);

        let logical = unsafe { instance.create_device(physical.device, &create_info, None) }
            .map_err(|e| VulkanError::InitializationFailed(format!("vkCreateDevice: {e:?}")))?;

        let graphics_queue = unsafe { logical.get_device_queue(physical.graphics_family, 0) };
        let present_queue = unsafe { logical.get_device_queue(physical.present_family, 0) };

        Ok((logical, graphics_queue, present_queue))
    }

    fn create_allocator(
        entry: &ash::Entry,
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        logical: &ash::Device,
    ) -> VulkanResult<vk_mem::Allocator> {
        let create_info = vk_mem::AllocatorCreateInfo::new(instance, logical, physical_device);
        vk_mem::Allocator::new(create_info)
            .map_err(|e| VulkanError::InitializationFailed(format!("vk-mem init: {e}")))
    }

    /// Raw `ash::Device` for modules that need to issue Vulkan calls directly.
    #[must_use]
    pub fn raw(&self) -> &ash::Device {
        &self.logical
    }

    /// Raw `ash::Instance`, needed for extension loaders (swapchain, surface).
    #[must_use]
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Raw `ash::Entry`, needed to construct additional extension loaders
    /// (e.g. `ash::extensions::khr::Surface`) without reloading the Vulkan library.
    #[must_use]
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Physical device handle and queried properties.
    #[must_use]
    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Negotiated feature/extension flags.
    #[must_use]
    pub fn features(&self) -> &DeviceFeatures {
        &self.features
    }

    /// Graphics queue, used by the scheduler's submit step.
    #[must_use]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Presentation queue (may alias the graphics queue).
    #[must_use]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// The `vk-mem` allocator backing buffer/image commitments.
    #[must_use]
    pub fn allocator(&self) -> &vk_mem::Allocator {
        &self.allocator
    }

    /// Query (and cache) `vkGetPhysicalDeviceFormatProperties` for `format`.
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let mut cache = self.format_properties.lock().unwrap();
        *cache.entry(format).or_insert_with(|| unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical.device, format)
        })
    }

    /// Block until all queued GPU work on this device completes.
    ///
    /// # Errors
    /// Returns [`VulkanError::Api`] if `vkDeviceWaitIdle` fails.
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.logical.device_wait_idle() }.map_err(VulkanError::Api)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            let _ = self.logical.device_wait_idle();
            self.allocator.destroy();
            self.logical.destroy_device(None);
            #[cfg(debug_assertions)]
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, &self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        let _ = &self.entry;
    }
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    msg_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let data = *callback_data;
    let message = CStr::from_ptr(data.p_message).to_string_lossy();
    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[vulkan] {msg_type:?} {message}");
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[vulkan] {msg_type:?} {message}");
    } else {
        log::trace!("[vulkan] {msg_type:?} {message}");
    }
    vk::FALSE
}
