//! Physical device enumeration and scoring.

use super::{VulkanError, VulkanResult};
use ash::vk;

/// Physical device plus the queue family indices selected for it.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// The physical device handle.
    pub device: vk::PhysicalDevice,
    /// `vkGetPhysicalDeviceProperties` for `device`.
    pub properties: vk::PhysicalDeviceProperties,
    /// `vkGetPhysicalDeviceMemoryProperties` for `device`, used by the
    /// fallback manual memory-type search when `vk-mem`'s automatic usage
    /// hints can't satisfy a request's required flags.
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family index supporting `GRAPHICS`.
    pub graphics_family: u32,
    /// Queue family index supporting presentation to the selection surface.
    /// Equal to `graphics_family` on most desktop drivers.
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Enumerate physical devices and pick the highest-scoring one that
    /// supports `VK_KHR_swapchain` and has a graphics + present queue family.
    ///
    /// Discrete GPUs are preferred over integrated, which are preferred over
    /// everything else.
    ///
    /// # Errors
    /// Returns [`VulkanError::DeviceSelectionFailed`] if enumeration fails or
    /// no device meets the mandatory requirements.
    pub fn select_suitable(
        instance: &ash::Instance,
        surface: Option<vk::SurfaceKHR>,
        surface_loader: Option<&ash::extensions::khr::Surface>,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(|e| VulkanError::DeviceSelectionFailed(format!("enumeration failed: {e:?}")))?;

        devices
            .into_iter()
            .filter_map(|device| Self::describe(instance, device, surface, surface_loader))
            .max_by_key(|info| Self::score(info))
            .ok_or_else(|| {
                VulkanError::DeviceSelectionFailed(
                    "no physical device exposes a graphics+present queue and VK_KHR_swapchain".into(),
                )
            })
    }

    fn describe(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
        surface: Option<vk::SurfaceKHR>,
        surface_loader: Option<&ash::extensions::khr::Surface>,
    ) -> Option<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        if !Self::supports_swapchain(instance, device) {
            return None;
        }

        let graphics_family = queue_families
            .iter()
            .enumerate()
            .find(|(_, family)| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|(index, _)| index as u32)?;

        let present_family = match (surface, surface_loader) {
            (Some(surface), Some(loader)) => queue_families
                .iter()
                .enumerate()
                .find(|(index, _)| {
                    unsafe {
                        loader.get_physical_device_surface_support(device, *index as u32, surface)
                    }
                    .unwrap_or(false)
                })
                .map(|(index, _)| index as u32)?,
            _ => graphics_family,
        };

        Some(Self {
            device,
            properties,
            memory_properties,
            graphics_family,
            present_family,
        })
    }

    fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
        let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
            return false;
        };
        extensions.iter().any(|ext| {
            let name = ext.extension_name_as_c_str().unwrap_or_default();
            name == ash::extensions::khr::Swapchain::name()
        })
    }

    fn score(info: &Self) -> u32 {
        match info.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 300,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 200,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
            _ => 10,
        }
    }

    /// Find a memory type index satisfying `type_bits` and `required`,
    /// used only by paths that bypass `vk-mem`'s automatic usage hints.
    ///
    /// # Errors
    /// Returns [`VulkanError::NoSuitableMemoryType`] if none match.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> VulkanResult<u32> {
        for i in 0..self.memory_properties.memory_type_count {
            let suitable = (type_bits & (1 << i)) != 0;
            let has_flags = self.memory_properties.memory_types[i as usize]
                .property_flags
                .contains(required);
            if suitable && has_flags {
                return Ok(i);
            }
        }
        Err(VulkanError::NoSuitableMemoryType)
    }
}
