//! Negotiated device feature/extension flags.
//!
//! Read once at device creation and consulted everywhere a module must pick
//! between a fast path (timeline semaphores, dynamic rendering, extended
//! dynamic state) and its emulated fallback.

use ash::vk;
use bitflags::bitflags;

bitflags! {
    /// Subset of `VK_EXT_extended_dynamic_state3` this core cares about.
    ///
    /// The original engine tracks a much larger set; only the states the
    /// pipeline cache key folds in are modeled here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DynamicState3Support: u32 {
        /// `vkCmdSetDepthClampEnableEXT`.
        const DEPTH_CLAMP_ENABLE = 1 << 0;
        /// `vkCmdSetPolygonModeEXT`.
        const POLYGON_MODE = 1 << 1;
        /// `vkCmdSetColorBlendEnableEXT`.
        const COLOR_BLEND_ENABLE = 1 << 2;
        /// `vkCmdSetColorBlendEquationEXT`.
        const COLOR_BLEND_EQUATION = 1 << 3;
        /// `vkCmdSetLogicOpEnableEXT`.
        const LOGIC_OP_ENABLE = 1 << 4;
    }
}

/// Feature/extension flags negotiated for the selected physical device.
///
/// Every module that branches on device capability reads from here rather
/// than re-querying `vkGetPhysicalDeviceFeatures2` itself.
#[derive(Debug, Clone, Copy)]
pub struct DeviceFeatures {
    /// `VK_KHR_timeline_semaphore` (core in 1.2). Selects the timeline vs.
    /// fence-emulated master semaphore strategy.
    pub timeline_semaphore: bool,
    /// `VK_KHR_dynamic_rendering`. Selects render-pass-free attachment binding.
    pub dynamic_rendering: bool,
    /// Subset of `VK_EXT_extended_dynamic_state3` supported, folded into the
    /// pipeline cache key so two otherwise-identical pipelines compiled under
    /// different dynamic-state coverage don't collide.
    pub extended_dynamic_state3: DynamicState3Support,
    /// `VK_KHR_texture_compression_astc_hdr` or core ASTC LDR support.
    pub has_astc: bool,
    /// `VK_EXT_shader_stencil_export`, needed by the stencil-aware blit paths.
    pub has_shader_stencil_export: bool,
    /// `fillModeNonSolid`, required for wireframe debug rendering.
    pub wireframe_fill: bool,
    /// True when `VkPhysicalDeviceType` is `INTEGRATED_GPU`; the staging and
    /// texture caches use this to skip host-visible-then-copy round trips
    /// in favor of direct host-visible device-local commitments.
    pub is_integrated: bool,
}

impl DeviceFeatures {
    /// Query `vkGetPhysicalDeviceFeatures2`/`vkGetPhysicalDeviceProperties` and
    /// fold the results into the flag set the rest of the core reads.
    #[must_use]
    pub fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let mut timeline_features = vk::PhysicalDeviceTimelineSemaphoreFeatures::default();
        let mut dynamic_rendering_features = vk::PhysicalDeviceDynamicRenderingFeatures::default();
        let mut extended_dynamic_state3_features =
            vk::PhysicalDeviceExtendedDynamicState3FeaturesEXT::default();

        let mut features2 = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut timeline_features)
            .push_next(&mut dynamic_rendering_features)
            .push_next(&mut extended_dynamic_state3_features);

        unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let is_integrated = properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU;

        let mut dynamic_state3 = DynamicState3Support::empty();
        if extended_dynamic_state3_features.extended_dynamic_state3_depth_clamp_enable != 0 {
            dynamic_state3 |= DynamicState3Support::DEPTH_CLAMP_ENABLE;
        }
        if extended_dynamic_state3_features.extended_dynamic_state3_polygon_mode != 0 {
            dynamic_state3 |= DynamicState3Support::POLYGON_MODE;
        }
        if extended_dynamic_state3_features.extended_dynamic_state3_color_blend_enable != 0 {
            dynamic_state3 |= DynamicState3Support::COLOR_BLEND_ENABLE;
        }
        if extended_dynamic_state3_features.extended_dynamic_state3_color_blend_equation != 0 {
            dynamic_state3 |= DynamicState3Support::COLOR_BLEND_EQUATION;
        }
        if extended_dynamic_state3_features.extended_dynamic_state3_logic_op_enable != 0 {
            dynamic_state3 |= DynamicState3Support::LOGIC_OP_ENABLE;
        }

        Self {
            timeline_semaphore: timeline_features.timeline_semaphore != 0,
            dynamic_rendering: dynamic_rendering_features.dynamic_rendering != 0,
            extended_dynamic_state3: dynamic_state3,
            has_astc: features2.features.texture_compression_astc_ldr != 0,
            has_shader_stencil_export: false,
            wireframe_fill: features2.features.fill_mode_non_solid != 0,
            is_integrated,
        }
    }
}
