//! Pipeline Cache.
//!
//! Builds graphics/compute pipelines keyed by shader hashes + fixed-function
//! state, with a one-entry "last transition" fast path for the common case
//! of consecutive draws using the same pipeline, and disk persistence of the
//! driver's own pipeline cache blob (`vkGetPipelineCacheData`) via
//! [`file`]'s versioned, xxhash-stamped header.

mod builder;
pub mod file;
mod key;

pub use builder::PipelineWorkerPool;
pub use key::{ComputePipelineKey, GraphicsPipelineKey, VertexAttributeKey};

use crate::caches::render_pass::RenderPassCache;
use crate::device::{Device, VulkanError, VulkanResult};
use ash::vk;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};

enum BuildState {
    Pending,
    Built(vk::Pipeline),
    Failed,
}

struct PipelineEntry {
    state: Mutex<BuildState>,
    cond: Condvar,
}

impl PipelineEntry {
    fn pending() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BuildState::Pending),
            cond: Condvar::new(),
        })
    }

    fn resolve(&self, built_in_parallel: bool) -> Option<vk::Pipeline> {
        let mut state = self.state.lock().unwrap();
        if !built_in_parallel {
            while matches!(*state, BuildState::Pending) {
                state = self.cond.wait(state).unwrap();
            }
        }
        match *state {
            BuildState::Built(pipeline) => Some(pipeline),
            BuildState::Pending | BuildState::Failed => None,
        }
    }

    fn complete(&self, result: VulkanResult<vk::Pipeline>) {
        let mut state = self.state.lock().unwrap();
        *state = match result {
            Ok(pipeline) => BuildState::Built(pipeline),
            Err(err) => {
                log::error!("pipeline build failed: {err}");
                BuildState::Failed
            }
        };
        self.cond.notify_all();
    }
}

/// Keyed cache of compiled graphics/compute pipelines plus the driver's
/// `vk::PipelineCache` object their creation is seeded from.
pub struct PipelineCache {
    device: Arc<Device>,
    render_pass_cache: Arc<RenderPassCache>,
    workers: Arc<PipelineWorkerPool>,
    driver_cache: vk::PipelineCache,
    cache_file: Option<PathBuf>,
    use_asynchronous_shaders: bool,

    graphics: Mutex<HashMap<GraphicsPipelineKey, Arc<PipelineEntry>>>,
    compute: Mutex<HashMap<ComputePipelineKey, Arc<PipelineEntry>>>,
    graphics_layouts: Mutex<HashMap<GraphicsPipelineKey, vk::PipelineLayout>>,

    /// One-entry "last transition" fast path: the most recently requested
    /// key and its entry, checked before the full hash-map lookup.
    last_transition: Mutex<Option<(GraphicsPipelineKey, Arc<PipelineEntry>)>>,
}

impl PipelineCache {
    /// Create the cache, loading a persisted driver blob from `cache_file` if
    /// given and `use_pipeline_cache` is set (a missing/corrupt/mismatched
    /// file falls back to an empty driver cache, never an error).
    ///
    /// # Errors
    /// Returns [`VulkanError::Api`] if `vkCreatePipelineCache` fails.
    pub fn new(
        device: Arc<Device>,
        render_pass_cache: Arc<RenderPassCache>,
        cache_file: Option<PathBuf>,
        use_pipeline_cache: bool,
        use_asynchronous_shaders: bool,
        worker_threads: usize,
    ) -> VulkanResult<Self> {
        let initial_data = if use_pipeline_cache {
            cache_file.as_deref().and_then(file::load)
        } else {
            None
        };

        let mut create_info = vk::PipelineCacheCreateInfo::builder();
        if let Some(data) = &initial_data {
            create_info = create_info.initial_data(data);
        }
        let driver_cache = unsafe { device.raw().create_pipeline_cache(&create_info, None) }.map_err(VulkanError::Api)?;

        Ok(Self {
            device,
            render_pass_cache,
            workers: PipelineWorkerPool::new(worker_threads),
            driver_cache,
            cache_file: use_pipeline_cache.then_some(cache_file).flatten(),
            use_asynchronous_shaders,
            graphics: Mutex::new(HashMap::new()),
            compute: Mutex::new(HashMap::new()),
            graphics_layouts: Mutex::new(HashMap::new()),
            last_transition: Mutex::new(None),
        })
    }

    /// Resolve the pipeline for `key`, building it (possibly asynchronously)
    /// on first request. Returns `None` if:
    /// - the build is still pending and `use_asynchronous_shaders` is set
    ///   (the caller should skip this draw), or
    /// - the build previously failed (logged at build time; permanently skipped).
    ///
    /// # Errors
    /// Never returns an error itself; build failures are logged and recorded
    /// as a permanently-null slot, never surfaced as an error.
    pub fn current_graphics_pipeline(
        &self,
        key: GraphicsPipelineKey,
        layout: vk::PipelineLayout,
        vertex_bindings: &[vk::VertexInputBindingDescription],
        vertex_module: vk::ShaderModule,
        fragment_module: vk::ShaderModule,
    ) -> VulkanResult<Option<vk::Pipeline>> {
        if let Some((last_key, entry)) = self.last_transition.lock().unwrap().as_ref() {
            if *last_key == key {
                return Ok(entry.resolve(self.use_asynchronous_shaders));
            }
        }

        let entry = {
            let mut graphics = self.graphics.lock().unwrap();
            if let Some(entry) = graphics.get(&key) {
                entry.clone()
            } else {
                let entry = PipelineEntry::pending();
                graphics.insert(key.clone(), entry.clone());
                self.graphics_layouts.lock().unwrap().insert(key.clone(), layout);
                self.spawn_graphics_build(key.clone(), entry.clone(), layout, vertex_bindings.to_vec(), vertex_module, fragment_module)?;
                entry
            }
        };

        *self.last_transition.lock().unwrap() = Some((key, entry.clone()));
        Ok(entry.resolve(self.use_asynchronous_shaders))
    }

    fn spawn_graphics_build(
        &self,
        key: GraphicsPipelineKey,
        entry: Arc<PipelineEntry>,
        layout: vk::PipelineLayout,
        vertex_bindings: Vec<vk::VertexInputBindingDescription>,
        vertex_module: vk::ShaderModule,
        fragment_module: vk::ShaderModule,
    ) -> VulkanResult<()> {
        let render_pass = self.render_pass_cache.get(key.render_pass)?;
        let device = self.device.clone();
        let driver_cache = self.driver_cache;

        let job = move || {
            let result = build_graphics_pipeline(&device, driver_cache, &key, layout, render_pass, &vertex_bindings, vertex_module, fragment_module);
            entry.complete(result);
        };
        self.workers.submit(Box::new(job));
        Ok(())
    }

    /// Resolve the compute pipeline for `key`, building it synchronously on
    /// first request (compute dispatch has no equivalent to "skip the draw",
    /// so unlike graphics pipelines this always blocks until built).
    ///
    /// # Errors
    /// Returns [`VulkanError::Api`] if `vkCreateComputePipelines` fails.
    pub fn current_compute_pipeline(
        &self,
        key: ComputePipelineKey,
        layout: vk::PipelineLayout,
        shader_module: vk::ShaderModule,
    ) -> VulkanResult<vk::Pipeline> {
        let entry = {
            let mut compute = self.compute.lock().unwrap();
            compute.entry(key).or_insert_with(PipelineEntry::pending).clone()
        };

        if let Some(pipeline) = entry.resolve(true) {
            return Ok(pipeline);
        }

        let result = build_compute_pipeline(&self.device, self.driver_cache, &key, layout, shader_module);
        entry.complete(result);
        entry.resolve(false).ok_or_else(|| VulkanError::InvalidOperation {
            reason: "compute pipeline build failed".into(),
        })
    }

    /// Drop the cached "last transition" pointer, forcing the next request to
    /// take the full hash-map path. Called after a swapchain/device-loss
    /// recreate invalidates all previously built pipelines.
    pub fn invalidate(&self) {
        *self.last_transition.lock().unwrap() = None;
    }

    /// Persist the driver's current pipeline cache blob to `cache_file`.
    ///
    /// # Errors
    /// Returns the underlying Vulkan or IO error.
    pub fn persist(&self) -> VulkanResult<()> {
        let Some(path) = &self.cache_file else {
            return Ok(());
        };
        let data = unsafe { self.device.raw().get_pipeline_cache_data(self.driver_cache) }.map_err(VulkanError::Api)?;
        file::store(path, &data).map_err(|err| VulkanError::InitializationFailed(format!("writing pipeline cache: {err}")))
    }
}

fn build_graphics_pipeline(
    device: &Device,
    driver_cache: vk::PipelineCache,
    key: &GraphicsPipelineKey,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    vertex_bindings: &[vk::VertexInputBindingDescription],
    vertex_module: vk::ShaderModule,
    fragment_module: vk::ShaderModule,
) -> VulkanResult<vk::Pipeline> {
    let entry_point = std::ffi::CString::new("main").unwrap();
    let stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_module)
            .name(&entry_point)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_module)
            .name(&entry_point)
            .build(),
    ];

    let attribute_descriptions: Vec<_> = key
        .vertex_attributes
        .iter()
        .map(|attr| vk::VertexInputAttributeDescription {
            location: attr.location,
            binding: attr.binding,
            format: attr.format,
            offset: attr.offset,
        })
        .collect();

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(vertex_bindings)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder().topology(key.topology);

    let viewport_state = vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(key.cull_mode)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(key.samples);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(key.depth_test_enable)
        .depth_write_enable(key.depth_write_enable)
        .depth_compare_op(key.depth_compare_op);

    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(key.blend_enable)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .build();
    let attachments = [color_blend_attachment];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let create_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device
            .raw()
            .create_graphics_pipelines(driver_cache, &[create_info.build()], None)
    }
    .map_err(|(_, result)| VulkanError::Api(result))?;

    Ok(pipelines[0])
}

fn build_compute_pipeline(
    device: &Device,
    driver_cache: vk::PipelineCache,
    _key: &ComputePipelineKey,
    layout: vk::PipelineLayout,
    shader_module: vk::ShaderModule,
) -> VulkanResult<vk::Pipeline> {
    let entry_point = std::ffi::CString::new("main").unwrap();
    let stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(shader_module)
        .name(&entry_point);

    let create_info = vk::ComputePipelineCreateInfo::builder().stage(*stage).layout(layout);

    let pipelines = unsafe {
        device
            .raw()
            .create_compute_pipelines(driver_cache, &[create_info.build()], None)
    }
    .map_err(|(_, result)| VulkanError::Api(result))?;

    Ok(pipelines[0])
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        if let Err(err) = self.persist() {
            log::warn!("pipeline cache: failed to persist driver blob on shutdown: {err}");
        }
        unsafe { self.device.raw().destroy_pipeline_cache(self.driver_cache, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_entry_resolves_after_complete() {
        let entry = PipelineEntry::pending();
        entry.complete(Ok(vk::Pipeline::null()));
        assert_eq!(entry.resolve(true), Some(vk::Pipeline::null()));
    }

    #[test]
    fn pending_entry_returns_none_when_async() {
        let entry = PipelineEntry::pending();
        assert_eq!(entry.resolve(true), None);
    }

    #[test]
    fn failed_entry_resolves_to_none() {
        let entry = PipelineEntry::pending();
        entry.complete(Err(VulkanError::Unsupported("test".into())));
        assert_eq!(entry.resolve(true), None);
    }
}
