//! Render-pass/pipeline state cache.
//!
//! Mirrors the original `State{render_pass_, framebuffer_, render_area_,
//! graphics_pipeline_}` struct: the scheduler checks against this before
//! emitting a bind/begin command, so that back-to-back draws with the same
//! pipeline or render target don't re-issue redundant Vulkan calls.

use ash::vk;

/// Currently bound render target and pipeline, as last recorded by the
/// scheduler. Used purely to deduplicate commands; it carries no GPU-side
/// authority of its own.
#[derive(Default)]
pub struct RenderPassState {
    render_pass: Option<vk::RenderPass>,
    framebuffer: Option<vk::Framebuffer>,
    render_area: Option<vk::Rect2D>,
    dynamic_rendering_area: Option<vk::Rect2D>,
    dynamic_rendering_formats: Vec<vk::Format>,
    graphics_pipeline: Option<vk::Pipeline>,
    /// True once a `vkCmdBeginRenderPass`/`vkCmdBeginRendering` scope is open
    /// and hasn't been closed by a matching end yet.
    in_render_pass: bool,
}

impl RenderPassState {
    /// True if the currently bound classic render pass already matches these
    /// parameters (so no new begin/end pair is needed).
    #[must_use]
    pub fn matches_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
    ) -> bool {
        self.in_render_pass
            && self.render_pass == Some(render_pass)
            && self.framebuffer == Some(framebuffer)
            && self.render_area == Some(render_area)
    }

    /// Record that `render_pass`/`framebuffer`/`render_area` are now bound.
    pub fn begin_render_pass(&mut self, render_pass: vk::RenderPass, framebuffer: vk::Framebuffer, render_area: vk::Rect2D) {
        self.render_pass = Some(render_pass);
        self.framebuffer = Some(framebuffer);
        self.render_area = Some(render_area);
        self.in_render_pass = true;
    }

    /// True if dynamic rendering is already active with this area and format set.
    #[must_use]
    pub fn matches_rendering(&self, render_area: vk::Rect2D, color_formats: &[vk::Format]) -> bool {
        self.in_render_pass
            && self.dynamic_rendering_area == Some(render_area)
            && self.dynamic_rendering_formats == color_formats
    }

    /// Record that dynamic rendering is now active with these parameters.
    pub fn begin_rendering(&mut self, render_area: vk::Rect2D, color_formats: &[vk::Format]) {
        self.dynamic_rendering_area = Some(render_area);
        self.dynamic_rendering_formats = color_formats.to_vec();
        self.in_render_pass = true;
    }

    /// Close whatever render scope is open. Returns `true` if an `EndRenderPass`
    /// command actually needs to be recorded.
    pub fn end_render_pass(&mut self) -> bool {
        if !self.in_render_pass {
            return false;
        }
        self.in_render_pass = false;
        self.render_pass = None;
        self.framebuffer = None;
        self.render_area = None;
        self.dynamic_rendering_area = None;
        self.dynamic_rendering_formats.clear();
        true
    }

    /// True if `pipeline` is already the bound graphics pipeline.
    #[must_use]
    pub fn matches_graphics_pipeline(&self, pipeline: vk::Pipeline) -> bool {
        self.graphics_pipeline == Some(pipeline)
    }

    /// Record that `pipeline` is now bound.
    pub fn set_graphics_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.graphics_pipeline = Some(pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_handle<T: From<u64>>() -> T {
        T::from(1)
    }

    #[test]
    fn begin_then_matches_same_params() {
        let mut state = RenderPassState::default();
        let rp: vk::RenderPass = dummy_handle();
        let fb: vk::Framebuffer = dummy_handle();
        let area = vk::Rect2D::default();
        state.begin_render_pass(rp, fb, area);
        assert!(state.matches_render_pass(rp, fb, area));
    }

    #[test]
    fn end_render_pass_is_idempotent() {
        let mut state = RenderPassState::default();
        assert!(!state.end_render_pass());
        state.begin_render_pass(dummy_handle(), dummy_handle(), vk::Rect2D::default());
        assert!(state.end_render_pass());
        assert!(!state.end_render_pass());
    }

    #[test]
    fn pipeline_dedup() {
        let mut state = RenderPassState::default();
        let pipeline: vk::Pipeline = dummy_handle();
        assert!(!state.matches_graphics_pipeline(pipeline));
        state.set_graphics_pipeline(pipeline);
        assert!(state.matches_graphics_pipeline(pipeline));
    }
}
