//! Bump-allocated command chunk and the tagged command list it replays.
//!
//! The original scheduler placement-news type-erased command objects into a
//! fixed byte arena; Rust's enum dispatch gets the same "no per-command heap
//! allocation, no virtual call" effect far more simply, so the chunk here is
//! a `Vec<Command>` capped at a byte-equivalent command count rather than a
//! raw arena.

use ash::vk;

/// Matches the original `CommandChunk`'s `0x8000`-byte arena: each chunk holds
/// at most this many recorded commands before [`Scheduler::flush`] is forced.
///
/// [`Scheduler::flush`]: super::Scheduler::flush
const MAX_COMMANDS_PER_CHUNK: usize = 0x8000 / 64;

/// One recorded Vulkan operation, replayed onto a real command buffer by the
/// scheduler's worker thread.
#[derive(Clone)]
pub enum Command {
    /// Begin a classic render pass.
    BeginRenderPass {
        /// Render pass to begin.
        render_pass: vk::RenderPass,
        /// Framebuffer compatible with `render_pass`.
        framebuffer: vk::Framebuffer,
        /// Render area passed to `vkCmdBeginRenderPass`.
        render_area: vk::Rect2D,
    },
    /// Begin dynamic rendering (`VK_KHR_dynamic_rendering`).
    BeginRendering {
        /// Render area passed to `vkCmdBeginRendering`.
        render_area: vk::Rect2D,
        /// Color attachment formats, used to validate pipeline compatibility.
        color_formats: Vec<vk::Format>,
    },
    /// End the currently active render pass or dynamic rendering scope.
    EndRenderPass,
    /// Bind a graphics pipeline.
    BindGraphicsPipeline(vk::Pipeline),
    /// Bind a compute pipeline.
    BindComputePipeline(vk::Pipeline),
    /// Bind vertex buffers starting at `first_binding`.
    BindVertexBuffers {
        /// First vertex input binding slot.
        first_binding: u32,
        /// Buffers to bind, one per binding slot starting at `first_binding`.
        buffers: Vec<vk::Buffer>,
        /// Byte offset into each buffer in `buffers`.
        offsets: Vec<vk::DeviceSize>,
    },
    /// Bind an index buffer.
    BindIndexBuffer {
        /// Buffer containing index data.
        buffer: vk::Buffer,
        /// Byte offset of the first index.
        offset: vk::DeviceSize,
        /// Index element type.
        index_type: vk::IndexType,
    },
    /// Bind descriptor sets for the given bind point.
    BindDescriptorSets {
        /// Graphics or compute bind point.
        bind_point: vk::PipelineBindPoint,
        /// Pipeline layout the sets are compatible with.
        layout: vk::PipelineLayout,
        /// First descriptor set slot.
        first_set: u32,
        /// Descriptor sets to bind.
        sets: Vec<vk::DescriptorSet>,
    },
    /// Issue an indexed draw call.
    DrawIndexed {
        /// Number of indices to draw.
        index_count: u32,
        /// Number of instances to draw.
        instance_count: u32,
        /// Offset into the bound index buffer.
        first_index: u32,
        /// Value added to each index before indexing into the vertex buffer.
        vertex_offset: i32,
        /// First instance ID.
        first_instance: u32,
    },
    /// Issue a non-indexed draw call.
    Draw {
        /// Number of vertices to draw.
        vertex_count: u32,
        /// Number of instances to draw.
        instance_count: u32,
        /// First vertex.
        first_vertex: u32,
        /// First instance ID.
        first_instance: u32,
    },
    /// Issue a compute dispatch.
    Dispatch {
        /// Workgroup count in X.
        x: u32,
        /// Workgroup count in Y.
        y: u32,
        /// Workgroup count in Z.
        z: u32,
    },
    /// Copy one buffer's contents into another.
    CopyBuffer {
        /// Source buffer.
        src: vk::Buffer,
        /// Destination buffer.
        dst: vk::Buffer,
        /// Regions to copy.
        regions: Vec<vk::BufferCopy>,
    },
    /// Copy a buffer's contents into an image.
    CopyBufferToImage {
        /// Source buffer.
        src: vk::Buffer,
        /// Destination image.
        dst: vk::Image,
        /// Layout `dst` is in at the time of the copy.
        dst_layout: vk::ImageLayout,
        /// Regions to copy.
        regions: Vec<vk::BufferImageCopy>,
    },
    /// Copy an image's contents into a buffer; used by the format-conversion
    /// matrix's bit-reinterpret pairings (same texel layout, different
    /// aspect/format), which round-trip through a buffer since `vkCmdCopyImage`
    /// does not allow copying between a depth and a color format directly.
    CopyImageToBuffer {
        /// Source image.
        src: vk::Image,
        /// Layout `src` is in at the time of the copy.
        src_layout: vk::ImageLayout,
        /// Destination buffer.
        dst: vk::Buffer,
        /// Regions to copy.
        regions: Vec<vk::BufferImageCopy>,
    },
    /// Insert a pipeline barrier.
    PipelineBarrier {
        /// Stages that must complete before the barrier.
        src_stage: vk::PipelineStageFlags,
        /// Stages that must wait for the barrier.
        dst_stage: vk::PipelineStageFlags,
        /// Image memory barriers to insert.
        image_barriers: Vec<vk::ImageMemoryBarrier>,
    },
    /// Insert a global memory barrier with no image/buffer specificity, used
    /// by compute dispatches to order storage-buffer writes against later reads.
    MemoryBarrier {
        /// Stages that must complete before the barrier.
        src_stage: vk::PipelineStageFlags,
        /// Stages that must wait for the barrier.
        dst_stage: vk::PipelineStageFlags,
    },
    /// Push constant bytes onto the currently bound pipeline layout.
    PushConstants {
        /// Pipeline layout the push constant range belongs to.
        layout: vk::PipelineLayout,
        /// Shader stages the range is visible to.
        stage_flags: vk::ShaderStageFlags,
        /// Byte offset of the range within the layout's push constant block.
        offset: u32,
        /// Bytes to push.
        data: Vec<u8>,
    },
    /// Set the dynamic viewport state.
    SetViewport(vk::Viewport),
    /// Set the dynamic scissor state.
    SetScissor(vk::Rect2D),
    /// Clear a color image directly (outside any render pass), used by the
    /// texture cache to zero-initialize a freshly committed render target.
    ClearColorImage {
        /// Image to clear; must be in `layout`.
        image: vk::Image,
        /// Layout `image` is in at the time of the clear.
        layout: vk::ImageLayout,
        /// Clear color.
        value: vk::ClearColorValue,
        /// Subresource range to clear.
        range: vk::ImageSubresourceRange,
    },
    /// Clear a depth/stencil image directly (outside any render pass).
    ClearDepthStencilImage {
        /// Image to clear; must be in `layout`.
        image: vk::Image,
        /// Layout `image` is in at the time of the clear.
        layout: vk::ImageLayout,
        /// Clear depth/stencil value.
        value: vk::ClearDepthStencilValue,
        /// Subresource range to clear.
        range: vk::ImageSubresourceRange,
    },
    /// Clear the bound color and/or depth/stencil attachments of the active
    /// render pass (the façade's `clean(clear_value)`).
    ClearAttachments {
        /// Color clear value for attachment 0, if present.
        clear_color: Option<vk::ClearColorValue>,
        /// Depth/stencil clear value, if present.
        clear_depth_stencil: Option<vk::ClearDepthStencilValue>,
        /// Region to clear.
        rect: vk::Rect2D,
    },
}

/// A bounded sequence of [`Command`]s recorded on the caller's thread and
/// later replayed onto a real `vk::CommandBuffer` by the scheduler worker.
///
/// Holds two independent lists: `commands`, replayed onto the chunk's main
/// command buffer, and `upload_commands`, replayed onto a second buffer
/// submitted ahead of the main one in the same batch (see
/// [`Scheduler::record_upload`]). A chunk only becomes a submission point
/// once [`Self::mark_submit`] has been called on it.
///
/// [`Scheduler::record_upload`]: super::Scheduler::record_upload
#[derive(Default)]
pub struct CommandChunk {
    commands: Vec<Command>,
    upload_commands: Vec<Command>,
    has_submit: bool,
}

impl CommandChunk {
    /// Create an empty chunk.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: Vec::with_capacity(MAX_COMMANDS_PER_CHUNK.min(256)),
            upload_commands: Vec::new(),
            has_submit: false,
        }
    }

    /// Append `command` to the main list. Returns `false` (without
    /// appending) if the chunk has reached [`MAX_COMMANDS_PER_CHUNK`] and
    /// the caller must hand off the chunk first.
    pub fn push(&mut self, command: Command) -> bool {
        if self.commands.len() >= MAX_COMMANDS_PER_CHUNK {
            return false;
        }
        self.commands.push(command);
        true
    }

    /// Append `command` to the upload list. Returns `false` (without
    /// appending) under the same capacity rule as [`Self::push`].
    pub fn push_upload(&mut self, command: Command) -> bool {
        if self.upload_commands.len() >= MAX_COMMANDS_PER_CHUNK {
            return false;
        }
        self.upload_commands.push(command);
        true
    }

    /// True if both lists still have room for `n` more commands each.
    #[must_use]
    pub fn has_room(&self, n: usize) -> bool {
        self.commands.len() + n <= MAX_COMMANDS_PER_CHUNK && self.upload_commands.len() + n <= MAX_COMMANDS_PER_CHUNK
    }

    /// Mark this chunk as a real submission point rather than a mid-stream
    /// handoff.
    pub fn mark_submit(&mut self) {
        self.has_submit = true;
    }

    /// True if [`Self::mark_submit`] was called on this chunk.
    #[must_use]
    pub fn has_submit(&self) -> bool {
        self.has_submit
    }

    /// True if no commands have been recorded into this chunk.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.upload_commands.is_empty()
    }

    /// Replay every recorded main command onto `command_buffer` in order.
    pub fn replay(&self, device: &crate::device::Device, command_buffer: vk::CommandBuffer) {
        replay_commands(device, command_buffer, &self.commands);
    }

    /// Replay every recorded upload command onto `command_buffer` in order.
    pub fn replay_upload(&self, device: &crate::device::Device, command_buffer: vk::CommandBuffer) {
        replay_commands(device, command_buffer, &self.upload_commands);
    }
}

fn replay_commands(device: &crate::device::Device, command_buffer: vk::CommandBuffer, commands: &[Command]) {
    let raw = device.raw();
    for command in commands {
        match command {
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                render_area,
            } => {
                let clear_values = [vk::ClearValue::default()];
                let begin_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(*render_pass)
                    .framebuffer(*framebuffer)
                    .render_area(*render_area)
                    .clear_values(&clear_values);
                unsafe { raw.cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE) };
            }
            Command::BeginRendering { render_area, color_formats: _ } => {
                let rendering_info = vk::RenderingInfo::builder()
                    .render_area(*render_area)
                    .layer_count(1);
                unsafe { raw.cmd_begin_rendering(command_buffer, &rendering_info) };
            }
            Command::EndRenderPass => unsafe {
                raw.cmd_end_render_pass(command_buffer);
            },
            Command::BindGraphicsPipeline(pipeline) => unsafe {
                raw.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, *pipeline);
            },
            Command::BindComputePipeline(pipeline) => unsafe {
                raw.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, *pipeline);
            },
            Command::BindVertexBuffers {
                first_binding,
                buffers,
                offsets,
            } => unsafe {
                raw.cmd_bind_vertex_buffers(command_buffer, *first_binding, buffers, offsets);
            },
            Command::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            } => unsafe {
                raw.cmd_bind_index_buffer(command_buffer, *buffer, *offset, *index_type);
            },
            Command::BindDescriptorSets {
                bind_point,
                layout,
                first_set,
                sets,
            } => unsafe {
                raw.cmd_bind_descriptor_sets(command_buffer, *bind_point, *layout, *first_set, sets, &[]);
            },
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => unsafe {
                raw.cmd_draw_indexed(
                    command_buffer,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                );
            },
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => unsafe {
                raw.cmd_draw(command_buffer, *vertex_count, *instance_count, *first_vertex, *first_instance);
            },
            Command::Dispatch { x, y, z } => unsafe {
                raw.cmd_dispatch(command_buffer, *x, *y, *z);
            },
            Command::CopyBuffer { src, dst, regions } => unsafe {
                raw.cmd_copy_buffer(command_buffer, *src, *dst, regions);
            },
            Command::CopyBufferToImage {
                src,
                dst,
                dst_layout,
                regions,
            } => unsafe {
                raw.cmd_copy_buffer_to_image(command_buffer, *src, *dst, *dst_layout, regions);
            },
            Command::CopyImageToBuffer {
                src,
                src_layout,
                dst,
                regions,
            } => unsafe {
                raw.cmd_copy_image_to_buffer(command_buffer, *src, *src_layout, *dst, regions);
            },
            Command::PipelineBarrier {
                src_stage,
                dst_stage,
                image_barriers,
            } => unsafe {
                raw.cmd_pipeline_barrier(
                    command_buffer,
                    *src_stage,
                    *dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    image_barriers,
                );
            },
            Command::MemoryBarrier { src_stage, dst_stage } => unsafe {
                let barrier = vk::MemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
                    .dst_access_mask(vk::AccessFlags::MEMORY_READ)
                    .build();
                raw.cmd_pipeline_barrier(
                    command_buffer,
                    *src_stage,
                    *dst_stage,
                    vk::DependencyFlags::empty(),
                    &[barrier],
                    &[],
                    &[],
                );
            },
            Command::PushConstants {
                layout,
                stage_flags,
                offset,
                data,
            } => unsafe {
                raw.cmd_push_constants(command_buffer, *layout, *stage_flags, *offset, data);
            },
            Command::SetViewport(viewport) => unsafe {
                raw.cmd_set_viewport(command_buffer, 0, &[*viewport]);
            },
            Command::SetScissor(scissor) => unsafe {
                raw.cmd_set_scissor(command_buffer, 0, &[*scissor]);
            },
            Command::ClearColorImage { image, layout, value, range } => unsafe {
                raw.cmd_clear_color_image(command_buffer, *image, *layout, value, &[*range]);
            },
            Command::ClearDepthStencilImage { image, layout, value, range } => unsafe {
                raw.cmd_clear_depth_stencil_image(command_buffer, *image, *layout, value, &[*range]);
            },
            Command::ClearAttachments { clear_color, clear_depth_stencil, rect } => unsafe {
                let mut attachments = Vec::with_capacity(2);
                if let Some(color) = clear_color {
                    attachments.push(vk::ClearAttachment {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        color_attachment: 0,
                        clear_value: vk::ClearValue { color: *color },
                    });
                }
                if let Some(depth_stencil) = clear_depth_stencil {
                    attachments.push(vk::ClearAttachment {
                        aspect_mask: vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
                        color_attachment: 0,
                        clear_value: vk::ClearValue { depth_stencil: *depth_stencil },
                    });
                }
                if !attachments.is_empty() {
                    let clear_rect = vk::ClearRect {
                        rect: *rect,
                        base_array_layer: 0,
                        layer_count: 1,
                    };
                    raw.cmd_clear_attachments(command_buffer, &attachments, &[clear_rect]);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_rejects_past_capacity() {
        let mut chunk = CommandChunk::new();
        for _ in 0..MAX_COMMANDS_PER_CHUNK {
            assert!(chunk.push(Command::EndRenderPass));
        }
        assert!(!chunk.push(Command::EndRenderPass));
    }

    #[test]
    fn new_chunk_is_empty() {
        assert!(CommandChunk::new().is_empty());
    }

    #[test]
    fn upload_commands_count_separately_from_main() {
        let mut chunk = CommandChunk::new();
        assert!(chunk.push_upload(Command::EndRenderPass));
        assert!(!chunk.is_empty());
        assert!(chunk.has_room(1));
    }

    #[test]
    fn mark_submit_is_sticky() {
        let mut chunk = CommandChunk::new();
        assert!(!chunk.has_submit());
        chunk.mark_submit();
        assert!(chunk.has_submit());
    }
}
