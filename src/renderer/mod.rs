// =============================================================================
// RENDERER - owns every GPU object and drives the frame loop
// =============================================================================
//
// INITIALIZATION ORDER:
//   Instance -> Surface -> Device -> Swapchain -> Depth buffer
//   -> Descriptor layout -> Pipeline -> Framebuffers -> Command pool
//   -> Uniform buffers + descriptor sets -> Command buffers -> Frame sync
//
// Meshes are uploaded afterwards through `add_mesh`.
//
// Fields are declared in reverse creation order, so the default drop order
// tears everything down children-first. `Drop` only has to wait for the GPU.

mod frame;

pub use frame::{FrameBackend, FramePacer};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

use crate::backend::buffer::{DeviceStaging, GpuBuffer};
use crate::backend::command::CommandPool;
use crate::backend::descriptor::{DescriptorPool, DescriptorSetLayout};
use crate::backend::image::{find_depth_format, DepthBuffer};
use crate::backend::mesh::{Mesh, MeshStore, Vertex};
use crate::backend::pipeline::{Framebuffers, GraphicsPipeline};
use crate::backend::shader::ShaderModule;
use crate::backend::sync::FrameSync;
use crate::backend::{
    Instance, RendererError, RendererResult, Surface, Swapchain, VulkanDevice,
};
use crate::config::Config;

/// Uniform block at set 0, binding 0. Field order matches the vertex shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ViewProjection {
    pub projection: Mat4,
    pub view: Mat4,
}

impl Default for ViewProjection {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
        }
    }
}

const UNIFORM_SIZE: vk::DeviceSize = std::mem::size_of::<ViewProjection>() as vk::DeviceSize;

pub struct Renderer {
    // ─────────────────────────────────────────────────────────────────────────
    // PER FRAME SLOT
    // ─────────────────────────────────────────────────────────────────────────
    pacer: FramePacer,
    frame_sync: Vec<FrameSync>,

    // ─────────────────────────────────────────────────────────────────────────
    // PER SWAPCHAIN IMAGE
    // ─────────────────────────────────────────────────────────────────────────
    /// Freed with `command_pool`
    command_buffers: Vec<vk::CommandBuffer>,
    /// Freed with `descriptor_pool`
    descriptor_sets: Vec<vk::DescriptorSet>,
    _descriptor_pool: DescriptorPool,
    uniform_buffers: Vec<GpuBuffer>,

    // ─────────────────────────────────────────────────────────────────────────
    // SCENE
    // ─────────────────────────────────────────────────────────────────────────
    meshes: MeshStore<GpuBuffer>,
    view_projection: ViewProjection,
    clear_color: [f32; 4],

    // ─────────────────────────────────────────────────────────────────────────
    // PIPELINE
    // ─────────────────────────────────────────────────────────────────────────
    command_pool: CommandPool,
    framebuffers: Framebuffers,
    pipeline: GraphicsPipeline,
    _descriptor_set_layout: DescriptorSetLayout,
    depth_buffer: DepthBuffer,

    // ─────────────────────────────────────────────────────────────────────────
    // VULKAN CORE
    // ─────────────────────────────────────────────────────────────────────────
    swapchain: Swapchain,
    device: Arc<VulkanDevice>,
    _surface: Arc<Surface>,
    instance: Arc<Instance>,
}

impl Renderer {
    /// Build every GPU object needed to draw into `window`.
    ///
    /// Either the whole sequence succeeds or every object created so far is
    /// released before the error is returned.
    pub fn new<W>(window: &W, framebuffer_size: (u32, u32), config: &Config) -> RendererResult<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        log::info!("Initializing Vulkan...");

        let display = window
            .display_handle()
            .map_err(|e| RendererError::SurfaceCreation(format!("No display handle: {e}")))?
            .as_raw();

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Instance, surface, device
        // ─────────────────────────────────────────────────────────────────────
        let instance = Arc::new(Instance::new(
            &config.window.title,
            display,
            config.enable_validation(),
        )?);
        let surface = Arc::new(Surface::new(Arc::clone(&instance), window)?);
        let device = VulkanDevice::new(Arc::clone(&instance), &surface)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Swapchain and depth buffer
        // ─────────────────────────────────────────────────────────────────────
        let swapchain = Swapchain::new(
            Arc::clone(&device),
            Arc::clone(&surface),
            framebuffer_size,
            config.graphics.prefer_mailbox,
            vk::SwapchainKHR::null(),
        )?;
        let image_count = swapchain.image_count();

        let depth_format = find_depth_format(&device)?;
        let depth_buffer = DepthBuffer::new(Arc::clone(&device), depth_format, swapchain.extent)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Pipeline and framebuffers
        // ─────────────────────────────────────────────────────────────────────
        let descriptor_set_layout = DescriptorSetLayout::new(Arc::clone(&device))?;

        // Only needed until the pipeline is built
        let vert_shader = ShaderModule::from_file(Arc::clone(&device), &config.shaders.vertex)?;
        let frag_shader = ShaderModule::from_file(Arc::clone(&device), &config.shaders.fragment)?;

        let pipeline = GraphicsPipeline::new(
            Arc::clone(&device),
            swapchain.format,
            depth_format,
            swapchain.extent,
            &descriptor_set_layout,
            &vert_shader,
            &frag_shader,
            config.front_face(),
        )?;

        let framebuffers = Framebuffers::new(
            Arc::clone(&device),
            pipeline.render_pass,
            &swapchain.image_views(),
            depth_buffer.view,
            swapchain.extent,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Command pool (also used for mesh uploads)
        // ─────────────────────────────────────────────────────────────────────
        let command_pool = CommandPool::new(
            Arc::clone(&device),
            device.graphics_queue_family,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Per-image uniforms, descriptor sets and command buffers
        // ─────────────────────────────────────────────────────────────────────
        let uniform_buffers = (0..image_count)
            .map(|_| {
                GpuBuffer::new(
                    Arc::clone(&device),
                    UNIFORM_SIZE,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                )
            })
            .collect::<RendererResult<Vec<_>>>()?;

        let descriptor_pool = DescriptorPool::new(Arc::clone(&device), image_count as u32)?;
        let uniform_handles: Vec<vk::Buffer> = uniform_buffers.iter().map(|b| b.buffer).collect();
        let descriptor_sets = descriptor_pool.allocate_uniform_sets(
            &descriptor_set_layout,
            &uniform_handles,
            UNIFORM_SIZE,
        )?;

        let command_buffers = command_pool.allocate(image_count as u32)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Synchronization
        // ─────────────────────────────────────────────────────────────────────
        let frames_in_flight = config.max_frames_in_flight();
        let frame_sync = FrameSync::create_slots(&device, frames_in_flight)?;

        log::info!(
            "Vulkan initialized: {} swapchain images, {} frames in flight",
            image_count,
            frames_in_flight
        );

        Ok(Self {
            pacer: FramePacer::new(frames_in_flight, image_count),
            frame_sync,
            command_buffers,
            descriptor_sets,
            _descriptor_pool: descriptor_pool,
            uniform_buffers,
            meshes: MeshStore::new(),
            view_projection: ViewProjection::default(),
            clear_color: config.graphics.clear_color,
            command_pool,
            framebuffers,
            pipeline,
            _descriptor_set_layout: descriptor_set_layout,
            depth_buffer,
            swapchain,
            device,
            _surface: surface,
            instance,
        })
    }

    /// Upload a mesh through a staging buffer; returns its id
    pub fn add_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> RendererResult<usize> {
        let mut staging = DeviceStaging {
            device: &self.device,
            queue: self.device.graphics_queue,
            pool: &self.command_pool,
        };
        let mesh = Mesh::new(&mut staging, vertices, indices)?;
        let (vertex_count, index_count) = (mesh.vertex_count(), mesh.index_count());
        let id = self.meshes.push(mesh);

        log::debug!(
            "Uploaded mesh {}: {} vertices, {} indices",
            id,
            vertex_count,
            index_count
        );
        Ok(id)
    }

    /// Out-of-range ids are ignored
    pub fn update_model(&mut self, id: usize, model: Mat4) {
        if !self.meshes.set_model(id, model) {
            log::trace!("Ignoring model update for unknown mesh {}", id);
        }
    }

    pub fn set_view_projection(&mut self, view_projection: ViewProjection) {
        self.view_projection = view_projection;
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Render and present one frame
    pub fn draw(&mut self) -> RendererResult<()> {
        let mut frame = FrameContext {
            device: &self.device,
            swapchain: &self.swapchain,
            pipeline: &self.pipeline,
            framebuffers: &self.framebuffers.framebuffers,
            command_buffers: &self.command_buffers,
            descriptor_sets: &self.descriptor_sets,
            uniform_buffers: &self.uniform_buffers,
            frame_sync: &self.frame_sync,
            meshes: &self.meshes,
            view_projection: &self.view_projection,
            clear_color: self.clear_color,
        };

        self.pacer.draw_frame(&mut frame)?;
        Ok(())
    }

    pub fn wait_idle(&self) -> RendererResult<()> {
        self.device.wait_idle()
    }

    pub fn validation_enabled(&self) -> bool {
        self.instance.validation_enabled()
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_buffer.format
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        // Nothing may be destroyed while the GPU still uses it
        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle failed during teardown: {}", e);
        }
    }
}

/// Borrowed view of the renderer for one pass through the frame state machine
struct FrameContext<'a> {
    device: &'a VulkanDevice,
    swapchain: &'a Swapchain,
    pipeline: &'a GraphicsPipeline,
    framebuffers: &'a [vk::Framebuffer],
    command_buffers: &'a [vk::CommandBuffer],
    descriptor_sets: &'a [vk::DescriptorSet],
    uniform_buffers: &'a [GpuBuffer],
    frame_sync: &'a [FrameSync],
    meshes: &'a MeshStore<GpuBuffer>,
    view_projection: &'a ViewProjection,
    clear_color: [f32; 4],
}

impl FrameBackend for FrameContext<'_> {
    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn wait_for_fence(&mut self, slot: usize) -> RendererResult<()> {
        self.frame_sync[slot].wait()
    }

    fn reset_fence(&mut self, slot: usize) -> RendererResult<()> {
        self.frame_sync[slot].reset()
    }

    fn acquire_next_image(&mut self, slot: usize) -> RendererResult<usize> {
        let index = self
            .swapchain
            .acquire_next_image(u64::MAX, self.frame_sync[slot].image_available)?;
        Ok(index as usize)
    }

    fn record_commands(&mut self, image_index: usize) -> RendererResult<()> {
        let device = &self.device.device;
        let cmd = self.command_buffers[image_index];

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.pipeline.render_pass)
            .framebuffer(self.framebuffers[image_index])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.swapchain.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::builder())?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);

            // An empty store still clears the frame
            if !self.meshes.is_empty() {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline.layout,
                    0,
                    &[self.descriptor_sets[image_index]],
                    &[],
                );

                for mesh in self.meshes.iter() {
                    device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex_buffer().buffer], &[0]);
                    device.cmd_bind_index_buffer(
                        cmd,
                        mesh.index_buffer().buffer,
                        0,
                        vk::IndexType::UINT32,
                    );

                    let model = mesh.model();
                    device.cmd_push_constants(
                        cmd,
                        self.pipeline.layout,
                        vk::ShaderStageFlags::VERTEX,
                        0,
                        bytemuck::bytes_of(&model),
                    );

                    device.cmd_draw_indexed(cmd, mesh.index_count(), 1, 0, 0, 0);
                }
            }

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }

    fn update_uniforms(&mut self, image_index: usize) -> RendererResult<()> {
        self.uniform_buffers[image_index].write(bytemuck::bytes_of(self.view_projection))
    }

    fn submit(&mut self, slot: usize, image_index: usize) -> RendererResult<()> {
        let sync = &self.frame_sync[slot];

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffers[image_index]];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    sync.in_flight_fence,
                )
                .map_err(RendererError::FrameSubmission)
        }
    }

    fn present(&mut self, slot: usize, image_index: usize) -> RendererResult<()> {
        self.swapchain.present(
            self.device.present_queue,
            image_index as u32,
            &[self.frame_sync[slot].render_finished],
        )
    }
}
