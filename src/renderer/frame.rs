// Frame pacing
//
// Drives the per-frame state machine over N in-flight slots. Semaphores and
// fences are indexed by slot; command buffers, uniform buffers, descriptor
// sets and framebuffers are indexed by the acquired swapchain image.

use crate::backend::RendererResult;

/// The GPU-facing half of a frame. `slot` is always in `0..frames_in_flight`;
/// `image_index` is whatever the swapchain handed out.
pub trait FrameBackend {
    fn image_count(&self) -> usize;

    /// Block until the fence of `slot` is signaled
    fn wait_for_fence(&mut self, slot: usize) -> RendererResult<()>;

    fn reset_fence(&mut self, slot: usize) -> RendererResult<()>;

    /// Returns the acquired image index; signals the slot's image-available semaphore
    fn acquire_next_image(&mut self, slot: usize) -> RendererResult<usize>;

    fn record_commands(&mut self, image_index: usize) -> RendererResult<()>;

    fn update_uniforms(&mut self, image_index: usize) -> RendererResult<()>;

    /// Submit the image's commands, signaling the slot's fence on completion
    fn submit(&mut self, slot: usize, image_index: usize) -> RendererResult<()>;

    fn present(&mut self, slot: usize, image_index: usize) -> RendererResult<()>;
}

pub struct FramePacer {
    current_slot: usize,
    frames_in_flight: usize,
    /// Slot that last submitted work for each swapchain image
    image_owners: Vec<Option<usize>>,
}

impl FramePacer {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            current_slot: 0,
            frames_in_flight: frames_in_flight.max(1),
            image_owners: vec![None; image_count],
        }
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Run one frame. Returns the image index that was presented.
    ///
    /// The slot fence is reset only after acquisition succeeds, so a failed
    /// acquire never leaves an unsignaled fence with no submission behind it.
    pub fn draw_frame<B: FrameBackend>(&mut self, backend: &mut B) -> RendererResult<usize> {
        let slot = self.current_slot;

        backend.wait_for_fence(slot)?;

        let image_index = backend.acquire_next_image(slot)?;

        if image_index >= self.image_owners.len() {
            self.image_owners.resize(backend.image_count().max(image_index + 1), None);
        }

        // Another slot may still be rendering into this image
        if let Some(owner) = self.image_owners[image_index] {
            if owner != slot {
                backend.wait_for_fence(owner)?;
            }
        }
        self.image_owners[image_index] = Some(slot);

        backend.reset_fence(slot)?;

        backend.record_commands(image_index)?;
        backend.update_uniforms(image_index)?;
        backend.submit(slot, image_index)?;
        backend.present(slot, image_index)?;

        self.current_slot = (slot + 1) % self.frames_in_flight;
        Ok(image_index)
    }
}
