// SPDX-License-Identifier: CEPL-1.0
//! Swapchain recreation driven by window size changes.
use anyhow::Result;
use prism_render::RenderSize;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResizeState {
    #[default]
    Live,
    Recreating,
}

/// Everything whose validity depends on the swapchain extent or format.
pub trait SwapchainRebuild {
    /// Block until no submission is in flight.
    fn wait_idle(&mut self) -> Result<()>;
    /// Destroy image views, framebuffers, pipelines, render pass, pipeline
    /// layout and depth resources.
    fn release(&mut self);
    /// Recreate swapchain, image views, render pass, pipelines, depth
    /// resources, framebuffers and command buffers, in that order.
    fn rebuild(&mut self, size: RenderSize) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ResizeController {
    state: ResizeState,
    last_size: RenderSize,
    rebuilds: u64,
}

impl ResizeController {
    pub fn new(initial: RenderSize) -> Self {
        Self {
            last_size: initial,
            ..Self::default()
        }
    }

    pub fn state(&self) -> ResizeState {
        self.state
    }

    /// Last non-zero size the swapchain was built for.
    pub fn last_size(&self) -> RenderSize {
        self.last_size
    }

    /// Rebuild `target` for `size`. Zero-area sizes (minimized windows) are
    /// ignored and return `Ok(false)`. A failed rebuild leaves the controller
    /// in `Recreating`.
    pub fn resize<T: SwapchainRebuild + ?Sized>(
        &mut self,
        size: RenderSize,
        target: &mut T,
    ) -> Result<bool> {
        if size.is_zero_area() {
            debug!("vk: ignoring {}x{} resize", size.width, size.height);
            return Ok(false);
        }
        self.state = ResizeState::Recreating;
        target.wait_idle()?;
        target.release();
        target.rebuild(size)?;
        self.state = ResizeState::Live;
        self.last_size = size;
        self.rebuilds += 1;
        info!(
            "vk: swapchain recreated for {}x{} (rebuild #{})",
            size.width, size.height, self.rebuilds
        );
        Ok(true)
    }

    /// Rebuild for the last known size, e.g. after an out-of-date surface.
    pub fn refresh<T: SwapchainRebuild + ?Sized>(&mut self, target: &mut T) -> Result<bool> {
        self.resize(self.last_size, target)
    }
}
