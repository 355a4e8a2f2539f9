// SPDX-License-Identifier: CEPL-1.0
//! Tracked image layouts with validated transitions.
use ash::vk;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageLayoutState {
    Undefined,
    /// Linear image written by the host before first device use.
    Preinitialized,
    TransferSrc,
    TransferDst,
    ShaderReadOnly,
    DepthAttachment,
    PresentSource,
}

impl ImageLayoutState {
    pub fn vk_layout(self) -> vk::ImageLayout {
        match self {
            ImageLayoutState::Undefined => vk::ImageLayout::UNDEFINED,
            ImageLayoutState::Preinitialized => vk::ImageLayout::PREINITIALIZED,
            ImageLayoutState::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageLayoutState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayoutState::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageLayoutState::DepthAttachment => {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            }
            ImageLayoutState::PresentSource => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("image is in {actual:?}, caller assumed {expected:?}")]
    StateMismatch {
        expected: ImageLayoutState,
        actual: ImageLayoutState,
    },
    #[error("unsupported layout transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ImageLayoutState,
        to: ImageLayoutState,
    },
}

/// Barrier parameters for one validated transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutTransition {
    pub from: ImageLayoutState,
    pub to: ImageLayoutState,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    pub fn plan(from: ImageLayoutState, to: ImageLayoutState) -> Result<Self, LayoutError> {
        use ImageLayoutState as L;
        let (src_access, dst_access, src_stage, dst_stage) = match (from, to) {
            (L::Undefined, L::TransferDst) | (L::ShaderReadOnly, L::TransferDst) => (
                if from == L::ShaderReadOnly {
                    vk::AccessFlags::SHADER_READ
                } else {
                    vk::AccessFlags::empty()
                },
                vk::AccessFlags::TRANSFER_WRITE,
                if from == L::ShaderReadOnly {
                    vk::PipelineStageFlags::FRAGMENT_SHADER
                } else {
                    vk::PipelineStageFlags::TOP_OF_PIPE
                },
                vk::PipelineStageFlags::TRANSFER,
            ),
            (L::Preinitialized, L::TransferSrc) => (
                vk::AccessFlags::HOST_WRITE,
                vk::AccessFlags::TRANSFER_READ,
                vk::PipelineStageFlags::HOST,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (L::TransferDst, L::ShaderReadOnly) => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            (L::Undefined, L::DepthAttachment) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            ),
            _ => return Err(LayoutError::InvalidTransition { from, to }),
        };
        Ok(Self {
            from,
            to,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        })
    }
}

/// Current layout of one image (all subresources move together).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutTracker {
    current: ImageLayoutState,
}

impl LayoutTracker {
    pub fn new(initial: ImageLayoutState) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> ImageLayoutState {
        self.current
    }

    /// Validate `expected -> to` against the tracked state and commit it.
    pub fn transition(
        &mut self,
        expected: ImageLayoutState,
        to: ImageLayoutState,
    ) -> Result<LayoutTransition, LayoutError> {
        if self.current != expected {
            return Err(LayoutError::StateMismatch {
                expected,
                actual: self.current,
            });
        }
        let t = LayoutTransition::plan(expected, to)?;
        self.current = to;
        Ok(t)
    }
}

/// Record `transition` as a pipeline barrier over `range`.
pub(crate) unsafe fn cmd_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    t: &LayoutTransition,
) {
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: t.src_access,
        dst_access_mask: t.dst_access,
        old_layout: t.from.vk_layout(),
        new_layout: t.to.vk_layout(),
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: range,
        ..Default::default()
    };
    device.cmd_pipeline_barrier(
        cmd,
        t.src_stage,
        t.dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        std::slice::from_ref(&barrier),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ImageLayoutState as L;

    #[test]
    fn upload_sequence_is_accepted() {
        let mut t = LayoutTracker::new(L::Undefined);
        let a = t.transition(L::Undefined, L::TransferDst).expect("to dst");
        assert_eq!(a.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(a.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        let b = t.transition(L::TransferDst, L::ShaderReadOnly).expect("to read");
        assert_eq!(b.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(t.current(), L::ShaderReadOnly);
    }

    #[test]
    fn wrong_claimed_prior_state_is_reported() {
        let mut t = LayoutTracker::new(L::Undefined);
        let err = t.transition(L::TransferDst, L::ShaderReadOnly);
        assert_eq!(
            err,
            Err(LayoutError::StateMismatch {
                expected: L::TransferDst,
                actual: L::Undefined
            })
        );
        // state untouched after a rejected transition
        assert_eq!(t.current(), L::Undefined);
    }

    #[test]
    fn unsupported_pairs_are_rejected() {
        assert_eq!(
            LayoutTransition::plan(L::Undefined, L::ShaderReadOnly),
            Err(LayoutError::InvalidTransition {
                from: L::Undefined,
                to: L::ShaderReadOnly
            })
        );
        assert!(LayoutTransition::plan(L::PresentSource, L::TransferDst).is_err());
        assert!(LayoutTransition::plan(L::DepthAttachment, L::DepthAttachment).is_err());
    }

    #[test]
    fn depth_and_host_staging_transitions() {
        let d = LayoutTransition::plan(L::Undefined, L::DepthAttachment).expect("depth");
        assert!(d
            .dst_access
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        let s = LayoutTransition::plan(L::Preinitialized, L::TransferSrc).expect("staging");
        assert_eq!(s.src_access, vk::AccessFlags::HOST_WRITE);
        assert_eq!(s.dst_access, vk::AccessFlags::TRANSFER_READ);
    }

    #[test]
    fn re_upload_from_shader_read() {
        let t = LayoutTransition::plan(L::ShaderReadOnly, L::TransferDst).expect("reupload");
        assert_eq!(t.src_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn attachment_states_map_to_vulkan_layouts() {
        assert_eq!(L::PresentSource.vk_layout(), vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(
            L::DepthAttachment.vk_layout(),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }
}
