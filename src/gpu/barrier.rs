//! Image layout transitions and their batching into pipeline barriers.
//!
//! [`layout_transition`] is the single source of truth for which layout pairs the
//! engine knows how to synchronize. [`BarrierBatch`] collects transitions for many
//! images, chaining each request off the image's most recent pending layout and
//! grouping barriers that share a stage pair so one `vkCmdPipelineBarrier` covers them.

use std::{collections::HashMap, ptr, rc::Rc};

use vulkanalia::vk;

use crate::utils::error::SnnError;

use super::vk_image::{Image, color_subresource_range};

/// Access masks and pipeline stages for one layout change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Look up the synchronization needed to move an image from `from` to `to`.
pub fn layout_transition(
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) -> Result<LayoutTransition, SnnError> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let (src_access, dst_access, src_stage, dst_stage) = match (from, to) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
            (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER)
        }
        (L::TRANSFER_DST_OPTIMAL | L::UNDEFINED, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::SHADER_READ, S::TRANSFER, S::COMPUTE_SHADER)
        }
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_READ, A::SHADER_READ, S::TRANSFER, S::COMPUTE_SHADER)
        }
        (L::TRANSFER_DST_OPTIMAL | L::UNDEFINED, L::GENERAL) => {
            (A::TRANSFER_WRITE, A::SHADER_WRITE, S::TRANSFER, S::COMPUTE_SHADER)
        }
        (L::TRANSFER_SRC_OPTIMAL, L::GENERAL) => {
            (A::TRANSFER_READ, A::SHADER_WRITE, S::TRANSFER, S::COMPUTE_SHADER)
        }
        (L::SHADER_READ_ONLY_OPTIMAL, L::GENERAL) => {
            (A::SHADER_READ, A::SHADER_WRITE, S::COMPUTE_SHADER, S::COMPUTE_SHADER)
        }
        (L::GENERAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::SHADER_WRITE, A::SHADER_READ, S::COMPUTE_SHADER, S::COMPUTE_SHADER)
        }
        (L::SHADER_READ_ONLY_OPTIMAL | L::UNDEFINED, L::TRANSFER_SRC_OPTIMAL) => {
            (A::SHADER_WRITE, A::TRANSFER_READ, S::COMPUTE_SHADER, S::TRANSFER)
        }
        _ => {
            return Err(SnnError::Barrier(format!(
                "unimplemented image layout transition from {:?} to {:?}",
                from, to
            )));
        }
    };

    Ok(LayoutTransition {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

pub fn image_memory_barrier(
    image: vk::Image,
    from: vk::ImageLayout,
    to: vk::ImageLayout,
    transition: &LayoutTransition,
) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        next: ptr::null(),
        src_access_mask: transition.src_access,
        dst_access_mask: transition.dst_access,
        old_layout: from,
        new_layout: to,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: color_subresource_range(),
    }
}

/// Barriers sharing one (src, dst) stage pair, flushed by a single command.
pub struct BarrierGroup {
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub barriers: Vec<vk::ImageMemoryBarrier>,
    targets: Vec<(Rc<Image>, vk::ImageLayout)>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    layout: vk::ImageLayout,
    group: usize,
}

#[derive(Default)]
pub struct BarrierBatch {
    pending: HashMap<vk::Image, Pending>,
    groups: Vec<BarrierGroup>,
}

impl BarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transition of `image` to `to`.
    ///
    /// Returns `false` when the image already is (or will be) in `to`.
    pub fn add(&mut self, image: &Rc<Image>, to: vk::ImageLayout) -> Result<bool, SnnError> {
        let prior = self.pending.get(&image.handle()).copied();
        let from = prior.map_or(image.layout(), |p| p.layout);

        if from == to {
            return Ok(false);
        }

        let transition = layout_transition(from, to)?;
        let barrier = image_memory_barrier(image.handle(), from, to, &transition);

        let start = prior.map_or(0, |p| p.group + 1);
        let slot = self
            .groups
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, g)| {
                g.src_stage == transition.src_stage && g.dst_stage == transition.dst_stage
            })
            .map(|(i, _)| i);

        let group = match slot {
            Some(i) => i,
            None => {
                self.groups.push(BarrierGroup {
                    src_stage: transition.src_stage,
                    dst_stage: transition.dst_stage,
                    barriers: Vec::new(),
                    targets: Vec::new(),
                });
                self.groups.len() - 1
            }
        };

        self.groups[group].barriers.push(barrier);
        self.groups[group].targets.push((Rc::clone(image), to));
        self.pending.insert(image.handle(), Pending { layout: to, group });

        Ok(true)
    }

    pub fn groups(&self) -> &[BarrierGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn barrier_count(&self) -> usize {
        self.groups.iter().map(|g| g.barriers.len()).sum()
    }

    /// Layout an image will have once the batch is flushed, if it was touched.
    pub fn pending_layout(&self, image: &Image) -> Option<vk::ImageLayout> {
        self.pending.get(&image.handle()).map(|p| p.layout)
    }

    /// Store the final layouts on the images, in recording order.
    pub fn finish(self) {
        for group in self.groups {
            for (image, layout) in group.targets {
                image.set_layout(layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use vulkanalia::vk::Handle;

    use super::*;

    use vulkanalia::vk::ImageLayout as L;

    fn fake_image(id: u64, layout: vk::ImageLayout) -> Rc<Image> {
        Rc::new(Image::external(
            vk::Image::from_raw(id),
            vk::ImageView::null(),
            vk::Format::R16G16B16A16_SFLOAT,
            vk::Extent3D { width: 8, height: 8, depth: 1 },
            layout,
        ))
    }

    #[test]
    fn table_covers_engine_transitions() {
        let pairs = [
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL),
            (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
            (L::UNDEFINED, L::SHADER_READ_ONLY_OPTIMAL),
            (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
            (L::TRANSFER_DST_OPTIMAL, L::GENERAL),
            (L::UNDEFINED, L::GENERAL),
            (L::TRANSFER_SRC_OPTIMAL, L::GENERAL),
            (L::SHADER_READ_ONLY_OPTIMAL, L::GENERAL),
            (L::GENERAL, L::SHADER_READ_ONLY_OPTIMAL),
            (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_SRC_OPTIMAL),
            (L::UNDEFINED, L::TRANSFER_SRC_OPTIMAL),
        ];

        for (from, to) in pairs {
            assert!(layout_transition(from, to).is_ok(), "{:?} -> {:?}", from, to);
        }
    }

    #[test]
    fn unknown_transition_names_both_layouts() {
        let err = layout_transition(L::GENERAL, L::TRANSFER_DST_OPTIMAL).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("GENERAL"));
        assert!(msg.contains("TRANSFER_DST_OPTIMAL"));
    }

    #[test]
    fn compute_to_compute_uses_shader_stages() {
        let t = layout_transition(L::GENERAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(t.src_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(t.src_access, vk::AccessFlags::SHADER_WRITE);
        assert_eq!(t.dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn repeated_target_is_noop() {
        let image = fake_image(1, L::UNDEFINED);
        let mut batch = BarrierBatch::new();

        assert!(batch.add(&image, L::GENERAL).unwrap());
        assert!(!batch.add(&image, L::GENERAL).unwrap());
        assert_eq!(batch.barrier_count(), 1);

        batch.finish();
        assert_eq!(image.layout(), L::GENERAL);

        let mut batch = BarrierBatch::new();
        assert!(!batch.add(&image, L::GENERAL).unwrap());
        assert!(batch.is_empty());
        batch.finish();
        assert_eq!(image.layout(), L::GENERAL);
    }

    #[test]
    fn second_request_chains_from_pending_layout() {
        let image = fake_image(2, L::UNDEFINED);
        let mut batch = BarrierBatch::new();

        batch.add(&image, L::TRANSFER_DST_OPTIMAL).unwrap();
        batch.add(&image, L::SHADER_READ_ONLY_OPTIMAL).unwrap();

        let groups = batch.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].barriers[0].old_layout, L::TRANSFER_DST_OPTIMAL);
        assert_eq!(groups[1].barriers[0].new_layout, L::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(batch.pending_layout(&image), Some(L::SHADER_READ_ONLY_OPTIMAL));

        // nothing is applied until the batch is flushed
        assert_eq!(image.layout(), L::UNDEFINED);
        batch.finish();
        assert_eq!(image.layout(), L::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn matching_stage_pairs_share_a_group() {
        let a = fake_image(10, L::UNDEFINED);
        let b = fake_image(11, L::UNDEFINED);
        let c = fake_image(12, L::TRANSFER_DST_OPTIMAL);
        let mut batch = BarrierBatch::new();

        batch.add(&a, L::GENERAL).unwrap();
        batch.add(&b, L::GENERAL).unwrap();
        batch.add(&c, L::GENERAL).unwrap();

        assert_eq!(batch.groups().len(), 1);
        assert_eq!(batch.barrier_count(), 3);
    }

    #[test]
    fn chained_transition_never_joins_an_earlier_group() {
        let a = fake_image(20, L::SHADER_READ_ONLY_OPTIMAL);
        let b = fake_image(21, L::UNDEFINED);
        let c = fake_image(22, L::SHADER_READ_ONLY_OPTIMAL);
        let mut batch = BarrierBatch::new();

        batch.add(&a, L::GENERAL).unwrap(); // group 0, compute -> compute
        batch.add(&b, L::TRANSFER_DST_OPTIMAL).unwrap(); // group 1, top -> transfer
        batch.add(&a, L::SHADER_READ_ONLY_OPTIMAL).unwrap(); // must follow group 0
        batch.add(&c, L::GENERAL).unwrap(); // free to join group 0

        let groups = batch.groups();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].barriers.len(), 2);
        assert_eq!(groups[0].barriers[1].image, c.handle());
        assert_eq!(groups[2].barriers[0].image, a.handle());
        assert_eq!(groups[2].barriers[0].old_layout, L::GENERAL);

        batch.finish();
        assert_eq!(a.layout(), L::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(b.layout(), L::TRANSFER_DST_OPTIMAL);
        assert_eq!(c.layout(), L::GENERAL);
    }

    #[test]
    fn failed_add_leaves_batch_untouched() {
        let image = fake_image(30, L::GENERAL);
        let mut batch = BarrierBatch::new();

        assert!(batch.add(&image, L::TRANSFER_DST_OPTIMAL).is_err());
        assert!(batch.is_empty());
        assert_eq!(batch.pending_layout(&image), None);
    }
}
