//! The ordered list of passes one frame records.

use arrayvec::ArrayVec;
use radiance::types::RenderSettings;

use crate::post::{plan_post_chain, PostChain};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PassKind {
    Shadow,
    Voxelize,
    VoxelCopy,
    VoxelMips,
    VoxelBounce,
    VoxelBounceMips,
    GBuffer,
    Ssao,
    Lighting,
    Skybox,
    VoxelDebug,
    Taa,
    Post,
}

/// Voxel volume contents left by earlier frames.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct VoxelHistory {
    pub voxelized: bool,
    /// The second volume holds a bounce computed from the current first volume.
    pub bounced: bool,
}

impl VoxelHistory {
    /// Records the voxel passes of `plan` as done.
    pub fn apply(&mut self, plan: &FramePlan) {
        if plan.contains(PassKind::Voxelize) {
            self.voxelized = true;
            self.bounced = plan.contains(PassKind::VoxelBounce);
        }
    }

    /// Whether lighting should trace the bounced volume.
    pub fn use_bounce(&self, settings: &RenderSettings) -> bool {
        settings.vxgi.second_bounce && self.bounced
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePlan {
    passes: ArrayVec<PassKind, 13>,
    pub post: PostChain,
}

impl FramePlan {
    pub fn passes(&self) -> &[PassKind] {
        &self.passes
    }

    pub fn contains(&self, pass: PassKind) -> bool {
        self.passes.contains(&pass)
    }
}

/// Decides which passes run this frame and in which order.
pub fn plan_frame(settings: &RenderSettings, history: VoxelHistory) -> FramePlan {
    let vxgi = &settings.vxgi;
    let mut passes = ArrayVec::new();

    passes.push(PassKind::Shadow);

    let wants_volume = vxgi.enable_gi || vxgi.debug_voxel;
    let stale = vxgi.dynamic_update || !history.voxelized || (vxgi.second_bounce && !history.bounced);
    if wants_volume && stale {
        passes.push(PassKind::Voxelize);
        passes.push(PassKind::VoxelCopy);
        passes.push(PassKind::VoxelMips);
        if vxgi.second_bounce {
            passes.push(PassKind::VoxelBounce);
            passes.push(PassKind::VoxelBounceMips);
        }
    }

    passes.push(PassKind::GBuffer);
    if vxgi.debug_voxel {
        passes.push(PassKind::VoxelDebug);
    } else {
        passes.push(PassKind::Ssao);
        passes.push(PassKind::Lighting);
        passes.push(PassKind::Skybox);
    }

    if settings.taa_active() {
        passes.push(PassKind::Taa);
    }

    let post = plan_post_chain(&settings.post);
    if !post.is_empty() {
        passes.push(PassKind::Post);
    }

    FramePlan { passes, post }
}

#[cfg(test)]
mod tests {
    use radiance::types::Antialiasing;

    use super::*;

    fn position(plan: &FramePlan, pass: PassKind) -> usize {
        plan.passes()
            .iter()
            .position(|p| *p == pass)
            .unwrap_or_else(|| panic!("{pass:?} missing from {:?}", plan.passes()))
    }

    #[test]
    fn default_frame_order() {
        let plan = plan_frame(&RenderSettings::default(), VoxelHistory::default());
        assert_eq!(
            plan.passes(),
            [
                PassKind::Shadow,
                PassKind::Voxelize,
                PassKind::VoxelCopy,
                PassKind::VoxelMips,
                PassKind::VoxelBounce,
                PassKind::VoxelBounceMips,
                PassKind::GBuffer,
                PassKind::Ssao,
                PassKind::Lighting,
                PassKind::Skybox,
                PassKind::Taa,
                PassKind::Post,
            ]
        );
    }

    #[test]
    fn producers_precede_consumers() {
        let plan = plan_frame(&RenderSettings::default(), VoxelHistory::default());
        assert!(position(&plan, PassKind::Shadow) < position(&plan, PassKind::Voxelize));
        assert!(position(&plan, PassKind::VoxelMips) < position(&plan, PassKind::VoxelBounce));
        assert!(position(&plan, PassKind::VoxelBounceMips) < position(&plan, PassKind::Lighting));
        assert!(position(&plan, PassKind::GBuffer) < position(&plan, PassKind::Ssao));
        assert!(position(&plan, PassKind::Ssao) < position(&plan, PassKind::Lighting));
        assert!(position(&plan, PassKind::Lighting) < position(&plan, PassKind::Taa));
        assert!(position(&plan, PassKind::Taa) < position(&plan, PassKind::Post));
    }

    #[test]
    fn static_volume_is_voxelized_once() {
        let mut settings = RenderSettings::default();
        settings.vxgi.dynamic_update = false;
        let mut history = VoxelHistory::default();

        let first = plan_frame(&settings, history);
        assert!(first.contains(PassKind::Voxelize));
        history.apply(&first);
        assert!(history.use_bounce(&settings));

        let second = plan_frame(&settings, history);
        assert!(!second.contains(PassKind::Voxelize));
        assert!(!second.contains(PassKind::VoxelBounce));
    }

    #[test]
    fn enabling_the_bounce_revoxelizes_a_static_volume() {
        let mut settings = RenderSettings::default();
        settings.vxgi.dynamic_update = false;
        settings.vxgi.second_bounce = false;
        let mut history = VoxelHistory::default();
        history.apply(&plan_frame(&settings, history));
        assert!(!history.bounced);

        settings.vxgi.second_bounce = true;
        assert!(!history.use_bounce(&settings));
        let plan = plan_frame(&settings, history);
        assert!(plan.contains(PassKind::VoxelBounce));
    }

    #[test]
    fn gi_off_skips_the_volume() {
        let mut settings = RenderSettings::default();
        settings.vxgi.enable_gi = false;
        let plan = plan_frame(&settings, VoxelHistory::default());
        assert!(!plan.contains(PassKind::Voxelize));
        assert!(plan.contains(PassKind::Lighting));
    }

    #[test]
    fn voxel_debug_replaces_lighting_and_taa() {
        let mut settings = RenderSettings::default();
        settings.vxgi.enable_gi = false;
        settings.vxgi.debug_voxel = true;
        let plan = plan_frame(&settings, VoxelHistory::default());
        assert!(plan.contains(PassKind::Voxelize));
        assert!(plan.contains(PassKind::VoxelDebug));
        assert!(!plan.contains(PassKind::Lighting));
        assert!(!plan.contains(PassKind::Skybox));
        assert!(!plan.contains(PassKind::Taa));
    }

    #[test]
    fn post_is_skipped_when_no_effect_is_enabled() {
        let mut settings = RenderSettings::default();
        settings.post.antialiasing = Antialiasing::None;
        settings.post.motion_blur = false;
        settings.post.tone_mapping = false;
        let plan = plan_frame(&settings, VoxelHistory::default());
        assert!(!plan.contains(PassKind::Post));
        assert!(!plan.contains(PassKind::Taa));
        assert_eq!(plan.passes().last(), Some(&PassKind::Skybox));
    }
}
