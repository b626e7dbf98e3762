//! Logical resource states.
//!
//! wgpu inserts the actual memory barriers itself. The tracker mirrors the
//! transitions a pass declares before touching a resource so the orchestration
//! can assert that producers finished before consumers read.

use bitflags::bitflags;

use crate::{
    util::typedefs::{FastHashMap, SsoString},
    ResourceStateError,
};

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        const RENDER_TARGET = 1 << 0;
        const DEPTH_WRITE = 1 << 1;
        const DEPTH_READ = 1 << 2;
        const PIXEL_SHADER_RESOURCE = 1 << 3;
        const NON_PIXEL_SHADER_RESOURCE = 1 << 4;
        const UNORDERED_ACCESS = 1 << 5;
        const COPY_SOURCE = 1 << 6;
        const COPY_DEST = 1 << 7;
        const PRESENT = 1 << 8;

        const SHADER_RESOURCE = Self::PIXEL_SHADER_RESOURCE.bits() | Self::NON_PIXEL_SHADER_RESOURCE.bits();
    }
}

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub resource: SsoString,
    pub before: ResourceState,
    pub after: ResourceState,
}

#[derive(Default)]
pub struct ResourceStateTracker {
    states: FastHashMap<SsoString, ResourceState>,
    transitions: Vec<Transition>,
}

impl ResourceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `resource` in `state`, replacing any previous record.
    pub fn register(&mut self, resource: &str, state: ResourceState) {
        self.states.insert(resource.into(), state);
    }

    pub fn forget(&mut self, resource: &str) {
        self.states.remove(resource);
    }

    pub fn state(&self, resource: &str) -> Option<ResourceState> {
        self.states.get(resource).copied()
    }

    /// Moves `resource` to `after`. A no-op if it is already there.
    pub fn transition(&mut self, resource: &str, after: ResourceState) -> Result<(), ResourceStateError> {
        let state = self
            .states
            .get_mut(resource)
            .ok_or_else(|| ResourceStateError::Unknown {
                resource: resource.into(),
            })?;
        if *state == after {
            return Ok(());
        }

        log::trace!("{resource}: {:?} -> {:?}", *state, after);
        self.transitions.push(Transition {
            resource: resource.into(),
            before: *state,
            after,
        });
        *state = after;
        Ok(())
    }

    /// Like [`Self::transition`] but first checks the resource is in `before`.
    pub fn transition_from(
        &mut self,
        resource: &str,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<(), ResourceStateError> {
        self.require(resource, before)?;
        self.transition(resource, after)
    }

    /// Checks `resource` is in a state containing every flag of `expected`.
    pub fn require(&self, resource: &str, expected: ResourceState) -> Result<(), ResourceStateError> {
        let actual = self.state(resource).ok_or_else(|| ResourceStateError::Unknown {
            resource: resource.into(),
        })?;
        if actual.contains(expected) {
            Ok(())
        } else {
            Err(ResourceStateError::Unexpected {
                resource: resource.into(),
                expected,
                actual,
            })
        }
    }

    /// Drains the transitions recorded since the last call, in order.
    pub fn take_transitions(&mut self) -> Vec<Transition> {
        std::mem::take(&mut self.transitions)
    }

    /// Drops the transition log while keeping every resource's state. Called
    /// once per frame so the log only ever holds the latest frame.
    pub fn clear_transitions(&mut self) {
        self.transitions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_recorded_in_order() {
        let mut tracker = ResourceStateTracker::new();
        tracker.register("gbuffer albedo", ResourceState::SHADER_RESOURCE);

        tracker
            .transition("gbuffer albedo", ResourceState::RENDER_TARGET)
            .unwrap();
        tracker
            .transition("gbuffer albedo", ResourceState::RENDER_TARGET)
            .unwrap();
        tracker
            .transition("gbuffer albedo", ResourceState::PIXEL_SHADER_RESOURCE)
            .unwrap();

        let transitions = tracker.take_transitions();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].before, ResourceState::SHADER_RESOURCE);
        assert_eq!(transitions[0].after, ResourceState::RENDER_TARGET);
        assert_eq!(transitions[1].after, ResourceState::PIXEL_SHADER_RESOURCE);
        assert!(tracker.take_transitions().is_empty());
    }

    #[test]
    fn cleared_log_keeps_states() {
        let mut tracker = ResourceStateTracker::new();
        tracker.register("back buffer 0", ResourceState::PRESENT);

        for _ in 0..10_000 {
            tracker.clear_transitions();
            tracker
                .transition("back buffer 0", ResourceState::RENDER_TARGET)
                .unwrap();
            tracker.transition("back buffer 0", ResourceState::PRESENT).unwrap();
        }

        let transitions = tracker.take_transitions();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].before, ResourceState::PRESENT);
        assert_eq!(tracker.state("back buffer 0"), Some(ResourceState::PRESENT));
    }

    #[test]
    fn unknown_resources_are_rejected() {
        let mut tracker = ResourceStateTracker::new();
        assert_eq!(
            tracker.transition("missing", ResourceState::COPY_DEST),
            Err(ResourceStateError::Unknown {
                resource: "missing".into()
            })
        );
    }

    #[test]
    fn require_checks_containment() {
        let mut tracker = ResourceStateTracker::new();
        tracker.register("voxels", ResourceState::SHADER_RESOURCE);
        assert!(tracker.require("voxels", ResourceState::PIXEL_SHADER_RESOURCE).is_ok());

        tracker.register("voxels", ResourceState::UNORDERED_ACCESS);
        assert_eq!(
            tracker.require("voxels", ResourceState::NON_PIXEL_SHADER_RESOURCE),
            Err(ResourceStateError::Unexpected {
                resource: "voxels".into(),
                expected: ResourceState::NON_PIXEL_SHADER_RESOURCE,
                actual: ResourceState::UNORDERED_ACCESS,
            })
        );
    }

    #[test]
    fn transition_from_guards_the_source_state() {
        let mut tracker = ResourceStateTracker::new();
        tracker.register("back buffer", ResourceState::PRESENT);
        assert!(tracker
            .transition_from("back buffer", ResourceState::RENDER_TARGET, ResourceState::PRESENT)
            .is_err());
        tracker
            .transition_from("back buffer", ResourceState::PRESENT, ResourceState::RENDER_TARGET)
            .unwrap();
        assert_eq!(tracker.state("back buffer"), Some(ResourceState::RENDER_TARGET));

        tracker.forget("back buffer");
        assert_eq!(tracker.state("back buffer"), None);
    }
}
