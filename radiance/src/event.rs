//! Input delivered to the renderer by the windowing layer.

use bitflags::bitflags;

bitflags! {
    /// Keys the renderer reacts to.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Keys: u8 {
        const W = 1 << 0;
        const A = 1 << 1;
        const S = 1 << 2;
        const D = 1 << 3;
        const SHIFT = 1 << 4;
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum InputEvent {
    /// The presentation surface changed size, in pixels.
    Resize { width: u32, height: u32 },
    /// The mouse moved with the orbit button held, in pixels.
    MouseDrag { dx: f32, dy: f32 },
    Key { key: Keys, pressed: bool },
}

/// Keys currently held down.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct KeyState {
    held: Keys,
}

impl KeyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, key: Keys, pressed: bool) {
        self.held.set(key, pressed);
    }

    pub fn is_down(&self, key: Keys) -> bool {
        self.held.contains(key)
    }

    pub fn held(&self) -> Keys {
        self.held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_state_tracks_presses() {
        let mut keys = KeyState::new();
        keys.apply(Keys::W, true);
        keys.apply(Keys::SHIFT, true);
        assert!(keys.is_down(Keys::W));
        assert!(keys.is_down(Keys::W | Keys::SHIFT));

        keys.apply(Keys::W, false);
        assert!(!keys.is_down(Keys::W));
        assert_eq!(keys.held(), Keys::SHIFT);
    }
}
