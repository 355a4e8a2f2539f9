// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashSet;
use tracing::trace;
use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Pressed/released state per physical key, fed from window events and
/// sampled once per frame.
#[derive(Debug, Default)]
pub struct KeyState {
    held: HashSet<KeyCode>,
    pressed: HashSet<KeyCode>,
}

impl KeyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_event(&mut self, event: &KeyEvent) {
        if let PhysicalKey::Code(code) = event.physical_key {
            self.set(code, event.state, event.repeat);
        }
    }

    pub fn set(&mut self, code: KeyCode, state: ElementState, repeat: bool) {
        match state {
            ElementState::Pressed => {
                if self.held.insert(code) && !repeat {
                    trace!("key down {:?}", code);
                    self.pressed.insert(code);
                }
            }
            ElementState::Released => {
                self.held.remove(&code);
            }
        }
    }

    pub fn is_held(&self, code: KeyCode) -> bool {
        self.held.contains(&code)
    }

    /// Went down since the last `end_frame`.
    pub fn was_pressed(&self, code: KeyCode) -> bool {
        self.pressed.contains(&code)
    }

    pub fn end_frame(&mut self) {
        self.pressed.clear();
    }

    /// Focus loss drops every held key; releases would never arrive.
    pub fn clear(&mut self) {
        self.held.clear();
        self.pressed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_until_released() {
        let mut keys = KeyState::new();
        keys.set(KeyCode::KeyW, ElementState::Pressed, false);
        assert!(keys.is_held(KeyCode::KeyW));
        keys.end_frame();
        assert!(keys.is_held(KeyCode::KeyW));
        keys.set(KeyCode::KeyW, ElementState::Released, false);
        assert!(!keys.is_held(KeyCode::KeyW));
    }

    #[test]
    fn pressed_edge_lasts_one_frame() {
        let mut keys = KeyState::new();
        keys.set(KeyCode::KeyL, ElementState::Pressed, false);
        assert!(keys.was_pressed(KeyCode::KeyL));
        keys.end_frame();
        assert!(!keys.was_pressed(KeyCode::KeyL));
        // auto-repeat while held does not re-trigger
        keys.set(KeyCode::KeyL, ElementState::Pressed, true);
        assert!(!keys.was_pressed(KeyCode::KeyL));
    }

    #[test]
    fn clear_drops_everything() {
        let mut keys = KeyState::new();
        keys.set(KeyCode::KeyA, ElementState::Pressed, false);
        keys.clear();
        assert!(!keys.is_held(KeyCode::KeyA));
        assert!(!keys.was_pressed(KeyCode::KeyA));
    }
}
