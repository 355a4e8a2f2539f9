// SPDX-License-Identifier: CEPL-1.0
use prism_math::Movement;
use prism_platform::winit::keyboard::KeyCode;
use prism_platform::KeyState;

pub const HELP: &str = "\
Controls:
  W/A/S/D  move forward/left/back/right
  Q/E      move down/up
  M/N      metallic up/down
  R/T      roughness up/down
  L/O      point light on/off
  V        toggle vsync
  ESC      quit";

const MOVES: [(KeyCode, Movement); 6] = [
    (KeyCode::KeyW, Movement::FORWARD),
    (KeyCode::KeyS, Movement::BACK),
    (KeyCode::KeyA, Movement::LEFT),
    (KeyCode::KeyD, Movement::RIGHT),
    (KeyCode::KeyE, Movement::UP),
    (KeyCode::KeyQ, Movement::DOWN),
];

pub fn movement(keys: &KeyState) -> Movement {
    MOVES
        .iter()
        .filter(|(code, _)| keys.is_held(*code))
        .fold(Movement::empty(), |acc, (_, m)| acc | *m)
}

fn axis(keys: &KeyState, plus: KeyCode, minus: KeyCode) -> f32 {
    keys.is_held(plus) as i32 as f32 - keys.is_held(minus) as i32 as f32
}

/// (metallic, roughness) directions, each -1, 0 or +1.
pub fn material_dirs(keys: &KeyState) -> (f32, f32) {
    (
        axis(keys, KeyCode::KeyM, KeyCode::KeyN),
        axis(keys, KeyCode::KeyR, KeyCode::KeyT),
    )
}

/// New light state after this frame's L/O presses.
pub fn light_toggle(keys: &KeyState, on: bool) -> bool {
    if keys.was_pressed(KeyCode::KeyL) {
        true
    } else if keys.was_pressed(KeyCode::KeyO) {
        false
    } else {
        on
    }
}

pub fn vsync_toggled(keys: &KeyState) -> bool {
    keys.was_pressed(KeyCode::KeyV)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_platform::winit::event::ElementState;

    fn hold(codes: &[KeyCode]) -> KeyState {
        let mut keys = KeyState::new();
        for &c in codes {
            keys.set(c, ElementState::Pressed, false);
        }
        keys
    }

    #[test]
    fn held_keys_combine_into_movement() {
        let keys = hold(&[KeyCode::KeyW, KeyCode::KeyD, KeyCode::KeyQ]);
        assert_eq!(
            movement(&keys),
            Movement::FORWARD | Movement::RIGHT | Movement::DOWN
        );
        assert_eq!(movement(&KeyState::new()), Movement::empty());
    }

    #[test]
    fn opposing_material_keys_cancel() {
        assert_eq!(material_dirs(&hold(&[KeyCode::KeyM])), (1.0, 0.0));
        assert_eq!(material_dirs(&hold(&[KeyCode::KeyT])), (0.0, -1.0));
        assert_eq!(
            material_dirs(&hold(&[KeyCode::KeyM, KeyCode::KeyN, KeyCode::KeyR])),
            (0.0, 1.0)
        );
    }

    #[test]
    fn light_keys_set_state() {
        assert!(light_toggle(&hold(&[KeyCode::KeyL]), false));
        assert!(!light_toggle(&hold(&[KeyCode::KeyO]), true));
        assert!(light_toggle(&KeyState::new(), true));
    }

    #[test]
    fn vsync_toggles_on_press_edge_only() {
        let mut keys = KeyState::new();
        keys.set(KeyCode::KeyV, ElementState::Pressed, false);
        assert!(vsync_toggled(&keys));
        keys.end_frame();
        assert!(!vsync_toggled(&keys));
        keys.set(KeyCode::KeyV, ElementState::Pressed, true);
        assert!(!vsync_toggled(&keys));
    }
}
