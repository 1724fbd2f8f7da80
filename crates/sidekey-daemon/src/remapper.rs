//! Event translation logic
//!
//! The remapper decides, for every event read from the physical mouse, which
//! virtual device it belongs to and how it is rewritten on the way:
//!
//! - The side and extra buttons (and their scan codes) become left-shift and
//!   left-ctrl events bound for the virtual keyboard.
//! - Relative X/Y motion is scaled by the configured DPI factor, with the
//!   sub-unit remainder carried forward so no motion is lost to truncation.
//! - Synchronization events go to both outputs so each virtual device sees
//!   complete, correctly delimited event packets.
//! - Everything else passes through to the virtual pointer unchanged.
//!
//! The mapping is total and deterministic, so it can be tested exhaustively
//! without live devices.

use evdev::{EventType, InputEvent, InputEventKind, Key, MiscType, RelativeAxisType};

/// Scan codes reported alongside the mouse side/extra button events.
pub const SCAN_BTN_SIDE: i32 = 0x90004;
pub const SCAN_BTN_EXTRA: i32 = 0x90005;
/// Scan codes for the modifier keys the buttons are rewritten to.
pub const SCAN_KEY_SHIFT: i32 = 0x70004;
pub const SCAN_KEY_CTRL: i32 = 0x70005;

/// Where a translated event must be delivered.
#[derive(Debug, Clone, Copy)]
pub enum Route {
    /// Enqueue for the keyboard output worker.
    Keyboard(InputEvent),
    /// Write directly to the virtual pointer device.
    Pointer(InputEvent),
    /// Deliver to both streams (synchronization events).
    Both(InputEvent),
}

/// Translates raw mouse events into routed, rewritten events.
///
/// Holds the fractional motion residuals left over after DPI scaling. The
/// residuals must be reset whenever the mouse session reconnects so that
/// motion from before a disconnect cannot leak into post-reconnect motion.
#[derive(Debug)]
pub struct Remapper {
    scale: f32,
    accum_x: f32,
    accum_y: f32,
}

impl Remapper {
    pub fn new(scale: f32) -> Self {
        Self {
            scale,
            accum_x: 0.0,
            accum_y: 0.0,
        }
    }

    /// Zero the motion accumulators. Called after a mouse reconnect.
    pub fn reset(&mut self) {
        self.accum_x = 0.0;
        self.accum_y = 0.0;
    }

    /// Translate one event into a routing decision.
    pub fn translate(&mut self, event: InputEvent) -> Route {
        match event.kind() {
            InputEventKind::Key(key) => match key {
                Key::BTN_SIDE => Route::Keyboard(InputEvent::new(
                    EventType::KEY,
                    Key::KEY_LEFTSHIFT.code(),
                    event.value(),
                )),
                Key::BTN_EXTRA => Route::Keyboard(InputEvent::new(
                    EventType::KEY,
                    Key::KEY_LEFTCTRL.code(),
                    event.value(),
                )),
                _ => Route::Pointer(event),
            },
            InputEventKind::RelAxis(RelativeAxisType::REL_X) => {
                let value = Self::scale_motion(&mut self.accum_x, self.scale, event.value());
                Route::Pointer(InputEvent::new(EventType::RELATIVE, event.code(), value))
            }
            InputEventKind::RelAxis(RelativeAxisType::REL_Y) => {
                let value = Self::scale_motion(&mut self.accum_y, self.scale, event.value());
                Route::Pointer(InputEvent::new(EventType::RELATIVE, event.code(), value))
            }
            InputEventKind::Misc(MiscType::MSC_SCAN) => match event.value() {
                SCAN_BTN_SIDE => Route::Keyboard(InputEvent::new(
                    EventType::MISC,
                    event.code(),
                    SCAN_KEY_SHIFT,
                )),
                SCAN_BTN_EXTRA => Route::Keyboard(InputEvent::new(
                    EventType::MISC,
                    event.code(),
                    SCAN_KEY_CTRL,
                )),
                _ => Route::Pointer(event),
            },
            InputEventKind::Synchronization(_) => Route::Both(event),
            _ => Route::Pointer(event),
        }
    }

    /// Scale one motion delta, carrying the sub-unit remainder in `accum`.
    fn scale_motion(accum: &mut f32, scale: f32, delta: i32) -> i32 {
        *accum += delta as f32 * scale;
        let step = accum.round();
        *accum -= step;
        step as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: Key, value: i32) -> InputEvent {
        InputEvent::new(EventType::KEY, code.code(), value)
    }

    fn rel_x(value: i32) -> InputEvent {
        InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_X.0, value)
    }

    fn scan(value: i32) -> InputEvent {
        InputEvent::new(EventType::MISC, MiscType::MSC_SCAN.0, value)
    }

    #[test]
    fn side_button_becomes_left_shift() {
        let mut remapper = Remapper::new(0.5);
        for value in [1, 0] {
            match remapper.translate(key(Key::BTN_SIDE, value)) {
                Route::Keyboard(ev) => {
                    assert_eq!(ev.code(), Key::KEY_LEFTSHIFT.code());
                    assert_eq!(ev.value(), value);
                }
                other => panic!("expected keyboard route, got {:?}", other),
            }
        }
    }

    #[test]
    fn extra_button_becomes_left_ctrl() {
        let mut remapper = Remapper::new(0.5);
        match remapper.translate(key(Key::BTN_EXTRA, 1)) {
            Route::Keyboard(ev) => {
                assert_eq!(ev.code(), Key::KEY_LEFTCTRL.code());
                assert_eq!(ev.value(), 1);
            }
            other => panic!("expected keyboard route, got {:?}", other),
        }
    }

    #[test]
    fn other_buttons_pass_through_to_pointer() {
        let mut remapper = Remapper::new(0.5);
        for code in [Key::BTN_LEFT, Key::BTN_RIGHT, Key::BTN_MIDDLE] {
            match remapper.translate(key(code, 1)) {
                Route::Pointer(ev) => {
                    assert_eq!(ev.code(), code.code());
                    assert_eq!(ev.value(), 1);
                }
                other => panic!("expected pointer route, got {:?}", other),
            }
        }
    }

    #[test]
    fn scan_codes_are_rewritten() {
        let mut remapper = Remapper::new(0.5);
        match remapper.translate(scan(SCAN_BTN_SIDE)) {
            Route::Keyboard(ev) => assert_eq!(ev.value(), SCAN_KEY_SHIFT),
            other => panic!("expected keyboard route, got {:?}", other),
        }
        match remapper.translate(scan(SCAN_BTN_EXTRA)) {
            Route::Keyboard(ev) => assert_eq!(ev.value(), SCAN_KEY_CTRL),
            other => panic!("expected keyboard route, got {:?}", other),
        }
        // Unrelated scan values are ordinary pointer traffic.
        match remapper.translate(scan(0x90001)) {
            Route::Pointer(ev) => assert_eq!(ev.value(), 0x90001),
            other => panic!("expected pointer route, got {:?}", other),
        }
    }

    #[test]
    fn synchronization_goes_to_both() {
        let mut remapper = Remapper::new(0.5);
        let ev = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        assert!(matches!(remapper.translate(ev), Route::Both(_)));
    }

    #[test]
    fn wheel_is_not_scaled() {
        let mut remapper = Remapper::new(0.5);
        let ev = InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_WHEEL.0, 1);
        match remapper.translate(ev) {
            Route::Pointer(out) => assert_eq!(out.value(), 1),
            other => panic!("expected pointer route, got {:?}", other),
        }
    }

    #[test]
    fn half_scale_alternates_unit_deltas() {
        let mut remapper = Remapper::new(0.5);
        let mut emitted = Vec::new();
        for _ in 0..4 {
            match remapper.translate(rel_x(1)) {
                Route::Pointer(ev) => emitted.push(ev.value()),
                other => panic!("expected pointer route, got {:?}", other),
            }
        }
        assert_eq!(emitted.iter().sum::<i32>(), 2);
        assert!(emitted.iter().all(|&v| v == 0 || v == 1));
        assert_eq!(emitted, vec![1, 0, 1, 0]);
    }

    #[test]
    fn accumulation_does_not_drift() {
        let mut remapper = Remapper::new(0.5);
        let inputs = [3, -2, 7, 1, -5, 4, 9, -1, 2, 6];
        let mut total = 0i64;
        for &delta in &inputs {
            if let Route::Pointer(ev) = remapper.translate(rel_x(delta)) {
                total += ev.value() as i64;
            }
        }
        let expected = (inputs.iter().sum::<i32>() as f64 * 0.5).round() as i64;
        assert!((total - expected).abs() <= 1);
    }

    #[test]
    fn reset_clears_residual_motion() {
        let mut remapper = Remapper::new(0.5);
        // Leaves a -0.5 residual behind.
        remapper.translate(rel_x(1));
        remapper.reset();
        match remapper.translate(rel_x(1)) {
            Route::Pointer(ev) => assert_eq!(ev.value(), 1),
            other => panic!("expected pointer route, got {:?}", other),
        }
    }

    #[test]
    fn axes_accumulate_independently() {
        let mut remapper = Remapper::new(0.5);
        let rel_y = |v| InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_Y.0, v);
        let x1 = match remapper.translate(rel_x(1)) {
            Route::Pointer(ev) => ev.value(),
            _ => unreachable!(),
        };
        let y1 = match remapper.translate(rel_y(1)) {
            Route::Pointer(ev) => ev.value(),
            _ => unreachable!(),
        };
        // Both axes see a fresh accumulator, so both round 0.5 up.
        assert_eq!(x1, 1);
        assert_eq!(y1, 1);
    }
}
