//! Live view of the device's physical buttons, fed by state telegrams.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub use crate::proto::command::MouseButton;

/// Receives one call per button transition.
///
/// Runs on the read-loop thread: time spent here delays processing of every
/// byte behind the telegram that triggered it.
pub trait InputObserver: Send + Sync {
    fn on_input_changed(&self, button: MouseButton, pressed: bool);
}

impl<F> InputObserver for F
where
    F: Fn(MouseButton, bool) + Send + Sync,
{
    fn on_input_changed(&self, button: MouseButton, pressed: bool) {
        self(button, pressed)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct InputState {
    last_mask: u8,
    pressed: u8,
}

#[derive(Default)]
pub struct InputStateCache {
    state: Mutex<InputState>,
    observer: RwLock<Option<Arc<dyn InputObserver>>>,
}

impl InputStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn InputObserver>>) {
        debug!(enabled = observer.is_some(), "input observer set");
        *self.observer.write() = observer;
    }

    /// Folds a telegram into the cache and notifies the observer of each
    /// named button whose bit flipped.
    pub fn apply(&self, mask: u8) {
        let (changed, pressed) = {
            let mut st = self.state.lock();
            if mask == st.last_mask {
                return;
            }
            let changed = mask ^ st.last_mask;
            debug!("button state 0x{:02X} -> 0x{:02X}", st.last_mask, mask);
            st.pressed = (st.pressed & !changed) | (mask & changed);
            st.last_mask = mask;
            (changed, st.pressed)
        };

        // Cloned out so the observer may call back into the cache.
        let Some(observer) = self.observer.read().clone() else {
            return;
        };
        for bit in 0..8u8 {
            if changed & (1 << bit) == 0 {
                continue;
            }
            if let Some(button) = MouseButton::from_bit(bit) {
                observer.on_input_changed(button, pressed & (1 << bit) != 0);
            }
        }
    }

    /// Last raw mask received.
    pub fn mask(&self) -> u8 {
        self.state.lock().last_mask
    }

    pub fn is_pressed(&self, button: MouseButton) -> bool {
        self.state.lock().pressed & (1 << button.bit()) != 0
    }

    /// Pressed state of every named button, keyed by name.
    pub fn states(&self) -> BTreeMap<&'static str, bool> {
        let pressed = self.state.lock().pressed;
        MouseButton::ALL
            .iter()
            .map(|b| (b.name(), pressed & (1 << b.bit()) != 0))
            .collect()
    }

    /// Back to "nothing held", without notifying.
    pub fn reset(&self) {
        *self.state.lock() = InputState::default();
    }
}
