//! The device's ASCII command language.

pub mod command;
pub mod format;

pub use command::{DeviceCommand, LockTarget, MouseButton};
pub use format::{format_command, frame_command, parse_lock_state, strip_prompt, strip_tag};
