use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    // ---- Buttons ----
    Press(MouseButton),
    Release(MouseButton),

    // ---- Movement ----
    Move {
        dx: i32,
        dy: i32,
    },
    MoveSmooth {
        dx: i32,
        dy: i32,
        segments: u32,
    },
    MoveBezier {
        dx: i32,
        dy: i32,
        segments: u32,
        ctrl_x: i32,
        ctrl_y: i32,
    },
    Wheel(i32),

    // ---- Locks ----
    Lock {
        target: LockTarget,
        locked: bool,
    },
    QueryLock(LockTarget),

    // ---- Device ----
    /// Turns asynchronous button telegrams on or off.
    Buttons(bool),
    SpoofSerial(String),
    ResetSerial,
    Version,
}

/// Physical inputs reported in the telegram mask, in bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Side1,
    Side2,
}

impl MouseButton {
    pub const ALL: [MouseButton; 5] = [
        MouseButton::Left,
        MouseButton::Right,
        MouseButton::Middle,
        MouseButton::Side1,
        MouseButton::Side2,
    ];

    pub fn bit(self) -> u8 {
        self as u8
    }

    pub fn from_bit(bit: u8) -> Option<Self> {
        Self::ALL.get(usize::from(bit)).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
            MouseButton::Side1 => "mouse4",
            MouseButton::Side2 => "mouse5",
        }
    }
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for MouseButton {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            "mouse4" | "side1" => Ok(MouseButton::Side1),
            "mouse5" | "side2" => Ok(MouseButton::Side2),
            _ => Err(Error::Command(format!("unsupported button: {s}"))),
        }
    }
}

/// Buttons and axes the device can suppress, in lock-cache bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockTarget {
    Left,
    Right,
    Middle,
    Side1,
    Side2,
    X,
    Y,
}

impl LockTarget {
    pub const ALL: [LockTarget; 7] = [
        LockTarget::Left,
        LockTarget::Right,
        LockTarget::Middle,
        LockTarget::Side1,
        LockTarget::Side2,
        LockTarget::X,
        LockTarget::Y,
    ];

    pub fn bit(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            LockTarget::Left => "left",
            LockTarget::Right => "right",
            LockTarget::Middle => "middle",
            LockTarget::Side1 => "mouse4",
            LockTarget::Side2 => "mouse5",
            LockTarget::X => "x",
            LockTarget::Y => "y",
        }
    }

    /// Suffix of the device's `km.lock_m*` command family.
    pub(crate) fn command_suffix(self) -> &'static str {
        match self {
            LockTarget::Left => "l",
            LockTarget::Right => "r",
            LockTarget::Middle => "m",
            LockTarget::Side1 => "s1",
            LockTarget::Side2 => "s2",
            LockTarget::X => "x",
            LockTarget::Y => "y",
        }
    }
}

impl From<MouseButton> for LockTarget {
    fn from(b: MouseButton) -> Self {
        match b {
            MouseButton::Left => LockTarget::Left,
            MouseButton::Right => LockTarget::Right,
            MouseButton::Middle => LockTarget::Middle,
            MouseButton::Side1 => LockTarget::Side1,
            MouseButton::Side2 => LockTarget::Side2,
        }
    }
}

impl fmt::Display for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for LockTarget {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x" => Ok(LockTarget::X),
            "y" => Ok(LockTarget::Y),
            other => other
                .parse::<MouseButton>()
                .map(LockTarget::from)
                .map_err(|_| Error::Command(format!("unknown lock target: {s}"))),
        }
    }
}
