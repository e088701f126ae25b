use super::command::{DeviceCommand, MouseButton};
use crate::error::{Error, Result};

/// Marker the device echoes in front of reply lines.
pub const PROMPT: &str = ">>> ";

/// Sent after every (re)connect to turn on button telegrams.
pub const INIT_COMMAND: &str = "km.buttons(1)";

/// Renders a command as bare text, without correlation tag or line ending.
pub fn format_command(cmd: &DeviceCommand) -> Result<String> {
    use DeviceCommand::*;

    let text = match cmd {
        // ---- Buttons
        Press(b) => format!("km.{}(1)", button_fn(*b)),
        Release(b) => format!("km.{}(0)", button_fn(*b)),

        // ---- Movement
        Move { dx, dy } => format!("km.move({dx},{dy})"),
        MoveSmooth { dx, dy, segments } => format!("km.move({dx},{dy},{segments})"),
        MoveBezier {
            dx,
            dy,
            segments,
            ctrl_x,
            ctrl_y,
        } => format!("km.move({dx},{dy},{segments},{ctrl_x},{ctrl_y})"),
        Wheel(delta) => format!("km.wheel({delta})"),

        // ---- Locks
        Lock { target, locked } => {
            format!("km.lock_m{}({})", target.command_suffix(), u8::from(*locked))
        }
        QueryLock(target) => format!("km.lock_m{}()", target.command_suffix()),

        // ---- Device
        Buttons(on) => format!("km.buttons({})", u8::from(*on)),
        SpoofSerial(serial) => {
            validate_serial(serial)?;
            format!("km.serial('{serial}')")
        }
        ResetSerial => "km.serial(0)".to_string(),
        Version => "km.version()".to_string(),
    };
    Ok(text)
}

fn button_fn(b: MouseButton) -> &'static str {
    match b {
        MouseButton::Left => "left",
        MouseButton::Right => "right",
        MouseButton::Middle => "middle",
        MouseButton::Side1 => "ms1",
        MouseButton::Side2 => "ms2",
    }
}

fn validate_serial(serial: &str) -> Result<()> {
    if serial.is_empty() {
        return Err(Error::Command("serial must not be empty".into()));
    }
    if let Some(c) = serial
        .chars()
        .find(|c| c.is_control() || matches!(c, '\'' | '"' | '\\' | '#'))
    {
        return Err(Error::Command(format!(
            "serial contains unsupported character {c:?}"
        )));
    }
    Ok(())
}

/// Wire form of a command: `text\r\n`, or `text#id\r\n` when a reply is awaited.
pub fn frame_command(text: &str, id: Option<u16>) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 8);
    out.extend_from_slice(text.as_bytes());
    if let Some(id) = id {
        out.push(b'#');
        out.extend_from_slice(id.to_string().as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Trims a raw reply line and drops the prompt marker. A bare prompt
/// leaves nothing.
pub fn strip_prompt(line: &str) -> &str {
    let s = line.trim();
    if s == PROMPT.trim_end() {
        return "";
    }
    match s.strip_prefix(PROMPT) {
        Some(rest) => rest.trim(),
        None => s,
    }
}

/// Removes a trailing `#<digits>` correlation tag.
pub fn strip_tag(reply: &str) -> &str {
    if let Some(idx) = reply.rfind('#') {
        let tag = &reply[idx + 1..];
        if !tag.is_empty() && tag.bytes().all(|b| b.is_ascii_digit()) {
            return reply[..idx].trim_end();
        }
    }
    reply
}

/// Lock queries answer `1` when locked; anything else reads as unlocked.
pub fn parse_lock_state(reply: &str) -> bool {
    reply.trim() == "1"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::proto::LockTarget;
    use pretty_assertions::assert_eq;

    fn fmt(cmd: DeviceCommand) -> String {
        format_command(&cmd).unwrap()
    }

    #[test]
    fn button_commands() {
        assert_eq!(fmt(DeviceCommand::Press(MouseButton::Left)), "km.left(1)");
        assert_eq!(fmt(DeviceCommand::Release(MouseButton::Side1)), "km.ms1(0)");
        assert_eq!(fmt(DeviceCommand::Press(MouseButton::Side2)), "km.ms2(1)");
    }

    #[test]
    fn movement_commands() {
        assert_eq!(fmt(DeviceCommand::Move { dx: -5, dy: 12 }), "km.move(-5,12)");
        assert_eq!(
            fmt(DeviceCommand::MoveSmooth { dx: 100, dy: 0, segments: 10 }),
            "km.move(100,0,10)"
        );
        assert_eq!(
            fmt(DeviceCommand::MoveBezier {
                dx: 100,
                dy: 50,
                segments: 8,
                ctrl_x: 50,
                ctrl_y: 25,
            }),
            "km.move(100,50,8,50,25)"
        );
        assert_eq!(fmt(DeviceCommand::Wheel(-3)), "km.wheel(-3)");
    }

    #[test]
    fn lock_commands() {
        assert_eq!(
            fmt(DeviceCommand::Lock { target: LockTarget::X, locked: true }),
            "km.lock_mx(1)"
        );
        assert_eq!(
            fmt(DeviceCommand::Lock { target: LockTarget::Side2, locked: false }),
            "km.lock_ms2(0)"
        );
        assert_eq!(fmt(DeviceCommand::QueryLock(LockTarget::Left)), "km.lock_ml()");
    }

    #[test]
    fn device_commands() {
        assert_eq!(fmt(DeviceCommand::Buttons(true)), INIT_COMMAND);
        assert_eq!(fmt(DeviceCommand::Buttons(false)), "km.buttons(0)");
        assert_eq!(fmt(DeviceCommand::SpoofSerial("ABC123".into())), "km.serial('ABC123')");
        assert_eq!(fmt(DeviceCommand::ResetSerial), "km.serial(0)");
        assert_eq!(fmt(DeviceCommand::Version), "km.version()");
    }

    #[test]
    fn bad_serials_rejected() {
        for bad in ["", "a'b", "x\r\ny", "q#1"] {
            let err = format_command(&DeviceCommand::SpoofSerial(bad.into())).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Command, "{bad:?}");
        }
    }

    #[test]
    fn framing() {
        assert_eq!(frame_command("km.move(1,1)", None), b"km.move(1,1)\r\n".to_vec());
        assert_eq!(frame_command("km.version()", Some(42)), b"km.version()#42\r\n".to_vec());
    }

    #[test]
    fn reply_cleanup() {
        assert_eq!(strip_prompt(">>> km.version()  "), "km.version()");
        assert_eq!(strip_prompt("  MAKCU "), "MAKCU");
        assert_eq!(strip_prompt(">>> "), "");
        assert_eq!(strip_prompt(">>>x"), ">>>x");
        assert_eq!(strip_prompt(">>>  1 "), "1");
        assert_eq!(strip_tag("1#17"), "1");
        assert_eq!(strip_tag("km.MAKCU v3.2 #9999"), "km.MAKCU v3.2");
        assert_eq!(strip_tag("color#red"), "color#red");
        assert_eq!(strip_tag("trailing#"), "trailing#");
        assert!(parse_lock_state(" 1 "));
        assert!(!parse_lock_state("0"));
        assert!(!parse_lock_state("10"));
    }
}
