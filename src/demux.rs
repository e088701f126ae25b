//! Splits the device's byte stream into text lines and state telegrams.
//!
//! The device interleaves CRLF-terminated ASCII replies with single raw
//! bytes carrying the current button mask. Nothing frames the two apart, so
//! each byte is classified from its value, the byte before it, and whether a
//! text line is in progress. Telegram bytes are always below 0x20 (TAB
//! excepted), which leaves CR and LF as the ambiguous values.

use crate::proto::format::strip_prompt;

/// Bytes of line content retained; anything past this is dropped.
pub const LINE_CAPACITY: usize = 256;

const TAB: u8 = 0x09;
const LF: u8 = 0x0A;
const CR: u8 = 0x0D;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A complete reply line, trimmed and with the prompt marker removed.
    TextLine(String),
    /// A raw state byte: the full input mask.
    Telegram(u8),
}

/// What the demultiplexer knows when an LF arrives without a CR before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LfContext {
    /// Last input mask applied from a telegram.
    pub input_mask: u8,
    pub prev: Option<u8>,
    pub buffered: bool,
    pub expecting_text: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfDecision {
    /// The byte is a telegram with value 0x0A; drop any partial line.
    Telegram,
    /// The byte ends the buffered text line.
    EndLine,
    /// Text mode was armed with nothing buffered; just disarm it.
    Ignore,
}

/// Decides what a bare LF means.
///
/// Any held input, a control byte just before, or stray buffered bytes with
/// no line in progress all point at a telegram. Otherwise a line in progress
/// is ended, and an LF out of nowhere is still taken as a telegram.
pub fn classify_bare_lf(ctx: LfContext) -> LfDecision {
    let prev_control = matches!(ctx.prev, Some(p) if p < 0x20 && p != CR);
    if ctx.input_mask != 0 || prev_control || (ctx.buffered && !ctx.expecting_text) {
        return LfDecision::Telegram;
    }
    match (ctx.expecting_text, ctx.buffered) {
        (true, true) => LfDecision::EndLine,
        (true, false) => LfDecision::Ignore,
        (false, _) => LfDecision::Telegram,
    }
}

/// Byte-at-a-time stream classifier.
#[derive(Debug)]
pub struct StreamDemux {
    line: Vec<u8>,
    expecting_text: bool,
    prev: Option<u8>,
}

impl Default for StreamDemux {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDemux {
    pub fn new() -> Self {
        Self {
            line: Vec::with_capacity(LINE_CAPACITY),
            expecting_text: false,
            prev: None,
        }
    }

    /// Forget any partial line, e.g. after the link was reopened.
    pub fn reset(&mut self) {
        self.line.clear();
        self.expecting_text = false;
        self.prev = None;
    }

    /// Classifies one byte. `input_mask` is the mask currently held by the
    /// input cache; callers apply emitted telegrams before pushing the next
    /// byte so the heuristic sees the fresh value.
    pub fn push(&mut self, byte: u8, input_mask: u8, mut emit: impl FnMut(Event)) {
        let prev = self.prev.replace(byte);

        match byte {
            LF if prev == Some(CR) => {
                self.finish_line(&mut emit);
            }
            b if b >= 0x20 || b == TAB => {
                self.expecting_text = true;
                if self.line.len() < LINE_CAPACITY {
                    self.line.push(b);
                }
            }
            CR => {
                // Held until the next byte says whether it was a terminator.
                if !self.line.is_empty() {
                    self.expecting_text = true;
                }
            }
            LF => {
                let decision = classify_bare_lf(LfContext {
                    input_mask,
                    prev,
                    buffered: !self.line.is_empty(),
                    expecting_text: self.expecting_text,
                });
                match decision {
                    LfDecision::Telegram => self.telegram(LF, &mut emit),
                    LfDecision::EndLine => self.finish_line(&mut emit),
                    LfDecision::Ignore => self.expecting_text = false,
                }
            }
            b => {
                if prev == Some(CR) {
                    emit(Event::Telegram(CR));
                }
                self.telegram(b, &mut emit);
            }
        }
    }

    fn telegram(&mut self, value: u8, emit: &mut impl FnMut(Event)) {
        emit(Event::Telegram(value));
        self.line.clear();
        self.expecting_text = false;
    }

    fn finish_line(&mut self, emit: &mut impl FnMut(Event)) {
        if !self.line.is_empty() {
            let raw = String::from_utf8_lossy(&self.line);
            let content = strip_prompt(&raw);
            if !content.is_empty() {
                emit(Event::TextLine(content.to_string()));
            }
            self.line.clear();
        }
        self.expecting_text = false;
    }
}
