//! Instruction framing.
//!
//! Every instruction is a list of elements. Each element is written as
//! `<length>.<value>`, where length counts Unicode scalar values (not bytes).
//! Elements are separated by `,` and the instruction ends with `;`:
//!
//! ```text
//! 4.time,36.1b4e28ba-2fa1-11d2-883f-0016d3cca427,9.Unlimited;
//! ```
//!
//! The first element is the opcode, the rest are arguments.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::{GatewayStatus, CLOSE_ARG, ERROR_OPCODE, INTERNAL_OPCODE, MAX_INSTRUCTION_SIZE, TIME_OPCODE};

/// Errors produced while decoding instructions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid element length at byte {0}")]
    InvalidLength(usize),

    #[error("expected ',' or ';' at byte {0}")]
    MissingSeparator(usize),

    #[error("element value is not valid UTF-8")]
    InvalidUtf8,

    #[error("instruction exceeds {MAX_INSTRUCTION_SIZE} bytes")]
    TooLarge,

    #[error("instruction is incomplete")]
    Incomplete,

    #[error("unexpected data after instruction terminator")]
    TrailingData,
}

/// A single protocol instruction: an opcode and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    opcode: String,
    args: Vec<String>,
}

impl Instruction {
    pub fn new<I, S>(opcode: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            opcode: opcode.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Quota status frame: `4.time,<n>.<session>,<m>.<text>;`
    pub fn time(session_id: &str, text: &str) -> Self {
        Self::new(TIME_OPCODE, [session_id, text])
    }

    /// Termination frame: `5.error,5.close,6.<hex>;`
    pub fn close(status: GatewayStatus) -> Self {
        Self::new(ERROR_OPCODE, [CLOSE_ARG, status.hex()])
    }

    /// Gateway-to-client frame using the reserved empty opcode.
    pub fn internal<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(INTERNAL_OPCODE, args)
    }

    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Encode into the on-the-wire text form.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decode one instruction from the front of `buf`.
    ///
    /// Returns `Ok(None)` without consuming anything when `buf` only holds
    /// the beginning of an instruction. On success exactly the bytes of the
    /// returned instruction are removed from `buf`. Every call scans from the
    /// start of `buf`; streams should go through [`InstructionCodec`], which
    /// resumes where the previous call stopped.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, FrameError> {
        let mut scan = Scan::default();
        match scan.advance(buf)? {
            Some(consumed) => {
                buf.advance(consumed);
                Ok(Some(Self::from_elements(scan.elements)))
            }
            None => Ok(None),
        }
    }

    /// Parse a string holding exactly one complete instruction.
    pub fn parse(frame: &str) -> Result<Self, FrameError> {
        let mut scan = Scan::default();
        match scan.advance(frame.as_bytes())? {
            Some(consumed) if consumed == frame.len() => Ok(Self::from_elements(scan.elements)),
            Some(_) => Err(FrameError::TrailingData),
            None => Err(FrameError::Incomplete),
        }
    }

    fn from_elements(mut elements: Vec<String>) -> Self {
        // a finished scan always holds at least the opcode
        let opcode = elements.remove(0);
        Self {
            opcode,
            args: elements,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_element(f, &self.opcode)?;
        for arg in &self.args {
            f.write_str(",")?;
            write_element(f, arg)?;
        }
        f.write_str(";")
    }
}

impl FromStr for Instruction {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn write_element(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    write!(f, "{}.{}", value.chars().count(), value)
}

/// Errors surfaced by [`InstructionCodec`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Streaming decoder for a byte stream of instructions.
///
/// Keeps its position inside a partially received instruction between
/// calls, so each byte is scanned once however the input is chunked.
#[derive(Debug, Default)]
pub struct InstructionCodec {
    scan: Scan,
}

impl InstructionCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for InstructionCodec {
    type Item = Instruction;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Instruction>, CodecError> {
        match self.scan.advance(src)? {
            Some(consumed) => {
                let scan = std::mem::take(&mut self.scan);
                src.advance(consumed);
                Ok(Some(Instruction::from_elements(scan.elements)))
            }
            None => Ok(None),
        }
    }
}

/// Progress through one instruction. Positions are byte offsets from the
/// start of the instruction.
#[derive(Debug, Clone, Default)]
struct Scan {
    pos: usize,
    elements: Vec<String>,
    stage: Stage,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    /// Reading the decimal length of the element starting at `start`.
    Length { start: usize, len: usize },
    /// `left` characters of the value starting at `start` still to skip.
    Value { start: usize, left: usize },
    /// Value starting at `start` is complete; expecting `,` or `;`.
    Separator { start: usize },
}

impl Default for Stage {
    fn default() -> Self {
        Self::Length { start: 0, len: 0 }
    }
}

impl Scan {
    /// Continue scanning `buf`, which must still hold every byte seen by
    /// earlier calls. Returns the byte length of the instruction (terminator
    /// included) once it is complete, or `None` when more input is needed.
    fn advance(&mut self, buf: &[u8]) -> Result<Option<usize>, FrameError> {
        loop {
            match self.stage {
                Stage::Length { start, len } => {
                    let Some(&b) = buf.get(self.pos) else {
                        return need_more(self.pos);
                    };
                    match b {
                        b'0'..=b'9' => {
                            let len = len
                                .checked_mul(10)
                                .and_then(|l| l.checked_add(usize::from(b - b'0')))
                                .filter(|l| *l <= MAX_INSTRUCTION_SIZE)
                                .ok_or(FrameError::InvalidLength(start))?;
                            self.stage = Stage::Length { start, len };
                        }
                        b'.' if self.pos > start => {
                            self.stage = Stage::Value {
                                start: self.pos + 1,
                                left: len,
                            };
                        }
                        _ => return Err(FrameError::InvalidLength(start)),
                    }
                    self.pos += 1;
                }
                Stage::Value { start, left: 0 } => self.stage = Stage::Separator { start },
                Stage::Value { start, left } => {
                    let Some(&lead) = buf.get(self.pos) else {
                        return need_more(self.pos);
                    };
                    self.pos += utf8_width(lead).ok_or(FrameError::InvalidUtf8)?;
                    self.stage = Stage::Value {
                        start,
                        left: left - 1,
                    };
                }
                Stage::Separator { start } => {
                    let Some(&separator) = buf.get(self.pos) else {
                        return need_more(self.pos);
                    };
                    let value = std::str::from_utf8(&buf[start..self.pos])
                        .map_err(|_| FrameError::InvalidUtf8)?;
                    self.elements.push(value.to_owned());
                    self.pos += 1;

                    if self.pos > MAX_INSTRUCTION_SIZE {
                        return Err(FrameError::TooLarge);
                    }

                    match separator {
                        b',' => {
                            self.stage = Stage::Length {
                                start: self.pos,
                                len: 0,
                            }
                        }
                        b';' => return Ok(Some(self.pos)),
                        _ => return Err(FrameError::MissingSeparator(self.pos - 1)),
                    }
                }
            }
        }
    }
}

fn need_more(pos: usize) -> Result<Option<usize>, FrameError> {
    if pos > MAX_INSTRUCTION_SIZE {
        Err(FrameError::TooLarge)
    } else {
        Ok(None)
    }
}

/// Byte width of a UTF-8 sequence given its leading byte.
fn utf8_width(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}
