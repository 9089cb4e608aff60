use thiserror::Error;

/// Why a run of bytes could not be turned into an instruction.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
  #[error("unsupported encoding {byte:#04x} ({byte:08b})")]
  UnsupportedEncoding { byte: u8 },
  #[error("truncated instruction: needed {needed} bytes, {available} available")]
  TruncatedInstruction { needed: usize, available: usize },
  #[error("invalid operand combination in {byte:#04x}: {reason}")]
  InvalidOperandCombination { byte: u8, reason: &'static str },
}

impl DecodeError {
  pub(crate) fn at(self, ip: usize) -> Error {
    Error { ip, kind: self }
  }
}

/// A [`DecodeError`] anchored at the instruction pointer where it happened.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("offset {ip:#06x}: {kind}")]
pub struct Error {
  pub ip: usize,
  pub kind: DecodeError,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
