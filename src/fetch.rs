use log::trace;

use crate::classify::{classify, resolve_kind};
use crate::decode::{decode, Instruction};
use crate::error::{DecodeError, Result};
use crate::length::additional_length;

/// Reads instructions out of an immutable code image.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a> {
  code: &'a [u8],
}

impl<'a> Decoder<'a> {
  pub fn new(code: &'a [u8]) -> Self {
    Decoder { code }
  }

  pub fn code(&self) -> &'a [u8] {
    self.code
  }

  /// The instruction starting at `ip`, or `None` once `ip` is past the end
  /// of the code.
  pub fn fetch(&self, ip: usize) -> Result<Option<Instruction>> {
    if ip >= self.code.len() {
      return Ok(None);
    }
    self.fetch_at(ip).map(Some).map_err(|err| err.at(ip))
  }

  fn fetch_at(&self, ip: usize) -> Result<Instruction, DecodeError> {
    let byte0 = self.code[ip];
    let class = classify(byte0)?;
    trace!("{ip:#06x}: {byte0:08b} -> {class:?}");

    let mut len = 1;
    if class.has_mod_rm() {
      len += 1;
    }
    let head = self.read(ip, len)?;
    let extra = additional_length(class, head)?;
    let chunk = self.read(ip, 1 + extra)?;
    trace!("{ip:#06x}: {} bytes", chunk.len());

    let kind = resolve_kind(chunk)?;
    decode(chunk, kind)
  }

  fn read(&self, ip: usize, len: usize) -> Result<&'a [u8], DecodeError> {
    self
      .code
      .get(ip..ip + len)
      .ok_or(DecodeError::TruncatedInstruction {
        needed: len,
        available: self.code.len() - ip,
      })
  }

  /// Every instruction in order, without simulation.
  pub fn instructions(&self) -> Instructions<'a> {
    Instructions {
      decoder: *self,
      ip: 0,
      failed: false,
    }
  }
}

/// Iterator over `(ip, instruction)` pairs. Stops after the first error.
pub struct Instructions<'a> {
  decoder: Decoder<'a>,
  ip: usize,
  failed: bool,
}

impl Iterator for Instructions<'_> {
  type Item = Result<(usize, Instruction)>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.failed {
      return None;
    }
    match self.decoder.fetch(self.ip) {
      Ok(Some(instruction)) => {
        let ip = self.ip;
        self.ip += instruction.len;
        Some(Ok((ip, instruction)))
      }
      Ok(None) => None,
      Err(err) => {
        self.failed = true;
        Some(Err(err))
      }
    }
  }
}

/// One line of assembly per instruction, each terminated by a newline.
pub fn disassemble(code: &[u8]) -> Result<String> {
  let mut lines = Vec::new();
  for item in Decoder::new(code).instructions() {
    let (_, instruction) = item?;
    lines.push(instruction.to_string());
  }
  lines.push("".to_string());
  Ok(lines.join("\n"))
}
