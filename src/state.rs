use std::fmt;

use bitflags::bitflags;

use crate::decode::{Address, Reg, Register, Segment};

/// 1 MiB, the full real-mode address range.
pub const MEMORY_SIZE: usize = 1 << 20;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterFile {
  words: [u16; 8],
  segments: [u16; 4],
}

impl RegisterFile {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, reg: Reg) -> u16 {
    self.words[reg.index()]
  }

  pub fn set(&mut self, reg: Reg, value: u16) {
    self.words[reg.index()] = value;
  }

  pub fn get_low(&self, reg: Reg) -> u8 {
    (self.get(reg) & 0xFF) as u8
  }

  pub fn get_high(&self, reg: Reg) -> u8 {
    (self.get(reg) >> 8) as u8
  }

  pub fn set_low(&mut self, reg: Reg, value: u8) {
    let word = self.get(reg);
    self.set(reg, (word & 0xFF00) | value as u16);
  }

  pub fn set_high(&mut self, reg: Reg, value: u8) {
    let word = self.get(reg);
    self.set(reg, (word & 0x00FF) | ((value as u16) << 8));
  }

  pub fn segment(&self, segment: Segment) -> u16 {
    self.segments[segment.index()]
  }

  /// Value of `register`, zero-extended for byte registers.
  pub fn read(&self, register: Register) -> u16 {
    match register {
      Register::Word(reg) => self.get(reg),
      Register::Low(reg) => self.get_low(reg) as u16,
      Register::High(reg) => self.get_high(reg) as u16,
      Register::Segment(segment) => self.segment(segment),
    }
  }

  /// Store `value` truncated to the width of `register`.
  pub fn write(&mut self, register: Register, value: u16) {
    match register {
      Register::Word(reg) => self.set(reg, value),
      Register::Low(reg) => self.set_low(reg, value as u8),
      Register::High(reg) => self.set_high(reg, value as u8),
      Register::Segment(segment) => self.segments[segment.index()] = value,
    }
  }

  /// (base + index + displacement) mod 65536; direct addresses pass through.
  pub fn effective_address(&self, address: Address) -> u16 {
    match address {
      Address::Direct(address) => address,
      Address::Based { base, displacement } => {
        let (base, index) = base.registers();
        let index = index.map_or(0, |index| self.get(index));
        self
          .get(base)
          .wrapping_add(index)
          .wrapping_add(displacement as u16)
      }
    }
  }
}

bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct Flags: u8 {
    const ZERO = 0b01;
    const SIGN = 0b10;
  }
}

impl Default for Flags {
  fn default() -> Self {
    Flags::empty()
  }
}

impl Flags {
  /// Flags for a result already truncated to 8 or 16 bits.
  pub fn from_result(result: u16, wide: bool) -> Flags {
    let sign_bit = if wide { 0x8000 } else { 0x80 };
    let mut flags = Flags::empty();
    flags.set(Flags::ZERO, result == 0);
    flags.set(Flags::SIGN, result & sign_bit != 0);
    flags
  }
}

impl fmt::Display for Flags {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.contains(Flags::ZERO) {
      f.write_str("Z")?;
    }
    if self.contains(Flags::SIGN) {
      f.write_str("S")?;
    }
    Ok(())
  }
}

/// Flat byte-addressed memory.
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
  bytes: Vec<u8>,
}

impl Memory {
  pub fn new() -> Self {
    Memory {
      bytes: vec![0; MEMORY_SIZE],
    }
  }

  /// Copy `image` to address 0. Bytes past the end of memory are dropped.
  pub fn load(&mut self, image: &[u8]) {
    let len = image.len().min(MEMORY_SIZE);
    self.bytes[..len].copy_from_slice(&image[..len]);
  }

  pub fn read_u8(&self, address: usize) -> u8 {
    self.bytes[address % MEMORY_SIZE]
  }

  pub fn write_u8(&mut self, address: usize, value: u8) {
    self.bytes[address % MEMORY_SIZE] = value;
  }

  pub fn read_u16(&self, address: usize) -> u16 {
    u16::from_le_bytes([self.read_u8(address), self.read_u8(address + 1)])
  }

  pub fn write_u16(&mut self, address: usize, value: u16) {
    let [lo, hi] = value.to_le_bytes();
    self.write_u8(address, lo);
    self.write_u8(address + 1, hi);
  }

  pub fn read(&self, address: usize, wide: bool) -> u16 {
    if wide {
      self.read_u16(address)
    } else {
      self.read_u8(address) as u16
    }
  }

  pub fn write(&mut self, address: usize, value: u16, wide: bool) {
    if wide {
      self.write_u16(address, value);
    } else {
      self.write_u8(address, value as u8);
    }
  }

  /// The whole image, byte for byte.
  pub fn as_bytes(&self) -> &[u8] {
    &self.bytes
  }
}

impl Default for Memory {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for Memory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Memory").field("len", &self.bytes.len()).finish()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuState {
  pub registers: RegisterFile,
  pub flags: Flags,
  pub memory: Memory,
  pub ip: u16,
}

impl CpuState {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fresh state with `code` loaded at address 0.
  pub fn with_code(code: &[u8]) -> Self {
    let mut state = Self::new();
    state.memory.load(code);
    state
  }
}
