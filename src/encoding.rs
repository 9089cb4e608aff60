//! Static opcode table: which leading bits of the first byte select which
//! instruction, and how each instruction is spelled.

/// Every instruction form the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
  Mov,
  MovImmReg,
  MovImmMem,
  MovMemAcc,
  MovAccMem,
  MovToSeg,
  MovFromSeg,
  Add,
  AddImm,
  AddAcc,
  Sub,
  SubImm,
  SubAcc,
  Cmp,
  CmpImm,
  CmpAcc,
  Je,
  Jl,
  Jle,
  Jb,
  Jbe,
  Jp,
  Jo,
  Js,
  Jne,
  Jnl,
  Jnle,
  Jnb,
  Jnbe,
  Jnp,
  Jno,
  Jns,
  Loop,
  Loopz,
  Loopnz,
  Jcxz,
}

impl Kind {
  pub fn mnemonic(self) -> &'static str {
    use Kind::*;
    match self {
      Mov | MovImmReg | MovImmMem | MovMemAcc | MovAccMem | MovToSeg | MovFromSeg => "mov",
      Add | AddImm | AddAcc => "add",
      Sub | SubImm | SubAcc => "sub",
      Cmp | CmpImm | CmpAcc => "cmp",
      Je => "je",
      Jl => "jl",
      Jle => "jle",
      Jb => "jb",
      Jbe => "jbe",
      Jp => "jp",
      Jo => "jo",
      Js => "js",
      Jne => "jne",
      Jnl => "jnl",
      Jnle => "jnle",
      Jnb => "jnb",
      Jnbe => "jnbe",
      Jnp => "jnp",
      Jno => "jno",
      Jns => "jns",
      Loop => "loop",
      Loopz => "loopz",
      Loopnz => "loopnz",
      Jcxz => "jcxz",
    }
  }

  pub fn is_branch(self) -> bool {
    use Kind::*;
    matches!(
      self,
      Je | Jl
        | Jle
        | Jb
        | Jbe
        | Jp
        | Jo
        | Js
        | Jne
        | Jnl
        | Jnle
        | Jnb
        | Jnbe
        | Jnp
        | Jno
        | Jns
        | Loop
        | Loopz
        | Loopnz
        | Jcxz
    )
  }
}

/// The shape of the bytes that follow the opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthClass {
  /// mod-reg-rm byte plus 0/1/2 displacement bytes.
  RegMem,
  /// 1 or 2 immediate bytes, width bit at bit 3 of the opcode.
  ImmReg,
  /// mod-reg-rm, displacement, then 1 or 2 immediate bytes.
  ImmMem,
  /// 1 or 2 immediate bytes, width bit at bit 0 of the opcode.
  AccImm,
  /// Fixed 2-byte direct address.
  MemAcc,
  /// Fixed 1-byte signed offset.
  ShortJump,
}

impl LengthClass {
  pub fn has_mod_rm(self) -> bool {
    matches!(self, LengthClass::RegMem | LengthClass::ImmMem)
  }
}

/// What a prefix match tells us about the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
  /// The first byte alone identifies the instruction.
  Fixed(Kind),
  /// `100000sw`: ADD/SUB/CMP selected by bits 5-3 of the mod-reg-rm byte.
  ImmediateAlu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
  pub prefix: u8,
  pub bits: u8,
  pub opcode: Opcode,
  pub class: LengthClass,
}

impl Encoding {
  const fn new(prefix: u8, bits: u8, opcode: Opcode, class: LengthClass) -> Self {
    Encoding {
      prefix,
      bits,
      opcode,
      class,
    }
  }

  pub fn matches(&self, byte: u8) -> bool {
    byte >> (8 - self.bits) == self.prefix
  }
}

use LengthClass::*;
use Opcode::*;

/// Ordered most-specific first: a longer prefix is always tested before any
/// shorter prefix it could be confused with.
pub const ENCODINGS: &[Encoding] = &[
  Encoding::new(0b10001110, 8, Fixed(Kind::MovToSeg), RegMem),
  Encoding::new(0b10001100, 8, Fixed(Kind::MovFromSeg), RegMem),
  Encoding::new(0b01110100, 8, Fixed(Kind::Je), ShortJump),
  Encoding::new(0b01111100, 8, Fixed(Kind::Jl), ShortJump),
  Encoding::new(0b01111110, 8, Fixed(Kind::Jle), ShortJump),
  Encoding::new(0b01110010, 8, Fixed(Kind::Jb), ShortJump),
  Encoding::new(0b01110110, 8, Fixed(Kind::Jbe), ShortJump),
  Encoding::new(0b01111010, 8, Fixed(Kind::Jp), ShortJump),
  Encoding::new(0b01110000, 8, Fixed(Kind::Jo), ShortJump),
  Encoding::new(0b01111000, 8, Fixed(Kind::Js), ShortJump),
  Encoding::new(0b01110101, 8, Fixed(Kind::Jne), ShortJump),
  Encoding::new(0b01111101, 8, Fixed(Kind::Jnl), ShortJump),
  Encoding::new(0b01111111, 8, Fixed(Kind::Jnle), ShortJump),
  Encoding::new(0b01110011, 8, Fixed(Kind::Jnb), ShortJump),
  Encoding::new(0b01110111, 8, Fixed(Kind::Jnbe), ShortJump),
  Encoding::new(0b01111011, 8, Fixed(Kind::Jnp), ShortJump),
  Encoding::new(0b01110001, 8, Fixed(Kind::Jno), ShortJump),
  Encoding::new(0b01111001, 8, Fixed(Kind::Jns), ShortJump),
  Encoding::new(0b11100010, 8, Fixed(Kind::Loop), ShortJump),
  Encoding::new(0b11100001, 8, Fixed(Kind::Loopz), ShortJump),
  Encoding::new(0b11100000, 8, Fixed(Kind::Loopnz), ShortJump),
  Encoding::new(0b11100011, 8, Fixed(Kind::Jcxz), ShortJump),
  Encoding::new(0b_1100011, 7, Fixed(Kind::MovImmMem), ImmMem),
  Encoding::new(0b_1010000, 7, Fixed(Kind::MovMemAcc), MemAcc),
  Encoding::new(0b_1010001, 7, Fixed(Kind::MovAccMem), MemAcc),
  Encoding::new(0b_0000010, 7, Fixed(Kind::AddAcc), AccImm),
  Encoding::new(0b_0010110, 7, Fixed(Kind::SubAcc), AccImm),
  Encoding::new(0b_0011110, 7, Fixed(Kind::CmpAcc), AccImm),
  Encoding::new(0b__100010, 6, Fixed(Kind::Mov), RegMem),
  Encoding::new(0b__000000, 6, Fixed(Kind::Add), RegMem),
  Encoding::new(0b__001010, 6, Fixed(Kind::Sub), RegMem),
  Encoding::new(0b__001110, 6, Fixed(Kind::Cmp), RegMem),
  Encoding::new(0b__100000, 6, ImmediateAlu, ImmMem),
  Encoding::new(0b____1011, 4, Fixed(Kind::MovImmReg), ImmReg),
];

/// First table entry whose prefix matches `byte`.
pub fn lookup(byte: u8) -> Option<&'static Encoding> {
  ENCODINGS.iter().find(|encoding| encoding.matches(byte))
}

/// Sub-opcode (bits 5-3 of the mod-reg-rm byte) of the immediate ALU family.
pub fn immediate_alu_kind(sub_opcode: u8) -> Option<Kind> {
  match sub_opcode {
    0b000 => Some(Kind::AddImm),
    0b101 => Some(Kind::SubImm),
    0b111 => Some(Kind::CmpImm),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn test_table_is_ordered_most_specific_first() {
    for pair in ENCODINGS.windows(2) {
      assert!(pair[0].bits >= pair[1].bits, "{:?} before {:?}", pair[0], pair[1]);
    }
  }

  #[test]
  fn test_no_two_entries_of_equal_length_collide() {
    for byte in 0..=u8::MAX {
      let hits: Vec<_> = ENCODINGS.iter().filter(|e| e.matches(byte)).collect();
      for pair in hits.windows(2) {
        assert!(pair[0].bits != pair[1].bits, "{byte:08b} hits {hits:?}");
      }
    }
  }

  #[test]
  fn test_lookup() {
    assert_eq!(lookup(0x89).map(|e| e.opcode), Some(Fixed(Kind::Mov)));
    assert_eq!(lookup(0x8E).map(|e| e.opcode), Some(Fixed(Kind::MovToSeg)));
    assert_eq!(lookup(0x05).map(|e| e.opcode), Some(Fixed(Kind::AddAcc)));
    assert_eq!(lookup(0x03).map(|e| e.opcode), Some(Fixed(Kind::Add)));
    assert_eq!(lookup(0x83).map(|e| e.opcode), Some(ImmediateAlu));
    assert_eq!(lookup(0xBF).map(|e| e.opcode), Some(Fixed(Kind::MovImmReg)));
    assert_eq!(lookup(0xE3).map(|e| e.opcode), Some(Fixed(Kind::Jcxz)));
    assert_eq!(lookup(0xF4), None);
    assert_eq!(lookup(0x90), None);
  }

  #[test]
  fn test_mnemonics() {
    assert_eq!(Kind::MovFromSeg.mnemonic(), "mov");
    assert_eq!(Kind::SubAcc.mnemonic(), "sub");
    assert_eq!(Kind::CmpImm.mnemonic(), "cmp");
    assert_eq!(Kind::Jnbe.mnemonic(), "jnbe");
    assert_eq!(Kind::Loopnz.mnemonic(), "loopnz");
  }

  #[test]
  fn test_immediate_alu_sub_opcodes() {
    assert_eq!(immediate_alu_kind(0b000), Some(Kind::AddImm));
    assert_eq!(immediate_alu_kind(0b101), Some(Kind::SubImm));
    assert_eq!(immediate_alu_kind(0b111), Some(Kind::CmpImm));
    assert_eq!(immediate_alu_kind(0b001), None);
  }
}
