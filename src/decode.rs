use std::fmt;

use crate::classify::classify;
use crate::encoding::{immediate_alu_kind, Kind};
use crate::error::DecodeError;
use crate::length::{additional_length, displacement_len};

/// The eight 16-bit registers, in register-field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
  Ax,
  Cx,
  Dx,
  Bx,
  Sp,
  Bp,
  Si,
  Di,
}

impl Reg {
  pub const ALL: [Reg; 8] = [
    Reg::Ax,
    Reg::Cx,
    Reg::Dx,
    Reg::Bx,
    Reg::Sp,
    Reg::Bp,
    Reg::Si,
    Reg::Di,
  ];

  pub fn from_field(field: u8) -> Reg {
    Reg::ALL[(field & 0b111) as usize]
  }

  pub fn index(self) -> usize {
    self as usize
  }

  pub fn name(self) -> &'static str {
    match self {
      Reg::Ax => "ax",
      Reg::Cx => "cx",
      Reg::Dx => "dx",
      Reg::Bx => "bx",
      Reg::Sp => "sp",
      Reg::Bp => "bp",
      Reg::Si => "si",
      Reg::Di => "di",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
  Es,
  Cs,
  Ss,
  Ds,
}

impl Segment {
  pub const ALL: [Segment; 4] = [Segment::Es, Segment::Cs, Segment::Ss, Segment::Ds];

  pub fn index(self) -> usize {
    self as usize
  }

  pub fn name(self) -> &'static str {
    match self {
      Segment::Es => "es",
      Segment::Cs => "cs",
      Segment::Ss => "ss",
      Segment::Ds => "ds",
    }
  }
}

/// A register operand: a full word register, one byte of ax/bx/cx/dx, or a
/// segment register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
  Word(Reg),
  Low(Reg),
  High(Reg),
  Segment(Segment),
}

impl Register {
  pub fn from_field(field: u8, w_bit_set: bool) -> Register {
    use Register::*;
    match (field & 0b111, w_bit_set) {
      (0b_000, false) => Low(Reg::Ax),
      (0b_001, false) => Low(Reg::Cx),
      (0b_010, false) => Low(Reg::Dx),
      (0b_011, false) => Low(Reg::Bx),
      (0b_100, false) => High(Reg::Ax),
      (0b_101, false) => High(Reg::Cx),
      (0b_110, false) => High(Reg::Dx),
      (0b_111, false) => High(Reg::Bx),
      (field, true) => Word(Reg::from_field(field)),
      _ => unreachable!(),
    }
  }

  pub fn accumulator(w_bit_set: bool) -> Register {
    Register::from_field(0b000, w_bit_set)
  }

  pub fn is_wide(self) -> bool {
    matches!(self, Register::Word(_) | Register::Segment(_))
  }

  /// The 16-bit register that holds this one.
  pub fn parent(self) -> Register {
    match self {
      Register::Low(reg) | Register::High(reg) => Register::Word(reg),
      register => register,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Register::Word(reg) => reg.name(),
      Register::Low(Reg::Ax) => "al",
      Register::Low(Reg::Cx) => "cl",
      Register::Low(Reg::Dx) => "dl",
      Register::Low(Reg::Bx) => "bl",
      Register::High(Reg::Ax) => "ah",
      Register::High(Reg::Cx) => "ch",
      Register::High(Reg::Dx) => "dh",
      Register::High(Reg::Bx) => "bh",
      Register::Low(reg) | Register::High(reg) => reg.name(),
      Register::Segment(segment) => segment.name(),
    }
  }
}

impl fmt::Display for Register {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Base/index combination selected by the r/m field of a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Base {
  BxSi,
  BxDi,
  BpSi,
  BpDi,
  Si,
  Di,
  Bp,
  Bx,
}

impl Base {
  pub fn from_field(rm: u8) -> Base {
    match rm & 0b111 {
      0b000 => Base::BxSi,
      0b001 => Base::BxDi,
      0b010 => Base::BpSi,
      0b011 => Base::BpDi,
      0b100 => Base::Si,
      0b101 => Base::Di,
      0b110 => Base::Bp,
      _ => Base::Bx,
    }
  }

  /// Base register and optional index register.
  pub fn registers(self) -> (Reg, Option<Reg>) {
    match self {
      Base::BxSi => (Reg::Bx, Some(Reg::Si)),
      Base::BxDi => (Reg::Bx, Some(Reg::Di)),
      Base::BpSi => (Reg::Bp, Some(Reg::Si)),
      Base::BpDi => (Reg::Bp, Some(Reg::Di)),
      Base::Si => (Reg::Si, None),
      Base::Di => (Reg::Di, None),
      Base::Bp => (Reg::Bp, None),
      Base::Bx => (Reg::Bx, None),
    }
  }
}

impl fmt::Display for Base {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.registers() {
      (base, Some(index)) => write!(f, "{} + {}", base.name(), index.name()),
      (base, None) => f.write_str(base.name()),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
  Direct(u16),
  Based { base: Base, displacement: i16 },
}

impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      Address::Direct(address) => write!(f, "[{address}]"),
      Address::Based {
        base,
        displacement: 0,
      } => write!(f, "[{base}]"),
      Address::Based { base, displacement } if displacement < 0 => {
        write!(f, "[{base} - {}]", displacement.unsigned_abs())
      }
      Address::Based { base, displacement } => write!(f, "[{base} + {displacement}]"),
    }
  }
}

/// Immediate operand. `value` is already sign-extended to the operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Immediate {
  pub value: u16,
  pub wide: bool,
}

impl Immediate {
  pub fn signed(self) -> i16 {
    if self.wide {
      self.value as i16
    } else {
      self.value as u8 as i8 as i16
    }
  }
}

impl fmt::Display for Immediate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.signed())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
  Register(Register),
  Memory(Address),
  Immediate(Immediate),
  /// Branch offset relative to the end of the branch instruction.
  Relative(i8),
}

impl fmt::Display for Operand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Operand::Register(register) => fmt::Display::fmt(register, f),
      Operand::Memory(address) => fmt::Display::fmt(address, f),
      Operand::Immediate(immediate) => fmt::Display::fmt(immediate, f),
      Operand::Relative(offset) => write!(f, "{offset}"),
    }
  }
}

/// Bit fields of the opcode and mod-reg-rm bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fields {
  pub d_bit_set: bool,
  pub w_bit_set: bool,
  pub s_bit_set: bool,
  pub mode: u8,
  pub reg: u8,
  pub rm: u8,
}

impl Fields {
  pub fn new(b1: u8, b2: u8) -> Fields {
    Fields {
      d_bit_set: (b1 >> 1) & 1 == 1,
      w_bit_set: b1 & 1 == 1,
      s_bit_set: (b1 >> 1) & 1 == 1,
      mode: b2 >> 6,
      reg: (b2 >> 3) & 0b111,
      rm: b2 & 0b111,
    }
  }

  /// The `reg` field doubles as the sub-opcode in the immediate ALU family.
  pub fn sub_opcode(&self) -> u8 {
    self.reg
  }
}

/// One fully decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
  pub kind: Kind,
  /// Total encoded length in bytes.
  pub len: usize,
  /// Operand width: 16 bits when set, 8 bits otherwise.
  pub wide: bool,
  pub dst: Operand,
  pub src: Option<Operand>,
  /// Spell out `byte`/`word` before an immediate stored to memory.
  pub size_hint: bool,
}

impl Instruction {
  pub fn mnemonic(&self) -> &'static str {
    self.kind.mnemonic()
  }

  pub fn operand_text(&self) -> String {
    match self.src {
      None => self.dst.to_string(),
      Some(src) if self.size_hint => {
        let size = if self.wide { "word" } else { "byte" };
        format!("{}, {size} {src}", self.dst)
      }
      Some(src) => format!("{}, {src}", self.dst),
    }
  }
}

impl fmt::Display for Instruction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.mnemonic(), self.operand_text())
  }
}

struct Chunk<'a>(&'a [u8]);

impl Chunk<'_> {
  fn byte(&self, at: usize) -> Result<u8, DecodeError> {
    self.0.get(at).copied().ok_or(DecodeError::TruncatedInstruction {
      needed: at + 1,
      available: self.0.len(),
    })
  }

  fn word(&self, at: usize) -> Result<u16, DecodeError> {
    let lo = self.byte(at)?;
    let hi = self.byte(at + 1)?;
    Ok(u16::from_le_bytes([lo, hi]))
  }

  fn immediate(&self, at: usize, wide: bool, sign_extend: bool) -> Result<Immediate, DecodeError> {
    let value = match (wide, sign_extend) {
      (true, false) => self.word(at)?,
      (true, true) => self.byte(at)? as i8 as u16,
      (false, _) => self.byte(at)? as u16,
    };
    Ok(Immediate { value, wide })
  }

  /// Operand named by the mode and r/m fields; displacement starts at byte 2.
  fn reg_or_mem(&self, fields: Fields) -> Result<Operand, DecodeError> {
    let operand = match (fields.mode, fields.rm) {
      (0b11, rm) => Operand::Register(Register::from_field(rm, fields.w_bit_set)),
      (0b00, 0b110) => Operand::Memory(Address::Direct(self.word(2)?)),
      (0b00, rm) => Operand::Memory(Address::Based {
        base: Base::from_field(rm),
        displacement: 0,
      }),
      (0b01, rm) => Operand::Memory(Address::Based {
        base: Base::from_field(rm),
        displacement: self.byte(2)? as i8 as i16,
      }),
      (_, rm) => Operand::Memory(Address::Based {
        base: Base::from_field(rm),
        displacement: self.word(2)? as i16,
      }),
    };
    Ok(operand)
  }
}

/// Decode the instruction of kind `kind` at the start of `chunk`.
pub fn decode(chunk: &[u8], kind: Kind) -> Result<Instruction, DecodeError> {
  use Kind::*;
  let b1 = Chunk(chunk).byte(0)?;
  let len = 1 + additional_length(classify(b1)?, chunk)?;
  if chunk.len() < len {
    return Err(DecodeError::TruncatedInstruction {
      needed: len,
      available: chunk.len(),
    });
  }
  let bytes = Chunk(&chunk[..len]);

  let mut size_hint = false;
  let (wide, dst, src) = match kind {
    Mov | Add | Sub | Cmp => {
      let fields = Fields::new(b1, bytes.byte(1)?);
      let reg = Operand::Register(Register::from_field(fields.reg, fields.w_bit_set));
      let rm = bytes.reg_or_mem(fields)?;
      if fields.d_bit_set {
        (fields.w_bit_set, reg, rm)
      } else {
        (fields.w_bit_set, rm, reg)
      }
    }
    MovToSeg | MovFromSeg => {
      let b2 = bytes.byte(1)?;
      let fields = Fields {
        w_bit_set: true,
        ..Fields::new(b1, b2)
      };
      if fields.reg & 0b100 != 0 {
        return Err(DecodeError::InvalidOperandCombination {
          byte: b2,
          reason: "segment register field must be 0-3",
        });
      }
      let segment = Operand::Register(Register::Segment(Segment::ALL[fields.reg as usize]));
      let rm = bytes.reg_or_mem(fields)?;
      if kind == MovToSeg {
        (true, segment, rm)
      } else {
        (true, rm, segment)
      }
    }
    MovImmReg => {
      let w_bit_set = (b1 >> 3) & 1 == 1;
      let dst = Register::from_field(b1 & 0b111, w_bit_set);
      let imm = bytes.immediate(1, w_bit_set, false)?;
      (w_bit_set, Operand::Register(dst), Operand::Immediate(imm))
    }
    MovImmMem | AddImm | SubImm | CmpImm => {
      let b2 = bytes.byte(1)?;
      let fields = Fields::new(b1, b2);
      if kind != MovImmMem && immediate_alu_kind(fields.sub_opcode()) != Some(kind) {
        return Err(DecodeError::InvalidOperandCombination {
          byte: b2,
          reason: "sub-opcode does not match instruction kind",
        });
      }
      let sign_extend = kind != MovImmMem && fields.s_bit_set;
      let dst = bytes.reg_or_mem(fields)?;
      let imm = bytes.immediate(2 + displacement_len(b2), fields.w_bit_set, sign_extend)?;
      size_hint = matches!(dst, Operand::Memory(_));
      (fields.w_bit_set, dst, Operand::Immediate(imm))
    }
    AddAcc | SubAcc | CmpAcc => {
      let w_bit_set = b1 & 1 == 1;
      let imm = bytes.immediate(1, w_bit_set, false)?;
      (
        w_bit_set,
        Operand::Register(Register::accumulator(w_bit_set)),
        Operand::Immediate(imm),
      )
    }
    MovMemAcc | MovAccMem => {
      let w_bit_set = b1 & 1 == 1;
      let acc = Operand::Register(Register::accumulator(w_bit_set));
      let mem = Operand::Memory(Address::Direct(bytes.word(1)?));
      if kind == MovMemAcc {
        (w_bit_set, acc, mem)
      } else {
        (w_bit_set, mem, acc)
      }
    }
    Je | Jl | Jle | Jb | Jbe | Jp | Jo | Js | Jne | Jnl | Jnle | Jnb | Jnbe | Jnp | Jno | Jns
    | Loop | Loopz | Loopnz | Jcxz => {
      let offset = bytes.byte(1)? as i8;
      return Ok(Instruction {
        kind,
        len,
        wide: false,
        dst: Operand::Relative(offset),
        src: None,
        size_hint: false,
      });
    }
  };

  Ok(Instruction {
    kind,
    len,
    wide,
    dst,
    src: Some(src),
    size_hint,
  })
}

/// Operand text of the instruction at the start of `chunk`.
pub fn render(chunk: &[u8], kind: Kind) -> Result<String, DecodeError> {
  decode(chunk, kind).map(|instruction| instruction.operand_text())
}
