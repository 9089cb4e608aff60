use crate::encoding::LengthClass;
use crate::error::DecodeError;

const MOD_REGISTER: u8 = 0b11;
const MOD_NO_DISP: u8 = 0b00;
const MOD_DISP8: u8 = 0b01;
const RM_DIRECT: u8 = 0b110;

/// Displacement bytes implied by a mod-reg-rm byte.
pub fn displacement_len(mod_rm: u8) -> usize {
  let mode = mod_rm >> 6;
  let rm = mod_rm & 0b111;
  match mode {
    MOD_REGISTER => 0,
    MOD_NO_DISP if rm == RM_DIRECT => 2,
    MOD_NO_DISP => 0,
    MOD_DISP8 => 1,
    _ => 2,
  }
}

/// Immediate bytes carried by an ALU/MOV immediate-to-register/memory form.
pub fn immediate_len(byte0: u8, sign_extends: bool) -> usize {
  let w_bit_set = byte0 & 1 == 1;
  let s_bit_set = sign_extends && (byte0 >> 1) & 1 == 1;
  if !w_bit_set || s_bit_set {
    1
  } else {
    2
  }
}

/// Bytes still to fetch after the opcode byte. `first_bytes` holds the
/// opcode and, for classes with a mod-reg-rm byte, that byte as well.
pub fn additional_length(class: LengthClass, first_bytes: &[u8]) -> Result<usize, DecodeError> {
  let needed = if class.has_mod_rm() { 2 } else { 1 };
  if first_bytes.len() < needed {
    return Err(DecodeError::TruncatedInstruction {
      needed,
      available: first_bytes.len(),
    });
  }
  let byte0 = first_bytes[0];
  let extra = match class {
    LengthClass::RegMem => 1 + displacement_len(first_bytes[1]),
    LengthClass::ImmMem => {
      // only the 100000sw family has an s bit; 1100011w does not
      let sign_extends = byte0 >> 2 == 0b100000;
      1 + displacement_len(first_bytes[1]) + immediate_len(byte0, sign_extends)
    }
    LengthClass::ImmReg => {
      if (byte0 >> 3) & 1 == 1 {
        2
      } else {
        1
      }
    }
    LengthClass::AccImm => immediate_len(byte0, false),
    LengthClass::MemAcc => 2,
    LengthClass::ShortJump => 1,
  };
  Ok(extra)
}
