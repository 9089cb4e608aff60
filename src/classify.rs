use crate::encoding::{self, Kind, LengthClass, Opcode};
use crate::error::DecodeError;

/// Shape of the bytes that follow `byte0`.
pub fn classify(byte0: u8) -> Result<LengthClass, DecodeError> {
  encoding::lookup(byte0)
    .map(|encoding| encoding.class)
    .ok_or(DecodeError::UnsupportedEncoding { byte: byte0 })
}

/// Exact instruction kind. The immediate ALU family needs the second byte of
/// `chunk`; every other form is settled by the first.
pub fn resolve_kind(chunk: &[u8]) -> Result<Kind, DecodeError> {
  let Some(&byte0) = chunk.first() else {
    return Err(DecodeError::TruncatedInstruction {
      needed: 1,
      available: 0,
    });
  };
  let encoding =
    encoding::lookup(byte0).ok_or(DecodeError::UnsupportedEncoding { byte: byte0 })?;
  match encoding.opcode {
    Opcode::Fixed(kind) => Ok(kind),
    Opcode::ImmediateAlu => {
      let Some(&mod_rm) = chunk.get(1) else {
        return Err(DecodeError::TruncatedInstruction {
          needed: 2,
          available: chunk.len(),
        });
      };
      let sub_opcode = (mod_rm >> 3) & 0b111;
      encoding::immediate_alu_kind(sub_opcode)
        .ok_or(DecodeError::UnsupportedEncoding { byte: mod_rm })
    }
  }
}
