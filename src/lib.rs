//! Decoder and simulator for a subset of the 8086 instruction set: MOV,
//! ADD/SUB/CMP, conditional short jumps and the loop family.

pub mod classify;
pub mod decode;
pub mod encoding;
pub mod error;
pub mod fetch;
pub mod length;
pub mod sim;
pub mod state;

pub use decode::{Instruction, Operand, Reg, Register, Segment};
pub use encoding::{Kind, LengthClass};
pub use error::{DecodeError, Error};
pub use fetch::{disassemble, Decoder};
pub use sim::{execute, Change, Simulator, Step};
pub use state::{CpuState, Flags, Memory, RegisterFile};
