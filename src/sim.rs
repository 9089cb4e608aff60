use std::fmt;

use log::{debug, warn};

use crate::decode::{Instruction, Operand, Register};
use crate::encoding::Kind;
use crate::error::Result;
use crate::fetch::Decoder;
use crate::state::{CpuState, Flags};

/// One observable effect of executing an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
  /// Byte registers are reported through their 16-bit parent.
  Register { register: Register, old: u16, new: u16 },
  Ip { old: u16, new: u16 },
  Flags { old: Flags, new: Flags },
}

impl fmt::Display for Change {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Change::Register { register, old, new } => write!(f, "{register}:{old:#x}->{new:#x}"),
      Change::Ip { old, new } => write!(f, "ip:{old:#x}->{new:#x}"),
      Change::Flags { old, new } => write!(f, "flags:{old}->{new}"),
    }
  }
}

/// An executed instruction and what it changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
  /// Address the instruction was fetched from.
  pub ip: usize,
  pub instruction: Instruction,
  pub changes: Vec<Change>,
}

impl Step {
  /// ` ; ax:0x0->0x1 ip:0x0->0x3`, or empty when nothing changed.
  pub fn annotation(&self) -> String {
    if self.changes.is_empty() {
      return String::new();
    }
    let parts: Vec<_> = self.changes.iter().map(|change| change.to_string()).collect();
    format!(" ; {}", parts.join(" "))
  }
}

impl fmt::Display for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}", self.instruction, self.annotation())
  }
}

fn read(state: &CpuState, operand: Operand, wide: bool) -> u16 {
  match operand {
    Operand::Register(register) => state.registers.read(register),
    Operand::Memory(address) => {
      let address = state.registers.effective_address(address);
      state.memory.read(address as usize, wide)
    }
    Operand::Immediate(immediate) => immediate.value,
    // branch offsets are never sources
    Operand::Relative(_) => 0,
  }
}

fn write(state: &mut CpuState, operand: Operand, value: u16, wide: bool) -> Option<Change> {
  match operand {
    Operand::Register(register) => {
      let parent = register.parent();
      let old = state.registers.read(parent);
      state.registers.write(register, value);
      let new = state.registers.read(parent);
      (old != new).then_some(Change::Register {
        register: parent,
        old,
        new,
      })
    }
    Operand::Memory(address) => {
      let address = state.registers.effective_address(address);
      state.memory.write(address as usize, value, wide);
      None
    }
    // decode never produces these as destinations
    Operand::Immediate(_) | Operand::Relative(_) => None,
  }
}

enum Arithmetic {
  Add,
  Sub,
  Cmp,
}

fn arithmetic(kind: Kind) -> Option<Arithmetic> {
  use Kind::*;
  match kind {
    Add | AddImm | AddAcc => Some(Arithmetic::Add),
    Sub | SubImm | SubAcc => Some(Arithmetic::Sub),
    Cmp | CmpImm | CmpAcc => Some(Arithmetic::Cmp),
    _ => None,
  }
}

/// Whether a conditional branch is taken. `None` for branches whose
/// condition depends on flags this machine does not track.
fn branch_taken(kind: Kind, flags: Flags) -> Option<bool> {
  match kind {
    Kind::Je => Some(flags.contains(Flags::ZERO)),
    Kind::Jne => Some(!flags.contains(Flags::ZERO)),
    Kind::Js => Some(flags.contains(Flags::SIGN)),
    Kind::Jns => Some(!flags.contains(Flags::SIGN)),
    _ => None,
  }
}

/// Offset added after the branch when `instruction` is a taken branch.
fn taken_offset(instruction: &Instruction, flags: Flags) -> Option<i8> {
  match instruction.dst {
    Operand::Relative(offset) if instruction.src.is_none() => {
      branch_taken(instruction.kind, flags)
        .unwrap_or(false)
        .then_some(offset)
    }
    _ => None,
  }
}

/// Apply `instruction` to `state`, with `state.ip` pointing at it.
pub fn execute(state: &mut CpuState, instruction: &Instruction) -> Vec<Change> {
  let old_ip = state.ip;
  let old_flags = state.flags;
  state.ip = old_ip.wrapping_add(instruction.len as u16);

  let mut changes = Vec::new();
  let wide = instruction.wide;
  let dst = instruction.dst;

  if let Some(src) = instruction.src {
    let value = read(state, src, wide);
    let mask = if wide { 0xFFFF } else { 0x00FF };
    let result = match arithmetic(instruction.kind) {
      None => Some(value),
      Some(op) => {
        let lhs = read(state, dst, wide);
        let raw = match op {
          Arithmetic::Add => lhs.wrapping_add(value),
          Arithmetic::Sub | Arithmetic::Cmp => lhs.wrapping_sub(value),
        };
        let result = raw & mask;
        state.flags = Flags::from_result(result, wide);
        match op {
          Arithmetic::Cmp => None,
          _ => Some(result),
        }
      }
    };
    if let Some(change) = result.and_then(|result| write(state, dst, result, wide)) {
      changes.push(change);
    }
  } else if let Operand::Relative(offset) = dst {
    match branch_taken(instruction.kind, state.flags) {
      Some(true) => {
        state.ip = state.ip.wrapping_add(offset as i16 as u16);
        debug!("{old_ip:#06x}: {} taken to {:#06x}", instruction.mnemonic(), state.ip);
      }
      Some(false) => debug!("{old_ip:#06x}: {} not taken", instruction.mnemonic()),
      None => debug!("{old_ip:#06x}: {} not simulated", instruction.mnemonic()),
    }
  }

  if state.ip != old_ip {
    changes.push(Change::Ip {
      old: old_ip,
      new: state.ip,
    });
  }
  if state.flags != old_flags {
    changes.push(Change::Flags {
      old: old_flags,
      new: state.flags,
    });
  }
  changes
}

/// Fetch-decode-execute loop over a code image. The fetch position is kept
/// unwrapped; `state.ip` holds its low 16 bits.
#[derive(Debug)]
pub struct Simulator<'a> {
  decoder: Decoder<'a>,
  state: CpuState,
  ip: usize,
  step_limit: Option<usize>,
  steps: usize,
}

impl<'a> Simulator<'a> {
  /// Zeroed machine with `code` loaded into memory at address 0.
  pub fn new(code: &'a [u8]) -> Self {
    Simulator::with_state(code, CpuState::with_code(code))
  }

  pub fn with_state(code: &'a [u8], state: CpuState) -> Self {
    Simulator {
      decoder: Decoder::new(code),
      ip: state.ip as usize,
      state,
      step_limit: None,
      steps: 0,
    }
  }

  /// Stop `run` after `limit` instructions.
  pub fn with_step_limit(mut self, limit: usize) -> Self {
    self.step_limit = Some(limit);
    self
  }

  pub fn state(&self) -> &CpuState {
    &self.state
  }

  pub fn state_mut(&mut self) -> &mut CpuState {
    &mut self.state
  }

  pub fn into_state(self) -> CpuState {
    self.state
  }

  pub fn steps(&self) -> usize {
    self.steps
  }

  /// Offset of the next instruction in the code image.
  pub fn ip(&self) -> usize {
    self.ip
  }

  /// Execute the instruction at `ip`. `None` once `ip` has run off the code.
  pub fn step(&mut self) -> Result<Option<Step>> {
    let ip = self.ip;
    let Some(instruction) = self.decoder.fetch(ip)? else {
      return Ok(None);
    };
    self.state.ip = ip as u16;
    let offset = taken_offset(&instruction, self.state.flags);
    let changes = execute(&mut self.state, &instruction);
    let next = ip + instruction.len;
    self.ip = match offset {
      // a target before the start of the code ends the run like one past its end
      Some(offset) => next.checked_add_signed(offset as isize).unwrap_or(usize::MAX),
      None => next,
    };
    self.steps += 1;
    Ok(Some(Step {
      ip,
      instruction,
      changes,
    }))
  }

  /// Step until the code is exhausted or the step limit is hit.
  pub fn run(&mut self) -> Result<Vec<Step>> {
    let mut steps = Vec::new();
    loop {
      if let Some(limit) = self.step_limit {
        if self.steps >= limit {
          warn!("stopped after {limit} steps at ip {:#06x}", self.ip);
          break;
        }
      }
      match self.step()? {
        Some(step) => steps.push(step),
        None => break,
      }
    }
    debug!("simulated {} instructions", self.steps);
    Ok(steps)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::decode::{Reg, Segment};
  use crate::error::{DecodeError, Error};
  use indoc::indoc as asm;
  use pretty_assertions::assert_eq;

  fn trace(code: &[u8]) -> (String, CpuState) {
    let mut sim = Simulator::new(code);
    let steps = sim.run().unwrap();
    let lines: Vec<_> = steps.iter().map(|step| format!("{step}\n")).collect();
    (lines.concat(), sim.into_state())
  }

  #[test]
  fn test_mov_then_arithmetic() {
    let (text, state) = trace(&[
      0xB8, 0x05, 0x00, // mov ax, 5
      0x83, 0xC0, 0x0A, // add ax, 10
      0x83, 0xF8, 0x0F, // cmp ax, 15
    ]);
    assert_eq!(
      text,
      asm! {"
        mov ax, 5 ; ax:0x0->0x5 ip:0x0->0x3
        add ax, 10 ; ax:0x5->0xf ip:0x3->0x6
        cmp ax, 15 ; ip:0x6->0x9 flags:->Z
      "}
    );
    assert_eq!(state.registers.get(Reg::Ax), 15);
    assert_eq!(state.flags, Flags::ZERO);
    assert!(!state.flags.contains(Flags::SIGN));
  }

  #[test]
  fn test_loop_with_jne() {
    let (text, state) = trace(&[
      0xB9, 0x03, 0x00, // mov cx, 3
      0xBB, 0xE8, 0x03, // mov bx, 1000
      0x83, 0xC3, 0x0A, // add bx, 10
      0x83, 0xE9, 0x01, // sub cx, 1
      0x75, 0xF8, // jne -8
    ]);
    assert_eq!(
      text,
      asm! {"
        mov cx, 3 ; cx:0x0->0x3 ip:0x0->0x3
        mov bx, 1000 ; bx:0x0->0x3e8 ip:0x3->0x6
        add bx, 10 ; bx:0x3e8->0x3f2 ip:0x6->0x9
        sub cx, 1 ; cx:0x3->0x2 ip:0x9->0xc
        jne -8 ; ip:0xc->0x6
        add bx, 10 ; bx:0x3f2->0x3fc ip:0x6->0x9
        sub cx, 1 ; cx:0x2->0x1 ip:0x9->0xc
        jne -8 ; ip:0xc->0x6
        add bx, 10 ; bx:0x3fc->0x406 ip:0x6->0x9
        sub cx, 1 ; cx:0x1->0x0 ip:0x9->0xc flags:->Z
        jne -8 ; ip:0xc->0xe
      "}
    );
    assert_eq!(state.registers.get(Reg::Bx), 1030);
    assert_eq!(state.registers.get(Reg::Cx), 0);
    assert_eq!(state.ip, 14);
  }

  #[test]
  fn test_memory_operands() {
    let (text, state) = trace(&[
      0xC7, 0x06, 0xE8, 0x03, 0x01, 0x00, // mov [1000], word 1
      0xBB, 0xE8, 0x03, // mov bx, 1000
      0x83, 0x07, 0x05, // add [bx], word 5
      0x8B, 0x07, // mov ax, [bx]
      0xC6, 0x47, 0x02, 0xFF, // mov [bx + 2], byte -1
      0x8A, 0x4F, 0x02, // mov cl, [bx + 2]
    ]);
    assert_eq!(
      text,
      asm! {"
        mov [1000], word 1 ; ip:0x0->0x6
        mov bx, 1000 ; bx:0x0->0x3e8 ip:0x6->0x9
        add [bx], word 5 ; ip:0x9->0xc
        mov ax, [bx] ; ax:0x0->0x6 ip:0xc->0xe
        mov [bx + 2], byte -1 ; ip:0xe->0x12
        mov cl, [bx + 2] ; cx:0x0->0xff ip:0x12->0x15
      "}
    );
    assert_eq!(&state.memory.as_bytes()[1000..1003], &[6, 0, 0xFF]);
  }

  #[test]
  fn test_byte_registers_and_sign_flag() {
    let (text, state) = trace(&[
      0xB8, 0x34, 0x12, // mov ax, 4660
      0xB0, 0x01, // mov al, 1
      0x2C, 0x02, // sub al, 2
      0x88, 0xC4, // mov ah, al
    ]);
    assert_eq!(
      text,
      asm! {"
        mov ax, 4660 ; ax:0x0->0x1234 ip:0x0->0x3
        mov al, 1 ; ax:0x1234->0x1201 ip:0x3->0x5
        sub al, 2 ; ax:0x1201->0x12ff ip:0x5->0x7 flags:->S
        mov ah, al ; ax:0x12ff->0xffff ip:0x7->0x9
      "}
    );
    assert_eq!(state.flags, Flags::SIGN);
  }

  #[test]
  fn test_sign_extended_immediate() {
    let (_, state) = trace(&[
      0x83, 0xC3, 0xFE, // add bx, -2
    ]);
    assert_eq!(state.registers.get(Reg::Bx), 0xFFFE);
    assert_eq!(state.flags, Flags::SIGN);
  }

  #[test]
  fn test_segment_and_accumulator_moves() {
    let (text, state) = trace(&[
      0xB8, 0x22, 0x11, // mov ax, 4386
      0x8E, 0xD0, // mov ss, ax
      0x8C, 0xD3, // mov bx, ss
      0xA3, 0xD0, 0x07, // mov [2000], ax
      0xA0, 0xD1, 0x07, // mov al, [2001]
    ]);
    assert_eq!(
      text,
      asm! {"
        mov ax, 4386 ; ax:0x0->0x1122 ip:0x0->0x3
        mov ss, ax ; ss:0x0->0x1122 ip:0x3->0x5
        mov bx, ss ; bx:0x0->0x1122 ip:0x5->0x7
        mov [2000], ax ; ip:0x7->0xa
        mov al, [2001] ; ax:0x1122->0x1111 ip:0xa->0xd
      "}
    );
    assert_eq!(state.registers.segment(Segment::Ss), 0x1122);
  }

  #[test]
  fn test_flags_clear_after_nonzero_result() {
    let (text, _) = trace(&[
      0x29, 0xC0, // sub ax, ax
      0x05, 0x01, 0x00, // add ax, 1
    ]);
    assert_eq!(
      text,
      asm! {"
        sub ax, ax ; ip:0x0->0x2 flags:->Z
        add ax, 1 ; ax:0x0->0x1 ip:0x2->0x5 flags:Z->
      "}
    );
  }

  #[test]
  fn test_unmodeled_branches_fall_through() {
    let code = [0xE2, 0xFE, 0x7C, 0xFE];
    let mut sim = Simulator::new(&code);
    sim.state_mut().registers.set(Reg::Cx, 5);
    sim.state_mut().flags = Flags::SIGN;
    let steps = sim.run().unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(sim.state().registers.get(Reg::Cx), 5);
    assert_eq!(sim.state().ip, 4);
  }

  #[test]
  fn test_js_and_jns() {
    let mut state = CpuState::new();
    state.flags = Flags::SIGN;
    let js = Decoder::new(&[0x78, 0x10]).fetch(0).unwrap().unwrap();
    execute(&mut state, &js);
    assert_eq!(state.ip, 0x12);

    let mut state = CpuState::new();
    state.flags = Flags::SIGN;
    let jns = Decoder::new(&[0x79, 0x10]).fetch(0).unwrap().unwrap();
    assert_eq!(execute(&mut state, &jns), vec![Change::Ip { old: 0, new: 2 }]);
  }

  #[test]
  fn test_je_to_itself() {
    let code = [0x74, 0xFE];
    let mut sim = Simulator::new(&code);
    sim.state_mut().flags = Flags::ZERO;
    let step = sim.step().unwrap().unwrap();
    assert_eq!(step.to_string(), "je -2");
    assert_eq!(sim.state().ip, 0);

    let steps = sim.with_step_limit(5).run().unwrap();
    assert_eq!(steps.len(), 4);
  }

  #[test]
  fn test_code_longer_than_64k_runs_to_the_end() {
    let code = [0x89, 0xD8].repeat(0x8000);
    assert_eq!(code.len(), 0x10000);
    let listing = crate::fetch::disassemble(&code).unwrap();
    assert_eq!(listing.lines().count(), 0x8000);

    let mut sim = Simulator::new(&code).with_step_limit(0x8000 + 5);
    let steps = sim.run().unwrap();
    assert_eq!(steps.len(), 0x8000);
    assert_eq!(steps.last().map(|step| step.ip), Some(0xFFFE));
    assert_eq!(sim.ip(), 0x10000);
    assert_eq!(sim.state().ip, 0);
  }

  #[test]
  fn test_branch_before_start_ends_run() {
    let code = [0x74, 0x80, 0x89, 0xD8];
    let mut sim = Simulator::new(&code);
    sim.state_mut().flags = Flags::ZERO;
    let steps = sim.run().unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(sim.ip(), usize::MAX);
  }

  #[test]
  fn test_step_limit() {
    let code = [0x74, 0xFE];
    let mut sim = Simulator::new(&code).with_step_limit(3);
    sim.state_mut().flags = Flags::ZERO;
    assert_eq!(sim.run().unwrap().len(), 3);
    assert_eq!(sim.steps(), 3);
  }

  #[test]
  fn test_decode_error_stops_simulation() {
    let code = [0xB8, 0x01, 0x00, 0xF4];
    let mut sim = Simulator::new(&code);
    assert_eq!(
      sim.run(),
      Err(Error {
        ip: 3,
        kind: DecodeError::UnsupportedEncoding { byte: 0xF4 },
      })
    );
    assert_eq!(sim.state().registers.get(Reg::Ax), 1);
  }

  #[test]
  fn test_disassembly_and_simulation_agree() {
    let code = [0x89, 0xD8, 0x83, 0xC0, 0x05, 0x04, 0x01];
    let listing = crate::fetch::disassemble(&code).unwrap();
    let steps = Simulator::new(&code).run().unwrap();
    let lines: Vec<_> = steps.iter().map(|step| format!("{}\n", step.instruction)).collect();
    assert_eq!(listing, lines.concat());
  }
}
