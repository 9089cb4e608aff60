use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use sim8086::{disassemble, CpuState, Reg, Segment, Simulator};

/// 8086 decoder and simulator
#[derive(Parser, Debug)]
#[command(name = "sim8086", version)]
struct Args {
  /// Assembled 8086 machine code
  #[arg(short, long)]
  file: PathBuf,

  /// Execute the instructions and annotate each with its effect
  #[arg(short, long)]
  simulate: bool,

  /// Write final memory to `<file>.data` (implies --simulate)
  #[arg(short, long)]
  dump: bool,

  /// Stop simulating after this many instructions
  #[arg(long)]
  max_steps: Option<usize>,

  /// Enable verbose logging
  #[arg(short, long)]
  verbose: bool,
}

fn main() -> Result<()> {
  let args = Args::parse();

  let log_level = if args.verbose { "debug" } else { "info" };
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
    .format_timestamp_millis()
    .init();

  let data = std::fs::read(&args.file)
    .with_context(|| format!("reading {}", args.file.display()))?;
  info!("loaded {} bytes from {}", data.len(), args.file.display());

  println!("; {}:\nbits 16", args.file.display());

  if !args.simulate && !args.dump {
    print!("{}", disassemble(&data)?);
    return Ok(());
  }

  let mut sim = Simulator::new(&data);
  if let Some(limit) = args.max_steps {
    sim = sim.with_step_limit(limit);
  }
  for step in sim.run()? {
    println!("{step}");
  }
  let state = sim.into_state();
  print_final_state(&state);

  if args.dump {
    let mut path = args.file.clone().into_os_string();
    path.push(".data");
    std::fs::write(&path, state.memory.as_bytes())
      .with_context(|| format!("writing {}", PathBuf::from(&path).display()))?;
    info!("wrote memory image to {}", PathBuf::from(path).display());
  }
  Ok(())
}

fn print_final_state(state: &CpuState) {
  println!("\nFinal registers:");
  let words = [
    Reg::Ax,
    Reg::Bx,
    Reg::Cx,
    Reg::Dx,
    Reg::Sp,
    Reg::Bp,
    Reg::Si,
    Reg::Di,
  ]
  .map(|reg| (reg.name(), state.registers.get(reg)));
  let segments = Segment::ALL.map(|segment| (segment.name(), state.registers.segment(segment)));
  for (name, value) in words.into_iter().chain(segments) {
    if value != 0 {
      println!("\t{name}: {value:#06x} ({value})");
    }
  }
  println!("\tip: {:#06x} ({})", state.ip, state.ip);
  if !state.flags.is_empty() {
    println!("\tflags: {}", state.flags);
  }
}
