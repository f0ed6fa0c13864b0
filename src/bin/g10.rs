//! `g10`: runs a §6.2 executable against the reference bus.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use g10::bus::ReferenceBus;
use g10::cpu::Cpu;
use g10::execfile::Executable;

const MIN_RAM: usize = 16;
const MAX_RAM: usize = 2 * 1024 * 1024 * 1024;

/// Run a G10 executable image.
#[derive(Parser)]
#[command(name = "g10", version, about, disable_version_flag = true)]
struct Args {
    /// Executable image to run.
    executable: PathBuf,

    /// RAM size in bytes (16 <= N <= 2GiB).
    #[arg(short, long, default_value_t = MIN_RAM, value_parser = parse_ram_size)]
    ram: usize,

    /// Dump RAM contents to this path on exit.
    #[arg(short = 'd', long = "dump-ram")]
    dump_ram: Option<PathBuf>,

    /// Print version information and exit.
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    version: (),
}

fn parse_ram_size(s: &str) -> Result<usize, String> {
    let n: usize = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if !(MIN_RAM..=MAX_RAM).contains(&n) {
        return Err(format!("ram size must be between {MIN_RAM} and {MAX_RAM} bytes"));
    }
    Ok(n)
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let bytes = match std::fs::read(&args.executable) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("g10: {}: {e}", args.executable.display());
            return ExitCode::FAILURE;
        }
    };
    let executable = match Executable::read(&bytes) {
        Ok(executable) => executable,
        Err(e) => {
            eprintln!("g10: {}: {e}", args.executable.display());
            return ExitCode::FAILURE;
        }
    };

    log::info!("loaded '{}', entry point {:#010x}", executable.program_name, executable.entry_point);

    let rom_size = executable
        .segments
        .iter()
        .filter(|s| s.load_address < g10::bus::RAM_START)
        .map(|s| s.load_address as u64 + u64::from(s.memory_size))
        .max()
        .unwrap_or(0);
    let mut bus = ReferenceBus::new(vec![0; rom_size as usize], args.ram);
    executable.load(&mut bus);

    // The CPU always boots at the hardwired reset PC/SP (§3); entry_point
    // and stack_pointer are linker metadata the boot code at that address
    // is expected to honor, not an override applied by the launcher.
    let mut cpu = Cpu::new();

    // tick() keeps returning true once stopped (it just idles); orderly
    // termination is `is_stopped()`, not a false return from tick().
    while !cpu.is_stopped() && cpu.tick(&mut bus) {}

    if let Some(path) = &args.dump_ram {
        if let Err(e) = std::fs::write(path, bus.ram()) {
            eprintln!("g10: {}: {e}", path.display());
        }
    }

    log::info!("halted, EC={:#04x}", cpu.ec());
    ExitCode::from(cpu.ec())
}
