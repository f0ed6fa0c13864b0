//! `g10-ld`: links one or more §6.1 object files into a §6.2 executable.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use g10::linker;
use g10::objfile::ObjectFile;

/// Link G10 object files into an executable image.
#[derive(Parser)]
#[command(name = "g10-ld", version, about, disable_version_flag = true)]
struct Args {
    /// Object files to link, in the order their sections should be merged.
    #[arg(required = true)]
    objects: Vec<PathBuf>,

    /// Output executable path.
    #[arg(short, long)]
    output: PathBuf,

    #[arg(short = 'V', long)]
    verbose: bool,

    /// Print version information and exit.
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    version: (),
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    if args.verbose {
        log::info!("linking {} object file(s) into {}", args.objects.len(), args.output.display());
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("g10-ld: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    let mut objects = Vec::with_capacity(args.objects.len());
    for path in &args.objects {
        let bytes = std::fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;
        let object = ObjectFile::read(&bytes).map_err(|e| format!("{}: {e}", path.display()))?;
        if args.verbose {
            log::debug!("{}: {} section(s), {} symbol(s)", path.display(), object.sections.len(), object.symbols.len());
        }
        objects.push(object);
    }

    let program_name = args
        .output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("a.out")
        .to_string();

    let executable = linker::link(&objects, &program_name).map_err(|e| e.to_string())?;
    let bytes = executable.write().map_err(|e| e.to_string())?;
    std::fs::write(&args.output, bytes).map_err(|e| format!("{}: {e}", args.output.display()))?;

    if args.verbose {
        log::info!("entry point {:#010x}, {} segment(s)", executable.entry_point, executable.segments.len());
    }
    Ok(())
}
