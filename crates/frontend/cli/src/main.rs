use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use emu_core::logging::{LogConfig, LogLevel};
use emu_core::System;
use emu_pc::{DisplaySink, MachineConfig, NullSink, PcSystem, RunOutcome, RunReport};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "tinybox", about = "Run an x86 boot sector image")]
struct Args {
    /// Disk image; its first sector is the boot sector
    image: PathBuf,

    /// Stop after this many instructions (overrides the config file)
    #[arg(long)]
    max_steps: Option<u64>,

    /// Machine configuration as JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emulator log level: off, error, warn, info, debug, trace
    #[arg(long, default_value = "off")]
    log_level: String,

    /// Write emulator logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Dump save-state to this file as JSON after the run
    #[arg(long)]
    save: Option<PathBuf>,

    /// Do not draw to the terminal
    #[arg(long, default_value_t = false)]
    no_render: bool,

    /// Print the final screen contents as plain text
    #[arg(long, default_value_t = false)]
    dump_screen: bool,
}

/// Draws cells in place with ANSI cursor positioning
struct TerminalSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> TerminalSink<W> {
    fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> DisplaySink for TerminalSink<W> {
    fn write_cell(&mut self, row: usize, col: usize, ch: u8, _attr: u8) {
        let ch = if ch.is_ascii_graphic() || ch == b' ' {
            ch as char
        } else {
            '.'
        };
        // Terminal rows and columns are 1-based
        let _ = write!(self.out, "\x1b[{};{}H{}", row + 1, col + 1, ch);
        let _ = self.out.flush();
    }

    fn clear(&mut self) {
        let _ = write!(self.out, "\x1b[2J\x1b[H");
        let _ = self.out.flush();
    }
}

fn setup_logging(args: &Args) -> Result<()> {
    let level = LogLevel::from_str(&args.log_level)
        .with_context(|| format!("invalid log level: {}", args.log_level))?;
    let config = LogConfig::global();
    config.set_global_level(level);
    if let Some(path) = &args.log_file {
        config
            .set_log_file(path.clone())
            .with_context(|| format!("failed to open log file {}", path.display()))?;
    }
    Ok(())
}

fn machine_config(args: &Args) -> Result<MachineConfig> {
    let mut config = match &args.config {
        Some(path) => MachineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => MachineConfig::default(),
    };
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps;
    }
    Ok(config)
}

fn usage() -> String {
    Args::command().render_usage().to_string()
}

fn exit_code(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Faulted(_) => 1,
        RunOutcome::Halted | RunOutcome::StepLimitExceeded | RunOutcome::Cancelled => 0,
    }
}

fn report(report: &RunReport) {
    let regs = &report.registers;
    match &report.outcome {
        RunOutcome::Halted => log::info!("Halted after {} steps", report.steps),
        RunOutcome::Faulted(fault) => {
            eprintln!("Fault after {} steps: {}", report.steps, fault)
        }
        RunOutcome::StepLimitExceeded => eprintln!(
            "Step limit reached after {} steps at EIP={:08X}",
            report.steps, regs.eip
        ),
        RunOutcome::Cancelled => log::info!("Cancelled after {} steps", report.steps),
    }
    log::debug!(
        "EIP={:08X} EAX={:08X} EBX={:08X} ECX={:08X} EDX={:08X} ESP={:08X} FLAGS={:04X}",
        regs.eip,
        regs.eax,
        regs.ebx,
        regs.ecx,
        regs.edx,
        regs.esp,
        regs.flags
    );
}

fn main() -> Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();
    setup_logging(&args)?;

    let config = machine_config(&args)?;
    let mut sys = PcSystem::with_config(config)?;
    if let Err(e) = sys.load_image_from_path(&args.image) {
        eprintln!("error: {}", e);
        eprintln!("{}", usage());
        return Ok(ExitCode::FAILURE);
    }
    log::info!(
        "Loaded {} ({} bytes)",
        args.image.display(),
        sys.storage().len()
    );

    let render = !args.no_render;
    if render {
        let mut sink = TerminalSink::new(io::stdout());
        sink.clear();
        sys.set_display_sink(Box::new(sink));
    } else {
        sys.set_display_sink(Box::new(NullSink));
    }

    let result = sys.run();

    if render {
        // Park the terminal cursor below the emulated screen
        println!("\x1b[{};1H", sys.config().display_height + 1);
    }
    report(&result);

    if args.dump_screen {
        print!("{}", sys.screen_text());
    }

    if let Some(path) = &args.save {
        let state = sys.save_state();
        let mut f = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        write!(f, "{}", serde_json::to_string_pretty(&state)?)?;
    }

    Ok(ExitCode::from(exit_code(&result.outcome)))
}
