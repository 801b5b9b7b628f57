use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log::{LevelFilter, warn};

use sbl::bytecode::disasm;
use sbl::frontend::preprocess::FsReader;
use sbl::frontend::token_dumper::TokenDumper;
use sbl::pipeline::{self, LoadConfig};
use sbl::runtime::{Builtins, VmConfig};
use sbl::ErrorKind;

const INTERRUPTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "sbl", version, about = "Run programs written in SBL, a small stack language")]
struct Cli {
    /// Source files. Each is loaded on its own, then all are merged.
    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Extra import directory, searched after the importing file's own
    /// directory (repeatable; `SBL_PATH` entries come after these)
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Print the token stream of each file and exit
    #[arg(long)]
    tokens: bool,

    /// Disable colors in --tokens output
    #[arg(long)]
    no_color: bool,

    /// Print the compiled bytecode and exit
    #[arg(long = "bc")]
    bytecode: bool,

    /// Print instruction statistics and exit
    #[arg(long)]
    stats: bool,

    /// Dump call stack, locals and operand stack when the run fails
    #[arg(long)]
    dump: bool,

    /// Like --dump, as JSON
    #[arg(long)]
    dump_json: bool,

    /// Maximum call depth, `main` included
    #[arg(long, value_name = "N", default_value_t = 1000, env = "SBL_MAX_DEPTH")]
    max_depth: usize,

    /// Maximum number of values on the operand stack
    #[arg(long, value_name = "N", default_value_t = 10_000, env = "SBL_MAX_STACK")]
    max_stack: usize,

    /// Stop after this many instructions
    #[arg(long, value_name = "N")]
    max_steps: Option<u64>,

    /// More log output (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,
}

// ──────────────────────────── Logger / Verbosity ────────────────────────────

fn init_telemetry(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };
    // RUST_LOG, when set, refines the level picked by the flags.
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_env(env_logger::Env::default())
        .try_init();
}

fn exit_code(kind: ErrorKind) -> ExitCode {
    match kind {
        ErrorKind::Interrupted => ExitCode::from(INTERRUPTED),
        ErrorKind::RuntimeType | ErrorKind::HostRecursionLimit | ErrorKind::ResourceLimit => {
            ExitCode::from(2)
        }
        _ => ExitCode::from(1),
    }
}

// ──────────────────────────── main ────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_telemetry(cli.verbose, cli.quiet);

    match start(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Installs the Ctrl-C handler, then does the work.
fn start(cli: Cli) -> Result<ExitCode> {
    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupt);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn!("could not install Ctrl-C handler: {}", e);
    }

    real_main(cli, interrupt)
}

fn real_main(cli: Cli, interrupt: Arc<AtomicBool>) -> Result<ExitCode> {
    let reader = FsReader;

    if cli.tokens {
        let mut dumper = TokenDumper::new().pretty();
        if cli.no_color {
            dumper = dumper.no_color();
        }
        for path in &cli.files {
            match pipeline::tokenize_file(path, &reader) {
                Ok(tokens) => dumper.dump(&tokens),
                Err(e) => {
                    eprintln!("{}", e);
                    return Ok(exit_code(e.kind()));
                }
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config = cli
        .include
        .iter()
        .fold(LoadConfig::default(), |config, dir| config.with_search_dir(dir))
        .with_env()
        .with_interrupt(Arc::clone(&interrupt));
    let builtins = Builtins::standard();

    let table = match pipeline::load_programs(&cli.files, &config, &builtins, &reader) {
        Ok(table) => table,
        Err(errors) => {
            for e in &errors {
                eprintln!("{}", e);
            }
            let interrupted = errors.iter().any(|e| e.kind() == ErrorKind::Interrupted);
            return Ok(if interrupted {
                ExitCode::from(INTERRUPTED)
            } else {
                ExitCode::from(1)
            });
        }
    };

    if cli.bytecode || cli.stats {
        if cli.bytecode {
            print!("{}", disasm::disassemble(&table));
        }
        if cli.stats {
            print!("{}", disasm::stats(&table));
        }
        return Ok(ExitCode::SUCCESS);
    }

    let vm_config = VmConfig::default()
        .with_max_call_depth(cli.max_depth)
        .with_max_stack_size(cli.max_stack)
        .with_max_steps(cli.max_steps)
        .with_interrupt(interrupt);

    match pipeline::run_program(&table, &builtins, vm_config, io::stdout()) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err((err, snapshot)) => {
            let _ = io::stdout().flush();
            eprintln!("{}", err);
            if cli.dump {
                eprint!("{}", snapshot);
            }
            if cli.dump_json {
                eprintln!("{}", snapshot.to_json().context("serializing VM state")?);
            }
            Ok(exit_code(err.kind()))
        }
    }
}
