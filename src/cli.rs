//! Command-line front end
//!
//! Compiles and runs scripts standalone, resumes serialized snapshots, and
//! dumps token streams for debugging. Embedding hosts use the library API
//! directly; this binary exists for development and for exercising the
//! save/restore cycle from a shell.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::engine::{ProcState, Process, RunOutcome, Snapshot};
use crate::error::CompileErrorKind;
use crate::host::{ExternCtx, ExternStatus};
use crate::lexer::tokenize;
use crate::program::{Program, Session};
use crate::typesys::TypeDesc;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence - an embeddable, resumable scripting engine", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile and run a script to completion
    Run {
        /// Script file
        script: PathBuf,

        /// Entry function (defaults to the first `extern` function)
        #[arg(short = 'e', long = "entry")]
        entry: Option<String>,

        /// Total step ceiling before the run is suspended
        #[arg(long = "max-steps", default_value = "1000000")]
        max_steps: usize,

        /// Write a snapshot here if the ceiling is reached
        #[arg(short = 'o', long = "snapshot-out")]
        snapshot_out: Option<PathBuf>,
    },

    /// Resume a snapshot against the same script
    Resume {
        /// Script file the snapshot was taken from
        script: PathBuf,

        /// Snapshot file
        snapshot: PathBuf,

        /// Total step ceiling before the run is suspended again
        #[arg(long = "max-steps", default_value = "1000000")]
        max_steps: usize,

        /// Write the next snapshot here if the ceiling is reached
        #[arg(short = 'o', long = "snapshot-out")]
        snapshot_out: Option<PathBuf>,
    },

    /// Compile a script and report diagnostics
    Check {
        /// Script file
        script: PathBuf,
    },

    /// Dump the token stream of a script
    Tokens {
        /// Script file
        script: PathBuf,
    },
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_filter.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            script,
            entry,
            max_steps,
            snapshot_out,
        } => {
            let (mut session, program) = compile_file(&script)?;
            let entry = match entry {
                Some(e) => e,
                None => pick_entry(&program)?,
            };
            let mut proc = Process::start(&mut session, &program, &entry)
                .map_err(|e| anyhow!("cannot start `{entry}`: {e}"))?;
            proc.set_max_frames(cfg.max_frames);
            drive(
                &mut proc,
                &program,
                &mut session,
                &cfg,
                max_steps,
                snapshot_out,
            )
        }
        Commands::Resume {
            script,
            snapshot,
            max_steps,
            snapshot_out,
        } => {
            let (mut session, program) = compile_file(&script)?;
            let bytes = fs::read(&snapshot)
                .with_context(|| format!("reading snapshot {}", snapshot.display()))?;
            let mut proc = Snapshot::restore(&mut session, &bytes)
                .with_context(|| format!("restoring snapshot {}", snapshot.display()))?;
            drive(
                &mut proc,
                &program,
                &mut session,
                &cfg,
                max_steps,
                snapshot_out,
            )
        }
        Commands::Check { script } => match compile_file(&script) {
            Ok((_, program)) => {
                let entries: Vec<&str> = program.entries().collect();
                println!(
                    "ok: {} function(s), entries: {}",
                    program.funcs.len(),
                    entries.join(", ")
                );
                Ok(())
            }
            Err(e) => {
                eprintln!("{e:#}");
                std::process::exit(1);
            }
        },
        Commands::Tokens { script } => {
            let source = read_script(&script)?;
            let session = base_session();
            let toks = tokenize(&source, &session.constants).map_err(|e| anyhow!("{e}"))?;
            for t in &toks {
                println!(
                    "{:>5}..{:<5} {:?} {:?}",
                    t.span.start, t.span.end, t.kind, t.text
                );
            }
            Ok(())
        }
    }
}

fn read_script(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading script {}", path.display()))
}

fn compile_file(path: &Path) -> Result<(Session, Program)> {
    let source = read_script(path)?;
    let mut session = base_session();
    let program = Program::compile(&mut session, &source)
        .map_err(|e| anyhow!("{}: {e}", path.display()))?;
    Ok((session, program))
}

fn pick_entry(program: &Program) -> Result<String> {
    if let Some(name) = program.entries().next() {
        return Ok(name.to_string());
    }
    if program.funcs.iter().any(|f| f.name == "main") {
        return Ok("main".to_string());
    }
    bail!("no entry function; mark one `extern` or name it `main`")
}

/// A session with the small standard library the CLI provides: `print`
/// writes its arguments to stdout.
fn base_session() -> Session {
    fn check_print(_args: &[TypeDesc]) -> Result<TypeDesc, CompileErrorKind> {
        Ok(TypeDesc::Void)
    }
    let mut session = Session::new();
    session.register_function(
        "print",
        check_print,
        Box::new(|ctx: &mut ExternCtx| {
            let line: Vec<String> = ctx.args.iter().map(|v| v.stringify(ctx.heap)).collect();
            println!("{}", line.join(" "));
            Ok(ExternStatus::Done)
        }),
    );
    session
}

fn drive(
    proc: &mut Process,
    program: &Program,
    session: &mut Session,
    cfg: &Config,
    max_steps: usize,
    snapshot_out: Option<PathBuf>,
) -> Result<()> {
    let mut host = ();
    let mut spent = 0usize;
    loop {
        match proc.run(program, session, &mut host, cfg.step_budget) {
            RunOutcome::Finished => break,
            RunOutcome::Suspended => {
                spent += cfg.step_budget;
                if spent >= max_steps {
                    let Some(path) = snapshot_out else {
                        bail!("step ceiling reached with no --snapshot-out");
                    };
                    let bytes = Snapshot::capture(proc, session)?;
                    fs::write(&path, bytes)
                        .with_context(|| format!("writing snapshot {}", path.display()))?;
                    info!(pid = proc.id(), path = %path.display(), "suspended to snapshot");
                    println!("suspended; snapshot written to {}", path.display());
                    return Ok(());
                }
            }
        }
    }
    match proc.state() {
        ProcState::Done => {
            if let Some(text) = proc.result_text() {
                println!("{text}");
            }
            Ok(())
        }
        ProcState::Error => {
            let err = proc.error().expect("error state");
            eprintln!("{err}");
            std::process::exit(1);
        }
        other => bail!("unexpected final state {other:?}"),
    }
}
