use anyhow::{Context, Result};
use clap::Parser;
use howl::{Annotator, AnnotatorConfig, MacroResolution, WORKER_STACK_SIZE};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "howl-trace",
    version,
    about = "Run a Howl program and print its annotations as a tagged JSON line"
)]
struct Args {
    /// Program to annotate
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Seconds the program may run before it is abandoned
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    timeout: u64,

    /// Read assignment targets after the statement finishes instead of
    /// evaluating the right-hand side up front
    #[arg(long)]
    deferred: bool,

    /// Text after `#` that marks a line for annotation
    #[arg(long, default_value = "?")]
    marker: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let config = AnnotatorConfig {
        marker: args.marker,
        resolution: if args.deferred {
            MacroResolution::Deferred
        } else {
            MacroResolution::Immediate
        },
        ..AnnotatorConfig::default()
    };

    debug!(file = %args.file.display(), timeout = args.timeout, "starting annotation worker");
    let (sender, receiver) = mpsc::channel();
    let path = args.file.clone();
    std::thread::Builder::new()
        .name("howl-worker".into())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || {
            let code = Annotator::new(config).main(&path);
            let _ = sender.send(code);
        })
        .context("failed to start the annotation worker")?;

    let code = match receiver.recv_timeout(Duration::from_secs(args.timeout)) {
        Ok(code) => code,
        Err(RecvTimeoutError::Timeout) => {
            error!(file = %args.file.display(), timeout = args.timeout, "annotation run timed out");
            eprintln!(
                "TIMEOUT_ERROR: {} did not finish within {}s",
                args.file.display(),
                args.timeout
            );
            1
        }
        Err(RecvTimeoutError::Disconnected) => {
            error!(file = %args.file.display(), "annotation worker disconnected");
            eprintln!("THREAD_ERROR: the annotation worker stopped unexpectedly");
            1
        }
    };
    std::process::exit(code)
}
