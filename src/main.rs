use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use checkerbase::checker::mail::MailChecker;
use checkerbase::discovery::{DiscoveryService, ServerRegistry};
use checkerbase::engine::{EngineController, EngineState, ValidationError};
use checkerbase::metrics::MetricsSnapshot;
use checkerbase::settings::AppSettings;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless batch checker", long_about = None)]
struct Args {
    /// Input file with one record per line
    #[arg(short, long, default_value = "input.txt")]
    input: PathBuf,

    /// Proxy list file (defaults to proxies.txt when present)
    #[arg(short, long)]
    proxies: Option<PathBuf>,

    /// Output directory for success.txt and failed.txt
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Number of concurrent workers
    #[arg(short = 'n', long)]
    parallelism: Option<usize>,

    /// Retry budget per record
    #[arg(short, long)]
    max_retries: Option<u32>,

    /// Continue from the saved checkpoint when one applies
    #[arg(long, default_value = "false")]
    resume: bool,

    /// Settings file path (defaults to ~/.checkerbase/settings.json)
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn main() -> ExitCode {
    checkerbase::logging::init_dual_logging();
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let settings_path = match &args.settings {
        Some(path) => path.clone(),
        None => AppSettings::default_path()?,
    };
    let mut settings = AppSettings::load_or_default(&settings_path)?;

    settings.input_path = args.input.clone();
    settings.output_dir = args.output.clone();
    settings.proxy_path = args
        .proxies
        .clone()
        .or_else(|| PathBuf::from("proxies.txt").exists().then(|| PathBuf::from("proxies.txt")));
    if let Some(parallelism) = args.parallelism {
        settings.parallelism = parallelism;
    }
    if let Some(max_retries) = args.max_retries {
        settings.max_retries = max_retries;
    }

    if !settings.input_path.exists() {
        error!("Input file {} not found", settings.input_path.display());
        return Ok(ExitCode::from(1));
    }

    let registry = Arc::new(ServerRegistry::new(ServerRegistry::default_path()?));
    if let Err(e) = registry.clean_expired().await {
        warn!("Registry maintenance failed: {}", e);
    }
    let discovery = Arc::new(DiscoveryService::new(registry)?);
    let checker = Arc::new(MailChecker::new(discovery));

    let controller = EngineController::new(checker, None, settings, settings_path);

    let resume_from = if args.resume {
        match controller.resume_position() {
            Some(offset) => {
                info!("Resuming from byte offset {}", offset);
                offset
            }
            None => {
                info!("No applicable checkpoint; starting from the beginning");
                0
            }
        }
    } else {
        0
    };

    if let Err(e) = controller.initialize(resume_from > 0) {
        if let Some(validation) = e.downcast_ref::<ValidationError>() {
            for problem in &validation.problems {
                error!("{}", problem);
            }
        } else {
            error!("Initialization failed: {:#}", e);
        }
        return Ok(ExitCode::from(1));
    }

    // First Ctrl-C converts into a voluntary stop: the engine drains,
    // flushes outputs and saves a resume checkpoint
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping (a checkpoint will be saved)...");
                controller.stop();
            }
        });
    }

    let metrics = controller
        .metrics()
        .context("Engine metrics available after initialize")?;
    let banner = {
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                print_banner(&metrics.snapshot());
            }
        })
    };

    let outcome = controller.start(resume_from).await;
    banner.abort();

    match outcome {
        Ok(()) => {
            print_banner(&metrics.snapshot());
            println!();
            let state = controller.state();
            info!("Run ended in state {}", state);
            match state {
                EngineState::Completed | EngineState::Cancelled => Ok(ExitCode::SUCCESS),
                _ => Ok(ExitCode::from(1)),
            }
        }
        Err(e) => {
            println!();
            error!("Run failed: {:#}", e);
            Ok(ExitCode::from(1))
        }
    }
}

fn print_banner(snap: &MetricsSnapshot) {
    print!(
        "\r[{:>5.1}%] lines {} | ok {} fail {} ign {} retry {} | {:.0} cpm | {:.2} MB/s | ETA {} | {}   ",
        snap.progress_percent,
        snap.processed_lines,
        snap.success,
        snap.failed,
        snap.ignored,
        snap.retries,
        snap.cpm,
        snap.bytes_per_sec / (1024.0 * 1024.0),
        snap.format_eta(),
        snap.format_elapsed(),
    );
    let _ = std::io::stdout().flush();
}
