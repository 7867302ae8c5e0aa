use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use checkerbase::checker::mail::MailChecker;
use checkerbase::discovery::{DiscoveryService, ServerRegistry};
use checkerbase::engine::EngineController;
use checkerbase::settings::AppSettings;
use checkerbase::tui::{TuiApp, run_tui};

#[derive(Parser, Debug)]
#[command(author, version, about = "Interactive batch checker", long_about = None)]
struct Args {
    /// Settings file path (defaults to ~/.checkerbase/settings.json)
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // The terminal belongs to the TUI; diagnostics go to debug.log
    checkerbase::logging::init_file_logging();
    let args = Args::parse();

    let settings_path = match args.settings {
        Some(path) => path,
        None => AppSettings::default_path()?,
    };
    let settings = AppSettings::load_or_default(&settings_path)?;

    let registry = Arc::new(ServerRegistry::new(ServerRegistry::default_path()?));
    let _ = registry.clean_expired().await;
    let discovery = Arc::new(DiscoveryService::new(registry)?);
    let checker = Arc::new(MailChecker::new(discovery));

    let controller = EngineController::new(checker, None, settings, settings_path);
    let app = TuiApp::new(controller);

    run_tui(app).await
}
