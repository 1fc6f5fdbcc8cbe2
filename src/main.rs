use clap::Parser;
use futures::FutureExt;
use ruuvitag_relay::app::{self, Collaborators, Command, Options, RunError};
use ruuvitag_relay::config::FirebaseConfig;
use ruuvitag_relay::identity::FirebaseAuth;
use ruuvitag_relay::pipeline::SystemClock;
use ruuvitag_relay::remote::FirebaseStore;
use ruuvitag_relay::scanner;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        "ruuvitag_relay=debug,info"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Load configuration, build the real collaborators and dispatch the subcommand.
async fn run(options: Options) -> Result<(), RunError> {
    let settings = app::open_settings(&options.settings)?;

    match options.command.unwrap_or(Command::Run { interval: None }) {
        Command::Run { interval } => {
            let firebase = FirebaseConfig::load(&options.firebase_config)?;
            let collaborators = Collaborators {
                scanner: scanner::default_scanner()?,
                refresher: Arc::new(FirebaseAuth::new(firebase.api_key)),
                store: Arc::new(FirebaseStore::new(firebase.database_url)),
                clock: Arc::new(SystemClock),
            };
            let history = app::run_relay(settings, collaborators, interval, ctrl_c()).await?;
            tracing::info!(forwarded = history.len(), "Stopped broadcasting");
        }
        Command::Discover => {
            let scanner = scanner::default_scanner()?;
            let found = app::discover(scanner.as_ref(), ctrl_c(), &mut std::io::stdout()).await?;
            tracing::info!(devices = found.len(), "Discovery finished");
        }
        command => app::edit_settings(&settings, &command)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let options = Options::parse();
    init_logging(options.verbose);

    // Panics inside the listener are caught by its loop; this only reports them.
    panic::set_hook(Box::new(|info: &PanicHookInfo| {
        tracing::error!("Panic! {}", info);
    }));

    let code = match AssertUnwindSafe(run(options)).catch_unwind().await {
        Ok(Ok(())) => EXIT_SUCCESS,
        Ok(Err(why)) => {
            eprintln!("error: {}", why);
            EXIT_ERROR
        }
        Err(_) => EXIT_PANIC,
    };
    std::process::exit(code);
}
