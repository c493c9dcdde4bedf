//! DuroAcademy admin CLI - permission-aware, cache-backed access to the
//! DuroAcademy backend from the terminal.

mod app;

use std::io;
use std::path::Path;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use duroacademy_core::Config;

use app::App;

/// Log file name prefix inside the cache directory's `logs/` folder
const LOG_FILE_PREFIX: &str = "duroacademy-admin.log";

const USAGE: &str = "\
Usage: duroacademy-admin <command> [args]

Commands:
  login [email] [--remember]     Sign in (password is prompted)
  logout                         Sign out and clear all local data
  whoami [--json]                Show the signed-in principal and permissions
  screens                        List screens and whether you can open them
  modules [--refresh]            List course modules
  stats [--refresh]              Show dashboard counts
  grant <user_id> <SCREEN>...    Set an admin's allowed screens (super admin)
  revoke-override <user_id>      Restore an admin's default screens (super admin)
  cache-cleanup                  Remove expired cache entries
";

/// Initialize the tracing subscriber for logging.
/// `RUST_LOG` controls the level (default `warn`); logs go to stderr and,
/// when a directory is given, to a daily rolling file.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

/// Positional arguments after the command, flags removed.
fn positional(args: &[String]) -> Vec<String> {
    args.iter()
        .skip(2)
        .filter(|a| !a.starts_with("--"))
        .cloned()
        .collect()
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        eprint!("{}", USAGE);
        return Ok(());
    };
    if command == "help" || command == "--help" || command == "-h" {
        print!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    let log_dir = config.cache_dir().ok().map(|d| d.join("logs"));
    let _log_guard = init_tracing(log_dir.as_deref());
    info!(command, "DuroAcademy admin starting");

    let mut app = App::new(config).await?;

    // Housekeeping once per process
    app.cache.cleanup_expired().await;

    let rest = positional(&args);
    match command {
        "login" => app.login(rest.first().cloned(), has_flag(&args, "--remember")).await,
        "logout" => app.logout().await,
        "cache-cleanup" => app.cache_cleanup().await,
        _ => {
            app.restore().await?;
            match command {
                "whoami" => app.whoami(has_flag(&args, "--json")).await,
                "screens" => app.screens().await,
                "modules" => app.modules(has_flag(&args, "--refresh")).await,
                "stats" => app.stats(has_flag(&args, "--refresh")).await,
                "grant" => match rest.split_first() {
                    Some((user_id, screens)) if !screens.is_empty() => app.grant(user_id, screens).await,
                    _ => anyhow::bail!("Usage: duroacademy-admin grant <user_id> <SCREEN>..."),
                },
                "revoke-override" => match rest.first() {
                    Some(user_id) => app.revoke_override(user_id).await,
                    None => anyhow::bail!("Usage: duroacademy-admin revoke-override <user_id>"),
                },
                other => anyhow::bail!("Unknown command: {}\n\n{}", other, USAGE),
            }
        }
    }
}
