use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use angler::{
    cli::load_env,
    daemon::service,
    fsops::layout::StoreLayout,
    util::logging::{LogLevel, Logger},
};
use anyhow::{Context, Result};
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "angler-daemon",
    about = "Angler background daemon - schedules and delivers queued campaign mail",
    long_about = "The Angler daemon provides background services:\n\
                  - Ticks the mail queue once a minute\n\
                  - Locks due entries and hands them to the mailer\n\
                  - Applies retry backoff to transient delivery failures\n\n\
                  Run without arguments to use default configuration at /var/lib/angler/.env",
    version
)]
struct DaemonCli {
    #[arg(
        long,
        default_value = "/var/lib/angler/.env",
        help = "Path to .env file (~ expands to home)"
    )]
    env: String,

    /// Run a single setup cycle and exit (used for tests)
    #[arg(long, hide = true)]
    once: bool,
}

fn main() -> Result<()> {
    let cli = DaemonCli::parse();
    execute(&cli)
}

fn execute(cli: &DaemonCli) -> Result<()> {
    let env_path = resolve_env_path(&cli.env)?;
    let env =
        load_env(&env_path).with_context(|| format!("loading {}", env_path.display()))?;
    let root = store_root(&env_path);
    let layout = StoreLayout::new(&root);
    layout.ensure()?;
    let level = env.logging.parse::<LogLevel>().unwrap_or(LogLevel::Minimal);
    let logger = Logger::new(layout.root(), level)?;
    logger.log(
        LogLevel::Minimal,
        "daemon.launch",
        Some(&format!("root={}", layout.root().display())),
    )?;

    let handles = service::start(layout, env, logger.clone())?;

    if cli.once {
        handles.stop();
        logger.log(LogLevel::Minimal, "daemon.exit", Some("mode=once"))?;
        return Ok(());
    }

    let term_flag = Arc::new(AtomicBool::new(false));
    flag::register(SIGINT, Arc::clone(&term_flag))?;
    flag::register(SIGTERM, Arc::clone(&term_flag))?;

    run_until_shutdown(handles, logger, term_flag, || {
        thread::sleep(Duration::from_millis(200))
    })
}

fn resolve_env_path(raw: &str) -> Result<PathBuf> {
    if raw == "~" {
        return home_dir();
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return Ok(home_dir()?.join(rest));
    }
    Ok(PathBuf::from(raw))
}

fn home_dir() -> Result<PathBuf> {
    std::env::var("HOME")
        .map(PathBuf::from)
        .context("$HOME is not set")
}

fn store_root(env_path: &Path) -> PathBuf {
    env_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn run_until_shutdown<F>(
    handles: service::DaemonHandles,
    logger: Logger,
    term_flag: Arc<AtomicBool>,
    mut sleeper: F,
) -> Result<()>
where
    F: FnMut(),
{
    while !term_flag.load(Ordering::Relaxed) {
        sleeper();
    }

    logger.log(
        LogLevel::Minimal,
        "daemon.shutdown",
        Some("signal=received"),
    )?;
    handles.stop();
    Ok(())
}
