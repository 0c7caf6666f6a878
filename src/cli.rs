use clap::{Parser, Subcommand, ValueEnum};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use crate::{
    bakery::{Bakery, Cookie, CookieKind, Role},
    daemon::service,
    envcfg::EnvConfig,
    fsops::{io_atom::write_atomic, layout::StoreLayout},
    model::campaign::{Campaign, Recipient},
    pipeline::{
        mailer::{self, SmtpFactory},
        sched::Scheduler,
    },
    store::{campaign::CampaignStore, maillog::MailLogStore},
    util::logging::{self, LogLevel, Logger},
};
use anyhow::{Context, Result, anyhow};
use chrono::Utc;

#[derive(Parser, Debug, Clone)]
#[command(name = "angler", version, about = "File-first phishing-drill mail scheduler")]
pub struct AnglerCli {
    #[arg(
        long,
        default_value = "/var/lib/angler/.env",
        help = "Path to the .env file"
    )]
    pub env: String,

    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(long, help = "Enable JSON output for supported commands")]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    #[command(about = "Create the storage layout and a default .env file")]
    Install,
    #[command(about = "Run the scheduler and mailer until interrupted")]
    Daemon,
    #[command(about = "Register a campaign from a YAML definition")]
    Create {
        #[arg(help = "Path to the campaign YAML file")]
        file: PathBuf,
    },
    #[command(about = "Send a campaign's due mail immediately")]
    Launch {
        #[arg(help = "Campaign id")]
        id: u64,
    },
    #[command(about = "Send one test email through a campaign definition")]
    TestSend {
        #[arg(help = "Path to the campaign YAML file")]
        file: PathBuf,
        #[arg(long, help = "Override the recipient address")]
        email: Option<String>,
    },
    #[command(about = "List queued mail-log entries")]
    Queue {
        #[arg(long, help = "Restrict to one campaign")]
        campaign: Option<u64>,
    },
    #[command(about = "Clear the processing flag on every queued entry")]
    Unlock,
    #[command(about = "Show a campaign and its per-recipient results")]
    Status {
        #[arg(help = "Campaign id")]
        id: u64,
    },
    #[command(about = "Encode and decode single-sign-on cookies")]
    Cookie {
        #[command(subcommand)]
        action: CookieCommand,
    },
    #[command(about = "Render structured logs")]
    Logs {
        #[arg(value_enum, default_value_t = LogAction::Show, help = "Action to perform on logs")]
        action: LogAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum CookieCommand {
    #[command(about = "Build a login-handoff cookie")]
    Session {
        #[arg(help = "Username")]
        name: String,
        #[arg(help = "Password")]
        password: String,
        #[arg(long, default_value = "", help = "Post-login destination path")]
        destination: String,
        #[arg(long, default_value = "", help = "Requesting slave hostname")]
        slave: String,
    },
    #[command(about = "Build an identity-assertion cookie")]
    Sso {
        #[arg(help = "Username")]
        name: String,
        #[arg(help = "Email address")]
        email: String,
        #[arg(help = "Legacy role name")]
        role: String,
        #[arg(long, help = "Master account id")]
        id: Option<u64>,
    },
    #[command(about = "Decode and authenticate a cookie")]
    Decode {
        #[arg(help = "Cookie value")]
        cookie: String,
    },
}

#[derive(ValueEnum, Clone, Debug, Default, PartialEq, Eq)]
pub enum LogAction {
    #[default]
    Show,
    Tail,
}

const DEFAULT_ENV_PATH: &str = "/var/lib/angler/.env";

pub fn run(cli: AnglerCli, env: EnvConfig) -> Result<String> {
    let env_path = resolve_env_path(&cli.env)?;
    let root = store_root(&env_path);
    let log_level = env.logging.parse::<LogLevel>().unwrap_or(LogLevel::Minimal);
    let logger = Logger::new(root.clone(), log_level)?;
    match cli.command.unwrap_or(Commands::Queue { campaign: None }) {
        Commands::Install => install(&env_path, &env, &logger),
        Commands::Daemon => daemon(&root, &env, &logger),
        Commands::Create { file } => create(&root, &env, &file),
        Commands::Launch { id } => launch(&root, &env, &logger, id),
        Commands::TestSend { file, email } => test_send(&root, &env, &logger, &file, email),
        Commands::Queue { campaign } => queue(&root, &env, &logger, campaign, cli.json),
        Commands::Unlock => unlock(&root, &env, &logger),
        Commands::Status { id } => status(&root, id, cli.json),
        Commands::Cookie { action } => cookie(&env, action),
        Commands::Logs { action } => logs(&root, log_level, action, cli.json),
    }
}

fn install(env_path: &Path, env: &EnvConfig, logger: &Logger) -> Result<String> {
    let root = store_root(env_path);
    let layout = StoreLayout::new(&root);
    layout.ensure()?;
    logger.log(
        LogLevel::Minimal,
        "install.ensure",
        Some(&format!("root={}", root.display())),
    )?;
    if !env_path.exists() {
        write_atomic(env_path, env.to_env_string().as_bytes())
            .with_context(|| format!("writing {}", env_path.display()))?;
        logger.log(
            LogLevel::Minimal,
            "install.env.created",
            Some(&format!("path={}", env_path.display())),
        )?;
    }
    Ok(format!("installed {}", root.display()))
}

fn daemon(root: &Path, env: &EnvConfig, logger: &Logger) -> Result<String> {
    let layout = StoreLayout::new(root);
    layout.ensure()?;
    let handles = service::start(layout, env.clone(), logger.clone())?;
    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, term.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, term.clone())?;
    while !term.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(500));
    }
    handles.stop();
    Ok("daemon stopped".to_string())
}

fn create(root: &Path, env: &EnvConfig, file: &Path) -> Result<String> {
    let body =
        fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let mut campaign: Campaign =
        serde_yaml::from_str(&body).with_context(|| format!("parsing {}", file.display()))?;
    let (campaigns, maillog) = stores(root, env)?;
    let entries = campaigns.create_campaign(&mut campaign)?;
    for entry in &entries {
        maillog.save(entry)?;
    }
    Ok(format!(
        "created campaign {} ({} recipients queued)",
        campaign.id,
        entries.len()
    ))
}

fn launch(root: &Path, env: &EnvConfig, logger: &Logger, id: u64) -> Result<String> {
    let (_, maillog) = stores(root, env)?;
    let (mailer, worker) = mailer::mailer(
        env.mailer_queue_depth,
        Arc::new(SmtpFactory),
        logger.clone(),
    );
    let scheduler = Scheduler::new(
        maillog.clone(),
        mailer,
        logger.clone(),
        env.server_name.clone(),
        env.contact_address.clone(),
    );
    scheduler.launch_campaign(id, Utc::now())?;
    // Dropping the scheduler closes the queue; the worker then drains
    // whatever was submitted and returns.
    drop(scheduler);
    worker.run(Arc::new(AtomicBool::new(false)));

    let remaining = maillog.entries_for_campaign(id)?.len();
    Ok(format!("launched campaign {id} ({remaining} entries still queued)"))
}

fn test_send(
    root: &Path,
    env: &EnvConfig,
    logger: &Logger,
    file: &Path,
    email: Option<String>,
) -> Result<String> {
    let body =
        fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let campaign: Campaign =
        serde_yaml::from_str(&body).with_context(|| format!("parsing {}", file.display()))?;
    let recipient = match email {
        Some(address) => Recipient {
            email: address,
            ..Default::default()
        },
        None => campaign
            .recipients
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("campaign has no recipients and no --email was given"))?,
    };

    let (_, maillog) = stores(root, env)?;
    let (mailer, worker) = mailer::mailer(
        env.mailer_queue_depth,
        Arc::new(SmtpFactory),
        logger.clone(),
    );
    let scheduler = Scheduler::new(
        maillog,
        mailer,
        logger.clone(),
        env.server_name.clone(),
        env.contact_address.clone(),
    );
    let shutdown = Arc::new(AtomicBool::new(false));
    let worker_shutdown = shutdown.clone();
    let handle = thread::spawn(move || worker.run(worker_shutdown));
    let address = recipient.email.clone();
    let outcome = scheduler.send_test(campaign, recipient);
    shutdown.store(true, Ordering::SeqCst);
    let _ = handle.join();
    outcome?;
    Ok(format!("test email sent to {address}"))
}

fn queue(
    root: &Path,
    env: &EnvConfig,
    logger: &Logger,
    campaign: Option<u64>,
    json: bool,
) -> Result<String> {
    let (_, maillog) = stores_with_logger(root, env, logger)?;
    let entries = match campaign {
        Some(id) => maillog.entries_for_campaign(id)?,
        None => maillog.all()?,
    };
    if json {
        return Ok(serde_json::to_string(&entries)?);
    }
    if entries.is_empty() {
        return Ok("queue is empty".to_string());
    }
    Ok(entries
        .iter()
        .map(|entry| {
            format!(
                "{} campaign={} send_date={} attempt={} processing={}",
                entry.rid,
                entry.campaign_id,
                entry.send_date.to_rfc3339(),
                entry.send_attempt,
                entry.processing
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

fn unlock(root: &Path, env: &EnvConfig, logger: &Logger) -> Result<String> {
    let (_, maillog) = stores_with_logger(root, env, logger)?;
    let count = maillog.unlock_all()?;
    Ok(format!("unlocked {count} entries"))
}

fn status(root: &Path, id: u64, json: bool) -> Result<String> {
    let campaigns = CampaignStore::new(StoreLayout::new(root))?;
    let campaign = campaigns.load_campaign(id)?;
    let results = campaigns.results_for_campaign(id)?;
    if json {
        return Ok(serde_json::to_string(&serde_json::json!({
            "campaign": campaign,
            "results": results,
        }))?);
    }
    let mut lines = vec![format!(
        "campaign {} \"{}\" status={}",
        campaign.id,
        campaign.name,
        serde_yaml::to_string(&campaign.status)?.trim()
    )];
    for result in &results {
        let mut line = format!("  {} {} {}", result.rid, result.email, result.status.label());
        if let Some(details) = &result.error_details {
            line.push_str(&format!(" error={details}"));
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

fn cookie(env: &EnvConfig, action: CookieCommand) -> Result<String> {
    let key = env
        .bakery_key
        .as_deref()
        .ok_or_else(|| anyhow!("bakery_key is not set in the env file"))?;
    let bakery = Bakery::new(key.as_bytes())?;
    match action {
        CookieCommand::Session {
            name,
            password,
            destination,
            slave,
        } => Ok(bakery.oatmeal_cookie(&name, &password, &destination, &slave)),
        CookieCommand::Sso {
            name,
            email,
            role,
            id,
        } => {
            let role = Role::from_legacy(&role)?;
            Ok(bakery.chocolate_chip_cookie(&name, &email, role, id))
        }
        CookieCommand::Decode { cookie } => {
            let parsed = bakery.parse(&cookie)?;
            Ok(describe_cookie(&parsed))
        }
    }
}

fn describe_cookie(cookie: &Cookie) -> String {
    match &cookie.kind {
        CookieKind::Oatmeal { error: None } => "session cookie: login accepted".to_string(),
        CookieKind::Oatmeal { error: Some(err) } => {
            format!("session cookie: login rejected ({err})")
        }
        CookieKind::ChocolateChip {
            user,
            email,
            role,
            bakery_id,
        } => {
            let id = bakery_id
                .map(|id| format!(" id={id}"))
                .unwrap_or_default();
            format!("sso cookie: user={user} email={email} role={role}{id}")
        }
    }
}

fn logs(root: &Path, level: LogLevel, action: LogAction, json: bool) -> Result<String> {
    if level == LogLevel::Off {
        return Ok(if json {
            "[]".to_string()
        } else {
            "logging disabled".to_string()
        });
    }
    let layout = StoreLayout::new(root);
    let entries = Logger::load_entries(&layout.log_file())?;
    let slice = if action == LogAction::Tail {
        logging::tail(&entries, 50)
    } else {
        &entries
    };
    if json {
        return Ok(serde_json::to_string(slice)?);
    }
    if slice.is_empty() {
        return Ok("no log entries".to_string());
    }
    Ok(slice
        .iter()
        .map(|entry| entry.format_human())
        .collect::<Vec<_>>()
        .join("\n"))
}

fn stores(root: &Path, env: &EnvConfig) -> Result<(CampaignStore, MailLogStore)> {
    let log_level = env.logging.parse::<LogLevel>().unwrap_or(LogLevel::Minimal);
    let logger = Logger::new(root.to_path_buf(), log_level)?;
    stores_with_logger(root, env, &logger)
}

fn stores_with_logger(
    root: &Path,
    env: &EnvConfig,
    logger: &Logger,
) -> Result<(CampaignStore, MailLogStore)> {
    let campaigns = CampaignStore::new(StoreLayout::new(root))?;
    let maillog = MailLogStore::new(campaigns.clone(), logger.clone(), env.max_send_attempts);
    Ok((campaigns, maillog))
}

fn resolve_env_path(raw: &str) -> Result<PathBuf> {
    resolve_env_path_with_home(raw, home_dir)
}

fn resolve_env_path_with_home<F>(raw: &str, home: F) -> Result<PathBuf>
where
    F: Fn() -> Result<PathBuf>,
{
    if raw.is_empty() {
        return Ok(PathBuf::from(DEFAULT_ENV_PATH));
    }
    if raw == "~" {
        return home();
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return Ok(home()?.join(rest));
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

pub fn load_env(path: &Path) -> Result<EnvConfig> {
    if path.exists() {
        EnvConfig::from_file(path)
    } else {
        Ok(EnvConfig::default())
    }
}
