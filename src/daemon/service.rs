use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;

use crate::{
    envcfg::EnvConfig,
    fsops::layout::StoreLayout,
    pipeline::{
        mailer::{self, SmtpFactory, TransportFactory},
        sched::Scheduler,
    },
    store::{campaign::CampaignStore, maillog::MailLogStore},
    util::logging::{LogLevel, Logger},
};

/// Seconds between scheduler passes over the queue.
const TICK_INTERVAL_SECS: u64 = 60;

pub struct DaemonHandles {
    shutdown: Arc<AtomicBool>,
    scheduler: Option<JoinHandle<()>>,
    mailer: Option<JoinHandle<()>>,
}

impl DaemonHandles {
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.scheduler.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.mailer.take() {
            let _ = handle.join();
        }
    }
}

pub fn start(layout: StoreLayout, env: EnvConfig, logger: Logger) -> Result<DaemonHandles> {
    start_with_factory(layout, env, logger, Arc::new(SmtpFactory))
}

pub fn start_with_factory(
    layout: StoreLayout,
    env: EnvConfig,
    logger: Logger,
    factory: Arc<dyn TransportFactory>,
) -> Result<DaemonHandles> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let campaigns = CampaignStore::new(layout)?;
    let store = MailLogStore::new(campaigns, logger.clone(), env.max_send_attempts);

    // A crash mid-batch leaves entries locked; release them before the
    // first tick so they become eligible again.
    let unlocked = store.unlock_all()?;
    if unlocked > 0 {
        let _ = logger.log(
            LogLevel::Minimal,
            "daemon.queue.unlocked",
            Some(&format!("count={unlocked}")),
        );
    }

    if env.disable_mailer {
        let _ = logger.log(LogLevel::Minimal, "daemon.mailer.disabled", None);
        return Ok(DaemonHandles {
            shutdown,
            scheduler: None,
            mailer: None,
        });
    }

    let (mailer, worker) = mailer::mailer(env.mailer_queue_depth, factory, logger.clone());
    let worker_shutdown = shutdown.clone();
    let mailer_handle = thread::spawn(move || worker.run(worker_shutdown));

    let scheduler = Scheduler::new(
        store,
        mailer,
        logger.clone(),
        env.server_name.clone(),
        env.contact_address.clone(),
    );
    let sched_shutdown = shutdown.clone();
    let sched_logger = logger;
    let sched_handle = thread::spawn(move || {
        while !sched_shutdown.load(Ordering::Relaxed) {
            if let Err(err) = scheduler.tick(Utc::now()) {
                let _ = sched_logger.log(
                    LogLevel::Minimal,
                    "daemon.scheduler.error",
                    Some(&err.to_string()),
                );
            }
            for _ in 0..TICK_INTERVAL_SECS {
                if sched_shutdown.load(Ordering::Relaxed) {
                    return;
                }
                thread::sleep(Duration::from_secs(1));
            }
        }
    });

    Ok(DaemonHandles {
        shutdown,
        scheduler: Some(sched_handle),
        mailer: Some(mailer_handle),
    })
}
