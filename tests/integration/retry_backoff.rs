use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use angler::fsops::layout::StoreLayout;
use angler::model::result::ResultStatus;
use angler::pipeline::mailer::{self, SendError};
use angler::pipeline::sched::Scheduler;
use angler::store::campaign::CampaignStore;
use angler::store::maillog::{ERR_MAX_SEND_ATTEMPTS, MailLogStore};
use angler::util::logging::{LogLevel, Logger};
use chrono::{Duration, Utc};

use crate::common::{MemoryFactory, MemoryTransport, recipient, sample_campaign};

struct Fixture {
    _dir: tempfile::TempDir,
    campaigns: CampaignStore,
    maillog: MailLogStore,
    transport: Arc<MemoryTransport>,
    campaign_id: u64,
    rid: String,
}

/// Seed one campaign with one due recipient, then run a single
/// tick-and-drain pass against the given transport outcome.
fn run_one_pass(outcome: Option<SendError>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    layout.ensure().unwrap();
    let logger = Logger::new(layout.root(), LogLevel::Off).unwrap();
    let campaigns = CampaignStore::new(layout).unwrap();
    let maillog = MailLogStore::new(campaigns.clone(), logger.clone(), 8);

    let mut campaign = sample_campaign(vec![recipient("bob@example.org", "Bob")]);
    let entries = campaigns.create_campaign(&mut campaign).unwrap();
    let rid = entries[0].rid.clone();
    maillog.save(&entries[0]).unwrap();

    let transport = match outcome {
        Some(err) => MemoryTransport::failing(err),
        None => MemoryTransport::succeeding(),
    };
    let (mailer, worker) = mailer::mailer(
        4,
        Arc::new(MemoryFactory(transport.clone())),
        logger.clone(),
    );
    let scheduler = Scheduler::new(
        maillog.clone(),
        mailer,
        logger,
        "angler".into(),
        String::new(),
    );
    scheduler.tick(Utc::now()).unwrap();
    // Dropping the scheduler closes the queue; run() drains what was
    // submitted and returns.
    drop(scheduler);
    worker.run(Arc::new(AtomicBool::new(false)));

    Fixture {
        _dir: dir,
        campaigns,
        maillog,
        transport,
        campaign_id: campaign.id,
        rid,
    }
}

#[test]
fn transient_failure_backs_off_and_reschedules() {
    let fx = run_one_pass(Some(SendError::Transient("451 4.7.1 try again later".into())));

    let entry = fx.maillog.load(&fx.rid).unwrap();
    assert_eq!(entry.send_attempt, 1);
    assert!(!entry.processing);
    // first retry lands two minutes past the previous due time
    let campaign = fx.campaigns.load_campaign(fx.campaign_id).unwrap();
    assert_eq!(entry.send_date, campaign.launch_date + Duration::minutes(2));

    let result = fx.campaigns.load_result(&fx.rid).unwrap();
    assert_eq!(result.status, ResultStatus::Scheduled);
    assert_eq!(result.events.len(), 1);
    assert!(
        result.events[0]
            .details
            .as_deref()
            .unwrap()
            .contains("451 4.7.1")
    );
}

#[test]
fn permanent_failure_errors_out_immediately() {
    let fx = run_one_pass(Some(SendError::Permanent(
        "550 5.1.1 no such mailbox".into(),
    )));

    assert!(fx.maillog.load(&fx.rid).is_err(), "entry should be deleted");
    let result = fx.campaigns.load_result(&fx.rid).unwrap();
    assert_eq!(result.status, ResultStatus::Error);
    assert!(
        result
            .error_details
            .as_deref()
            .unwrap()
            .contains("550 5.1.1")
    );
    assert_eq!(fx.transport.sent.lock().len(), 1);
}

#[test]
fn transient_failures_exhaust_after_max_attempts() {
    let fx = run_one_pass(Some(SendError::Transient("connection refused".into())));

    // Fast-forward through the remaining retries without waiting out the
    // backoff schedule.
    let mut entry = fx.maillog.load(&fx.rid).unwrap();
    loop {
        match fx
            .maillog
            .backoff(&mut entry, "connection refused", Utc::now())
            .unwrap()
        {
            angler::store::maillog::BackoffOutcome::Rescheduled(_) => continue,
            angler::store::maillog::BackoffOutcome::Exhausted => break,
        }
    }

    assert!(fx.maillog.load(&fx.rid).is_err(), "entry should be deleted");
    let result = fx.campaigns.load_result(&fx.rid).unwrap();
    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(
        result.error_details.as_deref(),
        Some(ERR_MAX_SEND_ATTEMPTS)
    );
    // campaign closes out even though delivery never succeeded
    assert_eq!(
        fx.campaigns
            .load_campaign(fx.campaign_id)
            .unwrap()
            .status,
        angler::model::campaign::CampaignStatus::Completed
    );
}
