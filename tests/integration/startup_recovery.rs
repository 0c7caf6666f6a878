use angler::daemon::service;
use angler::envcfg::EnvConfig;
use angler::fsops::layout::StoreLayout;
use angler::store::campaign::CampaignStore;
use angler::store::maillog::MailLogStore;
use angler::util::logging::{LogLevel, Logger};
use chrono::Utc;

use crate::common::{recipient, sample_campaign};

#[test]
fn startup_unlocks_entries_left_processing_by_a_crash() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    layout.ensure().unwrap();
    let logger = Logger::new(layout.root(), LogLevel::Minimal).unwrap();
    let campaigns = CampaignStore::new(layout.clone()).unwrap();
    let maillog = MailLogStore::new(campaigns.clone(), logger.clone(), 8);

    let mut campaign = sample_campaign(vec![
        recipient("a@example.org", "A"),
        recipient("b@example.org", "B"),
        recipient("c@example.org", "C"),
    ]);
    let mut entries = campaigns.create_campaign(&mut campaign).unwrap();
    for entry in &mut entries {
        entry.processing = true;
        maillog.save(entry).unwrap();
    }
    // nothing is due while every entry is mid-flight
    assert!(maillog.select_due(Utc::now()).unwrap().is_empty());

    let env = EnvConfig {
        disable_mailer: true,
        ..EnvConfig::default()
    };
    let handles = service::start(layout, env, logger.clone()).unwrap();
    handles.stop();

    let due = maillog.select_due(Utc::now()).unwrap();
    assert_eq!(due.len(), 3);
    assert!(due.iter().all(|entry| !entry.processing));

    let log_entries = Logger::load_entries(&logger.log_path()).unwrap();
    assert!(
        log_entries
            .iter()
            .any(|entry| entry.message == "daemon.queue.unlocked"
                && entry.detail.as_deref() == Some("count=3"))
    );
}
