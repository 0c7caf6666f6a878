use std::sync::Arc;
use std::time::Duration;

use angler::daemon::service;
use angler::envcfg::EnvConfig;
use angler::fsops::layout::StoreLayout;
use angler::model::campaign::CampaignStatus;
use angler::model::result::ResultStatus;
use angler::store::campaign::CampaignStore;
use angler::store::maillog::MailLogStore;
use angler::util::logging::{LogLevel, Logger};

use crate::common::{MemoryFactory, MemoryTransport, recipient, sample_campaign, wait_until};

#[test]
fn daemon_delivers_due_campaign_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    layout.ensure().unwrap();
    let logger = Logger::new(layout.root(), LogLevel::Off).unwrap();

    let campaigns = CampaignStore::new(layout.clone()).unwrap();
    let maillog = MailLogStore::new(campaigns.clone(), logger.clone(), 8);
    let mut campaign = sample_campaign(vec![
        recipient("bob@example.org", "Bob"),
        recipient("carol@example.org", "Carol"),
    ]);
    let entries = campaigns.create_campaign(&mut campaign).unwrap();
    for entry in &entries {
        maillog.save(entry).unwrap();
    }

    let transport = MemoryTransport::succeeding();
    let factory = Arc::new(MemoryFactory(transport.clone()));
    let handles =
        service::start_with_factory(layout, EnvConfig::default(), logger, factory).unwrap();

    let all_sent = wait_until(Duration::from_secs(5), || {
        entries.iter().all(|entry| {
            campaigns
                .load_result(&entry.rid)
                .map(|r| r.status == ResultStatus::Sent)
                .unwrap_or(false)
        })
    });
    handles.stop();
    assert!(all_sent, "results never reached Email Sent");

    // queue drained, campaign closed out
    assert!(maillog.all().unwrap().is_empty());
    assert_eq!(
        campaigns.load_campaign(campaign.id).unwrap().status,
        CampaignStatus::Completed
    );

    let sent = transport.sent.lock();
    assert_eq!(sent.len(), 2);
    let bodies: Vec<String> = sent
        .iter()
        .map(|(_, bytes)| String::from_utf8_lossy(bytes).into_owned())
        .collect();
    assert!(bodies.iter().any(|b| b.contains("Hi Bob")));
    assert!(bodies.iter().any(|b| b.contains("Hi Carol")));
    for body in &bodies {
        assert!(body.contains("X-Sender: X-PHISHTEST"));
        assert!(body.contains("X-Mailer: angler"));
    }
    for (envelope, _) in sent.iter() {
        assert_eq!(envelope.to().len(), 1);
    }
}

#[test]
fn recipient_urls_carry_the_result_id() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    layout.ensure().unwrap();
    let logger = Logger::new(layout.root(), LogLevel::Off).unwrap();

    let campaigns = CampaignStore::new(layout.clone()).unwrap();
    let maillog = MailLogStore::new(campaigns.clone(), logger.clone(), 8);
    let mut campaign = sample_campaign(vec![recipient("bob@example.org", "Bob")]);
    let entries = campaigns.create_campaign(&mut campaign).unwrap();
    for entry in &entries {
        maillog.save(entry).unwrap();
    }

    let transport = MemoryTransport::succeeding();
    let factory = Arc::new(MemoryFactory(transport.clone()));
    let handles =
        service::start_with_factory(layout, EnvConfig::default(), logger, factory).unwrap();
    let delivered = wait_until(Duration::from_secs(5), || !transport.sent.lock().is_empty());
    handles.stop();
    assert!(delivered);

    let sent = transport.sent.lock();
    let body = String::from_utf8_lossy(&sent[0].1);
    let rid = &entries[0].rid;
    assert!(
        body.contains(&format!("http://landing.example.org/login?rid={rid}")),
        "body missing per-recipient url: {body}"
    );
}
