use std::collections::HashMap;
use std::sync::mpsc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use lettre::address::Envelope;

use crate::model::campaign::{Campaign, CampaignStatus, Recipient};
use crate::model::maillog::MailLogEntry;
use crate::model::result::new_rid;
use crate::pipeline::mailer::{Batch, Mail, Mailer};
use crate::pipeline::message::build_campaign_message;
use crate::store::maillog::MailLogStore;
use crate::util::logging::{LogLevel, Logger};

/// Turns wall-clock time into batches for the mailer: the minute tick,
/// the immediate-launch path, and the synchronous test send.
pub struct Scheduler {
    store: MailLogStore,
    mailer: Mailer,
    logger: Logger,
    server_name: String,
    contact_address: String,
}

impl Scheduler {
    pub fn new(
        store: MailLogStore,
        mailer: Mailer,
        logger: Logger,
        server_name: String,
        contact_address: String,
    ) -> Self {
        Self {
            store,
            mailer,
            logger,
            server_name,
            contact_address,
        }
    }

    pub fn store(&self) -> &MailLogStore {
        &self.store
    }

    /// One minute tick: select due entries, lock them, group them by
    /// campaign, and submit each group. Groups are submitted from their
    /// own threads so one campaign's slow profile cannot hold up the
    /// next campaign's batch.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        let mut due = self.store.select_due(now).context("selecting due entries")?;
        if due.is_empty() {
            return Ok(());
        }
        self.store.lock(&mut due)?;

        let mut groups: HashMap<u64, Vec<MailLogEntry>> = HashMap::new();
        for entry in due {
            groups.entry(entry.campaign_id).or_default().push(entry);
        }

        std::thread::scope(|scope| {
            for (campaign_id, entries) in groups {
                scope.spawn(move || {
                    let _ = self.logger.log(
                        LogLevel::Minimal,
                        "submitting campaign batch",
                        Some(&format!("campaign={campaign_id} entries={}", entries.len())),
                    );
                    if let Err(err) = self.submit_group(campaign_id, entries) {
                        let _ = self.logger.log(
                            LogLevel::Minimal,
                            "campaign batch submission failed",
                            Some(&format!("campaign={campaign_id} err={err:#}")),
                        );
                    }
                });
            }
        });
        Ok(())
    }

    /// Immediate launch: bypass the tick for one campaign. Entries that
    /// are not yet due (future send date or outside the window) are
    /// unlocked again and left for the regular tick.
    pub fn launch_campaign(&self, campaign_id: u64, now: DateTime<Utc>) -> Result<()> {
        let mut entries = self.store.entries_for_campaign(campaign_id)?;
        self.store.lock(&mut entries)?;
        let mut ready = Vec::new();
        for mut entry in entries {
            if self.store.is_due(&entry, now) {
                ready.push(entry);
            } else {
                self.store.unlock(&mut entry)?;
            }
        }
        if ready.is_empty() {
            return Ok(());
        }
        self.submit_group(campaign_id, ready)
    }

    /// Build and submit one locked campaign group. A campaign that can
    /// no longer be loaded routes every job in the group to the
    /// permanent-error path instead of blocking other groups.
    pub(crate) fn submit_group(
        &self,
        campaign_id: u64,
        entries: Vec<MailLogEntry>,
    ) -> Result<()> {
        let campaign = match self.store.campaigns().load_campaign(campaign_id) {
            Ok(campaign) => campaign,
            Err(err) => {
                let reason = format!("loading campaign: {err:#}");
                for entry in &entries {
                    if let Err(err) = self.store.permanent_error(entry, &reason, Utc::now()) {
                        let _ = self.logger.log(
                            LogLevel::Minimal,
                            "failed to error out entry",
                            Some(&format!("rid={} err={err:#}", entry.rid)),
                        );
                    }
                }
                return Err(anyhow!(reason));
            }
        };
        if campaign.status == CampaignStatus::Queued {
            self.store
                .campaigns()
                .set_status(campaign_id, CampaignStatus::InProgress)?;
        }

        let mut batch: Batch = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.queued_mail(&campaign, entry) {
                Ok(mail) => batch.push(Box::new(mail)),
                Err((entry, err)) => {
                    let reason = format!("preparing mail: {err:#}");
                    if let Err(err) = self.store.permanent_error(&entry, &reason, Utc::now()) {
                        let _ = self.logger.log(
                            LogLevel::Minimal,
                            "failed to error out entry",
                            Some(&format!("rid={} err={err:#}", entry.rid)),
                        );
                    }
                }
            }
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.mailer.submit(batch)
    }

    fn queued_mail(
        &self,
        campaign: &Campaign,
        entry: MailLogEntry,
    ) -> Result<QueuedMail, (MailLogEntry, anyhow::Error)> {
        let result = match self.store.campaigns().load_result(&entry.rid) {
            Ok(result) => result,
            Err(err) => return Err((entry, err)),
        };
        let now = Utc::now();
        if let Err(err) = self
            .store
            .campaigns()
            .update_result(&entry.rid, |r| r.mark_sending(now))
        {
            return Err((entry, err));
        }
        Ok(QueuedMail {
            store: self.store.clone(),
            campaign: campaign.clone(),
            recipient: Recipient {
                email: result.email,
                first_name: result.first_name,
                last_name: result.last_name,
                position: result.position,
            },
            entry,
            server_name: self.server_name.clone(),
            contact_address: self.contact_address.clone(),
        })
    }

    /// Synchronous test send. The job travels through the same queue as
    /// campaign mail, but the caller blocks on a rendezvous channel and
    /// every failure, transient included, comes back as a hard error.
    pub fn send_test(&self, campaign: Campaign, recipient: Recipient) -> Result<()> {
        let rid = format!("preview-{}", new_rid());
        let (tx, rx) = mpsc::channel();
        let mail = TestMail {
            campaign,
            recipient,
            rid,
            server_name: self.server_name.clone(),
            contact_address: self.contact_address.clone(),
            tx,
        };
        self.mailer.submit(vec![Box::new(mail)])?;
        match rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(anyhow!("test send failed: {reason}")),
            Err(_) => Err(anyhow!("mailer dropped the test send")),
        }
    }
}

/// Persisted campaign mail: outcomes flow back into the mail log store.
struct QueuedMail {
    store: MailLogStore,
    campaign: Campaign,
    recipient: Recipient,
    entry: MailLogEntry,
    server_name: String,
    contact_address: String,
}

impl Mail for QueuedMail {
    fn profile(&self) -> &crate::model::profile::SendingProfile {
        &self.campaign.profile
    }

    fn build(&self) -> Result<(Envelope, Vec<u8>)> {
        build_campaign_message(
            &self.campaign,
            &self.recipient,
            &self.entry.rid,
            &self.server_name,
            &self.contact_address,
        )
    }

    fn success(&self) -> Result<()> {
        self.store.success(&self.entry, Utc::now())
    }

    fn backoff(&self, reason: &str) -> Result<()> {
        let mut entry = self.entry.clone();
        self.store.backoff(&mut entry, reason, Utc::now()).map(|_| ())
    }

    fn error(&self, reason: &str) -> Result<()> {
        self.store.permanent_error(&self.entry, reason, Utc::now())
    }
}

/// One-shot test mail: no persisted state, the waiting caller gets the
/// outcome over the channel.
struct TestMail {
    campaign: Campaign,
    recipient: Recipient,
    rid: String,
    server_name: String,
    contact_address: String,
    tx: mpsc::Sender<Result<(), String>>,
}

impl Mail for TestMail {
    fn profile(&self) -> &crate::model::profile::SendingProfile {
        &self.campaign.profile
    }

    fn build(&self) -> Result<(Envelope, Vec<u8>)> {
        build_campaign_message(
            &self.campaign,
            &self.recipient,
            &self.rid,
            &self.server_name,
            &self.contact_address,
        )
    }

    fn success(&self) -> Result<()> {
        self.tx
            .send(Ok(()))
            .map_err(|_| anyhow!("test send caller went away"))
    }

    fn backoff(&self, reason: &str) -> Result<()> {
        // A one-shot send has no retry state to fall back on.
        self.error(reason)
    }

    fn error(&self, reason: &str) -> Result<()> {
        self.tx
            .send(Err(reason.to_string()))
            .map_err(|_| anyhow!("test send caller went away"))
    }
}
