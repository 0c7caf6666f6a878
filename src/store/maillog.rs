use std::collections::HashMap;
use std::fs;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::fsops::io_atom;
use crate::model::campaign::{Campaign, CampaignStatus};
use crate::model::maillog::MailLogEntry;
use crate::store::campaign::CampaignStore;
use crate::util::logging::{LogLevel, Logger};

pub const ERR_MAX_SEND_ATTEMPTS: &str = "Max send attempts exceeded";

/// Outcome of a backoff cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffOutcome {
    /// Entry rescheduled; carries the new due time.
    Rescheduled(DateTime<Utc>),
    /// Attempts exhausted; the result was marked errored and the entry
    /// deleted.
    Exhausted,
}

/// Persisted queue of pending sends, one YAML sidecar per entry under
/// `queue/<rid>.yml`. Owns the backoff state machine and the lock-flag
/// discipline the scheduler and mailer rely on.
#[derive(Debug, Clone)]
pub struct MailLogStore {
    campaigns: CampaignStore,
    logger: Logger,
    max_attempts: u32,
}

impl MailLogStore {
    pub fn new(campaigns: CampaignStore, logger: Logger, max_attempts: u32) -> Self {
        Self {
            campaigns,
            logger,
            max_attempts,
        }
    }

    pub fn campaigns(&self) -> &CampaignStore {
        &self.campaigns
    }

    pub fn save(&self, entry: &MailLogEntry) -> Result<()> {
        let body = serde_yaml::to_string(entry).context("serializing mail log entry")?;
        io_atom::write_atomic(
            &self.campaigns.layout().queue_file(&entry.rid),
            body.as_bytes(),
        )
    }

    pub fn load(&self, rid: &str) -> Result<MailLogEntry> {
        let path = self.campaigns.layout().queue_file(rid);
        let body = io_atom::read_to_string(&path)
            .with_context(|| format!("mail log entry {rid} not found"))?;
        serde_yaml::from_str(&body).with_context(|| format!("parsing mail log entry {rid}"))
    }

    pub fn delete(&self, rid: &str) -> Result<()> {
        let path = self.campaigns.layout().queue_file(rid);
        fs::remove_file(&path).with_context(|| format!("deleting mail log entry {rid}"))
    }

    pub fn all(&self) -> Result<Vec<MailLogEntry>> {
        self.scan(true)
    }

    fn scan(&self, strict: bool) -> Result<Vec<MailLogEntry>> {
        let dir = self.campaigns.layout().queue();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&dir).context("reading queue directory")? {
            let dirent = dirent?;
            let name = dirent.file_name();
            let Some(rid) = name.to_str().and_then(|n| n.strip_suffix(".yml")) else {
                continue;
            };
            match self.load(rid) {
                Ok(entry) => entries.push(entry),
                Err(err) if !strict => {
                    let _ = self.logger.log(
                        LogLevel::Minimal,
                        "skipping unreadable mail log entry",
                        Some(&format!("rid={rid} err={err:#}")),
                    );
                }
                Err(err) => return Err(err),
            }
        }
        entries.sort_by(|a, b| a.send_date.cmp(&b.send_date).then(a.rid.cmp(&b.rid)));
        Ok(entries)
    }

    pub fn entries_for_campaign(&self, campaign_id: u64) -> Result<Vec<MailLogEntry>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|e| e.campaign_id == campaign_id)
            .collect())
    }

    /// Select every unlocked entry that is due at `now` and inside its
    /// campaign's sending window. Window evaluation failures exclude the
    /// entry and are logged, never fatal.
    pub fn select_due(&self, now: DateTime<Utc>) -> Result<Vec<MailLogEntry>> {
        let mut cache: HashMap<u64, Option<Campaign>> = HashMap::new();
        let mut due = Vec::new();
        for entry in self.scan(false)? {
            if entry.processing || entry.send_date > now {
                continue;
            }
            let campaign = cache.entry(entry.campaign_id).or_insert_with(|| {
                match self.campaigns.load_campaign(entry.campaign_id) {
                    Ok(c) => Some(c),
                    Err(err) => {
                        let _ = self.logger.log(
                            LogLevel::Minimal,
                            "skipping entries for unreadable campaign",
                            Some(&format!("campaign={} err={err:#}", entry.campaign_id)),
                        );
                        None
                    }
                }
            });
            let Some(campaign) = campaign else { continue };
            if self.within_window(campaign, now) {
                due.push(entry);
            }
        }
        Ok(due)
    }

    /// Whether a single entry is due at `now`, ignoring its lock flag.
    /// Used by the immediate-launch path after the batch lock is taken.
    pub fn is_due(&self, entry: &MailLogEntry, now: DateTime<Utc>) -> bool {
        if entry.send_date > now {
            return false;
        }
        match self.campaigns.load_campaign(entry.campaign_id) {
            Ok(campaign) => self.within_window(&campaign, now),
            Err(_) => false,
        }
    }

    fn within_window(&self, campaign: &Campaign, now: DateTime<Utc>) -> bool {
        let Some(window) = campaign.business_hours() else {
            return true;
        };
        if !window.zone_is_valid() {
            let _ = self.logger.log(
                LogLevel::Minimal,
                "campaign has an unknown time zone, using UTC",
                Some(&format!(
                    "campaign={} zone={:?}",
                    campaign.id, campaign.time_zone
                )),
            );
        }
        match window.contains(now) {
            Ok(inside) => inside,
            Err(err) => {
                let _ = self.logger.log(
                    LogLevel::Minimal,
                    "campaign sending window is malformed",
                    Some(&format!("campaign={} err={err:#}", campaign.id)),
                );
                false
            }
        }
    }

    /// All-or-nothing batch lock. On a persistence failure every entry
    /// already locked in this call is rolled back before returning.
    pub fn lock(&self, entries: &mut [MailLogEntry]) -> Result<()> {
        for idx in 0..entries.len() {
            entries[idx].processing = true;
            if let Err(err) = self.save(&entries[idx]) {
                for rolled in entries[..=idx].iter_mut() {
                    rolled.processing = false;
                    let _ = self.save(rolled);
                }
                return Err(err.context("locking mail log batch"));
            }
        }
        Ok(())
    }

    pub fn unlock(&self, entry: &mut MailLogEntry) -> Result<()> {
        entry.processing = false;
        self.save(entry)
    }

    /// Startup crash recovery: clear the lock flag on every persisted
    /// entry. Returns how many were unlocked.
    pub fn unlock_all(&self) -> Result<usize> {
        let mut unlocked = 0;
        for mut entry in self.all()? {
            if entry.processing {
                entry.processing = false;
                self.save(&entry)?;
                unlocked += 1;
            }
        }
        Ok(unlocked)
    }

    /// Transient-failure path. Below the attempt cap the entry is
    /// rescheduled `2^attempt` minutes past its previous due time and
    /// unlocked; at the cap the result is permanently errored and the
    /// entry deleted.
    pub fn backoff(
        &self,
        entry: &mut MailLogEntry,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<BackoffOutcome> {
        if entry.send_attempt >= self.max_attempts {
            self.permanent_error(entry, ERR_MAX_SEND_ATTEMPTS, now)?;
            return Ok(BackoffOutcome::Exhausted);
        }
        let delay = entry.next_backoff_delay();
        entry.send_attempt += 1;
        entry.send_date += delay;
        entry.processing = false;
        self.save(entry)?;
        let next = entry.send_date;
        self.campaigns
            .update_result(&entry.rid, |r| r.record_retry(now, reason, next))?;
        let _ = self.logger.log(
            LogLevel::VerboseSanitized,
            "send backed off",
            Some(&format!(
                "rid={} attempt={} next={next}",
                entry.rid, entry.send_attempt
            )),
        );
        Ok(BackoffOutcome::Rescheduled(next))
    }

    /// Terminal success: result marked sent, entry deleted.
    pub fn success(&self, entry: &MailLogEntry, now: DateTime<Utc>) -> Result<()> {
        self.campaigns
            .update_result(&entry.rid, |r| r.mark_sent(now))?;
        self.delete(&entry.rid)?;
        self.maybe_complete_campaign(entry.campaign_id)
    }

    /// Terminal failure: result marked errored with the reason, entry
    /// deleted.
    pub fn permanent_error(
        &self,
        entry: &MailLogEntry,
        details: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.campaigns
            .update_result(&entry.rid, |r| r.mark_error(now, details))?;
        self.delete(&entry.rid)?;
        self.maybe_complete_campaign(entry.campaign_id)
    }

    /// Bulk removal when a campaign is deleted.
    pub fn delete_campaign(&self, campaign_id: u64) -> Result<usize> {
        let entries = self.entries_for_campaign(campaign_id)?;
        let removed = entries.len();
        for entry in entries {
            self.delete(&entry.rid)?;
        }
        Ok(removed)
    }

    fn maybe_complete_campaign(&self, campaign_id: u64) -> Result<()> {
        if self.entries_for_campaign(campaign_id)?.is_empty() {
            self.campaigns
                .set_status(campaign_id, CampaignStatus::Completed)?;
            let _ = self.logger.log(
                LogLevel::Minimal,
                "campaign completed",
                Some(&format!("campaign={campaign_id}")),
            );
        }
        Ok(())
    }
}
