use std::fs;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::fsops::io_atom;
use crate::fsops::layout::StoreLayout;
use crate::model::campaign::{Campaign, CampaignStatus};
use crate::model::maillog::MailLogEntry;
use crate::model::result::{CampaignResult, ResultStatus, new_rid};

/// YAML-file-backed store for campaigns and their per-recipient results.
/// One sidecar per campaign under `campaigns/`, one per result under
/// `results/`.
#[derive(Debug, Clone)]
pub struct CampaignStore {
    layout: StoreLayout,
}

impl CampaignStore {
    pub fn new(layout: StoreLayout) -> Result<Self> {
        layout.ensure()?;
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn save_campaign(&self, campaign: &Campaign) -> Result<()> {
        let body = serde_yaml::to_string(campaign).context("serializing campaign")?;
        io_atom::write_atomic(&self.layout.campaign_file(campaign.id), body.as_bytes())
    }

    pub fn load_campaign(&self, id: u64) -> Result<Campaign> {
        let path = self.layout.campaign_file(id);
        let body = io_atom::read_to_string(&path)
            .with_context(|| format!("campaign {id} not found"))?;
        serde_yaml::from_str(&body).with_context(|| format!("parsing campaign {id}"))
    }

    pub fn set_status(&self, id: u64, status: CampaignStatus) -> Result<()> {
        let mut campaign = self.load_campaign(id)?;
        if campaign.status != status {
            campaign.status = status;
            self.save_campaign(&campaign)?;
        }
        Ok(())
    }

    pub fn campaign_ids(&self) -> Result<Vec<u64>> {
        let dir = self.layout.campaigns();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir).context("reading campaigns directory")? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".yml")) else {
                continue;
            };
            if let Ok(id) = stem.parse() {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn next_campaign_id(&self) -> Result<u64> {
        Ok(self.campaign_ids()?.last().map_or(1, |last| last + 1))
    }

    pub fn save_result(&self, result: &CampaignResult) -> Result<()> {
        let body = serde_yaml::to_string(result).context("serializing result")?;
        io_atom::write_atomic(&self.layout.result_file(&result.rid), body.as_bytes())
    }

    pub fn load_result(&self, rid: &str) -> Result<CampaignResult> {
        let path = self.layout.result_file(rid);
        let body =
            io_atom::read_to_string(&path).with_context(|| format!("result {rid} not found"))?;
        serde_yaml::from_str(&body).with_context(|| format!("parsing result {rid}"))
    }

    /// Every result recorded for one campaign, ordered by email for
    /// stable listings.
    pub fn results_for_campaign(&self, campaign_id: u64) -> Result<Vec<CampaignResult>> {
        let dir = self.layout.results();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(&dir).context("reading results directory")? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(rid) = name.to_str().and_then(|n| n.strip_suffix(".yml")) else {
                continue;
            };
            let result = self.load_result(rid)?;
            if result.campaign_id == campaign_id {
                results.push(result);
            }
        }
        results.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(results)
    }

    pub fn update_result(
        &self,
        rid: &str,
        mutate: impl FnOnce(&mut CampaignResult),
    ) -> Result<()> {
        let mut result = self.load_result(rid)?;
        mutate(&mut result);
        self.save_result(&result)
    }

    /// Register a campaign: validate, deduplicate the target list, create
    /// one Scheduled result per unique recipient with a spread send date,
    /// and persist the campaign. Returns the mail-log entries the caller
    /// hands to the queue.
    pub fn create_campaign(&self, campaign: &mut Campaign) -> Result<Vec<MailLogEntry>> {
        campaign.validate()?;
        if campaign.id == 0 {
            campaign.id = self.next_campaign_id()?;
        }
        let unique: Vec<_> = campaign
            .unique_recipients()
            .into_iter()
            .cloned()
            .collect();
        let total = unique.len();
        let mut entries = Vec::with_capacity(total);
        for (idx, recipient) in unique.iter().enumerate() {
            let rid = new_rid();
            let send_date = campaign.generate_send_date(idx, total);
            let result = CampaignResult {
                rid: rid.clone(),
                campaign_id: campaign.id,
                user_id: campaign.user_id,
                email: recipient.email.clone(),
                first_name: recipient.first_name.clone(),
                last_name: recipient.last_name.clone(),
                position: recipient.position.clone(),
                status: ResultStatus::Scheduled,
                send_date: Some(send_date),
                error_details: None,
                events: Vec::new(),
            };
            self.save_result(&result)?;
            entries.push(MailLogEntry::new(
                &rid,
                campaign.id,
                campaign.user_id,
                send_date,
            ));
        }
        self.save_campaign(campaign)?;
        Ok(entries)
    }

    /// Terminal timestamp helper shared by outcome writers.
    pub fn now() -> DateTime<Utc> {
        Utc::now()
    }
}
