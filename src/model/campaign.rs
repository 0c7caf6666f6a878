use anyhow::{Result, bail};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::profile::SendingProfile;
use crate::model::template::MessageTemplate;
use crate::util::time::BusinessHours;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CampaignStatus {
    #[serde(rename = "Queued")]
    Queued,
    #[serde(rename = "In progress")]
    InProgress,
    #[serde(rename = "Completed")]
    Completed,
}

/// One target recipient, as merged from the campaign's groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub position: String,
}

/// A campaign with its embedded template, sending profile, and target
/// list. The sending window (`start_time`/`end_time`/`time_zone`) gates
/// due-selection; empty strings mean no window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: u64,
    pub user_id: u64,
    pub name: String,
    pub status: CampaignStatus,
    pub created_date: DateTime<Utc>,
    pub launch_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_by_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub time_zone: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub from_address: String,
    pub template: MessageTemplate,
    pub profile: SendingProfile,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

impl Campaign {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("campaign name must not be empty");
        }
        self.template.validate()?;
        self.profile.validate()?;
        if self.effective_from().is_empty() {
            bail!(
                "campaign {:?} resolves to no from address (campaign, template, and profile are all empty)",
                self.name
            );
        }
        if let Some(send_by) = self.send_by_date
            && send_by < self.launch_date
        {
            bail!("campaign send-by date precedes its launch date");
        }
        if self.recipients.is_empty() {
            bail!("campaign {:?} has no recipients", self.name);
        }
        Ok(())
    }

    pub fn business_hours(&self) -> Option<BusinessHours> {
        BusinessHours::new(&self.start_time, &self.end_time, &self.time_zone)
    }

    /// Deduplicate the merged target list by email, keeping the first
    /// occurrence of each address.
    pub fn unique_recipients(&self) -> Vec<&Recipient> {
        let mut seen = std::collections::HashSet::new();
        self.recipients
            .iter()
            .filter(|r| seen.insert(r.email.to_lowercase()))
            .collect()
    }

    /// Due time for the idx-th recipient. Without a send-by date all
    /// entries share the launch date; otherwise entries are spread across
    /// the window in whole-minute steps of `window / total`.
    pub fn generate_send_date(&self, idx: usize, total: usize) -> DateTime<Utc> {
        let Some(send_by) = self.send_by_date else {
            return self.launch_date;
        };
        if total <= 1 {
            return self.launch_date;
        }
        let window_minutes = (send_by - self.launch_date).num_minutes();
        let step = window_minutes / total as i64;
        self.launch_date + Duration::minutes(step * idx as i64)
    }

    /// Resolved From address: campaign override, then template default,
    /// then sending-profile default.
    pub fn effective_from(&self) -> &str {
        if !self.from_address.is_empty() {
            &self.from_address
        } else if !self.template.from_address.is_empty() {
            &self.template.from_address
        } else {
            &self.profile.from_address
        }
    }
}
