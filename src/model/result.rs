use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Per-recipient delivery status. Serialized with the legacy display
/// strings the master system's dashboard expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    #[serde(rename = "Scheduled")]
    Scheduled,
    #[serde(rename = "Sending")]
    Sending,
    #[serde(rename = "Email Sent")]
    Sent,
    #[serde(rename = "Error")]
    Error,
    #[serde(rename = "Email Opened")]
    Opened,
    #[serde(rename = "Clicked Link")]
    Clicked,
    #[serde(rename = "Submitted Data")]
    SubmittedData,
}

impl ResultStatus {
    pub fn label(self) -> &'static str {
        match self {
            ResultStatus::Scheduled => "Scheduled",
            ResultStatus::Sending => "Sending",
            ResultStatus::Sent => "Email Sent",
            ResultStatus::Error => "Error",
            ResultStatus::Opened => "Email Opened",
            ResultStatus::Clicked => "Clicked Link",
            ResultStatus::SubmittedData => "Submitted Data",
        }
    }
}

/// Timeline entry on a result. Transient send failures land here as
/// non-terminal events so the campaign owner can see retries happening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEvent {
    pub time: DateTime<Utc>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Authoritative per-recipient outcome record. The mail pipeline is the
/// sole writer of the `Sending`/`Sent`/`Error` transitions; open/click
/// statuses come from tracking handlers outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignResult {
    pub rid: String,
    pub campaign_id: u64,
    pub user_id: u64,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub position: String,
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(default)]
    pub events: Vec<ResultEvent>,
}

pub fn new_rid() -> String {
    Ulid::new().to_string().to_lowercase()
}

impl CampaignResult {
    pub fn mark_sending(&mut self, now: DateTime<Utc>) {
        self.status = ResultStatus::Sending;
        self.send_date = Some(now);
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = ResultStatus::Sent;
        self.send_date = Some(now);
        self.error_details = None;
    }

    pub fn mark_error(&mut self, now: DateTime<Utc>, details: &str) {
        self.status = ResultStatus::Error;
        self.error_details = Some(details.to_string());
        self.events.push(ResultEvent {
            time: now,
            message: "Error Sending Email".to_string(),
            details: Some(details.to_string()),
        });
    }

    pub fn record_retry(&mut self, now: DateTime<Utc>, reason: &str, next: DateTime<Utc>) {
        self.status = ResultStatus::Scheduled;
        self.send_date = Some(next);
        self.events.push(ResultEvent {
            time: now,
            message: "Error Sending Email".to_string(),
            details: Some(format!("{reason} (retry scheduled for {next})")),
        });
    }
}
