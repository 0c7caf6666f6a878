use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One scheduled send. `rid` doubles as the key of the associated
/// CampaignResult. `processing` is the crash-recoverable lock flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailLogEntry {
    pub rid: String,
    pub campaign_id: u64,
    pub user_id: u64,
    pub send_date: DateTime<Utc>,
    #[serde(default)]
    pub send_attempt: u32,
    #[serde(default)]
    pub processing: bool,
}

impl MailLogEntry {
    pub fn new(rid: &str, campaign_id: u64, user_id: u64, send_date: DateTime<Utc>) -> Self {
        Self {
            rid: rid.to_string(),
            campaign_id,
            user_id,
            send_date,
            send_attempt: 0,
            processing: false,
        }
    }

    /// Delay applied by the next backoff cycle: 2^(attempt+1) minutes,
    /// so successive retries wait 2, 4, 8, ... 256 minutes.
    pub fn next_backoff_delay(&self) -> Duration {
        Duration::minutes(1 << (self.send_attempt + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delays_double() {
        let mut entry = MailLogEntry::new("r1", 1, 1, Utc::now());
        let expected = [2, 4, 8, 16, 32, 64, 128, 256];
        for minutes in expected {
            assert_eq!(entry.next_backoff_delay(), Duration::minutes(minutes));
            entry.send_attempt += 1;
        }
    }
}
