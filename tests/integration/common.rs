use std::sync::Arc;
use std::time::{Duration, Instant};

use angler::model::campaign::{Campaign, CampaignStatus, Recipient};
use angler::model::profile::SendingProfile;
use angler::model::template::MessageTemplate;
use angler::pipeline::mailer::{MailTransport, SendError, TransportFactory};
use chrono::{Duration as ChronoDuration, Utc};
use lettre::address::Envelope;
use parking_lot::Mutex;

/// In-memory stand-in for an SMTP relay with a scriptable outcome.
pub struct MemoryTransport {
    pub sent: Mutex<Vec<(Envelope, Vec<u8>)>>,
    pub outcome: Mutex<Option<SendError>>,
}

impl MemoryTransport {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            outcome: Mutex::new(None),
        })
    }

    pub fn failing(outcome: SendError) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            outcome: Mutex::new(Some(outcome)),
        })
    }
}

impl MailTransport for MemoryTransport {
    fn send(&self, envelope: &Envelope, message: &[u8]) -> Result<(), SendError> {
        self.sent.lock().push((envelope.clone(), message.to_vec()));
        match &*self.outcome.lock() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

pub struct MemoryFactory(pub Arc<MemoryTransport>);

impl TransportFactory for MemoryFactory {
    fn transport(&self, _profile: &SendingProfile) -> anyhow::Result<Arc<dyn MailTransport>> {
        Ok(self.0.clone())
    }
}

pub fn sample_campaign(recipients: Vec<Recipient>) -> Campaign {
    Campaign {
        id: 0,
        user_id: 1,
        name: "quarterly drill".into(),
        status: CampaignStatus::Queued,
        created_date: Utc::now(),
        launch_date: Utc::now() - ChronoDuration::minutes(5),
        send_by_date: None,
        start_time: String::new(),
        end_time: String::new(),
        time_zone: String::new(),
        url: "http://landing.example.org/login".into(),
        from_address: "IT Desk <it@example.org>".into(),
        template: MessageTemplate {
            name: "password notice".into(),
            subject: "Action required, {{FirstName}}".into(),
            text: "Hi {{FirstName}}, please visit {{URL}}".into(),
            html: String::new(),
            from_address: String::new(),
            attachments: Vec::new(),
        },
        profile: SendingProfile {
            name: "relay".into(),
            host: "127.0.0.1:1025".into(),
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            ignore_cert_errors: false,
            headers: Vec::new(),
        },
        recipients,
    }
}

pub fn recipient(email: &str, first_name: &str) -> Recipient {
    Recipient {
        email: email.into(),
        first_name: first_name.into(),
        last_name: String::new(),
        position: String::new(),
    }
}

/// Poll `check` until it returns true or the timeout expires.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    check()
}
