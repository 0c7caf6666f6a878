use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::time::Duration;

use anyhow::{Result, anyhow};
use lettre::Transport;
use lettre::address::Envelope;
use lettre::transport::smtp::SmtpTransport;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};

use crate::model::profile::SendingProfile;
use crate::util::logging::{LogLevel, Logger};

/// Delivery failure, split by whether a retry can help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    Transient(String),
    Permanent(String),
}

impl SendError {
    pub fn reason(&self) -> &str {
        match self {
            SendError::Transient(r) | SendError::Permanent(r) => r,
        }
    }
}

pub trait MailTransport: Send + Sync {
    fn send(&self, envelope: &Envelope, message: &[u8]) -> Result<(), SendError>;
}

/// One unit of outgoing mail plus its outcome callbacks. The mailer only
/// ever talks to jobs through this trait; queued campaign mail and
/// synchronous test mail both implement it.
pub trait Mail: Send {
    fn profile(&self) -> &SendingProfile;
    fn build(&self) -> Result<(Envelope, Vec<u8>)>;
    fn success(&self) -> Result<()>;
    fn backoff(&self, reason: &str) -> Result<()>;
    fn error(&self, reason: &str) -> Result<()>;
}

pub type Batch = Vec<Box<dyn Mail>>;

pub trait TransportFactory: Send + Sync {
    fn transport(&self, profile: &SendingProfile) -> Result<Arc<dyn MailTransport>>;
}

/// SMTP transport for one sending profile, lettre-backed.
pub struct SmtpRelay {
    inner: SmtpTransport,
}

impl SmtpRelay {
    pub fn for_profile(profile: &SendingProfile) -> Result<Self> {
        let (host, port) = profile.host_and_port()?;
        let mut builder = match SmtpTransport::relay(&host) {
            Ok(builder) => builder,
            Err(_) => SmtpTransport::builder_dangerous(&host),
        };
        builder = builder.port(port);
        if !profile.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                profile.username.clone(),
                profile.password.clone(),
            ));
        }
        if profile.ignore_cert_errors {
            let tls = TlsParameters::builder(host)
                .dangerous_accept_invalid_certs(true)
                .dangerous_accept_invalid_hostnames(true)
                .build()
                .map_err(|err| anyhow!("building tls parameters: {err}"))?;
            builder = builder.tls(Tls::Opportunistic(tls));
        }
        Ok(Self {
            inner: builder.build(),
        })
    }
}

impl MailTransport for SmtpRelay {
    fn send(&self, envelope: &Envelope, message: &[u8]) -> Result<(), SendError> {
        self.inner.send_raw(envelope, message).map(|_| ()).map_err(|err| {
            // 5xx replies are final; 4xx and connection-level failures
            // are worth retrying.
            if err.is_permanent() {
                SendError::Permanent(err.to_string())
            } else {
                SendError::Transient(err.to_string())
            }
        })
    }
}

pub struct SmtpFactory;

impl TransportFactory for SmtpFactory {
    fn transport(&self, profile: &SendingProfile) -> Result<Arc<dyn MailTransport>> {
        Ok(Arc::new(SmtpRelay::for_profile(profile)?))
    }
}

/// Submission handle for the bounded batch queue. `submit` blocks while
/// the queue is full, which is the backpressure signal to the scheduler.
#[derive(Clone)]
pub struct Mailer {
    tx: SyncSender<Batch>,
}

impl Mailer {
    pub fn submit(&self, batch: Batch) -> Result<()> {
        self.tx
            .send(batch)
            .map_err(|_| anyhow!("mailer queue is closed"))
    }
}

/// Consumer half: drains the queue one batch at a time on its own
/// thread.
pub struct MailerWorker {
    rx: Receiver<Batch>,
    factory: Arc<dyn TransportFactory>,
    logger: Logger,
}

pub fn mailer(
    queue_depth: usize,
    factory: Arc<dyn TransportFactory>,
    logger: Logger,
) -> (Mailer, MailerWorker) {
    let (tx, rx) = sync_channel(queue_depth);
    (Mailer { tx }, MailerWorker { rx, factory, logger })
}

impl MailerWorker {
    pub fn run(self, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::SeqCst) {
            match self.rx.recv_timeout(Duration::from_secs(1)) {
                Ok(batch) => self.process_batch(batch),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Dispatch one batch. Jobs run sequentially; one transport is opened
    /// per distinct sending profile encountered in the batch.
    pub fn process_batch(&self, batch: Batch) {
        let mut transports: Vec<(SendingProfile, Arc<dyn MailTransport>)> = Vec::new();
        for mail in batch {
            let profile = mail.profile().clone();
            let transport = match transports.iter().find(|(p, _)| *p == profile) {
                Some((_, transport)) => transport.clone(),
                None => match self.factory.transport(&profile) {
                    Ok(transport) => {
                        transports.push((profile.clone(), transport.clone()));
                        transport
                    }
                    Err(err) => {
                        self.finish(mail.error(&format!("opening transport: {err:#}")));
                        continue;
                    }
                },
            };
            let (envelope, message) = match mail.build() {
                Ok(parts) => parts,
                Err(err) => {
                    self.finish(mail.error(&format!("building message: {err:#}")));
                    continue;
                }
            };
            match transport.send(&envelope, &message) {
                Ok(()) => self.finish(mail.success()),
                Err(SendError::Transient(reason)) => self.finish(mail.backoff(&reason)),
                Err(SendError::Permanent(reason)) => self.finish(mail.error(&reason)),
            }
        }
    }

    fn finish(&self, outcome: Result<()>) {
        if let Err(err) = outcome {
            let _ = self.logger.log(
                LogLevel::Minimal,
                "mail outcome handler failed",
                Some(&format!("{err:#}")),
            );
        }
    }
}
