use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// SMTP sending profile embedded in a campaign. `host` is "host" or
/// "host:port"; port defaults to 25 when omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendingProfile {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub ignore_cert_errors: bool,
    #[serde(default)]
    pub headers: Vec<ProfileHeader>,
}

/// Custom header attached to every message sent through the profile.
/// Values may contain the same placeholders as template bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileHeader {
    pub key: String,
    pub value: String,
}

impl SendingProfile {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("sending profile name must not be empty");
        }
        if self.host.is_empty() {
            bail!("sending profile {:?} has no host", self.name);
        }
        Ok(())
    }

    pub fn host_and_port(&self) -> Result<(String, u16)> {
        match self.host.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid port in host {:?}", self.host))?;
                Ok((host.to_string(), port))
            }
            None => Ok((self.host.clone(), 25)),
        }
    }
}
