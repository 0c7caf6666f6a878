use std::{collections::HashMap, fs, path::Path, str::FromStr};

use anyhow::{Context, Result};

/// Deployment configuration, loaded from a plain key=value env file.
/// Unknown keys are ignored; missing keys fall back to defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvConfig {
    pub logging: String,
    pub server_name: String,
    pub contact_address: String,
    pub max_send_attempts: u32,
    pub mailer_queue_depth: usize,
    pub disable_mailer: bool,
    pub bakery_key: Option<String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            logging: "minimal".into(),
            server_name: "angler".into(),
            contact_address: String::new(),
            max_send_attempts: 8,
            mailer_queue_depth: 16,
            disable_mailer: false,
            bakery_key: None,
        }
    }
}

impl EnvConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let data =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        data.parse()
    }

    pub fn parse_env(data: &str) -> Result<Self> {
        let mut map = HashMap::new();
        for (idx, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                anyhow::bail!("invalid line {}: {}", idx + 1, line);
            };
            map.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
        Ok(Self {
            logging: map
                .get("logging")
                .cloned()
                .unwrap_or_else(|| Self::default().logging),
            server_name: map
                .get("server_name")
                .cloned()
                .unwrap_or_else(|| Self::default().server_name),
            contact_address: map
                .get("contact_address")
                .cloned()
                .unwrap_or_else(|| Self::default().contact_address),
            max_send_attempts: map
                .get("max_send_attempts")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| Self::default().max_send_attempts),
            mailer_queue_depth: map
                .get("mailer_queue_depth")
                .and_then(|v| v.parse().ok())
                .filter(|depth| *depth > 0)
                .unwrap_or_else(|| Self::default().mailer_queue_depth),
            disable_mailer: map
                .get("disable_mailer")
                .map(|v| matches!(v.as_str(), "true" | "1" | "yes"))
                .unwrap_or_else(|| Self::default().disable_mailer),
            bakery_key: map.get("bakery_key").cloned().filter(|k| !k.is_empty()),
        })
    }

    pub fn to_env_string(&self) -> String {
        format!(
            concat!(
                "logging={}\n",
                "server_name={}\n",
                "contact_address={}\n",
                "max_send_attempts={}\n",
                "mailer_queue_depth={}\n",
                "disable_mailer={}\n",
                "bakery_key={}\n"
            ),
            self.logging,
            self.server_name,
            self.contact_address,
            self.max_send_attempts,
            self.mailer_queue_depth,
            bool_to_env(self.disable_mailer),
            self.bakery_key.as_deref().unwrap_or("")
        )
    }
}

impl FromStr for EnvConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_env(s)
    }
}

fn bool_to_env(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}
