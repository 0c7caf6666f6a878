use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// Email template embedded in a campaign. Subject and bodies may contain
/// handlebars placeholders resolved per recipient at send time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub name: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl MessageTemplate {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("template name must not be empty");
        }
        if self.text.is_empty() && self.html.is_empty() {
            bail!("template {:?} has neither text nor html body", self.name);
        }
        Ok(())
    }
}

/// File attachment stored base64-encoded, decoded at message-build time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub content_type: String,
}

impl Attachment {
    pub fn decoded_content(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(self.content.trim())
            .with_context(|| format!("attachment {:?} is not valid base64", self.name))
    }
}
