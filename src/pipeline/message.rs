use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use handlebars::Handlebars;
use lettre::address::{Address, Envelope};
use lettre::message::header::ContentType;
use lettre::message::{Attachment as FilePart, Body, Mailbox, Message, MultiPart, SinglePart};
use serde::Serialize;

use crate::model::campaign::{Campaign, Recipient};

/// Interpolation context handed to subject, body, and custom-header
/// templates. Field names are part of the template contract.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    #[serde(rename = "FirstName")]
    pub first_name: String,
    #[serde(rename = "LastName")]
    pub last_name: String,
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "Position")]
    pub position: String,
    #[serde(rename = "RId")]
    pub rid: String,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "BaseURL")]
    pub base_url: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "TrackingURL")]
    pub tracking_url: String,
    #[serde(rename = "Tracker")]
    pub tracker: String,
}

impl TemplateContext {
    pub fn new(campaign: &Campaign, recipient: &Recipient, rid: &str) -> Result<Self> {
        let from = parse_mailbox(campaign.effective_from())?;
        let display_from = match &from.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => from.email.to_string(),
        };
        let base_url = interpolate_recipient(&campaign.url, recipient)?;
        let base = base_url.trim_end_matches('/');
        let url = format!("{base}?rid={rid}");
        let tracking_url = format!("{base}/track?rid={rid}");
        let tracker =
            format!("<img alt='' style='display: none' src='{tracking_url}'/>");
        Ok(Self {
            first_name: recipient.first_name.clone(),
            last_name: recipient.last_name.clone(),
            email: recipient.email.clone(),
            position: recipient.position.clone(),
            rid: rid.to_string(),
            from: display_from,
            base_url,
            url,
            tracking_url,
            tracker,
        })
    }
}

pub fn interpolate(template: &str, ctx: &TemplateContext) -> Result<String> {
    render(template, ctx)
}

// The base URL itself may reference recipient fields, so it is rendered
// against the bare recipient before the full context exists.
fn interpolate_recipient(template: &str, recipient: &Recipient) -> Result<String> {
    #[derive(Serialize)]
    struct RecipientContext<'a> {
        #[serde(rename = "FirstName")]
        first_name: &'a str,
        #[serde(rename = "LastName")]
        last_name: &'a str,
        #[serde(rename = "Email")]
        email: &'a str,
        #[serde(rename = "Position")]
        position: &'a str,
    }
    render(
        template,
        &RecipientContext {
            first_name: &recipient.first_name,
            last_name: &recipient.last_name,
            email: &recipient.email,
            position: &recipient.position,
        },
    )
}

fn render<T: Serialize>(template: &str, ctx: &T) -> Result<String> {
    if !template.contains("{{") {
        return Ok(template.to_string());
    }
    let mut handlebars = Handlebars::new();
    // Values go into plain-text bodies and URLs as-is; entity escaping
    // would corrupt the rid query parameter and the tracker markup.
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
        .render_template(template, ctx)
        .with_context(|| format!("rendering template {template:?}"))
}

fn parse_mailbox(value: &str) -> Result<Mailbox> {
    Mailbox::from_str(value).map_err(|err| anyhow!("invalid address {value:?}: {err}"))
}

/// Build the fully rendered outgoing message for one recipient: resolved
/// From chain, interpolated subject and bodies, decoded attachments, and
/// the transparency and custom profile headers.
pub fn build_campaign_message(
    campaign: &Campaign,
    recipient: &Recipient,
    rid: &str,
    server_name: &str,
    contact_address: &str,
) -> Result<(Envelope, Vec<u8>)> {
    let ctx = TemplateContext::new(campaign, recipient, rid)?;
    let from = parse_mailbox(campaign.effective_from())?;
    let to_address = Address::from_str(&recipient.email)
        .map_err(|err| anyhow!("invalid recipient {:?}: {err}", recipient.email))?;
    let to_name = match format!("{} {}", recipient.first_name, recipient.last_name)
        .trim()
        .to_string()
    {
        name if name.is_empty() => None,
        name => Some(name),
    };
    let to = Mailbox::new(to_name, to_address.clone());

    let mut builder = Message::builder()
        .from(from.clone())
        .to(to)
        .date_now();
    let subject = interpolate(&campaign.template.subject, &ctx)?;
    if !subject.is_empty() {
        builder = builder.subject(subject);
    }

    let text = if campaign.template.text.is_empty() {
        None
    } else {
        Some(interpolate(&campaign.template.text, &ctx)?)
    };
    let html = if campaign.template.html.is_empty() {
        None
    } else {
        Some(interpolate(&campaign.template.html, &ctx)?)
    };
    let body_part = match (text, html) {
        (Some(text), Some(html)) => BodyPart::Multi(MultiPart::alternative_plain_html(text, html)),
        (Some(text), None) => BodyPart::Single(SinglePart::plain(text)),
        (None, Some(html)) => BodyPart::Single(SinglePart::html(html)),
        (None, None) => return Err(anyhow!("template has neither text nor html body")),
    };

    let message = if campaign.template.attachments.is_empty() {
        match body_part {
            BodyPart::Multi(part) => builder.multipart(part)?,
            BodyPart::Single(part) => builder.singlepart(part)?,
        }
    } else {
        let mut mixed = match body_part {
            BodyPart::Multi(part) => MultiPart::mixed().multipart(part),
            BodyPart::Single(part) => MultiPart::mixed().singlepart(part),
        };
        for attachment in &campaign.template.attachments {
            let content = attachment.decoded_content()?;
            let content_type = ContentType::parse(&attachment.content_type)
                .unwrap_or(ContentType::parse("application/octet-stream").expect("static type"));
            mixed = mixed
                .singlepart(FilePart::new(attachment.name.clone()).body(
                    Body::new(content),
                    content_type,
                ));
        }
        builder.multipart(mixed)?
    };

    // lettre's builder rejects arbitrary header names, so the
    // transparency and profile headers are prepended as raw lines.
    let mut raw = Vec::new();
    push_header(&mut raw, "X-Sender", "X-PHISHTEST");
    push_header(&mut raw, "X-Mailer", server_name);
    if !contact_address.is_empty() {
        push_header(&mut raw, "X-Angler-Contact", contact_address);
    }
    for header in &campaign.profile.headers {
        let key = interpolate(&header.key, &ctx)?;
        let value = interpolate(&header.value, &ctx)?;
        push_header(&mut raw, &key, &value);
    }
    raw.extend_from_slice(&message.formatted());

    let envelope = Envelope::new(Some(from.email.clone()), vec![to_address])
        .map_err(|err| anyhow!("building envelope: {err}"))?;
    Ok((envelope, raw))
}

enum BodyPart {
    Multi(MultiPart),
    Single(SinglePart),
}

fn push_header(raw: &mut Vec<u8>, key: &str, value: &str) {
    // Interpolated values must not be able to inject header lines.
    let key = key.replace(['\r', '\n'], " ");
    let value = value.replace(['\r', '\n'], " ");
    raw.extend_from_slice(format!("{key}: {value}\r\n").as_bytes());
}
