//! Codec for the "bakery" SSO cookies exchanged with the legacy master
//! system (a Drupal Bakery deployment). Two cookie kinds exist: the
//! oatmeal cookie carries a login handoff, the chocolate-chip cookie
//! carries an authenticated identity assertion.
//!
//! Wire format, outermost first: percent-encoding, base64, then a
//! 64-character hex HMAC-SHA256 signature concatenated with the
//! AES-256-ECB ciphertext of a PHP-serialized map. The format is fixed
//! by the peer and must stay byte-exact.

use std::fmt;
use std::sync::LazyLock;

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use regex::Regex;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const BLOCK: usize = 16;
const OATMEAL_MARKER: &str = "OATMEALSSL";
const CHOCOLATE_CHIP_MARKER: &str = "CHOCOLATECHIPSSL";

// Matches Go's url.QueryEscape: everything outside ALPHA / DIGIT / -_.~
// is %XX-encoded (the base64 alphabet never produces a space).
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""mail";s:\d+:"(\S+?)";"#).expect("static pattern"));
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""name";s:\d+:"(\S+?)";"#).expect("static pattern"));
static ROLES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#""roles";a:\d+:\{.*"(administrator|Partner|Security Awareness User|Child User|LMS User)";.*\}"#,
    )
    .expect("static pattern")
});
static UID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""uid";(?:i:(\d+);|s:\d+:"(\d+)";)"#).expect("static pattern"));
static OATMEAL_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"s:6:"errors";a:\d+:\{s:\d+:"\S+?";s:\d+:"([^<>=;}]+).*?";\}"#)
        .expect("static pattern")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CookieError {
    #[error("unknown cookie type")]
    UnknownCookieType,
    #[error("could not determine user role")]
    UnknownUserRole,
    #[error("could not determine user email")]
    UnknownUserEmail,
    #[error("could not determine user name")]
    UnknownUserName,
    #[error("bad HMAC signature or message")]
    BadSignature,
    #[error("encryption key must be at least 32 bytes, got {0}")]
    ShortKey(usize),
    #[error("malformed cookie: {0}")]
    Malformed(String),
}

/// The closed set of role names the master system hands out. Any other
/// string in a chocolate-chip cookie is a hard decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Administrator,
    Partner,
    SecurityAwarenessUser,
    ChildUser,
    LmsUser,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Administrator,
        Role::Partner,
        Role::SecurityAwarenessUser,
        Role::ChildUser,
        Role::LmsUser,
    ];

    pub fn as_legacy(self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Partner => "Partner",
            Role::SecurityAwarenessUser => "Security Awareness User",
            Role::ChildUser => "Child User",
            Role::LmsUser => "LMS User",
        }
    }

    pub fn from_legacy(s: &str) -> Result<Self, CookieError> {
        match s {
            "administrator" => Ok(Role::Administrator),
            "Partner" => Ok(Role::Partner),
            "Security Awareness User" => Ok(Role::SecurityAwarenessUser),
            "Child User" => Ok(Role::ChildUser),
            "LMS User" => Ok(Role::LmsUser),
            _ => Err(CookieError::UnknownUserRole),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_legacy())
    }
}

/// A decoded cookie. `raw` is the decrypted serialized text, padding
/// included, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub raw: String,
    pub kind: CookieKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieKind {
    /// Login-attempt echo from the master. Error-free logins carry no
    /// error field.
    Oatmeal { error: Option<String> },
    /// Authenticated identity assertion. `bakery_id` is the master
    /// account id, absent in older protocol revisions.
    ChocolateChip {
        user: String,
        email: String,
        role: Role,
        bakery_id: Option<u64>,
    },
}

impl Cookie {
    pub fn is_chocolate_chip(&self) -> bool {
        matches!(self.kind, CookieKind::ChocolateChip { .. })
    }
}

/// Owns the shared secret. The first 32 bytes key the cipher; the whole
/// secret keys the HMAC.
#[derive(Clone)]
pub struct Bakery {
    key: Vec<u8>,
}

impl fmt::Debug for Bakery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bakery").finish_non_exhaustive()
    }
}

impl Bakery {
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self, CookieError> {
        let key = key.into();
        if key.len() < 32 {
            return Err(CookieError::ShortKey(key.len()));
        }
        Ok(Self { key })
    }

    /// Decode and authenticate a cookie. Any failure means the caller
    /// must treat the request as unauthenticated.
    pub fn parse(&self, cookie: &str) -> Result<Cookie, CookieError> {
        let raw = self.decrypt_cookie(cookie)?;
        if raw.contains(OATMEAL_MARKER) {
            let error = OATMEAL_ERROR_RE
                .captures(&raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            return Ok(Cookie {
                raw,
                kind: CookieKind::Oatmeal { error },
            });
        }
        if !raw.contains(CHOCOLATE_CHIP_MARKER) {
            return Err(CookieError::UnknownCookieType);
        }
        let email = EMAIL_RE
            .captures(&raw)
            .and_then(|c| c.get(1))
            .ok_or(CookieError::UnknownUserEmail)?
            .as_str()
            .to_string();
        let user = NAME_RE
            .captures(&raw)
            .and_then(|c| c.get(1))
            .ok_or(CookieError::UnknownUserName)?
            .as_str()
            .to_string();
        let role = ROLES_RE
            .captures(&raw)
            .and_then(|c| c.get(1))
            .ok_or(CookieError::UnknownUserRole)
            .and_then(|m| Role::from_legacy(m.as_str()))?;
        let bakery_id = UID_RE
            .captures(&raw)
            .and_then(|c| c.get(1).or(c.get(2)))
            .and_then(|m| m.as_str().parse().ok());
        Ok(Cookie {
            raw,
            kind: CookieKind::ChocolateChip {
                user,
                email,
                role,
                bakery_id,
            },
        })
    }

    /// Build a login-handoff cookie for the master system.
    pub fn oatmeal_cookie(
        &self,
        username: &str,
        password: &str,
        destination: &str,
        slave: &str,
    ) -> String {
        let data = PhpValue::map(vec![
            ("destination", PhpValue::str(destination)),
            ("name", PhpValue::str(username)),
            ("op", PhpValue::str("Log in")),
            ("pass", PhpValue::str(password)),
            ("query", PhpValue::Arr(Vec::new())),
        ]);
        let props = PhpValue::map(vec![
            ("calories", PhpValue::Int(320)),
            ("data", data),
            ("master", PhpValue::Int(0)),
            ("name", PhpValue::str(username)),
            ("slave", PhpValue::str(slave)),
            ("timestamp", PhpValue::Int(Utc::now().timestamp())),
            ("type", PhpValue::str(OATMEAL_MARKER)),
        ]);
        self.encrypt_serialized(props.to_serialized().as_bytes())
    }

    /// Build an identity-assertion cookie as the master system would.
    /// Used for interop debugging and tests.
    pub fn chocolate_chip_cookie(
        &self,
        username: &str,
        email: &str,
        role: Role,
        bakery_id: Option<u64>,
    ) -> String {
        let data = PhpValue::map(vec![
            ("mail", PhpValue::str(email)),
            ("name", PhpValue::str(username)),
        ]);
        let roles = PhpValue::Arr(vec![
            (PhpValue::Int(2), PhpValue::str("authenticated user")),
            (PhpValue::Int(6), PhpValue::str(role.as_legacy())),
        ]);
        let mut entries = vec![
            ("calories", PhpValue::Int(320)),
            ("data", data),
            ("mail", PhpValue::str(email)),
            ("master", PhpValue::Int(1)),
            ("name", PhpValue::str(username)),
            ("roles", roles),
            ("timestamp", PhpValue::Int(Utc::now().timestamp())),
            ("type", PhpValue::str(CHOCOLATE_CHIP_MARKER)),
        ];
        if let Some(uid) = bakery_id {
            entries.push(("uid", PhpValue::Int(uid as i64)));
        }
        self.encrypt_serialized(PhpValue::map(entries).to_serialized().as_bytes())
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(&self.key).expect("hmac accepts any key size");
        mac.update(message);
        mac.finalize().into_bytes().to_vec()
    }

    fn cipher(&self) -> Aes256 {
        // Key length is checked at construction.
        Aes256::new(GenericArray::from_slice(&self.key[..32]))
    }

    fn encrypt_serialized(&self, plaintext: &[u8]) -> String {
        let mut data = plaintext.to_vec();
        let pad = BLOCK - data.len() % BLOCK;
        data.extend(std::iter::repeat_n(pad as u8, pad));
        let cipher = self.cipher();
        for block in data.chunks_mut(BLOCK) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        let mut payload = hex::encode(self.sign(&data)).into_bytes();
        payload.extend_from_slice(&data);
        utf8_percent_encode(&BASE64.encode(payload), QUERY_ESCAPE).to_string()
    }

    fn decrypt_cookie(&self, cookie: &str) -> Result<String, CookieError> {
        let plussed = cookie.replace('+', " ");
        let unescaped = percent_decode_str(&plussed)
            .decode_utf8()
            .map_err(|err| CookieError::Malformed(format!("bad percent-encoding: {err}")))?;
        let payload = BASE64
            .decode(unescaped.as_bytes())
            .map_err(|err| CookieError::Malformed(format!("bad base64: {err}")))?;
        if payload.len() < 64 || (payload.len() - 64) % BLOCK != 0 {
            return Err(CookieError::Malformed(format!(
                "payload length {} is not signature + whole blocks",
                payload.len()
            )));
        }
        let sig = hex::decode(&payload[..64])
            .map_err(|err| CookieError::Malformed(format!("bad hex signature: {err}")))?;
        let mut data = payload[64..].to_vec();
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(&self.key).expect("hmac accepts any key size");
        mac.update(&data);
        mac.verify_slice(&sig)
            .map_err(|_| CookieError::BadSignature)?;
        let cipher = self.cipher();
        for block in data.chunks_mut(BLOCK) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        // The legacy peer never strips the pkcs7 padding after decrypting;
        // the serialized text is self-delimiting, so the trailing pad
        // bytes stay in place for wire compatibility.
        String::from_utf8(data)
            .map_err(|_| CookieError::Malformed("decrypted payload is not utf-8".to_string()))
    }
}

/// Minimal PHP `serialize()` writer, enough for the cookie payloads.
/// Map keys are emitted in the order given; builders keep them sorted to
/// match the peer's serializer.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PhpValue {
    Str(String),
    Int(i64),
    Arr(Vec<(PhpValue, PhpValue)>),
}

impl PhpValue {
    fn str(s: &str) -> Self {
        PhpValue::Str(s.to_string())
    }

    fn map(entries: Vec<(&str, PhpValue)>) -> Self {
        PhpValue::Arr(
            entries
                .into_iter()
                .map(|(k, v)| (PhpValue::str(k), v))
                .collect(),
        )
    }

    fn to_serialized(&self) -> String {
        let mut out = String::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut String) {
        match self {
            PhpValue::Str(s) => {
                // Length is in bytes, not characters.
                out.push_str(&format!("s:{}:\"{}\";", s.len(), s));
            }
            PhpValue::Int(n) => out.push_str(&format!("i:{n};")),
            PhpValue::Arr(entries) => {
                out.push_str(&format!("a:{}:{{", entries.len()));
                for (key, value) in entries {
                    key.write(out);
                    value.write(out);
                }
                out.push('}');
            }
        }
    }
}
