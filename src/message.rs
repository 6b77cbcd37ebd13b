//! Plaintext messages and their canonical encoding.
//!
//! A message is encoded as CRLF-separated `Name: value` header lines, an
//! empty line, then the raw body bytes. Header order is fixed so encoding is
//! deterministic for identical headers and body.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::address::ParsedAddress;
use crate::hash::content_hash;
use crate::types::{ChainMailError, Result};

/// Default content type for composed messages.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=\"UTF-8\"";

const HEADER_BODY_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Message headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headers {
    /// Sender in `address@network.protocol` form.
    pub from: String,
    /// Recipient in `address@network.protocol` form.
    pub to: String,
    /// Optional reply address.
    pub reply_to: Option<String>,
    /// Composition time, whole seconds.
    pub date: SystemTime,
    /// Free-text subject line.
    pub subject: String,
    /// MIME type of the body.
    pub content_type: String,
}

impl Headers {
    /// Creates headers dated now with the default content type.
    pub fn new(from: impl Into<String>, to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            reply_to: None,
            date: SystemTime::now(),
            subject: subject.into(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }

    /// Set the reply address.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Set the date.
    pub fn with_date(mut self, date: SystemTime) -> Self {
        self.date = date;
        self
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Parsed sender address.
    pub fn from_address(&self) -> Result<ParsedAddress> {
        ParsedAddress::parse(&self.from)
    }

    /// Parsed recipient address.
    pub fn to_address(&self) -> Result<ParsedAddress> {
        ParsedAddress::parse(&self.to)
    }

    /// Returns the Unix timestamp in seconds.
    pub fn unix_timestamp(&self) -> u64 {
        self.date
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }

    fn validate(&self) -> Result<()> {
        self.from_address()?;
        self.to_address()?;
        if let Some(reply_to) = &self.reply_to {
            ParsedAddress::parse(reply_to)?;
        }

        let values = [
            ("From", self.from.as_str()),
            ("To", self.to.as_str()),
            ("Reply-To", self.reply_to.as_deref().unwrap_or_default()),
            ("Subject", self.subject.as_str()),
            ("Content-Type", self.content_type.as_str()),
        ];
        for (name, value) in values {
            if value.contains(['\r', '\n']) {
                return Err(ChainMailError::Format(format!(
                    "header {} contains a line break",
                    name
                )));
            }
        }
        Ok(())
    }

    fn write_lines(&self, out: &mut Vec<u8>) {
        push_header(out, "From", &self.from);
        push_header(out, "To", &self.to);
        if let Some(reply_to) = &self.reply_to {
            push_header(out, "Reply-To", reply_to);
        }
        push_header(out, "Date", &self.unix_timestamp().to_string());
        push_header(out, "Subject", &self.subject);
        push_header(out, "Content-Type", &self.content_type);
    }
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// A plaintext message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Content-derived identifier (hex SHA-256 of headers and body).
    pub id: String,
    /// Message headers.
    pub headers: Headers,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl Message {
    /// Compose a message, validating headers and deriving its ID.
    ///
    /// The date is truncated to whole seconds so the composed message equals
    /// its own decoding.
    pub fn compose(mut headers: Headers, body: impl Into<Vec<u8>>) -> Result<Self> {
        headers.validate()?;
        headers.date = UNIX_EPOCH + Duration::from_secs(headers.unix_timestamp());
        let body = body.into();

        let mut identity = Vec::new();
        headers.write_lines(&mut identity);
        identity.extend_from_slice(b"\r\n");
        identity.extend_from_slice(&body);
        let id = hex::encode(content_hash(&identity));

        Ok(Self { id, headers, body })
    }

    /// Body interpreted as UTF-8, if valid.
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Encode the message to its canonical bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        push_header(&mut out, "Message-ID", &self.id);
        self.headers.write_lines(&mut out);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Decode canonical bytes back into a message.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let split = data
            .windows(HEADER_BODY_SEPARATOR.len())
            .position(|w| w == HEADER_BODY_SEPARATOR)
            .ok_or_else(|| ChainMailError::Format("missing header terminator".to_string()))?;

        let header_text = std::str::from_utf8(&data[..split])
            .map_err(|e| ChainMailError::Format(format!("headers are not UTF-8: {}", e)))?;
        let body = data[split + HEADER_BODY_SEPARATOR.len()..].to_vec();

        let mut id = None;
        let mut from = None;
        let mut to = None;
        let mut reply_to = None;
        let mut date = None;
        let mut subject = String::new();
        let mut content_type = DEFAULT_CONTENT_TYPE.to_string();

        for line in header_text.split("\r\n") {
            let (name, value) = line
                .split_once(": ")
                .ok_or_else(|| ChainMailError::Format(format!("malformed header line: {}", line)))?;
            match name {
                "Message-ID" => id = Some(value.to_string()),
                "From" => from = Some(value.to_string()),
                "To" => to = Some(value.to_string()),
                "Reply-To" => reply_to = Some(value.to_string()),
                "Date" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| ChainMailError::Format(format!("invalid date: {}", value)))?;
                    let parsed = UNIX_EPOCH
                        .checked_add(Duration::from_secs(secs))
                        .ok_or_else(|| ChainMailError::Format(format!("date out of range: {}", value)))?;
                    date = Some(parsed);
                }
                "Subject" => subject = value.to_string(),
                "Content-Type" => content_type = value.to_string(),
                _ => {}
            }
        }

        let missing = |name: &str| ChainMailError::Format(format!("missing {} header", name));
        Ok(Self {
            id: id.ok_or_else(|| missing("Message-ID"))?,
            headers: Headers {
                from: from.ok_or_else(|| missing("From"))?,
                to: to.ok_or_else(|| missing("To"))?,
                reply_to,
                date: date.ok_or_else(|| missing("Date"))?,
                subject,
                content_type,
            },
            body,
        })
    }
}
