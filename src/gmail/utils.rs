//! Gmail utility functions
//!
//! RFC 2822 message building, base64url handling and MIME body extraction.

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

use crate::error::{GmailMcpError, Result, ValidationError};
use crate::gmail::types::{EmailContent, Message, MessagePart};

const CRLF: &str = "\r\n";

/// Whether `email` looks like a deliverable address
pub fn validate_email(email: &str) -> bool {
    let mut parts = email.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        _ => return false,
    };

    !local.is_empty()
        && !local.contains(' ')
        && !domain.contains(' ')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// RFC 2047 encode a header value when it is not plain ASCII
pub fn encode_mime_header(text: &str) -> String {
    if text.chars().all(|c| c.is_ascii() && c != '\r' && c != '\n') {
        return text.to_string();
    }
    format!("=?UTF-8?B?{}?=", STANDARD.encode(text.as_bytes()))
}

/// Encode a raw message for the Gmail API (base64url, no padding)
pub fn encode_raw_message(message: &str) -> String {
    URL_SAFE_NO_PAD.encode(message.as_bytes())
}

/// Decode base64url data from the Gmail API, padded or not
pub fn decode_base64url(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data)
        .or_else(|_| URL_SAFE.decode(data))
        .or_else(|_| STANDARD.decode(data))
        .map_err(|e| {
            GmailMcpError::Validation(ValidationError::InvalidParameter {
                name: "base64 data".to_string(),
                message: e.to_string(),
            })
        })
}

/// Decode base64url data to a UTF-8 string
pub fn decode_base64url_string(data: &str) -> Result<String> {
    String::from_utf8(decode_base64url(data)?).map_err(|e| {
        GmailMcpError::Validation(ValidationError::InvalidParameter {
            name: "UTF-8 content".to_string(),
            message: e.to_string(),
        })
    })
}

/// Collect the text/plain and text/html bodies of a MIME tree
pub fn extract_email_content(part: &MessagePart) -> EmailContent {
    let mut content = EmailContent::default();
    collect_bodies(part, &mut content);
    content
}

fn collect_bodies(part: &MessagePart, content: &mut EmailContent) {
    let mime_type = part.mime_type.as_deref().unwrap_or("");

    if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
        match mime_type {
            "text/plain" | "text/html" => match decode_base64url_string(data) {
                Ok(decoded) if mime_type == "text/plain" => content.text.push_str(&decoded),
                Ok(decoded) => content.html.push_str(&decoded),
                Err(e) => tracing::debug!("Failed to decode {} part: {}", mime_type, e),
            },
            _ => {}
        }
    }

    for child in &part.parts {
        collect_bodies(child, content);
    }
}

/// Best-effort readable text of a message: plain body, then HTML, then snippet
pub fn message_text(message: &Message) -> String {
    let content = message
        .payload
        .as_ref()
        .map(extract_email_content)
        .unwrap_or_default();

    if !content.text.is_empty() {
        content.text
    } else if !content.html.is_empty() {
        content.html
    } else {
        message.snippet.clone().unwrap_or_default()
    }
}

/// Find header value by name (case-insensitive)
pub fn find_header<'a>(part: &'a MessagePart, name: &str) -> Option<&'a str> {
    part.headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Header value of a message, or `""`
pub fn message_header<'a>(message: &'a Message, name: &str) -> &'a str {
    message
        .payload
        .as_ref()
        .and_then(|p| find_header(p, name))
        .unwrap_or("")
}

/// Parameters for creating an email message
#[derive(Debug, Clone, Default)]
pub struct EmailParams {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub thread_id: Option<String>,
    pub in_reply_to: Option<String>,
}

/// Render `params` as an RFC 2822 message
///
/// A message with an HTML body becomes `multipart/alternative` with the
/// plain body as the first alternative.
pub fn create_email_message(params: &EmailParams) -> Result<String> {
    if params.to.is_empty() {
        return Err(GmailMcpError::Validation(ValidationError::MissingField {
            field: "to".to_string(),
        }));
    }
    for email in params.to.iter().chain(&params.cc).chain(&params.bcc) {
        if !validate_email(email) {
            return Err(GmailMcpError::Validation(ValidationError::InvalidEmail {
                email: email.clone(),
            }));
        }
    }

    let mut headers = vec![
        "From: me".to_string(),
        format!("To: {}", params.to.join(", ")),
    ];
    if !params.cc.is_empty() {
        headers.push(format!("Cc: {}", params.cc.join(", ")));
    }
    if !params.bcc.is_empty() {
        headers.push(format!("Bcc: {}", params.bcc.join(", ")));
    }
    headers.push(format!("Subject: {}", encode_mime_header(&params.subject)));
    if let Some(in_reply_to) = &params.in_reply_to {
        headers.push(format!("In-Reply-To: {}", in_reply_to));
        headers.push(format!("References: {}", in_reply_to));
    }
    headers.push("MIME-Version: 1.0".to_string());

    let body = match &params.html_body {
        None => text_part("text/plain", &params.body),
        Some(html) => {
            let boundary = boundary();
            headers.push(format!(
                "Content-Type: multipart/alternative; boundary=\"{}\"",
                boundary
            ));
            [
                String::new(),
                format!("--{}", boundary),
                text_part("text/plain", &params.body),
                String::new(),
                format!("--{}", boundary),
                text_part("text/html", html),
                String::new(),
                format!("--{}--", boundary),
            ]
            .join(CRLF)
        }
    };

    let mut message = headers.join(CRLF);
    message.push_str(CRLF);
    message.push_str(&body);
    Ok(message)
}

fn text_part(mime_type: &str, body: &str) -> String {
    [
        format!("Content-Type: {}; charset=UTF-8", mime_type),
        "Content-Transfer-Encoding: 7bit".to_string(),
        String::new(),
        body.to_string(),
    ]
    .join(CRLF)
}

fn boundary() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("----=_Part_{:x}", nanos)
}
