// Raw email → subject, sender, and readable body.
//
// Body extraction prefers text/plain parts (concatenated in document order).
// Only when a message has no plain-text part at all do we fall back to its
// HTML parts with tags stripped, so a multipart/alternative message isn't
// scored twice. Attachments are skipped.

use anyhow::{Context, Result};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use once_cell::sync::Lazy;
use regex::Regex;

/// The fields the analysis pipeline cares about.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedEmail {
    pub subject: String,
    pub from: String,
    pub body: String,
}

impl ParsedEmail {
    /// The text scored by the `/analyze-email` endpoint.
    pub fn full_content(&self) -> String {
        format!("Subject: {}\nFrom: {}\n\n{}", self.subject, self.from, self.body)
    }
}

/// Parse a raw RFC 5322 message.
pub fn parse_email(raw: &[u8]) -> Result<ParsedEmail> {
    let mail = mailparse::parse_mail(raw).context("Failed to parse email")?;

    let subject = mail.headers.get_first_value("Subject").unwrap_or_default();
    let from = mail.headers.get_first_value("From").unwrap_or_default();

    let mut plain = Vec::new();
    let mut html = Vec::new();
    collect_text_parts(&mail, &mut plain, &mut html);

    let body = if !plain.is_empty() {
        plain.concat()
    } else {
        strip_html(&html.concat())
    };

    Ok(ParsedEmail {
        subject,
        from,
        body,
    })
}

fn collect_text_parts(part: &ParsedMail<'_>, plain: &mut Vec<String>, html: &mut Vec<String>) {
    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return;
    }

    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_text_parts(sub, plain, html);
        }
        return;
    }

    let target = match part.ctype.mimetype.as_str() {
        "text/plain" => plain,
        "text/html" => html,
        _ => return,
    };

    // An undecodable part is skipped rather than failing the whole message.
    if let Ok(text) = part.get_body() {
        target.push(text);
    }
}

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("invalid tag regex"));

/// Replace tags with spaces.
pub fn strip_html(html: &str) -> String {
    HTML_TAG.replace_all(html, " ").into_owned()
}
