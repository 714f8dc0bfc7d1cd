//! RFC 5322 parsing of queued messages using mailparse.
//!
//! Extracts the header fields and a plain-text body shown in outbox
//! listings. Header values are RFC 2047 decoded and bodies are decoded from
//! their declared charset, so 8-bit mail in legacy encodings reads correctly.

use anyhow::{Context, Result};
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use scraper::{Html, Node, Selector};
use tracing::{debug, warn};

/// Elements whose text is never shown in an excerpt.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Header fields and body text of a queued message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedEmail {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub date: Option<String>,
    /// First text/plain part, or the visible text of the first text/html part
    pub body: Option<String>,
}

/// Parse raw RFC 5322 email content.
pub fn parse_raw_email(raw_content: &[u8]) -> Result<ParsedEmail> {
    let mail = parse_mail(raw_content).context("Failed to parse email")?;

    let header = |name: &str| {
        mail.headers
            .get_first_value(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let result = ParsedEmail {
        from: header("From"),
        to: header("To"),
        subject: header("Subject"),
        date: header("Date"),
        body: extract_text_body(&mail),
    };

    debug!(
        raw_content_length = raw_content.len(),
        has_subject = result.subject.is_some(),
        has_body = result.body.is_some(),
        "email_parse_complete"
    );

    Ok(result)
}

/// Extract readable body text from a parsed email.
///
/// Prefers text/plain anywhere in the tree and falls back to the visible
/// text of text/html.
fn extract_text_body(mail: &ParsedMail) -> Option<String> {
    find_part(mail, "text/plain").or_else(|| {
        find_part(mail, "text/html")
            .map(|html| html_to_text(&html))
            .filter(|text| !text.trim().is_empty())
    })
}

/// Depth-first search for the first non-empty part of `mimetype`.
fn find_part(mail: &ParsedMail, mimetype: &str) -> Option<String> {
    let content_type = mail.ctype.mimetype.as_str();

    if content_type.starts_with("multipart/") {
        return mail.subparts.iter().find_map(|part| find_part(part, mimetype));
    }

    if content_type == mimetype {
        return extract_body_text(mail);
    }

    None
}

/// Extract the body text from a mail part.
fn extract_body_text(mail: &ParsedMail) -> Option<String> {
    match mail.get_body() {
        Ok(body) => {
            if body.trim().is_empty() {
                None
            } else {
                Some(body)
            }
        }
        Err(e) => {
            warn!(error = %e, "email_body_extraction_failed");
            None
        }
    }
}

/// Visible text of an HTML document.
///
/// Collects the text nodes under `<body>`, skipping scripts and styles.
/// Entities are decoded by the HTML parser.
fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let root = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    let mut text = String::with_capacity(html.len());

    for node in root.descendants() {
        let Node::Text(fragment) = node.value() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| {
            matches!(ancestor.value(), Node::Element(el) if SKIPPED_ELEMENTS.contains(&el.name()))
        });

        if !hidden {
            text.push_str(fragment);
            text.push(' ');
        }
    }

    debug!(html_length = html.len(), text_length = text.len(), "html_text_extracted");
    text
}

/// Collapse whitespace and cut to at most `max_chars` characters.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }

    let mut cut: String = collapsed.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_email() {
        let raw = r#"From: Alice <alice@example.com>
To: bob@example.com
Subject: Lunch?
Date: Wed, 1 May 2024 12:00:00 +0000

Are you free at noon?"#;

        let result = parse_raw_email(raw.as_bytes()).unwrap();

        assert_eq!(result.from, Some("Alice <alice@example.com>".to_string()));
        assert_eq!(result.to, Some("bob@example.com".to_string()));
        assert_eq!(result.subject, Some("Lunch?".to_string()));
        assert_eq!(result.date, Some("Wed, 1 May 2024 12:00:00 +0000".to_string()));
        assert!(result.body.unwrap().contains("free at noon"));
    }

    #[test]
    fn test_parse_encoded_subject() {
        let raw = "Subject: =?UTF-8?B?Q2Fmw6kgb3JkZXI=?=\r\n\r\nbody";

        let result = parse_raw_email(raw.as_bytes()).unwrap();

        assert_eq!(result.subject, Some("Café order".to_string()));
    }

    #[test]
    fn test_parse_multipart_prefers_plain_text() {
        let raw = r#"Subject: Multipart
Content-Type: multipart/alternative; boundary="boundary123"

--boundary123
Content-Type: text/html

<html><body>HTML version</body></html>

--boundary123
Content-Type: text/plain

Plain text version

--boundary123--"#;

        let result = parse_raw_email(raw.as_bytes()).unwrap();

        assert!(result.body.unwrap().contains("Plain text version"));
    }

    #[test]
    fn test_parse_html_only_strips_tags() {
        let raw = r#"Subject: Newsletter
Content-Type: text/html

<html><body><p>Hello <b>World</b></p></body></html>"#;

        let body = parse_raw_email(raw.as_bytes()).unwrap().body.unwrap();

        assert!(!body.contains('<'));
        assert_eq!(excerpt(&body, 50), "Hello World");
    }

    #[test]
    fn test_parse_html_skips_style_and_script_and_decodes_entities() {
        let raw = r#"Subject: Menu
Content-Type: text/html

<html><head><style>p { color: red; }</style></head><body><script>var x = 1;</script><p>Fish &amp; Chips &lt;today&gt;</p><style>.footer { display: none; }</style></body></html>"#;

        let body = parse_raw_email(raw.as_bytes()).unwrap().body.unwrap();

        assert_eq!(excerpt(&body, 100), "Fish & Chips <today>");
    }

    #[test]
    fn test_parse_html_without_visible_text() {
        let raw = "Subject: Empty\r\nContent-Type: text/html\r\n\r\n<html><body><script>track()</script></body></html>";

        assert_eq!(parse_raw_email(raw.as_bytes()).unwrap().body, None);
    }

    #[test]
    fn test_parse_8bit_latin1_body() {
        let raw: &[u8] = b"Subject: Lunch\r\nContent-Type: text/plain; charset=iso-8859-1\r\nContent-Transfer-Encoding: 8bit\r\n\r\nd\xe9j\xe0 vu";

        let body = parse_raw_email(raw).unwrap().body.unwrap();

        assert_eq!(body.trim(), "déjà vu");
    }

    #[test]
    fn test_parse_rejects_continuation_without_header() {
        assert!(parse_raw_email(b" broken header\r\n\r\nbody").is_err());
    }

    #[test]
    fn test_parse_nested_multipart() {
        let raw = r#"Subject: Nested
Content-Type: multipart/mixed; boundary="outer"

--outer
Content-Type: multipart/alternative; boundary="inner"

--inner
Content-Type: text/plain

Nested plain

--inner--

--outer--"#;

        let result = parse_raw_email(raw.as_bytes()).unwrap();

        assert!(result.body.unwrap().contains("Nested plain"));
    }

    #[test]
    fn test_parse_missing_headers() {
        let raw = "Subject: \r\n\r\n";

        let result = parse_raw_email(raw.as_bytes()).unwrap();

        assert_eq!(result.subject, None);
        assert_eq!(result.from, None);
        assert_eq!(result.body, None);
    }

    #[test]
    fn test_excerpt_truncates_on_chars() {
        assert_eq!(excerpt("  a   b\n\nc ", 10), "a b c");
        assert_eq!(excerpt("héllo wörld", 5), "héllo…");
    }
}
