use html2text::render::TrivialDecorator;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use regex::Regex;
use std::sync::OnceLock;

const HTML_RENDER_WIDTH: usize = 400;

/// Turn a raw RFC 5322 message into a single line of classifier input:
/// the subject followed by every non-attachment text body in document order.
///
/// Never fails. Parse problems are logged and whatever text was recovered so
/// far is returned; an empty or unparseable message yields `""`.
pub fn extract(raw: &[u8]) -> String {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return String::new();
    }

    let parsed = match mailparse::parse_mail(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, bytes = raw.len(), "Failed to parse message");
            return String::new();
        }
    };

    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();

    let mut pieces = vec![subject];
    collect_text(&parsed, &mut pieces);

    collapse_whitespace(&pieces.join(" "))
}

fn collect_text(part: &ParsedMail<'_>, out: &mut Vec<String>) {
    if part.get_content_disposition().disposition == DispositionType::Attachment {
        tracing::debug!(mimetype = %part.ctype.mimetype, "Skipping attachment part");
        return;
    }

    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_text(sub, out);
        }
        return;
    }

    let mimetype = part.ctype.mimetype.to_ascii_lowercase();
    if mimetype == "text/plain" {
        out.push(decode_body(part));
    } else if mimetype == "text/html" {
        out.push(html_to_text(&decode_body(part)));
    }
}

/// Decode a leaf part using its declared charset. Falls back to lossy UTF-8
/// over the transfer-decoded bytes when the charset decoder gives up.
fn decode_body(part: &ParsedMail<'_>) -> String {
    match part.get_body() {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(
                error = %e,
                charset = %part.ctype.charset,
                "Failed to decode body part, falling back to UTF-8"
            );
            match part.get_body_raw() {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read raw body part");
                    String::new()
                }
            }
        }
    }
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"))
}

fn script_regex() -> &'static Regex {
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    SCRIPT.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)\b.*?</(script|style)\s*>")
            .expect("valid script regex")
    })
}

/// Render HTML to its text content only: no heading, emphasis or list
/// markers and no link targets. Every tag boundary is padded with whitespace
/// first so adjacent elements never run together.
fn html_to_text(html: &str) -> String {
    let spaced = tag_regex().replace_all(html, " $0 ");

    let rendered = html2text::config::with_decorator(TrivialDecorator::new())
        .string_from_read(spaced.as_bytes(), HTML_RENDER_WIDTH);
    match rendered {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "HTML rendering failed, stripping tags instead");
            let without_scripts = script_regex().replace_all(html, " ");
            tag_regex().replace_all(&without_scripts, " ").into_owned()
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
