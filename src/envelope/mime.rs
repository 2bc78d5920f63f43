//! Walks a parsed MIME message tree and classifies body parts vs attachments.

use mailparse::{parse_mail, MailHeaderMap, ParsedMail};

/// One MIME part extracted from a multipart message body.
#[derive(Debug, Clone, Default)]
pub struct MimePart {
    pub mime_type: String,
    pub charset: Option<String>,
    pub filename: Option<String>,
    pub size: usize,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub read_date: Option<String>,
    pub encoding: String,
    pub description: Option<String>,
    pub is_attachment: bool,
    pub data: Vec<u8>,
}

impl MimePart {
    /// Decodes `data` according to the declared transfer encoding. Unknown
    /// encodings (including the empty string) are treated as quoted-printable,
    /// matching the common real-world default for text parts with no
    /// explicit `Content-Transfer-Encoding`.
    pub fn decode(&self) -> Vec<u8> {
        match self.encoding.as_str() {
            "base64" => base64::Engine::decode(
                &base64::engine::general_purpose::STANDARD,
                strip_base64_whitespace(&self.data),
            )
            .unwrap_or_else(|_| self.data.clone()),
            "7bit" | "8bit" | "binary" => self.data.clone(),
            _ => quoted_printable::decode(&self.data, quoted_printable::ParseMode::Robust)
                .unwrap_or_else(|_| self.data.clone()),
        }
    }
}

fn strip_base64_whitespace(data: &[u8]) -> Vec<u8> {
    data.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect()
}

/// Walks a raw message's MIME structure. Non-multipart messages produce an
/// empty part list; the whole body belongs to `Envelope::body` instead.
pub struct MimePartsExtractor;

impl MimePartsExtractor {
    pub fn extract(raw: &[u8]) -> Result<Vec<MimePart>, mailparse::MailParseError> {
        let parsed = parse_mail(raw)?;
        let mut parts = Vec::new();
        if parsed.ctype.mimetype.starts_with("multipart/") {
            walk(&parsed, &mut parts);
        }
        Ok(parts)
    }

    /// Parses headers only, returning them in arrival order.
    pub fn headers(raw: &[u8]) -> Result<Vec<(String, String)>, mailparse::MailParseError> {
        let parsed = parse_mail(raw)?;
        Ok(parsed
            .get_headers()
            .into_iter()
            .map(|h| (h.get_key(), h.get_value()))
            .collect())
    }
}

/// Only ever called on a `multipart/*` node (top-level check happens in
/// `extract`). A multipart node with no subparts contributes nothing.
fn walk(mail: &ParsedMail, out: &mut Vec<MimePart>) {
    for sub in &mail.subparts {
        if sub.ctype.mimetype.starts_with("multipart/") {
            walk(sub, out);
        } else {
            out.push(build_part(sub));
        }
    }
}

fn build_part(mail: &ParsedMail) -> MimePart {
    let mime_type = mail.ctype.mimetype.clone();
    let charset = mail.ctype.params.get("charset").cloned();

    let disposition = mail.get_headers().get_first_value("Content-Disposition");
    let mut is_attachment = false;
    let mut filename = mail.ctype.params.get("name").cloned();
    let mut size = 0usize;
    let mut creation_date = None;
    let mut modification_date = None;
    let mut read_date = None;

    if let Some(disp_raw) = disposition.as_deref() {
        let (disp_type, disp_params) = parse_disposition(disp_raw);
        if disp_type.eq_ignore_ascii_case("attachment") {
            is_attachment = true;
        }
        if let Some(name) = disp_params.get("filename") {
            filename = Some(name.clone());
        }
        if let Some(s) = disp_params.get("size") {
            size = s.parse().unwrap_or(0);
        }
        creation_date = disp_params.get("creation-date").cloned();
        modification_date = disp_params.get("modification-date").cloned();
        read_date = disp_params.get("read-date").cloned();
    }

    let encoding = mail
        .get_headers()
        .get_first_value("Content-Transfer-Encoding")
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let description = mail
        .get_headers()
        .get_first_value("Content-Description")
        .map(|s| s.trim().to_string());

    let data = mail.get_body_raw().unwrap_or_default();
    if size == 0 {
        size = data.len();
    }

    MimePart {
        mime_type,
        charset,
        filename,
        size,
        creation_date,
        modification_date,
        read_date,
        encoding,
        description,
        is_attachment,
        data,
    }
}

/// Parses a `Content-Disposition` header value into its disposition type and
/// a lower-cased parameter map, e.g. `attachment; filename="a.txt"`.
fn parse_disposition(raw: &str) -> (String, std::collections::HashMap<String, String>) {
    let mut parts = raw.split(';');
    let disp_type = parts.next().unwrap_or("").trim().to_string();
    let mut params = std::collections::HashMap::new();
    for p in parts {
        if let Some((k, v)) = p.split_once('=') {
            let key = k.trim().to_ascii_lowercase();
            let value = v.trim().trim_matches('"').to_string();
            params.insert(key, value);
        }
    }
    (disp_type, params)
}
