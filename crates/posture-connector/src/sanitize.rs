//! Credential blob sanitization.
//!
//! Credential payloads arrive as untrusted text pasted from consoles, docs
//! and chat clients. They routinely pick up byte-order marks, smart quotes
//! and zero-width characters that break JSON parsing. This pass normalizes
//! the text before any structural validation.

/// Characters silently inserted by editors/renderers that must be dropped.
const ZERO_WIDTH: &[char] = &[
    '\u{FEFF}', // BOM / zero-width no-break space
    '\u{200B}', // zero-width space
    '\u{200C}', // zero-width non-joiner
    '\u{200D}', // zero-width joiner
    '\u{2060}', // word joiner
];

/// Normalizes a pasted credential blob: strips the UTF-8 BOM and zero-width
/// characters, converts smart quotes to straight quotes, and trims outer
/// whitespace. The result is what gets JSON-parsed.
#[must_use]
pub fn sanitize_credential_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ZERO_WIDTH.contains(&ch) {
            continue;
        }
        match ch {
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{00A0}' => out.push(' '),
            _ => out.push(ch),
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bom_and_zero_width() {
        let raw = "\u{FEFF}{\"a\":\u{200B}1}";
        assert_eq!(sanitize_credential_text(raw), "{\"a\":1}");
    }

    #[test]
    fn replaces_smart_quotes() {
        let raw = "{\u{201C}client_email\u{201D}: \u{2018}x\u{2019}}";
        assert_eq!(sanitize_credential_text(raw), "{\"client_email\": 'x'}");
    }

    #[test]
    fn sanitized_blob_parses_as_json() {
        let raw = "\u{FEFF}{\u{201C}type\u{201D}: \u{201C}service_account\u{201D}}\n";
        let clean = sanitize_credential_text(raw);
        let value: serde_json::Value = serde_json::from_str(&clean).unwrap();
        assert_eq!(value["type"], "service_account");
    }

    #[test]
    fn plain_text_is_untouched() {
        let raw = "{\"already\": \"clean\"}";
        assert_eq!(sanitize_credential_text(raw), raw);
    }
}
