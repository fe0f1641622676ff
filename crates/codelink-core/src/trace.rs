//! Rendering of link traffic for log lines

use serde::{Deserialize, Serialize};

use crate::protocol::decode_text;

/// How transmitted and received data appears in logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Text as-is
    #[default]
    Plain,
    /// Control characters, quotes and backslashes escaped
    Escaped,
    /// Space separated hex byte codes, e.g. `F3 9A 22 16 03`
    Hex,
}

impl LogFormat {
    /// Render raw bytes
    pub fn render(&self, bytes: &[u8]) -> String {
        match self {
            LogFormat::Plain => decode_text(bytes),
            LogFormat::Escaped => bytes
                .iter()
                .flat_map(|&b| char::from(b).escape_default())
                .collect(),
            LogFormat::Hex => bytes
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Render 8-bit text
    pub fn render_text(&self, text: &str) -> String {
        match self {
            LogFormat::Plain => text.to_string(),
            _ => self.render(&crate::protocol::encode_text(text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_rendering() {
        assert_eq!(
            LogFormat::Hex.render(&[0xF3, 0x9A, 0x22, 0x16, 0x03]),
            "F3 9A 22 16 03"
        );
        assert_eq!(LogFormat::Hex.render(&[]), "");
    }

    #[test]
    fn test_escaped_rendering() {
        assert_eq!(LogFormat::Escaped.render(b"OK\r\n\x03"), "OK\\r\\n\\u{3}");
        assert_eq!(LogFormat::Escaped.render_text("say \"hi\""), "say \\\"hi\\\"");
    }

    #[test]
    fn test_plain_rendering() {
        assert_eq!(LogFormat::Plain.render_text("PING"), "PING");
        assert_eq!(LogFormat::Plain.render(b"PING"), "PING");
    }
}
