//! Text/binary classification and line counting, shared by the importer and
//! commit engine (§9: "decodable as UTF-8 without replacement" heuristic).

use pmdb_core::Payload;

/// Classifies raw file bytes per §4.E/§9: text iff the bytes decode as
/// UTF-8 without any replacement/loss. Anything else is stored whole.
pub fn classify_payload(bytes: Vec<u8>) -> Payload {
    match String::from_utf8(bytes) {
        Ok(text) => Payload::Text(text),
        Err(err) => Payload::Binary(err.into_bytes()),
    }
}

/// Line count for text payloads, `None` for binary. A trailing newline
/// doesn't add a phantom empty line; an empty file has zero lines.
pub fn line_count(payload: &Payload) -> Option<i64> {
    match payload {
        Payload::Binary(_) => None,
        Payload::Text(s) if s.is_empty() => Some(0),
        Payload::Text(s) => {
            let trimmed = s.strip_suffix('\n').unwrap_or(s);
            Some(trimmed.split('\n').count() as i64)
        }
    }
}

/// `encoding` recorded on a text blob at first sighting. This crate only
/// ever produces UTF-8 text (§9's heuristic), so the column is always
/// `"utf-8"` for text and absent for binary.
pub fn encoding_for(payload: &Payload) -> Option<&'static str> {
    match payload {
        Payload::Text(_) => Some("utf-8"),
        Payload::Binary(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_utf8_is_text() {
        let payload = classify_payload(b"hello\nworld".to_vec());
        assert!(matches!(payload, Payload::Text(_)));
        assert_eq!(line_count(&payload), Some(2));
    }

    #[test]
    fn invalid_utf8_is_binary() {
        let payload = classify_payload(vec![0xff, 0xfe, 0x00]);
        assert!(matches!(payload, Payload::Binary(_)));
        assert_eq!(line_count(&payload), None);
    }

    #[test]
    fn empty_file_has_zero_lines() {
        let payload = classify_payload(Vec::new());
        assert_eq!(line_count(&payload), Some(0));
    }

    #[test]
    fn trailing_newline_does_not_add_a_line() {
        let payload = classify_payload(b"a\nb\n".to_vec());
        assert_eq!(line_count(&payload), Some(2));
    }
}
