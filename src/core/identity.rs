use crate::core::capabilities::IdentityMatch;
use regex::Regex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

/// Placeholder stored when no external id could be read.
pub const UNKNOWN_ID: &str = "unknown";

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)name[:\s]*([a-z ]+?)\s*(?:\bid\b|$)").expect("name pattern is valid")
});

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{8,10})").expect("id pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    FaceMatch,
    Ocr,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub external_id: String,
    pub source: IdentitySource,
}

impl Identity {
    pub fn new(name: impl Into<String>, external_id: impl Into<String>, source: IdentitySource) -> Self {
        Self {
            name: name.into(),
            external_id: external_id.into(),
            source,
        }
    }

    pub fn has_external_id(&self) -> bool {
        self.external_id != UNKNOWN_ID
    }
}

// Two identities are the same person when name and id agree, however they were resolved.
impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.external_id == other.external_id
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.external_id.hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.external_id)
    }
}

/// Fields read off an ID card.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardFields {
    pub name: Option<String>,
    pub external_id: Option<String>,
}

impl CardFields {
    pub fn is_complete(&self) -> bool {
        self.name.is_some() && self.external_id.is_some()
    }
}

pub fn parse_card(text: &str) -> CardFields {
    let name = NAME_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty());

    let external_id = ID_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    CardFields { name, external_id }
}

/// Fuse a face match with OCR text.
///
/// The face match decides whether anyone is recognised at all. OCR only
/// refines the result: an OCR name replaces the face label and an OCR id
/// fills the otherwise unknown external id.
pub fn resolve(face_match: Option<&IdentityMatch>, ocr_text: &str) -> Option<Identity> {
    let face_match = face_match?;
    let label = face_match.label.trim();
    if label.is_empty() {
        return None;
    }

    let card = parse_card(ocr_text);
    let source = match (card.name.is_some(), card.external_id.is_some()) {
        (true, true) => IdentitySource::Ocr,
        (false, false) => IdentitySource::FaceMatch,
        _ => IdentitySource::Hybrid,
    };

    Some(Identity {
        name: card.name.unwrap_or_else(|| label.to_string()),
        external_id: card.external_id.unwrap_or_else(|| UNKNOWN_ID.to_string()),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bob() -> IdentityMatch {
        IdentityMatch::new("bob", 0.91)
    }

    #[test]
    fn ocr_name_and_id_override_face_label() {
        let identity = resolve(Some(&bob()), "Name: Alice Id 12345678").unwrap();
        assert_eq!(identity.name, "Alice");
        assert_eq!(identity.external_id, "12345678");
        assert_eq!(identity.source, IdentitySource::Ocr);
    }

    #[test]
    fn no_match_means_no_identity_even_with_card_text() {
        assert!(resolve(None, "Name: Alice Id 12345678").is_none());
        assert!(resolve(Some(&IdentityMatch::new("   ", 0.9)), "").is_none());
    }

    #[test]
    fn face_label_used_without_card() {
        let identity = resolve(Some(&bob()), "").unwrap();
        assert_eq!(identity, Identity::new("bob", UNKNOWN_ID, IdentitySource::FaceMatch));
        assert!(!identity.has_external_id());
    }

    #[test]
    fn id_only_card_is_hybrid() {
        let identity = resolve(Some(&bob()), "STUDENT 0012345678 VALID 2026").unwrap();
        assert_eq!(identity.name, "bob");
        assert_eq!(identity.external_id, "0012345678");
        assert_eq!(identity.source, IdentitySource::Hybrid);
    }

    #[test]
    fn name_stops_before_id_keyword() {
        let card = parse_card("NAME  Mary Jane Watson  ID: 987654321");
        assert_eq!(card.name.as_deref(), Some("Mary Jane Watson"));
        assert_eq!(card.external_id.as_deref(), Some("987654321"));
        assert!(card.is_complete());
    }

    #[test]
    fn name_at_end_of_text() {
        let card = parse_card("Name: Alice");
        assert_eq!(card.name.as_deref(), Some("Alice"));
        assert_eq!(card.external_id, None);
    }

    #[test]
    fn short_digit_runs_are_not_ids() {
        let card = parse_card("Room 1234567 Name: 42");
        assert_eq!(card.external_id, None);
        assert_eq!(card.name, None);
    }

    #[test]
    fn garbage_text_degrades_quietly() {
        assert_eq!(parse_card("OCR failed"), CardFields::default());
        assert_eq!(parse_card("\u{0}\u{1}%%"), CardFields::default());
    }

    #[test]
    fn equality_ignores_source() {
        let a = Identity::new("Alice", "12345678", IdentitySource::Ocr);
        let b = Identity::new("Alice", "12345678", IdentitySource::Hybrid);
        assert_eq!(a, b);
        assert_ne!(a, Identity::new("Alice", UNKNOWN_ID, IdentitySource::Ocr));
    }
}
