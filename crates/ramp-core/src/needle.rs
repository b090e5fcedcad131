//! Needle-in-a-haystack recall checks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Relative depths at which the marker is hidden, in percent of the payload.
pub const NEEDLE_OFFSETS: [u8; 3] = [10, 50, 90];

/// Filler characters per token of target context. At roughly four characters
/// per token this fills about three quarters of the window, leaving room for
/// the instructions and the answer.
pub const CHARS_PER_CONTEXT_TOKEN: usize = 3;

const FILLER_TOPICS: [&str; 10] = [
    "The history of ancient civilizations reveals fascinating patterns of human development.",
    "Modern technology continues to transform how we communicate and work.",
    "Environmental science studies the complex interactions between organisms and their habitats.",
    "Economic theories attempt to explain the behavior of markets and consumers.",
    "Philosophical inquiry examines fundamental questions about existence and knowledge.",
    "Medical research advances our understanding of human health and disease.",
    "Architectural design balances aesthetic beauty with functional requirements.",
    "Literary analysis explores the deeper meanings within written works.",
    "Musical composition combines rhythm, melody, and harmony in creative ways.",
    "Agricultural practices have evolved significantly over thousands of years.",
];

/// A fully built recall prompt.
#[derive(Debug, Clone)]
pub struct Haystack {
    pub prompt: String,
    pub secret_code: String,
    pub offset_pct: u8,
}

/// Fresh 8-character uppercase alphanumeric marker.
pub fn new_secret_code() -> String {
    let id = ulid::Ulid::new().to_string();
    // The random part of a ULID is its last 16 characters.
    id[id.len() - 8..].to_string()
}

/// Build a payload sized for `context_tokens` with the marker inserted at
/// `offset_pct` percent of the filler paragraphs.
pub fn build_haystack(context_tokens: u32, offset_pct: u8, secret_code: &str) -> Haystack {
    let target_chars = context_tokens as usize * CHARS_PER_CONTEXT_TOKEN;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut total = 0usize;
    let mut i = 0usize;
    while total < target_chars {
        let topic = FILLER_TOPICS[(i * 7 + i / FILLER_TOPICS.len()) % FILLER_TOPICS.len()];
        let paragraph = [topic, topic, topic].join(" ");
        total += paragraph.len() + 2;
        paragraphs.push(paragraph);
        i += 1;
    }

    let idx = (paragraphs.len() * usize::from(offset_pct.min(100))) / 100;
    paragraphs.insert(idx, format!("The secret code is: {secret_code}"));
    let haystack = paragraphs.join("\n\n");

    let prompt = format!(
        "Read the following text carefully and find the secret code hidden within it.\n\n\
         TEXT:\n{haystack}\n\n\
         QUESTION: What is the secret code mentioned in the text above? \
         Answer with only the code, nothing else."
    );

    Haystack {
        prompt,
        secret_code: secret_code.to_string(),
        offset_pct,
    }
}

/// The marker must appear verbatim in the answer.
pub fn recalled(response: &str, secret_code: &str) -> bool {
    !secret_code.is_empty() && response.trim().to_uppercase().contains(secret_code)
}

/// Per-offset recall results for one context tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NeedleReport {
    /// Keyed `"10%"`, `"50%"`, `"90%"`.
    pub offsets: BTreeMap<String, bool>,
}

impl NeedleReport {
    pub fn record(&mut self, offset_pct: u8, found: bool) {
        self.offsets.insert(format!("{offset_pct}%"), found);
    }

    pub fn found_at(&self, offset_pct: u8) -> Option<bool> {
        self.offsets.get(&format!("{offset_pct}%")).copied()
    }

    /// Robust recall requires every offset to succeed.
    pub fn passed(&self) -> bool {
        !self.offsets.is_empty()
            && NEEDLE_OFFSETS
                .iter()
                .all(|o| self.found_at(*o).unwrap_or(false))
    }

    pub fn found_count(&self) -> usize {
        self.offsets.values().filter(|f| **f).count()
    }
}

/// Record key for a tier, e.g. `ctx_8k`.
pub fn tier_key(context_tokens: u32) -> String {
    format!("ctx_{}k", context_tokens / 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_code_shape() {
        let code = new_secret_code();
        assert_eq!(code.len(), 8);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_ne!(code, new_secret_code());
    }

    #[test]
    fn test_haystack_size_tracks_context() {
        let small = build_haystack(2048, 50, "ABCD1234");
        let large = build_haystack(8192, 50, "ABCD1234");
        assert!(small.prompt.len() >= 2048 * CHARS_PER_CONTEXT_TOKEN);
        assert!(large.prompt.len() > small.prompt.len() * 3);
    }

    #[test]
    fn test_marker_position_follows_offset() {
        for offset in NEEDLE_OFFSETS {
            let h = build_haystack(8192, offset, "ZZTOP999");
            let pos = h.prompt.find("The secret code is: ZZTOP999").unwrap();
            let rel = pos as f64 / h.prompt.len() as f64;
            let expected = f64::from(offset) / 100.0;
            assert!(
                (rel - expected).abs() < 0.05,
                "offset {offset}% landed at {rel:.3}"
            );
        }
    }

    #[test]
    fn test_recalled_is_case_insensitive_on_response() {
        assert!(recalled("The code is abcd1234.", "ABCD1234"));
        assert!(!recalled("I could not find it", "ABCD1234"));
        assert!(!recalled("anything", ""));
    }

    #[test]
    fn test_report_requires_all_offsets() {
        let mut r = NeedleReport::default();
        assert!(!r.passed());
        r.record(10, true);
        r.record(50, true);
        assert!(!r.passed());
        r.record(90, false);
        assert!(!r.passed());
        assert_eq!(r.found_count(), 2);
        r.record(90, true);
        assert!(r.passed());
    }

    #[test]
    fn test_report_serializes_as_offset_map() {
        let mut r = NeedleReport::default();
        r.record(10, true);
        r.record(50, true);
        r.record(90, false);
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"10%":true,"50%":true,"90%":false}"#);
    }

    #[test]
    fn test_tier_key() {
        assert_eq!(tier_key(8192), "ctx_8k");
        assert_eq!(tier_key(131072), "ctx_128k");
    }
}
