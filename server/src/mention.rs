use regex::Regex;

/// Detects `@handle` tokens that are not embedded in a longer word.
#[derive(Debug, Clone)]
pub struct MentionDetector {
    handle: String,
    pattern: Regex,
}

impl MentionDetector {
    pub fn new(handle: &str) -> Result<Self, regex::Error> {
        let handle = handle.trim().trim_start_matches('@').to_ascii_lowercase();
        let pattern = Regex::new(&format!(r"(?i)(?:^|[^\w@])@{}\b", regex::escape(&handle)))?;
        Ok(Self { handle, pattern })
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn is_mentioned(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Any `@word` addressed to a person, used for in-app mention alerts.
pub fn mentions_name(text: &str, name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() {
        return false;
    }
    let Ok(pattern) = Regex::new(&format!(r"(?i)(?:^|[^\w@])@{}\b", regex::escape(name))) else {
        return false;
    };
    pattern.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native() -> MentionDetector {
        MentionDetector::new("native").unwrap()
    }

    #[test]
    fn matches_case_insensitively_at_word_boundary() {
        let detector = native();
        assert!(detector.is_mentioned("hey @Native summarize"));
        assert!(detector.is_mentioned("@native"));
        assert!(detector.is_mentioned("(@NATIVE) what changed?"));
        assert!(detector.is_mentioned("thanks @native."));
    }

    #[test]
    fn ignores_embedded_tokens() {
        let detector = native();
        assert!(!detector.is_mentioned("nativefoo bar"));
        assert!(!detector.is_mentioned("native please"));
        assert!(!detector.is_mentioned("@nativefoo"));
        assert!(!detector.is_mentioned("mail me at ops@native"));
        assert!(!detector.is_mentioned("@@native"));
    }

    #[test]
    fn handle_is_normalized() {
        let detector = MentionDetector::new("@Native").unwrap();
        assert_eq!(detector.handle(), "native");
        assert!(detector.is_mentioned("ok @native"));
    }

    #[test]
    fn person_mentions_use_the_same_boundaries() {
        assert!(mentions_name("ping @dana about it", "Dana"));
        assert!(!mentions_name("ping @danar about it", "dana"));
        assert!(!mentions_name("ping about it", ""));
    }
}
