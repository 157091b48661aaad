//! Legacy approval detection by scanning agent text.
//!
//! Only consulted when the gateway reply carries no explicit
//! `approval_needed` flag and the sentinel fallback is enabled.

use regex::Regex;
use std::sync::OnceLock;

/// Marker older agents append when they want sign-off
pub const APPROVAL_SENTINEL: &str = "[APPROVAL_NEEDED]";

fn approve_button_phrase() -> &'static Regex {
    static PHRASE: OnceLock<Regex> = OnceLock::new();
    PHRASE.get_or_init(|| {
        Regex::new(r#"(?i)please\s+click\s+the\s+["“]?approve["”]?\s+button"#)
            .expect("approval phrase pattern is valid")
    })
}

/// Whether reply text asks the user to approve the stage
pub fn requests_approval(content: &str) -> bool {
    content.contains(APPROVAL_SENTINEL) || approve_button_phrase().is_match(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_marker() {
        assert!(requests_approval(
            "Is this technical direction acceptable? [APPROVAL_NEEDED]"
        ));
        assert!(!requests_approval("approval needed, maybe"));
    }

    #[test]
    fn test_button_phrase() {
        assert!(requests_approval(
            r#"If this looks right, please click the "Approve" button."#
        ));
        assert!(requests_approval("Please click the approve button to continue"));
        assert!(!requests_approval("Could you provide more details?"));
    }
}
