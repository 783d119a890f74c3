use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::{extract_domain, is_whitelisted, normalize_domain};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FocusStatus {
    pub active: bool,
    pub blocked_domains: Vec<String>,
}

/// Block list for the current browser session. Lives in memory only.
#[derive(Debug, Default)]
pub struct FocusMode {
    blocked: BTreeSet<String>,
}

/// Accepts either a bare host or a full URL.
fn target_domain(input: &str) -> String {
    if input.contains("://") {
        extract_domain(input)
    } else {
        normalize_domain(input.trim())
    }
}

impl FocusMode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip blocking for `domain`. Returns whether it is blocked afterwards.
    pub fn toggle(&mut self, domain: &str) -> bool {
        let domain = target_domain(domain);
        if domain.is_empty() {
            return false;
        }
        if self.blocked.remove(&domain) {
            false
        } else {
            self.blocked.insert(domain);
            true
        }
    }

    /// Blocked entries cover their subdomains.
    pub fn is_blocked(&self, domain: &str) -> bool {
        let domain = target_domain(domain);
        let blocked: Vec<&String> = self.blocked.iter().collect();
        is_whitelisted(&domain, &blocked)
    }

    /// Returns `false` when the domain was not blocked.
    pub fn disable(&mut self, domain: &str) -> bool {
        self.blocked.remove(&target_domain(domain))
    }

    pub fn status(&self) -> FocusStatus {
        FocusStatus {
            active: !self.blocked.is_empty(),
            blocked_domains: self.blocked.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_flips_block_state() {
        let mut focus = FocusMode::new();
        assert!(focus.toggle("www.youtube.com"));
        assert!(focus.is_blocked("youtube.com"));
        assert!(!focus.toggle("youtube.com"));
        assert!(!focus.is_blocked("youtube.com"));
    }

    #[test]
    fn block_covers_subdomains_and_urls() {
        let mut focus = FocusMode::new();
        focus.toggle("youtube.com");
        assert!(focus.is_blocked("m.youtube.com"));
        assert!(focus.is_blocked("https://music.youtube.com/watch?v=1"));
        assert!(!focus.is_blocked("notyoutube.com"));
        assert!(!focus.is_blocked(""));
    }

    #[test]
    fn status_and_disable() {
        let mut focus = FocusMode::new();
        assert!(!focus.status().active);
        focus.toggle("reddit.com");
        focus.toggle("twitter.com");
        assert_eq!(
            focus.status(),
            FocusStatus {
                active: true,
                blocked_domains: vec!["reddit.com".into(), "twitter.com".into()],
            }
        );
        assert!(focus.disable("reddit.com"));
        assert!(!focus.disable("reddit.com"));
        assert_eq!(focus.status().blocked_domains, vec!["twitter.com".to_string()]);
    }

    #[test]
    fn empty_input_is_never_blocked() {
        let mut focus = FocusMode::new();
        assert!(!focus.toggle("   "));
        assert!(!focus.status().active);
    }
}
