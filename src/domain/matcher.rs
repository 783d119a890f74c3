//! Allow-list matching for observed hosts.
//!
//! Matching is pure string comparison: case-insensitive, leading `www.`
//! stripped from the observed host, and every pattern also authorizes its
//! subdomains. A `*.` prefix is accepted and means the same thing.

const WILDCARD_PREFIX: &str = "*.";

/// Lowercase the host, drop a trailing dot and a leading `www.`.
pub fn normalize_domain(host: &str) -> String {
    let lowered = host.trim().trim_end_matches('.').to_ascii_lowercase();
    match lowered.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => lowered,
    }
}

/// Host of an `http(s)` URL, normalized. Anything unparseable yields an empty
/// string, which never matches.
pub fn extract_domain(url: &str) -> String {
    let url = url.trim();
    let Some((scheme, rest)) = url.split_once("://") else {
        return String::new();
    };
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return String::new();
    }

    let authority = rest
        .split(|c| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let host_port = match authority.rsplit_once('@') {
        Some((_, host_port)) => host_port,
        None => authority,
    };

    let host = if let Some(bracketed) = host_port.strip_prefix('[') {
        match bracketed.split_once(']') {
            Some((inner, _)) => inner,
            None => return String::new(),
        }
    } else {
        host_port.split(':').next().unwrap_or_default()
    };

    let valid = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ':');
    if !valid {
        return String::new();
    }

    normalize_domain(host)
}

/// Whether `domain` is covered by a single allow-list pattern.
pub fn pattern_matches(domain: &str, pattern: &str) -> bool {
    let domain = normalize_domain(domain);
    if domain.is_empty() {
        return false;
    }

    let pattern = pattern.trim().to_ascii_lowercase();
    let base = pattern.strip_prefix(WILDCARD_PREFIX).unwrap_or(&pattern);
    let base = normalize_domain(base);
    if base.is_empty() {
        return false;
    }

    domain == base
        || (domain.len() > base.len()
            && domain.ends_with(base.as_str())
            && domain.as_bytes()[domain.len() - base.len() - 1] == b'.')
}

pub fn is_whitelisted<S: AsRef<str>>(domain: &str, allow_list: &[S]) -> bool {
    allow_list
        .iter()
        .any(|pattern| pattern_matches(domain, pattern.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_pattern_authorizes_subdomains() {
        assert!(is_whitelisted("api.github.com", &["github.com"]));
        assert!(is_whitelisted("github.com", &["github.com"]));
        assert!(is_whitelisted("mail.example.com", &["example.com"]));
    }

    #[test]
    fn lookalike_suffixes_do_not_match() {
        assert!(!is_whitelisted("github.com.evil.com", &["github.com"]));
        assert!(!is_whitelisted("notgithub.com", &["github.com"]));
    }

    #[test]
    fn empty_domain_fails_closed() {
        assert!(!is_whitelisted("", &["github.com", "*.example.com"]));
        assert!(!is_whitelisted("github.com", &[""]));
    }

    #[test]
    fn wildcard_pattern_matches_base_and_subdomains() {
        assert!(pattern_matches("example.com", "*.example.com"));
        assert!(pattern_matches("a.b.example.com", "*.example.com"));
        assert!(!pattern_matches("badexample.com", "*.example.com"));
    }

    #[test]
    fn matching_is_case_insensitive_and_strips_www() {
        assert!(is_whitelisted("WWW.YouTube.com", &["youtube.com"]));
        assert!(is_whitelisted("youtube.com", &["WWW.YOUTUBE.COM"]));
    }

    #[test]
    fn extracts_host_from_urls() {
        assert_eq!(extract_domain("https://www.youtube.com/watch?v=1"), "youtube.com");
        assert_eq!(extract_domain("http://user:pw@Mail.Example.com:8080/x"), "mail.example.com");
        assert_eq!(extract_domain("https://reddit.com#top"), "reddit.com");
        assert_eq!(extract_domain("https://[::1]:3000/"), "::1");
    }

    #[test]
    fn malformed_or_foreign_urls_yield_empty_domain() {
        assert_eq!(extract_domain("not a url"), "");
        assert_eq!(extract_domain("chrome://extensions"), "");
        assert_eq!(extract_domain("https://"), "");
        assert_eq!(extract_domain("https://exa mple.com/"), "");
        assert!(!is_whitelisted(&extract_domain("garbage"), &["youtube.com"]));
    }
}
