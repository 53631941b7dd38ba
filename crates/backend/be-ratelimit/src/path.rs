use percent_encoding::percent_decode_str;

/// Canonical form of a request path used for exempt and route matching.
///
/// Query string and fragment are dropped, segments are percent-decoded and
/// `.`/`..` are resolved so traversal cannot land on a different prefix.
pub fn normalize_path(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    let path = path.split('#').next().unwrap_or(path);

    let mut segments: Vec<String> = Vec::new();
    for seg in path.split('/') {
        let decoded = percent_decode_str(seg).decode_utf8_lossy();
        match decoded.as_ref() {
            "." | "" => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s.to_owned()),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Prefix match on normalized paths. A configured prefix with a trailing
/// slash still matches the bare directory.
pub fn matches_prefix(normalized: &str, prefix: &str) -> bool {
    let prefix = normalize_path(prefix);
    if prefix == "/" {
        return true;
    }
    normalized == prefix
        || normalized
            .strip_prefix(prefix.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_dot_segments() {
        assert_eq!(normalize_path("/a/b/../c"), "/a/c");
        assert_eq!(normalize_path("/a/./b/c"), "/a/b/c");
        assert_eq!(normalize_path("/a/b/../../c"), "/c");
        assert_eq!(normalize_path("/../a"), "/a");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn strips_query_and_fragment() {
        assert_eq!(
            normalize_path("/api/payments/chapa/verify?tx_ref=tx_1"),
            "/api/payments/chapa/verify"
        );
        assert_eq!(normalize_path("/health#top"), "/health");
    }

    #[test]
    fn decodes_percent_encoded_traversal() {
        assert_eq!(normalize_path("/health/%2e%2e/api/payments"), "/api/payments");
        assert_eq!(normalize_path("/api//payments/"), "/api/payments");
    }

    #[test]
    fn prefix_matching_respects_segment_boundaries() {
        assert!(matches_prefix("/api/auth/login", "/api/auth"));
        assert!(matches_prefix("/api/auth", "/api/auth/"));
        assert!(!matches_prefix("/api/authors", "/api/auth"));
        assert!(matches_prefix("/anything", "/"));
    }
}
