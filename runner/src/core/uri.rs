//! String helpers for store URIs (`mem://a/b`, `file:///a/b`, `/a/b`).
//!
//! Store locations are plain strings rather than `PathBuf`s because they may
//! name remote objects. Joining follows `/`-separated path semantics.

/// Join `segment` onto `base` with exactly one `/` between them.
///
/// An absolute `segment` replaces `base`, as with filesystem paths.
pub fn join(base: &str, segment: &str) -> String {
    if base.is_empty() || segment.starts_with('/') || scheme(segment).is_some() {
        return segment.to_string();
    }
    if base.ends_with('/') {
        format!("{base}{segment}")
    } else {
        format!("{base}/{segment}")
    }
}

/// URI scheme, if `uri` has the form `scheme://...`.
pub fn scheme(uri: &str) -> Option<&str> {
    let (scheme, _) = uri.split_once("://")?;
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}

/// Part of `uri` after `scheme://`, or `uri` itself when it has no scheme.
pub fn strip_scheme(uri: &str) -> &str {
    match scheme(uri) {
        Some(scheme) => &uri[scheme.len() + 3..],
        None => uri,
    }
}

/// Drop trailing `/` separators without collapsing a root (`/`, `mem://`).
pub fn trim_trailing_slash(uri: &str) -> &str {
    let prefix_len = uri.len() - strip_scheme(uri).len();
    let trimmed = uri.trim_end_matches('/');
    if trimmed.len() <= prefix_len {
        let keep = (prefix_len + 1).min(uri.len());
        return &uri[..keep];
    }
    trimmed
}

/// Canonical spelling of `uri` for comparing locations: `.` segments, repeated
/// and trailing `/` are dropped, so `./out//0/` and `out/0` compare equal.
///
/// `..` is kept as is; resolving it would need the filesystem.
pub fn normalize(uri: &str) -> String {
    let path = strip_scheme(uri);
    let mut normalized = uri[..uri.len() - path.len()].to_string();
    if path.starts_with('/') {
        normalized.push('/');
    }
    let segments: Vec<&str> = path
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    normalized.push_str(&segments.join("/"));
    normalized
}

/// Ensure `uri` ends with exactly one `/`.
pub fn with_trailing_slash(uri: &str) -> String {
    format!("{}/", uri.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_inserts_single_separator() {
        assert_eq!(join("mem://out", "0"), "mem://out/0");
        assert_eq!(join("mem://out/", "0"), "mem://out/0");
        assert_eq!(join("/tmp/a", "results/"), "/tmp/a/results/");
        assert_eq!(join("", "x"), "x");
    }

    #[test]
    fn join_absolute_segment_replaces_base() {
        assert_eq!(join("/home/me", "/opt/data"), "/opt/data");
        assert_eq!(join("/home/me", "s3://bucket/x"), "s3://bucket/x");
    }

    #[test]
    fn scheme_detection() {
        assert_eq!(scheme("mem://out"), Some("mem"));
        assert_eq!(scheme("file:///tmp"), Some("file"));
        assert_eq!(scheme("/tmp/a://b"), None);
        assert_eq!(scheme("relative/path"), None);
        assert_eq!(strip_scheme("s3://bucket/key"), "bucket/key");
        assert_eq!(strip_scheme("/plain"), "/plain");
    }

    #[test]
    fn trailing_slash_handling() {
        assert_eq!(trim_trailing_slash("mem://out//"), "mem://out");
        assert_eq!(trim_trailing_slash("/"), "/");
        assert_eq!(trim_trailing_slash("file:///"), "file:///");
        assert_eq!(with_trailing_slash("/tmp/a"), "/tmp/a/");
        assert_eq!(with_trailing_slash("/tmp/a//"), "/tmp/a/");
    }

    #[test]
    fn normalize_drops_dot_segments_and_extra_separators() {
        assert_eq!(normalize("./out/0/status_code"), "out/0/status_code");
        assert_eq!(normalize("out/0/status_code"), "out/0/status_code");
        assert_eq!(normalize("/tmp/./a//b/"), "/tmp/a/b");
        assert_eq!(normalize("file:///tmp//a"), "file:///tmp/a");
        assert_eq!(normalize("mem://out/./0"), "mem://out/0");
        assert_eq!(normalize("../out"), "../out");
        assert_eq!(normalize("/"), "/");
    }
}
