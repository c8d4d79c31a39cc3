//! Maps object keys to the logical folder they belong to.
//!
//! A folder is a monitored prefix plus at most one subfolder segment. Files
//! placed directly under a prefix group into the bare prefix itself.

/// Normalize a set of monitored prefixes so each ends with a single `/`.
///
/// Empty entries are dropped. `"Prebind"` and `"Prebind/"` both normalize to
/// `"Prebind/"`.
pub fn normalize_prefixes<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|p| {
            let trimmed = p.as_ref().trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed.ends_with('/') {
                Some(trimmed.to_string())
            } else {
                Some(format!("{trimmed}/"))
            }
        })
        .collect()
}

/// Extract the logical folder for an object key, or `None` when the key is
/// not under any monitored prefix.
///
/// The first configured prefix that literally prefixes the key wins. The
/// remainder's first path segment becomes the subfolder unless it is an
/// extension-bearing leaf sitting directly under the prefix, in which case
/// the folder is the bare prefix (no trailing separator either way).
///
/// Pure and total: no side effects, no failure mode beyond "no match".
pub fn classify(key: &str, prefixes: &[String]) -> Option<String> {
    for prefix in prefixes {
        if let Some(rest) = key.strip_prefix(prefix.as_str()) {
            let base = prefix.trim_end_matches('/');
            let rest = rest.trim_start_matches('/');
            if !rest.is_empty() {
                let first = rest.split('/').next().unwrap_or("");
                let is_leaf_file = first.contains('.') && !rest.contains('/');
                if !is_leaf_file && !first.is_empty() {
                    return Some(format!("{base}/{first}"));
                }
            }
            return Some(base.to_string());
        }
    }
    None
}

/// True when the key falls under any monitored prefix.
pub fn is_monitored(key: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| key.starts_with(p.as_str()))
}
