use std::collections::HashSet;

/// Builds the match token list: site first, then extras, trimmed, de-duplicated
/// in first-seen order, with empty entries dropped.
pub fn normalize_tokens<S: AsRef<str>>(site: &str, extra_tokens: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    std::iter::once(site)
        .chain(extra_tokens.iter().map(AsRef::as_ref))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter(|token| seen.insert(*token))
        .map(str::to_string)
        .collect()
}

/// True when `line` contains any token as a literal, case-sensitive substring.
pub fn line_matches(line: &str, tokens: &[String]) -> bool {
    tokens.iter().any(|token| line.contains(token.as_str()))
}
