//! Name and address normalization for fuzzy matching

/// Tokens dropped before comparing venue names and addresses
pub const STOPWORDS: [&str; 7] = ["restaurant", "bar", "cafe", "coffee", "the", "a", "an"];

/// Lowercase, strip punctuation, collapse whitespace, drop stopwords
///
/// A string made only of stopwords ("The Bar") keeps its words, otherwise
/// two such venues would compare as identical empty strings.
pub fn normalize(input: &str) -> String {
    let cleaned: String = input
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c.is_whitespace() {
                Some(' ')
            } else {
                // Punctuation is removed outright so "Joe's" matches "Joes"
                None
            }
        })
        .collect();

    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    let kept: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| !STOPWORDS.contains(t))
        .collect();

    if kept.is_empty() {
        tokens.join(" ")
    } else {
        kept.join(" ")
    }
}

/// Normalize an optional field, mapping blank results to `None`
pub fn normalize_opt(input: Option<&str>) -> Option<String> {
    input.map(normalize).filter(|s| !s.is_empty())
}
