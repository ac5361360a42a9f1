//! Table, column and migration-name conventions.

/// `snake_case` of a Rust identifier, treating acronyms as one word
///
/// `UserProfile` -> `user_profile`, `HTTPServer` -> `http_server`,
/// `UserID` -> `user_id`.
#[must_use]
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if prev != '_' && boundary {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Table name for a model: snake case, pluralised with a trailing `s`
/// unless it already ends in one
#[must_use]
pub fn table_name(model: &str) -> String {
    let mut name = snake_case(model);
    if !name.ends_with('s') {
        name.push('s');
    }
    name
}

/// Migration name slug: lower-cased, whitespace and dashes become `_`,
/// everything else non-alphanumeric is dropped
#[must_use]
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_whitespace() || c == '-' || c == '_' {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        }
    }
    out.trim_matches('_').to_string()
}
