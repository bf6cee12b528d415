//! Credential redaction for logs and reports.

/// Show only the first and last four characters of a credential.
///
/// Short values are fully masked so that the visible characters never make
/// up a meaningful share of the secret.
pub fn redact_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
