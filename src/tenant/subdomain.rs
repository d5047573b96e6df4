use crate::error::LifecycleError;

pub const MIN_LEN: usize = 3;
pub const MAX_LEN: usize = 63;

/// Lowercase, keep only `[a-z0-9-]`, trim leading/trailing hyphens.
pub fn normalize(raw: &str) -> String {
    let kept: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();
    kept.trim_matches('-').to_string()
}

/// Normalize and check the length of a subdomain label.
pub fn validate(raw: &str) -> Result<String, LifecycleError> {
    let subdomain = normalize(raw);
    if subdomain.len() < MIN_LEN || subdomain.len() > MAX_LEN {
        return Err(LifecycleError::Validation(format!(
            "Subdomain must be between {} and {} characters (letters, digits and hyphens).",
            MIN_LEN, MAX_LEN
        )));
    }
    Ok(subdomain)
}
