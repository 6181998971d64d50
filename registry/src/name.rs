use crate::error::{RegistryError, Result};

const MAX_NAME_LENGTH: usize = 255;
const MAX_LABEL_LENGTH: usize = 63;

/// Checks a dotted DNS name: non-empty, at most 255 bytes, no empty or
/// over-long labels. A single trailing dot is allowed.
pub fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.strip_suffix('.').unwrap_or(name);

    if trimmed.is_empty() {
        return Err(RegistryError::InvalidArgs("empty name".to_string()));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(RegistryError::InvalidArgs(format!("name too long: {}", name)));
    }
    for label in trimmed.split('.') {
        validate_label(label).map_err(|_| {
            RegistryError::InvalidArgs(format!("malformed label in name: {}", name))
        })?;
    }
    Ok(())
}

/// Checks a single label such as a service instance name.
pub fn validate_label(label: &str) -> Result<()> {
    if label.is_empty() {
        return Err(RegistryError::InvalidArgs("empty label".to_string()));
    }
    if label.len() > MAX_LABEL_LENGTH {
        return Err(RegistryError::InvalidArgs(format!("label too long: {}", label)));
    }
    Ok(())
}

/// Validates a domain and returns it with exactly one trailing dot.
pub fn normalize_domain(domain: &str) -> Result<String> {
    validate_name(domain)?;
    if domain.ends_with('.') {
        Ok(domain.to_string())
    } else {
        Ok(format!("{}.", domain))
    }
}

/// True if `name` lies strictly below `domain`. Case-insensitive, and
/// tolerant of a missing trailing dot on `name`.
pub fn is_sub_domain(name: &str, domain: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name).to_ascii_lowercase();
    let domain = domain.strip_suffix('.').unwrap_or(domain).to_ascii_lowercase();

    name.len() > domain.len() + 1
        && name.ends_with(&domain)
        && name.as_bytes()[name.len() - domain.len() - 1] == b'.'
}
