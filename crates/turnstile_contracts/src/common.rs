#![forbid(unsafe_code)]

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum ContractViolation {
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    InvalidRange {
        field: &'static str,
        min: f64,
        max: f64,
        got: f64,
    },
}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}

pub(crate) fn validate_id(
    field: &'static str,
    s: &str,
    max_len: usize,
) -> Result<(), ContractViolation> {
    if s.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if s.len() > max_len {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "too long",
        });
    }
    if !s.is_ascii() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be ASCII",
        });
    }
    Ok(())
}

pub(crate) fn validate_text(
    field: &'static str,
    s: &str,
    max_len: usize,
) -> Result<(), ContractViolation> {
    if s.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if s.len() > max_len {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "too long",
        });
    }
    Ok(())
}

/// Mask a scanned code for logs and audit rows: first four characters plus
/// an ellipsis, or the code verbatim when it is that short already.
/// Counts characters, not bytes, so arbitrary scanner input never splits a
/// multi-byte sequence.
pub fn mask_token(token: &str) -> String {
    if token.chars().count() > 4 {
        let prefix: String = token.chars().take(4).collect();
        format!("{prefix}...")
    } else {
        token.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_token_keeps_prefix_only() {
        assert_eq!(mask_token("ABCDEFGH"), "ABCD...");
        assert_eq!(mask_token("AB"), "AB");
        assert_eq!(mask_token(""), "");
    }

    #[test]
    fn mask_token_handles_multibyte_input() {
        assert_eq!(mask_token("ařřob"), "ařřo...");
        assert_eq!(mask_token("ařř"), "ařř");
    }
}
