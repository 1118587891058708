//! Validation of names handed to the packet filter engine
//!
//! Table and chain names travel to libiptc as C strings inside 32-byte label
//! buffers, so they must be non-empty, NUL-free and at most 31 bytes.

/// Longest table or chain name, terminator excluded (`XT_TABLE_MAXNAMELEN - 1`).
pub const MAX_NAME_LEN: usize = 31;

fn validate_label(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Name is empty".to_string());
    }

    if name.len() > MAX_NAME_LEN {
        return Err(format!("Name too long (max {MAX_NAME_LEN} bytes)"));
    }

    if name.contains('\0') {
        return Err("Name contains a NUL byte".to_string());
    }

    Ok(())
}

/// Validates a table name such as `filter` or `mangle`.
///
/// # Examples
///
/// ```
/// use nfsnap::validators::validate_table_name;
///
/// assert!(validate_table_name("filter").is_ok());
/// assert!(validate_table_name("").is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` with a reason if the name cannot be passed to the engine.
pub fn validate_table_name(name: &str) -> Result<(), String> {
    validate_label(name)
}

/// Validates a chain name.
///
/// Accepts every label the engine can enumerate, so names returned by a
/// chain listing always validate, control characters included.
///
/// # Errors
///
/// Returns `Err` with a reason if the name cannot be passed to the engine.
pub fn validate_chain_name(name: &str) -> Result<(), String> {
    validate_label(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_are_valid() {
        for name in ["INPUT", "FORWARD", "OUTPUT", "PREROUTING", "POSTROUTING"] {
            assert!(validate_chain_name(name).is_ok(), "{name}");
        }
        for name in ["filter", "nat", "mangle", "raw", "security"] {
            assert!(validate_table_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_empty_name() {
        assert!(validate_chain_name("").is_err());
        assert!(validate_table_name("").is_err());
    }

    #[test]
    fn test_name_length_limit() {
        assert!(validate_chain_name(&"a".repeat(MAX_NAME_LEN)).is_ok());
        let err = validate_chain_name(&"a".repeat(MAX_NAME_LEN + 1)).unwrap_err();
        assert!(err.contains("too long"));
    }

    #[test]
    fn test_nul_byte() {
        let err = validate_table_name("filter\0").unwrap_err();
        assert!(err.contains("NUL"));
    }

    #[test]
    fn test_control_characters_in_chain_are_accepted() {
        assert!(validate_chain_name("f2b\tsshd").is_ok());
        assert!(validate_chain_name("LOG\nDROP").is_ok());
        assert!(validate_chain_name("f2b-sshd").is_ok());
        assert!(validate_chain_name("LOG\0DROP").is_err());
    }
}
