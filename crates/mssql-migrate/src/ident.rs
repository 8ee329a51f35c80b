//! SQL Server identifier quoting.
//!
//! Identifiers (schema, table names) cannot be bound as parameters, so any
//! dynamic SQL interpolates them as bracketed identifiers after validation.
//! Row values always go through bound parameters instead.

use crate::error::{MigrateError, Result};

/// Maximum identifier length accepted by SQL Server.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier before quoting.
///
/// Rejects empty identifiers, identifiers containing null bytes, and
/// identifiers exceeding the server's length limit.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config("Identifier cannot be empty".to_string()));
    }
    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }
    Ok(())
}

/// Quote a SQL Server identifier using brackets, doubling any `]`.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a table name with its schema, both bracket-quoted.
pub fn qualify(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(table)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_normal() {
        assert_eq!(quote_ident("users").unwrap(), "[users]");
        assert_eq!(quote_ident("my_table").unwrap(), "[my_table]");
    }

    #[test]
    fn test_quote_escapes_bracket() {
        assert_eq!(quote_ident("table]name").unwrap(), "[table]]name]");
        assert_eq!(quote_ident("a]b]c").unwrap(), "[a]]b]]c]");
    }

    #[test]
    fn test_rejects_empty_and_null_byte() {
        assert!(quote_ident("").is_err());
        assert!(quote_ident("table\0name").is_err());
    }

    #[test]
    fn test_rejects_too_long() {
        let long_name = "a".repeat(MAX_IDENTIFIER_LENGTH + 1);
        assert!(quote_ident(&long_name).is_err());
        let max_name = "a".repeat(MAX_IDENTIFIER_LENGTH);
        assert!(quote_ident(&max_name).is_ok());
    }

    #[test]
    fn test_injection_is_safely_quoted() {
        assert_eq!(
            quote_ident("Robert]; DROP TABLE Students;--").unwrap(),
            "[Robert]]; DROP TABLE Students;--]"
        );
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("dbo", "users").unwrap(), "[dbo].[users]");
    }
}
