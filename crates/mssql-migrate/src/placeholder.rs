//! `${key}` placeholder substitution.
//!
//! Only recognized names are substituted. An unrecognized `${...}` sequence
//! passes through verbatim, which lets scripts carry literal `${}` text
//! (SQL Server JSON paths, documentation snippets) without escaping. This is
//! a deliberate departure from tools that fail on unknown placeholders.

use std::collections::HashMap;

use chrono::Utc;

/// Values for the built-in `flyway:` placeholders.
///
/// Unset fields are simply not registered, so their placeholders pass
/// through untouched.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderContext {
    pub default_schema: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub table: Option<String>,
    pub filename: Option<String>,
    pub timestamp: Option<String>,
}

impl PlaceholderContext {
    /// Build the context from connection facts, stamping the timestamp now.
    pub fn new(default_schema: &str, database: &str, user: &str, table: &str) -> Self {
        Self {
            default_schema: Some(default_schema.to_string()),
            database: Some(database.to_string()),
            user: Some(user.to_string()),
            table: Some(table.to_string()),
            filename: None,
            timestamp: Some(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }

    /// Return a copy with `flyway:filename` bound to the given script name.
    pub fn with_filename(&self, filename: &str) -> Self {
        let mut ctx = self.clone();
        ctx.filename = Some(filename.to_string());
        ctx
    }
}

/// Substitution engine over a user map plus the built-in context.
pub struct PlaceholderEngine {
    /// Built-ins, keyed lowercase (the `flyway:` namespace is
    /// case-insensitive).
    builtins: HashMap<String, String>,
    /// User placeholders, matched exactly; a user key shadows a built-in.
    user: HashMap<String, String>,
}

impl PlaceholderEngine {
    pub fn new(user: &HashMap<String, String>, context: &PlaceholderContext) -> Self {
        let mut builtins = HashMap::new();
        let mut register = |key: &str, value: &Option<String>| {
            if let Some(v) = value {
                builtins.insert(key.to_lowercase(), v.clone());
            }
        };
        register("flyway:defaultSchema", &context.default_schema);
        register("flyway:database", &context.database);
        register("flyway:user", &context.user);
        register("flyway:table", &context.table);
        register("flyway:filename", &context.filename);
        register("flyway:timestamp", &context.timestamp);

        Self {
            builtins,
            user: user.clone(),
        }
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        if let Some(v) = self.user.get(name) {
            return Some(v);
        }
        self.builtins.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// Substitute recognized placeholders in a single left-to-right pass.
    ///
    /// Replacements are inserted literally; a replacement containing `${...}`
    /// is not expanded again.
    pub fn substitute(&self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len());
        let mut rest = sql;

        while let Some(open) = rest.find("${") {
            out.push_str(&rest[..open]);
            let after_open = &rest[open + 2..];
            match after_open.find('}') {
                Some(close) if close > 0 => {
                    let name = &after_open[..close];
                    match self.lookup(name) {
                        Some(value) => out.push_str(value),
                        None => {
                            out.push_str("${");
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after_open[close + 1..];
                }
                _ => {
                    // Unterminated or empty: copy the opener and move on.
                    out.push_str("${");
                    rest = after_open;
                }
            }
        }
        out.push_str(rest);
        out
    }
}
