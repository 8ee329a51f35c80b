//! Batch splitting on the client-side `GO` separator.
//!
//! `GO` is not T-SQL; it is an instruction to the client to send everything
//! accumulated so far as one batch. A separator line contains only `GO`,
//! optionally followed by a decimal repeat count. Because the match is
//! line-anchored, `GOTO` or a `'GO'` string literal inside a longer line
//! never splits a batch, so no string or comment awareness is needed.

use std::sync::LazyLock;

use regex::Regex;

static GO_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*GO(?:\s+(\d+))?\s*$").expect("valid GO regex"));

/// One batch of a script, as sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlBatch {
    /// The batch text, without the terminating GO line.
    pub sql: String,
    /// How many times the batch is executed (`GO N`).
    pub repeat_count: u32,
    /// 1-based line number of the first non-blank line, for diagnostics.
    pub start_line: usize,
}

/// Split a script into batches on `GO` separator lines.
///
/// Runs of consecutive `GO` lines produce no empty batches; trailing content
/// after the final `GO` forms one more batch with a repeat count of 1.
pub fn split(script: &str) -> Vec<SqlBatch> {
    let mut batches = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut start_line = 0usize;

    let mut flush = |lines: &mut Vec<&str>, start: usize, repeat: u32| {
        let sql = lines.join("\n");
        if !sql.trim().is_empty() {
            batches.push(SqlBatch {
                sql,
                repeat_count: repeat.max(1),
                start_line: start,
            });
        }
        lines.clear();
    };

    for (idx, line) in script.lines().enumerate() {
        if let Some(caps) = GO_LINE.captures(line) {
            let repeat = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(1);
            flush(&mut current, start_line, repeat);
            start_line = 0;
        } else {
            if start_line == 0 && !line.trim().is_empty() {
                start_line = idx + 1;
            }
            current.push(line);
        }
    }
    flush(&mut current, start_line, 1);

    batches
}
