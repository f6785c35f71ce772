use serde::{Deserialize, Serialize};

use crate::internal::exec::expr::parse_expression;
use crate::internal::message::envelope::Metadata;
use crate::internal::message::wire::wire_enum;

wire_enum! {
    /// How a snippet is handed to the kernel.
    pub enum ExecutionMode {
        /// Evaluate a single expression and report its value.
        Value => "eval",
        /// Run a sequence of statements.
        Statement => "exec",
    }
}

/// Line span of the snippet inside the editor, sent by the UI as
/// `metadata.line_range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    #[serde(rename = "fromLine")]
    pub from_line: i64,
    #[serde(rename = "toLine")]
    pub to_line: i64,
}

impl LineRange {
    pub fn new(from_line: i64, to_line: i64) -> Self {
        Self { from_line, to_line }
    }

    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        metadata
            .get("line_range")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn spans_multiple_lines(&self) -> bool {
        self.to_line.saturating_sub(self.from_line) > 1
    }
}

/// Picks the execution mode for `source`.
///
/// Statement mode wins whenever the hint spans several lines or the source
/// is not a single expression. Pure: no state, no I/O.
pub fn infer_execution_mode(source: &str, hint: Option<LineRange>) -> ExecutionMode {
    let mut mode = ExecutionMode::Value;

    if hint.map_or(false, |range| range.spans_multiple_lines()) {
        mode = ExecutionMode::Statement;
    }

    if parse_expression(source).is_err() {
        mode = ExecutionMode::Statement;
    }

    mode
}
