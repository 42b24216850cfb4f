use std::fmt;

/// An error produced while compiling a parameter expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprError {
    pub message: String,
    /// The full expression text that failed to compile.
    pub source: String,
    /// 1-based column of the offending character.
    pub col: usize,
}

impl ExprError {
    pub(crate) fn new(msg: impl Into<String>, source: &str, col: usize) -> Self {
        Self {
            message: msg.into(),
            source: source.to_string(),
            col,
        }
    }
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid expression {:?} at column {}: {}",
            self.source, self.col, self.message
        )
    }
}

impl std::error::Error for ExprError {}
