use thiserror::Error;

/// Failure to turn raw text into a document tree.
///
/// Line and column are 1-based when the YAML backend reports a position.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", render_parse_error(.message, .line, .column))]
pub struct ParseError {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

fn render_parse_error(message: &str, line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(line), Some(column)) => {
            format!("YAML parse error at line {line}, column {column}: {message}")
        }
        (Some(line), None) => format!("YAML parse error at line {line}: {message}"),
        _ => format!("YAML parse error: {message}"),
    }
}

/// Error raised from inside a rule's `check`.
///
/// The engine never propagates these; each one becomes a synthetic issue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("unexpected document shape at '{path}': {reason}")]
    Shape { path: String, reason: String },

    #[error("invalid pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

impl RuleError {
    pub fn failed(message: impl Into<String>) -> Self {
        RuleError::Failed(message.into())
    }
}

/// Errors while loading an analysis configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("custom pattern '{id}' has an invalid regex: {source}")]
    InvalidPattern { id: String, source: regex::Error },

    #[error("custom pattern '{id}' names unknown platform '{platform}'")]
    UnknownPlatform { id: String, platform: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_with_location() {
        let err = ParseError::new("mapping values are not allowed here").at(3, 7);
        assert_eq!(
            err.to_string(),
            "YAML parse error at line 3, column 7: mapping values are not allowed here"
        );
    }

    #[test]
    fn test_parse_error_display_without_location() {
        let err = ParseError::new("unexpected end of stream");
        assert_eq!(err.to_string(), "YAML parse error: unexpected end of stream");
    }
}
