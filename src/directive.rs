//! Script directives.

use std::fmt;

/// One script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// 1-based position in the script. Blank lines count.
    pub line: u64,
    /// Line content without its line ending.
    pub text: String,
}

impl Directive {
    /// Directive at `line`, stripping a trailing `\r` left by CRLF scripts.
    pub fn new(line: u64, text: impl Into<String>) -> Self {
        let mut text = text.into();
        if text.ends_with('\r') {
            text.pop();
        }
        Self { line, text }
    }

    /// A query expects a response: any directive containing `?`.
    pub fn is_query(&self) -> bool {
        self.text.contains('?')
    }

    /// Empty or whitespace only. Blank directives are numbered but not sent.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Sequence label used in the transcript, e.g. `0000003: *IDN?`.
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:07}: {}", self.line, self.text)
    }
}
