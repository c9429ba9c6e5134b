//! Client command line.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Program name and arguments of the monitored client
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientCommandLine {
    /// Executable
    pub exe: String,
    /// Arguments, without the executable
    pub args: Vec<String>,
}

impl ClientCommandLine {
    /// Create a new command line
    #[must_use]
    pub fn new(exe: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            exe: exe.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a recorded command line.
    ///
    /// The executable runs up to the first whitespace character; the rest
    /// is split on whitespace runs.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let (exe, rest) = match text.find(is_space) {
            Some(at) => (&text[..at], &text[at..]),
            None => (&text[..], ""),
        };
        Self {
            exe: exe.to_string(),
            args: rest
                .split(is_space)
                .filter(|arg| !arg.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Joined form written to the log: executable, then `" arg"` per argument
impl fmt::Display for ClientCommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.exe)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

// Same set as C isspace, which is wider than char::is_ascii_whitespace
fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0B' | '\x0C' | '\r')
}
