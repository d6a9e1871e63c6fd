//! Command-line splitting and argument screening.
//!
//! A command is split on whitespace and handed to `exec` as an argument
//! vector. No shell ever sees it, so the characters below are rejected
//! outright rather than escaped.

use crate::error::{Result, SandboxError};

/// Characters that would carry meaning to a shell.
pub const DANGEROUS_CHARS: &[char] = &[
    '|', '&', ';', '$', '(', ')', '`', '<', '>', '*', '?', '[', ']', '{', '}', '~', '#', '%', '\'',
    '"', '\\', '!',
];

/// Return the first disallowed character in `arg`, if any.
///
/// Control characters other than tab, newline and carriage return are
/// disallowed along with [`DANGEROUS_CHARS`].
pub fn find_dangerous_char(arg: &str) -> Option<char> {
    arg.chars().find(|&c| {
        DANGEROUS_CHARS.contains(&c) || (c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    })
}

/// Reject `arg` if it contains a disallowed character.
pub fn check_argument(arg: &str) -> Result<()> {
    match find_dangerous_char(arg) {
        Some(character) => Err(SandboxError::DangerousCharacter {
            argument: arg.to_string(),
            character,
        }),
        None => Ok(()),
    }
}

/// A validated argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    argv: Vec<String>,
}

impl CommandLine {
    /// Split `command` on whitespace and screen every field.
    pub fn parse(command: &str) -> Result<Self> {
        let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        Self::from_argv(argv)
    }

    /// Screen a pre-split argument vector.
    pub fn from_argv(argv: Vec<String>) -> Result<Self> {
        match argv.first() {
            None => return Err(SandboxError::EmptyCommand),
            Some(program) if program.trim().is_empty() => return Err(SandboxError::EmptyCommand),
            Some(_) => {}
        }
        for arg in &argv {
            check_argument(arg)?;
        }
        Ok(Self { argv })
    }

    /// The executable as written.
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Arguments after the executable.
    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    /// The full argument vector.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Arguments that look like filesystem paths.
    ///
    /// Flags are skipped; the value of `--flag=value` is not inspected.
    pub fn path_like_args(&self) -> impl Iterator<Item = &str> {
        self.args()
            .iter()
            .map(String::as_str)
            .filter(|arg| !arg.starts_with('-'))
            .filter(|arg| arg.starts_with('/') || arg.starts_with('.') || arg.contains('/'))
    }

    pub fn into_argv(self) -> Vec<String> {
        self.argv
    }
}
