#![allow(dead_code)]

#[cfg(test)]
mod test;

pub mod function;

pub use function::{Compiler, Function, FunctionSpec, In, Out};

use symfun_backend::{ModeError, RewriteError, RunError};
use symfun_common::lines;
use symfun_common::report_error::{report_error, Report, Reportable};
use symfun_graph::{AliasedMemoryError, GraphError, SharedError, Type, VarId};
use std::fmt;
use std::io;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
enum ErrorKind {
    #[error("input {index} ({var:?}) is declared twice")]
    DuplicateInput { index: usize, var: VarId },
    #[error("input {index} ({var:?}) is neither a graph input nor a shared value")]
    InvalidInput { index: usize, var: VarId },
    #[error("{var:?} has an update but is not a shared value")]
    UpdateOnNonShared { var: VarId },
    #[error("shared value '{name}' has type {expected} but its update has type {got}")]
    UpdateTypeMismatch {
        name: String,
        expected: Type,
        got: Type,
    },
    #[error("shared value '{name}' has more than one update")]
    DuplicateUpdate { name: String },
    #[error("input {index}{} is not used to compute any output", fmt_name(.name))]
    UnusedInput { index: usize, name: Option<String> },
    #[error("the function takes {expected} arguments but {got} were given")]
    ArgumentCount { expected: usize, got: usize },
    #[error("argument {index} should have type {expected} but has type {got}")]
    ArgumentType {
        index: usize,
        expected: Type,
        got: Type,
    },
    #[error(transparent)]
    Shared(#[from] SharedError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error(transparent)]
    AliasedMemory(#[from] AliasedMemoryError),
    #[error(transparent)]
    Mode(#[from] ModeError),
    #[error(transparent)]
    Run(#[from] RunError),
}

fn fmt_name(name: &Option<String>) -> String {
    match name {
        Some(name) => format!(" '{}'", name),
        None => String::new(),
    }
}

// This type is separate from 'ErrorKind' so that callers can report and display errors without
// depending on the layout of every error type the pipeline can produce.
#[derive(Clone, Debug, PartialEq)]
pub struct Error {
    kind: ErrorKind,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { kind }
    }
}

macro_rules! error_from {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for Error {
                fn from(err: $source) -> Self {
                    ErrorKind::from(err).into()
                }
            }
        )*
    };
}

error_from!(
    SharedError,
    GraphError,
    RewriteError,
    AliasedMemoryError,
    ModeError,
    RunError,
);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl std::error::Error for Error {}

impl Error {
    fn title(&self) -> &'static str {
        use ErrorKind::*;
        match &self.kind {
            DuplicateInput { .. }
            | InvalidInput { .. }
            | UpdateOnNonShared { .. }
            | UpdateTypeMismatch { .. }
            | DuplicateUpdate { .. } => "Invalid Function Signature",
            UnusedInput { .. } => "Unused Input",
            ArgumentCount { .. } | ArgumentType { .. } => "Bad Argument",
            Shared(_) => "Shared Value",
            Graph(_) => "Invalid Graph",
            Rewrite(RewriteError::AliasedMemory(_)) | AliasedMemory(_) => "Aliased Memory",
            Rewrite(_) => "Rewrite Failed",
            Mode(_) => "Unknown Mode",
            Run(_) => "Runtime Error",
        }
    }

    fn hint(&self) -> Option<&'static str> {
        use ErrorKind::*;
        match &self.kind {
            UnusedInput { .. } => Some(lines![
                "Remove the input from the signature, or compile with",
                "",
                "  on_unused_input: OnUnusedInput::Warn",
                "",
                "to accept it.",
            ]),
            AliasedMemory(AliasedMemoryError::InplaceNotAccepted { .. }) => Some(
                "Set accept_inplace to compile graphs that already contain destructive operations.",
            ),
            AliasedMemory(AliasedMemoryError::Protected { .. }) => Some(
                "Only inputs declared mutable and shared values with an update may be \
                 overwritten.",
            ),
            Shared(SharedError::Released { .. }) => {
                Some("A released shared value cannot be read or updated again.")
            }
            _ => None,
        }
    }
}

impl Reportable for Error {
    fn report(&self, dest: &mut impl io::Write) -> io::Result<()> {
        let subject = self.kind.to_string();
        report_error(
            dest,
            Report {
                title: self.title(),
                subject: Some(&subject),
                message: self.hint(),
            },
        )
    }

    fn exit_status(&self) -> i32 {
        1
    }
}
