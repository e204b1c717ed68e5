//! Structured compile/runtime errors shared across every component.

use std::fmt::Debug;

use crate::ir::plan::NodeId;

/// Where an error originates. There is no source-text lexer in this crate
/// (plans are built directly against the arena, see the crate root doc), so
/// a span identifies the plan node that raised the error rather than a byte
/// range into source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span(pub NodeId);

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub span: Option<Span>,
    pub reason: Reason,
    pub hints: Vec<String>,
    pub code: Option<&'static str>,
}

/// The closed set of error kinds from the error-handling design: `ParseError`
/// is raised only by the external parser and is not constructed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "PascalCase")]
pub enum ErrorKind {
    Resolution,
    Type,
    Udf,
    GroupBy,
    Optimizer,
    Compilation,
    Runtime,
}

#[derive(Debug, Clone)]
pub enum Reason {
    Simple(String),
    NotFound {
        name: String,
        namespace: String,
    },
    Ambiguous {
        name: String,
        candidates: usize,
    },
    Expected {
        who: Option<String>,
        expected: String,
        found: String,
    },
    Unexpected {
        found: String,
    },
    TypeMismatch {
        who: Option<String>,
        expected: String,
        found: String,
    },
}

impl Error {
    pub fn new(kind: ErrorKind, reason: Reason) -> Self {
        Error {
            kind,
            span: None,
            reason,
            hints: Vec::new(),
            code: None,
        }
    }

    pub fn simple<S: ToString>(kind: ErrorKind, reason: S) -> Self {
        Error::new(kind, Reason::Simple(reason.to_string()))
    }

    pub fn not_found(kind: ErrorKind, name: impl ToString, namespace: &'static str) -> Self {
        Error::new(
            kind,
            Reason::NotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            },
        )
    }

    pub fn ambiguous(kind: ErrorKind, name: impl ToString, candidates: usize) -> Self {
        Error::new(
            kind,
            Reason::Ambiguous {
                name: name.to_string(),
                candidates,
            },
        )
    }

    pub fn type_mismatch(kind: ErrorKind, who: Option<String>, expected: impl ToString, found: impl ToString) -> Self {
        Error::new(
            kind,
            Reason::TypeMismatch {
                who,
                expected: expected.to_string(),
                found: found.to_string(),
            },
        )
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::Simple(text) => f.write_str(text),
            Reason::NotFound { name, namespace } => {
                write!(f, "{namespace} `{name}` not found")
            }
            Reason::Ambiguous { name, candidates } => {
                write!(f, "`{name}` is ambiguous ({candidates} candidates match)")
            }
            Reason::Expected {
                who,
                expected,
                found,
            } => {
                if let Some(who) = who {
                    write!(f, "{who} ")?;
                }
                write!(f, "expected {expected}, but found {found}")
            }
            Reason::Unexpected { found } => write!(f, "unexpected {found}"),
            Reason::TypeMismatch {
                who,
                expected,
                found,
            } => {
                if let Some(who) = who {
                    write!(f, "{who}: ")?;
                }
                write!(f, "type mismatch, expected {expected} but found {found}")
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_ref(), self.reason)?;
        for hint in &self.hints {
            write!(f, "\n  hint: {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

pub trait WithErrorInfo: Sized {
    fn push_hint<S: Into<String>>(self, hint: S) -> Self;
    fn with_hints<S: Into<String>, I: IntoIterator<Item = S>>(self, hints: I) -> Self;
    fn with_span(self, span: Option<Span>) -> Self;
    fn with_code(self, code: &'static str) -> Self;
}

impl WithErrorInfo for Error {
    fn push_hint<S: Into<String>>(mut self, hint: S) -> Self {
        self.hints.push(hint.into());
        self
    }

    fn with_hints<S: Into<String>, I: IntoIterator<Item = S>>(mut self, hints: I) -> Self {
        self.hints = hints.into_iter().map(|x| x.into()).collect();
        self
    }

    fn with_span(mut self, span: Option<Span>) -> Self {
        self.span = span;
        self
    }

    fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }
}

impl<T, E: WithErrorInfo> WithErrorInfo for Result<T, E> {
    fn push_hint<S: Into<String>>(self, hint: S) -> Self {
        self.map_err(|e| e.push_hint(hint))
    }

    fn with_hints<S: Into<String>, I: IntoIterator<Item = S>>(self, hints: I) -> Self {
        self.map_err(|e| e.with_hints(hints))
    }

    fn with_span(self, span: Option<Span>) -> Self {
        self.map_err(|e| e.with_span(span))
    }

    fn with_code(self, code: &'static str) -> Self {
        self.map_err(|e| e.with_code(code))
    }
}
