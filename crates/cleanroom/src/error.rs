use crate::parser::ParseError;
use crate::sandbox::Denial;
use crate::signature::ArgumentError;
use ariadne::{Config, Label, Report, ReportKind, Source};
use std::fmt;
use std::io;
use std::ops::Range;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("{denial}")]
    Denied { denial: Denial, span: Range<usize> },
    /// The forwarded method failed, its error is passed through untouched.
    #[error(transparent)]
    Method(anyhow::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("{method}: {source}")]
    Argument {
        method: String,
        source: ArgumentError,
        span: Range<usize>,
    },
    #[error("{message}")]
    Script { message: String, span: Range<usize> },
}

impl EvalError {
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Self::Denied { denial, .. } => Some(denial),
            _ => None,
        }
    }

    pub fn span(&self) -> Option<Range<usize>> {
        match self {
            Self::Denied { span, .. } | Self::Argument { span, .. } | Self::Script { span, .. } => {
                Some(span.clone())
            }
            Self::Syntax(error) => error.diagnostics.first().map(|diagnostic| diagnostic.span.clone()),
            Self::Method(_) | Self::Io(_) => None,
        }
    }

    /// Renders the error against the source it came from.
    pub fn report(&self, filename: &str, source: &str) -> String {
        match self {
            Self::Syntax(error) => error.report(filename, source),
            Self::Denied { denial, span } => render(
                filename,
                source,
                &self.to_string(),
                span.clone(),
                &format!("denied: {}", denial.kind()),
            ),
            Self::Argument { span, .. } | Self::Script { span, .. } => {
                render(filename, source, &self.to_string(), span.clone(), "here")
            }
            Self::Method(error) => format!("Error: {error:#}"),
            Self::Io(error) => format!("Error: {error}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub reason: String,
    pub span: Range<usize>,
}

/// Lexer or parser diagnostics, owned so they outlive the source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", summary(.filename, .diagnostics))]
pub struct SyntaxError {
    filename: Option<String>,
    diagnostics: Vec<Diagnostic>,
}

impl SyntaxError {
    pub(crate) fn from_errors<'code, T: fmt::Display + 'code>(
        errors: impl IntoIterator<Item = ParseError<'code, T>>,
    ) -> Self {
        let diagnostics = errors
            .into_iter()
            .map(|error| Diagnostic {
                message: error.to_string(),
                reason: error.reason().to_string(),
                span: error.span().into_range(),
            })
            .collect();
        Self {
            filename: None,
            diagnostics,
        }
    }

    pub(crate) fn in_file(self, path: &Path) -> Self {
        Self {
            filename: Some(path.display().to_string()),
            ..self
        }
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn report(&self, filename: &str, source: &str) -> String {
        self.diagnostics
            .iter()
            .map(|diagnostic| {
                render(
                    filename,
                    source,
                    &diagnostic.message,
                    diagnostic.span.clone(),
                    &diagnostic.reason,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn summary(filename: &Option<String>, diagnostics: &[Diagnostic]) -> String {
    let message = diagnostics
        .first()
        .map_or("invalid syntax", |diagnostic| diagnostic.message.as_str());
    match filename {
        Some(filename) => format!("syntax error in {filename}: {message}"),
        None => format!("syntax error: {message}"),
    }
}

fn render(filename: &str, source: &str, message: &str, span: Range<usize>, label: &str) -> String {
    let mut report_bytes = Vec::new();
    let written = Report::build(ReportKind::Error, (filename, span.clone()))
        .with_config(Config::default().with_color(false))
        .with_message(message)
        .with_label(Label::new((filename, span)).with_message(label))
        .finish()
        .write((filename, Source::from(source)), &mut report_bytes);
    match written {
        Ok(()) => String::from_utf8_lossy(&report_bytes).into_owned(),
        Err(_) => format!("Error: {message}"),
    }
}
