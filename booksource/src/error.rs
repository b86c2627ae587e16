use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/**
    The four failure classes surfaced by the engine.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Parse,
    Source,
    Unknown,
}

impl ErrorKind {
    /**
        Whether a caller may reasonably retry (or switch source) after this failure.
    */
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Unknown)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "NetworkError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Source => "SourceError",
            ErrorKind::Unknown => "UnknownError",
        };
        f.write_str(name)
    }
}

/**
    Where an error happened. Fields are filled as the error crosses component
    boundaries; a field that is already set is never overwritten.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub source_id: Option<String>,
    pub module: Option<String>,
    pub field_path: Option<String>,
    pub url: Option<String>,
    pub expr: Option<String>,
}

impl ErrorContext {
    pub fn is_empty(&self) -> bool {
        self.source_id.is_none()
            && self.module.is_none()
            && self.field_path.is_none()
            && self.url.is_none()
            && self.expr.is_none()
    }

    /**
        Merge `other` into `self`, keeping every field `self` already has.
    */
    pub fn merge(&mut self, other: ErrorContext) {
        fill(&mut self.source_id, other.source_id);
        fill(&mut self.module, other.module);
        fill(&mut self.field_path, other.field_path);
        fill(&mut self.url, other.url);
        fill(&mut self.expr, other.expr);
    }
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value;
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [
            ("source", &self.source_id),
            ("module", &self.module),
            ("field", &self.field_path),
            ("url", &self.url),
            ("expr", &self.expr),
        ];
        let mut first = true;
        for (label, value) in parts {
            if let Some(value) = value {
                f.write_str(if first { " [" } else { ", " })?;
                write!(f, "{}={}", label, value)?;
                first = false;
            }
        }
        if !first {
            f.write_str("]")?;
        }
        Ok(())
    }
}

/**
    Error raised anywhere in rule parsing, evaluation, fetching or source loading.
*/
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}{context}")]
pub struct RuleError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: ErrorContext,
    #[source]
    cause: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl RuleError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: ErrorContext::default(),
            cause: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn invalid_source(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Source, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    #[must_use]
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        self.cause = Some(Arc::from(cause.into()));
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context.merge(context);
        self
    }

    #[must_use]
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        fill(&mut self.context.source_id, Some(source_id.into()));
        self
    }

    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        fill(&mut self.context.module, Some(module.into()));
        self
    }

    #[must_use]
    pub fn with_field(mut self, field_path: impl Into<String>) -> Self {
        fill(&mut self.context.field_path, Some(field_path.into()));
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        fill(&mut self.context.url, Some(url.into()));
        self
    }

    #[must_use]
    pub fn with_expr(mut self, expr: impl Into<String>) -> Self {
        fill(&mut self.context.expr, Some(expr.into()));
        self
    }
}

impl From<regex::Error> for RuleError {
    fn from(e: regex::Error) -> Self {
        Self::parse(format!("invalid regex: {}", e)).with_cause(e)
    }
}

impl From<serde_json::Error> for RuleError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse(format!("invalid JSON: {}", e)).with_cause(e)
    }
}

/**
    Type alias for results that may return a [`RuleError`].
*/
pub type RuleResult<T> = std::result::Result<T, RuleError>;
