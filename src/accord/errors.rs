//! Unified error type for the negotiation engine.
//!
//! Every fallible seam in the crate reports an [`AccordError`]: a machine
//! readable [`ErrorKind`], a human readable message, an optional cause, and
//! the structured [`ErrorContext`] (which negotiation, which stage, which
//! skill) needed to attribute the failure without parsing strings.
//!
//! # Example
//!
//! ```rust
//! use accord::errors::{AccordError, ErrorKind};
//!
//! let err = AccordError::skill("offer_generation: content is empty")
//!     .with_negotiation("neg_123")
//!     .with_stage("offering")
//!     .with_skill("offer_generation");
//!
//! assert_eq!(err.kind(), ErrorKind::Skill);
//! assert!(err.to_string().contains("content is empty"));
//! ```

use std::error::Error;
use std::fmt;

/// Classification of a failure, mirroring the module that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client-side chat failure (network, auth, quota) from a Profile Source.
    Adapter,
    /// Platform-side reasoning service failure.
    Reasoning,
    /// Invalid skill output (missing field, empty required text, LLM error
    /// pattern, invalid tool name).
    Skill,
    /// Engine internal error (invalid state transition, barrier bug).
    Engine,
    /// Vector encoding failure (empty input, zero norm, model load).
    Encoding,
    /// Configuration error (missing env var, malformed vectors archive).
    Config,
}

impl ErrorKind {
    /// Stable lowercase code for logs and wire payloads.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Adapter => "adapter",
            ErrorKind::Reasoning => "reasoning",
            ErrorKind::Skill => "skill",
            ErrorKind::Engine => "engine",
            ErrorKind::Encoding => "encoding",
            ErrorKind::Config => "config",
        }
    }
}

/// Where the failure happened, attached to the error rather than encoded in
/// the message text.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub negotiation_id: Option<String>,
    pub stage: Option<String>,
    pub skill: Option<String>,
}

/// The crate-wide error type.
#[derive(Debug)]
pub struct AccordError {
    kind: ErrorKind,
    message: String,
    context: ErrorContext,
    cause: Option<Box<dyn Error + Send + Sync>>,
}

impl AccordError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: ErrorContext::default(),
            cause: None,
        }
    }

    pub fn adapter(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Adapter, message)
    }

    pub fn reasoning(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Reasoning, message)
    }

    pub fn skill(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Skill, message)
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Engine, message)
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Encoding, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Attach the underlying error that triggered this one.
    pub fn with_cause(mut self, cause: Box<dyn Error + Send + Sync>) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_negotiation(mut self, negotiation_id: impl Into<String>) -> Self {
        self.context.negotiation_id = Some(negotiation_id.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.context.stage = Some(stage.into());
        self
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.context.skill = Some(skill.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }
}

impl fmt::Display for AccordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.code(), self.message)?;
        if let Some(neg) = &self.context.negotiation_id {
            write!(f, " (negotiation={})", neg)?;
        }
        if let Some(stage) = &self.context.stage {
            write!(f, " (stage={})", stage)?;
        }
        if let Some(skill) = &self.context.skill {
            write!(f, " (skill={})", skill)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl Error for AccordError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_context() {
        let err = AccordError::engine("invalid state transition: completed -> offering")
            .with_negotiation("neg_abc")
            .with_stage("offering");
        let text = err.to_string();
        assert!(text.contains("[engine]"));
        assert!(text.contains("invalid state transition"));
        assert!(text.contains("negotiation=neg_abc"));
        assert!(text.contains("stage=offering"));
    }

    #[test]
    fn test_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = AccordError::config("malformed vectors archive").with_cause(Box::new(io));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(ErrorKind::Adapter.code(), "adapter");
        assert_eq!(ErrorKind::Skill.code(), "skill");
        assert_eq!(ErrorKind::Config.code(), "config");
    }
}
