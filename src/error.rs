//! Centralised error hierarchy for the **PHP expression evaluator**.
//!
//! All subsystems (factory, evaluation protocol, call dispatch) must convert
//! their internal failure modes into one of the variants defined here.  This
//! enables a uniform `Result<T>` alias throughout the crate while still
//! preserving rich diagnostic detail.
//!
//! Recoverable guest-language warnings and notices are **not** errors in this
//! hierarchy: they flow through [`crate::env::Env::error`], which records them
//! and lets evaluation continue with a null value.  Variants here abort the
//! evaluation in progress.

use std::time::Duration;

use thiserror::Error;

use log::info;

/// Canonical error type used throughout the evaluator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PhloxError {
    /// Construction-time failure: the factory was asked to build an
    /// impossible construct (e.g. assigning to a literal).  Fails the
    /// compile step, never deferred to execution.
    #[error("[line {line}] Error: {message}")]
    Factory {
        /// Human-readable description.
        message: String,

        /// 1-based line where the construct appeared, 0 when unknown.
        line: u32,
    },

    /// Hard runtime failure the guest program cannot recover from
    /// (e.g. `new` on an undefined class, call-stack overflow).
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// A node was evaluated in a context its kind can never support
    /// (e.g. reading `$a[]`).  Indicates a factory/parser bug, not guest
    /// program behaviour.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Cooperative execution timeout, raised at a call boundary and
    /// propagated through every pending call frame.
    #[error("execution timed out after {limit:?}")]
    Timeout { limit: Duration },
}

impl PhloxError {
    /// Helper constructor for the **factory**.
    pub fn factory<S: Into<String>>(msg: S, line: u32) -> Self {
        let message: String = msg.into();

        info!("Creating Factory error: line={}, msg={}", line, message);

        PhloxError::Factory { message, line }
    }

    /// Helper constructor for hard runtime failures.
    pub fn fatal<S: Into<String>>(msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Fatal error: msg={}", message);

        PhloxError::Fatal(message)
    }

    /// Helper constructor for unsupported-context programming errors.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Unsupported error: msg={}", message);

        PhloxError::Unsupported(message)
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, PhloxError>;
