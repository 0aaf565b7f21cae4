use thiserror::Error;

use crate::coord::types::Key;

/// Unified error type for the router.
///
/// Every variant is `Clone` because a single stored outcome is handed to
/// every waiter of a key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// No worker is registered under the key's name
    #[error("In {key}: no computation registered for '{}'", .key.name())]
    Unregistered { key: Key },

    /// Requesting `key` from `requester` would close a dependency cycle
    #[error("In {key}: dependency cycle detected ({})", display_chain(.chain))]
    Cycle {
        key: Key,
        requester: Key,
        /// Keys in request order, starting and ending at `key`
        chain: Vec<Key>,
    },

    /// The worker body itself failed
    #[error("In {key}: computation failed: {message}")]
    Computation { key: Key, message: String },

    /// Arguments or results could not be (de)serialized.
    /// `key` is `None` when the key itself could not be built.
    #[error("Encoding failed for {}: {message}", encoding_subject(.name, .key.as_ref()))]
    Encoding {
        name: String,
        key: Option<Key>,
        message: String,
    },

    /// The coordinator is no longer processing events
    #[error("In {key}: router has shut down")]
    Shutdown { key: Key },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },
}

fn encoding_subject(name: &str, key: Option<&Key>) -> String {
    match key {
        Some(key) => key.to_string(),
        None => format!("'{}'", name),
    }
}

fn display_chain(chain: &[Key]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl RouterError {
    pub fn unregistered(key: &Key) -> Self {
        Self::Unregistered { key: key.clone() }
    }

    pub fn cycle(key: &Key, requester: &Key, chain: Vec<Key>) -> Self {
        Self::Cycle {
            key: key.clone(),
            requester: requester.clone(),
            chain,
        }
    }

    pub fn computation<M: Into<String>>(key: &Key, message: M) -> Self {
        Self::Computation {
            key: key.clone(),
            message: message.into(),
        }
    }

    pub fn encoding<S: Into<String>, E: std::fmt::Display>(name: S, source: E) -> Self {
        Self::Encoding {
            name: name.into(),
            key: None,
            message: source.to_string(),
        }
    }

    pub fn encoding_for<E: std::fmt::Display>(key: &Key, source: E) -> Self {
        Self::Encoding {
            name: key.name().to_string(),
            key: Some(key.clone()),
            message: source.to_string(),
        }
    }

    pub fn shutdown(key: &Key) -> Self {
        Self::Shutdown { key: key.clone() }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Convert a failed worker body into the outcome stored for `key`.
    ///
    /// A `RouterError` that bubbled up from a nested request is kept as-is so
    /// the first failure propagates unchanged through every caller.
    pub(crate) fn from_worker(key: &Key, err: anyhow::Error) -> Self {
        match err.downcast::<RouterError>() {
            Ok(inner) => inner,
            Err(other) => Self::computation(key, format!("{:#}", other)),
        }
    }

    /// The key this error is about, when there is one
    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::Unregistered { key }
            | Self::Cycle { key, .. }
            | Self::Computation { key, .. }
            | Self::Shutdown { key } => Some(key),
            Self::Encoding { key, .. } => key.as_ref(),
            Self::Configuration { .. } => None,
        }
    }

    /// Whether the router itself stores this kind of error as a key's result.
    /// Cycle and shutdown errors go straight back to the caller instead.
    pub fn is_cached(&self) -> bool {
        !matches!(self, Self::Cycle { .. } | Self::Shutdown { .. } | Self::Configuration { .. })
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Unregistered { .. } => "unregistered",
            Self::Cycle { .. } => "cycle",
            Self::Computation { .. } => "computation",
            Self::Encoding { .. } => "encoding",
            Self::Shutdown { .. } => "shutdown",
            Self::Configuration { .. } => "configuration",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, RouterError>;
