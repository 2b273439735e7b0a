use std::sync::Arc;
use std::time::Duration;

/// Convenience result type used across pixelflow.
pub type PixelflowResult<T> = Result<T, PixelflowError>;

/// Top-level error taxonomy used by pipeline, cache, and pixel APIs.
///
/// Errors are `Clone` because a failed [`Promise`](crate::Promise) is observed by every waiter.
#[derive(thiserror::Error, Debug, Clone)]
pub enum PixelflowError {
    /// Invalid filter descriptor, parameter, or buffer geometry.
    #[error("validation error: {0}")]
    Validation(String),

    /// A structural invariant of a filter step was violated (e.g. Blend with no bitmap side).
    #[error("precondition error: {0}")]
    Precondition(String),

    /// Reading or decoding a media region failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// A filter step failed while executing.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Awaiting a pipeline or decode result exceeded its bound.
    #[error("timeout error: gave up after {elapsed:?}")]
    Timeout {
        /// Time spent waiting before giving up.
        elapsed: Duration,
    },

    /// Step was skipped because its pipeline run was abandoned.
    #[error("cancelled: pipeline run was abandoned before this step started")]
    Cancelled,

    /// Wrapped lower-level error from dependencies or IO.
    #[error("{0:#}")]
    Other(Arc<anyhow::Error>),
}

impl PixelflowError {
    /// Build a [`PixelflowError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`PixelflowError::Precondition`] value.
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Build a [`PixelflowError::Decode`] value.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Build a [`PixelflowError::Evaluation`] value.
    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    /// Return `true` for [`PixelflowError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<anyhow::Error> for PixelflowError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(Arc::new(err))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
