//! Pluggable message transform applied by the engine.

use thiserror::Error;

/// Transform applied to every received payload.
///
/// Returning `Ok(None)` drops the message without forwarding anything.
/// Errors are logged by the engine and the offending message is dropped; the
/// service keeps running.
pub trait Processor: Send + Sync + 'static {
    /// One-time hook invoked when the service enters its scope, for loading
    /// models or opening auxiliary resources.
    fn setup(&self) -> Result<(), ProcessorError> {
        Ok(())
    }

    /// Transforms one raw payload.
    fn run(&self, raw: &[u8]) -> Result<Option<Vec<u8>>, ProcessorError>;
}

/// Failure reported by a processor for one message.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProcessorError {
    message: String,
}

impl ProcessorError {
    /// Builds an error from a display message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Identity transform; the generic core component forwards payloads as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughProcessor;

impl Processor for PassthroughProcessor {
    fn run(&self, raw: &[u8]) -> Result<Option<Vec<u8>>, ProcessorError> {
        Ok(Some(raw.to_vec()))
    }
}
