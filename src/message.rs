//! Message contract the generated stubs and the dispatcher share.

use std::any::Any;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("serialize failed: {0}")]
    Serialize(String),
    #[error("parse failed: {0}")]
    Parse(String),
}

/// A request or response payload.
///
/// Implementations are produced by the schema compiler; the runtime only
/// moves them around as `Box<dyn Message>` and (de)serialises them at the
/// transport boundary. `as_any`/`as_any_mut` let a stub or a service recover
/// the concrete type after dispatch.
pub trait Message: Send {
    fn serialize_to_bytes(&self) -> Result<Vec<u8>, MessageError>;

    /// Replaces the current contents with the decoded `bytes`.
    fn parse_from_bytes(&mut self, bytes: &[u8]) -> Result<(), MessageError>;

    /// Resets the message to its prototype (empty) state.
    fn clear(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
