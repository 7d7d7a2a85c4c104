//! Error types for `muster-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown field kind tag: {0:?}")]
  UnknownFieldKind(String),

  #[error("unknown match mode tag: {0:?}")]
  UnknownMatchMode(String),

  #[error("field not found in catalog: {0}")]
  FieldNotFound(Uuid),

  #[error("rule not found: {0}")]
  RuleNotFound(Uuid),

  #[error("storage error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Wrap a collaborator's error for propagation through the engine.
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
