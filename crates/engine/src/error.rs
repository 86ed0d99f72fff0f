use thiserror::Error;

use repuestos_core::config::ConfigError;
use repuestos_core::domain::solicitud::SolicitudState;
use repuestos_core::errors::DomainError;
use repuestos_db::RepositoryError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("solicitud `{0}` not found")]
    SolicitudNotFound(String),
    #[error("solicitud `{id}` is {}, expected {}", .state.as_str(), .expected.as_str())]
    UnexpectedState { id: String, state: SolicitudState, expected: SolicitudState },
}

impl EngineError {
    /// Optimistic-lock failure; the caller retries on the next tick.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Repository(RepositoryError::Conflict(_)))
    }
}
