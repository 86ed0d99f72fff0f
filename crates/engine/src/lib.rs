//! Escalation runtime: opens solicitudes, ticks them through the tiers and
//! records adjudications, on top of the pure rules in `repuestos-core`.

pub mod context;
pub mod dispatch;
pub mod error;
pub mod overlay;
pub mod pool;
pub mod recorder;
pub mod scheduler;
pub mod stores;

pub use context::{EngineContext, OpenedSolicitud, ReevaluationReport, SolicitudRequest};
pub use dispatch::{DispatchReport, LogNotificationSink, OutboxDispatcher, DEFAULT_DISPATCH_BATCH};
pub use error::EngineError;
pub use overlay::{apply_config_store, attribute, OverlaidEntry, ValueSource};
pub use pool::{AdvisorPool, AdvisorPoolBuilder};
pub use recorder::AdjudicationRecorder;
pub use scheduler::{EscalationScheduler, TickEntry, TickOutcome, TickReport, TickSummary};
pub use stores::EngineStores;
