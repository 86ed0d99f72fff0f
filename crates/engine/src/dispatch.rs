use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use repuestos_core::clock::Clock;
use repuestos_core::notify::{EngineEvent, NotificationError, NotificationSink};
use repuestos_db::repositories::OutboxRepository;

use crate::error::EngineError;

pub const DEFAULT_DISPATCH_BATCH: u32 = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub dispatched: u32,
    pub failed: u32,
}

/// Delivers committed outbox entries to the sink.
///
/// An entry is marked dispatched only after the sink accepts it, so a crash
/// between the two repeats the delivery on the next drain.
pub struct OutboxDispatcher {
    outbox: Arc<dyn OutboxRepository>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    batch: u32,
}

impl OutboxDispatcher {
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { outbox, sink, clock, batch: DEFAULT_DISPATCH_BATCH }
    }

    pub async fn drain(&self) -> Result<DispatchReport, EngineError> {
        let mut report = DispatchReport::default();

        for entry in self.outbox.list_pending(self.batch).await? {
            match self.sink.publish(&entry.event) {
                Ok(()) => {
                    self.outbox.mark_dispatched(&entry.id, self.clock.now()).await?;
                    report.dispatched += 1;
                    debug!(
                        event_name = "engine.outbox.dispatched",
                        solicitud_id = %entry.solicitud_id.0,
                        outbox_id = %entry.id,
                        kind = entry.event.kind(),
                        "notification delivered"
                    );
                }
                Err(error) => {
                    self.outbox.mark_failed(&entry.id, &error.to_string()).await?;
                    report.failed += 1;
                    warn!(
                        event_name = "engine.outbox.delivery_failed",
                        solicitud_id = %entry.solicitud_id.0,
                        outbox_id = %entry.id,
                        kind = entry.event.kind(),
                        attempts = entry.attempts + 1,
                        error = %error,
                        "notification delivery failed; will retry"
                    );
                }
            }
        }

        Ok(report)
    }
}

/// Writes every event to the log as structured JSON. Used when no delivery
/// channel is wired in, so the outbox still drains and operators can see
/// what would have been sent.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn publish(&self, event: &EngineEvent) -> Result<(), NotificationError> {
        let payload = serde_json::to_string(event)
            .map_err(|error| NotificationError::Rejected(error.to_string()))?;
        info!(
            event_name = "engine.notification.published",
            solicitud_id = %event.solicitud_id().0,
            kind = event.kind(),
            operator_alert = event.is_operator_alert(),
            payload = %payload,
            "notification published"
        );
        Ok(())
    }
}
