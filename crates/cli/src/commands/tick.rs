use std::sync::Arc;
use std::time::Duration;

use repuestos_engine::EscalationScheduler;

use crate::commands::{CommandResult, Session, EXIT_ENGINE};

/// One scheduler pass over every open solicitud, using the wall clock.
pub fn run() -> CommandResult {
    let session = match Session::open("tick") {
        Ok(session) => session,
        Err(failure) => return failure,
    };
    let Session { runtime, pool, context } = session;

    // The interval is unused; only `tick_all` runs.
    let scheduler = EscalationScheduler::new(Arc::new(context), Duration::from_secs(60));
    let result = runtime.block_on(async {
        let report = scheduler.tick_all().await;
        pool.close().await;
        report
    });

    match result {
        Ok(report) => {
            let summary = report.summary();
            CommandResult::success_with(
                "tick",
                format!(
                    "examined {} open solicitud(es): {} transition(s), {} conflict(s), {} failure(s)",
                    summary.examined, summary.transitions, summary.conflicts, summary.failures
                ),
                report,
            )
        }
        Err(error) => CommandResult::failure("tick", "engine", error.to_string(), EXIT_ENGINE),
    }
}
