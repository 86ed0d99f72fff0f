use repuestos_core::domain::solicitud::SolicitudId;
use repuestos_engine::EngineError;

use crate::commands::{CommandResult, Session, EXIT_ENGINE, EXIT_INVALID_STATE, EXIT_NOT_FOUND};

/// Re-runs evaluation for an evaluated solicitud. Existing adjudications are
/// kept, so repeating the command changes nothing.
pub fn run(solicitud_id: &str) -> CommandResult {
    let session = match Session::open("evaluate") {
        Ok(session) => session,
        Err(failure) => return failure,
    };

    let id = SolicitudId(solicitud_id.trim().to_string());
    let result = session.runtime.block_on(session.context.reevaluate(&id));
    session.close();

    match result {
        Ok(report) => CommandResult::success_with(
            "evaluate",
            format!(
                "{} line item(s) awarded, {} newly recorded, {} unresolved",
                report.awarded,
                report.newly_recorded,
                report.unresolved.len()
            ),
            report,
        ),
        Err(error @ EngineError::SolicitudNotFound(_)) => {
            CommandResult::failure("evaluate", "not_found", error.to_string(), EXIT_NOT_FOUND)
        }
        Err(error @ EngineError::UnexpectedState { .. }) => CommandResult::failure(
            "evaluate",
            "invalid_state",
            error.to_string(),
            EXIT_INVALID_STATE,
        ),
        Err(error) => CommandResult::failure("evaluate", "engine", error.to_string(), EXIT_ENGINE),
    }
}
