use serde::Serialize;

use crate::commands::{build_runtime, load_config, CommandResult, EXIT_DATABASE, EXIT_MIGRATION};
use repuestos_db::{connect_with_config, migrations};

#[derive(Debug, Serialize)]
struct MigrateReport {
    applied_before: Vec<i64>,
    applied_after: Vec<i64>,
}

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("migrate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DATABASE))?;
        let applied_before = migrations::applied_versions(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;
        let applied_after = migrations::applied_versions(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;
        pool.close().await;
        Ok::<MigrateReport, (&'static str, String, u8)>(MigrateReport {
            applied_before,
            applied_after,
        })
    });

    match result {
        Ok(report) => {
            let newly = report.applied_after.len().saturating_sub(report.applied_before.len());
            CommandResult::success_with(
                "migrate",
                format!("applied {newly} pending migration(s)"),
                report,
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
