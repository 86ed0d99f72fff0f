use repuestos_core::config::{AppConfig, LoadOptions};
use repuestos_db::repositories::SqlConfigStore;
use repuestos_db::{connect_with_config, connection::ping, migrations, DbPool};
use repuestos_engine::apply_config_store;
use serde::Serialize;
use tokio::runtime::Runtime;

use crate::commands::{build_runtime, CommandResult};

pub const EXIT_DOCTOR_FAILED: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_DOCTOR_FAILED };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

const DATABASE_CHECKS: [&str; 3] = ["database_connectivity", "schema_migrations", "config_store"];

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.extend(database_checks(config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(skipped_all("skipped because configuration did not load"));
        }
    }

    // Skipped checks do not fail the report; a failed prerequisite already did.
    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if overall_status == CheckStatus::Pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn database_checks(config: AppConfig) -> Vec<DoctorCheck> {
    let runtime = match build_runtime("doctor") {
        Ok(runtime) => runtime,
        Err(_) => {
            let mut checks = vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: "failed to initialize async runtime".to_string(),
            }];
            checks.extend(skipped_all("skipped because the async runtime did not start").skip(1));
            return checks;
        }
    };

    let pool = match runtime.block_on(connect_and_ping(&config)) {
        Ok(pool) => pool,
        Err(error) => {
            let mut checks = vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: error,
            }];
            checks.extend(skipped_all("skipped because the database is unreachable").skip(1));
            return checks;
        }
    };

    let checks = vec![
        DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        },
        check_migrations(&runtime, &pool),
        check_config_store(&runtime, &pool, config),
    ];
    runtime.block_on(pool.close());
    checks
}

async fn connect_and_ping(config: &AppConfig) -> Result<DbPool, String> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;
    ping(&pool).await.map_err(|error| format!("database query failed: {error}"))?;
    Ok(pool)
}

fn check_migrations(runtime: &Runtime, pool: &DbPool) -> DoctorCheck {
    match runtime.block_on(migrations::pending_versions(pool)) {
        Ok(pending) if pending.is_empty() => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Pass,
            details: "schema is up to date".to_string(),
        },
        Ok(pending) => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Fail,
            details: format!("pending migrations {pending:?}; run `repuestos migrate`"),
        },
        Err(error) => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Fail,
            details: format!("could not read migration history: {error}"),
        },
    }
}

fn check_config_store(runtime: &Runtime, pool: &DbPool, mut config: AppConfig) -> DoctorCheck {
    if !config.scheduler.use_config_store {
        return DoctorCheck {
            name: "config_store",
            status: CheckStatus::Skipped,
            details: "scheduler.use_config_store is off".to_string(),
        };
    }

    let store = SqlConfigStore::new(pool.clone());
    let overlaid = runtime
        .block_on(apply_config_store(&mut config.engine, &store))
        .map_err(|error| error.to_string())
        .and_then(|keys| config.validate().map(|()| keys).map_err(|error| error.to_string()));
    match overlaid {
        Ok(keys) => DoctorCheck {
            name: "config_store",
            status: CheckStatus::Pass,
            details: format!("{} store entr(ies) applied and validated", keys.len()),
        },
        Err(error) => {
            DoctorCheck { name: "config_store", status: CheckStatus::Fail, details: error }
        }
    }
}

fn skipped_all(reason: &'static str) -> impl Iterator<Item = DoctorCheck> {
    DATABASE_CHECKS.into_iter().map(move |name| DoctorCheck {
        name,
        status: CheckStatus::Skipped,
        details: reason.to_string(),
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
