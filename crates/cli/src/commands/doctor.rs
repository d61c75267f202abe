use docgenie_core::config::{AppConfig, LoadOptions};
use docgenie_db::connect_from_config;
use docgenie_ingest::build_knowledge_store;
use serde::Serialize;
use tokio::runtime::Runtime;

use crate::commands::CommandResult;

const DOCTOR_FAILED_EXIT_CODE: u8 = 6;

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

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code =
        if report.overall_status == CheckStatus::Pass { 0 } else { DOCTOR_FAILED_EXIT_CODE };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\
                 \"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => {
                    checks.push(check_database_connectivity(&runtime, &config));
                    checks.push(check_knowledge_store(&runtime, &config));
                }
                Err(error) => {
                    let details = format!("failed to initialize async runtime: {error}");
                    checks.push(DoctorCheck::fail("database_connectivity", details.clone()));
                    checks.push(DoctorCheck::fail("knowledge_store", details));
                }
            }
            checks.push(check_change_capture(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["database_connectivity", "knowledge_store", "change_capture"] {
                checks.push(DoctorCheck::skipped(
                    name,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let (overall_status, summary) = if any_failed {
        (CheckStatus::Fail, "doctor: one or more readiness checks failed")
    } else {
        (CheckStatus::Pass, "doctor: all readiness checks passed")
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn check_database_connectivity(runtime: &Runtime, config: &AppConfig) -> DoctorCheck {
    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        pool.close().await;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        ),
        Err(error) => DoctorCheck::fail("database_connectivity", error),
    }
}

fn check_knowledge_store(runtime: &Runtime, config: &AppConfig) -> DoctorCheck {
    let store = match build_knowledge_store(&config.knowledge_store) {
        Ok(store) => store,
        Err(error) => return DoctorCheck::fail("knowledge_store", error.to_string()),
    };

    match runtime.block_on(store.namespaces()) {
        Ok(namespaces) => DoctorCheck::pass(
            "knowledge_store",
            format!(
                "{:?} store reachable with {} namespaces",
                config.knowledge_store.provider,
                namespaces.len()
            ),
        ),
        Err(error) => {
            DoctorCheck::fail("knowledge_store", format!("knowledge store unreachable: {error}"))
        }
    }
}

fn check_change_capture(config: &AppConfig) -> DoctorCheck {
    let capture = &config.change_capture;
    if !capture.enabled {
        return DoctorCheck::skipped("change_capture", "change capture is disabled");
    }
    DoctorCheck::pass(
        "change_capture",
        format!(
            "registrations go to `{}`, events are read from `{}` as group `{}`",
            capture.connect_url, capture.bus_url, capture.consumer_group
        ),
    )
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

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
