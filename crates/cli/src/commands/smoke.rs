use std::time::Instant;

use crate::commands::CommandResult;
use hagglz_agent::AgentRuntime;
use hagglz_core::config::{AppConfig, LoadOptions};
use hagglz_core::memory::{EmbeddingCapability, StrategyMemory};
use hagglz_core::records::NegotiationRepository;
use hagglz_core::router::ClassificationCapability;
use hagglz_db::{connect_with_config, migrations, SqlNegotiationRepository, SqlStrategyMemory};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

const DOWNSTREAM_CHECKS: [&str; 3] = ["db_connectivity", "migration_visibility", "store_readiness"];

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(pass("config_validation", elapsed_ms, "configuration loaded and validated"));
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(fail("config_validation", elapsed_ms, error.to_string()));
            checks.push(skipped("capability_wiring"));
            checks.extend(DOWNSTREAM_CHECKS.map(skipped));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    match timed_check(|| AgentRuntime::from_config(&config.llm, &config.memory)) {
        Ok((elapsed_ms, runtime)) => checks.push(pass(
            "capability_wiring",
            elapsed_ms,
            format!(
                "classifier `{}`, embedder `{}`, {} specialists",
                runtime.classifier.name(),
                runtime.embedder.name(),
                runtime.specialists.len()
            ),
        )),
        Err((elapsed_ms, error)) => {
            checks.push(fail("capability_wiring", elapsed_ms, error.to_string()));
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(fail(
                "db_connectivity",
                0,
                format!("failed to initialize async runtime: {error}"),
            ));
            checks.extend(DOWNSTREAM_CHECKS[1..].iter().copied().map(skipped));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    runtime.block_on(database_checks(&config, &mut checks));
    finalize_report(checks, elapsed_since(started))
}

async fn database_checks(config: &AppConfig, checks: &mut Vec<SmokeCheck>) {
    let db_started = Instant::now();
    let pool = match connect_with_config(&config.database).await {
        Ok(pool) => {
            checks.push(pass(
                "db_connectivity",
                elapsed_since(db_started),
                format!("connected using `{}`", config.database.url),
            ));
            pool
        }
        Err(error) => {
            checks.push(fail(
                "db_connectivity",
                elapsed_since(db_started),
                format!("failed to connect: {error}"),
            ));
            checks.extend(DOWNSTREAM_CHECKS[1..].iter().copied().map(skipped));
            return;
        }
    };

    let migration_started = Instant::now();
    match migrations::run_pending(&pool).await {
        Ok(()) => checks.push(pass(
            "migration_visibility",
            elapsed_since(migration_started),
            "migrations are visible and executable",
        )),
        Err(error) => {
            checks.push(fail(
                "migration_visibility",
                elapsed_since(migration_started),
                format!("migration execution failed: {error}"),
            ));
            checks.push(skipped("store_readiness"));
            pool.close().await;
            return;
        }
    }

    let store_started = Instant::now();
    let memory = SqlStrategyMemory::new(pool.clone());
    let records = SqlNegotiationRepository::new(pool.clone());
    match (memory.stats().await, records.summary().await) {
        (Ok(memory), Ok(records)) => checks.push(pass(
            "store_readiness",
            elapsed_since(store_started),
            format!(
                "{} strategy memory entries, {} negotiations on record",
                memory.total_entries, records.total
            ),
        )),
        (Err(error), _) | (_, Err(error)) => {
            checks.push(fail("store_readiness", elapsed_since(store_started), error.to_string()))
        }
    }
    pool.close().await;
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((elapsed_since(started), value)),
        Err(error) => Err((elapsed_since(started), error)),
    }
}

fn elapsed_since(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn pass(name: &'static str, elapsed_ms: u64, message: impl Into<String>) -> SmokeCheck {
    SmokeCheck { name, status: SmokeStatus::Pass, elapsed_ms, message: message.into() }
}

fn fail(name: &'static str, elapsed_ms: u64, message: impl Into<String>) -> SmokeCheck {
    SmokeCheck { name, status: SmokeStatus::Fail, elapsed_ms, message: message.into() }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
