use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use hagglz_agent::AgentRuntime;
use hagglz_core::audit::TracingAuditSink;
use hagglz_core::config::AppConfig;
use hagglz_core::domain::bill::Bill;
use hagglz_core::domain::classification::BillCategory;
use hagglz_core::domain::negotiation::{ExecutionRecord, NegotiationState};
use hagglz_core::errors::ApplicationError;
use hagglz_core::memory::{InMemoryStrategyMemory, StrategyMemory};
use hagglz_core::orchestrator::{NegotiationContext, Orchestrator, PreparedExecutor};
use hagglz_core::records::{InMemoryNegotiationRepository, NegotiationRepository};
use hagglz_db::{connect_with_config, migrations, SqlNegotiationRepository, SqlStrategyMemory};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::commands::{current_thread_runtime, load_config, CommandResult};

const COMMAND: &str = "negotiate";

#[derive(Debug, Clone, Args)]
pub struct NegotiateArgs {
    /// Bill text as the user would paste it.
    #[arg(long)]
    pub text: String,
    #[arg(long)]
    pub company: Option<String>,
    #[arg(long)]
    pub amount: Option<Decimal>,
    /// Skip classification and route straight to this category.
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub user: Option<String>,
    /// Store the record and strategy memory in the configured database
    /// instead of throwaway in-memory stores.
    #[arg(long)]
    pub persist: bool,
}

#[derive(Debug, Serialize)]
struct NegotiateOutput<'a> {
    command: &'static str,
    status: &'static str,
    negotiation_id: &'a str,
    state: NegotiationState,
    execution_mode: Option<&'static str>,
    blended_confidence: Option<f64>,
    record: &'a ExecutionRecord,
}

pub fn run(args: NegotiateArgs) -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let bill = match build_bill(&args) {
        Ok(bill) => bill,
        Err(message) => return CommandResult::failure(COMMAND, "validation", message, 7),
    };
    let runtime = match current_thread_runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    match runtime.block_on(negotiate(&config, bill, args.persist)) {
        Ok(record) => render(&record),
        Err(error) => {
            let error_class = error
                .downcast_ref::<ApplicationError>()
                .map(|error| error.kind().as_str())
                .unwrap_or("runtime");
            CommandResult::failure(COMMAND, error_class, format!("{error:#}"), 7)
        }
    }
}

fn build_bill(args: &NegotiateArgs) -> Result<Bill, String> {
    let mut bill = Bill::from_text(args.text.clone());
    if let Some(company) = &args.company {
        bill = bill.with_company(company.clone());
    }
    if let Some(amount) = args.amount {
        bill = bill.with_amount(amount);
    }
    if let Some(raw) = &args.category {
        let category =
            BillCategory::parse(raw).ok_or_else(|| format!("unknown bill category `{raw}`"))?;
        bill = bill.with_category_hint(category);
    }
    if let Some(user) = &args.user {
        bill = bill.with_user(user.clone());
    }
    Ok(bill)
}

async fn negotiate(config: &AppConfig, bill: Bill, persist: bool) -> anyhow::Result<ExecutionRecord> {
    let settings = config.negotiation_settings().context("invalid negotiation settings")?;
    let agents = AgentRuntime::from_config(&config.llm, &config.memory)
        .context("failed to wire agent capabilities")?;

    let pool = if persist {
        let pool = connect_with_config(&config.database)
            .await
            .context("failed to connect to the configured database")?;
        migrations::run_pending(&pool).await.context("failed to apply migrations")?;
        Some(pool)
    } else {
        None
    };

    let (memory, records): (Arc<dyn StrategyMemory>, Arc<dyn NegotiationRepository>) = match &pool {
        Some(pool) => (
            Arc::new(
                SqlStrategyMemory::new(pool.clone())
                    .with_conflict_retries(config.memory.feedback_max_conflict_retries),
            ),
            Arc::new(SqlNegotiationRepository::new(pool.clone())),
        ),
        None => (
            Arc::new(InMemoryStrategyMemory::new()),
            Arc::new(InMemoryNegotiationRepository::new()),
        ),
    };

    let orchestrator = Orchestrator::new(
        NegotiationContext {
            memory,
            records,
            classifier: agents.classifier,
            embedder: agents.embedder,
            specialists: Arc::new(agents.specialists),
            executor: Arc::new(PreparedExecutor),
            audit: Arc::new(TracingAuditSink),
        },
        settings,
    );

    let record = orchestrator.run(bill).await;
    if let Some(pool) = pool {
        pool.close().await;
    }
    Ok(record?)
}

fn render(record: &ExecutionRecord) -> CommandResult {
    if let (NegotiationState::Failed, Some(failure)) = (record.state, &record.failure) {
        return CommandResult::failure(COMMAND, failure.kind.as_str(), failure.message.clone(), 7);
    }

    let output = NegotiateOutput {
        command: COMMAND,
        status: "ok",
        negotiation_id: &record.id.0,
        state: record.state,
        execution_mode: record.execution_mode.map(|mode| mode.as_str()),
        blended_confidence: record.blended_confidence,
        record,
    };
    match serde_json::to_string(&output) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure(COMMAND, "serialization", error.to_string(), 3),
    }
}
