//! Runs a flaky workflow on the in-memory store until it settles.
//!
//! ```text
//! RUST_LOG=waypoint_core=debug cargo run -p waypoint-infra --example retry_demo [config-dir]
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::json;
use waypoint_core::engine::WorkflowEngine;
use waypoint_core::repository::{ErrorLogRepository, WorkflowRepository};
use waypoint_core::workflow::definition::{StepDefinition, StepOutcome, WorkflowDefinition, step_fn};
use waypoint_infra::config::load_engine_config;
use waypoint_infra::memory::MemoryPersistenceProvider;
use waypoint_observe::{TracingOptions, init_tracing, shutdown_tracing};
use waypoint_types::workflow::ErrorPolicy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(&TracingOptions::default())?;

    let config_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let config = load_engine_config(&config_dir).await;

    let engine = WorkflowEngine::new(MemoryPersistenceProvider::new(), config);
    engine.initialize().await?;

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    engine.register(
        WorkflowDefinition::new("flaky-charge", 1)
            .with_description("charge a card through a flaky gateway")
            .step(
                StepDefinition::new(
                    "charge",
                    step_fn(move |ctx| {
                        let counter = Arc::clone(&counter);
                        async move {
                            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                            if attempt < 3 {
                                anyhow::bail!("gateway timeout on attempt {attempt}");
                            }
                            Ok(StepOutcome::Output(json!({
                                "order": ctx.data["order"],
                                "charged": true,
                            })))
                        }
                    }),
                )
                .on_error(ErrorPolicy::retry_after(1)),
            )
            .step(StepDefinition::new(
                "receipt",
                step_fn(|ctx| async move {
                    tracing::info!(workflow_id = %ctx.workflow_id, "receipt sent");
                    Ok(StepOutcome::Next)
                }),
            )),
    )?;

    let id = engine
        .controller()
        .start_workflow("flaky-charge", None, json!({"order": "o-1001"}))
        .await?;

    let host = engine.start();
    loop {
        let wf = engine.store().get_workflow_instance(&id).await?;
        if wf.status.is_finished() {
            let errors = engine.store().get_execution_errors(&id).await?;
            tracing::info!(
                workflow_id = %id,
                status = %wf.status,
                errors = errors.len(),
                data = %wf.data,
                "workflow settled"
            );
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }

    engine.stop();
    host.await?;
    shutdown_tracing();
    Ok(())
}
