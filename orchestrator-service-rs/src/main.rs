// orchestrator-service-rs/src/main.rs
// Runs one customer-support request through the stage engine and prints the
// final record as JSON.
//
// Usage: orchestrator-service [request text...]
// With no arguments the request text is read from stdin.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use action_ledger::{FileLedgerStore, InMemoryStore, LedgerConfig, MemoryStore};
use agent_registry::StageCatalog;
use error_handling::init_logging;
use llm_service::{KnowledgeBaseTool, LanguageModel, LlmClient, ToolService};
use orchestrator::stages::{offline_model, support_registry};
use orchestrator::{Orchestrator, SubmitOptions};
use self_improve::SelfImprover;
use shared_types::{EngineConfig, StorageSettings, StoreBackend};
use tracing::{info, warn};

fn open_store(settings: &StorageSettings) -> Result<Arc<dyn MemoryStore>, Box<dyn std::error::Error>> {
    match settings.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StoreBackend::File => {
            let config = LedgerConfig::for_directory(Path::new(&settings.directory));
            let store = FileLedgerStore::open(config)?;
            info!(path = %store.path().display(), "Using file ledger store");
            Ok(Arc::new(store))
        }
    }
}

fn read_request() -> std::io::Result<String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return Ok(args.join(" "));
    }
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    Ok(input.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config_rs::load_env();
    let config = EngineConfig::load()?;
    init_logging(Some(config.logging.clone()))?;

    info!("Starting orchestrator service...");

    let model: Arc<dyn LanguageModel> = match LlmClient::from_settings(&config.llm) {
        Ok(client) => {
            info!(model = %config.llm.model, "Language model client initialized");
            Arc::new(client)
        }
        Err(e) => {
            warn!(error = %e, "Language model unavailable, using offline responses");
            Arc::new(offline_model())
        }
    };
    let tools: Arc<dyn ToolService> = Arc::new(KnowledgeBaseTool::new());

    let registry = support_registry(model, tools, &config.routing)?;
    let catalog = StageCatalog::load().await?;
    registry.ensure_declared(&catalog)?;
    info!(stages = registry.len(), "Stage registry ready");

    let store = open_store(&config.storage)?;
    let mut orchestrator = Orchestrator::new(&config, registry, store)?;
    if config.self_improve.enabled {
        let improver = SelfImprover::new(config.self_improve.clone())?;
        orchestrator = orchestrator.with_self_improver(Arc::new(improver));
        info!("Routing feedback loop enabled");
    }

    let request = read_request()?;
    if request.is_empty() {
        return Err("no request text given on the command line or stdin".into());
    }

    let record = orchestrator.submit(request, SubmitOptions::default()).await?;
    info!(
        request_id = %record.request_id(),
        status = ?record.status(),
        handoffs = record.handoff_trail().len(),
        "Request finished"
    );
    println!("{}", serde_json::to_string_pretty(&record)?);

    Ok(())
}
