//! Wires configuration into a running dialogue engine: pool, repositories,
//! scheduler, model backend, and the tool registry.

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

use kcart_agent::engine::DialogueEngine;
use kcart_agent::gemini::GeminiClient;
use kcart_agent::lang::ScriptDetector;
use kcart_agent::llm::LanguageModel;
use kcart_agent::ollama::OllamaClient;
use kcart_agent::orchestrator::Orchestrator;
use kcart_agent::retrieval::KeywordSearch;
use kcart_agent::session::SessionStore;
use kcart_agent::timers::ConfirmationScheduler;
use kcart_agent::toolset::{standard_registry, ToolDeps};
use kcart_agent::PlaceholderImageGenerator;
use kcart_core::config::{AppConfig, LlmProvider, LogFormat, LoggingConfig};
use kcart_core::pricing::PricingInsightEngine;
use kcart_db::repositories::{
    SqlKnowledgeRepository, SqlOrderRepository, SqlPriceObservationRepository,
    SqlProductRepository, SqlUserRepository,
};
use kcart_db::{connect_with_settings, migrations, DbPool};

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    // A second init in the same process is fine; the first subscriber wins.
    let _ = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn build_model(config: &AppConfig) -> anyhow::Result<Arc<dyn LanguageModel>> {
    match config.llm.provider {
        LlmProvider::Gemini => {
            let Some(api_key) = config.llm.api_key.clone() else {
                bail!("llm.provider is gemini but no api key is configured (KCART_LLM_API_KEY)");
            };
            let mut client = GeminiClient::new(
                api_key,
                config.llm.model.clone(),
                config.llm.timeout_secs,
                config.llm.max_retries,
            )
            .context("building gemini client")?;
            if let Some(base_url) = &config.llm.base_url {
                client = client.with_base_url(base_url.clone());
            }
            Ok(Arc::new(client))
        }
        LlmProvider::Ollama => {
            let base_url =
                config.llm.base_url.clone().unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());
            let client = OllamaClient::new(
                base_url,
                config.llm.model.clone(),
                config.llm.timeout_secs,
                config.llm.max_retries,
            )
            .context("building ollama client")?;
            Ok(Arc::new(client))
        }
    }
}

pub struct Runtime {
    pub pool: DbPool,
    pub engine: DialogueEngine,
    pub scheduler: Arc<ConfirmationScheduler>,
}

/// Connect, migrate, and assemble the engine from configuration.
pub async fn build_runtime(config: &AppConfig) -> anyhow::Result<Runtime> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .context("connecting to database")?;
    migrations::run_pending(&pool).await.context("applying migrations")?;

    let users = Arc::new(SqlUserRepository::new(pool.clone()));
    let products = Arc::new(SqlProductRepository::new(pool.clone()));
    let orders = Arc::new(SqlOrderRepository::new(pool.clone()));
    let prices = Arc::new(SqlPriceObservationRepository::new(pool.clone()));
    let knowledge = Arc::new(SqlKnowledgeRepository::new(pool.clone()));

    let scheduler = ConfirmationScheduler::new(
        config.order.cod_confirm_delay_secs,
        orders.clone(),
        prices.clone(),
    );

    let deps = Arc::new(ToolDeps {
        users,
        products,
        orders,
        prices,
        search: Arc::new(KeywordSearch::new(knowledge)),
        images: Arc::new(PlaceholderImageGenerator),
        pricing: PricingInsightEngine::new(config.pricing.params()),
        scheduler: scheduler.clone(),
        retrieval_top_k: config.retrieval.top_k,
    });

    let model = build_model(config)?;
    let orchestrator = Orchestrator::new(
        model,
        Arc::new(standard_registry(deps)),
        config.session.max_tool_rounds,
    );
    let engine = DialogueEngine::new(
        SessionStore::new(config.session.history_limit, config.session.idle_timeout_secs),
        orchestrator,
        Arc::new(ScriptDetector::new()),
    );

    Ok(Runtime { pool, engine, scheduler })
}
