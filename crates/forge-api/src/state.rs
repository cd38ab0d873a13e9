//! Application state wiring all services together.
//!
//! Services are generic over the storage ports in forge-core; AppState pins
//! them to the SQLite implementations.

use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;

use forge_core::conversation::service::ConversationService;
use forge_core::ledger::payments::PaymentService;
use forge_core::llm::provider::GenerationProvider;
use forge_core::turn::orchestrator::{TurnOrchestrator, TurnSettings};
use forge_infra::config::{database_url, resolve_secret};
use forge_infra::llm::create_provider;
use forge_infra::sqlite::conversation::SqliteConversationRepository;
use forge_infra::sqlite::ledger::SqliteCreditLedger;
use forge_infra::sqlite::pool::{data_dir, DatabasePool};
use forge_infra::sqlite::turn::SqliteTurnStore;
use forge_types::config::ForgeConfig;

pub type ConcreteTurnOrchestrator =
    TurnOrchestrator<SqliteTurnStore, SqliteConversationRepository, SqliteCreditLedger>;

pub type ConcreteConversationService = ConversationService<SqliteConversationRepository>;

pub type ConcretePaymentService = PaymentService<SqliteCreditLedger>;

/// Shared state for REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ForgeConfig>,
    pub orchestrator: Arc<ConcreteTurnOrchestrator>,
    pub conversation_service: Arc<ConcreteConversationService>,
    pub payment_service: Arc<ConcretePaymentService>,
    pub ledger: SqliteCreditLedger,
    /// Payment webhook signing secret; webhooks are refused without it.
    pub webhook_secret: Option<Arc<SecretString>>,
    /// Shared secret the auth proxy must present, when configured.
    pub proxy_secret: Option<Arc<SecretString>>,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Open the database, build the configured provider and wire services.
    pub async fn init(config: ForgeConfig) -> anyhow::Result<Self> {
        let db_pool = open_database(&config).await?;

        let api_key = resolve_secret(&config.generation.api_key_env);
        let provider = create_provider(&config.generation, api_key).with_context(|| {
            format!(
                "Cannot start the {:?} provider (is {} set?)",
                config.generation.provider, config.generation.api_key_env
            )
        })?;

        let mut state = Self::from_parts(config, db_pool, provider);
        state.webhook_secret =
            resolve_secret(&state.config.payments.webhook_secret_env).map(Arc::new);
        state.proxy_secret = state
            .config
            .auth
            .proxy_secret_env
            .as_deref()
            .and_then(resolve_secret)
            .map(Arc::new);
        if state.webhook_secret.is_none() {
            tracing::warn!(
                env = %state.config.payments.webhook_secret_env,
                "No payment webhook secret configured; payment webhooks will be refused"
            );
        }
        Ok(state)
    }

    /// Wire services over an open pool and a provider. Secrets start unset.
    pub fn from_parts(
        config: ForgeConfig,
        db_pool: DatabasePool,
        provider: Arc<dyn GenerationProvider>,
    ) -> Self {
        let conversations = SqliteConversationRepository::new(db_pool.clone());
        let ledger = SqliteCreditLedger::new(db_pool.clone());

        let orchestrator = TurnOrchestrator::new(
            SqliteTurnStore::new(db_pool.clone()),
            conversations.clone(),
            ledger.clone(),
            provider,
            TurnSettings::from_config(&config),
        );
        let payment_service =
            PaymentService::new(ledger.clone(), config.payments.credits_per_purchase);

        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            conversation_service: Arc::new(ConversationService::new(conversations)),
            payment_service: Arc::new(payment_service),
            ledger,
            webhook_secret: None,
            proxy_secret: None,
            db_pool,
        }
    }
}

/// Connect to the configured database and run migrations.
///
/// The default location lives in the data directory, which is created on
/// first use.
pub async fn open_database(config: &ForgeConfig) -> anyhow::Result<DatabasePool> {
    if config.database.url.is_none() {
        let dir = data_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
    }
    let url = database_url(config);
    DatabasePool::new(&url)
        .await
        .with_context(|| format!("Failed to open database at {url}"))
}
