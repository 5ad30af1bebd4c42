//! Server bootstrap - the composition root.
//!
//! This is the ONLY place where infrastructure is wired together for the
//! admin API: database pool, repositories, validator, factory, reloader.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use keyrelay_channel::{ChannelFactory, ScriptReloader};
use keyrelay_core::{ScriptLogSink, ScriptService, ScriptValidator};
use keyrelay_db::{setup_database, CoreFactory};
use keyrelay_script::{ScriptLogStore, ScriptSecurityValidator};

use crate::routes::create_router;
use crate::state::AxumContext;

/// Server configuration for the admin API.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the HTTP server.
    pub port: u16,
    /// `sqlx` SQLite URL, e.g. `sqlite:keyrelay.db` or `sqlite::memory:`.
    pub database_url: String,
    /// Bearer token for the admin API. `None` disables auth (tests only).
    pub auth_token: Option<String>,
}

impl ServerConfig {
    /// Read configuration from the environment, generating an auth token if
    /// none is configured.
    pub fn from_env() -> Self {
        let port = std::env::var("KEYRELAY_PORT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(3001);
        let database_url = std::env::var("KEYRELAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:keyrelay.db".to_string());
        let auth_token = match std::env::var("KEYRELAY_AUTH_TOKEN") {
            Ok(token) if !token.is_empty() => Some(token),
            _ => {
                let token = uuid::Uuid::new_v4().to_string();
                info!(
                    token_prefix = &token[..8],
                    "KEYRELAY_AUTH_TOKEN not set, generated an admin token"
                );
                Some(token)
            }
        };
        Self {
            port,
            database_url,
            auth_token,
        }
    }
}

/// Wire the full stack and start the reload loop.
pub async fn bootstrap(config: &ServerConfig) -> Result<AxumContext> {
    let pool = setup_database(&config.database_url).await?;
    let repo = CoreFactory::script_repository(pool);

    let logs = Arc::new(ScriptLogStore::new());
    let validator: Arc<dyn ScriptValidator> = Arc::new(ScriptSecurityValidator::new());
    let scripts = Arc::new(ScriptService::new(
        Arc::clone(&repo),
        validator,
        Arc::clone(&logs) as Arc<dyn ScriptLogSink>,
    ));

    let factory = Arc::new(ChannelFactory::new(Arc::clone(&repo), Arc::clone(&logs)));
    let reloader = Arc::new(ScriptReloader::new(repo, Arc::clone(&factory), logs));

    let shutdown = CancellationToken::new();
    Arc::clone(&reloader).start(shutdown.clone());

    Ok(AxumContext {
        scripts,
        factory,
        reloader,
        shutdown,
    })
}

/// Bootstrap and serve the admin API until the process exits.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let ctx = bootstrap(&config).await?;
    let app = create_router(ctx, config.auth_token.as_deref());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("keyrelay admin API listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
