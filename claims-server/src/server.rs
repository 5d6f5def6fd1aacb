use std::sync::Arc;
use std::time::Instant;

use claims_engine::{
    ClaimRepository, ClaimsService, InMemoryClaimRepository, ManualTransport,
    PostgresClaimRepository,
};
use error_common::PlatformError;
use tracing::info;

use crate::config::ServerConfig;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct ClaimsServer {
    pub config: Arc<ServerConfig>,
    pub claims: Arc<ClaimsService>,
    pub started_at: Instant,
}

impl ClaimsServer {
    /// Build the server, connecting to PostgreSQL when a database URL is
    /// configured and falling back to the in-memory repository otherwise.
    pub async fn new(config: ServerConfig) -> Result<Self, PlatformError> {
        let repository: Arc<dyn ClaimRepository> = match &config.database_url {
            Some(url) => {
                let repo = PostgresClaimRepository::connect(url)
                    .await
                    .map_err(|e| PlatformError::DatabaseError(e.to_string()))?;
                info!("Using PostgreSQL claim repository");
                Arc::new(repo)
            }
            None => {
                info!("No database configured, using in-memory claim repository");
                Arc::new(InMemoryClaimRepository::new())
            }
        };
        Self::with_repository(config, repository)
    }

    /// Build the server on an existing repository.
    pub fn with_repository(
        config: ServerConfig,
        repository: Arc<dyn ClaimRepository>,
    ) -> Result<Self, PlatformError> {
        let claims = ClaimsService::new(
            repository,
            Arc::new(ManualTransport),
            config.claims.clone(),
        )
        .map_err(|e| PlatformError::ConfigError(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            claims: Arc::new(claims),
            started_at: Instant::now(),
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
