pub mod error;
pub mod models;
pub mod repos;
pub mod repository;

pub use error::StoreError;
pub use repository::{PgRepository, Repository, RepositoryTx};
pub use sqlx::Pool;
pub use sqlx::Postgres;
pub use sqlx::postgres::PgPool;

use blocktasks_core::DatabaseSettings;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Connect to PostgreSQL with a pool sized from the settings.
pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, sqlx::Error> {
    let options = PgConnectOptions::from_str(&settings.url)?
        .options([("search_path", settings.schema.as_str())]);

    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(settings.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(settings.max_lifetime_secs))
        .connect_with(options)
        .await
}
