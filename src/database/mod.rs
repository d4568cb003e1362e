pub mod models;
pub mod queries;
pub mod schema;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, info};

use models::{NewToken, Token};
use queries::Queries;

/// Credential store for OAuth tokens, backed by SQLite.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        info!("Connected to database {}", database_url);
        Ok(Database { pool })
    }

    /// A private in-memory database. One connection with no idle reaping, so
    /// the schema lives as long as the pool.
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let database = Database { pool };
        database.run_migrations().await?;
        Ok(database)
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        schema::MIGRATOR.run(&self.pool).await?;
        debug!("Applied {} migration(s)", schema::MIGRATOR.iter().count());
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_token(&self, token: &NewToken) -> Result<Token, sqlx::Error> {
        let stored = Queries::insert_token(&self.pool, token).await?;
        info!("Stored token {} for {}", stored.id, stored.login);
        Ok(stored)
    }

    /// The live credential for `login`: newest `created`, highest id on ties.
    pub async fn latest_token(&self, login: &str) -> Result<Option<Token>, sqlx::Error> {
        Queries::latest_token(&self.pool, login).await
    }

    pub async fn tokens_for_login(&self, login: &str) -> Result<Vec<Token>, sqlx::Error> {
        Queries::tokens_for_login(&self.pool, login).await
    }

    pub async fn delete_tokens(&self, login: &str) -> Result<u64, sqlx::Error> {
        let removed = Queries::delete_tokens(&self.pool, login).await?;
        info!("Deleted {} token(s) for {}", removed, login);
        Ok(removed)
    }
}
