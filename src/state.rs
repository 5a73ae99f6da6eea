use crate::config::Config;
use crate::db::connection;
use sqlx::SqlitePool;

/// What every command needs: settings and the open event store.
pub struct AppState {
    pub config: Config,
    pub db_pool: SqlitePool,
}

impl AppState {
    pub async fn init(config: Config) -> Result<Self, sqlx::Error> {
        let db_pool = connection::establish_connection(&config.database_url).await?;
        Ok(Self { config, db_pool })
    }
}
