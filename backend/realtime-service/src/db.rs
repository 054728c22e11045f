use db_pool::{create_pool, DbConfig};
use sqlx::migrate::Migrator;
use sqlx::{Pool, Postgres};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn init_pool(database_url: &str) -> Result<Pool<Postgres>, sqlx::Error> {
    let mut cfg = DbConfig::from_env();
    if cfg.database_url.is_empty() {
        cfg.database_url = database_url.to_string();
    }
    create_pool(cfg).await
}
