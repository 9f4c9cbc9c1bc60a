use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::config::Settings;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

// bounds every row lock wait so a stuck holder turns into a retryable conflict
#[derive(Debug)]
struct LockTimeout(u64);

impl CustomizeConnection<PgConnection, diesel::r2d2::Error> for LockTimeout {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!("SET lock_timeout = {}", self.0))
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

// create database connection pool with the database url using diesel
pub fn create_db_connection_pool(settings: &Settings) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(settings.database_url.as_str());
    Pool::builder()
        .max_size(settings.db_pool_size)
        .test_on_check_out(true)
        .connection_customizer(Box::new(LockTimeout(settings.lock_timeout_ms)))
        .build(manager)
}

// run diesel migrations
pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("failed to run migrations: {e}"))?;
    Ok(())
}

#[cfg(test)]
pub mod testing {
    use super::*;

    // database tests need a live PostgreSQL; without DATABASE_URL they are skipped
    pub fn test_pool() -> Option<DbPool> {
        dotenvy::dotenv().ok();
        let database_url = std::env::var("DATABASE_URL").ok()?;
        let settings = Settings {
            database_url,
            db_pool_size: 4,
            ..Settings::default()
        };
        let pool = create_db_connection_pool(&settings).expect("failed to create test pool");
        run_migrations(&pool).expect("failed to migrate test database");
        Some(pool)
    }
}
