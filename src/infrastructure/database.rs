//! Pooled SQLite connection

use di::inject;
use di::injectable;
use log::warn;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::env;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::Mutex;

const DEFAULT_DATABASE_URL: &str = "sqlite:support_chat.db";
const MAX_CONNECTIONS: u32 = 5;

static TEST_POOL: Mutex<Option<SqlitePool>> = Mutex::new(None);

pub struct DatabaseConnection {
    connection: SqlitePool,
}

#[injectable]
impl DatabaseConnection {
    #[inject]
    pub fn create() -> DatabaseConnection {
        if let Some(pool) = TEST_POOL.lock().ok().and_then(|p| p.clone()) {
            return DatabaseConnection { connection: pool };
        }

        dotenvy::dotenv().ok();
        let url = env::var("DATABASE_URL").unwrap_or_else(|_| {
            warn!("DATABASE_URL is not set, using {DEFAULT_DATABASE_URL}");
            DEFAULT_DATABASE_URL.to_owned()
        });

        let options = SqliteConnectOptions::from_str(&url)
            .unwrap_or_else(|e| {
                warn!("Invalid DATABASE_URL ({e}), using {DEFAULT_DATABASE_URL}");
                SqliteConnectOptions::new().filename("support_chat.db")
            })
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        // Connection errors surface on the first query.
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_lazy_with(options);

        DatabaseConnection { connection: pool }
    }

    /// The DI container builds this type itself, so tests hand it a pool through this hook.
    pub fn set_test_pool(pool: SqlitePool) {
        if let Ok(mut slot) = TEST_POOL.lock() {
            *slot = Some(pool);
        }
    }

    pub fn clear_test_pool() {
        if let Ok(mut slot) = TEST_POOL.lock() {
            *slot = None;
        }
    }
}

impl Deref for DatabaseConnection {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl DerefMut for DatabaseConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}
