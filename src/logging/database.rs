use rusqlite::{Connection, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

/// SQLite 存储：身份/模型配置、账本预扣和用量日志共用一个连接
#[derive(Clone)]
pub struct DatabaseLogger {
    pub(crate) connection: Arc<Mutex<Connection>>,
}

impl DatabaseLogger {
    pub async fn new(database_path: &str) -> Result<Self> {
        // 确保数据库文件的目录存在
        if let Some(parent) = std::path::Path::new(database_path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(format!("Failed to create directory: {}", e)),
                ));
            }
            tracing::info!("Created database directory: {}", parent.display());
        }

        let conn = Connection::open(database_path)?;
        tracing::info!("Database initialized at: {}", database_path);
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS groups (
                id TEXT PRIMARY KEY,
                status INTEGER NOT NULL DEFAULT 1,
                balance REAL NOT NULL DEFAULT 0,
                rpm_ratio REAL NOT NULL DEFAULT 1.0,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                key TEXT NOT NULL UNIQUE,
                group_id TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 1,
                models TEXT,
                subnets TEXT,
                expired_at INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS model_configs (
                model TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                mode TEXT NOT NULL,
                input_price REAL,
                output_price REAL,
                cached_price REAL NOT NULL DEFAULT 0,
                cache_creation_price REAL NOT NULL DEFAULT 0,
                rpm INTEGER,
                enabled INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS ledger_reservations (
                id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL,
                group_id TEXT NOT NULL,
                amount REAL NOT NULL,
                actual_amount REAL,
                state TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                settled_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS usage_logs (
                request_id TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                group_id TEXT NOT NULL,
                token_id INTEGER NOT NULL,
                token_name TEXT NOT NULL,
                origin_model TEXT NOT NULL,
                actual_model TEXT NOT NULL,
                channel_id INTEGER,
                mode TEXT NOT NULL,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cached_tokens INTEGER NOT NULL DEFAULT 0,
                cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
                amount REAL NOT NULL DEFAULT 0,
                status_code INTEGER NOT NULL,
                error_message TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_usage_logs_timestamp ON usage_logs(timestamp);
            CREATE INDEX IF NOT EXISTS idx_usage_logs_group_timestamp ON usage_logs(group_id, timestamp);",
        )?;

        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }
}
