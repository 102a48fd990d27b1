use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::error::GatewayError;
use crate::logging::database::DatabaseLogger;
use crate::model::{
    GroupCache, GroupStatus, ModelConfig, ModelPrice, TokenCache, TokenStatus, parse_subnets,
};
use crate::relay::mode::RelayMode;
use crate::server::token_model_limits::normalize_model_list;

const TOKEN_COLUMNS: &str = "id, name, key, group_id, status, models, subnets, expired_at";
const MODEL_COLUMNS: &str = "model, owner, mode, input_price, output_price, cached_price, cache_creation_price, rpm, enabled";

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn row_to_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<TokenCache> {
    let models_s: Option<String> = row.get(5)?;
    let subnets_s: Option<String> = row.get(6)?;
    let models = match models_s.as_deref().map(str::trim) {
        None | Some("") => Vec::new(),
        Some(s) => serde_json::from_str::<Vec<String>>(s).map_err(|e| conversion_error(5, e))?,
    };
    let subnets = match subnets_s.as_deref() {
        None => Vec::new(),
        Some(s) => parse_subnets(s).map_err(|e| conversion_error(6, e))?,
    };
    Ok(TokenCache {
        id: row.get(0)?,
        name: row.get(1)?,
        key: row.get(2)?,
        group: row.get(3)?,
        status: TokenStatus::from_db_value(row.get(4)?),
        models,
        subnets,
        expired_at: row.get(7)?,
    })
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupCache> {
    Ok(GroupCache {
        id: row.get(0)?,
        status: GroupStatus::from_db_value(row.get(1)?),
        rpm_ratio: row.get(2)?,
    })
}

fn row_to_model_config(row: &rusqlite::Row<'_>) -> rusqlite::Result<ModelConfig> {
    let mode_s: String = row.get(2)?;
    let mode = RelayMode::parse(&mode_s).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(2, "mode".into(), rusqlite::types::Type::Text)
    })?;
    let input_price: Option<f64> = row.get(3)?;
    let output_price: Option<f64> = row.get(4)?;
    let price = match (input_price, output_price) {
        (Some(input_price), Some(output_price)) => Some(ModelPrice {
            input_price,
            output_price,
            cached_price: row.get(5)?,
            cache_creation_price: row.get(6)?,
        }),
        _ => None,
    };
    let rpm: Option<i64> = row.get(7)?;
    let enabled: i64 = row.get(8)?;
    Ok(ModelConfig {
        model: row.get(0)?,
        owner: row.get(1)?,
        mode,
        price,
        rpm: rpm.filter(|v| *v > 0).map(|v| v as u64),
        enabled: enabled != 0,
    })
}

fn insert_model_config_sql(verb: &str) -> String {
    format!(
        "{verb} INTO model_configs ({MODEL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    )
}

fn model_config_params(c: &ModelConfig) -> [rusqlite::types::Value; 9] {
    use rusqlite::types::Value;
    let price = c.price;
    [
        Value::Text(c.model.clone()),
        Value::Text(c.owner.clone()),
        Value::Text(c.mode.as_str().to_string()),
        price.map_or(Value::Null, |p| Value::Real(p.input_price)),
        price.map_or(Value::Null, |p| Value::Real(p.output_price)),
        Value::Real(price.map_or(0.0, |p| p.cached_price)),
        Value::Real(price.map_or(0.0, |p| p.cache_creation_price)),
        c.rpm.map_or(Value::Null, |v| Value::Integer(v as i64)),
        Value::Integer(c.enabled as i64),
    ]
}

impl DatabaseLogger {
    pub async fn load_tokens(&self) -> Result<Vec<TokenCache>, GatewayError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!("SELECT {TOKEN_COLUMNS} FROM tokens"))?;
        let rows = stmt.query_map([], row_to_token)?;
        let mut out = Vec::new();
        for r in rows {
            // 单行损坏不影响整体刷新；该令牌回源时会再报错
            match r {
                Ok(t) => out.push(t),
                Err(e) => tracing::warn!("skipping malformed token row: {}", e),
            }
        }
        Ok(out)
    }

    pub async fn load_token(&self, key: &str) -> Result<Option<TokenCache>, GatewayError> {
        let conn = self.connection.lock().await;
        let token = conn
            .query_row(
                &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE key = ?1"),
                [key],
                row_to_token,
            )
            .optional()?;
        Ok(token)
    }

    pub async fn load_groups(&self) -> Result<Vec<GroupCache>, GatewayError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare("SELECT id, status, rpm_ratio FROM groups")?;
        let rows = stmt.query_map([], row_to_group)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub async fn load_group(&self, id: &str) -> Result<Option<GroupCache>, GatewayError> {
        let conn = self.connection.lock().await;
        let group = conn
            .query_row(
                "SELECT id, status, rpm_ratio FROM groups WHERE id = ?1",
                [id],
                row_to_group,
            )
            .optional()?;
        Ok(group)
    }

    pub async fn load_model_configs(&self) -> Result<Vec<ModelConfig>, GatewayError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MODEL_COLUMNS} FROM model_configs ORDER BY model"
        ))?;
        let rows = stmt.query_map([], row_to_model_config)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub async fn seed_model_configs(&self, configs: &[ModelConfig]) -> Result<usize, GatewayError> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&insert_model_config_sql("INSERT OR IGNORE"))?;
            for c in configs {
                inserted += stmt.execute(rusqlite::params_from_iter(model_config_params(c)))?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub async fn upsert_model_config(&self, config: &ModelConfig) -> Result<(), GatewayError> {
        let conn = self.connection.lock().await;
        conn.execute(
            &insert_model_config_sql("INSERT OR REPLACE"),
            rusqlite::params_from_iter(model_config_params(config)),
        )?;
        Ok(())
    }

    pub async fn upsert_group(
        &self,
        id: &str,
        status: GroupStatus,
        balance: f64,
        rpm_ratio: f64,
    ) -> Result<(), GatewayError> {
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT INTO groups (id, status, balance, rpm_ratio, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status,
                balance = excluded.balance, rpm_ratio = excluded.rpm_ratio",
            rusqlite::params![
                id,
                status.as_db_value(),
                balance,
                rpm_ratio,
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    pub async fn insert_token(&self, token: &TokenCache) -> Result<i64, GatewayError> {
        let models = normalize_model_list("models", &token.models)?;
        let models = if models.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&models)
                    .map_err(|e| GatewayError::Internal(e.to_string()))?,
            )
        };
        let subnets = if token.subnets.is_empty() {
            None
        } else {
            Some(
                token
                    .subnets
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            )
        };
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT INTO tokens (name, key, group_id, status, models, subnets, expired_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                &token.name,
                &token.key,
                &token.group,
                token.status.as_db_value(),
                models,
                subnets,
                token.expired_at,
                Utc::now().timestamp()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}
