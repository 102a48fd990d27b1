use rusqlite::types::Value;

use crate::error::GatewayError;
use crate::logging::database::DatabaseLogger;
use crate::logging::types::{DashboardQuery, UsageLog, UsageSummary};
use crate::model::ChartData;

// 拼接看板查询的 WHERE 子句；参数从 ?1 开始编号
fn filter_clause(q: &DashboardQuery, params: &mut Vec<Value>) -> String {
    let mut clauses = Vec::new();
    let mut push = |sql: &str, v: Value, params: &mut Vec<Value>| {
        params.push(v);
        clauses.push(format!("{} ?{}", sql, params.len()));
    };
    push("timestamp >=", Value::Integer(q.start), params);
    push("timestamp <=", Value::Integer(q.end), params);
    if let Some(g) = q.group.as_deref().filter(|s| !s.is_empty()) {
        push("group_id =", Value::Text(g.to_string()), params);
    }
    if let Some(t) = q.token_name.as_deref().filter(|s| !s.is_empty()) {
        push("token_name =", Value::Text(t.to_string()), params);
    }
    if let Some(m) = q.model.as_deref().filter(|s| !s.is_empty()) {
        push("origin_model =", Value::Text(m.to_string()), params);
    }
    clauses.join(" AND ")
}

impl DatabaseLogger {
    pub async fn record_usage(&self, log: UsageLog) -> Result<bool, GatewayError> {
        let conn = self.connection.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO usage_logs (
                request_id, timestamp, group_id, token_id, token_name,
                origin_model, actual_model, channel_id, mode,
                input_tokens, output_tokens, cached_tokens, cache_creation_tokens,
                amount, status_code, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            rusqlite::params![
                &log.request_id,
                log.timestamp.timestamp(),
                &log.group_id,
                log.token_id,
                &log.token_name,
                &log.origin_model,
                &log.actual_model,
                log.channel_id,
                log.mode.as_str(),
                log.input_tokens,
                log.output_tokens,
                log.cached_tokens,
                log.cache_creation_tokens,
                log.amount,
                log.status_code,
                &log.error_message,
            ],
        )?;
        Ok(inserted == 1)
    }

    pub async fn chart_data(&self, q: &DashboardQuery) -> Result<Vec<ChartData>, GatewayError> {
        let mut params = Vec::new();
        let span = q.span.seconds();
        let where_sql = filter_clause(q, &mut params);
        let sql = format!(
            "SELECT (timestamp / {span}) * {span} AS bucket,
                    COUNT(*),
                    COALESCE(SUM(amount), 0),
                    COALESCE(SUM(CASE WHEN status_code != 200 THEN 1 ELSE 0 END), 0)
             FROM usage_logs WHERE {where_sql}
             GROUP BY bucket ORDER BY bucket ASC"
        );
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |r| {
            Ok(ChartData {
                timestamp: r.get(0)?,
                request_count: r.get(1)?,
                used_amount: r.get(2)?,
                exception_count: r.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub async fn dashboard_summary(&self, q: &DashboardQuery) -> Result<UsageSummary, GatewayError> {
        let mut params = Vec::new();
        let where_sql = filter_clause(q, &mut params);
        let sql = format!(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status_code != 200 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(amount), 0)
             FROM usage_logs WHERE {where_sql}"
        );
        let conn = self.connection.lock().await;
        let summary = conn.query_row(&sql, rusqlite::params_from_iter(params), |r| {
            Ok(UsageSummary {
                total_count: r.get(0)?,
                exception_count: r.get(1)?,
                used_amount: r.get(2)?,
            })
        })?;
        Ok(summary)
    }

    pub async fn used_models(&self, q: &DashboardQuery) -> Result<Vec<String>, GatewayError> {
        let mut params = Vec::new();
        let where_sql = filter_clause(q, &mut params);
        let sql = format!(
            "SELECT DISTINCT origin_model FROM usage_logs WHERE {where_sql} ORDER BY origin_model"
        );
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |r| r.get(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}
