use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::balance::{Ledger, Reservation, ReservationState, ReserveOutcome};
use crate::error::GatewayError;
use crate::logging::database::DatabaseLogger;

impl DatabaseLogger {
    pub async fn group_balance(&self, group_id: &str) -> Result<Option<f64>, GatewayError> {
        let conn = self.connection.lock().await;
        let balance = conn
            .query_row(
                "SELECT balance FROM groups WHERE id = ?1",
                [group_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(balance)
    }

    pub async fn reservation_state(
        &self,
        reservation_id: &str,
    ) -> Result<Option<ReservationState>, GatewayError> {
        let conn = self.connection.lock().await;
        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM ledger_reservations WHERE id = ?1",
                [reservation_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(state.as_deref().and_then(ReservationState::parse))
    }

    /// held → `to`，按预扣与实际的差额调整余额；已结算过则不做任何事
    async fn settle(
        &self,
        reservation: Reservation,
        to: ReservationState,
        actual_amount: f64,
    ) -> Result<bool, GatewayError> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        let held: Option<(String, f64)> = tx
            .query_row(
                "SELECT group_id, amount FROM ledger_reservations WHERE id = ?1 AND state = ?2",
                rusqlite::params![&reservation.id, ReservationState::Held.as_str()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((group_id, reserved)) = held else {
            tracing::debug!(reservation = %reservation.id, "reservation already settled");
            return Ok(false);
        };

        tx.execute(
            "UPDATE ledger_reservations SET state = ?2, actual_amount = ?3, settled_at = ?4
             WHERE id = ?1 AND state = 'held'",
            rusqlite::params![
                &reservation.id,
                to.as_str(),
                actual_amount,
                Utc::now().timestamp()
            ],
        )?;
        let refund = reserved - actual_amount;
        if refund != 0.0 {
            tx.execute(
                "UPDATE groups SET balance = balance + ?2 WHERE id = ?1",
                rusqlite::params![&group_id, refund],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }
}

#[async_trait]
impl Ledger for DatabaseLogger {
    async fn check_and_reserve(
        &self,
        group_id: &str,
        request_id: &str,
        amount: f64,
    ) -> Result<ReserveOutcome, GatewayError> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        // 单条条件扣减，余额不足时不产生任何修改
        let changed = tx.execute(
            "UPDATE groups SET balance = balance - ?2
             WHERE id = ?1 AND balance > 0 AND balance >= ?2",
            rusqlite::params![group_id, amount],
        )?;
        if changed == 0 {
            let balance: Option<f64> = tx
                .query_row(
                    "SELECT balance FROM groups WHERE id = ?1",
                    [group_id],
                    |r| r.get(0),
                )
                .optional()?;
            return Ok(ReserveOutcome::Insufficient {
                balance: balance.unwrap_or(0.0),
            });
        }

        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO ledger_reservations (id, request_id, group_id, amount, state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                &id,
                request_id,
                group_id,
                amount,
                ReservationState::Held.as_str(),
                Utc::now().timestamp()
            ],
        )?;
        tx.commit()?;

        Ok(ReserveOutcome::Reserved(Reservation {
            id,
            group_id: group_id.to_string(),
            amount,
        }))
    }

    async fn finalize(
        &self,
        reservation: Reservation,
        actual_amount: f64,
    ) -> Result<(), GatewayError> {
        self.settle(reservation, ReservationState::Finalized, actual_amount)
            .await?;
        Ok(())
    }

    async fn release(&self, reservation: Reservation) -> Result<(), GatewayError> {
        self.settle(reservation, ReservationState::Released, 0.0)
            .await?;
        Ok(())
    }

    async fn release_stale(&self, held_before: i64) -> Result<usize, GatewayError> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        let stale: Vec<(String, String, f64)> = {
            let mut stmt = tx.prepare(
                "SELECT id, group_id, amount FROM ledger_reservations
                 WHERE state = 'held' AND created_at <= ?1",
            )?;
            let rows = stmt.query_map([held_before], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
            rows.collect::<Result<_, _>>()?
        };
        let now = Utc::now().timestamp();
        for (id, group_id, amount) in &stale {
            tx.execute(
                "UPDATE ledger_reservations SET state = ?2, actual_amount = 0, settled_at = ?3
                 WHERE id = ?1 AND state = 'held'",
                rusqlite::params![id, ReservationState::Released.as_str(), now],
            )?;
            tx.execute(
                "UPDATE groups SET balance = balance + ?2 WHERE id = ?1",
                rusqlite::params![group_id, amount],
            )?;
        }
        tx.commit()?;
        Ok(stale.len())
    }
}
