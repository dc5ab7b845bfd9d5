//! Credit Ledger (C4): atomic debit/credit with a transaction log, modeled
//! on the teacher's `vault::user_accounts::UserAccountsDB` balance-plus-log
//! pattern (SPEC_FULL.md §4.4). Serialization with respect to the balance
//! row comes from the single `Mutex<Connection>` guarding every write, the
//! same mechanism the teacher relies on for `confirm_deposit`.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient credits for user")]
    InsufficientFunds,
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Atomically decrements `user_key`'s balance by `amount`, appending a
    /// transaction row. Returns `InsufficientFunds` without writing
    /// anything if the balance would go negative.
    async fn debit(
        &self,
        user_key: &str,
        amount: i64,
        reason: &str,
        job_id: Option<&str>,
    ) -> Result<i64, LedgerError>;

    /// Credits `user_key`'s balance by `amount`. Idempotent per
    /// `(job_id, reason)`: a second refund for the same job and reason is a
    /// no-op that returns the current balance.
    async fn refund(&self, user_key: &str, amount: i64, reason: &str, job_id: &str) -> Result<i64>;

    async fn balance(&self, user_key: &str) -> Result<i64>;
}

pub struct SqliteCreditLedger {
    conn: Arc<Mutex<Connection>>,
    starting_balance: i64,
}

impl SqliteCreditLedger {
    pub fn new(conn: Arc<Mutex<Connection>>, starting_balance: i64) -> Result<Self> {
        let guard = conn.blocking_lock();
        guard.execute(
            "CREATE TABLE IF NOT EXISTS user_credits (
                user_key TEXT PRIMARY KEY,
                balance INTEGER NOT NULL,
                total_used INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        guard.execute(
            "CREATE TABLE IF NOT EXISTS credit_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_key TEXT NOT NULL,
                amount INTEGER NOT NULL,
                txn_type TEXT NOT NULL,
                reason TEXT NOT NULL,
                job_id TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(job_id, reason)
            )",
            [],
        )?;
        drop(guard);
        Ok(Self {
            conn,
            starting_balance,
        })
    }

    fn ensure_account(tx: &rusqlite::Transaction, user_key: &str, starting_balance: i64, now: &str) -> rusqlite::Result<()> {
        tx.execute(
            "INSERT OR IGNORE INTO user_credits (user_key, balance, total_used, updated_at)
             VALUES (?1, ?2, 0, ?3)",
            params![user_key, starting_balance, now],
        )?;
        Ok(())
    }
}

#[async_trait]
impl CreditLedger for SqliteCreditLedger {
    async fn debit(
        &self,
        user_key: &str,
        amount: i64,
        reason: &str,
        job_id: Option<&str>,
    ) -> Result<i64, LedgerError> {
        let mut conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction().map_err(|_| LedgerError::InsufficientFunds)?;
        Self::ensure_account(&tx, user_key, self.starting_balance, &now)
            .map_err(|_| LedgerError::InsufficientFunds)?;

        let balance: i64 = tx
            .query_row(
                "SELECT balance FROM user_credits WHERE user_key = ?1",
                params![user_key],
                |row| row.get(0),
            )
            .map_err(|_| LedgerError::InsufficientFunds)?;

        if balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }

        let new_balance = balance - amount;
        tx.execute(
            "UPDATE user_credits SET balance = ?1, total_used = total_used + ?2, updated_at = ?3
             WHERE user_key = ?4",
            params![new_balance, amount, now, user_key],
        )
        .map_err(|_| LedgerError::InsufficientFunds)?;

        tx.execute(
            "INSERT INTO credit_transactions (user_key, amount, txn_type, reason, job_id, created_at)
             VALUES (?1, ?2, 'debit', ?3, ?4, ?5)",
            params![user_key, amount, reason, job_id, now],
        )
        .map_err(|_| LedgerError::InsufficientFunds)?;

        tx.commit().map_err(|_| LedgerError::InsufficientFunds)?;
        Ok(new_balance)
    }

    async fn refund(&self, user_key: &str, amount: i64, reason: &str, job_id: &str) -> Result<i64> {
        let mut conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction().context("begin refund transaction")?;
        Self::ensure_account(&tx, user_key, self.starting_balance, &now)
            .context("ensure credit account exists")?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO credit_transactions (user_key, amount, txn_type, reason, job_id, created_at)
                 VALUES (?1, ?2, 'refund', ?3, ?4, ?5)",
                params![user_key, amount, reason, job_id, now],
            )
            .context("insert refund transaction")?;

        if inserted == 1 {
            tx.execute(
                "UPDATE user_credits SET balance = balance + ?1, updated_at = ?2 WHERE user_key = ?3",
                params![amount, now, user_key],
            )
            .context("credit refunded balance")?;
        }

        tx.commit().context("commit refund transaction")?;

        let balance: i64 = conn
            .query_row(
                "SELECT balance FROM user_credits WHERE user_key = ?1",
                params![user_key],
                |row| row.get(0),
            )
            .context("read post-refund balance")?;
        Ok(balance)
    }

    async fn balance(&self, user_key: &str) -> Result<i64> {
        let mut conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction().context("begin balance read transaction")?;
        Self::ensure_account(&tx, user_key, self.starting_balance, &now)
            .context("ensure credit account exists")?;
        let balance: i64 = tx
            .query_row(
                "SELECT balance FROM user_credits WHERE user_key = ?1",
                params![user_key],
                |row| row.get(0),
            )
            .context("read balance")?;
        tx.commit().context("commit balance read transaction")?;
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ledger(starting_balance: i64) -> SqliteCreditLedger {
        let conn = Connection::open_in_memory().unwrap();
        SqliteCreditLedger::new(Arc::new(Mutex::new(conn)), starting_balance).unwrap()
    }

    #[tokio::test]
    async fn debit_decrements_balance_and_logs_transaction() {
        let ledger = test_ledger(5);
        let balance = ledger.debit("user-0001", 1, "job_submitted", Some("job-1")).await.unwrap();
        assert_eq!(balance, 4);
        assert_eq!(ledger.balance("user-0001").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn debit_below_zero_fails_without_writing() {
        let ledger = test_ledger(0);
        let result = ledger.debit("user-0001", 1, "job_submitted", Some("job-1")).await;
        assert_eq!(result, Err(LedgerError::InsufficientFunds));
        assert_eq!(ledger.balance("user-0001").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refund_is_idempotent_per_job_and_reason() {
        let ledger = test_ledger(5);
        ledger.debit("user-0001", 1, "job_submitted", Some("job-1")).await.unwrap();

        let first = ledger.refund("user-0001", 1, "job_failed", "job-1").await.unwrap();
        let second = ledger.refund("user-0001", 1, "job_failed", "job-1").await.unwrap();
        assert_eq!(first, second, "second refund for the same (job_id, reason) must be a no-op");
        assert_eq!(first, 5);
    }

    #[tokio::test]
    async fn refund_with_different_reason_is_a_distinct_transaction() {
        let ledger = test_ledger(5);
        ledger.debit("user-0001", 1, "job_submitted", Some("job-1")).await.unwrap();

        ledger.refund("user-0001", 1, "job_failed", "job-1").await.unwrap();
        let balance = ledger.refund("user-0001", 1, "monitor_requeue", "job-1").await.unwrap();
        assert_eq!(balance, 6, "distinct (job_id, reason) pairs are independent refunds");
    }
}
