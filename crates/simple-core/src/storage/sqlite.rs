//! SQLite store backend

use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::aor::new_etag;
use crate::error::{Error, Result};
use crate::storage::EventStateStore;
use crate::types::{EventState, QueuedMessage, Subscription};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and create the schema if it does not exist yet.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS event_state (
                aor TEXT NOT NULL,
                event_type TEXT NOT NULL,
                etag TEXT NOT NULL UNIQUE,
                expires INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                body BLOB NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (aor, event_type)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                subscriber TEXT NOT NULL,
                call_id TEXT NOT NULL,
                aor TEXT NOT NULL,
                event_type TEXT NOT NULL,
                expires INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS stored_messages (
                id TEXT PRIMARY KEY,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                to_user TEXT NOT NULL,
                content_type TEXT NOT NULL,
                body BLOB NOT NULL,
                from_header TEXT NOT NULL,
                to_header TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_state(row: &SqliteRow) -> EventState {
        let updated_at_secs: i64 = row.get("updated_at");
        EventState {
            aor: row.get("aor"),
            event_type: row.get("event_type"),
            etag: row.get("etag"),
            expires: row.get::<i64, _>("expires") as u32,
            content_type: row.get("content_type"),
            body: Bytes::from(row.get::<Vec<u8>, _>("body")),
            updated_at: DateTime::<Utc>::from(
                UNIX_EPOCH + std::time::Duration::from_secs(updated_at_secs as u64),
            ),
        }
    }

    fn row_to_message(row: &SqliteRow) -> QueuedMessage {
        let enqueued_at_secs: i64 = row.get("enqueued_at");
        QueuedMessage {
            id: row.get("id"),
            from: row.get("sender"),
            to: row.get("recipient"),
            to_user: row.get("to_user"),
            content_type: row.get("content_type"),
            body: Bytes::from(row.get::<Vec<u8>, _>("body")),
            from_header: row.get("from_header"),
            to_header: row.get("to_header"),
            enqueued_at: DateTime::<Utc>::from(
                UNIX_EPOCH + std::time::Duration::from_secs(enqueued_at_secs as u64),
            ),
        }
    }
}

#[async_trait]
impl EventStateStore for SqliteStore {
    async fn add_event_state(
        &self,
        aor: &str,
        expires: u32,
        event: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<EventState> {
        let state = EventState {
            aor: aor.to_string(),
            event_type: event.to_string(),
            etag: new_etag(),
            expires,
            content_type: content_type.to_string(),
            body,
            updated_at: Utc::now(),
        };

        // REPLACE keeps the one-row-per-pair invariant; a replaced row's
        // tag disappears with it
        sqlx::query(
            "INSERT OR REPLACE INTO event_state
             (aor, event_type, etag, expires, content_type, body, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&state.aor)
        .bind(&state.event_type)
        .bind(&state.etag)
        .bind(state.expires as i64)
        .bind(&state.content_type)
        .bind(state.body.to_vec())
        .bind(state.updated_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(state)
    }

    async fn get_event_state_by_tag(&self, etag: &str) -> Result<Option<EventState>> {
        let row = sqlx::query("SELECT * FROM event_state WHERE etag = ?")
            .bind(etag)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(Self::row_to_state))
    }

    async fn refresh_event_state(&self, aor: &str, event: &str, expires: u32) -> Result<String> {
        let etag = new_etag();
        let result = sqlx::query(
            "UPDATE event_state SET etag = ?, expires = ?, updated_at = ?
             WHERE aor = ? AND event_type = ?",
        )
        .bind(&etag)
        .bind(expires as i64)
        .bind(Utc::now().timestamp())
        .bind(aor)
        .bind(event)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NoEventState(format!("{}|{}", aor, event)));
        }
        Ok(etag)
    }

    async fn modify_event_state(
        &self,
        prev: &EventState,
        expires: u32,
        content_type: &str,
        body: Bytes,
    ) -> Result<String> {
        let etag = new_etag();
        // Predicated on the previous tag so a concurrent mutation loses
        // cleanly instead of being overwritten
        let result = sqlx::query(
            "UPDATE event_state SET etag = ?, expires = ?, content_type = ?, body = ?, updated_at = ?
             WHERE etag = ?",
        )
        .bind(&etag)
        .bind(expires as i64)
        .bind(content_type)
        .bind(body.to_vec())
        .bind(Utc::now().timestamp())
        .bind(&prev.etag)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NoEventState(prev.etag.clone()));
        }
        Ok(etag)
    }

    async fn remove_event_state(&self, etag: &str) -> Result<String> {
        let row = sqlx::query("DELETE FROM event_state WHERE etag = ? RETURNING aor")
            .bind(etag)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.get("aor")),
            None => Err(Error::NoEventState(etag.to_string())),
        }
    }

    async fn find_subscriptions(&self, aor: &str, event: &str) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            "SELECT subscriber, call_id, aor, event_type, expires
             FROM subscriptions WHERE aor = ? AND event_type = ?",
        )
        .bind(aor)
        .bind(event)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(Error::NoSubscriptions {
                aor: aor.to_string(),
                event: event.to_string(),
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| Subscription {
                subscriber: row.get("subscriber"),
                call_id: row.get("call_id"),
                aor: row.get("aor"),
                event_type: row.get("event_type"),
                expires: row.get::<i64, _>("expires") as u32,
            })
            .collect())
    }

    async fn save_message(&self, msg: QueuedMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO stored_messages
             (id, sender, recipient, to_user, content_type, body, from_header, to_header, enqueued_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(&msg.from)
        .bind(&msg.to)
        .bind(&msg.to_user)
        .bind(&msg.content_type)
        .bind(msg.body.to_vec())
        .bind(&msg.from_header)
        .bind(&msg.to_header)
        .bind(msg.enqueued_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn retrieve_messages(&self, aor: &str) -> Result<Vec<QueuedMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM stored_messages WHERE recipient = ?
             ORDER BY enqueued_at ASC, rowid ASC",
        )
        .bind(aor)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_message).collect())
    }

    async fn remove_message(&self, aor: &str, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM stored_messages WHERE recipient = ? AND id = ?")
            .bind(aor)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
