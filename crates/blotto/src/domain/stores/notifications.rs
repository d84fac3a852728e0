use super::StoreError;
use crate::infra::db::DBConnection;

/// Chat subscriptions used to message winners.
#[derive(Clone, Debug)]
pub struct NotificationStore {
    db_connection: DBConnection,
}

impl NotificationStore {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }

    /// Returns the chat linked to the public key, or `NoChatId`.
    pub async fn chat_id(&self, public_key: &str) -> Result<i64, StoreError> {
        let chat_id: Option<i64> =
            sqlx::query_scalar("SELECT chat_id FROM notifications WHERE public_key = ?")
                .bind(public_key)
                .fetch_optional(self.db_connection.read())
                .await?;

        chat_id.ok_or(StoreError::NoChatId)
    }

    pub async fn subscribe(&self, public_key: &str, chat_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO notifications (public_key, chat_id, service)
             VALUES (?, ?, 'telegram')",
        )
        .bind(public_key)
        .bind(chat_id)
        .execute(self.db_connection.write())
        .await?;

        Ok(())
    }

    pub async fn unsubscribe(&self, chat_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM notifications WHERE chat_id = ?")
            .bind(chat_id)
            .execute(self.db_connection.write())
            .await?;

        Ok(())
    }
}
