use super::StoreError;
use crate::infra::db::DBConnection;

/// Lightning addresses linked to public keys for automatic payouts.
#[derive(Clone, Debug)]
pub struct LightningAddressStore {
    db_connection: DBConnection,
}

impl LightningAddressStore {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }

    /// Returns the address linked to the public key, or `NoAddress`.
    pub async fn get(&self, public_key: &str) -> Result<String, StoreError> {
        let address: Option<String> =
            sqlx::query_scalar("SELECT address FROM lightning WHERE public_key = ? LIMIT 1")
                .bind(public_key)
                .fetch_optional(self.db_connection.read())
                .await?;

        address.ok_or(StoreError::NoAddress)
    }

    /// Links a public key to an address, replacing any previous link.
    pub async fn set(&self, public_key: &str, address: &str) -> Result<(), StoreError> {
        let mut tx = self.db_connection.write().begin().await?;

        sqlx::query("DELETE FROM lightning WHERE public_key = ?")
            .bind(public_key)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO lightning (public_key, address) VALUES (?, ?)")
            .bind(public_key)
            .bind(address)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
