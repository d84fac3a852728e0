use log::debug;
use sqlx::Row;

use super::{StoreError, Winner};
use crate::infra::db::DBConnection;

struct PrizeRow {
    rowid: i64,
    amount: u64,
}

/// Ledger of credited prizes, debited by withdrawals and swept by expiry.
#[derive(Clone, Debug)]
pub struct PrizeStore {
    db_connection: DBConnection,
}

impl PrizeStore {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }

    /// Credits one prize row per winner under the given lottery height.
    pub async fn set(&self, lottery_height: u32, winners: &[Winner]) -> Result<(), StoreError> {
        let mut tx = self.db_connection.write().begin().await?;

        for winner in winners {
            sqlx::query("INSERT INTO prizes (public_key, amount, lottery_height) VALUES (?, ?, ?)")
                .bind(&winner.public_key)
                .bind(winner.prize as i64)
                .bind(lottery_height as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Returns the withdrawable balance: the sum of non-expired amounts.
    pub async fn get(&self, public_key: &str) -> Result<u64, StoreError> {
        let amount: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM prizes WHERE public_key = ? AND expired = 0",
        )
        .bind(public_key)
        .fetch_one(self.db_connection.read())
        .await?;

        Ok(amount as u64)
    }

    /// Reports whether the public key has ever been credited a prize.
    /// Zero-amount rows count, a fully drained winner is still a winner.
    pub async fn exists(&self, public_key: &str) -> Result<bool, StoreError> {
        let exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM prizes WHERE public_key = ?)")
                .bind(public_key)
                .fetch_one(self.db_connection.read())
                .await?;

        Ok(exists != 0)
    }

    /// Marks prizes won at or before `lottery_height` as expired and
    /// returns the newly swept total.
    pub async fn expire(&self, lottery_height: u32) -> Result<u64, StoreError> {
        let rows = sqlx::query(
            "UPDATE prizes SET expired = 1
             WHERE lottery_height <= ? AND expired = 0
             RETURNING amount",
        )
        .bind(lottery_height as i64)
        .fetch_all(self.db_connection.write())
        .await?;

        let mut swept = 0u64;
        for row in rows {
            swept += row.get::<i64, _>("amount") as u64;
        }

        Ok(swept)
    }

    /// Subtracts the withdrawal amount from the winner's prizes.
    ///
    /// Rows are consumed newest first so a withdrawal touches the amounts
    /// furthest from expiry. Fails atomically with `InsufficientPrizes`
    /// when the non-expired balance cannot cover the amount.
    pub async fn withdraw(&self, public_key: &str, amount: u64) -> Result<(), StoreError> {
        if amount == 0 {
            return Err(StoreError::InsufficientPrizes);
        }

        let mut tx = self.db_connection.write().begin().await?;

        let rows = sqlx::query(
            "SELECT rowid, amount FROM prizes
             WHERE public_key = ? AND expired = 0 AND amount != 0
             ORDER BY rowid DESC",
        )
        .bind(public_key)
        .fetch_all(&mut *tx)
        .await?;

        let mut prizes = rows
            .iter()
            .map(|row| PrizeRow {
                rowid: row.get("rowid"),
                amount: row.get::<i64, _>("amount") as u64,
            })
            .collect::<Vec<_>>();

        apply_withdrawal(amount, &mut prizes)?;

        for prize in &prizes {
            sqlx::query("UPDATE prizes SET amount = ? WHERE rowid = ?")
                .bind(prize.amount as i64)
                .bind(prize.rowid)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!("withdrew {} sats from {}", amount, public_key);

        Ok(())
    }
}

/// Subtracts `amount` from the rows in order, draining rows to zero but
/// never below, and fails if the rows cannot cover the full amount.
fn apply_withdrawal(mut amount: u64, prizes: &mut [PrizeRow]) -> Result<(), StoreError> {
    for prize in prizes.iter_mut() {
        if amount <= prize.amount {
            prize.amount -= amount;
            return Ok(());
        }

        amount -= prize.amount;
        prize.amount = 0;
    }

    Err(StoreError::InsufficientPrizes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stores::test_support::stores;
    use sqlx::SqlitePool;

    fn winner(public_key: &str, prize: u64) -> Winner {
        Winner {
            public_key: public_key.to_string(),
            prize,
            ticket: 0,
        }
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_withdraw_consumes_newest_first(pool: SqlitePool) {
        let stores = stores(pool);
        let prizes = &stores.prizes;

        prizes.set(100, &[winner("pk", 10)]).await.unwrap();
        prizes.set(200, &[winner("pk", 20)]).await.unwrap();
        prizes.set(300, &[winner("pk", 30)]).await.unwrap();

        prizes.withdraw("pk", 20).await.unwrap();

        // The newest row (30) is drained to 10, older rows untouched
        assert_eq!(prizes.get("pk").await.unwrap(), 40);
        let amounts: Vec<i64> = sqlx::query_scalar("SELECT amount FROM prizes ORDER BY rowid")
            .fetch_all(prizes.db_connection.read())
            .await
            .unwrap();
        assert_eq!(amounts, vec![10, 20, 10]);
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_withdraw_drains_all_rows(pool: SqlitePool) {
        let stores = stores(pool);
        let prizes = &stores.prizes;

        prizes.set(100, &[winner("pk", 10)]).await.unwrap();
        prizes.set(200, &[winner("pk", 20)]).await.unwrap();
        prizes.set(300, &[winner("pk", 30)]).await.unwrap();

        prizes.withdraw("pk", 60).await.unwrap();
        assert_eq!(prizes.get("pk").await.unwrap(), 0);
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_withdraw_insufficient_rolls_back(pool: SqlitePool) {
        let stores = stores(pool);
        let prizes = &stores.prizes;

        prizes.set(100, &[winner("pk", 10)]).await.unwrap();
        prizes.set(200, &[winner("pk", 20)]).await.unwrap();

        let result = prizes.withdraw("pk", 50).await;
        assert!(matches!(result, Err(StoreError::InsufficientPrizes)));

        // Untouched after the failed withdrawal
        assert_eq!(prizes.get("pk").await.unwrap(), 30);
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_withdraw_zero_amount(pool: SqlitePool) {
        let stores = stores(pool);

        let result = stores.prizes.withdraw("pk", 0).await;
        assert!(matches!(result, Err(StoreError::InsufficientPrizes)));
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_expire_sweeps_old_epochs(pool: SqlitePool) {
        let stores = stores(pool);
        let prizes = &stores.prizes;

        prizes.set(899000, &[winner("a", 100)]).await.unwrap();
        prizes.set(899424, &[winner("b", 200)]).await.unwrap();
        prizes.set(900000, &[winner("c", 300)]).await.unwrap();

        let swept = prizes.expire(899424).await.unwrap();
        assert_eq!(swept, 300);

        assert_eq!(prizes.get("a").await.unwrap(), 0);
        assert_eq!(prizes.get("b").await.unwrap(), 0);
        assert_eq!(prizes.get("c").await.unwrap(), 300);

        // A second sweep does not double count already expired rows
        let swept = prizes.expire(899424).await.unwrap();
        assert_eq!(swept, 0);
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_expired_prizes_not_withdrawable(pool: SqlitePool) {
        let stores = stores(pool);
        let prizes = &stores.prizes;

        prizes.set(100, &[winner("pk", 50)]).await.unwrap();
        prizes.expire(100).await.unwrap();

        let result = prizes.withdraw("pk", 10).await;
        assert!(matches!(result, Err(StoreError::InsufficientPrizes)));
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_exists_counts_drained_winners(pool: SqlitePool) {
        let stores = stores(pool);
        let prizes = &stores.prizes;

        assert!(!prizes.exists("pk").await.unwrap());

        prizes.set(100, &[winner("pk", 10)]).await.unwrap();
        prizes.withdraw("pk", 10).await.unwrap();

        assert_eq!(prizes.get("pk").await.unwrap(), 0);
        assert!(prizes.exists("pk").await.unwrap());
    }
}
