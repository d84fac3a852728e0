use sqlx::Row;

use super::StoreError;
use crate::infra::db::{add_pagination, DBConnection};

const MAX_LIST_LIMIT: u64 = 500;

/// Scheduled draw heights. The highest stored height is the next draw.
#[derive(Clone, Debug)]
pub struct LotteryStore {
    db_connection: DBConnection,
}

impl LotteryStore {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }

    pub async fn add_height(&self, height: u32) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO lotteries (height) VALUES (?)")
            .bind(height as i64)
            .execute(self.db_connection.write())
            .await?;

        Ok(())
    }

    /// Removes a height where no draw took place (the service was down
    /// when the block was mined).
    pub async fn delete_height(&self, height: u32) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM lotteries WHERE height = ?")
            .bind(height as i64)
            .execute(self.db_connection.write())
            .await?;

        Ok(())
    }

    /// Returns the next draw height, 0 when none is scheduled yet.
    pub async fn next_height(&self) -> Result<u32, StoreError> {
        let height: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(height), 0) FROM lotteries")
            .fetch_one(self.db_connection.read())
            .await?;

        Ok(height as u32)
    }

    pub async fn list_heights(
        &self,
        offset: u64,
        limit: u64,
        reverse: bool,
    ) -> Result<Vec<u32>, StoreError> {
        let limit = limit.min(MAX_LIST_LIMIT);

        let mut query = String::from("SELECT height FROM lotteries");
        add_pagination(&mut query, false, "height", offset, limit, reverse);

        let rows = sqlx::query(&query)
            .fetch_all(self.db_connection.read())
            .await?;

        Ok(rows
            .iter()
            .map(|row| row.get::<i64, _>("height") as u32)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::stores::test_support::stores;
    use sqlx::SqlitePool;

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_next_height(pool: SqlitePool) {
        let stores = stores(pool);

        assert_eq!(stores.lotteries.next_height().await.unwrap(), 0);

        stores.lotteries.add_height(800144).await.unwrap();
        stores.lotteries.add_height(800288).await.unwrap();

        assert_eq!(stores.lotteries.next_height().await.unwrap(), 800288);

        // Duplicates are ignored
        stores.lotteries.add_height(800288).await.unwrap();
        assert_eq!(stores.lotteries.next_height().await.unwrap(), 800288);
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_delete_height(pool: SqlitePool) {
        let stores = stores(pool);

        stores.lotteries.add_height(800144).await.unwrap();
        stores.lotteries.add_height(800288).await.unwrap();

        stores.lotteries.delete_height(800288).await.unwrap();
        assert_eq!(stores.lotteries.next_height().await.unwrap(), 800144);
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_list_heights(pool: SqlitePool) {
        let stores = stores(pool);

        for height in [800144u32, 800288, 800432] {
            stores.lotteries.add_height(height).await.unwrap();
        }

        let heights = stores.lotteries.list_heights(0, 0, false).await.unwrap();
        assert_eq!(heights, vec![800144, 800288, 800432]);

        let heights = stores.lotteries.list_heights(800144, 1, false).await.unwrap();
        assert_eq!(heights, vec![800288]);

        let heights = stores.lotteries.list_heights(0, 0, true).await.unwrap();
        assert_eq!(heights, vec![800432, 800288, 800144]);
    }
}
