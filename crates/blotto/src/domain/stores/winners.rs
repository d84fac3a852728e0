use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::StoreError;
use crate::infra::db::DBConnection;

/// A ticket that was drawn at an epoch boundary, with its assigned prize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub public_key: String,
    pub prize: u64,
    pub ticket: u64,
}

#[derive(Clone, Debug)]
pub struct WinnerStore {
    db_connection: DBConnection,
}

impl WinnerStore {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }

    /// Records the winners of a draw. Rows are immutable once written.
    pub async fn add(&self, lottery_height: u32, winners: &[Winner]) -> Result<(), StoreError> {
        let mut tx = self.db_connection.write().begin().await?;

        for winner in winners {
            sqlx::query(
                "INSERT INTO winners (public_key, prize, ticket, lottery_height) VALUES (?, ?, ?, ?)",
            )
            .bind(&winner.public_key)
            .bind(winner.prize as i64)
            .bind(winner.ticket as i64)
            .bind(lottery_height as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Lists a draw's winners in tier order.
    pub async fn list(&self, lottery_height: u32) -> Result<Vec<Winner>, StoreError> {
        let rows = sqlx::query(
            "SELECT public_key, prize, ticket FROM winners WHERE lottery_height = ? ORDER BY rowid",
        )
        .bind(lottery_height as i64)
        .fetch_all(self.db_connection.read())
        .await?;

        let mut winners = Vec::with_capacity(rows.len());
        for row in rows {
            winners.push(Winner {
                public_key: row.get("public_key"),
                prize: row.get::<i64, _>("prize") as u64,
                ticket: row.get::<i64, _>("ticket") as u64,
            });
        }

        Ok(winners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stores::test_support::stores;
    use sqlx::SqlitePool;

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_add_and_list(pool: SqlitePool) {
        let stores = stores(pool);

        let winners = vec![
            Winner {
                public_key: "a".to_string(),
                prize: 500,
                ticket: 417,
            },
            Winner {
                public_key: "b".to_string(),
                prize: 250,
                ticket: 777,
            },
        ];
        stores.winners.add(800144, &winners).await.unwrap();

        let listed = stores.winners.list(800144).await.unwrap();
        assert_eq!(listed, winners);

        let other_epoch = stores.winners.list(800288).await.unwrap();
        assert!(other_epoch.is_empty());
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_list_preserves_tier_order(pool: SqlitePool) {
        let stores = stores(pool);

        let winners: Vec<Winner> = (0..8)
            .map(|tier| Winner {
                public_key: format!("pk{}", tier),
                prize: 1000 >> tier,
                ticket: tier as u64 + 1,
            })
            .collect();
        stores.winners.add(800144, &winners).await.unwrap();

        let listed = stores.winners.list(800144).await.unwrap();
        assert_eq!(listed, winners);
    }
}
