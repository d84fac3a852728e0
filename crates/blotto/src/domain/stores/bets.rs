use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::StoreError;
use crate::infra::db::{add_pagination, DBConnection};

const MAX_LIST_LIMIT: u64 = 500;

/// A purchase of lottery tickets, one satoshi per ticket.
///
/// Within an epoch the `[index - tickets + 1, index]` ranges of all bets
/// form a disjoint contiguous cover of `[1, highest index]`, so any ticket
/// number resolves to exactly one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub public_key: String,
    pub index: u64,
    pub tickets: u64,
}

#[derive(Clone, Debug)]
pub struct BetStore {
    db_connection: DBConnection,
}

impl BetStore {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        self.db_connection.ping().await
    }

    /// Records a ticket purchase in the active epoch.
    ///
    /// The highest index read and the insert happen in one write
    /// transaction so concurrent purchases never share a range.
    pub async fn add(&self, public_key: &str, tickets: u64) -> Result<Bet, StoreError> {
        if tickets == 0 {
            return Err(StoreError::Integrity(
                "a bet must contain at least one ticket".to_string(),
            ));
        }

        let mut tx = self.db_connection.write().begin().await?;

        let height: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(height), 0) FROM lotteries")
                .fetch_one(&mut *tx)
                .await?;
        if height == 0 {
            return Err(StoreError::Integrity("no active lottery".to_string()));
        }

        let highest_index: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(idx), 0) FROM bets WHERE lottery_height = ?",
        )
        .bind(height)
        .fetch_one(&mut *tx)
        .await?;

        let index = highest_index as u64 + tickets;
        sqlx::query(
            "INSERT INTO bets (idx, tickets, public_key, lottery_height) VALUES (?, ?, ?, ?)",
        )
        .bind(index as i64)
        .bind(tickets as i64)
        .bind(public_key)
        .bind(height)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Bet {
            public_key: public_key.to_string(),
            index,
            tickets,
        })
    }

    /// Returns the prize pool size, which by construction equals the
    /// highest assigned ticket index.
    pub async fn prize_pool(&self, lottery_height: u32) -> Result<u64, StoreError> {
        let highest_index: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(idx), 0) FROM bets WHERE lottery_height = ?",
        )
        .bind(lottery_height as i64)
        .fetch_one(self.db_connection.read())
        .await?;

        Ok(highest_index as u64)
    }

    /// Returns a page of bets sorted by index.
    ///
    /// A limit of 0 means no limit; limits above 500 are capped.
    pub async fn list(
        &self,
        lottery_height: u32,
        offset: u64,
        limit: u64,
        reverse: bool,
    ) -> Result<Vec<Bet>, StoreError> {
        let limit = limit.min(MAX_LIST_LIMIT);

        let mut query =
            String::from("SELECT idx, tickets, public_key FROM bets WHERE lottery_height = ?");
        add_pagination(&mut query, true, "idx", offset, limit, reverse);

        let rows = sqlx::query(&query)
            .bind(lottery_height as i64)
            .fetch_all(self.db_connection.read())
            .await?;

        let mut bets = Vec::with_capacity(rows.len());
        for row in rows {
            bets.push(Bet {
                index: row.get::<i64, _>("idx") as u64,
                tickets: row.get::<i64, _>("tickets") as u64,
                public_key: row.get("public_key"),
            });
        }

        Ok(bets)
    }

    /// Resolves the owner of a ticket number: the bet with the smallest
    /// index greater than or equal to `target`.
    ///
    /// Well-defined only for targets in `[1, prize_pool(height)]`; callers
    /// must clamp.
    pub async fn locate_owner(
        &self,
        lottery_height: u32,
        target: u64,
    ) -> Result<Option<String>, StoreError> {
        let public_key: Option<String> = sqlx::query_scalar(
            "SELECT public_key FROM bets
             WHERE lottery_height = ? AND idx >= ?
             ORDER BY idx ASC
             LIMIT 1",
        )
        .bind(lottery_height as i64)
        .bind(target as i64)
        .fetch_optional(self.db_connection.read())
        .await?;

        Ok(public_key)
    }
}
