use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::StoreError;
use crate::infra::db::{add_pagination, DBConnection};

const MAX_LIST_LIMIT: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Creator,
    Challenger,
}

impl Role {
    fn as_i64(self) -> i64 {
        match self {
            Role::Creator => 1,
            Role::Challenger => 2,
        }
    }

    fn from_i64(value: i64) -> Result<Self, StoreError> {
        match value {
            1 => Ok(Role::Creator),
            2 => Ok(Role::Challenger),
            other => Err(StoreError::Integrity(format!(
                "unknown player role {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleStatus {
    Created,
    Expired,
    Finished,
}

impl BattleStatus {
    fn as_i64(self) -> i64 {
        match self {
            BattleStatus::Created => 1,
            BattleStatus::Expired => 2,
            BattleStatus::Finished => 3,
        }
    }

    fn from_i64(value: i64) -> Result<Self, StoreError> {
        match value {
            1 => Ok(BattleStatus::Created),
            2 => Ok(BattleStatus::Expired),
            3 => Ok(BattleStatus::Finished),
            other => Err(StoreError::Integrity(format!(
                "unknown battle status {}",
                other
            ))),
        }
    }
}

/// A pvp game where two players compete for guessing the closest number
/// to a randomly drawn one, escrowed through hold invoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Battle {
    pub id: u64,
    pub amount: u64,
    pub status: BattleStatus,
    pub number: Option<u16>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub public_key: String,
    pub invoice: String,
    pub number: u16,
    pub role: Role,
}

#[derive(Clone, Debug)]
pub struct BattleStore {
    db_connection: DBConnection,
}

impl BattleStore {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }

    /// Stores a new battle together with its creator row.
    pub async fn create(&self, battle: &Battle, player: &Player) -> Result<(), StoreError> {
        if player.role != Role::Creator {
            return Err(StoreError::Integrity(
                "invalid player, its role should be 'creator'".to_string(),
            ));
        }

        let mut tx = self.db_connection.write().begin().await?;

        sqlx::query("INSERT INTO battles (id, amount, status, created_at) VALUES (?, ?, ?, ?)")
            .bind(battle.id as i64)
            .bind(battle.amount as i64)
            .bind(battle.status.as_i64())
            .bind(battle.created_at)
            .execute(&mut *tx)
            .await?;

        insert_player(&mut tx, battle.id, player).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Adds the challenger to a battle.
    pub async fn add_player(&self, battle_id: u64, player: &Player) -> Result<(), StoreError> {
        if player.role != Role::Challenger {
            return Err(StoreError::Integrity(
                "invalid player, its role should be 'challenger'".to_string(),
            ));
        }

        let mut tx = self.db_connection.write().begin().await?;
        insert_player(&mut tx, battle_id, player).await?;
        tx.commit().await?;

        Ok(())
    }

    pub async fn get(&self, id: u64) -> Result<Battle, StoreError> {
        let row = sqlx::query(
            "SELECT id, amount, status, number, created_at FROM battles WHERE id = ?",
        )
        .bind(id as i64)
        .fetch_optional(self.db_connection.read())
        .await?
        .ok_or(StoreError::BattleNotFound)?;

        battle_from_row(&row)
    }

    pub async fn players(&self, battle_id: u64) -> Result<Vec<Player>, StoreError> {
        let rows = sqlx::query(
            "SELECT role, public_key, invoice, number FROM players WHERE battle_id = ?",
        )
        .bind(battle_id as i64)
        .fetch_all(self.db_connection.read())
        .await?;

        let mut players = Vec::with_capacity(rows.len());
        for row in rows {
            players.push(Player {
                role: Role::from_i64(row.get("role"))?,
                public_key: row.get("public_key"),
                invoice: row.get("invoice"),
                number: row.get::<i64, _>("number") as u16,
            });
        }

        Ok(players)
    }

    pub async fn list(
        &self,
        offset: u64,
        limit: u64,
        reverse: bool,
    ) -> Result<Vec<Battle>, StoreError> {
        let limit = limit.min(MAX_LIST_LIMIT);

        let mut query = String::from("SELECT id, amount, status, number, created_at FROM battles");
        add_pagination(&mut query, false, "id", offset, limit, reverse);

        let rows = sqlx::query(&query)
            .fetch_all(self.db_connection.read())
            .await?;

        rows.iter().map(battle_from_row).collect()
    }

    pub async fn update(
        &self,
        id: u64,
        status: BattleStatus,
        number: u16,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE battles SET status = ?, number = ? WHERE id = ?")
            .bind(status.as_i64())
            .bind(number as i64)
            .bind(id as i64)
            .execute(self.db_connection.write())
            .await?;

        Ok(())
    }

    /// Marks battles created before the timestamp as expired and deletes
    /// their players, returning the players' invoices so the pending hold
    /// invoices can be cancelled on the node.
    pub async fn expire(&self, timestamp: i64) -> Result<Vec<String>, StoreError> {
        let mut tx = self.db_connection.write().begin().await?;

        let expired_ids = sqlx::query(
            "UPDATE battles SET status = ?
             WHERE status = ? AND created_at < ?
             RETURNING id",
        )
        .bind(BattleStatus::Expired.as_i64())
        .bind(BattleStatus::Created.as_i64())
        .bind(timestamp)
        .fetch_all(&mut *tx)
        .await?;

        if expired_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = expired_ids.iter().map(|row| row.get("id")).collect();
        let placeholders = vec!["?"; ids.len()].join(", ");
        let delete_query = format!(
            "DELETE FROM players WHERE battle_id IN ({}) RETURNING invoice",
            placeholders
        );

        let mut delete = sqlx::query(&delete_query);
        for id in &ids {
            delete = delete.bind(*id);
        }
        let deleted = delete.fetch_all(&mut *tx).await?;

        tx.commit().await?;

        Ok(deleted.iter().map(|row| row.get("invoice")).collect())
    }
}

async fn insert_player(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    battle_id: u64,
    player: &Player,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO players (battle_id, role, public_key, invoice, number) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(battle_id as i64)
    .bind(player.role.as_i64())
    .bind(&player.public_key)
    .bind(&player.invoice)
    .bind(player.number as i64)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn battle_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Battle, StoreError> {
    Ok(Battle {
        id: row.get::<i64, _>("id") as u64,
        amount: row.get::<i64, _>("amount") as u64,
        status: BattleStatus::from_i64(row.get("status"))?,
        number: row.get::<Option<i64>, _>("number").map(|n| n as u16),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stores::test_support::stores;
    use sqlx::SqlitePool;

    fn battle(id: u64, amount: u64, created_at: i64) -> Battle {
        Battle {
            id,
            amount,
            status: BattleStatus::Created,
            number: None,
            created_at,
        }
    }

    fn player(public_key: &str, role: Role, number: u16) -> Player {
        Player {
            public_key: public_key.to_string(),
            invoice: format!("lnbc-{}", public_key),
            number,
            role,
        }
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_create_and_get(pool: SqlitePool) {
        let stores = stores(pool);

        let battle = battle(7, 1000, 1_700_000_000);
        let creator = player("creator", Role::Creator, 500);
        stores.battles.create(&battle, &creator).await.unwrap();

        let fetched = stores.battles.get(7).await.unwrap();
        assert_eq!(fetched, battle);

        let players = stores.battles.players(7).await.unwrap();
        assert_eq!(players, vec![creator]);

        assert!(matches!(
            stores.battles.get(8).await,
            Err(StoreError::BattleNotFound)
        ));
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_create_rejects_challenger_row(pool: SqlitePool) {
        let stores = stores(pool);

        let battle = battle(7, 1000, 1_700_000_000);
        let challenger = player("challenger", Role::Challenger, 300);

        let result = stores.battles.create(&battle, &challenger).await;
        assert!(matches!(result, Err(StoreError::Integrity(_))));
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_add_player(pool: SqlitePool) {
        let stores = stores(pool);

        let battle = battle(7, 1000, 1_700_000_000);
        stores
            .battles
            .create(&battle, &player("creator", Role::Creator, 500))
            .await
            .unwrap();

        let challenger = player("challenger", Role::Challenger, 300);
        stores.battles.add_player(7, &challenger).await.unwrap();

        let players = stores.battles.players(7).await.unwrap();
        assert_eq!(players.len(), 2);

        let result = stores
            .battles
            .add_player(7, &player("other", Role::Creator, 1))
            .await;
        assert!(matches!(result, Err(StoreError::Integrity(_))));
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_update(pool: SqlitePool) {
        let stores = stores(pool);

        stores
            .battles
            .create(
                &battle(7, 1000, 1_700_000_000),
                &player("creator", Role::Creator, 500),
            )
            .await
            .unwrap();

        stores
            .battles
            .update(7, BattleStatus::Finished, 512)
            .await
            .unwrap();

        let fetched = stores.battles.get(7).await.unwrap();
        assert_eq!(fetched.status, BattleStatus::Finished);
        assert_eq!(fetched.number, Some(512));
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_expire(pool: SqlitePool) {
        let stores = stores(pool);

        stores
            .battles
            .create(&battle(1, 1000, 100), &player("old", Role::Creator, 500))
            .await
            .unwrap();
        stores
            .battles
            .add_player(1, &player("old2", Role::Challenger, 400))
            .await
            .unwrap();
        stores
            .battles
            .create(&battle(2, 1000, 900), &player("new", Role::Creator, 500))
            .await
            .unwrap();

        // A finished battle must not be swept
        stores
            .battles
            .create(&battle(3, 1000, 100), &player("done", Role::Creator, 500))
            .await
            .unwrap();
        stores
            .battles
            .update(3, BattleStatus::Finished, 77)
            .await
            .unwrap();

        let invoices = stores.battles.expire(500).await.unwrap();
        assert_eq!(invoices.len(), 2);
        assert!(invoices.contains(&"lnbc-old".to_string()));
        assert!(invoices.contains(&"lnbc-old2".to_string()));

        assert_eq!(
            stores.battles.get(1).await.unwrap().status,
            BattleStatus::Expired
        );
        assert!(stores.battles.players(1).await.unwrap().is_empty());

        assert_eq!(
            stores.battles.get(2).await.unwrap().status,
            BattleStatus::Created
        );
        assert_eq!(
            stores.battles.get(3).await.unwrap().status,
            BattleStatus::Finished
        );

        // Nothing left to sweep
        let invoices = stores.battles.expire(500).await.unwrap();
        assert!(invoices.is_empty());
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_list(pool: SqlitePool) {
        let stores = stores(pool);

        for id in [10u64, 20, 30] {
            stores
                .battles
                .create(&battle(id, 1000, 1_700_000_000), &player("c", Role::Creator, 1))
                .await
                .unwrap();
        }

        let battles = stores.battles.list(0, 0, false).await.unwrap();
        assert_eq!(battles.len(), 3);
        assert_eq!(battles[0].id, 10);

        let battles = stores.battles.list(10, 1, false).await.unwrap();
        assert_eq!(battles.len(), 1);
        assert_eq!(battles[0].id, 20);

        let battles = stores.battles.list(0, 0, true).await.unwrap();
        assert_eq!(battles[0].id, 30);
    }
}
