//! Persistence services, one per table, sharing a [`DBConnection`].

mod battles;
mod bets;
mod lightning_addresses;
mod lotteries;
mod notifications;
mod prizes;
mod winners;

pub use battles::{Battle, BattleStatus, BattleStore, Player, Role};
pub use bets::{Bet, BetStore};
pub use lightning_addresses::LightningAddressStore;
pub use lotteries::LotteryStore;
pub use notifications::NotificationStore;
pub use prizes::PrizeStore;
pub use winners::{Winner, WinnerStore};

use crate::infra::db::DBConnection;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("withdrawal amount is higher than assigned prizes")]
    InsufficientPrizes,

    #[error("no chat id registered for this public key")]
    NoChatId,

    #[error("no lightning address registered for this public key")]
    NoAddress,

    #[error("battle not found")]
    BattleNotFound,

    #[error("{0}")]
    Integrity(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// All persistence services bundled for wiring at the composition root.
#[derive(Clone, Debug)]
pub struct Stores {
    pub bets: BetStore,
    pub prizes: PrizeStore,
    pub winners: WinnerStore,
    pub lotteries: LotteryStore,
    pub battles: BattleStore,
    pub lightning: LightningAddressStore,
    pub notifications: NotificationStore,
}

impl Stores {
    pub fn new(db_connection: DBConnection) -> Self {
        Self {
            bets: BetStore::new(db_connection.clone()),
            prizes: PrizeStore::new(db_connection.clone()),
            winners: WinnerStore::new(db_connection.clone()),
            lotteries: LotteryStore::new(db_connection.clone()),
            battles: BattleStore::new(db_connection.clone()),
            lightning: LightningAddressStore::new(db_connection.clone()),
            notifications: NotificationStore::new(db_connection),
        }
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        self.bets.ping().await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use sqlx::SqlitePool;

    pub fn stores(pool: SqlitePool) -> Stores {
        let db = DBConnection::new_with_pools(
            "test".to_string(),
            ":memory:".to_string(),
            pool.clone(),
            pool,
        );
        Stores::new(db)
    }
}
