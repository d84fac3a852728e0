//! Block-height driven lottery coordination.

pub mod draw;

use anyhow::anyhow;
use log::{error, info};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::stores::{StoreError, Stores, Winner},
    infra::{
        lightning::{BlockEpoch, Ln, PaymentStatus},
        lnurl::LnurlClient,
        notifier::{
            auto_withdrawal_message, congratulations_message, draw_announcement_message, Notifier,
        },
    },
};

/// Share of the node's remote balance accepted as bets, so every prize
/// remains payable over the channels even after a run of withdrawals.
pub const CAPACITY_DIVISOR: i64 = 5;

/// Prizes expire this many epochs after the draw that assigned them.
pub const EXPIRY_EPOCHS: u32 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct Info {
    pub prize_pool: i64,
    pub capacity: i64,
    pub next_height: u32,
}

/// Returns the prize pool, deposit capacity and next draw height.
pub async fn info(ln: &dyn Ln, stores: &Stores) -> Result<Info, anyhow::Error> {
    let remote_balance = ln.remote_balance().await?;
    let next_height = stores.lotteries.next_height().await?;
    let prize_pool = stores.bets.prize_pool(next_height).await?;

    Ok(Info {
        prize_pool: prize_pool as i64,
        capacity: remote_balance / CAPACITY_DIVISOR,
        next_height,
    })
}

/// Watches the block stream and draws winners at each scheduled height.
pub struct Lottery {
    duration: u32,
    max_fee_ppm: u64,
    stores: Stores,
    ln: Arc<dyn Ln>,
    notifier: Arc<dyn Notifier>,
    lnurl: LnurlClient,
    winners_tx: mpsc::Sender<Vec<Winner>>,
    cancel_token: CancellationToken,
}

impl Lottery {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        duration: u32,
        max_fee_ppm: u64,
        stores: Stores,
        ln: Arc<dyn Ln>,
        notifier: Arc<dyn Notifier>,
        lnurl: LnurlClient,
        winners_tx: mpsc::Sender<Vec<Winner>>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            duration,
            max_fee_ppm,
            stores,
            ln,
            notifier,
            lnurl,
            winners_tx,
            cancel_token,
        }
    }

    /// Reconciles the scheduled height with the chain, then consumes the
    /// block stream until cancelled.
    pub async fn run(
        &self,
        mut blocks_rx: mpsc::Receiver<BlockEpoch>,
    ) -> Result<(), anyhow::Error> {
        let mut next_height = self.reconcile_next_height().await?;
        info!("Next block height target: {}", next_height);

        loop {
            tokio::select! {
                block = blocks_rx.recv() => {
                    let Some(mut block) = block else {
                        return Err(anyhow!("block stream closed"));
                    };

                    if block.height != next_height {
                        continue;
                    }

                    // Block hash bytes arrive reversed, correct it
                    block.hash.reverse();

                    if let Err(e) = self.raffle(&block).await {
                        error!("Raffle at height {} failed: {}", block.height, e);
                    }

                    next_height += self.duration;
                    self.stores.lotteries.add_height(next_height).await?;
                    info!("Next block height target: {}", next_height);
                }
                _ = self.cancel_token.cancelled() => {
                    info!("Lottery coordinator received cancellation");
                    return Ok(());
                }
            }
        }
    }

    /// Returns the height of the next draw, scheduling a fresh one when
    /// none is stored or the stored one has already been mined.
    async fn reconcile_next_height(&self) -> Result<u32, anyhow::Error> {
        let current_height = self.ln.block_height().await?;
        let mut next_height = self.stores.lotteries.next_height().await?;

        if next_height == 0 || current_height >= next_height {
            if next_height != 0 {
                // The server was down when the block was mined; remove the
                // height so no lottery without a draw is shown
                self.stores.lotteries.delete_height(next_height).await?;
            }

            next_height = current_height + self.duration;
            self.stores.lotteries.add_height(next_height).await?;
        }

        Ok(next_height)
    }

    pub async fn raffle(&self, block: &BlockEpoch) -> Result<(), anyhow::Error> {
        let expired = self
            .stores
            .prizes
            .expire(block.height.saturating_sub(self.duration * EXPIRY_EPOCHS))
            .await?;
        info!("Expired prizes: {}", expired);

        let bets = self
            .stores
            .bets
            .list(block.height, 0, 0, false)
            .await
            .map_err(|e| anyhow!("listing bets: {}", e))?;

        if bets.is_empty() {
            return Ok(());
        }

        let prize_pool = self.stores.bets.prize_pool(block.height).await?;
        let winners = draw::compute_winners(&block.hash, prize_pool, &bets);

        self.stores
            .winners
            .add(block.height, &winners)
            .await
            .map_err(|e| anyhow!("saving winners: {}", e))?;
        self.stores
            .prizes
            .set(block.height, &winners)
            .await
            .map_err(|e| anyhow!("saving prizes: {}", e))?;

        self.winners_tx
            .send(winners.clone())
            .await
            .map_err(|_| anyhow!("winners channel closed"))?;

        // Failures past this point never abort the raffle, the draw is
        // already in the store
        let announcement = draw_announcement_message(block.height, prize_pool, winners.len());
        if let Err(e) = self.notifier.broadcast(&announcement).await {
            error!("broadcasting draw results: {}", e);
        }

        let aggregated = aggregate_winners(&winners);
        self.notify_winners(&aggregated).await;
        self.try_auto_withdrawals(block.height, &aggregated).await;

        Ok(())
    }

    async fn notify(&self, public_key: &str, message: &str) {
        let chat_id = match self.stores.notifications.chat_id(public_key).await {
            Ok(chat_id) => chat_id,
            Err(StoreError::NoChatId) => return,
            Err(e) => {
                error!("getting chat id: {}", e);
                return;
            }
        };

        if let Err(e) = self.notifier.notify(chat_id, message).await {
            error!("sending notification: {}", e);
        }
    }

    /// Congratulates the winners that enabled notifications.
    async fn notify_winners(&self, winners: &BTreeMap<String, u64>) {
        for (public_key, prizes) in winners {
            let message = congratulations_message(*prizes, self.duration * EXPIRY_EPOCHS);
            self.notify(public_key, &message).await;
        }
    }

    /// Pushes prizes to winners with a linked lightning address.
    ///
    /// The ledger debit commits before the payment; a failed payment
    /// re-credits, so the service never both pays and keeps the debit.
    async fn try_auto_withdrawals(&self, lottery_height: u32, winners: &BTreeMap<String, u64>) {
        for (public_key, prizes) in winners {
            let address = match self.stores.lightning.get(public_key).await {
                Ok(address) => address,
                Err(StoreError::NoAddress) => continue,
                Err(e) => {
                    error!("getting lightning address: {}", e);
                    continue;
                }
            };

            if let Err(e) = self.stores.prizes.withdraw(public_key, *prizes).await {
                error!("debiting prizes for {}: {}", public_key, e);
                continue;
            }

            match self.pay_address(&address, *prizes).await {
                Ok(preimage) => {
                    let message = auto_withdrawal_message(*prizes, &address, &preimage);
                    self.notify(public_key, &message).await;
                }
                Err(e) => {
                    error!("sending to lightning address {}: {}", address, e);

                    let restored = Winner {
                        public_key: public_key.clone(),
                        prize: *prizes,
                        ticket: 0,
                    };
                    if let Err(e) = self.stores.prizes.set(lottery_height, &[restored]).await {
                        error!("restoring prizes for {}: {}", public_key, e);
                    }
                }
            }
        }
    }

    async fn pay_address(&self, address: &str, amount_sat: u64) -> Result<String, anyhow::Error> {
        let invoice = self.lnurl.fetch_invoice(address, amount_sat).await?;
        let fee_limit = amount_sat * self.max_fee_ppm / 1_000_000;

        let update = self
            .ln
            .send_payment(&invoice, amount_sat, fee_limit, None)
            .await?;

        match update.status {
            PaymentStatus::Succeeded => Ok(update.preimage.unwrap_or_default()),
            _ => Err(anyhow!(
                "payment failed: {}",
                update
                    .failure_reason
                    .unwrap_or_else(|| String::from("unknown reason"))
            )),
        }
    }
}

fn aggregate_winners(winners: &[Winner]) -> BTreeMap<String, u64> {
    let mut aggregated = BTreeMap::new();

    for winner in winners {
        *aggregated.entry(winner.public_key.clone()).or_insert(0) += winner.prize;
    }

    aggregated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::stores::test_support::stores,
        infra::{lightning_mock::MockLn, notifier::NoopNotifier},
    };
    use sqlx::SqlitePool;

    const DISPLAY_HASH: &str = "000000000000000000001badcbb5d10b486a18a97ac9d6e08d526a62aa9a360e";

    /// Captures every message instead of sending it anywhere.
    #[derive(Default)]
    struct RecordingNotifier {
        notified: std::sync::Mutex<Vec<(i64, String)>>,
        broadcasts: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, chat_id: i64, message: &str) -> Result<(), anyhow::Error> {
            self.notified
                .lock()
                .unwrap()
                .push((chat_id, message.to_string()));
            Ok(())
        }

        async fn broadcast(&self, message: &str) -> Result<(), anyhow::Error> {
            self.broadcasts.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    fn lottery(
        stores: Stores,
        ln: Arc<MockLn>,
        winners_tx: mpsc::Sender<Vec<Winner>>,
    ) -> Lottery {
        lottery_with_notifier(stores, ln, Arc::new(NoopNotifier), winners_tx)
    }

    fn lottery_with_notifier(
        stores: Stores,
        ln: Arc<MockLn>,
        notifier: Arc<dyn Notifier>,
        winners_tx: mpsc::Sender<Vec<Winner>>,
    ) -> Lottery {
        Lottery::new(
            144,
            1500,
            stores,
            ln,
            notifier,
            LnurlClient::new(),
            winners_tx,
            CancellationToken::new(),
        )
    }

    /// A block as `raffle` receives it, hash already in display order.
    fn block(height: u32) -> BlockEpoch {
        BlockEpoch {
            height,
            hash: hex::decode(DISPLAY_HASH).unwrap(),
        }
    }

    #[test]
    fn test_aggregate_winners() {
        let winners = vec![
            Winner {
                public_key: "a".into(),
                prize: 500,
                ticket: 1,
            },
            Winner {
                public_key: "b".into(),
                prize: 250,
                ticket: 2,
            },
            Winner {
                public_key: "a".into(),
                prize: 125,
                ticket: 3,
            },
        ];

        let aggregated = aggregate_winners(&winners);
        assert_eq!(aggregated.get("a"), Some(&625));
        assert_eq!(aggregated.get("b"), Some(&250));
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_raffle_credits_and_publishes(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        let (winners_tx, mut winners_rx) = mpsc::channel(1);

        stores.lotteries.add_height(800144).await.unwrap();
        stores.bets.add("pk", 1000).await.unwrap();

        let lottery = lottery(stores.clone(), ln, winners_tx);
        lottery.raffle(&block(800144)).await.unwrap();

        let winners = stores.winners.list(800144).await.unwrap();
        assert_eq!(winners.len(), 8);
        assert_eq!(winners[0].ticket, 417);
        assert_eq!(winners[0].prize, 500);

        // The single bettor holds every ticket and got every prize credited
        let expected: u64 = winners.iter().map(|w| w.prize).sum();
        assert_eq!(stores.prizes.get("pk").await.unwrap(), expected);

        let published = winners_rx.recv().await.unwrap();
        assert_eq!(published, winners);
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_raffle_announces_and_notifies(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let (winners_tx, _winners_rx) = mpsc::channel(8);

        stores.lotteries.add_height(800144).await.unwrap();
        stores.bets.add("pk", 1000).await.unwrap();
        stores.notifications.subscribe("pk", 42).await.unwrap();

        let lottery =
            lottery_with_notifier(stores.clone(), ln, notifier.clone(), winners_tx);
        lottery.raffle(&block(800144)).await.unwrap();

        // The draw went out on the public channel
        let broadcasts = notifier.broadcasts.lock().unwrap().clone();
        assert_eq!(broadcasts.len(), 1);
        assert!(broadcasts[0].contains("block 800144"));

        // The subscribed winner got a private message
        let notified = notifier.notified.lock().unwrap().clone();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].0, 42);
        assert!(notified[0].1.contains("You have won"));
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_raffle_without_bets_is_a_noop(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        let (winners_tx, mut winners_rx) = mpsc::channel(1);

        stores.lotteries.add_height(800144).await.unwrap();

        let lottery = lottery(stores.clone(), ln, winners_tx);
        lottery.raffle(&block(800144)).await.unwrap();

        assert!(stores.winners.list(800144).await.unwrap().is_empty());
        assert!(winners_rx.try_recv().is_err());
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_raffle_expires_stale_prizes(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        let (winners_tx, _winners_rx) = mpsc::channel(1);

        // duration 144, draw at 900144: prizes up to 899424 expire
        stores
            .prizes
            .set(
                899424,
                &[Winner {
                    public_key: "old".into(),
                    prize: 700,
                    ticket: 1,
                }],
            )
            .await
            .unwrap();
        stores
            .prizes
            .set(
                899425,
                &[Winner {
                    public_key: "fresh".into(),
                    prize: 800,
                    ticket: 1,
                }],
            )
            .await
            .unwrap();
        stores.lotteries.add_height(900144).await.unwrap();

        let lottery = lottery(stores.clone(), ln, winners_tx);
        lottery.raffle(&block(900144)).await.unwrap();

        assert_eq!(stores.prizes.get("old").await.unwrap(), 0);
        assert_eq!(stores.prizes.get("fresh").await.unwrap(), 800);
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_failed_auto_withdrawal_restores_prizes(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        let (winners_tx, _winners_rx) = mpsc::channel(8);

        stores.lotteries.add_height(800144).await.unwrap();
        stores.bets.add("pk", 1000).await.unwrap();
        // Unreachable LNURL host, every payout attempt fails
        stores.lightning.set("pk", "user@127.0.0.1:1").await.unwrap();

        let lottery = lottery(stores.clone(), ln, winners_tx);
        lottery.raffle(&block(800144)).await.unwrap();

        // The debit was rolled back by a fresh credit
        let winners = stores.winners.list(800144).await.unwrap();
        let expected: u64 = winners.iter().map(|w| w.prize).sum();
        assert_eq!(stores.prizes.get("pk").await.unwrap(), expected);
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_reconcile_schedules_first_draw(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        ln.set_block_height(800000);
        let (winners_tx, _winners_rx) = mpsc::channel(1);

        let lottery = lottery(stores.clone(), ln, winners_tx);
        let next = lottery.reconcile_next_height().await.unwrap();

        assert_eq!(next, 800144);
        assert_eq!(stores.lotteries.next_height().await.unwrap(), 800144);
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_reconcile_replaces_missed_draw(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        ln.set_block_height(800200);
        let (winners_tx, _winners_rx) = mpsc::channel(1);

        // The scheduled draw was mined while the service was down
        stores.lotteries.add_height(800144).await.unwrap();

        let lottery = lottery(stores.clone(), ln, winners_tx);
        let next = lottery.reconcile_next_height().await.unwrap();

        assert_eq!(next, 800344);
        let heights = stores.lotteries.list_heights(0, 0, false).await.unwrap();
        assert_eq!(heights, vec![800344]);
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_reconcile_keeps_future_draw(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        ln.set_block_height(800100);
        let (winners_tx, _winners_rx) = mpsc::channel(1);

        stores.lotteries.add_height(800144).await.unwrap();

        let lottery = lottery(stores.clone(), ln, winners_tx);
        let next = lottery.reconcile_next_height().await.unwrap();

        assert_eq!(next, 800144);
    }
}
