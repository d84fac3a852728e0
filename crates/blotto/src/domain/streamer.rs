//! Merges the node's subscription streams with lottery results and fans
//! typed events out to HTTP subscribers.

use log::{debug, error, info};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::sync::{broadcast, mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    domain::{
        battles::Battles,
        lottery,
        stores::{Stores, Winner},
        tracker::{PaymentTracker, PendingPayment},
    },
    infra::lightning::{BlockEpoch, ChannelEvent, InvoiceState, InvoiceUpdate, Ln, PaymentStatus,
        PaymentUpdate},
};

pub const INFO_EVENT: &str = "info";
pub const INVOICES_EVENT: &str = "invoices";
pub const PAYMENTS_EVENT: &str = "payments";

/// Delay before recomputing the balance after a channel event, the node
/// needs a moment to update its local channel list.
const CHANNEL_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// One server-sent-event frame; every payload shares the single stream.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: &'static str,
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Failed,
    Success,
}

#[derive(Serialize)]
struct InfoPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    winners: Option<&'a [Winner]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capacity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prize_pool: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_height: Option<u32>,
}

#[derive(Serialize)]
struct InvoicesPayload<'a> {
    payment_id: u64,
    public_key: &'a str,
    amount: u64,
    status: EventStatus,
}

#[derive(Serialize)]
struct PaymentsPayload {
    payment_id: u64,
    status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Owns the consumers that correlate node streams with pending actions.
#[derive(Clone)]
pub struct EventStreamer {
    ln: Arc<dyn Ln>,
    stores: Stores,
    tracker: Arc<PaymentTracker>,
    battles: Arc<Battles>,
    events_tx: broadcast::Sender<SseFrame>,
    blocks_tx: mpsc::Sender<BlockEpoch>,
    cancel_token: CancellationToken,
}

impl EventStreamer {
    pub fn new(
        ln: Arc<dyn Ln>,
        stores: Stores,
        tracker: Arc<PaymentTracker>,
        battles: Arc<Battles>,
        blocks_tx: mpsc::Sender<BlockEpoch>,
        cancel_token: CancellationToken,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(256);

        Self {
            ln,
            stores,
            tracker,
            battles,
            events_tx,
            blocks_tx,
            cancel_token,
        }
    }

    /// Subscribers receive frames published after this call; slow readers
    /// lag out instead of blocking the publisher.
    pub fn subscribe(&self) -> broadcast::Receiver<SseFrame> {
        self.events_tx.subscribe()
    }

    /// Starts the five consumers on the task tracker.
    pub async fn spawn(
        &self,
        tasks: &TaskTracker,
        winners_rx: mpsc::Receiver<Vec<Winner>>,
    ) -> Result<(), anyhow::Error> {
        let blocks_rx = self.ln.subscribe_blocks().await?;
        let channel_events_rx = self.ln.subscribe_channel_events().await?;
        let invoices_rx = self.ln.subscribe_invoices().await?;
        let payments_rx = self.ln.subscribe_payments().await?;

        tasks.spawn(self.clone().run_blocks(blocks_rx));
        tasks.spawn(self.clone().run_channel_events(channel_events_rx));
        tasks.spawn(self.clone().run_invoices(invoices_rx));
        tasks.spawn(self.clone().run_payments(payments_rx));
        tasks.spawn(self.clone().run_winners(winners_rx));

        Ok(())
    }

    /// Forwards blocks to the lottery coordinator.
    async fn run_blocks(self, mut rx: mpsc::Receiver<BlockEpoch>) {
        loop {
            tokio::select! {
                block = rx.recv() => {
                    let Some(block) = block else {
                        error!("blocks stream closed");
                        return;
                    };

                    if self.blocks_tx.send(block).await.is_err() {
                        error!("lottery coordinator went away");
                        return;
                    }
                }
                _ = self.cancel_token.cancelled() => {
                    info!("block consumer received cancellation");
                    return;
                }
            }
        }
    }

    async fn run_channel_events(self, mut rx: mpsc::Receiver<ChannelEvent>) {
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else {
                        error!("channel events stream closed");
                        return;
                    };
                    self.handle_channel_event(event).await;
                }
                _ = self.cancel_token.cancelled() => {
                    info!("channel event consumer received cancellation");
                    return;
                }
            }
        }
    }

    async fn run_invoices(self, mut rx: mpsc::Receiver<InvoiceUpdate>) {
        loop {
            tokio::select! {
                update = rx.recv() => {
                    let Some(update) = update else {
                        error!("invoices stream closed");
                        return;
                    };
                    self.handle_invoice_update(update).await;
                }
                _ = self.cancel_token.cancelled() => {
                    info!("invoice consumer received cancellation");
                    return;
                }
            }
        }
    }

    async fn run_payments(self, mut rx: mpsc::Receiver<PaymentUpdate>) {
        loop {
            tokio::select! {
                update = rx.recv() => {
                    let Some(update) = update else {
                        error!("payments stream closed");
                        return;
                    };
                    self.handle_payment_update(update).await;
                }
                _ = self.cancel_token.cancelled() => {
                    info!("payment consumer received cancellation");
                    return;
                }
            }
        }
    }

    async fn run_winners(self, mut rx: mpsc::Receiver<Vec<Winner>>) {
        loop {
            tokio::select! {
                winners = rx.recv() => {
                    let Some(winners) = winners else {
                        error!("winners channel closed");
                        return;
                    };
                    self.handle_winners(winners).await;
                }
                _ = self.cancel_token.cancelled() => {
                    info!("winners consumer received cancellation");
                    return;
                }
            }
        }
    }

    /// Publishes the refreshed balance after a public channel opens or
    /// closes.
    pub(crate) async fn handle_channel_event(&self, event: ChannelEvent) {
        if let ChannelEvent::Opened { private, active } = event {
            // Private channel liquidity is not announced and cannot back bets
            if private || !active {
                return;
            }
        }

        tokio::time::sleep(CHANNEL_SETTLE_DELAY).await;

        let info = match lottery::info(self.ln.as_ref(), &self.stores).await {
            Ok(info) => info,
            Err(e) => {
                error!("getting lottery information: {}", e);
                return;
            }
        };

        self.publish(
            INFO_EVENT,
            &InfoPayload {
                winners: None,
                capacity: Some(info.capacity),
                prize_pool: Some(info.prize_pool),
                next_height: None,
            },
        );
    }

    /// Turns a settled tracked invoice into a bet, and routes accepted
    /// hold invoices to the battle engine.
    pub(crate) async fn handle_invoice_update(&self, update: InvoiceUpdate) {
        debug!(
            "invoice update: hash={}, state={:?}",
            update.payment_hash, update.state
        );

        match update.state {
            InvoiceState::Settled => {
                let Some(entry) = self.tracker.remove(&update.payment_hash) else {
                    return;
                };

                // The bet commits before the event so subscribers never see
                // a success for tickets that are not in the pool yet
                if let Err(e) = self.stores.bets.add(&entry.public_key, entry.amount).await {
                    error!(
                        "adding bet {} from {}: {}",
                        update.payment_hash, entry.public_key, e
                    );
                    return;
                }

                self.publish(
                    INVOICES_EVENT,
                    &InvoicesPayload {
                        payment_id: entry.id,
                        public_key: &entry.public_key,
                        amount: entry.amount,
                        status: EventStatus::Success,
                    },
                );
            }
            InvoiceState::Accepted => {
                self.battles.handle_accepted(&update.payment_hash).await;
            }
            _ => {}
        }
    }

    /// Settles the fate of a tracked outgoing payment.
    pub(crate) async fn handle_payment_update(&self, update: PaymentUpdate) {
        let status = match update.status {
            PaymentStatus::Failed => EventStatus::Failed,
            PaymentStatus::Succeeded => EventStatus::Success,
            _ => return,
        };

        let Some(entry) = self.tracker.remove(&update.payment_hash) else {
            return;
        };

        if status == EventStatus::Failed {
            self.restore_funds(&entry, &update.payment_hash).await;
            error!(
                "Failed to pay invoice {}: {}",
                update.payment_hash,
                update.failure_reason.as_deref().unwrap_or("unknown")
            );
        }

        self.publish(
            PAYMENTS_EVENT,
            &PaymentsPayload {
                payment_id: entry.id,
                status,
                error: update.failure_reason,
            },
        );
    }

    /// Publishes a draw's winners and lets the janitor sweep the tracker.
    pub(crate) async fn handle_winners(&self, winners: Vec<Winner>) {
        match lottery::info(self.ln.as_ref(), &self.stores).await {
            Ok(info) => {
                self.publish(
                    INFO_EVENT,
                    &InfoPayload {
                        winners: Some(&winners),
                        capacity: Some(info.capacity),
                        prize_pool: Some(info.prize_pool),
                        next_height: Some(info.next_height),
                    },
                );
            }
            Err(e) => error!("getting lottery information: {}", e),
        }

        self.tracker.evict_expired();
    }

    /// Reports a payment that could not even be handed to the node, so the
    /// debit it covered is restored without waiting for a stream event.
    pub(crate) async fn payment_send_failed(&self, r_hash: &str, reason: &str) {
        let Some(entry) = self.tracker.remove(r_hash) else {
            return;
        };

        self.restore_funds(&entry, r_hash).await;
        self.publish(
            PAYMENTS_EVENT,
            &PaymentsPayload {
                payment_id: entry.id,
                status: EventStatus::Failed,
                error: Some(reason.to_string()),
            },
        );
    }

    /// Gives a winner back the prizes debited for a payment that failed.
    ///
    /// Removing the tracker entry first guarantees at most one of
    /// restore-funds or add-bet ever fires for a fingerprint.
    async fn restore_funds(&self, entry: &PendingPayment, r_hash: &str) {
        match self.stores.prizes.exists(&entry.public_key).await {
            Ok(true) => {}
            Ok(false) => {
                error!("tried restoring prizes to a user that is not a winner");
                return;
            }
            Err(e) => {
                error!("checking winner status: {}", e);
                return;
            }
        }

        let height = match self.stores.lotteries.next_height().await {
            Ok(height) => height,
            Err(e) => {
                error!("getting next height: {}", e);
                return;
            }
        };

        let restored = Winner {
            public_key: entry.public_key.clone(),
            prize: entry.amount,
            ticket: 0,
        };
        if let Err(e) = self.stores.prizes.set(height, &[restored]).await {
            error!(
                "restoring funds. Public key {}, payment {}: {}",
                entry.public_key, r_hash, e
            );
        }
    }

    fn publish<T: Serialize>(&self, event: &'static str, payload: &T) {
        let data = match serde_json::to_string(payload) {
            Ok(data) => data,
            Err(e) => {
                error!("encoding stream payload: {}", e);
                return;
            }
        };

        // No subscribers is fine, frames are fire-and-forget
        let _ = self.events_tx.send(SseFrame { event, data });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::stores::test_support::stores,
        infra::lightning_mock::MockLn,
    };
    use sqlx::SqlitePool;

    fn streamer(stores: Stores, ln: Arc<MockLn>) -> EventStreamer {
        let tracker = Arc::new(PaymentTracker::default());
        let battles = Arc::new(Battles::new(stores.battles.clone(), ln.clone()));
        let (blocks_tx, _blocks_rx) = mpsc::channel(16);

        EventStreamer::new(
            ln,
            stores,
            tracker,
            battles,
            blocks_tx,
            CancellationToken::new(),
        )
    }

    fn tracker_of(streamer: &EventStreamer) -> Arc<PaymentTracker> {
        streamer.tracker.clone()
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_settled_invoice_adds_bet_and_publishes(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        let streamer = streamer(stores.clone(), ln);
        let mut events = streamer.subscribe();

        stores.lotteries.add_height(800144).await.unwrap();
        let payment_id = tracker_of(&streamer).track("hash1", "pk", 1000);

        streamer
            .handle_invoice_update(InvoiceUpdate {
                payment_hash: "hash1".to_string(),
                state: InvoiceState::Settled,
                amt_paid_sat: Some(1000),
            })
            .await;

        let bets = stores.bets.list(800144, 0, 0, false).await.unwrap();
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].tickets, 1000);
        assert_eq!(bets[0].public_key, "pk");

        let frame = events.try_recv().unwrap();
        assert_eq!(frame.event, INVOICES_EVENT);
        let payload: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
        assert_eq!(payload["payment_id"], serde_json::json!(payment_id));
        assert_eq!(payload["status"], "success");
        assert_eq!(payload["amount"], 1000);

        assert!(!tracker_of(&streamer).contains("hash1"));
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_untracked_settled_invoice_is_ignored(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        let streamer = streamer(stores.clone(), ln);
        let mut events = streamer.subscribe();

        stores.lotteries.add_height(800144).await.unwrap();

        streamer
            .handle_invoice_update(InvoiceUpdate {
                payment_hash: "unknown".to_string(),
                state: InvoiceState::Settled,
                amt_paid_sat: Some(1000),
            })
            .await;

        assert!(stores.bets.list(800144, 0, 0, false).await.unwrap().is_empty());
        assert!(events.try_recv().is_err());
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_failed_payment_restores_funds(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        let streamer = streamer(stores.clone(), ln);
        let mut events = streamer.subscribe();

        stores.lotteries.add_height(800144).await.unwrap();
        // The user won 1000 at this epoch and a withdrawal debited it all
        stores
            .prizes
            .set(
                800144,
                &[Winner {
                    public_key: "x".into(),
                    prize: 1000,
                    ticket: 1,
                }],
            )
            .await
            .unwrap();
        stores.prizes.withdraw("x", 1000).await.unwrap();

        let payment_id = tracker_of(&streamer).track("hash1", "x", 1000);

        streamer
            .handle_payment_update(PaymentUpdate {
                payment_hash: "hash1".to_string(),
                status: PaymentStatus::Failed,
                failure_reason: Some("FAILURE_REASON_NO_ROUTE".to_string()),
                preimage: None,
            })
            .await;

        // The balance is back
        assert_eq!(stores.prizes.get("x").await.unwrap(), 1000);

        let frame = events.try_recv().unwrap();
        assert_eq!(frame.event, PAYMENTS_EVENT);
        let payload: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
        assert_eq!(payload["payment_id"], serde_json::json!(payment_id));
        assert_eq!(payload["status"], "failed");
        assert_eq!(payload["error"], "FAILURE_REASON_NO_ROUTE");

        assert!(!tracker_of(&streamer).contains("hash1"));
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_failed_payment_for_non_winner_restores_nothing(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        let streamer = streamer(stores.clone(), ln);
        let mut events = streamer.subscribe();

        stores.lotteries.add_height(800144).await.unwrap();
        tracker_of(&streamer).track("hash1", "nobody", 1000);

        streamer
            .handle_payment_update(PaymentUpdate {
                payment_hash: "hash1".to_string(),
                status: PaymentStatus::Failed,
                failure_reason: None,
                preimage: None,
            })
            .await;

        assert_eq!(stores.prizes.get("nobody").await.unwrap(), 0);
        // The failure is still reported to the client
        let frame = events.try_recv().unwrap();
        assert_eq!(frame.event, PAYMENTS_EVENT);
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_at_most_one_action_per_fingerprint(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        let streamer = streamer(stores.clone(), ln);

        stores.lotteries.add_height(800144).await.unwrap();
        stores
            .prizes
            .set(
                800144,
                &[Winner {
                    public_key: "pk".into(),
                    prize: 1000,
                    ticket: 1,
                }],
            )
            .await
            .unwrap();

        tracker_of(&streamer).track("hash1", "pk", 1000);

        // The settlement lands first and consumes the entry
        streamer
            .handle_invoice_update(InvoiceUpdate {
                payment_hash: "hash1".to_string(),
                state: InvoiceState::Settled,
                amt_paid_sat: Some(1000),
            })
            .await;

        // A late failure for the same fingerprint must not restore funds
        streamer
            .handle_payment_update(PaymentUpdate {
                payment_hash: "hash1".to_string(),
                status: PaymentStatus::Failed,
                failure_reason: None,
                preimage: None,
            })
            .await;

        assert_eq!(stores.bets.list(800144, 0, 0, false).await.unwrap().len(), 1);
        assert_eq!(stores.prizes.get("pk").await.unwrap(), 1000);
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_succeeded_payment_publishes_success(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        let streamer = streamer(stores, ln);
        let mut events = streamer.subscribe();

        let payment_id = tracker_of(&streamer).track("hash1", "x", 1000);

        streamer
            .handle_payment_update(PaymentUpdate {
                payment_hash: "hash1".to_string(),
                status: PaymentStatus::Succeeded,
                failure_reason: None,
                preimage: Some("aa".repeat(32)),
            })
            .await;

        let frame = events.try_recv().unwrap();
        assert_eq!(frame.event, PAYMENTS_EVENT);
        let payload: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
        assert_eq!(payload["payment_id"], serde_json::json!(payment_id));
        assert_eq!(payload["status"], "success");

        assert!(!tracker_of(&streamer).contains("hash1"));
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_winners_event_publishes_info(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        ln.set_remote_balance(50_000_000);
        let streamer = streamer(stores.clone(), ln);
        let mut events = streamer.subscribe();

        stores.lotteries.add_height(800288).await.unwrap();

        let winners = vec![Winner {
            public_key: "a".into(),
            prize: 500,
            ticket: 417,
        }];
        streamer.handle_winners(winners).await;

        let frame = events.try_recv().unwrap();
        assert_eq!(frame.event, INFO_EVENT);
        let payload: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
        assert_eq!(payload["next_height"], 800288);
        assert_eq!(payload["capacity"], 10_000_000);
        assert_eq!(payload["winners"][0]["ticket"], 417);
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_private_channel_events_are_skipped(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        let streamer = streamer(stores, ln);
        let mut events = streamer.subscribe();

        streamer
            .handle_channel_event(ChannelEvent::Opened {
                private: true,
                active: true,
            })
            .await;

        assert!(events.try_recv().is_err());
    }

    #[sqlx::test(migrations = "./migrations/raffle")]
    async fn test_public_channel_event_publishes_info(pool: SqlitePool) {
        let stores = stores(pool);
        let ln = Arc::new(MockLn::new());
        ln.set_remote_balance(25_000_000);
        let streamer = streamer(stores.clone(), ln);
        let mut events = streamer.subscribe();

        stores.lotteries.add_height(800144).await.unwrap();

        streamer
            .handle_channel_event(ChannelEvent::Opened {
                private: false,
                active: true,
            })
            .await;

        let frame = events.try_recv().unwrap();
        assert_eq!(frame.event, INFO_EVENT);
        let payload: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
        assert_eq!(payload["capacity"], 5_000_000);
        assert!(payload.get("winners").is_none());
    }
}
