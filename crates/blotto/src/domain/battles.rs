//! Two-party escrow over hold invoices.
//!
//! Each player submits a regular invoice; the service wraps it in a hold
//! invoice carrying the same payment hash, so the preimage stays with the
//! original requester and the service never takes custody.

use anyhow::anyhow;
use dashmap::DashMap;
use log::{error, info};
use rand::Rng;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::{
    domain::stores::{Battle, BattleStatus, BattleStore, Player, Role, StoreError},
    infra::lightning::{InvoiceState, Ln, PayReq},
};

/// Hold invoice expiry in seconds. Battles expire along with it, 3 hours.
pub const HOLD_INVOICE_EXPIRY_SECS: i64 = 10_800;

const CONTRACT_BASE_FEE_SAT: u64 = 20;
const CONTRACT_FEE_PPM: u64 = 1000;
/// The service keeps the difference between the contract and settlement fees.
const SETTLEMENT_FEE_PPM: u64 = CONTRACT_FEE_PPM - 300;

const CLTV_DELTA: u64 = 48;
const MIN_CLTV_EXPIRY: u64 = 200;
// Should be at most the node's `--max-cltv-expiry` setting (default: 2016)
const MAX_CLTV_EXPIRY: u64 = 2016;

const MAX_NUMBER: u16 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum BattleError {
    #[error("invalid invoice amount, it should be {0}")]
    InvalidAmount(u64),

    #[error("invoice expiry is too short, should be at least {HOLD_INVOICE_EXPIRY_SECS} seconds")]
    ExpiryTooShort,

    #[error("CLTV expiry too long")]
    CltvTooLong,

    #[error("battle can't be joined")]
    NotJoinable,

    #[error("player number must be between 0 and {MAX_NUMBER}")]
    InvalidNumber,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Node(#[from] anyhow::Error),
}

/// A freshly created battle handed back to the creator.
#[derive(Debug, Clone)]
pub struct CreatedBattle {
    pub battle_id: u64,
    pub hold_invoice: String,
}

/// Which side's hold invoice a tracked payment hash belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Creator,
    Challenger,
}

#[derive(Debug, Clone)]
struct TrackedInvoice {
    battle: Battle,
    /// The challenger; their row is persisted once the creator leg locks.
    player: Player,
    leg: Leg,
}

pub struct Battles {
    store: BattleStore,
    ln: Arc<dyn Ln>,
    tracked_invoices: DashMap<String, TrackedInvoice>,
}

impl Battles {
    pub fn new(store: BattleStore, ln: Arc<dyn Ln>) -> Self {
        Self {
            store,
            ln,
            tracked_invoices: DashMap::new(),
        }
    }

    /// Wraps a player's invoice in a hold invoice for its amount plus the
    /// contract fee, reusing the player's payment hash.
    async fn add_hold_invoice(&self, invoice: &PayReq) -> Result<String, BattleError> {
        if invoice.expiry_secs() < HOLD_INVOICE_EXPIRY_SECS {
            return Err(BattleError::ExpiryTooShort);
        }

        let amount = invoice.num_sat();
        let fee = CONTRACT_BASE_FEE_SAT + amount * CONTRACT_FEE_PPM / 1_000_000;

        let mut cltv_expiry = invoice.cltv() + CLTV_DELTA * 2;
        if cltv_expiry > MAX_CLTV_EXPIRY {
            return Err(BattleError::CltvTooLong);
        }
        if cltv_expiry < MIN_CLTV_EXPIRY {
            cltv_expiry = MIN_CLTV_EXPIRY;
        }

        let hold_invoice = self
            .ln
            .add_hold_invoice(
                &invoice.payment_hash,
                amount + fee,
                HOLD_INVOICE_EXPIRY_SECS as u64,
                cltv_expiry,
            )
            .await?;

        Ok(hold_invoice)
    }

    /// Creates and stores a battle with its creator.
    pub async fn create(&self, amount: u64, player: Player) -> Result<CreatedBattle, BattleError> {
        if player.number > MAX_NUMBER {
            return Err(BattleError::InvalidNumber);
        }

        let invoice = self.ln.decode_pay_req(&player.invoice).await?;
        if invoice.num_sat() != amount {
            return Err(BattleError::InvalidAmount(amount));
        }

        let hold_invoice = self.add_hold_invoice(&invoice).await?;

        // Random IDs instead of a serial counter to avoid leaking how many
        // battles were created
        let battle = Battle {
            id: rand::random::<u64>(),
            amount,
            status: BattleStatus::Created,
            number: None,
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
        };
        self.store.create(&battle, &player).await?;

        Ok(CreatedBattle {
            battle_id: battle.id,
            hold_invoice,
        })
    }

    /// Lets a challenger into a battle, returning the hold invoice the
    /// creator must pay. Both legs' payment hashes start being tracked so
    /// the accepted events can drive the battle forward.
    pub async fn request_join(
        &self,
        battle_id: u64,
        player: Player,
    ) -> Result<String, BattleError> {
        if player.number > MAX_NUMBER {
            return Err(BattleError::InvalidNumber);
        }

        let battle = self.store.get(battle_id).await?;
        if battle.status != BattleStatus::Created {
            return Err(BattleError::NotJoinable);
        }

        let invoice = self.ln.decode_pay_req(&player.invoice).await?;
        if invoice.num_sat() != battle.amount {
            return Err(BattleError::InvalidAmount(battle.amount));
        }

        let players = self.store.players(battle_id).await?;
        let creator = players
            .iter()
            .find(|p| p.role == Role::Creator)
            .ok_or_else(|| StoreError::Integrity("battle has no creator".to_string()))?;
        let creator_invoice = self.ln.decode_pay_req(&creator.invoice).await?;

        let hold_invoice = self.add_hold_invoice(&invoice).await?;

        self.track_invoice(&creator_invoice.payment_hash, &battle, &player, Leg::Creator);
        self.track_invoice(&invoice.payment_hash, &battle, &player, Leg::Challenger);

        Ok(hold_invoice)
    }

    fn track_invoice(&self, r_hash: &str, battle: &Battle, player: &Player, leg: Leg) {
        self.tracked_invoices.insert(
            r_hash.to_string(),
            TrackedInvoice {
                battle: battle.clone(),
                player: player.clone(),
                leg,
            },
        );
    }

    /// Reacts to a hold invoice reaching the accepted state. Returns true
    /// when the hash belonged to a battle leg.
    pub async fn handle_accepted(&self, payment_hash: &str) -> bool {
        let Some((_, tracked)) = self.tracked_invoices.remove(payment_hash) else {
            return false;
        };

        if let Err(e) = self.play(tracked).await {
            error!("advancing battle: {}", e);
        }

        true
    }

    /// Advances a battle after one side's funds locked.
    ///
    /// The creator leg locking means the challenger committed funds to the
    /// creator's hash; the challenger row joins the battle. The challenger
    /// leg locks last, at which point both sides are escrowed and the
    /// battle resolves.
    async fn play(&self, tracked: TrackedInvoice) -> Result<(), BattleError> {
        match tracked.leg {
            Leg::Creator => {
                info!(
                    "battle {}: creator invoice locked, adding challenger",
                    tracked.battle.id
                );
                self.store.add_player(tracked.battle.id, &tracked.player).await?;
                Ok(())
            }
            Leg::Challenger => {
                info!(
                    "battle {}: both invoices locked, resolving",
                    tracked.battle.id
                );
                let number = rand::rng().random_range(0..=MAX_NUMBER);
                self.resolve(&tracked.battle, number).await
            }
        }
    }

    /// Settles the winner's invoice and cancels the loser's, or cancels
    /// both on a tie. Exactly one side is ever paid.
    pub(crate) async fn resolve(&self, battle: &Battle, number: u16) -> Result<(), BattleError> {
        let players = self.store.players(battle.id).await?;

        let winner = closest_player(&players, number);

        for (i, player) in players.iter().enumerate() {
            if winner == Some(i) {
                self.settle_contract(&player.invoice).await?;
                continue;
            }

            let invoice = self.ln.decode_pay_req(&player.invoice).await?;
            self.ln.cancel_invoice(&invoice.payment_hash).await?;
        }

        self.store
            .update(battle.id, BattleStatus::Finished, number)
            .await?;

        Ok(())
    }

    /// Pays the winner's original invoice and uses the revealed preimage to
    /// settle the hold invoice holding the counterparty's funds.
    ///
    /// Service funds only ever leave inside this method, and only when the
    /// counterparty invoice is already accepted, so the locked funds plus
    /// the fee always cover the payment.
    async fn settle_contract(&self, original_invoice: &str) -> Result<(), BattleError> {
        let pay_req = self.ln.decode_pay_req(original_invoice).await?;

        let invoice = self.ln.lookup_invoice(&pay_req.payment_hash).await?;
        if invoice.state != InvoiceState::Accepted {
            if invoice.state != InvoiceState::Canceled {
                self.ln.cancel_invoice(&pay_req.payment_hash).await?;
            }
            return Err(BattleError::Node(anyhow!(
                "invoice state is not {:?}",
                InvoiceState::Accepted
            )));
        }

        // Payment CLTV <-- cltv delta --> hold invoice CLTV
        let cltv_limit = invoice.cltv_expiry.saturating_sub(CLTV_DELTA) as u32;
        let fee = pay_req.num_sat() * SETTLEMENT_FEE_PPM / 1_000_000;

        let payment = match self
            .ln
            .send_payment(original_invoice, pay_req.num_sat(), fee, Some(cltv_limit))
            .await
        {
            Ok(payment) => payment,
            Err(e) => {
                self.ln.cancel_invoice(&pay_req.payment_hash).await?;
                return Err(BattleError::Node(e));
            }
        };

        let Some(preimage) = payment.preimage else {
            self.ln.cancel_invoice(&pay_req.payment_hash).await?;
            return Err(BattleError::Node(anyhow!(
                "paying invoice {}: {}",
                pay_req.payment_hash,
                payment
                    .failure_reason
                    .unwrap_or_else(|| String::from("no preimage revealed"))
            )));
        };

        self.ln.settle_invoice(&preimage).await?;
        Ok(())
    }

    /// Expires stale battles and cancels their pending hold invoices.
    pub async fn expire(&self) -> Result<(), BattleError> {
        let cutoff = OffsetDateTime::now_utc().unix_timestamp() - HOLD_INVOICE_EXPIRY_SECS;
        let invoices = self.store.expire(cutoff).await?;

        for invoice in invoices {
            let pay_req = match self.ln.decode_pay_req(&invoice).await {
                Ok(pay_req) => pay_req,
                Err(e) => {
                    error!("decoding expired battle invoice: {}", e);
                    continue;
                }
            };

            self.tracked_invoices.remove(&pay_req.payment_hash);

            if let Err(e) = self.ln.cancel_invoice(&pay_req.payment_hash).await {
                error!("cancelling invoice {}: {}", pay_req.payment_hash, e);
            }
        }

        Ok(())
    }

    pub async fn list(
        &self,
        offset: u64,
        limit: u64,
        reverse: bool,
    ) -> Result<Vec<Battle>, BattleError> {
        Ok(self.store.list(offset, limit, reverse).await?)
    }
}

/// Index of the player whose number is strictly closest to the drawn one,
/// or `None` on a tie.
fn closest_player(players: &[Player], number: u16) -> Option<usize> {
    let mut winner: Option<usize> = None;
    let mut closest: Option<u16> = None;

    for (i, player) in players.iter().enumerate() {
        let diff = player.number.abs_diff(number);

        match closest {
            None => {
                closest = Some(diff);
                winner = Some(i);
            }
            Some(best) if diff == best => {
                winner = None;
            }
            Some(best) if diff < best => {
                closest = Some(diff);
                winner = Some(i);
            }
            Some(_) => {}
        }
    }

    winner
}
