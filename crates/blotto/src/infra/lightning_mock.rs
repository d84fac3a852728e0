//! Scripted Lightning client used by tests in place of a real node.

use anyhow::anyhow;
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};
use time::OffsetDateTime;
use tokio::sync::mpsc;

use super::lightning::{
    AddInvoiceResponse, BlockEpoch, ChannelEvent, InvoiceLookup, InvoiceState, InvoiceUpdate, Ln,
    PayReq, PaymentStatus, PaymentUpdate,
};

/// A pre-scripted decoded invoice keyed by its payment request.
#[derive(Debug, Clone)]
pub struct MockInvoice {
    pub payment_hash: String,
    pub num_sat: u64,
    pub expiry_secs: i64,
    pub cltv_expiry: u64,
    pub state: InvoiceState,
}

#[derive(Debug, Clone)]
pub struct HoldInvoiceCall {
    pub payment_hash: String,
    pub value: u64,
    pub expiry_secs: u64,
    pub cltv_expiry: u64,
}

#[derive(Debug, Clone)]
pub struct SentPayment {
    pub payment_request: String,
    pub amount_sat: u64,
    pub fee_limit_sat: u64,
    pub cltv_limit: Option<u32>,
}

#[derive(Default)]
struct Subscriptions {
    blocks: Option<mpsc::Sender<BlockEpoch>>,
    channel_events: Option<mpsc::Sender<ChannelEvent>>,
    invoices: Option<mpsc::Sender<InvoiceUpdate>>,
    payments: Option<mpsc::Sender<PaymentUpdate>>,
}

pub struct MockLn {
    block_height: AtomicU64,
    remote_balance: AtomicU64,
    invoice_counter: AtomicU64,
    invoices: Mutex<HashMap<String, MockInvoice>>,
    payment_failures: Mutex<HashMap<String, String>>,
    hold_invoices: Mutex<Vec<HoldInvoiceCall>>,
    sent_payments: Mutex<Vec<SentPayment>>,
    cancelled: Mutex<Vec<String>>,
    settled: Mutex<Vec<String>>,
    subscriptions: Mutex<Subscriptions>,
}

impl MockLn {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            block_height: AtomicU64::new(800_000),
            remote_balance: AtomicU64::new(50_000_000),
            invoice_counter: AtomicU64::new(0),
            invoices: Mutex::new(HashMap::new()),
            payment_failures: Mutex::new(HashMap::new()),
            hold_invoices: Mutex::new(Vec::new()),
            sent_payments: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            settled: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Subscriptions::default()),
        }
    }

    pub fn set_block_height(&self, height: u32) {
        self.block_height.store(height as u64, Ordering::SeqCst);
    }

    pub fn set_remote_balance(&self, balance: u64) {
        self.remote_balance.store(balance, Ordering::SeqCst);
    }

    pub fn script_invoice(&self, payment_request: &str, invoice: MockInvoice) {
        self.invoices
            .lock()
            .unwrap()
            .insert(payment_request.to_string(), invoice);
    }

    /// Makes `send_payment` fail for the given payment request.
    pub fn script_payment_failure(&self, payment_request: &str, reason: &str) {
        self.payment_failures
            .lock()
            .unwrap()
            .insert(payment_request.to_string(), reason.to_string());
    }

    pub fn hold_invoices(&self) -> Vec<HoldInvoiceCall> {
        self.hold_invoices.lock().unwrap().clone()
    }

    pub fn sent_payments(&self) -> Vec<SentPayment> {
        self.sent_payments.lock().unwrap().clone()
    }

    pub fn cancelled_hashes(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn settled_preimages(&self) -> Vec<String> {
        self.settled.lock().unwrap().clone()
    }

    pub async fn push_block(&self, block: BlockEpoch) {
        let tx = self.subscriptions.lock().unwrap().blocks.clone();
        if let Some(tx) = tx {
            let _ = tx.send(block).await;
        }
    }

    pub async fn push_channel_event(&self, event: ChannelEvent) {
        let tx = self.subscriptions.lock().unwrap().channel_events.clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    pub async fn push_invoice_update(&self, update: InvoiceUpdate) {
        let tx = self.subscriptions.lock().unwrap().invoices.clone();
        if let Some(tx) = tx {
            let _ = tx.send(update).await;
        }
    }

    pub async fn push_payment_update(&self, update: PaymentUpdate) {
        let tx = self.subscriptions.lock().unwrap().payments.clone();
        if let Some(tx) = tx {
            let _ = tx.send(update).await;
        }
    }
}

#[async_trait]
impl Ln for MockLn {
    async fn ping(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn block_height(&self) -> Result<u32, anyhow::Error> {
        Ok(self.block_height.load(Ordering::SeqCst) as u32)
    }

    async fn remote_balance(&self) -> Result<i64, anyhow::Error> {
        Ok(self.remote_balance.load(Ordering::SeqCst) as i64)
    }

    async fn add_invoice(
        &self,
        value: u64,
        expiry_secs: u64,
        _memo: &str,
    ) -> Result<AddInvoiceResponse, anyhow::Error> {
        let n = self.invoice_counter.fetch_add(1, Ordering::SeqCst);
        let r_hash = hex::encode([n as u8; 32]);
        let payment_request = format!("lnbc-mock-{}", n);

        self.script_invoice(
            &payment_request,
            MockInvoice {
                payment_hash: r_hash.clone(),
                num_sat: value,
                expiry_secs: expiry_secs as i64,
                cltv_expiry: 144,
                state: InvoiceState::Open,
            },
        );

        Ok(AddInvoiceResponse {
            r_hash,
            payment_request,
        })
    }

    async fn decode_pay_req(&self, payment_request: &str) -> Result<PayReq, anyhow::Error> {
        let invoices = self.invoices.lock().unwrap();
        let invoice = invoices
            .get(payment_request)
            .ok_or_else(|| anyhow!("unknown invoice: {}", payment_request))?;

        Ok(PayReq {
            destination: String::from("mock-destination"),
            payment_hash: invoice.payment_hash.clone(),
            num_satoshis: invoice.num_sat.to_string(),
            timestamp: OffsetDateTime::now_utc().unix_timestamp().to_string(),
            expiry: invoice.expiry_secs.to_string(),
            cltv_expiry: invoice.cltv_expiry.to_string(),
        })
    }

    async fn add_hold_invoice(
        &self,
        payment_hash_hex: &str,
        value: u64,
        expiry_secs: u64,
        cltv_expiry: u64,
    ) -> Result<String, anyhow::Error> {
        self.hold_invoices.lock().unwrap().push(HoldInvoiceCall {
            payment_hash: payment_hash_hex.to_string(),
            value,
            expiry_secs,
            cltv_expiry,
        });

        Ok(format!("lnbc-hold-{}", payment_hash_hex))
    }

    async fn cancel_invoice(&self, payment_hash_hex: &str) -> Result<(), anyhow::Error> {
        self.cancelled
            .lock()
            .unwrap()
            .push(payment_hash_hex.to_string());
        Ok(())
    }

    async fn settle_invoice(&self, preimage_hex: &str) -> Result<(), anyhow::Error> {
        self.settled.lock().unwrap().push(preimage_hex.to_string());
        Ok(())
    }

    async fn lookup_invoice(
        &self,
        payment_hash_hex: &str,
    ) -> Result<InvoiceLookup, anyhow::Error> {
        let invoices = self.invoices.lock().unwrap();
        let invoice = invoices
            .values()
            .find(|invoice| invoice.payment_hash == payment_hash_hex)
            .ok_or_else(|| anyhow!("unknown invoice hash: {}", payment_hash_hex))?;

        Ok(InvoiceLookup {
            state: invoice.state.clone(),
            cltv_expiry: invoice.cltv_expiry,
            value_sat: invoice.num_sat,
        })
    }

    async fn send_payment(
        &self,
        payment_request: &str,
        amount_sat: u64,
        fee_limit_sat: u64,
        cltv_limit: Option<u32>,
    ) -> Result<PaymentUpdate, anyhow::Error> {
        self.sent_payments.lock().unwrap().push(SentPayment {
            payment_request: payment_request.to_string(),
            amount_sat,
            fee_limit_sat,
            cltv_limit,
        });

        let payment_hash = self
            .invoices
            .lock()
            .unwrap()
            .get(payment_request)
            .map(|invoice| invoice.payment_hash.clone())
            .unwrap_or_else(|| hex::encode([0u8; 32]));

        if let Some(reason) = self.payment_failures.lock().unwrap().get(payment_request) {
            return Ok(PaymentUpdate {
                payment_hash,
                status: PaymentStatus::Failed,
                failure_reason: Some(reason.clone()),
                preimage: None,
            });
        }

        Ok(PaymentUpdate {
            payment_hash,
            status: PaymentStatus::Succeeded,
            failure_reason: None,
            preimage: Some(hex::encode([0x11u8; 32])),
        })
    }

    async fn subscribe_blocks(&self) -> Result<mpsc::Receiver<BlockEpoch>, anyhow::Error> {
        let (tx, rx) = mpsc::channel(16);
        self.subscriptions.lock().unwrap().blocks = Some(tx);
        Ok(rx)
    }

    async fn subscribe_channel_events(
        &self,
    ) -> Result<mpsc::Receiver<ChannelEvent>, anyhow::Error> {
        let (tx, rx) = mpsc::channel(16);
        self.subscriptions.lock().unwrap().channel_events = Some(tx);
        Ok(rx)
    }

    async fn subscribe_invoices(&self) -> Result<mpsc::Receiver<InvoiceUpdate>, anyhow::Error> {
        let (tx, rx) = mpsc::channel(16);
        self.subscriptions.lock().unwrap().invoices = Some(tx);
        Ok(rx)
    }

    async fn subscribe_payments(&self) -> Result<mpsc::Receiver<PaymentUpdate>, anyhow::Error> {
        let (tx, rx) = mpsc::channel(16);
        self.subscriptions.lock().unwrap().payments = Some(tx);
        Ok(rx)
    }
}
