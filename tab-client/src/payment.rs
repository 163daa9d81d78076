//! Payment provider integration
//!
//! Lightning invoices are created and polled through the [`PaymentProvider`]
//! trait. [`LnBitsProvider`] talks to an LNbits-compatible wallet API;
//! [`SimulatedProvider`] settles in-process and is the fallback when no live
//! wallet is configured. Amounts are priced in fiat units and converted to
//! sats at a fixed rate before hitting the provider.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Invoice lifetime requested from the provider
pub const INVOICE_EXPIRY_SECS: u64 = 600;

/// 法币单位 → sats 固定汇率
const SATS_PER_UNIT: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// A Lightning invoice awaiting settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// BOLT11 payment request (what the customer scans)
    pub payment_request: String,
    pub payment_hash: String,
    pub amount_sats: u64,
    pub expiry_secs: u64,
    /// Provider-side id used for status polling
    pub checking_id: String,
}

/// Settlement state reported by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatus {
    pub paid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_sats: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_hash: Option<String>,
}

/// Lightning payment backend
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create an invoice for `amount` (fiat units, converted to sats).
    async fn create_invoice(
        &self,
        amount: Decimal,
        memo: &str,
        metadata: Value,
    ) -> ClientResult<Invoice>;

    /// Poll settlement state for a previously created invoice.
    async fn check_status(&self, checking_id: &str) -> ClientResult<PaymentStatus>;
}

/// Convert a fiat amount to whole sats, rounding to the nearest sat.
pub fn amount_to_sats(amount: Decimal) -> ClientResult<u64> {
    if amount.is_sign_negative() {
        return Err(ClientError::Payment(format!("negative amount: {}", amount)));
    }
    (amount * SATS_PER_UNIT)
        .round()
        .to_u64()
        .ok_or_else(|| ClientError::Payment(format!("amount out of range: {}", amount)))
}

/// `lightning:` URI for wallet deep links.
pub fn payment_uri(payment_request: &str) -> String {
    format!("lightning:{}", payment_request)
}

/// Provider selection: LNbits when both API keys are configured, otherwise
/// the simulated fallback so the ordering flow stays usable offline.
pub fn provider_from_config(config: &ClientConfig) -> std::sync::Arc<dyn PaymentProvider> {
    match LnBitsProvider::from_config(config) {
        Ok(provider) => std::sync::Arc::new(provider),
        Err(e) => {
            tracing::info!(reason = %e, "Using simulated payment provider");
            std::sync::Arc::new(SimulatedProvider::default())
        }
    }
}

// ---- LNbits ----

#[derive(Debug, Deserialize)]
struct LnBitsInvoice {
    payment_hash: String,
    payment_request: String,
    #[serde(default)]
    checking_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LnBitsPaymentState {
    paid: bool,
}

/// LNbits-compatible wallet API client
#[derive(Debug, Clone)]
pub struct LnBitsProvider {
    http: reqwest::Client,
    base_url: String,
    invoice_key: String,
    admin_key: String,
}

impl LnBitsProvider {
    /// 需要 invoice key 与 admin key 均已配置
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let invoice_key = config
            .lnbits_invoice_key
            .clone()
            .ok_or_else(|| ClientError::Payment("LNBITS_INVOICE_KEY not configured".to_string()))?;
        let admin_key = config
            .lnbits_admin_key
            .clone()
            .ok_or_else(|| ClientError::Payment("LNBITS_ADMIN_KEY not configured".to_string()))?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.lnbits_url.trim_end_matches('/').to_string(),
            invoice_key,
            admin_key,
        })
    }
}

#[async_trait]
impl PaymentProvider for LnBitsProvider {
    async fn create_invoice(
        &self,
        amount: Decimal,
        memo: &str,
        metadata: Value,
    ) -> ClientResult<Invoice> {
        let amount_sats = amount_to_sats(amount)?;
        let url = format!("{}/api/v1/payments", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("X-Api-Key", &self.invoice_key)
            .json(&json!({
                "out": false,
                "amount": amount_sats,
                "memo": memo,
                "expiry": INVOICE_EXPIRY_SECS,
                "extra": metadata,
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: LnBitsInvoice = response.json().await?;
        tracing::info!(payment_hash = %body.payment_hash, amount_sats, "Invoice created");

        Ok(Invoice {
            checking_id: body
                .checking_id
                .unwrap_or_else(|| body.payment_hash.clone()),
            payment_request: body.payment_request,
            payment_hash: body.payment_hash,
            amount_sats,
            expiry_secs: INVOICE_EXPIRY_SECS,
        })
    }

    async fn check_status(&self, checking_id: &str) -> ClientResult<PaymentStatus> {
        let url = format!("{}/api/v1/payments/{}", self.base_url, checking_id);

        let response = self
            .http
            .get(&url)
            .header("X-Api-Key", &self.admin_key)
            .send()
            .await?
            .error_for_status()?;

        let body: LnBitsPaymentState = response.json().await?;
        Ok(PaymentStatus {
            paid: body.paid,
            amount_sats: None,
            payment_hash: Some(checking_id.to_string()),
        })
    }
}

// ---- Simulated fallback ----

/// In-process provider; settles after a configurable number of status checks.
#[derive(Debug)]
pub struct SimulatedProvider {
    settles: AtomicBool,
    settle_after_checks: u32,
    checks: DashMap<String, u32>,
}

impl SimulatedProvider {
    /// Invoices settle once `check_status` has been called `after_checks`
    /// times for that invoice.
    pub fn settling_after(after_checks: u32) -> Self {
        Self {
            settles: AtomicBool::new(true),
            settle_after_checks: after_checks,
            checks: DashMap::new(),
        }
    }

    /// Invoices never settle.
    pub fn never_settling() -> Self {
        let provider = Self::settling_after(0);
        provider.settles.store(false, Ordering::SeqCst);
        provider
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::settling_after(1)
    }
}

fn random_hex(bytes: usize) -> String {
    (0..bytes)
        .map(|_| format!("{:02x}", rand::random::<u8>()))
        .collect()
}

#[async_trait]
impl PaymentProvider for SimulatedProvider {
    async fn create_invoice(
        &self,
        amount: Decimal,
        memo: &str,
        _metadata: Value,
    ) -> ClientResult<Invoice> {
        let amount_sats = amount_to_sats(amount)?;
        let payment_hash = random_hex(32);
        tracing::debug!(payment_hash = %payment_hash, amount_sats, memo, "Simulated invoice");

        Ok(Invoice {
            payment_request: format!("lnbcsim{}", &payment_hash[..16]),
            checking_id: payment_hash.clone(),
            payment_hash,
            amount_sats,
            expiry_secs: INVOICE_EXPIRY_SECS,
        })
    }

    async fn check_status(&self, checking_id: &str) -> ClientResult<PaymentStatus> {
        let mut seen = self.checks.entry(checking_id.to_string()).or_insert(0);
        *seen += 1;
        let paid = self.settles.load(Ordering::SeqCst) && *seen > self.settle_after_checks;

        Ok(PaymentStatus {
            paid,
            amount_sats: None,
            payment_hash: Some(checking_id.to_string()),
        })
    }
}

// ---- Tip splitting ----

/// Staff member receiving a tip share
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipRecipient {
    pub name: String,
    pub lightning_address: String,
}

/// Outcome of one recipient's share
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipShare {
    pub name: String,
    pub lightning_address: String,
    pub amount_sats: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `name@domain.tld` shape check for lightning addresses.
pub fn is_valid_lightning_address(address: &str) -> bool {
    let Some((name, domain)) = address.split_once('@') else {
        return false;
    };
    !name.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

/// Split `total_sats` equally across valid recipients; the remainder goes
/// one sat at a time to the earliest recipients. Invalid addresses get a
/// zero share with an error recorded.
pub fn split_tip(total_sats: u64, recipients: &[TipRecipient]) -> Vec<TipShare> {
    let valid_count = recipients
        .iter()
        .filter(|r| is_valid_lightning_address(&r.lightning_address))
        .count() as u64;

    let (base, mut remainder) = if valid_count > 0 {
        (total_sats / valid_count, total_sats % valid_count)
    } else {
        (0, 0)
    };

    recipients
        .iter()
        .map(|r| {
            if !is_valid_lightning_address(&r.lightning_address) {
                return TipShare {
                    name: r.name.clone(),
                    lightning_address: r.lightning_address.clone(),
                    amount_sats: 0,
                    error: Some("invalid lightning address".to_string()),
                };
            }
            let extra = if remainder > 0 {
                remainder -= 1;
                1
            } else {
                0
            };
            TipShare {
                name: r.name.clone(),
                lightning_address: r.lightning_address.clone(),
                amount_sats: base + extra,
                error: None,
            }
        })
        .collect()
}
