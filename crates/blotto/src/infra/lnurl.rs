//! LNURL-pay client used to push prizes to lightning addresses, plus the
//! LNURL-withdraw response document.

use anyhow::anyhow;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fee used for withdrawals done through the LNURL protocol.
///
/// A default keeps the flow smooth, wallets never have to ask.
pub const WITHDRAW_FEE_PPM: u64 = 1500;

#[derive(Debug, Serialize)]
pub struct WithdrawResponse {
    pub tag: &'static str,
    pub callback: String,
    pub k1: String,
    #[serde(rename = "defaultDescription")]
    pub default_description: &'static str,
    #[serde(rename = "minWithdrawable")]
    pub min_withdrawable: i64,
    #[serde(rename = "maxWithdrawable")]
    pub max_withdrawable: i64,
}

#[derive(Debug, Deserialize)]
struct PayParams {
    #[serde(default)]
    callback: String,
    #[serde(rename = "minSendable", default)]
    min_sendable: u64,
    #[serde(rename = "maxSendable", default)]
    max_sendable: u64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayValues {
    #[serde(default)]
    pr: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Pulls BOLT11 invoices out of lightning addresses.
#[derive(Clone, Debug)]
pub struct LnurlClient {
    client: Client,
}

impl LnurlClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self { client }
    }

    /// Requests an invoice for `amount_sat` from the address' LNURL-pay
    /// endpoint.
    pub async fn fetch_invoice(
        &self,
        address: &str,
        amount_sat: u64,
    ) -> Result<String, anyhow::Error> {
        let (name, host) =
            parse_address(address).ok_or_else(|| anyhow!("invalid lightning address"))?;
        let amount_msat = amount_sat * 1000;

        let params_url = format!("https://{}/.well-known/lnurlp/{}", host, name);
        let response = self
            .client
            .get(&params_url)
            .send()
            .await
            .map_err(|e| anyhow!("calling {}: {}", params_url, e))?;
        let params: PayParams = response
            .json()
            .await
            .map_err(|e| anyhow!("decoding LNURL params: {}", e))?;

        if params.status.as_deref() == Some("ERROR") {
            return Err(anyhow!(params
                .reason
                .unwrap_or_else(|| String::from("LNURL endpoint returned an error"))));
        }

        if amount_msat < params.min_sendable {
            return Err(anyhow!(
                "amount {} is lower than the minimum allowed {}",
                amount_sat,
                params.min_sendable / 1000
            ));
        }
        if amount_msat > params.max_sendable {
            return Err(anyhow!(
                "amount {} is higher than the maximum allowed {}",
                amount_sat,
                params.max_sendable / 1000
            ));
        }

        let mut callback = Url::parse(&params.callback)
            .map_err(|e| anyhow!("parsing LNURL callback: {}", e))?;
        callback
            .query_pairs_mut()
            .append_pair("amount", &amount_msat.to_string());

        let response = self
            .client
            .get(callback.clone())
            .send()
            .await
            .map_err(|e| anyhow!("calling {}: {}", callback, e))?;
        let values: PayValues = response
            .json()
            .await
            .map_err(|e| anyhow!("decoding LNURL values: {}", e))?;

        if values.status.as_deref() == Some("ERROR") {
            return Err(anyhow!(values
                .reason
                .unwrap_or_else(|| String::from("LNURL endpoint returned an error"))));
        }
        if values.pr.is_empty() {
            return Err(anyhow!("LNURL endpoint returned no invoice"));
        }

        Ok(values.pr)
    }
}

impl Default for LnurlClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits an internet identifier (`name@domain`) into its parts.
pub fn parse_address(address: &str) -> Option<(&str, &str)> {
    let (name, host) = address.split_once('@')?;

    if name.is_empty()
        || host.is_empty()
        || host.contains('@')
        || !host.contains('.')
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return None;
    }

    Some((name, host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("alice@ln.example.org"),
            Some(("alice", "ln.example.org"))
        );
        assert_eq!(parse_address("a_b-c.d@host.tld"), Some(("a_b-c.d", "host.tld")));

        assert_eq!(parse_address("no-at-sign"), None);
        assert_eq!(parse_address("@host.tld"), None);
        assert_eq!(parse_address("alice@"), None);
        assert_eq!(parse_address("alice@nodot"), None);
        assert_eq!(parse_address("al ice@host.tld"), None);
        assert_eq!(parse_address("alice@host@tld.com"), None);
    }

    #[test]
    fn test_withdraw_response_field_names() {
        let response = WithdrawResponse {
            tag: "withdrawalRequest",
            callback: "https://example.org/api/withdraw?fee=15&pubkey=ab".to_string(),
            k1: "signature".to_string(),
            default_description: "blotto withdrawal",
            min_withdrawable: 1000,
            max_withdrawable: 985_000,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["tag"], "withdrawalRequest");
        assert_eq!(json["minWithdrawable"], 1000);
        assert_eq!(json["maxWithdrawable"], 985_000);
        assert!(json.get("default_description").is_none());
    }
}
