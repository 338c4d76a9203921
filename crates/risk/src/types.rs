// In crates/risk/src/types.rs

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Settings for the risk assessment engine, loaded from the `[risk]` table.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RiskSettings {
    /// How long a computed assessment stays valid in the cache.
    pub cache_ttl_secs: u64,
    /// Master switch for model augmentation.
    pub ml_enabled: bool,
    /// Weight given to each model prediction when it is folded into the factors.
    pub ml_factor_weight: f64,
    /// Native-unit value above which a transfer is flagged as high value.
    pub high_value_threshold: f64,
    pub very_high_value_threshold: f64,
    pub max_gas_limit: u64,
    pub max_gas_price_gwei: f64,
    /// Contracts younger than this many blocks are considered new.
    pub new_contract_blocks: u64,
    pub low_activity_tx_count: u64,
    pub high_activity_tx_count: u64,
    /// REVERT/CALLER opcodes per KiB of bytecode above which a honeypot is suspected.
    pub honeypot_density_threshold: f64,
    /// Extra addresses for the static denylist.
    pub denylist: Vec<String>,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            ml_enabled: true,
            ml_factor_weight: 0.3,
            high_value_threshold: 100.0,
            very_high_value_threshold: 1_000.0,
            max_gas_limit: 1_000_000,
            max_gas_price_gwei: 200.0,
            new_contract_blocks: 50_400,
            low_activity_tx_count: 10,
            high_activity_tx_count: 1_000,
            honeypot_density_threshold: 4.0,
            denylist: Vec::new(),
        }
    }
}

/// A proposed transaction to be scored before it is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRiskRequest {
    pub from: String,
    pub to: String,
    /// Value in native units (e.g. ETH, not wei).
    pub value: Decimal,
    /// Hex-encoded call data, `0x`-prefixed.
    pub data: Option<String>,
    pub chain_id: u64,
    pub gas_limit: u64,
    /// Gas price in gwei.
    pub gas_price: Decimal,
    pub transaction_hash: Option<String>,
    pub include_ml: bool,
}

impl TransactionRiskRequest {
    /// Rejects requests that cannot be analysed at all.
    pub fn validate(&self) -> Result<()> {
        if !is_address(&self.from) {
            return Err(Error::InvalidRequest(format!("invalid from address: {}", self.from)));
        }
        if !is_address(&self.to) {
            return Err(Error::InvalidRequest(format!("invalid to address: {}", self.to)));
        }
        if self.value.is_sign_negative() {
            return Err(Error::InvalidRequest("value must not be negative".to_string()));
        }
        if self.gas_price.is_sign_negative() {
            return Err(Error::InvalidRequest("gas price must not be negative".to_string()));
        }
        self.call_data()?;
        Ok(())
    }

    /// Decoded call data, empty when none was supplied.
    pub fn call_data(&self) -> Result<Vec<u8>> {
        match self.data.as_deref() {
            None => Ok(Vec::new()),
            Some(raw) => {
                let trimmed = raw.strip_prefix("0x").unwrap_or(raw);
                hex::decode(trimmed)
                    .map_err(|e| Error::InvalidRequest(format!("call data is not valid hex: {e}")))
            }
        }
    }

    /// A deterministic fingerprint over every request field.
    pub fn cache_key(&self) -> String {
        let data = self
            .data
            .as_deref()
            .map(|d| d.trim_start_matches("0x").to_ascii_lowercase())
            .unwrap_or_default();
        fingerprint(&[
            "tx",
            &self.from.to_ascii_lowercase(),
            &self.to.to_ascii_lowercase(),
            &self.value.normalize().to_string(),
            &data,
            &self.chain_id.to_string(),
            &self.gas_limit.to_string(),
            &self.gas_price.normalize().to_string(),
            self.transaction_hash.as_deref().unwrap_or(""),
            if self.include_ml { "ml" } else { "heuristic" },
        ])
    }
}

/// A deployed contract to be scored before the engine interacts with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRiskRequest {
    pub address: String,
    pub chain_id: u64,
    pub include_ml: bool,
    pub check_rug_pull: bool,
}

impl ContractRiskRequest {
    pub fn validate(&self) -> Result<()> {
        if !is_address(&self.address) {
            return Err(Error::InvalidRequest(format!("invalid contract address: {}", self.address)));
        }
        Ok(())
    }

    pub fn cache_key(&self) -> String {
        fingerprint(&[
            "contract",
            &self.address.to_ascii_lowercase(),
            &self.chain_id.to_string(),
            if self.include_ml { "ml" } else { "heuristic" },
            if self.check_rug_pull { "rug" } else { "no-rug" },
        ])
    }
}

fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        // Separator keeps ("ab", "c") distinct from ("a", "bc").
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

/// `0x` followed by exactly 40 hex digits.
pub fn is_address(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|body| body.len() == 40 && body.chars().all(|c| c.is_ascii_hexdigit()))
}
