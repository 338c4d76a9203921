// In crates/risk/src/analyzers/transaction.rs

use super::Findings;
use crate::screen::AddressScreen;
use crate::types::{RiskSettings, TransactionRiskRequest};
use core_types::RiskFactor;
use num_traits::ToPrimitive;
use std::sync::Arc;

/// Minimum gas any transaction consumes on an EVM chain.
pub const INTRINSIC_GAS: u64 = 21_000;

const TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
const APPROVE: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];
const TRANSFER_FROM: [u8; 4] = [0x23, 0xb8, 0x72, 0xdd];
const SET_APPROVAL_FOR_ALL: [u8; 4] = [0xa2, 0x2c, 0xb4, 0x65];

/// Runs every transaction analyzer over `request`.
pub fn analyze(
    request: &TransactionRiskRequest,
    call_data: &[u8],
    settings: &RiskSettings,
    screens: &[Arc<dyn AddressScreen>],
) -> Findings {
    let mut findings = Findings::default();
    check_addresses(request, screens, &mut findings);
    check_value(request, settings, &mut findings);
    check_gas(request, settings, &mut findings);
    check_call_data(call_data, &mut findings);
    check_address_pattern(&request.to, &mut findings);
    findings
}

fn check_addresses(request: &TransactionRiskRequest, screens: &[Arc<dyn AddressScreen>], findings: &mut Findings) {
    if let Some(screen) = screens.iter().find(|s| s.is_malicious(&request.to)) {
        findings.push(RiskFactor::new(
            "malicious_address",
            "Destination address is on a known-malicious list",
            1.0,
            1.0,
            format!("{} flagged by {}", request.to, screen.name()),
        ));
        findings.warn(format!("Destination {} is a known malicious or burn address", request.to));
    }
    if let Some(screen) = screens.iter().find(|s| s.is_malicious(&request.from)) {
        findings.push(RiskFactor::new(
            "malicious_sender",
            "Sender address is on a known-malicious list",
            0.8,
            0.9,
            format!("{} flagged by {}", request.from, screen.name()),
        ));
    }
}

fn check_value(request: &TransactionRiskRequest, settings: &RiskSettings, findings: &mut Findings) {
    let value = request.value.to_f64().unwrap_or(f64::MAX);
    if value > settings.very_high_value_threshold {
        findings.push(RiskFactor::new(
            "high_value",
            "Transaction value is very high",
            0.8,
            0.8,
            format!("value {} exceeds {}", request.value, settings.very_high_value_threshold),
        ));
    } else if value > settings.high_value_threshold {
        findings.push(RiskFactor::new(
            "high_value",
            "Transaction value is high",
            0.5,
            0.8,
            format!("value {} exceeds {}", request.value, settings.high_value_threshold),
        ));
    }
}

fn check_gas(request: &TransactionRiskRequest, settings: &RiskSettings, findings: &mut Findings) {
    if request.gas_limit > settings.max_gas_limit {
        findings.push(RiskFactor::new(
            "high_gas_limit",
            "Gas limit is unusually high",
            0.4,
            0.5,
            format!("gas limit {} exceeds {}", request.gas_limit, settings.max_gas_limit),
        ));
    } else if request.gas_limit > 0 && request.gas_limit < INTRINSIC_GAS {
        findings.push(RiskFactor::new(
            "invalid_gas_limit",
            "Gas limit is below the intrinsic cost of a transaction",
            0.6,
            0.6,
            format!("gas limit {} below {INTRINSIC_GAS}", request.gas_limit),
        ));
    }

    let gas_price = request.gas_price.to_f64().unwrap_or(f64::MAX);
    if gas_price > settings.max_gas_price_gwei {
        findings.push(RiskFactor::new(
            "high_gas_price",
            "Gas price is unusually high",
            0.3,
            0.4,
            format!("gas price {} gwei exceeds {}", request.gas_price, settings.max_gas_price_gwei),
        ));
    }
}

fn check_call_data(data: &[u8], findings: &mut Findings) {
    if data.is_empty() {
        findings.push(RiskFactor::new(
            "simple_transfer",
            "Plain value transfer without contract interaction",
            -0.2,
            0.3,
            "no call data",
        ));
        return;
    }
    if data.len() < 4 {
        findings.push(RiskFactor::new(
            "unknown_function",
            "Call data is too short to carry a function selector",
            0.15,
            0.3,
            format!("0x{}", hex::encode(data)),
        ));
        return;
    }

    let selector: [u8; 4] = [data[0], data[1], data[2], data[3]];
    let args = &data[4..];
    match selector {
        APPROVE => {
            if is_unlimited(word(args, 1)) {
                findings.push(RiskFactor::new(
                    "unlimited_approval",
                    "Grants an unlimited token allowance",
                    0.7,
                    0.8,
                    format!("spender {}", word_address(word(args, 0))),
                ));
                findings.warn("Transaction grants an unlimited token allowance");
            } else {
                findings.push(RiskFactor::new(
                    "token_approval",
                    "Grants a token allowance",
                    0.3,
                    0.6,
                    format!("spender {}", word_address(word(args, 0))),
                ));
            }
        }
        SET_APPROVAL_FOR_ALL => {
            let approved = word(args, 1).is_some_and(|w| w.iter().any(|b| *b != 0));
            if approved {
                findings.push(RiskFactor::new(
                    "approval_for_all",
                    "Grants an operator control over every token in a collection",
                    0.6,
                    0.7,
                    format!("operator {}", word_address(word(args, 0))),
                ));
                findings.warn("Transaction approves an operator for all tokens");
            }
        }
        TRANSFER => findings.push(RiskFactor::new(
            "token_transfer",
            "ERC-20 transfer",
            0.1,
            0.3,
            format!("recipient {}", word_address(word(args, 0))),
        )),
        TRANSFER_FROM => findings.push(RiskFactor::new(
            "token_transfer_from",
            "ERC-20 transferFrom spending a third-party allowance",
            0.2,
            0.4,
            format!("owner {}", word_address(word(args, 0))),
        )),
        other => findings.push(RiskFactor::new(
            "unknown_function",
            "Call to an unrecognised function",
            0.15,
            0.3,
            format!("selector 0x{}", hex::encode(other)),
        )),
    }
}

fn check_address_pattern(address: &str, findings: &mut Findings) {
    let body = address.trim_start_matches("0x").to_ascii_lowercase();
    let longest_run = longest_repeat(&body);
    if body.contains("dead") || longest_run >= 10 {
        findings.push(RiskFactor::new(
            "suspicious_pattern",
            "Destination address has a suspicious literal pattern",
            0.6,
            0.5,
            format!("{address} (longest repeated run {longest_run})"),
        ));
    }
}

/// The `index`-th 32-byte ABI word of `args`, if present.
fn word(args: &[u8], index: usize) -> Option<&[u8]> {
    args.get(index * 32..(index + 1) * 32)
}

fn word_address(word: Option<&[u8]>) -> String {
    match word {
        Some(w) => format!("0x{}", hex::encode(&w[12..])),
        None => "<truncated>".to_string(),
    }
}

/// Treats anything with the top 16 bytes set as effectively unlimited, which
/// covers `type(uint256).max` and the common `2**255` style sentinels.
fn is_unlimited(word: Option<&[u8]>) -> bool {
    word.is_some_and(|w| w[..16].iter().all(|b| *b == 0xff) || w[0] >= 0x80)
}

fn longest_repeat(s: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous = None;
    for c in s.chars() {
        if Some(c) == previous {
            current += 1;
        } else {
            current = 1;
            previous = Some(c);
        }
        longest = longest.max(current);
    }
    longest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::StaticDenylist;
    use rust_decimal_macros::dec;

    fn request(to: &str) -> TransactionRiskRequest {
        TransactionRiskRequest {
            from: "0x5aeda56215b167893e80b4fe645ba6d5bab767de".to_string(),
            to: to.to_string(),
            value: dec!(1),
            data: None,
            chain_id: 1,
            gas_limit: INTRINSIC_GAS,
            gas_price: dec!(20),
            transaction_hash: None,
            include_ml: false,
        }
    }

    fn screens() -> Vec<Arc<dyn AddressScreen>> {
        vec![Arc::new(StaticDenylist::default())]
    }

    const PLAIN: &str = "0x8ba1f109551bd432803012645ac136ddd64dba72";

    #[test]
    fn zero_address_is_malicious_with_warning() {
        let req = request(crate::screen::ZERO_ADDRESS);
        let findings = analyze(&req, &[], &RiskSettings::default(), &screens());
        assert!(findings.has("malicious_address"));
        assert!(!findings.warnings.is_empty());
    }

    #[test]
    fn high_value_tiers() {
        let mut req = request(PLAIN);
        req.value = dec!(200);
        let findings = analyze(&req, &[], &RiskSettings::default(), &screens());
        let factor = findings.factors.iter().find(|f| f.factor_type == "high_value").unwrap();
        assert_eq!(factor.impact, 0.5);

        req.value = dec!(5000);
        let findings = analyze(&req, &[], &RiskSettings::default(), &screens());
        let factor = findings.factors.iter().find(|f| f.factor_type == "high_value").unwrap();
        assert_eq!(factor.impact, 0.8);
    }

    #[test]
    fn gas_anomalies() {
        let mut req = request(PLAIN);
        req.gas_limit = 5_000_000;
        req.gas_price = dec!(500);
        let findings = analyze(&req, &[], &RiskSettings::default(), &screens());
        assert!(findings.has("high_gas_limit"));
        assert!(findings.has("high_gas_price"));

        req.gas_limit = 10_000;
        let findings = analyze(&req, &[], &RiskSettings::default(), &screens());
        assert!(findings.has("invalid_gas_limit"));
    }

    #[test]
    fn unlimited_approve_is_distinguished_from_bounded() {
        let mut data = APPROVE.to_vec();
        data.extend_from_slice(&[0u8; 32]);
        data.extend_from_slice(&[0xff; 32]);
        let mut findings = Findings::default();
        check_call_data(&data, &mut findings);
        assert!(findings.has("unlimited_approval"));
        assert_eq!(findings.warnings.len(), 1);

        let mut bounded = APPROVE.to_vec();
        bounded.extend_from_slice(&[0u8; 32]);
        let mut amount = [0u8; 32];
        amount[31] = 100;
        bounded.extend_from_slice(&amount);
        let mut findings = Findings::default();
        check_call_data(&bounded, &mut findings);
        assert!(findings.has("token_approval"));
    }

    #[test]
    fn selectors_and_empty_data() {
        let mut findings = Findings::default();
        check_call_data(&TRANSFER, &mut findings);
        check_call_data(&[0xde, 0xad, 0xbe, 0xef], &mut findings);
        check_call_data(&[], &mut findings);
        assert!(findings.has("token_transfer"));
        assert!(findings.has("unknown_function"));
        assert!(findings.has("simple_transfer"));
    }

    #[test]
    fn repeated_characters_are_suspicious() {
        let mut findings = Findings::default();
        check_address_pattern("0x1234aaaaaaaaaaaa5678123412341234abcdabcd", &mut findings);
        assert!(findings.has("suspicious_pattern"));

        let mut findings = Findings::default();
        check_address_pattern(PLAIN, &mut findings);
        assert!(findings.factors.is_empty());
    }
}
