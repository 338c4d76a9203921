// In crates/risk/src/analyzers/contract.rs

use super::Findings;
use crate::bytecode::{self, BytecodeReport};
use crate::chain::ChainClient;
use crate::types::{ContractRiskRequest, RiskSettings};
use crate::Result;
use core_types::RiskFactor;

/// `owner()` selector.
const OWNER_SELECTOR: [u8; 4] = [0x8d, 0xa5, 0xcb, 0x5b];

/// Runs every contract analyzer. Fetching the bytecode is required and its
/// failure is returned; every other chain lookup is enrichment and only warns.
pub async fn analyze(
    request: &ContractRiskRequest,
    client: &dyn ChainClient,
    settings: &RiskSettings,
) -> Result<(Findings, Option<BytecodeReport>)> {
    let mut findings = Findings::default();
    let code = client.get_code(&request.address).await?;

    if code.is_empty() {
        findings.push(RiskFactor::new(
            "no_contract_code",
            "No contract code is deployed at this address",
            0.6,
            0.7,
            format!("{} has empty runtime code", request.address),
        ));
        findings.warn("Target address is not a contract");
        return Ok((findings, None));
    }

    check_age(request, client, settings, &mut findings).await;
    check_verification(request, client, &mut findings).await;
    check_activity(request, client, settings, &mut findings).await;

    let report = bytecode::analyze(&code);
    check_bytecode(&report, &mut findings);

    if request.check_rug_pull {
        check_rug_pull(request, client, &report, settings, &mut findings).await;
    }

    Ok((findings, Some(report)))
}

async fn check_age(
    request: &ContractRiskRequest,
    client: &dyn ChainClient,
    settings: &RiskSettings,
    findings: &mut Findings,
) {
    let deployed = match client.deployment_block(&request.address).await {
        Ok(Some(block)) => block,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(address = %request.address, error = %e, "Could not fetch deployment block; skipping age check.");
            return;
        }
    };
    let head = match client.block_number().await {
        Ok(head) => head,
        Err(e) => {
            tracing::warn!(address = %request.address, error = %e, "Could not fetch block number; skipping age check.");
            return;
        }
    };

    let age = head.saturating_sub(deployed);
    if age < settings.new_contract_blocks {
        findings.push(RiskFactor::new(
            "new_contract",
            "Contract was deployed recently",
            0.4,
            0.6,
            format!("deployed {age} blocks ago"),
        ));
    } else {
        findings.push(RiskFactor::new(
            "established_contract",
            "Contract has been deployed for a long time",
            -0.2,
            0.4,
            format!("deployed {age} blocks ago"),
        ));
    }
}

async fn check_verification(request: &ContractRiskRequest, client: &dyn ChainClient, findings: &mut Findings) {
    match client.is_verified(&request.address).await {
        Ok(Some(true)) => findings.push(RiskFactor::new(
            "verified_contract",
            "Source code is verified",
            -0.3,
            0.5,
            "verified on block explorer",
        )),
        Ok(Some(false)) => findings.push(RiskFactor::new(
            "unverified_contract",
            "Source code is not verified",
            0.4,
            0.6,
            "no verified source",
        )),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(address = %request.address, error = %e, "Verification lookup failed; skipping.");
        }
    }
}

async fn check_activity(
    request: &ContractRiskRequest,
    client: &dyn ChainClient,
    settings: &RiskSettings,
    findings: &mut Findings,
) {
    let count = match client.transaction_count(&request.address).await {
        Ok(Some(count)) => count,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(address = %request.address, error = %e, "Activity lookup failed; skipping.");
            return;
        }
    };
    if count < settings.low_activity_tx_count {
        findings.push(RiskFactor::new(
            "low_activity",
            "Contract has very few transactions",
            0.2,
            0.4,
            format!("{count} transactions"),
        ));
    } else if count > settings.high_activity_tx_count {
        findings.push(RiskFactor::new(
            "high_activity",
            "Contract is heavily used",
            -0.1,
            0.3,
            format!("{count} transactions"),
        ));
    }
}

fn check_bytecode(report: &BytecodeReport, findings: &mut Findings) {
    if report.is_proxy() {
        findings.push(RiskFactor::new(
            "proxy_contract",
            "Contract is an upgradeable or forwarding proxy",
            0.3,
            0.5,
            if report.is_minimal_proxy { "EIP-1167 minimal proxy" } else { "EIP-1967 implementation slot" },
        ));
    }
    if report.has_selfdestruct {
        findings.push(RiskFactor::new(
            "selfdestruct",
            "Contract can self-destruct",
            0.7,
            0.8,
            "SELFDESTRUCT opcode present",
        ));
        findings.warn("Contract contains SELFDESTRUCT");
    }
    if report.has_delegatecall && !report.is_proxy() {
        findings.push(RiskFactor::new(
            "delegatecall",
            "Contract delegates execution to other code",
            0.5,
            0.6,
            "DELEGATECALL opcode outside a recognised proxy pattern",
        ));
    }
    if report.has_create || report.has_create2 {
        findings.push(RiskFactor::new(
            "contract_creation",
            "Contract deploys other contracts",
            0.2,
            0.3,
            format!("CREATE: {}, CREATE2: {}", report.has_create, report.has_create2),
        ));
    }
    if report.reentrancy_risk() {
        findings.push(RiskFactor::new(
            "reentrancy_risk",
            "Storage is written after an external call",
            0.6,
            0.7,
            format!("{} external calls", report.external_calls),
        ));
    }
    if report.unchecked_arithmetic() {
        findings.push(RiskFactor::new(
            "overflow_risk",
            "Arithmetic without any bounds comparisons",
            0.3,
            0.4,
            format!("{} arithmetic ops, no comparisons", report.arithmetic_ops),
        ));
    }
    if report.unchecked_calls > 0 {
        findings.push(RiskFactor::new(
            "unchecked_call",
            "External call results are not checked",
            0.4,
            0.5,
            format!("{} unchecked calls", report.unchecked_calls),
        ));
    }
}

async fn check_rug_pull(
    request: &ContractRiskRequest,
    client: &dyn ChainClient,
    report: &BytecodeReport,
    settings: &RiskSettings,
    findings: &mut Findings,
) {
    let density = report.honeypot_density();
    if density > settings.honeypot_density_threshold {
        findings.push(RiskFactor::new(
            "honeypot_pattern",
            "Dense sender-gated revert paths typical of honeypots",
            0.6,
            0.7,
            format!("{density:.2} REVERT/CALLER per KiB"),
        ));
    }

    // Lock status lives in the DEX and locker contracts, not in this bytecode.
    findings.push(RiskFactor::new(
        "liquidity_lock_unknown",
        "Liquidity lock status could not be determined",
        0.2,
        0.3,
        "no locker data source",
    ));

    match client.call_contract(&request.address, &OWNER_SELECTOR).await {
        Ok(ret) if ret.len() >= 32 => {
            if ret[12..32].iter().all(|b| *b == 0) {
                findings.push(RiskFactor::new(
                    "renounced_ownership",
                    "Ownership has been renounced",
                    -0.2,
                    0.3,
                    "owner() returns the zero address",
                ));
            } else {
                findings.push(RiskFactor::new(
                    "centralized_ownership",
                    "Contract has an active owner",
                    0.3,
                    0.4,
                    format!("owner 0x{}", hex::encode(&ret[12..32])),
                ));
            }
        }
        Ok(_) => findings.push(RiskFactor::new(
            "ownership_unknown",
            "Ownership concentration could not be determined",
            0.1,
            0.2,
            "owner() not implemented",
        )),
        Err(e) => {
            tracing::warn!(address = %request.address, error = %e, "owner() probe failed; ownership unknown.");
            findings.push(RiskFactor::new(
                "ownership_unknown",
                "Ownership concentration could not be determined",
                0.1,
                0.2,
                "owner() call failed",
            ));
        }
    }

    let mints = report.mint_signatures();
    if !mints.is_empty() {
        findings.push(RiskFactor::new(
            "hidden_mint",
            "Contract exposes supply-minting functions",
            0.6,
            0.7,
            mints.join(", "),
        ));
        findings.warn("Token supply can be minted after launch");
    }
}
