//! Commission split calculator.
//!
//! Decides whether a client payment routes a commission to exactly one
//! host's connected payment account. The evaluation itself is pure; the
//! async entry point only adds the repository reads. A legitimate "no
//! split" is kept distinct from a data-fetch failure so the checkout
//! caller can tell the two apart.

use crate::db::{self, Pool};
use crate::model::{HostAssignment, HostProfile};
use anyhow::{Context, Result};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{info, instrument};

/// Applied when an assignment carries no usable rate of its own.
pub const DEFAULT_COMMISSION_RATE: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NoSplitReason {
    #[error("no kiosks attached to the payment")]
    NoKiosks,
    #[error("payment amount is not positive")]
    NonPositiveAmount,
    #[error("no active host assignments for the kiosks")]
    NoActiveAssignments,
    #[error("no payable host among the assignments")]
    NoPayableHost,
    #[error("kiosks resolve to multiple payable hosts")]
    MultiplePayableHosts,
    #[error("the payable host does not cover every kiosk")]
    PartialCoverage,
    #[error("computed platform fee is negative")]
    NegativePlatformFee,
}

/// Everything the payment layer needs to issue a connected-account charge.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitConfig {
    pub destination_account: String,
    pub host_commission_amount: i64,
    pub application_fee_amount: i64,
    pub commission_rate: f64,
    pub metadata: BTreeMap<String, String>,
}

impl SplitConfig {
    /// Processor call shape: destination transfer plus application fee.
    pub fn transfer_params(&self) -> serde_json::Value {
        json!({
            "transfer_data": { "destination": self.destination_account },
            "application_fee_amount": self.application_fee_amount,
            "metadata": self.metadata,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SplitDecision {
    Split(SplitConfig),
    NoSplit(NoSplitReason),
}

impl SplitDecision {
    pub fn is_split(&self) -> bool {
        matches!(self, SplitDecision::Split(_))
    }
}

/// Clamp a commission percentage into [0,100]; non-finite values fall back
/// to the supplied default.
pub fn clamp_rate(rate: f64, default_rate: f64) -> f64 {
    if !rate.is_finite() {
        return clamp_rate(default_rate, DEFAULT_COMMISSION_RATE);
    }
    rate.clamp(0.0, 100.0)
}

/// Pure split evaluation over already-fetched rows.
pub fn evaluate(
    amount: i64,
    kiosk_ids: &[String],
    assignments: &[HostAssignment],
    profiles: &[HostProfile],
    default_rate: f64,
    metadata: &BTreeMap<String, String>,
) -> SplitDecision {
    if amount <= 0 {
        return SplitDecision::NoSplit(NoSplitReason::NonPositiveAmount);
    }
    let requested: BTreeSet<&str> = kiosk_ids.iter().map(String::as_str).collect();
    if requested.is_empty() {
        return SplitDecision::NoSplit(NoSplitReason::NoKiosks);
    }
    if assignments.is_empty() {
        return SplitDecision::NoSplit(NoSplitReason::NoActiveAssignments);
    }

    let profile_by_id: BTreeMap<&str, &HostProfile> =
        profiles.iter().map(|p| (p.id.as_str(), p)).collect();

    // Distinct payable hosts referenced by the assignments.
    let payable_hosts: BTreeSet<&str> = assignments
        .iter()
        .filter(|a| {
            profile_by_id
                .get(a.host_id.as_str())
                .is_some_and(|p| p.is_payable())
        })
        .map(|a| a.host_id.as_str())
        .collect();
    let host_id = match payable_hosts.len() {
        0 => return SplitDecision::NoSplit(NoSplitReason::NoPayableHost),
        1 => *payable_hosts.iter().next().unwrap_or(&""),
        _ => return SplitDecision::NoSplit(NoSplitReason::MultiplePayableHosts),
    };

    // The single payable host must cover every requested kiosk; a payment
    // spanning foreign or unassigned kiosks stays full-platform.
    let host_assignments: Vec<&HostAssignment> = assignments
        .iter()
        .filter(|a| a.host_id == host_id)
        .collect();
    let covered: BTreeSet<&str> = host_assignments
        .iter()
        .map(|a| a.kiosk_id.as_str())
        .collect();
    if !requested.is_subset(&covered) {
        return SplitDecision::NoSplit(NoSplitReason::PartialCoverage);
    }

    let raw_rate = host_assignments
        .iter()
        .find_map(|a| a.commission_rate)
        .unwrap_or(default_rate);
    let rate = clamp_rate(raw_rate, default_rate);

    let host_commission_amount = (amount as f64 * rate / 100.0).round() as i64;
    let platform_fee_amount = amount - host_commission_amount;
    if platform_fee_amount < 0 {
        // Guarded even though the clamp makes it unreachable.
        return SplitDecision::NoSplit(NoSplitReason::NegativePlatformFee);
    }

    let destination = profile_by_id
        .get(host_id)
        .and_then(|p| p.stripe_account_id.clone())
        .unwrap_or_default();

    let mut merged = metadata.clone();
    merged.insert("split_enabled".into(), "true".into());
    merged.insert("commission_rate".into(), format!("{:.2}", rate));
    merged.insert(
        "host_commission_amount".into(),
        host_commission_amount.to_string(),
    );
    merged.insert(
        "platform_fee_amount".into(),
        platform_fee_amount.to_string(),
    );
    merged.insert("host_account_id".into(), destination.clone());

    SplitDecision::Split(SplitConfig {
        destination_account: destination,
        host_commission_amount,
        application_fee_amount: platform_fee_amount,
        commission_rate: rate,
        metadata: merged,
    })
}

/// Fetch the assignment and profile rows for the payment's kiosks and run
/// the evaluation. Returns `Err` only on repository failures; callers decide
/// whether to degrade to full-platform processing.
#[instrument(skip_all, fields(amount = amount))]
pub async fn determine(
    pool: &Pool,
    amount: i64,
    kiosk_ids: &[String],
    default_rate: f64,
    metadata: &BTreeMap<String, String>,
) -> Result<SplitDecision> {
    // Degenerate inputs never touch the database.
    if amount <= 0 {
        return Ok(SplitDecision::NoSplit(NoSplitReason::NonPositiveAmount));
    }
    if kiosk_ids.is_empty() {
        return Ok(SplitDecision::NoSplit(NoSplitReason::NoKiosks));
    }

    let unique: Vec<String> = kiosk_ids
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let assignments = db::active_assignments_for_kiosks(pool, &unique)
        .await
        .context("failed to load host assignments")?;
    let host_ids: Vec<String> = assignments
        .iter()
        .map(|a| a.host_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let profiles = db::host_profiles(pool, &host_ids)
        .await
        .context("failed to load host profiles")?;

    let decision = evaluate(amount, &unique, &assignments, &profiles, default_rate, metadata);
    match &decision {
        SplitDecision::Split(cfg) => info!(
            destination = %cfg.destination_account,
            commission = cfg.host_commission_amount,
            fee = cfg.application_fee_amount,
            "commission split computed"
        ),
        SplitDecision::NoSplit(reason) => info!(%reason, "payment stays full-platform"),
    }
    Ok(decision)
}
