//! Contract with the external fuzzy matcher.
//!
//! The collaborator only ever sees a minimized projection of the leftover
//! pools and answers with proposals. Nothing it says is trusted: ids are
//! re-hydrated against the authoritative pools and sums are recomputed
//! before a proposal can become a group.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::model::{amounts_match, day_delta, total, MatchGroup, MatchKind, Source, Transaction, TxId};

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyItem {
    pub id: TxId,
    pub date: NaiveDate,
    pub label: String,
    pub amount: Decimal,
}

impl From<&Transaction> for FuzzyItem {
    fn from(t: &Transaction) -> Self {
        Self {
            id: t.id,
            date: t.date,
            label: t.label.clone(),
            amount: t.amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyRequest {
    pub bank: Vec<FuzzyItem>,
    pub accounting: Vec<FuzzyItem>,
}

impl FuzzyRequest {
    pub fn from_pools(bank: &[Transaction], accounting: &[Transaction]) -> Self {
        Self {
            bank: bank.iter().map(FuzzyItem::from).collect(),
            accounting: accounting.iter().map(FuzzyItem::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalKind {
    Grouped,
    Fuzzy,
}

impl From<ProposalKind> for MatchKind {
    fn from(kind: ProposalKind) -> Self {
        match kind {
            ProposalKind::Grouped => MatchKind::Grouped,
            ProposalKind::Fuzzy => MatchKind::Fuzzy,
        }
    }
}

/// One proposal as returned by the collaborator. Ids stay textual until
/// validation so a single bad id only discards its own proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuzzyProposal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_id: Option<String>,
    pub accounting_ids: Vec<String>,
    #[serde(rename = "type")]
    pub kind: ProposalKind,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Parse the collaborator's JSON answer (an array of proposals).
pub fn parse_proposals(json: &str) -> Result<Vec<FuzzyProposal>, CollaboratorError> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed).map_err(|e| CollaboratorError::Malformed(e.to_string()))
}

pub trait FuzzyMatcher {
    fn propose(&self, request: &FuzzyRequest) -> Result<Vec<FuzzyProposal>, CollaboratorError>;
}

/// Replays a fixed answer. Used for pre-computed proposal files and tests.
#[derive(Debug, Clone)]
pub struct StaticMatcher(pub Result<Vec<FuzzyProposal>, CollaboratorError>);

impl FuzzyMatcher for StaticMatcher {
    fn propose(&self, _request: &FuzzyRequest) -> Result<Vec<FuzzyProposal>, CollaboratorError> {
        self.0.clone()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    /// Position of the proposal in the collaborator's answer.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidatedProposals {
    pub accepted: Vec<MatchGroup>,
    pub rejected: Vec<Rejection>,
}

/// Check proposals against the current pools. A proposal is accepted only
/// if every id is currently unmatched, no id is claimed twice (within the
/// proposal or by an earlier accepted one) and the recomputed sums balance.
pub fn validate_proposals(
    proposals: &[FuzzyProposal],
    bank_pool: &[Transaction],
    accounting_pool: &[Transaction],
) -> ValidatedProposals {
    let mut out = ValidatedProposals::default();
    let mut claimed: BTreeSet<TxId> = BTreeSet::new();

    for (index, proposal) in proposals.iter().enumerate() {
        match hydrate(proposal, bank_pool, accounting_pool, &claimed) {
            Ok(group) => {
                claimed.extend(group.member_ids());
                out.accepted.push(group);
            }
            Err(reason) => {
                log::warn!("fuzzy proposal #{index} rejected: {reason}");
                out.rejected.push(Rejection { index, reason });
            }
        }
    }

    out
}

fn hydrate(
    proposal: &FuzzyProposal,
    bank_pool: &[Transaction],
    accounting_pool: &[Transaction],
    claimed: &BTreeSet<TxId>,
) -> Result<MatchGroup, String> {
    if !proposal.confidence.is_finite() || !(0.0..=1.0).contains(&proposal.confidence) {
        return Err(format!("confidence {} outside [0, 1]", proposal.confidence));
    }
    if proposal.accounting_ids.is_empty() {
        return Err("no accounting ids".into());
    }

    let mut seen = BTreeSet::new();
    let mut lookup = |raw: &str, source: Source, pool: &[Transaction]| -> Result<Transaction, String> {
        let id: TxId = raw.parse().map_err(|_| format!("unknown id '{raw}'"))?;
        if id.source != source {
            return Err(format!("id '{raw}' is on the wrong side"));
        }
        if claimed.contains(&id) || !seen.insert(id) {
            return Err(format!("id '{raw}' claimed twice"));
        }
        pool.iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| format!("id '{raw}' is not unmatched"))
    };

    let bank_items = match proposal.bank_id.as_deref() {
        Some(raw) => vec![lookup(raw, Source::Bank, bank_pool)?],
        None => Vec::new(),
    };
    let accounting_items = proposal
        .accounting_ids
        .iter()
        .map(|raw| lookup(raw, Source::Accounting, accounting_pool))
        .collect::<Result<Vec<_>, _>>()?;

    let bank_total = total(&bank_items);
    let accounting_total = total(&accounting_items);
    if !amounts_match(bank_total, accounting_total) {
        return Err(format!(
            "sums differ: bank {bank_total} vs accounting {accounting_total}"
        ));
    }

    let delta = match (bank_items.first(), accounting_items.first()) {
        (Some(b), Some(a)) => day_delta(b.date, a.date),
        _ => 0,
    };
    let mut group = MatchGroup::new(
        proposal.kind.into(),
        bank_items,
        accounting_items,
        u32::try_from(delta).unwrap_or(u32::MAX),
    )
    .with_confidence(proposal.confidence);
    if let Some(reasoning) = &proposal.reasoning {
        group = group.with_reasoning(reasoning.clone());
    }
    Ok(group)
}
