//! Session ledger: the only owner of reconciliation state.
//!
//! Every operation validates first and mutates second, so a failed
//! operation leaves the ledger exactly as it was. Transactions move between
//! the unmatched pools, match groups and the exclusion set; the records
//! themselves are never modified.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::MatchSettings;
use crate::error::{CollaboratorError, ReconError};
use crate::evidence::compute_summary;
use crate::fuzzy::{validate_proposals, FuzzyMatcher, FuzzyProposal, FuzzyRequest, Rejection};
use crate::matcher::run_passes;
use crate::model::{
    amounts_match, total, GroupId, LedgerSnapshot, MatchGroup, MatchKind, Source, Transaction, TxId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run went through (possibly with zero groups on an initial run).
    Completed,
    /// Incremental run that found nothing new.
    NoNewMatches,
    /// Not started: a fuzzy-matcher call is outstanding.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub new_groups: usize,
    pub unmatched_bank: usize,
    pub unmatched_accounting: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionTotals {
    pub bank_total: Decimal,
    pub accounting_total: Decimal,
    pub bank_count: usize,
    pub accounting_count: usize,
    pub balanced: bool,
}

/// Handle for an outstanding fuzzy-matcher call.
#[derive(Debug)]
pub struct FuzzyTicket {
    id: u64,
    pub request: FuzzyRequest,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FuzzyReport {
    pub accepted: Vec<GroupId>,
    pub rejected: Vec<Rejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionLedger {
    /// Most recent first.
    matches: Vec<MatchGroup>,
    /// Kept sorted by (date, id).
    unmatched_bank: Vec<Transaction>,
    unmatched_accounting: Vec<Transaction>,
    excluded: BTreeSet<TxId>,
    selected: BTreeSet<TxId>,
    pending_fuzzy: Option<u64>,
    tickets_issued: u64,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn matches(&self) -> &[MatchGroup] {
        &self.matches
    }

    pub fn group(&self, id: GroupId) -> Option<&MatchGroup> {
        self.matches.iter().find(|g| g.id == id)
    }

    pub fn unmatched_bank(&self) -> &[Transaction] {
        &self.unmatched_bank
    }

    pub fn unmatched_accounting(&self) -> &[Transaction] {
        &self.unmatched_accounting
    }

    pub fn excluded(&self) -> &BTreeSet<TxId> {
        &self.excluded
    }

    pub fn selected(&self) -> &BTreeSet<TxId> {
        &self.selected
    }

    pub fn fuzzy_pending(&self) -> bool {
        self.pending_fuzzy.is_some()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            matches: self.matches.iter().map(MatchGroup::view).collect(),
            unmatched_bank: self.unmatched_bank.clone(),
            unmatched_accounting: self.unmatched_accounting.clone(),
            summary: compute_summary(
                &self.matches,
                &self.unmatched_bank,
                &self.unmatched_accounting,
                self.excluded.len(),
            ),
        }
    }

    // -----------------------------------------------------------------------
    // Automatic passes
    // -----------------------------------------------------------------------

    /// Start over from freshly normalized transactions. Excluded ids stay
    /// excluded; history and selection are discarded.
    pub fn run(
        &mut self,
        bank: Vec<Transaction>,
        accounting: Vec<Transaction>,
        settings: &MatchSettings,
    ) -> RunReport {
        if self.pending_fuzzy.is_some() {
            return self.deferred();
        }

        let keep = |t: &Transaction| !self.excluded.contains(&t.id);
        let bank: Vec<_> = bank.into_iter().filter(keep).collect();
        let accounting: Vec<_> = accounting.into_iter().filter(keep).collect();

        let outcome = run_passes(bank, accounting, settings);
        let new_groups = outcome.groups.len();

        self.matches = outcome.groups.into_iter().rev().collect();
        self.unmatched_bank = outcome.unmatched_bank;
        self.unmatched_accounting = outcome.unmatched_accounting;
        self.selected.clear();

        log::info!(
            "run: {new_groups} group(s), {} bank / {} books unmatched",
            self.unmatched_bank.len(),
            self.unmatched_accounting.len()
        );
        self.report(RunStatus::Completed, new_groups)
    }

    /// Re-run the passes over whatever is still unmatched.
    ///
    /// A later pass can consume a candidate that kept an earlier pass's
    /// bucket from balancing, so the passes repeat over the leftovers until
    /// a round finds nothing. A second call with the same settings is then
    /// always `NoNewMatches`.
    pub fn incremental_run(&mut self, settings: &MatchSettings) -> RunReport {
        if self.pending_fuzzy.is_some() {
            return self.deferred();
        }

        let mut bank = self.unmatched_bank.clone();
        let mut accounting = self.unmatched_accounting.clone();
        let mut found = Vec::new();
        loop {
            let outcome = run_passes(bank, accounting, settings);
            bank = outcome.unmatched_bank;
            accounting = outcome.unmatched_accounting;
            if outcome.groups.is_empty() {
                break;
            }
            found.extend(outcome.groups);
        }

        let new_groups = found.len();
        if new_groups == 0 {
            log::info!("incremental run: no new matches");
            return self.report(RunStatus::NoNewMatches, 0);
        }

        self.unmatched_bank = bank;
        self.unmatched_accounting = accounting;
        for group in found {
            self.matches.insert(0, group);
        }
        self.prune_selection();

        log::info!("incremental run: {new_groups} new group(s)");
        self.report(RunStatus::Completed, new_groups)
    }

    fn report(&self, status: RunStatus, new_groups: usize) -> RunReport {
        RunReport {
            status,
            new_groups,
            unmatched_bank: self.unmatched_bank.len(),
            unmatched_accounting: self.unmatched_accounting.len(),
        }
    }

    fn deferred(&self) -> RunReport {
        log::info!("automatic pass deferred: fuzzy matcher call outstanding");
        self.report(RunStatus::Deferred, 0)
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    fn is_unmatched(&self, id: TxId) -> bool {
        self.pool(id.source).iter().any(|t| t.id == id)
    }

    fn pool(&self, source: Source) -> &Vec<Transaction> {
        match source {
            Source::Bank => &self.unmatched_bank,
            Source::Accounting => &self.unmatched_accounting,
        }
    }

    pub fn select(&mut self, id: TxId) -> Result<(), ReconError> {
        if !self.is_unmatched(id) {
            return Err(ReconError::UnknownTransaction(id.to_string()));
        }
        self.selected.insert(id);
        Ok(())
    }

    pub fn deselect(&mut self, id: TxId) -> bool {
        self.selected.remove(&id)
    }

    /// Flip membership; returns whether the id is selected afterwards.
    pub fn toggle(&mut self, id: TxId) -> Result<bool, ReconError> {
        if self.deselect(id) {
            return Ok(false);
        }
        self.select(id)?;
        Ok(true)
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    fn prune_selection(&mut self) {
        let stale: Vec<TxId> = self
            .selected
            .iter()
            .copied()
            .filter(|id| !self.is_unmatched(*id))
            .collect();
        for id in stale {
            self.selected.remove(&id);
        }
    }

    fn selected_items(&self, source: Source) -> Vec<Transaction> {
        self.pool(source)
            .iter()
            .filter(|t| self.selected.contains(&t.id))
            .cloned()
            .collect()
    }

    pub fn selection_totals(&self) -> SelectionTotals {
        let bank = self.selected_items(Source::Bank);
        let accounting = self.selected_items(Source::Accounting);
        let bank_total = total(&bank);
        let accounting_total = total(&accounting);
        SelectionTotals {
            bank_total,
            accounting_total,
            bank_count: bank.len(),
            accounting_count: accounting.len(),
            balanced: amounts_match(bank_total, accounting_total),
        }
    }

    // -----------------------------------------------------------------------
    // Manual operations
    // -----------------------------------------------------------------------

    /// Match the current selection as one MANUAL group.
    pub fn manual_match(&mut self) -> Result<GroupId, ReconError> {
        let bank = self.selected_items(Source::Bank);
        let accounting = self.selected_items(Source::Accounting);

        if accounting.is_empty() {
            return Err(ReconError::Validation(
                "select at least one accounting line".into(),
            ));
        }
        let totals = self.selection_totals();
        if !totals.balanced {
            return Err(ReconError::Unbalanced {
                bank: totals.bank_total,
                accounting: totals.accounting_total,
            });
        }

        let reasoning = format!(
            "manual: {} bank / {} books line(s), total {}",
            bank.len(),
            accounting.len(),
            totals.accounting_total
        );
        let group = MatchGroup::new(MatchKind::Manual, bank, accounting, 0).with_reasoning(reasoning);
        let id = group.id;

        self.remove_from_pools(group.member_ids().collect::<Vec<_>>().as_slice());
        self.matches.insert(0, group);
        self.selected.clear();

        log::debug!("manual match {id}");
        Ok(id)
    }

    /// Exclude every selected line for the rest of the session.
    pub fn ignore(&mut self) -> usize {
        let ids: Vec<TxId> = std::mem::take(&mut self.selected).into_iter().collect();
        self.remove_from_pools(&ids);
        self.excluded.extend(ids.iter().copied());
        log::debug!("ignored {} line(s)", ids.len());
        ids.len()
    }

    /// Dissolve a group and return its members to their pools.
    pub fn unmatch(&mut self, id: GroupId) -> Result<(), ReconError> {
        let index = self
            .matches
            .iter()
            .position(|g| g.id == id)
            .ok_or_else(|| ReconError::UnknownGroup(id.to_string()))?;
        let group = self.matches.remove(index);

        self.unmatched_bank.extend(group.bank_items);
        self.unmatched_accounting.extend(group.accounting_items);
        self.unmatched_bank.sort_by_key(Transaction::sort_key);
        self.unmatched_accounting.sort_by_key(Transaction::sort_key);

        log::debug!("unmatched {id}");
        Ok(())
    }

    fn remove_from_pools(&mut self, ids: &[TxId]) {
        self.unmatched_bank.retain(|t| !ids.contains(&t.id));
        self.unmatched_accounting.retain(|t| !ids.contains(&t.id));
    }

    // -----------------------------------------------------------------------
    // Fuzzy matcher
    // -----------------------------------------------------------------------

    /// Hand out the leftover pools for an external call. Returns `None` when
    /// a call is already outstanding or either pool is empty.
    pub fn begin_fuzzy(&mut self) -> Option<FuzzyTicket> {
        if self.pending_fuzzy.is_some()
            || self.unmatched_bank.is_empty()
            || self.unmatched_accounting.is_empty()
        {
            return None;
        }
        self.tickets_issued += 1;
        self.pending_fuzzy = Some(self.tickets_issued);
        Some(FuzzyTicket {
            id: self.tickets_issued,
            request: FuzzyRequest::from_pools(&self.unmatched_bank, &self.unmatched_accounting),
        })
    }

    /// Merge the collaborator's answer. Proposals are checked against the
    /// pools as they are now, not as they were when the call started.
    pub fn complete_fuzzy(
        &mut self,
        ticket: FuzzyTicket,
        answer: Result<Vec<FuzzyProposal>, CollaboratorError>,
    ) -> FuzzyReport {
        if self.pending_fuzzy != Some(ticket.id) {
            log::warn!("ignoring answer for stale fuzzy ticket {}", ticket.id);
            return FuzzyReport {
                error: Some("stale fuzzy ticket".into()),
                ..FuzzyReport::default()
            };
        }
        self.pending_fuzzy = None;

        let proposals = match answer {
            Ok(p) => p,
            Err(e) => {
                log::warn!("{e}; continuing without fuzzy matches");
                return FuzzyReport {
                    error: Some(e.to_string()),
                    ..FuzzyReport::default()
                };
            }
        };

        let validated = validate_proposals(&proposals, &self.unmatched_bank, &self.unmatched_accounting);
        let mut report = FuzzyReport {
            rejected: validated.rejected,
            ..FuzzyReport::default()
        };
        for group in validated.accepted {
            let members: Vec<TxId> = group.member_ids().collect();
            self.remove_from_pools(&members);
            for id in &members {
                self.selected.remove(id);
            }
            report.accepted.push(group.id);
            self.matches.insert(0, group);
        }

        log::info!(
            "fuzzy matcher: {} accepted, {} rejected",
            report.accepted.len(),
            report.rejected.len()
        );
        report
    }

    /// Abandon an outstanding call. The ledger is left as it was.
    pub fn cancel_fuzzy(&mut self, ticket: FuzzyTicket) {
        if self.pending_fuzzy == Some(ticket.id) {
            self.pending_fuzzy = None;
        }
    }

    /// Blocking convenience: begin, ask, complete.
    pub fn consult_fuzzy(&mut self, matcher: &dyn FuzzyMatcher) -> FuzzyReport {
        let Some(ticket) = self.begin_fuzzy() else {
            return FuzzyReport::default();
        };
        let answer = matcher.propose(&ticket.request);
        self.complete_fuzzy(ticket, answer)
    }

    // -----------------------------------------------------------------------
    // Invariants
    // -----------------------------------------------------------------------

    /// Every id lives in exactly one place and every group balances.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen: BTreeSet<TxId> = BTreeSet::new();
        let mut claim = |id: TxId, place: &str| {
            if seen.insert(id) {
                Ok(())
            } else {
                Err(format!("{id} appears twice (second time in {place})"))
            }
        };

        for t in &self.unmatched_bank {
            if t.source != Source::Bank {
                return Err(format!("{} is in the bank pool", t.id));
            }
            claim(t.id, "bank pool")?;
        }
        for t in &self.unmatched_accounting {
            if t.source != Source::Accounting {
                return Err(format!("{} is in the accounting pool", t.id));
            }
            claim(t.id, "accounting pool")?;
        }
        for g in &self.matches {
            if g.accounting_items.is_empty() {
                return Err(format!("{} has no accounting items", g.id));
            }
            if !g.is_balanced() {
                return Err(format!("{} is off by {}", g.id, g.difference()));
            }
            for id in g.member_ids() {
                claim(id, "a match group")?;
            }
        }
        for id in &self.excluded {
            claim(*id, "the exclusion set")?;
        }
        Ok(())
    }
}
