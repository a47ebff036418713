//! Deterministic matching passes.
//!
//! The pipeline is a pure function of the two pools and the settings. Both
//! pools are sorted by (date, id) first, then each pass moves the items it
//! pairs out of the working pools and into a new [`MatchGroup`], so a later
//! pass never sees an item an earlier one consumed.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::config::MatchSettings;
use crate::model::{amounts_match, day_delta, sum_amounts, MatchGroup, MatchKind, Transaction};

/// Fixed window of the label heuristic, independent of `day_tolerance`.
pub const HEURISTIC_WINDOW_DAYS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Pass 0: transfer-receipt / own-transfer label pairing.
    Heuristic,
    /// Pass 1: one bank line ↔ one books line, same amount.
    Exact,
    /// Pass 2: one bank line ↔ same-day books lines summing to it.
    Grouped,
}

impl Pass {
    pub const PIPELINE: [Pass; 3] = [Pass::Heuristic, Pass::Exact, Pass::Grouped];
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    /// New groups, in the order they were found.
    pub groups: Vec<MatchGroup>,
    pub unmatched_bank: Vec<Transaction>,
    pub unmatched_accounting: Vec<Transaction>,
}

/// Run the whole pipeline over working copies of the pools.
pub fn run_passes(
    bank: Vec<Transaction>,
    accounting: Vec<Transaction>,
    settings: &MatchSettings,
) -> MatchOutcome {
    run_selected(&Pass::PIPELINE, bank, accounting, settings)
}

/// Run a single pass. Same ordering rules as the full pipeline.
pub fn run_pass(
    pass: Pass,
    bank: Vec<Transaction>,
    accounting: Vec<Transaction>,
    settings: &MatchSettings,
) -> MatchOutcome {
    run_selected(&[pass], bank, accounting, settings)
}

fn run_selected(
    passes: &[Pass],
    mut bank: Vec<Transaction>,
    mut accounting: Vec<Transaction>,
    settings: &MatchSettings,
) -> MatchOutcome {
    bank.sort_by_key(Transaction::sort_key);
    accounting.sort_by_key(Transaction::sort_key);

    let mut pools = WorkingPools { bank, accounting };
    let mut groups = Vec::new();

    for pass in passes {
        let before = groups.len();
        match pass {
            Pass::Heuristic => pools.sweep(&mut groups, heuristic_match),
            Pass::Exact => pools.sweep(&mut groups, |b, acc| exact_match(b, acc, settings)),
            Pass::Grouped => pools.sweep(&mut groups, |b, acc| grouped_match(b, acc, settings)),
        }
        log::debug!("{pass:?} pass: {} group(s)", groups.len() - before);
    }

    MatchOutcome {
        groups,
        unmatched_bank: pools.bank,
        unmatched_accounting: pools.accounting,
    }
}

// ---------------------------------------------------------------------------
// Working pools
// ---------------------------------------------------------------------------

/// What a pass found for one bank line: the accounting positions to move
/// into the group, and how to label it.
struct Found {
    kind: MatchKind,
    accounting: Vec<usize>,
    reasoning: String,
}

struct WorkingPools {
    bank: Vec<Transaction>,
    accounting: Vec<Transaction>,
}

impl WorkingPools {
    /// Offer every remaining bank line to `find`, in pool order. Matched
    /// lines leave the pools; the rest go back in their original order.
    fn sweep<F>(&mut self, groups: &mut Vec<MatchGroup>, mut find: F)
    where
        F: FnMut(&Transaction, &[Transaction]) -> Option<Found>,
    {
        let bank = std::mem::take(&mut self.bank);
        for b in bank {
            let Some(found) = find(&b, &self.accounting) else {
                self.bank.push(b);
                continue;
            };

            let accounting = take_positions(&mut self.accounting, &found.accounting);
            let delta = accounting.first().map(|a| day_delta(b.date, a.date)).unwrap_or(0);
            let group = MatchGroup::new(found.kind, vec![b], accounting, clamp_days(delta))
                .with_reasoning(found.reasoning);
            log::debug!("{} {} ({})", group.kind, group.id, group.reasoning.as_deref().unwrap_or(""));
            groups.push(group);
        }
    }
}

/// Remove the given positions from `pool`, returning them in pool order.
fn take_positions(pool: &mut Vec<Transaction>, positions: &[usize]) -> Vec<Transaction> {
    let mut taken = Vec::with_capacity(positions.len());
    let mut kept = Vec::with_capacity(pool.len().saturating_sub(positions.len()));
    for (i, t) in std::mem::take(pool).into_iter().enumerate() {
        if positions.contains(&i) {
            taken.push(t);
        } else {
            kept.push(t);
        }
    }
    *pool = kept;
    taken
}

fn clamp_days(days: i64) -> u32 {
    u32::try_from(days).unwrap_or(u32::MAX)
}

/// First date bucket (ascending) of `candidates` whose sum equals `target`.
fn first_balanced_bucket(
    target: Decimal,
    candidates: &[usize],
    accounting: &[Transaction],
) -> Option<(NaiveDate, Vec<usize>)> {
    let mut buckets: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for &i in candidates {
        buckets.entry(accounting[i].date).or_default().push(i);
    }

    buckets.into_iter().find(|(_, bucket)| {
        let sum = sum_amounts(bucket.iter().map(|&i| accounting[i].amount));
        amounts_match(sum, target)
    })
}

fn bucket_reasoning(pass: &str, b: &Transaction, date: NaiveDate, bucket: &[usize]) -> String {
    format!(
        "{pass}: {} books lines dated {date} sum to {} ({} day(s) from bank line)",
        bucket.len(),
        b.amount,
        day_delta(b.date, date)
    )
}

// ---------------------------------------------------------------------------
// Pass 0: label heuristic
// ---------------------------------------------------------------------------

fn is_transfer_receipt(upper: &str) -> bool {
    upper.contains("EVI") || upper.contains("REMISE")
}

fn is_own_transfer(upper: &str) -> bool {
    upper.contains("NOTRE VIREMENT")
}

/// Only bank lines carrying a marker are considered. A marker present on the
/// books side alone is not picked up here.
fn heuristic_match(b: &Transaction, accounting: &[Transaction]) -> Option<Found> {
    let bank_label = b.label.to_uppercase();
    let bank_receipt = is_transfer_receipt(&bank_label);
    let bank_own = is_own_transfer(&bank_label);
    if !bank_receipt && !bank_own {
        return None;
    }

    let candidates: Vec<usize> = accounting
        .iter()
        .enumerate()
        .filter(|(_, a)| {
            let label = a.label.to_uppercase();
            let compatible =
                (bank_receipt && is_own_transfer(&label)) || (bank_own && is_transfer_receipt(&label));
            compatible && day_delta(b.date, a.date) <= HEURISTIC_WINDOW_DAYS
        })
        .map(|(i, _)| i)
        .collect();

    if let Some(&i) = candidates
        .iter()
        .find(|&&i| amounts_match(accounting[i].amount, b.amount))
    {
        return Some(Found {
            kind: MatchKind::Heuristic,
            accounting: vec![i],
            reasoning: format!(
                "label heuristic: bank '{}' pairs with books '{}', amount {}",
                b.label, accounting[i].label, b.amount
            ),
        });
    }

    if candidates.len() < 2 {
        return None;
    }
    let (date, bucket) = first_balanced_bucket(b.amount, &candidates, accounting)?;
    Some(Found {
        kind: MatchKind::Grouped,
        reasoning: bucket_reasoning("label heuristic", b, date, &bucket),
        accounting: bucket,
    })
}

// ---------------------------------------------------------------------------
// Pass 1: exact one-to-one
// ---------------------------------------------------------------------------

/// Greedy: the first books line in pool order wins, even if a later one is
/// closer in date.
fn exact_match(b: &Transaction, accounting: &[Transaction], settings: &MatchSettings) -> Option<Found> {
    let tolerance = settings.effective_day_tolerance();
    let i = accounting.iter().position(|a| {
        amounts_match(a.amount, b.amount) && day_delta(b.date, a.date) <= tolerance
    })?;
    Some(Found {
        kind: MatchKind::Exact,
        accounting: vec![i],
        reasoning: format!(
            "same amount {}, {} day(s) apart (tolerance {tolerance})",
            b.amount,
            day_delta(b.date, accounting[i].date)
        ),
    })
}

// ---------------------------------------------------------------------------
// Pass 2: grouped one-to-many
// ---------------------------------------------------------------------------

fn grouped_match(b: &Transaction, accounting: &[Transaction], settings: &MatchSettings) -> Option<Found> {
    let tolerance = settings.effective_day_tolerance();
    let candidates: Vec<usize> = accounting
        .iter()
        .enumerate()
        .filter(|(_, a)| day_delta(b.date, a.date) <= tolerance)
        .map(|(i, _)| i)
        .collect();
    if candidates.len() < 2 {
        return None;
    }

    let (date, bucket) = first_balanced_bucket(b.amount, &candidates, accounting)?;
    Some(Found {
        kind: MatchKind::Grouped,
        reasoning: bucket_reasoning("grouped", b, date, &bucket),
        accounting: bucket,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Source, TxId};
    use crate::test_support::{bank, books};

    fn settings(days: i64) -> MatchSettings {
        MatchSettings::default().with_day_tolerance(days)
    }

    fn ids(items: &[Transaction]) -> Vec<String> {
        items.iter().map(|t| t.id.to_string()).collect()
    }

    #[test]
    fn exact_same_day() {
        let out = run_passes(
            vec![bank(0, "2024-01-10", "100.00", "CB")],
            vec![books(0, "2024-01-10", "100.00", "Achat")],
            &settings(3),
        );
        assert_eq!(out.groups.len(), 1);
        assert_eq!(out.groups[0].kind, MatchKind::Exact);
        assert_eq!(out.groups[0].delta_days, 0);
        assert!(out.unmatched_bank.is_empty());
        assert!(out.unmatched_accounting.is_empty());
    }

    #[test]
    fn grouped_same_day_bucket() {
        let out = run_passes(
            vec![bank(0, "2024-01-10", "150.00", "REM CHQ")],
            vec![
                books(0, "2024-01-10", "90.00", "Client A"),
                books(1, "2024-01-10", "60.00", "Client B"),
            ],
            &settings(3),
        );
        assert_eq!(out.groups.len(), 1);
        let g = &out.groups[0];
        assert_eq!(g.kind, MatchKind::Grouped);
        assert_eq!(ids(&g.accounting_items), vec!["acc-0", "acc-1"]);
        assert_eq!(g.delta_days, 0);
        assert!(g.is_balanced());
    }

    #[test]
    fn outside_tolerance_stays_unmatched() {
        let out = run_passes(
            vec![bank(0, "2024-01-01", "100.00", "CB")],
            vec![books(0, "2024-01-10", "100.00", "Achat")],
            &settings(3),
        );
        assert!(out.groups.is_empty());
        assert_eq!(out.unmatched_bank.len(), 1);
        assert_eq!(out.unmatched_accounting.len(), 1);
    }

    #[test]
    fn tolerance_is_inclusive() {
        let out = run_passes(
            vec![bank(0, "2024-01-07", "100.00", "CB")],
            vec![books(0, "2024-01-10", "100.00", "Achat")],
            &settings(3),
        );
        assert_eq!(out.groups.len(), 1);
        assert_eq!(out.groups[0].delta_days, 3);
    }

    #[test]
    fn zero_and_negative_tolerance_mean_same_day() {
        for days in [0, -4] {
            let out = run_passes(
                vec![
                    bank(0, "2024-01-10", "100.00", "CB"),
                    bank(1, "2024-01-10", "50.00", "CB"),
                ],
                vec![
                    books(0, "2024-01-10", "100.00", "same day"),
                    books(1, "2024-01-11", "50.00", "next day"),
                ],
                &settings(days),
            );
            assert_eq!(out.groups.len(), 1, "tolerance {days}");
            assert_eq!(ids(&out.groups[0].accounting_items), vec!["acc-0"]);
            assert_eq!(ids(&out.unmatched_accounting), vec!["acc-1"]);
        }
    }

    #[test]
    fn exact_is_greedy_first_found() {
        // acc-0 is earlier in pool order, so it wins although acc-1 is same-day
        let out = run_passes(
            vec![bank(0, "2024-01-10", "100.00", "CB")],
            vec![
                books(0, "2024-01-08", "100.00", "two days before"),
                books(1, "2024-01-10", "100.00", "same day"),
            ],
            &settings(3),
        );
        assert_eq!(out.groups.len(), 1);
        assert_eq!(ids(&out.groups[0].accounting_items), vec!["acc-0"]);
        assert_eq!(out.groups[0].delta_days, 2);
    }

    #[test]
    fn grouped_takes_first_balanced_date_bucket() {
        let bank_items = vec![bank(0, "2024-01-10", "100.00", "DEPOT")];
        let accounting = vec![
            books(5, "2024-01-11", "70.00", "b"),
            books(4, "2024-01-11", "30.00", "b"),
            books(3, "2024-01-09", "40.00", "a"),
            books(2, "2024-01-09", "60.00", "a"),
            books(1, "2024-01-10", "1.00", "noise"),
        ];
        let out = run_passes(bank_items, accounting, &settings(3));
        assert_eq!(out.groups.len(), 1);
        // the 2024-01-09 bucket comes first regardless of input order
        assert_eq!(ids(&out.groups[0].accounting_items), vec!["acc-2", "acc-3"]);
        assert_eq!(out.groups[0].delta_days, 1);
        assert_eq!(out.unmatched_accounting.len(), 3);
    }

    #[test]
    fn grouped_needs_two_candidates() {
        let out = run_pass(
            Pass::Grouped,
            vec![bank(0, "2024-01-10", "100.00", "DEPOT")],
            vec![books(0, "2024-01-10", "100.00", "only one")],
            &settings(3),
        );
        assert!(out.groups.is_empty());
    }

    #[test]
    fn heuristic_one_to_one_uses_fixed_window() {
        // 5 days apart: outside day_tolerance=1 but inside the heuristic window
        let out = run_passes(
            vec![bank(0, "2024-03-01", "250.00", "FICHIER EVI REMISE EN BANQUE")],
            vec![books(0, "2024-03-06", "250.00", "Notre virement client")],
            &settings(1),
        );
        assert_eq!(out.groups.len(), 1);
        assert_eq!(out.groups[0].kind, MatchKind::Heuristic);
        assert_eq!(out.groups[0].delta_days, 5);

        let out = run_passes(
            vec![bank(0, "2024-03-01", "250.00", "FICHIER EVI REMISE EN BANQUE")],
            vec![books(0, "2024-03-07", "250.00", "Notre virement client")],
            &settings(1),
        );
        assert!(out.groups.is_empty());
    }

    #[test]
    fn heuristic_one_to_many() {
        let out = run_passes(
            vec![bank(0, "2024-03-01", "300.00", "NOTRE VIREMENT FOURNISSEUR")],
            vec![
                books(0, "2024-03-04", "100.00", "Remise 1"),
                books(1, "2024-03-04", "200.00", "Remise 2"),
                books(2, "2024-03-02", "300.00", "Virement divers"),
            ],
            &settings(0),
        );
        assert_eq!(out.groups.len(), 1);
        let g = &out.groups[0];
        assert_eq!(g.kind, MatchKind::Grouped);
        assert_eq!(ids(&g.accounting_items), vec!["acc-0", "acc-1"]);
        assert_eq!(g.delta_days, 3);
        assert!(g.reasoning.as_deref().unwrap().starts_with("label heuristic"));
        assert_eq!(ids(&out.unmatched_accounting), vec!["acc-2"]);
    }

    #[test]
    fn heuristic_requires_opposite_marker() {
        let out = run_pass(
            Pass::Heuristic,
            vec![bank(0, "2024-03-01", "250.00", "REMISE CHEQUES")],
            vec![books(0, "2024-03-01", "250.00", "Remise cheques")],
            &settings(3),
        );
        assert!(out.groups.is_empty());
    }

    #[test]
    fn heuristic_ignores_marker_on_books_side_only() {
        let out = run_pass(
            Pass::Heuristic,
            vec![bank(0, "2024-03-01", "250.00", "VIR SEPA CLIENT")],
            vec![books(0, "2024-03-01", "250.00", "Notre virement")],
            &settings(3),
        );
        assert!(out.groups.is_empty());
    }

    #[test]
    fn earlier_pass_consumes_before_later_pass() {
        // acc-0 would be an EXACT match, but the heuristic takes it first
        let out = run_passes(
            vec![
                bank(0, "2024-03-01", "80.00", "CB SUPERMARCHE"),
                bank(1, "2024-03-01", "80.00", "REMISE 12"),
            ],
            vec![books(0, "2024-03-01", "80.00", "Notre virement")],
            &settings(3),
        );
        assert_eq!(out.groups.len(), 1);
        assert_eq!(out.groups[0].kind, MatchKind::Heuristic);
        assert_eq!(out.groups[0].bank_items[0].id, TxId::new(Source::Bank, 1));
        assert_eq!(ids(&out.unmatched_bank), vec!["bank-0"]);
    }

    #[test]
    fn unmatched_pools_stay_sorted() {
        let out = run_passes(
            vec![
                bank(2, "2024-01-20", "5.00", "x"),
                bank(1, "2024-01-02", "7.00", "y"),
            ],
            vec![
                books(9, "2024-02-01", "1.00", "z"),
                books(3, "2024-02-01", "2.00", "z"),
            ],
            &settings(0),
        );
        assert_eq!(ids(&out.unmatched_bank), vec!["bank-1", "bank-2"]);
        assert_eq!(ids(&out.unmatched_accounting), vec!["acc-3", "acc-9"]);
    }
}
