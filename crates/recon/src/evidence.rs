use crate::model::{total, MatchGroup, MatchKind, ReconSummary, Transaction};

/// Compute summary statistics over the ledger's current state.
pub fn compute_summary(
    matches: &[MatchGroup],
    unmatched_bank: &[Transaction],
    unmatched_accounting: &[Transaction],
    excluded: usize,
) -> ReconSummary {
    let mut summary = ReconSummary {
        total_groups: matches.len(),
        unmatched_bank: unmatched_bank.len(),
        unmatched_accounting: unmatched_accounting.len(),
        excluded,
        unmatched_bank_total: total(unmatched_bank),
        unmatched_accounting_total: total(unmatched_accounting),
        ..ReconSummary::default()
    };

    for g in matches {
        match g.kind {
            MatchKind::Exact => summary.exact += 1,
            MatchKind::Grouped => summary.grouped += 1,
            MatchKind::Heuristic => summary.heuristic += 1,
            MatchKind::Manual => summary.manual += 1,
            MatchKind::Fuzzy => summary.fuzzy += 1,
        }
        summary.matched_bank_items += g.bank_items.len();
        summary.matched_accounting_items += g.accounting_items.len();
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bank, books, dec};

    #[test]
    fn summary_counts() {
        let matches = vec![
            MatchGroup::new(
                MatchKind::Exact,
                vec![bank(0, "2024-01-10", "10", "a")],
                vec![books(0, "2024-01-10", "10", "a")],
                0,
            ),
            MatchGroup::new(
                MatchKind::Grouped,
                vec![bank(1, "2024-01-10", "30", "b")],
                vec![books(1, "2024-01-10", "10", "b"), books(2, "2024-01-10", "20", "b")],
                0,
            ),
            MatchGroup::new(MatchKind::Manual, vec![], vec![books(3, "2024-01-10", "0.5", "c")], 0),
        ];
        let unmatched_bank = vec![bank(2, "2024-01-11", "12.50", "x"), bank(3, "2024-01-12", "-2.50", "y")];

        let summary = compute_summary(&matches, &unmatched_bank, &[], 4);
        assert_eq!(summary.total_groups, 3);
        assert_eq!(summary.exact, 1);
        assert_eq!(summary.grouped, 1);
        assert_eq!(summary.manual, 1);
        assert_eq!(summary.matched_bank_items, 2);
        assert_eq!(summary.matched_accounting_items, 4);
        assert_eq!(summary.unmatched_bank, 2);
        assert_eq!(summary.unmatched_bank_total, dec("10.00"));
        assert_eq!(summary.excluded, 4);
        assert!(!summary.fully_reconciled());
    }
}
