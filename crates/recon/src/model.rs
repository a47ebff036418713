use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ReconError;

/// Two amounts are equal when they differ by strictly less than half a cent.
pub const AMOUNT_EPSILON: Decimal = Decimal::from_parts(5, 0, 0, false, 3);

/// Rows with `|amount| <= DUST_EPSILON` never enter the matchable pool.
pub const DUST_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Amounts whose difference overflows `Decimal` never match.
pub fn amounts_match(a: Decimal, b: Decimal) -> bool {
    a.checked_sub(b).is_some_and(|d| d.abs() < AMOUNT_EPSILON)
}

/// Absolute difference between two dates in whole days.
pub fn day_delta(a: NaiveDate, b: NaiveDate) -> i64 {
    (a - b).num_days().abs()
}

/// Sum of amounts, saturating at the `Decimal` bounds.
pub fn total(items: &[Transaction]) -> Decimal {
    sum_amounts(items.iter().map(|t| t.amount))
}

pub fn sum_amounts(amounts: impl IntoIterator<Item = Decimal>) -> Decimal {
    amounts
        .into_iter()
        .fold(Decimal::ZERO, |acc, a| acc.saturating_add(a))
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Bank,
    Accounting,
}

impl Source {
    fn prefix(self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::Accounting => "acc",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bank => write!(f, "bank"),
            Self::Accounting => write!(f, "accounting"),
        }
    }
}

/// Stable transaction id: the side plus the 0-based data row of the extract.
///
/// Re-normalizing the same extract (e.g. after a settings change) yields the
/// same ids, which is what lets exclusions survive a full re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId {
    pub source: Source,
    pub row: u32,
}

impl TxId {
    pub fn new(source: Source, row: u32) -> Self {
        Self { source, row }
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source.prefix(), self.row)
    }
}

impl FromStr for TxId {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ReconError::UnknownTransaction(s.to_string());
        let (prefix, row) = s.trim().split_once('-').ok_or_else(bad)?;
        let source = match prefix {
            "bank" => Source::Bank,
            "acc" => Source::Accounting,
            _ => return Err(bad()),
        };
        let row = row.parse().map_err(|_| bad())?;
        Ok(Self { source, row })
    }
}

impl Serialize for TxId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A normalized ledger line. Never mutated after normalization; only its
/// membership (pool, group, excluded) changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub id: TxId,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub label: String,
    pub source: Source,
}

impl Transaction {
    /// Pool ordering: by date, then id.
    pub fn sort_key(&self) -> (NaiveDate, TxId) {
        (self.date, self.id)
    }
}

// ---------------------------------------------------------------------------
// Match groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchKind {
    Exact,
    Grouped,
    Heuristic,
    Manual,
    Fuzzy,
}

impl MatchKind {
    pub fn default_confidence(self) -> f64 {
        match self {
            Self::Exact | Self::Manual => 1.0,
            Self::Grouped => 0.95,
            Self::Heuristic => 0.9,
            Self::Fuzzy => 0.5,
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Grouped => write!(f, "grouped"),
            Self::Heuristic => write!(f, "heuristic"),
            Self::Manual => write!(f, "manual"),
            Self::Fuzzy => write!(f, "fuzzy"),
        }
    }
}

/// Group id, derived from the smallest member id. Members are disjoint
/// across live groups, so ids are unique at any point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub TxId);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g:{}", self.0)
    }
}

impl FromStr for GroupId {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s.trim().strip_prefix("g:").unwrap_or(s.trim());
        inner
            .parse()
            .map(GroupId)
            .map_err(|_| ReconError::UnknownGroup(s.to_string()))
    }
}

impl Serialize for GroupId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchGroup {
    pub id: GroupId,
    #[serde(rename = "type")]
    pub kind: MatchKind,
    pub bank_items: Vec<Transaction>,
    pub accounting_items: Vec<Transaction>,
    pub delta_days: u32,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl MatchGroup {
    /// Build a group. Callers guarantee at least one accounting item.
    pub fn new(
        kind: MatchKind,
        bank_items: Vec<Transaction>,
        accounting_items: Vec<Transaction>,
        delta_days: u32,
    ) -> Self {
        let id = bank_items
            .iter()
            .chain(&accounting_items)
            .map(|t| t.id)
            .min()
            .map(GroupId)
            .unwrap_or(GroupId(TxId::new(Source::Accounting, u32::MAX)));
        Self {
            id,
            kind,
            bank_items,
            accounting_items,
            delta_days,
            confidence: kind.default_confidence(),
            reasoning: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn bank_total(&self) -> Decimal {
        total(&self.bank_items)
    }

    pub fn accounting_total(&self) -> Decimal {
        total(&self.accounting_items)
    }

    pub fn difference(&self) -> Decimal {
        self.bank_total().saturating_sub(self.accounting_total()).abs()
    }

    pub fn is_balanced(&self) -> bool {
        amounts_match(self.bank_total(), self.accounting_total())
    }

    pub fn member_ids(&self) -> impl Iterator<Item = TxId> + '_ {
        self.bank_items.iter().chain(&self.accounting_items).map(|t| t.id)
    }

    /// The single bank line shown for this group in reports.
    ///
    /// Synthesized for display only; `bank_items` keeps the real lines.
    pub fn representative(&self) -> Representative {
        match self.bank_items.as_slice() {
            [one] => Representative {
                date: one.date,
                label: one.label.clone(),
                amount: one.amount,
            },
            [first, ..] => {
                let joined = self
                    .bank_items
                    .iter()
                    .map(|t| t.label.as_str())
                    .collect::<Vec<_>>()
                    .join(" + ");
                let truncated: String = joined.chars().take(COMPOSITE_LABEL_CHARS).collect();
                Representative {
                    date: first.date,
                    label: format!("Manual: {truncated}..."),
                    amount: self.bank_total(),
                }
            }
            [] => Representative {
                date: self
                    .accounting_items
                    .first()
                    .map(|t| t.date)
                    .unwrap_or_default(),
                label: "Manual adjustment".into(),
                amount: Decimal::ZERO,
            },
        }
    }

    pub fn view(&self) -> MatchView {
        MatchView {
            id: self.id,
            kind: self.kind,
            representative: self.representative(),
            bank_items: self.bank_items.clone(),
            accounting_items: self.accounting_items.clone(),
            total: self.accounting_total(),
            delta_days: self.delta_days,
            confidence: self.confidence,
            reasoning: self.reasoning.clone(),
        }
    }
}

const COMPOSITE_LABEL_CHARS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Representative {
    pub date: NaiveDate,
    pub label: String,
    pub amount: Decimal,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct MatchView {
    pub id: GroupId,
    #[serde(rename = "type")]
    pub kind: MatchKind,
    pub representative: Representative,
    pub bank_items: Vec<Transaction>,
    pub accounting_items: Vec<Transaction>,
    pub total: Decimal,
    pub delta_days: u32,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconSummary {
    pub total_groups: usize,
    pub exact: usize,
    pub grouped: usize,
    pub heuristic: usize,
    pub manual: usize,
    pub fuzzy: usize,
    pub matched_bank_items: usize,
    pub matched_accounting_items: usize,
    pub unmatched_bank: usize,
    pub unmatched_accounting: usize,
    pub excluded: usize,
    pub unmatched_bank_total: Decimal,
    pub unmatched_accounting_total: Decimal,
}

impl ReconSummary {
    pub fn fully_reconciled(&self) -> bool {
        self.unmatched_bank == 0 && self.unmatched_accounting == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub matches: Vec<MatchView>,
    pub unmatched_bank: Vec<Transaction>,
    pub unmatched_accounting: Vec<Transaction>,
    pub summary: ReconSummary,
}
