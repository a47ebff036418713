use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config or operation precondition failed. The ledger is unchanged.
    Validation(String),
    /// A mapped column is not present in the extract's header row.
    MissingColumn { side: String, column: String },
    /// Manual match over a selection whose sides do not balance.
    Unbalanced { bank: Decimal, accounting: Decimal },
    /// Id is not in either unmatched pool.
    UnknownTransaction(String),
    /// No group with this id in the match history.
    UnknownGroup(String),
    /// IO / CSV reader error.
    Io(String),
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::MissingColumn { side, column } => {
                write!(f, "{side}: missing column '{column}'")
            }
            Self::Unbalanced { bank, accounting } => match bank.checked_sub(*accounting) {
                Some(diff) => write!(
                    f,
                    "selection does not balance: bank {bank} vs accounting {accounting} (difference {})",
                    diff.abs()
                ),
                None => write!(
                    f,
                    "selection does not balance: bank {bank} vs accounting {accounting} (difference out of range)"
                ),
            },
            Self::UnknownTransaction(id) => write!(f, "transaction '{id}' is not unmatched"),
            Self::UnknownGroup(id) => write!(f, "unknown match group '{id}'"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}

/// A row that could not be normalized. The row is left out of the pool and
/// the rest of the batch continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    pub side: String,
    pub row: usize,
    pub column: String,
    pub value: String,
    pub reason: &'static str,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} row {}: {} in column '{}' ({:?})",
            self.side, self.row, self.reason, self.column, self.value
        )
    }
}

/// Failure of the external fuzzy matcher. Always degrades to zero proposals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    Unavailable(String),
    Malformed(String),
    Cancelled,
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "fuzzy matcher unavailable: {msg}"),
            Self::Malformed(msg) => write!(f, "fuzzy matcher returned malformed output: {msg}"),
            Self::Cancelled => write!(f, "fuzzy matcher call cancelled"),
        }
    }
}

impl std::error::Error for CollaboratorError {}
