use serde::Deserialize;

use crate::error::ReconError;
use crate::model::{Source, TxId};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    pub name: String,
    pub bank: SideConfig,
    pub accounting: SideConfig,
    #[serde(default)]
    pub settings: MatchSettings,
    #[serde(default)]
    pub actions: Vec<SessionAction>,
}

// ---------------------------------------------------------------------------
// Sides
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SideConfig {
    pub file: String,
    pub columns: ColumnMapping,
}

/// Which header holds each field. Amount is either a single signed column or
/// a debit/credit pair (amount = credit - debit).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ColumnMapping {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub debit: Option<String>,
    #[serde(default)]
    pub credit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountColumns<'a> {
    Single(&'a str),
    Split { debit: &'a str, credit: &'a str },
}

impl ColumnMapping {
    pub fn single(date: &str, label: Option<&str>, amount: &str) -> Self {
        Self {
            date: date.into(),
            label: label.map(Into::into),
            amount: Some(amount.into()),
            debit: None,
            credit: None,
        }
    }

    pub fn split(date: &str, label: Option<&str>, debit: &str, credit: &str) -> Self {
        Self {
            date: date.into(),
            label: label.map(Into::into),
            amount: None,
            debit: Some(debit.into()),
            credit: Some(credit.into()),
        }
    }

    /// Resolve the amount mode, rejecting incomplete or ambiguous mappings.
    pub fn amount_columns(&self, side: Source) -> Result<AmountColumns<'_>, ReconError> {
        fn non_empty(c: &Option<String>) -> Option<&str> {
            c.as_deref().filter(|s| !s.trim().is_empty())
        }
        match (non_empty(&self.amount), non_empty(&self.debit), non_empty(&self.credit)) {
            (Some(amount), None, None) => Ok(AmountColumns::Single(amount)),
            (None, Some(debit), Some(credit)) => Ok(AmountColumns::Split { debit, credit }),
            (Some(_), _, _) => Err(ReconError::Validation(format!(
                "{side}: map either 'amount' or 'debit'/'credit', not both"
            ))),
            _ => Err(ReconError::Validation(format!(
                "{side}: an 'amount' column or both 'debit' and 'credit' columns are required"
            ))),
        }
    }

    pub fn validate(&self, side: Source) -> Result<(), ReconError> {
        if self.date.trim().is_empty() {
            return Err(ReconError::Validation(format!("{side}: 'date' column is required")));
        }
        self.amount_columns(side)?;
        Ok(())
    }

    /// Every header name this mapping reads.
    pub fn referenced_columns(&self) -> Vec<&str> {
        [
            Some(self.date.as_str()),
            self.label.as_deref(),
            self.amount.as_deref(),
            self.debit.as_deref(),
            self.credit.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|c| !c.trim().is_empty())
        .collect()
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// What to do with a row whose date cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePolicy {
    /// Drop the row with a parse warning.
    #[default]
    Reject,
    /// Keep the row dated 1970-01-01.
    Epoch,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MatchSettings {
    /// Inclusive date window for the automatic passes. Negative values act as 0.
    #[serde(default = "default_day_tolerance")]
    pub day_tolerance: i64,
    /// Flip the books side so both ledgers use inflow-positive amounts.
    #[serde(default = "default_invert")]
    pub invert_accounting_sign: bool,
    #[serde(default)]
    pub date_policy: DatePolicy,
}

fn default_day_tolerance() -> i64 {
    3
}

fn default_invert() -> bool {
    true
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            day_tolerance: default_day_tolerance(),
            invert_accounting_sign: default_invert(),
            date_policy: DatePolicy::default(),
        }
    }
}

impl MatchSettings {
    pub fn with_day_tolerance(mut self, days: i64) -> Self {
        self.day_tolerance = days;
        self
    }

    /// Tolerance as applied by the passes (never below zero).
    pub fn effective_day_tolerance(&self) -> i64 {
        self.day_tolerance.max(0)
    }
}

// ---------------------------------------------------------------------------
// Scripted session operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SessionAction {
    /// Select the ids and manually match them.
    Match { ids: Vec<TxId> },
    /// Select the ids and exclude them for the rest of the session.
    Ignore { ids: Vec<TxId> },
    /// Dissolve a match group (by group id, e.g. "g:bank-3").
    Unmatch { group: String },
    /// Incremental re-run over the current unmatched pools.
    Rerun {
        #[serde(default)]
        day_tolerance: Option<i64>,
    },
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.bank.file.trim().is_empty() || self.accounting.file.trim().is_empty() {
            return Err(ReconError::Validation("both sides need a 'file'".into()));
        }
        self.bank.columns.validate(Source::Bank)?;
        self.accounting.columns.validate(Source::Accounting)?;

        for action in &self.actions {
            match action {
                SessionAction::Match { ids } | SessionAction::Ignore { ids } if ids.is_empty() => {
                    return Err(ReconError::Validation(
                        "match/ignore actions need at least one id".into(),
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
