//! `rappro-recon`: Bank statement / accounting ledger reconciliation engine.
//!
//! Engine crate: normalizes raw rows into transactions, runs the deterministic
//! matching passes and keeps the session ledger. The only IO is the CSV
//! reader in [`normalize`]; no CLI dependencies.

pub mod config;
pub mod error;
pub mod evidence;
pub mod fuzzy;
pub mod ledger;
pub mod matcher;
pub mod model;
pub mod normalize;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ColumnMapping, DatePolicy, MatchSettings, ReconConfig, SessionAction, SideConfig};
pub use error::{CollaboratorError, ParseWarning, ReconError};
pub use fuzzy::{FuzzyMatcher, FuzzyProposal, FuzzyRequest, StaticMatcher};
pub use ledger::{FuzzyReport, FuzzyTicket, RunReport, RunStatus, SelectionTotals, SessionLedger};
pub use matcher::{run_pass, run_passes, MatchOutcome, Pass};
pub use model::{
    GroupId, LedgerSnapshot, MatchGroup, MatchKind, ReconSummary, Source, Transaction, TxId,
};
pub use normalize::{load_csv, normalize_rows, NormalizedBatch, RawRow};
