//! `rappro run` / `rappro validate`: config-driven bank/books reconciliation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use rappro_recon::fuzzy::parse_proposals;
use rappro_recon::{
    load_csv, FuzzyReport, GroupId, LedgerSnapshot, NormalizedBatch, ParseWarning, ReconConfig,
    ReconError, RunReport, SessionAction, SessionLedger, SideConfig, Source, StaticMatcher,
};

use crate::exit_codes::EXIT_UNMATCHED;
use crate::external::CommandMatcher;
use crate::CliError;

pub struct RunArgs {
    pub config: PathBuf,
    pub json: bool,
    pub output: Option<PathBuf>,
    pub proposals: Option<PathBuf>,
    pub fuzzy_cmd: Option<String>,
    pub fuzzy_timeout: Duration,
    pub day_tolerance: Option<i64>,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RunOutput {
    name: String,
    run: RunReport,
    extracts: Extracts,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    actions: Vec<ActionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fuzzy: Option<FuzzyReport>,
    #[serde(flatten)]
    snapshot: LedgerSnapshot,
}

#[derive(Serialize)]
struct Extracts {
    bank: ExtractStats,
    accounting: ExtractStats,
}

#[derive(Serialize)]
struct ExtractStats {
    file: String,
    transactions: usize,
    dust: usize,
    warnings: Vec<ParseWarning>,
}

impl ExtractStats {
    fn new(side: &SideConfig, batch: &NormalizedBatch) -> Self {
        Self {
            file: side.file.clone(),
            transactions: batch.transactions.len(),
            dust: batch.dust,
            warnings: batch.warnings.clone(),
        }
    }
}

#[derive(Serialize)]
struct ActionOutcome {
    index: usize,
    op: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

fn load_config(config_path: &Path) -> Result<ReconConfig, CliError> {
    let config_str = std::fs::read_to_string(config_path).map_err(|e| {
        CliError::runtime(format!("cannot read config {}: {e}", config_path.display()))
    })?;
    ReconConfig::from_toml(&config_str).map_err(|e| {
        CliError::config(e.to_string()).with_hint("run `rappro validate <config>` for details")
    })
}

/// Read and normalize one side. File paths resolve relative to the config.
fn load_side(
    base_dir: &Path,
    source: Source,
    side: &SideConfig,
    config: &ReconConfig,
) -> Result<NormalizedBatch, CliError> {
    let csv_path = base_dir.join(&side.file);
    let csv_data = std::fs::read_to_string(&csv_path)
        .map_err(|e| CliError::runtime(format!("cannot read {}: {e}", csv_path.display())))?;
    load_csv(source, &csv_data, &side.columns, &config.settings).map_err(|e| match e {
        ReconError::MissingColumn { .. } | ReconError::Validation(_) => {
            CliError::config(format!("{}: {e}", csv_path.display()))
                .with_hint("column names are matched exactly against the header row")
        }
        other => CliError::runtime(format!("{}: {other}", csv_path.display())),
    })
}

fn base_dir(config_path: &Path) -> &Path {
    config_path.parent().unwrap_or_else(|| Path::new("."))
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let base = base_dir(&config_path);
    let bank = load_side(base, Source::Bank, &config.bank, &config)?;
    let accounting = load_side(base, Source::Accounting, &config.accounting, &config)?;

    eprintln!(
        "{}: config OK, bank {} lines ({} rejected), accounting {} lines ({} rejected), {} scripted action(s)",
        config.name,
        bank.transactions.len(),
        bank.warnings.len(),
        accounting.transactions.len(),
        accounting.warnings.len(),
        config.actions.len(),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn cmd_run(args: RunArgs) -> Result<(), CliError> {
    let mut config = load_config(&args.config)?;
    if let Some(days) = args.day_tolerance {
        config.settings.day_tolerance = days;
    }

    let base = base_dir(&args.config);
    let bank = load_side(base, Source::Bank, &config.bank, &config)?;
    let accounting = load_side(base, Source::Accounting, &config.accounting, &config)?;
    let extracts = Extracts {
        bank: ExtractStats::new(&config.bank, &bank),
        accounting: ExtractStats::new(&config.accounting, &accounting),
    };

    let mut ledger = SessionLedger::new();
    let run = ledger.run(bank.transactions, accounting.transactions, &config.settings);
    let actions = apply_actions(&mut ledger, &config);

    let fuzzy = if let Some(path) = &args.proposals {
        let data = std::fs::read_to_string(path)
            .map_err(|e| CliError::runtime(format!("cannot read {}: {e}", path.display())))?;
        Some(ledger.consult_fuzzy(&StaticMatcher(parse_proposals(&data))))
    } else {
        args.fuzzy_cmd.as_deref().map(|program| {
            let matcher = CommandMatcher::new(program).with_timeout(args.fuzzy_timeout);
            ledger.consult_fuzzy(&matcher)
        })
    };

    if let Err(violation) = ledger.check_invariants() {
        return Err(CliError::general(format!("ledger invariant violated: {violation}")));
    }

    let output = RunOutput {
        name: config.name.clone(),
        run,
        extracts,
        actions,
        fuzzy,
        snapshot: ledger.snapshot(),
    };

    let json_str = serde_json::to_string_pretty(&output)
        .map_err(|e| CliError::general(format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &json_str)
            .map_err(|e| CliError::runtime(format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if args.json {
        println!("{json_str}");
    }

    print_summary(&output);

    let s = &output.snapshot.summary;
    if !s.fully_reconciled() {
        return Err(CliError::new(
            EXIT_UNMATCHED,
            format!(
                "{} bank / {} accounting line(s) unmatched",
                s.unmatched_bank, s.unmatched_accounting
            ),
        ));
    }
    Ok(())
}

/// Human summary to stderr.
fn print_summary(output: &RunOutput) {
    let s = &output.snapshot.summary;
    eprintln!(
        "{}: {} groups ({} exact, {} grouped, {} heuristic, {} manual, {} fuzzy)",
        output.name, s.total_groups, s.exact, s.grouped, s.heuristic, s.manual, s.fuzzy,
    );
    eprintln!(
        "unmatched: {} bank ({}), {} accounting ({}); {} ignored",
        s.unmatched_bank,
        s.unmatched_bank_total,
        s.unmatched_accounting,
        s.unmatched_accounting_total,
        s.excluded,
    );

    let rejected = output.extracts.bank.warnings.len() + output.extracts.accounting.warnings.len();
    if rejected > 0 {
        eprintln!("{rejected} row(s) rejected while reading the extracts");
    }
    if let Some(fuzzy) = &output.fuzzy {
        eprintln!(
            "fuzzy matcher: {} accepted, {} rejected",
            fuzzy.accepted.len(),
            fuzzy.rejected.len()
        );
    }
    let failed = output.actions.iter().filter(|a| !a.ok).count();
    if failed > 0 {
        eprintln!("{failed} scripted action(s) failed");
    }
}

// ---------------------------------------------------------------------------
// Scripted actions
// ---------------------------------------------------------------------------

/// Replay the config's `[[actions]]` in order. A failing action leaves the
/// ledger unchanged and the rest still run.
fn apply_actions(ledger: &mut SessionLedger, config: &ReconConfig) -> Vec<ActionOutcome> {
    config
        .actions
        .iter()
        .enumerate()
        .map(|(index, action)| {
            let (op, result) = apply_action(ledger, action, config);
            if let Err(ref e) = result {
                log::warn!("action #{index} ({op}): {e}");
            }
            ActionOutcome {
                index,
                op,
                ok: result.is_ok(),
                detail: match result {
                    Ok(detail) => detail,
                    Err(e) => Some(e.to_string()),
                },
            }
        })
        .collect()
}

fn apply_action(
    ledger: &mut SessionLedger,
    action: &SessionAction,
    config: &ReconConfig,
) -> (&'static str, Result<Option<String>, ReconError>) {
    match action {
        SessionAction::Match { ids } => {
            let result = select_all(ledger, ids).and_then(|()| ledger.manual_match());
            if result.is_err() {
                ledger.clear_selection();
            }
            ("match", result.map(|id| Some(id.to_string())))
        }
        SessionAction::Ignore { ids } => {
            let result = select_all(ledger, ids).map(|()| ledger.ignore());
            if result.is_err() {
                ledger.clear_selection();
            }
            ("ignore", result.map(|n| Some(format!("{n} line(s) ignored"))))
        }
        SessionAction::Unmatch { group } => {
            let result = group
                .parse::<GroupId>()
                .and_then(|id| ledger.unmatch(id))
                .map(|()| None);
            ("unmatch", result)
        }
        SessionAction::Rerun { day_tolerance } => {
            let settings = match day_tolerance {
                Some(days) => config.settings.clone().with_day_tolerance(*days),
                None => config.settings.clone(),
            };
            let report = ledger.incremental_run(&settings);
            ("rerun", Ok(Some(format!("{:?}: {} new group(s)", report.status, report.new_groups))))
        }
    }
}

fn select_all(ledger: &mut SessionLedger, ids: &[rappro_recon::TxId]) -> Result<(), ReconError> {
    ledger.clear_selection();
    for id in ids {
        ledger.select(*id)?;
    }
    Ok(())
}
