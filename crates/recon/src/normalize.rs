//! Raw extract rows → canonical [`Transaction`]s.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use crate::config::{AmountColumns, ColumnMapping, DatePolicy, MatchSettings};
use crate::error::{ParseWarning, ReconError};
use crate::model::{Source, Transaction, TxId, DUST_EPSILON};

const NO_LABEL: &str = "(no label)";

/// One data row of an extract, keyed by header name.
#[derive(Debug, Clone, Default)]
pub struct RawRow {
    /// 0-based position among the extract's data rows. Becomes the id.
    pub row: u32,
    pub fields: HashMap<String, String>,
}

impl RawRow {
    pub fn new<K, V>(row: u32, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            row,
            fields: fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    fn get(&self, column: &str) -> &str {
        self.fields.get(column).map(String::as_str).unwrap_or("")
    }
}

/// Result of normalizing one side's extract.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub transactions: Vec<Transaction>,
    pub warnings: Vec<ParseWarning>,
    /// Rows dropped by the dust filter.
    pub dust: usize,
}

// ---------------------------------------------------------------------------
// Field parsers
// ---------------------------------------------------------------------------

/// Parse a date cell. `d/m/Y` first, then a handful of generic layouts.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    // a trailing time is dropped: "10/01/2024 08:30"
    let slashed = value
        .split_whitespace()
        .next()
        .filter(|token| token.matches('/').count() == 2)
        .unwrap_or(value);
    let parts: Vec<&str> = slashed.split('/').collect();
    if parts.len() == 3 {
        let day: u32 = parts[0].trim().parse().ok()?;
        let month: u32 = parts[1].trim().parse().ok()?;
        let mut year: i32 = parts[2].trim().parse().ok()?;
        if parts[2].trim().len() <= 2 {
            year += 2000;
        }
        // "2024/01/31" is year-first, not day-first
        if parts[0].trim().len() == 4 {
            return NaiveDate::from_ymd_opt(parts[0].trim().parse().ok()?, month, parts[2].trim().parse().ok()?);
        }
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    for fmt in ["%Y-%m-%d", "%d-%m-%Y", "%d.%m.%Y", "%Y%m%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(value, fmt) {
            return Some(d);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt.date());
        }
    }
    None
}

/// Parse an amount cell: drop whitespace and anything but digits, `,`, `.`
/// and `-`, read `,` as the decimal point.
pub fn parse_amount(value: &str) -> Option<Decimal> {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}

// ---------------------------------------------------------------------------
// Row normalization
// ---------------------------------------------------------------------------

/// Normalize one row. `Ok(None)` means the row was dust.
pub fn normalize_row(
    raw: &RawRow,
    mapping: &ColumnMapping,
    side: Source,
    settings: &MatchSettings,
) -> Result<Option<Transaction>, ParseWarning> {
    let warning = |column: &str, value: &str, reason: &'static str| ParseWarning {
        side: side.to_string(),
        row: raw.row as usize,
        column: column.to_string(),
        value: value.to_string(),
        reason,
    };

    let date_cell = raw.get(&mapping.date);
    let date = match (parse_date(date_cell), settings.date_policy) {
        (Some(d), _) => d,
        (None, DatePolicy::Epoch) => NaiveDate::default(),
        (None, DatePolicy::Reject) => {
            return Err(warning(&mapping.date, date_cell, "unparseable date"));
        }
    };

    let columns = mapping
        .amount_columns(side)
        .map_err(|_| warning("", "", "incomplete amount mapping"))?;
    let mut amount = match columns {
        AmountColumns::Single(column) => {
            let cell = raw.get(column);
            parse_amount(cell).ok_or_else(|| warning(column, cell, "unparseable amount"))?
        }
        AmountColumns::Split { debit, credit } => {
            let split_cell = |column: &str| -> Result<Decimal, ParseWarning> {
                let cell = raw.get(column);
                if cell.trim().is_empty() {
                    return Ok(Decimal::ZERO);
                }
                parse_amount(cell).ok_or_else(|| warning(column, cell, "unparseable amount"))
            };
            split_cell(credit)?
                .checked_sub(split_cell(debit)?)
                .ok_or_else(|| warning(credit, raw.get(credit), "amount out of range"))?
        }
    };

    if side == Source::Accounting && settings.invert_accounting_sign {
        amount = -amount;
    }

    if amount.abs() <= DUST_EPSILON {
        return Ok(None);
    }

    let label = match mapping.label.as_deref() {
        Some(column) if !column.trim().is_empty() => raw.get(column).trim().to_string(),
        _ => NO_LABEL.to_string(),
    };

    Ok(Some(Transaction {
        id: TxId::new(side, raw.row),
        date,
        amount,
        label,
        source: side,
    }))
}

/// Normalize a whole side. Fails only on an invalid mapping; bad rows become
/// warnings.
pub fn normalize_rows(
    rows: &[RawRow],
    mapping: &ColumnMapping,
    side: Source,
    settings: &MatchSettings,
) -> Result<NormalizedBatch, ReconError> {
    mapping.validate(side)?;

    let mut batch = NormalizedBatch::default();
    for raw in rows {
        match normalize_row(raw, mapping, side, settings) {
            Ok(Some(tx)) => batch.transactions.push(tx),
            Ok(None) => batch.dust += 1,
            Err(w) => {
                log::warn!("{w}");
                batch.warnings.push(w);
            }
        }
    }

    log::info!(
        "{side}: {} transactions, {} dust rows, {} rejected",
        batch.transactions.len(),
        batch.dust,
        batch.warnings.len()
    );
    Ok(batch)
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// `;` when the header line contains one, `,` otherwise.
pub fn detect_separator(data: &str) -> u8 {
    let header = data.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if header.contains(';') {
        b';'
    } else {
        b','
    }
}

/// Read a delimited extract into raw rows, checking the mapped columns exist.
pub fn read_csv_rows(side: Source, data: &str, mapping: &ColumnMapping) -> Result<Vec<RawRow>, ReconError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(detect_separator(data))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ReconError::Io(e.to_string()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    for column in mapping.referenced_columns() {
        if !headers.iter().any(|h| h == column) {
            return Err(ReconError::MissingColumn {
                side: side.to_string(),
                column: column.to_string(),
            });
        }
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ReconError::Io(e.to_string()))?;
        if record.iter().all(|cell| cell.trim_matches(|c| c == '"' || c == ';').trim().is_empty()) {
            continue;
        }
        let fields = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), record.get(i).unwrap_or("").to_string()));
        rows.push(RawRow::new(index as u32, fields));
    }

    Ok(rows)
}

/// Read and normalize one side's CSV extract.
pub fn load_csv(
    side: Source,
    data: &str,
    mapping: &ColumnMapping,
    settings: &MatchSettings,
) -> Result<NormalizedBatch, ReconError> {
    let rows = read_csv_rows(side, data, mapping)?;
    normalize_rows(&rows, mapping, side, settings)
}
