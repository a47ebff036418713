//! Builders shared by the unit tests.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::model::{Source, Transaction, TxId};

pub fn tx(source: Source, row: u32, date: &str, amount: &str, label: &str) -> Transaction {
    Transaction {
        id: TxId::new(source, row),
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        amount: Decimal::from_str(amount).unwrap(),
        label: label.into(),
        source,
    }
}

pub fn bank(row: u32, date: &str, amount: &str, label: &str) -> Transaction {
    tx(Source::Bank, row, date, amount, label)
}

pub fn books(row: u32, date: &str, amount: &str, label: &str) -> Transaction {
    tx(Source::Accounting, row, date, amount, label)
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}
