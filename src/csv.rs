use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::participant::customer::Customer;
use crate::service::Command;
use crate::{Amount, UserId};

/// Errors that can occur when reading commands or writing balances
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open csv file: {0}")]
    Open(csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized command type '{kind}'")]
    UnrecognizedType { line: usize, kind: String },

    #[error("line {line}: {kind} missing amount")]
    MissingAmount { line: usize, kind: String },

    #[error("line {line}: {kind} has invalid amount {amount}")]
    InvalidAmount {
        line: usize,
        kind: String,
        amount: f64,
    },

    #[error("failed to write csv: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush csv writer: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    user: UserId,
    amount: Option<f64>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    user: &'a str,
    available: String,
    reserved: String,
    total: String,
}

/// Read commands from a csv file with columns `type,user,amount`
pub fn read_commands(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Command, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let kind = row.r#type.as_str();
            match kind {
                "customer" => Ok(Command::CreateCustomer {
                    balance: parse_amount(line, kind, row.amount)?,
                    user_id: row.user,
                }),
                "order" => Ok(Command::SubmitOrder {
                    amount: parse_amount(line, kind, row.amount)?,
                    user_id: row.user,
                }),
                other => Err(CsvError::UnrecognizedType {
                    line,
                    kind: other.to_string(),
                }),
            }
        }))
}

fn parse_amount(line: usize, kind: &str, amount: Option<f64>) -> Result<Amount, CsvError> {
    let amount = amount.ok_or_else(|| CsvError::MissingAmount {
        line,
        kind: kind.to_string(),
    })?;
    Amount::from_float(amount).ok_or_else(|| CsvError::InvalidAmount {
        line,
        kind: kind.to_string(),
        amount,
    })
}

/// Write customer balances in csv format
pub fn write_customers<'a>(
    writer: impl io::Write,
    customers: impl IntoIterator<Item = &'a Customer>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);

    for customer in customers {
        let row = OutputRow {
            user: &customer.user_id,
            available: customer.available.to_string(),
            reserved: customer.reserved.to_string(),
            total: customer.total().to_string(),
        };
        writer.serialize(&row)?;
    }

    writer.flush()?;
    Ok(())
}
