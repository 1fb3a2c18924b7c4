use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::model::{CartItem, CartOp, Command, NewItem, WalletAddress, WalletSession};

/// Errors that can occur when parsing csv rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: ::csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: ::csv::Error },

    #[error("line {line}: unrecognized command '{op}'")]
    UnrecognizedOp { line: usize, op: String },

    #[error("line {line}: {op} missing {field}")]
    MissingField {
        line: usize,
        op: String,
        field: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    op: String,
    address: Option<String>,
    product: Option<String>,
    size: Option<String>,
    color: Option<String>,
    quantity: Option<i64>,
    max_quantity: Option<u32>,
    campaign: Option<String>,
    piece_name: Option<String>,
    ngo: Option<bool>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    unique_id: &'a str,
    product: &'a str,
    size: &'a str,
    color: &'a str,
    quantity: u32,
}

impl InputRow {
    fn require<'a>(
        value: &'a Option<String>,
        line: usize,
        op: &str,
        field: &'static str,
    ) -> Result<&'a str, CsvError> {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CsvError::MissingField {
                line,
                op: op.to_string(),
                field,
            })
    }

    fn address(&self) -> Option<WalletAddress> {
        self.address
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(WalletAddress::from)
    }

    fn new_item(&self, line: usize) -> Result<NewItem, CsvError> {
        let product = Self::require(&self.product, line, &self.op, "product")?;
        let mut item = NewItem::new(
            product,
            self.size.clone().unwrap_or_default(),
            self.color.clone().unwrap_or_default(),
        )
        .with_ngo(self.ngo.unwrap_or(false))
        .with_max_quantity(self.max_quantity);
        if let Some(campaign) = self.campaign.as_deref().filter(|c| !c.is_empty()) {
            item = item.with_campaign(campaign);
        }
        if let Some(piece) = self.piece_name.as_deref().filter(|p| !p.is_empty()) {
            item = item.with_piece_name(piece);
        }
        Ok(item)
    }

    fn into_command(self, line: usize) -> Result<Command, CsvError> {
        let command = match self.op.as_str() {
            "connect" => {
                let address = Self::require(&self.address, line, &self.op, "address")?;
                Command::Session(WalletSession::connected(address))
            }
            "connecting" => Command::Session(WalletSession::connecting(self.address())),
            "reconnecting" => Command::Session(WalletSession::reconnecting(self.address())),
            "disconnect" => Command::Session(WalletSession::disconnected()),
            "add" => Command::Cart(CartOp::Add(self.new_item(line)?)),
            "add_sizes" => {
                let sizes = Self::require(&self.size, line, &self.op, "size")?
                    .split('|')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                Command::Cart(CartOp::AddSizes {
                    item: self.new_item(line)?,
                    sizes,
                })
            }
            "update" => {
                let quantity = self.quantity.ok_or_else(|| CsvError::MissingField {
                    line,
                    op: self.op.clone(),
                    field: "quantity",
                })?;
                Command::Cart(CartOp::UpdateQuantity {
                    unique_id: self.new_item(line)?.unique_id(),
                    quantity,
                })
            }
            "remove" => Command::Cart(CartOp::Remove {
                unique_id: self.new_item(line)?.unique_id(),
            }),
            "clear" => Command::Cart(CartOp::Clear),
            "checkout" => Command::Checkout,
            other => {
                return Err(CsvError::UnrecognizedOp {
                    line,
                    op: other.to_string(),
                });
            }
        };
        Ok(command)
    }
}

/// Read engine commands from a csv file
pub fn read_commands(
    path: &Path,
) -> Result<impl Iterator<Item = Result<Command, CsvError>> + use<>, CsvError> {
    let reader = ::csv::ReaderBuilder::new()
        .trim(::csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_command(line)
        }))
}

/// Write cart lines in csv format
pub fn write_cart(items: &[CartItem], writer: impl io::Write) -> Result<(), ::csv::Error> {
    let mut writer = ::csv::Writer::from_writer(writer);

    for item in items {
        writer.serialize(OutputRow {
            unique_id: item.unique_id.as_str(),
            product: item.product_id.as_str(),
            size: &item.size,
            color: &item.color,
            quantity: item.quantity,
        })?;
    }

    writer.flush()?;
    Ok(())
}
