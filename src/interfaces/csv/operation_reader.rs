use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Open,
    Deposit,
    Withdrawal,
    Transfer,
    Retire,
}

/// One row of the operations CSV.
///
/// `open` rows carry `currency`; monetary rows carry `amount`, transfers a
/// `to` account, and any monetary row may carry an idempotence `key`.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct OperationRecord {
    pub r#type: OpType,
    pub owner: String,
    pub account: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

/// Reads ledger operations from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// and yields rows lazily so large batches stream without loading the whole
/// file.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    /// Creates a new `OperationReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn operations(self) -> impl Iterator<Item = Result<OperationRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "type, owner, account, to, amount, currency, key\n\
                    open, u1, a1, , , KES, \n\
                    deposit, u1, a1, , 1000.0, , k1\n\
                    transfer, u1, a1, a2, 200.0, , ";
        let reader = OperationReader::new(data.as_bytes());
        let results: Vec<Result<OperationRecord>> = reader.operations().collect();

        assert_eq!(results.len(), 3);
        let open = results[0].as_ref().unwrap();
        assert_eq!(open.r#type, OpType::Open);
        assert_eq!(open.currency.as_deref(), Some("KES"));
        assert_eq!(open.amount, None);

        let deposit = results[1].as_ref().unwrap();
        assert_eq!(deposit.amount, Some(dec!(1000.0)));
        assert_eq!(deposit.key.as_deref(), Some("k1"));

        let transfer = results[2].as_ref().unwrap();
        assert_eq!(transfer.to.as_deref(), Some("a2"));
        assert_eq!(transfer.key, None);
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "type, owner, account, to, amount, currency, key\n\
                    invalid, u1, a1, , 1.0, , ";
        let reader = OperationReader::new(data.as_bytes());
        let results: Vec<Result<OperationRecord>> = reader.operations().collect();

        assert!(results[0].is_err());
    }
}
