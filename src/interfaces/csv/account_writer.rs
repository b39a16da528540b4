use crate::domain::account::Account;
use crate::error::Result;
use std::io::Write;

/// Writes account snapshots as CSV, sorted by account id so output is
/// deterministic regardless of store iteration order.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_accounts(&mut self, mut accounts: Vec<Account>) -> Result<()> {
        accounts.sort_by(|a, b| a.id.0.cmp(&b.id.0));

        self.writer
            .write_record(["id", "owner", "currency", "balance", "version"])?;
        for account in accounts {
            self.writer.write_record([
                account.id.0.as_str(),
                account.owner_id.0.as_str(),
                account.currency.as_str(),
                &account.balance.0.to_string(),
                &account.version.to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
