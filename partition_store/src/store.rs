//! Flat-file storage of partition rows.
//!
//! Each partition is one pipe-delimited text file named `<partitionId>.txt`
//! under the worker data directory. The first line is a header; account rows
//! are `ID_CUENTA|ID_CLIENTE|SALDO|TIPO_CUENTA` with the balance printed to
//! exactly two fractional digits. Balances are read tolerating either a
//! period or a comma decimal separator and are normalized to a period on
//! write.

use data_types::accounts::{Account, AccountId, Client};
use data_types::partition::PartitionId;
use observability_deps::tracing::{debug, warn};
use snafu::{ResultExt, Snafu};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Header line of an account partition file.
pub const ACCOUNT_FILE_HEADER: &str = "ID_CUENTA|ID_CLIENTE|SALDO|TIPO_CUENTA";

/// Header line of a client partition file.
pub const CLIENT_FILE_HEADER: &str = "ID_CLIENTE|NOMBRE|EMAIL|TELEFONO";

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("error creating data directory {}: {}", path.display(), source))]
    CreateDataDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("error reading partition file {}: {}", path.display(), source))]
    ReadPartitionFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("error writing partition file {}: {}", path.display(), source))]
    WritePartitionFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("error replacing partition file {}: {}", path.display(), source))]
    ReplacePartitionFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("account {} not found in partition {}", account, partition))]
    AccountNotFound {
        account: AccountId,
        partition: PartitionId,
    },

    #[snafu(display("source account {} not found in partition {}", account, partition))]
    SourceAccountNotFound {
        account: AccountId,
        partition: PartitionId,
    },

    #[snafu(display(
        "destination account {} not found in partition {}",
        account,
        partition
    ))]
    DestinationAccountNotFound {
        account: AccountId,
        partition: PartitionId,
    },
}

/// A specialized `Result` for partition store errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What a single rewrite pass observed.
enum RewriteOutcome {
    /// Every requested row was rewritten and the file was replaced.
    Applied,
    /// This account was never observed; the file was left untouched.
    Missing(AccountId),
}

/// The flat-file store for every partition assigned to this worker.
///
/// The store itself is stateless apart from the directory path: callers that
/// mutate one partition concurrently must serialize those writers
/// externally (the operation engine holds one writer mutex per partition).
#[derive(Debug)]
pub struct PartitionStore {
    data_dir: PathBuf,
}

impl PartitionStore {
    /// Open the store rooted at `data_dir`, creating the directory if
    /// needed.
    pub fn create(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).context(CreateDataDirSnafu {
            path: data_dir.clone(),
        })?;
        Ok(Self { data_dir })
    }

    /// The directory holding the partition files and the transaction log.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn partition_path(&self, partition: &PartitionId) -> PathBuf {
        self.data_dir.join(format!("{partition}.txt"))
    }

    /// Create (or overwrite) an account partition file from seed rows.
    pub fn materialize_accounts(
        &self,
        partition: &PartitionId,
        rows: &[Account],
    ) -> Result<()> {
        let mut contents = String::with_capacity(64 * (rows.len() + 1));
        contents.push_str(ACCOUNT_FILE_HEADER);
        contents.push('\n');
        for row in rows {
            writeln!(
                contents,
                "{}|{}|{:.2}|{}",
                row.id, row.client_id, row.balance, row.kind
            )
            .expect("writing to a String is infallible");
        }

        let path = self.partition_path(partition);
        fs::write(&path, contents).context(WritePartitionFileSnafu { path })
    }

    /// Create (or overwrite) a client partition file from seed rows.
    pub fn materialize_clients(&self, partition: &PartitionId, rows: &[Client]) -> Result<()> {
        let mut contents = String::with_capacity(64 * (rows.len() + 1));
        contents.push_str(CLIENT_FILE_HEADER);
        contents.push('\n');
        for row in rows {
            writeln!(contents, "{}|{}|{}|{}", row.id, row.name, row.email, row.phone)
                .expect("writing to a String is infallible");
        }

        let path = self.partition_path(partition);
        fs::write(&path, contents).context(WritePartitionFileSnafu { path })
    }

    /// Stream the partition file and return the balance of `account`, or
    /// `None` if no row carries that id. Malformed lines are skipped with a
    /// warning.
    pub fn read_balance(
        &self,
        partition: &PartitionId,
        account: AccountId,
    ) -> Result<Option<f64>> {
        let path = self.partition_path(partition);
        let file = File::open(&path).context(ReadPartitionFileSnafu { path: path.clone() })?;
        let reader = BufReader::new(file);

        for (idx, line) in reader.lines().enumerate() {
            let line = line.context(ReadPartitionFileSnafu { path: path.clone() })?;
            if idx == 0 {
                continue; // header
            }
            let columns: Vec<&str> = line.trim().split('|').collect();
            if columns.len() < 3 {
                continue;
            }
            let row_id = match columns[0].parse::<i64>() {
                Ok(id) => AccountId::new(id),
                Err(_) => {
                    warn!(%partition, line = idx + 1, "skipping row with malformed account id");
                    continue;
                }
            };
            if row_id == account {
                match parse_balance(columns[2]) {
                    Some(balance) => return Ok(Some(balance)),
                    None => {
                        warn!(%partition, line = idx + 1, "skipping row with malformed balance");
                        continue;
                    }
                }
            }
        }

        Ok(None)
    }

    /// Atomically rewrite the balance of one account.
    ///
    /// Returns [`Error::AccountNotFound`] (leaving the file untouched) if
    /// the account is never observed during the full scan.
    pub fn update_one(
        &self,
        partition: &PartitionId,
        account: AccountId,
        new_balance: f64,
    ) -> Result<()> {
        match self.rewrite_balances(partition, &[(account, new_balance)])? {
            RewriteOutcome::Applied => Ok(()),
            RewriteOutcome::Missing(account) => AccountNotFoundSnafu {
                account,
                partition: partition.clone(),
            }
            .fail(),
        }
    }

    /// Atomically rewrite the balances of two accounts in one pass.
    ///
    /// If either account is missing after the full scan the original file is
    /// left untouched and the corresponding `*AccountNotFound` error is
    /// returned.
    pub fn update_two(
        &self,
        partition: &PartitionId,
        source: AccountId,
        new_source_balance: f64,
        destination: AccountId,
        new_destination_balance: f64,
    ) -> Result<()> {
        let updates = [
            (source, new_source_balance),
            (destination, new_destination_balance),
        ];
        match self.rewrite_balances(partition, &updates)? {
            RewriteOutcome::Applied => Ok(()),
            RewriteOutcome::Missing(account) if account == source => SourceAccountNotFoundSnafu {
                account,
                partition: partition.clone(),
            }
            .fail(),
            RewriteOutcome::Missing(account) => DestinationAccountNotFoundSnafu {
                account,
                partition: partition.clone(),
            }
            .fail(),
        }
    }

    /// Sum every balance in the partition. Malformed balances are skipped
    /// with a warning.
    pub fn sum_balances(&self, partition: &PartitionId) -> Result<f64> {
        let path = self.partition_path(partition);
        let file = File::open(&path).context(ReadPartitionFileSnafu { path: path.clone() })?;
        let reader = BufReader::new(file);

        let mut total = 0.0;
        for (idx, line) in reader.lines().enumerate() {
            let line = line.context(ReadPartitionFileSnafu { path: path.clone() })?;
            if idx == 0 {
                continue; // header
            }
            let columns: Vec<&str> = line.trim().split('|').collect();
            if columns.len() < 3 {
                continue;
            }
            match parse_balance(columns[2]) {
                Some(balance) => total += balance,
                None => warn!(%partition, line = idx + 1, "skipping row with malformed balance"),
            }
        }

        Ok(total)
    }

    /// Rewrite the rows named in `updates`, preserving every other byte of
    /// the file, then rename the temp file over the original.
    ///
    /// Each row is claimed by the first matching update, mirroring the
    /// source-then-destination precedence of a transfer. On every early
    /// return after the temp file exists it is discarded, so a failed
    /// rewrite never leaves state behind.
    fn rewrite_balances(
        &self,
        partition: &PartitionId,
        updates: &[(AccountId, f64)],
    ) -> Result<RewriteOutcome> {
        let path = self.partition_path(partition);
        let tmp_path = self.data_dir.join(format!("{partition}.txt.tmp"));

        let contents =
            fs::read_to_string(&path).context(ReadPartitionFileSnafu { path: path.clone() })?;

        let mut rewritten = String::with_capacity(contents.len());
        let mut applied = vec![false; updates.len()];

        for (idx, line) in contents.split_inclusive('\n').enumerate() {
            if idx == 0 {
                rewritten.push_str(line); // header
                continue;
            }
            let columns: Vec<&str> = line.trim_end().split('|').collect();
            if columns.len() < 4 {
                rewritten.push_str(line); // malformed, pass through untouched
                continue;
            }
            let row_id = match columns[0].parse::<i64>() {
                Ok(id) => AccountId::new(id),
                Err(_) => {
                    rewritten.push_str(line);
                    continue;
                }
            };
            match updates.iter().position(|(account, _)| *account == row_id) {
                Some(pos) => {
                    writeln!(
                        rewritten,
                        "{}|{}|{:.2}|{}",
                        row_id, columns[1], updates[pos].1, columns[3]
                    )
                    .expect("writing to a String is infallible");
                    applied[pos] = true;
                }
                None => rewritten.push_str(line),
            }
        }

        if let Err(e) = fs::write(&tmp_path, rewritten) {
            discard_tmp(&tmp_path);
            return Err(e).context(WritePartitionFileSnafu { path: tmp_path });
        }

        if let Some(pos) = applied.iter().position(|seen| !seen) {
            discard_tmp(&tmp_path);
            return Ok(RewriteOutcome::Missing(updates[pos].0));
        }

        if let Err(e) = fs::rename(&tmp_path, &path) {
            discard_tmp(&tmp_path);
            return Err(e).context(ReplacePartitionFileSnafu { path });
        }

        Ok(RewriteOutcome::Applied)
    }
}

/// Parse a balance column, accepting either `.` or `,` as the decimal
/// separator.
fn parse_balance(column: &str) -> Option<f64> {
    column.replace(',', ".").parse().ok()
}

fn discard_tmp(tmp_path: &Path) {
    if let Err(e) = fs::remove_file(tmp_path) {
        debug!(path = %tmp_path.display(), %e, "could not remove temp partition file");
    }
}

/// Parse every account row of `contents` into a map, used by tests and
/// audits to inspect a partition wholesale.
pub fn parse_account_rows(contents: &str) -> HashMap<i64, f64> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let columns: Vec<&str> = line.trim().split('|').collect();
            if columns.len() < 3 {
                return None;
            }
            let id = columns[0].parse::<i64>().ok()?;
            let balance = parse_balance(columns[2])?;
            Some((id, balance))
        })
        .collect()
}
