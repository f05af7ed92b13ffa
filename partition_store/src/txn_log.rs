//! The append-only journal of attempted operations.
//!
//! One line per durable-state operation attempt, success or failure. The
//! journal is advisory: it is written for audit and never consulted to
//! recover state, so append failures are logged and swallowed rather than
//! failing the operation that triggered them.

use chrono::Local;
use data_types::accounts::{AccountId, GlobalTxId};
use data_types::worker_id::WorkerId;
use observability_deps::tracing::error;
use parking_lot::Mutex;
use snafu::{ResultExt, Snafu};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the journal inside the worker data directory.
pub const TRANSACTION_LOG_FILE: &str = "transacciones_locales.log";

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("error opening transaction log {}: {}", path.display(), source))]
    OpenTransactionLog {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The outcome of one attempted operation, as recorded in the journal.
///
/// The on-disk tag is the wire-stable string returned by [`Outcome::tag`]
/// suffixed with `_W<workerId>`; audit tooling pattern-matches on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A transfer was rejected because the source could not cover it.
    TransferRejectedInsufficientFunds,
    /// A transfer failed because the destination does not exist.
    TransferFailedMissingDestination,
    /// An intra-partition transfer was applied.
    TransferApplied,
    /// A transfer reached the write step and the write failed.
    TransferFailedWrite,
    /// A 2PC debit was prepared (sufficiency asserted).
    DebitPrepared,
    /// A 2PC credit was applied to the destination.
    CreditApplied,
    /// A 2PC debit was confirmed and applied.
    DebitConfirmed,
    /// A 2PC debit was reverted.
    DebitReverted,
}

impl Outcome {
    /// The wire-stable tag of this outcome, without the worker suffix.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::TransferRejectedInsufficientFunds => "RECHAZADA_SALDO_INSUF",
            Self::TransferFailedMissingDestination => "FALLIDA_DESTINO_NO_EXISTE",
            Self::TransferApplied => "EXITO_INTRA_PARTICION",
            Self::TransferFailedWrite => "FALLIDA_ESCRITURA",
            Self::DebitPrepared => "PREPARAR_DEBITO_OK",
            Self::CreditApplied => "APLICAR_CREDITO_OK",
            Self::DebitConfirmed => "CONFIRMAR_DEBITO_OK",
            Self::DebitReverted => "REVERTIR_DEBITO_OK",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One journal entry. Absent accounts (a prepare has no destination, a
/// credit no source) are recorded as `-1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogRecord {
    /// The global transaction this attempt belongs to, or
    /// [`GlobalTxId::NONE`].
    pub global_tx_id: GlobalTxId,
    /// Source account, if the operation has one.
    pub source: Option<AccountId>,
    /// Destination account, if the operation has one.
    pub destination: Option<AccountId>,
    /// The amount involved.
    pub amount: f64,
    /// What happened.
    pub outcome: Outcome,
}

/// The journal file, held open for the life of the process. Appends are
/// serialized by a single mutex.
#[derive(Debug)]
pub struct TransactionLog {
    worker_id: WorkerId,
    file: Mutex<File>,
}

impl TransactionLog {
    /// Open (creating if needed) the journal inside `data_dir`.
    pub fn open(data_dir: &Path, worker_id: WorkerId) -> Result<Self, Error> {
        let path = data_dir.join(TRANSACTION_LOG_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(OpenTransactionLogSnafu { path })?;
        Ok(Self {
            worker_id,
            file: Mutex::new(file),
        })
    }

    /// Append one entry. Transient I/O failures are logged and swallowed so
    /// the triggering operation still completes.
    pub fn append(&self, record: &LogRecord) {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.6f");
        let line = format!(
            "TxGlobal:{}|{}|{}|{:.2}|{}|{}_W{}\n",
            record.global_tx_id,
            record.source.map_or(-1, |a| a.get()),
            record.destination.map_or(-1, |a| a.get()),
            record.amount,
            timestamp,
            record.outcome,
            self.worker_id,
        );

        let mut file = self.file.lock();
        if let Err(e) = file.write_all(line.as_bytes()) {
            error!(%e, "could not append to the transaction log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn read_log(dir: &Path) -> String {
        fs::read_to_string(dir.join(TRANSACTION_LOG_FILE)).unwrap()
    }

    #[test]
    fn append_writes_tagged_pipe_delimited_lines() {
        let dir = test_helpers::tmp_dir().unwrap();
        let log = TransactionLog::open(dir.path(), WorkerId::new("w1")).unwrap();

        log.append(&LogRecord {
            global_tx_id: GlobalTxId::new(7),
            source: Some(AccountId::new(100001)),
            destination: Some(AccountId::new(100002)),
            amount: 500.0,
            outcome: Outcome::TransferApplied,
        });

        let contents = read_log(dir.path());
        let line = contents.lines().next().unwrap();
        let fields: Vec<&str> = line.split('|').collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], "TxGlobal:7");
        assert_eq!(fields[1], "100001");
        assert_eq!(fields[2], "100002");
        assert_eq!(fields[3], "500.00");
        assert_eq!(fields[5], "EXITO_INTRA_PARTICION_Ww1");
    }

    #[test]
    fn absent_accounts_are_recorded_as_minus_one() {
        let dir = test_helpers::tmp_dir().unwrap();
        let log = TransactionLog::open(dir.path(), WorkerId::new("w2")).unwrap();

        log.append(&LogRecord {
            global_tx_id: GlobalTxId::NONE,
            source: Some(AccountId::new(42)),
            destination: None,
            amount: 10.0,
            outcome: Outcome::DebitPrepared,
        });

        let contents = read_log(dir.path());
        assert!(contents.starts_with("TxGlobal:-1|42|-1|10.00|"));
        assert!(contents.trim_end().ends_with("PREPARAR_DEBITO_OK_Ww2"));
    }

    #[test]
    fn appends_accumulate_in_order() {
        let dir = test_helpers::tmp_dir().unwrap();
        let log = TransactionLog::open(dir.path(), WorkerId::new("w1")).unwrap();

        for outcome in [Outcome::DebitPrepared, Outcome::DebitConfirmed] {
            log.append(&LogRecord {
                global_tx_id: GlobalTxId::new(1),
                source: Some(AccountId::new(1)),
                destination: None,
                amount: 1.0,
                outcome,
            });
        }

        let contents = read_log(dir.path());
        let tags: Vec<&str> = contents
            .lines()
            .map(|l| l.rsplit('|').next().unwrap())
            .collect();
        assert_eq!(
            tags,
            vec!["PREPARAR_DEBITO_OK_Ww1", "CONFIRMAR_DEBITO_OK_Ww1"]
        );
    }

    #[test]
    fn reopening_appends_rather_than_truncating() {
        let dir = test_helpers::tmp_dir().unwrap();

        {
            let log = TransactionLog::open(dir.path(), WorkerId::new("w1")).unwrap();
            log.append(&LogRecord {
                global_tx_id: GlobalTxId::new(1),
                source: None,
                destination: Some(AccountId::new(2)),
                amount: 5.0,
                outcome: Outcome::CreditApplied,
            });
        }
        {
            let log = TransactionLog::open(dir.path(), WorkerId::new("w1")).unwrap();
            log.append(&LogRecord {
                global_tx_id: GlobalTxId::new(2),
                source: None,
                destination: Some(AccountId::new(2)),
                amount: 6.0,
                outcome: Outcome::CreditApplied,
            });
        }

        assert_eq!(read_log(dir.path()).lines().count(), 2);
    }
}
