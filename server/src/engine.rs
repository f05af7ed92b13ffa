//! The operation engine: pure operation semantics against the partition
//! store, independent of any transport.
//!
//! Every mutating operation runs under the writer mutex of its partition,
//! so concurrent transfers against one partition serialize while reads
//! proceed lock-free (the store's rename discipline guarantees they never
//! observe a torn file).

use data_types::accounts::{AccountId, GlobalTxId};
use data_types::operation::{OperationKind, OperationStatus};
use data_types::partition::PartitionId;
use data_types::worker_id::WorkerId;
use observability_deps::tracing::{debug, error, info, warn};
use parking_lot::{Mutex, MutexGuard};
use partition_store::store;
use partition_store::{LogRecord, Outcome, PartitionStore, TransactionLog};
use serde_json::{json, Map, Value};
use snafu::Snafu;
use std::collections::BTreeMap;
use std::sync::Arc;
use wire::message::{TaskRequest, TaskResponse};

const PARAM_PARTITION: &str = "ID_PARTICION";
const PARAM_GLOBAL_TX: &str = "ID_TRANSACCION_GLOBAL";
const PARAM_ACCOUNT: &str = "ID_CUENTA";
const PARAM_SOURCE: &str = "ID_CUENTA_ORIGEN";
const PARAM_DESTINATION: &str = "ID_CUENTA_DESTINO";
const PARAM_AMOUNT: &str = "MONTO";
const PARAM_NEW_BALANCE: &str = "NUEVO_SALDO";

/// A required request parameter was absent or of the wrong shape.
///
/// Presence is what matters: an amount of `0` is a present parameter and is
/// served as a no-op success, not rejected.
#[derive(Debug, Snafu)]
#[snafu(display("parameters incomplete: missing {}", field))]
pub struct MissingParam {
    field: &'static str,
}

/// Typed access to the `parametros` mapping of a request.
struct Params<'a>(&'a Map<String, Value>);

impl Params<'_> {
    fn account(&self, key: &'static str) -> Result<AccountId, MissingParam> {
        self.0
            .get(key)
            .and_then(Value::as_i64)
            .map(AccountId::new)
            .ok_or(MissingParam { field: key })
    }

    fn decimal(&self, key: &'static str) -> Result<f64, MissingParam> {
        self.0
            .get(key)
            .and_then(Value::as_f64)
            .ok_or(MissingParam { field: key })
    }

    fn partition(&self) -> Result<PartitionId, MissingParam> {
        self.opt_partition().ok_or(MissingParam {
            field: PARAM_PARTITION,
        })
    }

    fn opt_partition(&self) -> Option<PartitionId> {
        self.0
            .get(PARAM_PARTITION)
            .and_then(Value::as_str)
            .map(PartitionId::new)
    }

    fn global_tx(&self) -> GlobalTxId {
        self.0
            .get(PARAM_GLOBAL_TX)
            .and_then(Value::as_i64)
            .map(GlobalTxId::new)
            .unwrap_or(GlobalTxId::NONE)
    }
}

/// Which way a prepared debit is settled.
#[derive(Debug, Clone, Copy)]
enum DebitSettlement {
    Confirm,
    Revert,
}

/// Serves every operation of the task protocol against the partitions this
/// worker owns.
///
/// The ownership set is fixed at construction (i.e. at registration) and
/// doubles as the writer-mutex table: one mutex per owned partition, held
/// across the full read → compute → update sequence of each mutation.
#[derive(Debug)]
pub struct OperationEngine {
    worker_id: WorkerId,
    store: Arc<PartitionStore>,
    txn_log: Arc<TransactionLog>,
    partitions: BTreeMap<PartitionId, Mutex<()>>,
}

impl OperationEngine {
    /// Create an engine serving `partitions` from `store`, journaling to
    /// `txn_log`.
    pub fn new(
        worker_id: WorkerId,
        partitions: impl IntoIterator<Item = PartitionId>,
        store: Arc<PartitionStore>,
        txn_log: Arc<TransactionLog>,
    ) -> Self {
        let partitions = partitions
            .into_iter()
            .map(|partition| (partition, Mutex::new(())))
            .collect();
        Self {
            worker_id,
            store,
            txn_log,
            partitions,
        }
    }

    /// The id this engine signs its responses with.
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Whether this worker is authoritative for `partition`.
    pub fn owns(&self, partition: &PartitionId) -> bool {
        self.partitions.contains_key(partition)
    }

    fn writer_guard(&self, partition: &PartitionId) -> MutexGuard<'_, ()> {
        self.partitions
            .get(partition)
            .expect("partition ownership verified before dispatch")
            .lock()
    }

    /// Serve one request. Never panics on malformed input; every failure is
    /// reported in the response.
    pub fn process(&self, request: &TaskRequest) -> TaskResponse {
        let params = Params(&request.params);

        let kind = match request.operation.parse::<OperationKind>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!(operation = %request.operation, "rejecting unsupported operation");
                return TaskResponse::new(OperationStatus::ServerError, e.to_string());
            }
        };

        // Every partition-scoped request must name a partition this worker
        // owns, before any other validation.
        if let Some(partition) = params.opt_partition() {
            if !self.owns(&partition) {
                warn!(%partition, %kind, "request names a partition this worker does not own");
                return TaskResponse::new(
                    OperationStatus::ServerError,
                    format!(
                        "worker {} does not own partition {partition}",
                        self.worker_id
                    ),
                );
            }
        }

        debug!(%kind, "dispatching operation");
        let result = match kind {
            OperationKind::QueryBalance => self.query_balance(&params),
            OperationKind::TransferFunds => self.transfer_funds(&params),
            OperationKind::PrepareDebit => self.prepare_debit(&params),
            OperationKind::ConfirmDebit => {
                self.settle_prepared_debit(&params, DebitSettlement::Confirm)
            }
            OperationKind::RevertDebit => {
                self.settle_prepared_debit(&params, DebitSettlement::Revert)
            }
            OperationKind::ApplyCredit => self.apply_credit(&params),
            OperationKind::UpdateReplicaBalance => self.update_replica_balance(&params),
            OperationKind::SumPartitionBalances => self.sum_partition_balances(&params),
        };

        result.unwrap_or_else(|e| TaskResponse::new(OperationStatus::ServerError, e.to_string()))
    }

    fn storage_failure(&self, kind: OperationKind, e: &store::Error) -> TaskResponse {
        error!(%kind, %e, "storage failure");
        TaskResponse::new(
            OperationStatus::ServerError,
            format!("storage failure during {kind}"),
        )
    }

    fn query_balance(&self, params: &Params<'_>) -> Result<TaskResponse, MissingParam> {
        let account = params.account(PARAM_ACCOUNT)?;
        let partition = params.partition()?;

        match self.store.read_balance(&partition, account) {
            Ok(Some(balance)) => Ok(TaskResponse::with_payload(
                OperationStatus::Success,
                format!("balance: {balance}"),
                json!(balance),
            )),
            Ok(None) => Ok(TaskResponse::new(
                OperationStatus::SourceAccountMissing,
                format!("account {account} does not exist in partition {partition}"),
            )),
            Err(e) => Ok(self.storage_failure(OperationKind::QueryBalance, &e)),
        }
    }

    fn transfer_funds(&self, params: &Params<'_>) -> Result<TaskResponse, MissingParam> {
        let source = params.account(PARAM_SOURCE)?;
        let destination = params.account(PARAM_DESTINATION)?;
        let amount = params.decimal(PARAM_AMOUNT)?;
        let partition = params.partition()?;
        let global_tx_id = params.global_tx();

        let _writer = self.writer_guard(&partition);

        let source_balance = match self.store.read_balance(&partition, source) {
            Ok(Some(balance)) => balance,
            Ok(None) => {
                return Ok(TaskResponse::new(
                    OperationStatus::SourceAccountMissing,
                    format!("source account {source} does not exist"),
                ))
            }
            Err(e) => return Ok(self.storage_failure(OperationKind::TransferFunds, &e)),
        };

        if source_balance < amount {
            self.txn_log.append(&LogRecord {
                global_tx_id,
                source: Some(source),
                destination: Some(destination),
                amount,
                outcome: Outcome::TransferRejectedInsufficientFunds,
            });
            return Ok(TaskResponse::with_payload(
                OperationStatus::InsufficientFunds,
                format!("insufficient funds in account {source}"),
                json!(source_balance),
            ));
        }

        let destination_balance = match self.store.read_balance(&partition, destination) {
            Ok(Some(balance)) => balance,
            Ok(None) => {
                self.txn_log.append(&LogRecord {
                    global_tx_id,
                    source: Some(source),
                    destination: Some(destination),
                    amount,
                    outcome: Outcome::TransferFailedMissingDestination,
                });
                return Ok(TaskResponse::new(
                    OperationStatus::DestinationAccountMissing,
                    format!("destination account {destination} does not exist"),
                ));
            }
            Err(e) => return Ok(self.storage_failure(OperationKind::TransferFunds, &e)),
        };

        let new_source_balance = source_balance - amount;
        let new_destination_balance = destination_balance + amount;

        match self.store.update_two(
            &partition,
            source,
            new_source_balance,
            destination,
            new_destination_balance,
        ) {
            Ok(()) => {
                self.txn_log.append(&LogRecord {
                    global_tx_id,
                    source: Some(source),
                    destination: Some(destination),
                    amount,
                    outcome: Outcome::TransferApplied,
                });
                info!(
                    %partition, %source, %destination, amount,
                    "intra-partition transfer applied"
                );
                Ok(TaskResponse::with_payload(
                    OperationStatus::Success,
                    format!("intra-partition transfer applied by {}", self.worker_id),
                    json!({
                        "nuevoSaldoOrigen": new_source_balance,
                        "nuevoSaldoDestino": new_destination_balance,
                        "workerIdProcesador": self.worker_id.as_str(),
                    }),
                ))
            }
            Err(e) => {
                error!(%partition, %e, "transfer write failed");
                self.txn_log.append(&LogRecord {
                    global_tx_id,
                    source: Some(source),
                    destination: Some(destination),
                    amount,
                    outcome: Outcome::TransferFailedWrite,
                });
                Ok(TaskResponse::new(
                    OperationStatus::ServerError,
                    format!("write failure in partition {partition}"),
                ))
            }
        }
    }

    fn prepare_debit(&self, params: &Params<'_>) -> Result<TaskResponse, MissingParam> {
        let source = params.account(PARAM_SOURCE)?;
        let amount = params.decimal(PARAM_AMOUNT)?;
        let partition = params.partition()?;
        let global_tx_id = params.global_tx();

        // Prepare only asserts sufficiency. It moves no funds, so it takes
        // no writer lock and a rejection leaves no journal entry.
        let source_balance = match self.store.read_balance(&partition, source) {
            Ok(Some(balance)) => balance,
            Ok(None) => {
                return Ok(TaskResponse::new(
                    OperationStatus::SourceAccountMissing,
                    format!("source account {source} does not exist"),
                ))
            }
            Err(e) => return Ok(self.storage_failure(OperationKind::PrepareDebit, &e)),
        };

        if source_balance < amount {
            return Ok(TaskResponse::with_payload(
                OperationStatus::InsufficientFunds,
                format!("insufficient funds in account {source}"),
                json!(source_balance),
            ));
        }

        self.txn_log.append(&LogRecord {
            global_tx_id,
            source: Some(source),
            destination: None,
            amount,
            outcome: Outcome::DebitPrepared,
        });
        Ok(TaskResponse::with_payload(
            OperationStatus::DebitPrepared,
            format!("debit prepared by {}", self.worker_id),
            json!({
                "saldoActualOrigen": source_balance,
                "workerIdProcesador": self.worker_id.as_str(),
            }),
        ))
    }

    fn settle_prepared_debit(
        &self,
        params: &Params<'_>,
        settlement: DebitSettlement,
    ) -> Result<TaskResponse, MissingParam> {
        let source = params.account(PARAM_SOURCE)?;
        let amount = params.decimal(PARAM_AMOUNT)?;
        let partition = params.partition()?;
        let global_tx_id = params.global_tx();

        let kind = match settlement {
            DebitSettlement::Confirm => OperationKind::ConfirmDebit,
            DebitSettlement::Revert => OperationKind::RevertDebit,
        };

        let _writer = self.writer_guard(&partition);

        let source_balance = match self.store.read_balance(&partition, source) {
            Ok(Some(balance)) => balance,
            Ok(None) => {
                return Ok(TaskResponse::new(
                    OperationStatus::SourceAccountMissing,
                    format!("source account {source} does not exist"),
                ))
            }
            Err(e) => return Ok(self.storage_failure(kind, &e)),
        };

        let new_balance = match settlement {
            DebitSettlement::Confirm => source_balance - amount,
            DebitSettlement::Revert => source_balance + amount,
        };

        match self.store.update_one(&partition, source, new_balance) {
            Ok(()) => {
                let (status, outcome, verb) = match settlement {
                    DebitSettlement::Confirm => (
                        OperationStatus::DebitConfirmed,
                        Outcome::DebitConfirmed,
                        "confirmed",
                    ),
                    DebitSettlement::Revert => (
                        OperationStatus::DebitReverted,
                        Outcome::DebitReverted,
                        "reverted",
                    ),
                };
                self.txn_log.append(&LogRecord {
                    global_tx_id,
                    source: Some(source),
                    destination: None,
                    amount,
                    outcome,
                });
                Ok(TaskResponse::with_payload(
                    status,
                    format!("debit {verb} by {}", self.worker_id),
                    json!({
                        "nuevoSaldoOrigen": new_balance,
                        "workerIdProcesador": self.worker_id.as_str(),
                    }),
                ))
            }
            Err(e) => Ok(self.storage_failure(kind, &e)),
        }
    }

    fn apply_credit(&self, params: &Params<'_>) -> Result<TaskResponse, MissingParam> {
        let destination = params.account(PARAM_DESTINATION)?;
        let amount = params.decimal(PARAM_AMOUNT)?;
        let partition = params.partition()?;
        let global_tx_id = params.global_tx();

        let _writer = self.writer_guard(&partition);

        let destination_balance = match self.store.read_balance(&partition, destination) {
            Ok(Some(balance)) => balance,
            Ok(None) => {
                return Ok(TaskResponse::new(
                    OperationStatus::DestinationAccountMissing,
                    format!("destination account {destination} does not exist"),
                ))
            }
            Err(e) => return Ok(self.storage_failure(OperationKind::ApplyCredit, &e)),
        };

        let new_balance = destination_balance + amount;
        match self.store.update_one(&partition, destination, new_balance) {
            Ok(()) => {
                self.txn_log.append(&LogRecord {
                    global_tx_id,
                    source: None,
                    destination: Some(destination),
                    amount,
                    outcome: Outcome::CreditApplied,
                });
                Ok(TaskResponse::with_payload(
                    OperationStatus::CreditApplied,
                    format!("credit applied by {}", self.worker_id),
                    json!({
                        "nuevoSaldoDestino": new_balance,
                        "workerIdProcesador": self.worker_id.as_str(),
                    }),
                ))
            }
            Err(e) => Ok(self.storage_failure(OperationKind::ApplyCredit, &e)),
        }
    }

    fn update_replica_balance(&self, params: &Params<'_>) -> Result<TaskResponse, MissingParam> {
        let account = params.account(PARAM_ACCOUNT)?;
        let new_balance = params.decimal(PARAM_NEW_BALANCE)?;
        let partition = params.partition()?;
        let global_tx_id = params.global_tx();

        let _writer = self.writer_guard(&partition);

        match self.store.update_one(&partition, account, new_balance) {
            Ok(()) => {
                info!(%partition, %account, tx = %global_tx_id, "replica balance updated");
                Ok(TaskResponse::new(
                    OperationStatus::ReplicaUpdated,
                    format!("replica updated by {}", self.worker_id),
                ))
            }
            Err(e) => Ok(self.storage_failure(OperationKind::UpdateReplicaBalance, &e)),
        }
    }

    fn sum_partition_balances(&self, params: &Params<'_>) -> Result<TaskResponse, MissingParam> {
        let partition = params.partition()?;

        match self.store.sum_balances(&partition) {
            Ok(total) => {
                info!(%partition, total, "partition audit sum computed");
                Ok(TaskResponse::with_payload(
                    OperationStatus::Success,
                    format!("sum of balances in partition {partition}"),
                    json!(total),
                ))
            }
            Err(e) => Ok(self.storage_failure(OperationKind::SumPartitionBalances, &e)),
        }
    }
}
