//! Operation kinds served by the task server and the status taxonomy of
//! their responses.

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::fmt;
use std::str::FromStr;

/// The error returned when a request names an operation this worker does not
/// implement.
#[derive(Debug, Snafu)]
#[snafu(display("unknown operation kind: {}", name))]
pub struct UnknownOperation {
    name: String,
}

/// The operations a worker serves against its owned partitions.
///
/// The wire discriminator (`tipoOperacion`) of each variant is the string
/// returned by [`OperationKind::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Read the balance of one account.
    QueryBalance,
    /// Atomically move funds between two accounts of one partition.
    TransferFunds,
    /// 2PC participant step: assert the source can cover the debit.
    PrepareDebit,
    /// 2PC participant step: apply a previously prepared debit.
    ConfirmDebit,
    /// 2PC participant step: undo a previously prepared debit.
    RevertDebit,
    /// 2PC participant step: credit the destination account.
    ApplyCredit,
    /// Overwrite an account balance with an absolute value supplied by the
    /// authoritative owner of a replicated partition.
    UpdateReplicaBalance,
    /// Audit: sum every balance in a partition.
    SumPartitionBalances,
}

impl OperationKind {
    /// The wire name of this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueryBalance => "CONSULTAR_SALDO",
            Self::TransferFunds => "TRANSFERIR_FONDOS",
            Self::PrepareDebit => "PREPARAR_DEBITO",
            Self::ConfirmDebit => "CONFIRMAR_DEBITO",
            Self::RevertDebit => "REVERTIR_DEBITO",
            Self::ApplyCredit => "APLICAR_CREDITO",
            Self::UpdateReplicaBalance => "ACTUALIZAR_SALDO_REPLICA",
            Self::SumPartitionBalances => "CALCULAR_SALDO_PARTICION",
        }
    }
}

impl FromStr for OperationKind {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONSULTAR_SALDO" => Ok(Self::QueryBalance),
            "TRANSFERIR_FONDOS" => Ok(Self::TransferFunds),
            "PREPARAR_DEBITO" => Ok(Self::PrepareDebit),
            "CONFIRMAR_DEBITO" => Ok(Self::ConfirmDebit),
            "REVERTIR_DEBITO" => Ok(Self::RevertDebit),
            "APLICAR_CREDITO" => Ok(Self::ApplyCredit),
            "ACTUALIZAR_SALDO_REPLICA" => Ok(Self::UpdateReplicaBalance),
            "CALCULAR_SALDO_PARTICION" => Ok(Self::SumPartitionBalances),
            _ => Err(UnknownOperation { name: s.to_string() }),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The complete status taxonomy of operation responses (`estado` on the
/// wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    /// The operation completed.
    #[serde(rename = "EXITO")]
    Success,

    /// The source balance cannot cover the requested amount.
    #[serde(rename = "ERROR_SALDO_INSUFICIENTE")]
    InsufficientFunds,

    /// The source account is not present in the partition.
    #[serde(rename = "ERROR_CUENTA_ORIGEN_NO_EXISTE")]
    SourceAccountMissing,

    /// The destination account is not present in the partition.
    #[serde(rename = "ERROR_CUENTA_DESTINO_NO_EXISTE")]
    DestinationAccountMissing,

    /// Catch-all server-side failure: bad parameters, foreign partition,
    /// storage errors, unsupported operations.
    #[serde(rename = "ERROR_GENERAL_SERVIDOR")]
    ServerError,

    /// Transport-level failure reported by a peer.
    #[serde(rename = "ERROR_COMUNICACION")]
    CommunicationError,

    /// 2PC: the debit is prepared (sufficiency asserted, no funds moved).
    #[serde(rename = "DEBITO_PREPARADO_OK")]
    DebitPrepared,

    /// 2PC: the prepared debit has been applied.
    #[serde(rename = "DEBITO_CONFIRMADO_OK")]
    DebitConfirmed,

    /// 2PC: the prepared debit has been undone.
    #[serde(rename = "DEBITO_REVERTIDO_OK")]
    DebitReverted,

    /// 2PC: the credit has been applied to the destination.
    #[serde(rename = "CREDITO_APLICADO_OK")]
    CreditApplied,

    /// A replica balance has been overwritten with the supplied value.
    #[serde(rename = "REPLICA_ACTUALIZADA_OK")]
    ReplicaUpdated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_kind_round_trips_through_wire_name() {
        let kinds = [
            OperationKind::QueryBalance,
            OperationKind::TransferFunds,
            OperationKind::PrepareDebit,
            OperationKind::ConfirmDebit,
            OperationKind::RevertDebit,
            OperationKind::ApplyCredit,
            OperationKind::UpdateReplicaBalance,
            OperationKind::SumPartitionBalances,
        ];
        for kind in kinds {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_operation_kind_is_rejected() {
        let err = "ABRIR_CUENTA".parse::<OperationKind>().unwrap_err();
        assert!(err.to_string().contains("ABRIR_CUENTA"));
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&OperationStatus::Success).unwrap(),
            r#""EXITO""#
        );
        assert_eq!(
            serde_json::to_string(&OperationStatus::InsufficientFunds).unwrap(),
            r#""ERROR_SALDO_INSUFICIENTE""#
        );
        assert_eq!(
            serde_json::to_string(&OperationStatus::DebitPrepared).unwrap(),
            r#""DEBITO_PREPARADO_OK""#
        );
        let back: OperationStatus = serde_json::from_str(r#""REPLICA_ACTUALIZADA_OK""#).unwrap();
        assert_eq!(back, OperationStatus::ReplicaUpdated);
    }
}
