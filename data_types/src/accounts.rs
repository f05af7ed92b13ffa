//! Account and client rows as exchanged with the coordinator and stored in
//! partition files.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies an account within a partition.
///
/// Account ids are unique within a partition; a partition scan finds at most
/// one row per id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    /// Wrap a raw account id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a client (account holder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(i64);

impl ClientId {
    /// Wrap a raw client id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The coordinator-assigned identifier threading one logical transaction
/// across the workers participating in it.
///
/// Requests that are not part of a global transaction carry the sentinel
/// value [`GlobalTxId::NONE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalTxId(i64);

impl GlobalTxId {
    /// Sentinel for operations outside any global transaction.
    pub const NONE: Self = Self(-1);

    /// Wrap a raw global transaction id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for GlobalTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One account row of an account partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// The account id, unique within its partition.
    #[serde(rename = "idCuenta")]
    pub id: AccountId,

    /// The owning client.
    #[serde(rename = "idCliente")]
    pub client_id: ClientId,

    /// Current balance. Rendered with exactly two fractional digits when
    /// persisted.
    #[serde(rename = "saldo")]
    pub balance: f64,

    /// Free-form account kind ("Corriente", "Ahorros", ...).
    #[serde(rename = "tipoCuenta")]
    pub kind: String,
}

/// One client row of a client partition. Reference data only: never mutated
/// by any in-scope operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// The client id.
    #[serde(rename = "idCliente")]
    pub id: ClientId,

    /// Display name.
    #[serde(rename = "nombre")]
    pub name: String,

    /// Contact email.
    #[serde(rename = "email")]
    pub email: String,

    /// Contact phone number.
    #[serde(rename = "telefono")]
    pub phone: String,
}
