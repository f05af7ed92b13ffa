//! Partition naming and schema dispatch.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Prefix of partition ids that hold account rows.
pub const ACCOUNT_PARTITION_PREFIX: &str = "CUENTA_";

/// Prefix of partition ids that hold client rows.
pub const CLIENT_PARTITION_PREFIX: &str = "CLIENTE_";

/// The row schema a partition holds, inferred from its id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    /// `CUENTA_Pn`: account rows (`ID_CUENTA|ID_CLIENTE|SALDO|TIPO_CUENTA`).
    Accounts,
    /// `CLIENTE_Pn`: client rows (`ID_CLIENTE|NOMBRE|EMAIL|TELEFONO`).
    Clients,
}

/// The name of one shard of account or client rows, e.g. `CUENTA_P1`.
///
/// Each partition is owned by exactly one worker, which is authoritative for
/// its writes. The id doubles as the stem of the partition's on-disk file
/// name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(String);

impl PartitionId {
    /// Create a partition id from its wire name.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The schema of the rows this partition holds, or `None` if the id
    /// carries an unknown prefix.
    pub fn kind(&self) -> Option<PartitionKind> {
        if self.0.starts_with(ACCOUNT_PARTITION_PREFIX) {
            Some(PartitionKind::Accounts)
        } else if self.0.starts_with(CLIENT_PARTITION_PREFIX) {
            Some(PartitionKind::Clients)
        } else {
            None
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl Borrow<str> for PartitionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_prefix() {
        assert_eq!(
            PartitionId::new("CUENTA_P1").kind(),
            Some(PartitionKind::Accounts)
        );
        assert_eq!(
            PartitionId::new("CLIENTE_P4").kind(),
            Some(PartitionKind::Clients)
        );
        assert_eq!(PartitionId::new("VENTAS_P1").kind(), None);
    }

    #[test]
    fn serializes_as_bare_string() {
        let id = PartitionId::new("CUENTA_P2");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""CUENTA_P2""#);
    }
}
