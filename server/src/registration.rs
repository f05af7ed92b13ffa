//! The outbound registration handshake with the coordinator.
//!
//! A worker announces itself, receives its partition assignment plus seed
//! rows, makes those rows durable, confirms, and waits for the final ack.
//! Any deviation fails the handshake and the caller is expected to abort
//! startup.

use data_types::accounts::{Account, Client};
use data_types::partition::{PartitionId, PartitionKind};
use data_types::worker_id::WorkerId;
use observability_deps::tracing::{info, warn};
use partition_store::PartitionStore;
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use wire::message::HandshakeMessage;
use wire::{read_message, write_message};

/// How long to wait for each coordinator reply. Generous because the
/// assignment may carry a large seed batch.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("error connecting to coordinator at {}: {}", address, source))]
    Connect {
        address: String,
        source: std::io::Error,
    },

    #[snafu(display("handshake failed during {}: {}", phase, source))]
    Handshake {
        phase: &'static str,
        source: wire::Error,
    },

    #[snafu(display("coordinator did not reply within {:?} during {}", HANDSHAKE_TIMEOUT, phase))]
    Timeout { phase: &'static str },

    #[snafu(display("unexpected {} message from coordinator during {}", got, phase))]
    UnexpectedMessage {
        got: &'static str,
        phase: &'static str,
    },

    #[snafu(display("error materializing seed rows for partition {}: {}", partition, source))]
    Materialize {
        partition: PartitionId,
        source: partition_store::store::Error,
    },
}

/// A specialized `Result` for registration errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Run the registration handshake against `coordinator_address`
/// (`host:port`), materializing every assigned partition into `store`.
///
/// Returns the owned partition set on success; the worker is then "ready"
/// and may start its task server.
pub async fn register(
    worker_id: &WorkerId,
    coordinator_address: &str,
    task_port: u16,
    store: &PartitionStore,
) -> Result<Vec<PartitionId>> {
    let mut stream = TcpStream::connect(coordinator_address)
        .await
        .context(ConnectSnafu {
            address: coordinator_address,
        })?;
    stream.set_nodelay(true).context(ConnectSnafu {
        address: coordinator_address,
    })?;
    info!(%worker_id, coordinator = coordinator_address, "connected to coordinator");

    write_message(
        &mut stream,
        &HandshakeMessage::Register {
            worker_id: worker_id.clone(),
            partitions: vec![],
            task_port,
            text: "registration request".to_string(),
        },
    )
    .await
    .context(HandshakeSnafu { phase: "register" })?;

    let assignment = expect_reply(&mut stream, "assignment").await?;
    let (partitions, seed_rows) = match assignment {
        HandshakeMessage::Assignment {
            partitions,
            seed_rows,
            ..
        } => (partitions, seed_rows),
        other => {
            return UnexpectedMessageSnafu {
                got: other.kind(),
                phase: "assignment",
            }
            .fail()
        }
    };
    info!(
        %worker_id,
        partitions = ?partitions,
        "received partition assignment"
    );

    for (partition, rows) in &seed_rows {
        materialize_partition(store, partition, rows)?;
        info!(%partition, rows = rows.len(), "seed rows stored");
    }

    write_message(
        &mut stream,
        &HandshakeMessage::SeedReceived {
            worker_id: worker_id.clone(),
            text: "partition data received and stored".to_string(),
        },
    )
    .await
    .context(HandshakeSnafu {
        phase: "seed confirmation",
    })?;

    let confirmation = expect_reply(&mut stream, "final confirmation").await?;
    match confirmation {
        HandshakeMessage::RegistrationComplete { text, .. } => {
            info!(%worker_id, detail = %text, "registration complete");
            Ok(partitions)
        }
        other => UnexpectedMessageSnafu {
            got: other.kind(),
            phase: "final confirmation",
        }
        .fail(),
    }
}

async fn expect_reply(
    stream: &mut TcpStream,
    phase: &'static str,
) -> Result<HandshakeMessage> {
    match timeout(HANDSHAKE_TIMEOUT, read_message(stream)).await {
        Ok(result) => result.context(HandshakeSnafu { phase }),
        Err(_) => TimeoutSnafu { phase }.fail(),
    }
}

/// Decode and store the seed rows of one partition, choosing the schema by
/// the partition id prefix. Rows that do not decode are skipped with a
/// warning, as are partitions of unknown kind.
fn materialize_partition(
    store: &PartitionStore,
    partition: &PartitionId,
    rows: &[Value],
) -> Result<()> {
    match partition.kind() {
        Some(PartitionKind::Accounts) => {
            let accounts: Vec<Account> = decode_rows(partition, rows);
            store
                .materialize_accounts(partition, &accounts)
                .context(MaterializeSnafu {
                    partition: partition.clone(),
                })
        }
        Some(PartitionKind::Clients) => {
            let clients: Vec<Client> = decode_rows(partition, rows);
            store
                .materialize_clients(partition, &clients)
                .context(MaterializeSnafu {
                    partition: partition.clone(),
                })
        }
        None => {
            warn!(%partition, "partition id has an unknown prefix, seed rows skipped");
            Ok(())
        }
    }
}

fn decode_rows<T: serde::de::DeserializeOwned>(
    partition: &PartitionId,
    rows: &[Value],
) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match serde_json::from_value(row.clone()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(%partition, %e, "skipping seed row that does not match the partition schema");
                None
            }
        })
        .collect()
}
