//! The inbound task server.
//!
//! One framed request per connection: accept, read, dispatch, answer,
//! close. Concurrency is bounded by a semaphore whose permit is taken
//! before `accept`, so excess connections queue in the listener backlog
//! instead of being dispatched.

use crate::engine::OperationEngine;
use observability_deps::tracing::{debug, error, info, warn};
use snafu::{ResultExt, Snafu};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use wire::message::TaskRequest;
use wire::{read_message, write_message};

/// Default bound on concurrently served tasks.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 10;

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("error binding task listener on port {}: {}", port, source))]
    Bind { port: u16, source: std::io::Error },
}

/// Serves task requests on a loopback listener, dispatching each to the
/// operation engine on the blocking pool.
#[derive(Debug)]
pub struct TaskServer {
    engine: Arc<OperationEngine>,
    listener: TcpListener,
    tasks: Arc<Semaphore>,
}

impl TaskServer {
    /// Bind the loopback listener on `port` (`0` picks a free port, for
    /// tests) with the default concurrency bound.
    pub async fn bind(port: u16, engine: Arc<OperationEngine>) -> Result<Self, Error> {
        Self::bind_with_concurrency(port, engine, DEFAULT_MAX_CONCURRENT_TASKS).await
    }

    /// Bind with an explicit concurrency bound.
    pub async fn bind_with_concurrency(
        port: u16,
        engine: Arc<OperationEngine>,
        max_concurrent_tasks: usize,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .context(BindSnafu { port })?;
        Ok(Self {
            engine,
            listener,
            tasks: Arc::new(Semaphore::new(max_concurrent_tasks)),
        })
    }

    /// The bound address, useful when the port was `0`.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve connections until the process stops. Accept errors
    /// are logged and the loop continues; only failing to bind is fatal
    /// (and surfaces from [`TaskServer::bind`]).
    pub async fn serve(self) {
        if let Ok(address) = self.local_addr() {
            info!(%address, "task server listening");
        }
        loop {
            let permit = Arc::clone(&self.tasks)
                .acquire_owned()
                .await
                .expect("task semaphore is never closed");

            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(%e, "error accepting task connection");
                    continue;
                }
            };

            let engine = Arc::clone(&self.engine);
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, engine).await {
                    warn!(%peer, %e, "task connection failed");
                }
                drop(permit);
            });
        }
    }
}

/// Read exactly one framed request, dispatch it, write the framed response.
/// Protocol failures abort this connection only.
async fn serve_connection(
    mut stream: TcpStream,
    engine: Arc<OperationEngine>,
) -> Result<(), wire::Error> {
    let request: TaskRequest = read_message(&mut stream).await?;
    debug!(operation = %request.operation, "task received");

    // Operations do blocking file I/O, so keep them off the reactor.
    let response = tokio::task::spawn_blocking(move || engine.process(&request))
        .await
        .expect("operation engine does not panic");

    info!(status = ?response.status, "task processed");
    write_message(&mut stream, &response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::accounts::{Account, AccountId, ClientId};
    use data_types::operation::OperationStatus;
    use data_types::partition::PartitionId;
    use data_types::worker_id::WorkerId;
    use partition_store::{PartitionStore, TransactionLog};
    use serde_json::json;
    use tokio::io::AsyncWriteExt;
    use wire::message::TaskResponse;

    async fn started_server() -> (tempfile::TempDir, SocketAddr) {
        test_helpers::maybe_start_logging();
        let dir = test_helpers::tmp_dir().unwrap();
        let store = Arc::new(PartitionStore::create(dir.path()).unwrap());
        let txn_log =
            Arc::new(TransactionLog::open(store.data_dir(), WorkerId::new("w1")).unwrap());
        let partition = PartitionId::new("CUENTA_P1");
        store
            .materialize_accounts(
                &partition,
                &[Account {
                    id: AccountId::new(100001),
                    client_id: ClientId::new(1),
                    balance: 5000.0,
                    kind: "Corriente".to_string(),
                }],
            )
            .unwrap();
        let engine = Arc::new(OperationEngine::new(
            WorkerId::new("w1"),
            [partition],
            store,
            txn_log,
        ));

        let server = TaskServer::bind(0, engine).await.unwrap();
        let address = server.local_addr().unwrap();
        tokio::spawn(server.serve());
        (dir, address)
    }

    async fn roundtrip(address: SocketAddr, request: &TaskRequest) -> TaskResponse {
        let mut stream = TcpStream::connect(address).await.unwrap();
        write_message(&mut stream, request).await.unwrap();
        read_message(&mut stream).await.unwrap()
    }

    #[tokio::test]
    async fn serves_one_request_per_connection() {
        let (_dir, address) = started_server().await;

        let request = TaskRequest::new(
            "CONSULTAR_SALDO",
            json!({"ID_CUENTA": 100001, "ID_PARTICION": "CUENTA_P1"})
                .as_object()
                .unwrap()
                .clone(),
        );

        let response = roundtrip(address, &request).await;
        assert_eq!(response.status, OperationStatus::Success);
        assert_eq!(response.payload, Some(json!(5000.0)));
    }

    #[tokio::test]
    async fn malformed_frame_closes_the_connection_but_not_the_server() {
        let (_dir, address) = started_server().await;

        // A frame whose payload is not a task request.
        let mut stream = TcpStream::connect(address).await.unwrap();
        stream.write_all(&5u32.to_be_bytes()).await.unwrap();
        stream.write_all(b"junk!").await.unwrap();
        let result: Result<TaskResponse, wire::Error> = read_message(&mut stream).await;
        assert!(result.is_err());
        drop(stream);

        // The server keeps serving fresh connections.
        let request = TaskRequest::new(
            "CONSULTAR_SALDO",
            json!({"ID_CUENTA": 100001, "ID_PARTICION": "CUENTA_P1"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let response = roundtrip(address, &request).await;
        assert_eq!(response.status, OperationStatus::Success);
    }

    #[tokio::test]
    async fn concurrent_connections_are_all_served() {
        let (_dir, address) = started_server().await;

        let mut handles = vec![];
        for _ in 0..20 {
            handles.push(tokio::spawn(async move {
                let request = TaskRequest::new(
                    "CONSULTAR_SALDO",
                    json!({"ID_CUENTA": 100001, "ID_PARTICION": "CUENTA_P1"})
                        .as_object()
                        .unwrap()
                        .clone(),
                );
                roundtrip(address, &request).await
            }));
        }

        for handle in handles {
            let response = handle.await.unwrap();
            assert_eq!(response.status, OperationStatus::Success);
        }
    }
}
