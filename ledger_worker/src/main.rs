//! Entry point of the partitioned transactional worker node.
//!
//! Bootstraps in two phases: the registration handshake with the
//! coordinator must complete (and seed data become durable) before the task
//! server starts accepting connections. Any bootstrap failure exits
//! non-zero.

use clap::Parser;
use data_types::worker_id::WorkerId;
use observability_deps::tracing::{error, info};
use partition_store::{PartitionStore, TransactionLog};
use server::registration::register;
use server::{OperationEngine, TaskServer};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[clap(
    name = "ledger_worker",
    about = "Partitioned transactional worker node for the distributed banking ledger"
)]
struct Config {
    /// Identifier this worker registers under.
    worker_id: String,

    /// Coordinator host name or address.
    coordinator_host: String,

    /// Coordinator registration port.
    coordinator_port: u16,

    /// Loopback port to serve task requests on.
    task_port: u16,

    /// Directory for partition files and the transaction log. Defaults to
    /// `data_<workerId>` under the working directory.
    #[clap(long, env = "LEDGER_WORKER_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let config = Config::parse();

    let worker_id = WorkerId::new(config.worker_id);
    let data_dir = config
        .data_dir
        .unwrap_or_else(|| PathBuf::from(format!("data_{worker_id}")));

    let store = match PartitionStore::create(&data_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(%e, "could not open the data directory");
            return ExitCode::FAILURE;
        }
    };
    let txn_log = match TransactionLog::open(store.data_dir(), worker_id.clone()) {
        Ok(log) => Arc::new(log),
        Err(e) => {
            error!(%e, "could not open the transaction log");
            return ExitCode::FAILURE;
        }
    };

    let coordinator_address = format!("{}:{}", config.coordinator_host, config.coordinator_port);
    let partitions = match register(&worker_id, &coordinator_address, config.task_port, &store)
        .await
    {
        Ok(partitions) => partitions,
        Err(e) => {
            error!(%worker_id, %e, "registration with the coordinator failed, aborting");
            return ExitCode::FAILURE;
        }
    };

    let engine = Arc::new(OperationEngine::new(
        worker_id.clone(),
        partitions,
        Arc::clone(&store),
        txn_log,
    ));
    let server = match TaskServer::bind(config.task_port, engine).await {
        Ok(server) => server,
        Err(e) => {
            error!(%e, "could not bind the task listener");
            return ExitCode::FAILURE;
        }
    };

    info!(%worker_id, port = config.task_port, "worker registered and ready");

    tokio::select! {
        _ = server.serve() => unreachable!("the task server loop does not return"),
        _ = tokio::signal::ctrl_c() => {
            info!(%worker_id, "shutdown signal received");
            ExitCode::SUCCESS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_arguments_parse_in_order() {
        let config =
            Config::try_parse_from(["ledger_worker", "w1", "localhost", "12346", "12351"])
                .unwrap();
        assert_eq!(config.worker_id, "w1");
        assert_eq!(config.coordinator_host, "localhost");
        assert_eq!(config.coordinator_port, 12346);
        assert_eq!(config.task_port, 12351);
        assert_eq!(config.data_dir, None);
    }

    #[test]
    fn missing_arguments_are_rejected() {
        assert!(Config::try_parse_from(["ledger_worker", "w1", "localhost"]).is_err());
    }

    #[test]
    fn data_dir_override() {
        let config = Config::try_parse_from([
            "ledger_worker",
            "w1",
            "localhost",
            "12346",
            "12351",
            "--data-dir",
            "/tmp/elsewhere",
        ])
        .unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/elsewhere")));
    }
}
