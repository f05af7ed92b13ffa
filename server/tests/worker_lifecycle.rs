//! End-to-end worker lifecycle: register against a scripted coordinator,
//! then serve tasks over real sockets.

use data_types::operation::OperationStatus;
use data_types::worker_id::WorkerId;
use partition_store::{PartitionStore, TransactionLog};
use serde_json::{json, Value};
use server::registration::register;
use server::{OperationEngine, TaskServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use wire::message::{HandshakeMessage, TaskRequest, TaskResponse};
use wire::{read_message, write_message};

/// A coordinator that runs the scripted happy-path handshake for one
/// worker.
async fn mock_coordinator(listener: TcpListener) {
    let (mut socket, _) = listener.accept().await.unwrap();

    let register: HandshakeMessage = read_message(&mut socket).await.unwrap();
    assert!(matches!(register, HandshakeMessage::Register { .. }));

    let assignment: HandshakeMessage = serde_json::from_value(json!({
        "tipo": "ASIGNACION_PARTICIONES_Y_DATOS",
        "listaParticiones": ["CUENTA_P1"],
        "datosPorParticion": {
            "CUENTA_P1": [
                {"idCuenta": 100001, "idCliente": 1, "saldo": 5000.0, "tipoCuenta": "Corriente"},
                {"idCuenta": 100002, "idCliente": 2, "saldo": 3000.0, "tipoCuenta": "Ahorros"},
                {"idCuenta": 100003, "idCliente": 3, "saldo": 1500.0, "tipoCuenta": "Corriente"},
            ],
        },
        "mensajeTexto": "assignment",
    }))
    .unwrap();
    write_message(&mut socket, &assignment).await.unwrap();

    let seed_received: HandshakeMessage = read_message(&mut socket).await.unwrap();
    assert!(matches!(
        seed_received,
        HandshakeMessage::SeedReceived { .. }
    ));

    write_message(
        &mut socket,
        &HandshakeMessage::RegistrationComplete {
            worker_id: Some(WorkerId::new("w1")),
            text: "registration complete".to_string(),
        },
    )
    .await
    .unwrap();
}

async fn send_task(address: SocketAddr, operation: &str, params: Value) -> TaskResponse {
    let request = TaskRequest::new(operation, params.as_object().unwrap().clone());
    let mut stream = TcpStream::connect(address).await.unwrap();
    write_message(&mut stream, &request).await.unwrap();
    read_message(&mut stream).await.unwrap()
}

#[tokio::test]
async fn register_then_serve_tasks() {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let store = Arc::new(PartitionStore::create(dir.path()).unwrap());

    // Bootstrap: handshake against the scripted coordinator.
    let coordinator_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let coordinator_address = coordinator_listener.local_addr().unwrap().to_string();
    let coordinator = tokio::spawn(mock_coordinator(coordinator_listener));

    let worker_id = WorkerId::new("w1");
    let partitions = register(&worker_id, &coordinator_address, 0, &store)
        .await
        .unwrap();
    coordinator.await.unwrap();

    // Ready: bring up the task server on the seeded store.
    let txn_log = Arc::new(TransactionLog::open(store.data_dir(), worker_id.clone()).unwrap());
    let engine = Arc::new(OperationEngine::new(
        worker_id,
        partitions,
        Arc::clone(&store),
        txn_log,
    ));
    let server = TaskServer::bind(0, engine).await.unwrap();
    let address = server.local_addr().unwrap();
    tokio::spawn(server.serve());

    // Balance query against seeded data.
    let response = send_task(
        address,
        "CONSULTAR_SALDO",
        json!({"ID_CUENTA": 100001, "ID_PARTICION": "CUENTA_P1"}),
    )
    .await;
    assert_eq!(response.status, OperationStatus::Success);
    assert_eq!(response.payload, Some(json!(5000.0)));

    // A transfer, then both new balances observable.
    let response = send_task(
        address,
        "TRANSFERIR_FONDOS",
        json!({
            "ID_CUENTA_ORIGEN": 100001,
            "ID_CUENTA_DESTINO": 100002,
            "MONTO": 500.0,
            "ID_PARTICION": "CUENTA_P1",
            "ID_TRANSACCION_GLOBAL": 1,
        }),
    )
    .await;
    assert_eq!(response.status, OperationStatus::Success);
    let payload = response.payload.unwrap();
    assert_eq!(payload["nuevoSaldoOrigen"], json!(4500.0));
    assert_eq!(payload["nuevoSaldoDestino"], json!(3500.0));
    assert_eq!(payload["workerIdProcesador"], json!("w1"));

    // 2PC participant verbs against the same partition.
    let response = send_task(
        address,
        "PREPARAR_DEBITO",
        json!({
            "ID_CUENTA_ORIGEN": 100001,
            "MONTO": 200.0,
            "ID_PARTICION": "CUENTA_P1",
            "ID_TRANSACCION_GLOBAL": 2,
        }),
    )
    .await;
    assert_eq!(response.status, OperationStatus::DebitPrepared);
    assert_eq!(
        response.payload.unwrap()["saldoActualOrigen"],
        json!(4500.0)
    );

    let response = send_task(
        address,
        "CONFIRMAR_DEBITO",
        json!({
            "ID_CUENTA_ORIGEN": 100001,
            "MONTO": 200.0,
            "ID_PARTICION": "CUENTA_P1",
            "ID_TRANSACCION_GLOBAL": 2,
        }),
    )
    .await;
    assert_eq!(response.status, OperationStatus::DebitConfirmed);
    assert_eq!(response.payload.unwrap()["nuevoSaldoOrigen"], json!(4300.0));

    // A foreign partition is refused.
    let response = send_task(
        address,
        "CONSULTAR_SALDO",
        json!({"ID_CUENTA": 100001, "ID_PARTICION": "CUENTA_P9"}),
    )
    .await;
    assert_eq!(response.status, OperationStatus::ServerError);
}

#[tokio::test]
async fn concurrent_task_connections_conserve_partition_total() {
    test_helpers::maybe_start_logging();
    let dir = test_helpers::tmp_dir().unwrap();
    let store = Arc::new(PartitionStore::create(dir.path()).unwrap());

    let coordinator_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let coordinator_address = coordinator_listener.local_addr().unwrap().to_string();
    tokio::spawn(mock_coordinator(coordinator_listener));

    let worker_id = WorkerId::new("w1");
    let partitions = register(&worker_id, &coordinator_address, 0, &store)
        .await
        .unwrap();

    let txn_log = Arc::new(TransactionLog::open(store.data_dir(), worker_id.clone()).unwrap());
    let engine = Arc::new(OperationEngine::new(
        worker_id,
        partitions,
        Arc::clone(&store),
        txn_log,
    ));
    let server = TaskServer::bind(0, engine).await.unwrap();
    let address = server.local_addr().unwrap();
    tokio::spawn(server.serve());

    // Fire transfers from many concurrent connections.
    let mut handles = vec![];
    for tx in 0..16i64 {
        handles.push(tokio::spawn(async move {
            let (source, destination) = if tx % 2 == 0 {
                (100001, 100002)
            } else {
                (100002, 100003)
            };
            send_task(
                address,
                "TRANSFERIR_FONDOS",
                json!({
                    "ID_CUENTA_ORIGEN": source,
                    "ID_CUENTA_DESTINO": destination,
                    "MONTO": 50.0,
                    "ID_PARTICION": "CUENTA_P1",
                    "ID_TRANSACCION_GLOBAL": tx,
                }),
            )
            .await
        }));
    }
    for handle in handles {
        let response = handle.await.unwrap();
        assert_eq!(response.status, OperationStatus::Success);
    }

    // Quiescent audit: the partition total is conserved.
    let response = send_task(
        address,
        "CALCULAR_SALDO_PARTICION",
        json!({"ID_PARTICION": "CUENTA_P1"}),
    )
    .await;
    assert_eq!(response.status, OperationStatus::Success);
    let total = response.payload.unwrap().as_f64().unwrap();
    assert!((total - 9500.0).abs() < 1e-6, "got {total}");
}
