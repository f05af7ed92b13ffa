//! Structured messages carried inside frames.
//!
//! Two families share the codec: the registration handshake between a worker
//! and the coordinator (discriminated by `tipo`), and the task
//! request/response pair served by the worker (discriminated by
//! `tipoOperacion` / answered with `estado`).

use data_types::operation::OperationStatus;
use data_types::partition::PartitionId;
use data_types::worker_id::WorkerId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The registration handshake messages, in protocol order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tipo")]
pub enum HandshakeMessage {
    /// Worker → coordinator: announce this worker and its task port.
    #[serde(rename = "REGISTRO")]
    Register {
        /// The announcing worker.
        #[serde(rename = "workerId")]
        worker_id: WorkerId,
        /// Always empty at registration; the coordinator decides ownership.
        #[serde(rename = "listaParticiones", default)]
        partitions: Vec<PartitionId>,
        /// Port the worker will serve tasks on once ready.
        #[serde(rename = "puertoTareasWorker")]
        task_port: u16,
        /// Human-readable note.
        #[serde(rename = "mensajeTexto", default)]
        text: String,
    },

    /// Coordinator → worker: the owned partition set plus its seed rows.
    #[serde(rename = "ASIGNACION_PARTICIONES_Y_DATOS")]
    Assignment {
        /// The partitions this worker now owns.
        #[serde(rename = "listaParticiones", default)]
        partitions: Vec<PartitionId>,
        /// Seed rows per partition, as schema-neutral objects.
        #[serde(rename = "datosPorParticion", default)]
        seed_rows: BTreeMap<PartitionId, Vec<Value>>,
        /// Human-readable note.
        #[serde(rename = "mensajeTexto", default)]
        text: String,
    },

    /// Worker → coordinator: seed rows are durable on local disk.
    #[serde(rename = "DATOS_RECIBIDOS_POR_WORKER")]
    SeedReceived {
        /// The confirming worker.
        #[serde(rename = "workerId")]
        worker_id: WorkerId,
        /// Human-readable note.
        #[serde(rename = "mensajeTexto", default)]
        text: String,
    },

    /// Coordinator → worker: registration is complete, start serving.
    #[serde(rename = "CONFIRMACION_REGISTRO_COMPLETO")]
    RegistrationComplete {
        /// The worker being confirmed.
        #[serde(rename = "workerId", default)]
        worker_id: Option<WorkerId>,
        /// Human-readable note.
        #[serde(rename = "mensajeTexto", default)]
        text: String,
    },
}

impl HandshakeMessage {
    /// The `tipo` discriminator of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "REGISTRO",
            Self::Assignment { .. } => "ASIGNACION_PARTICIONES_Y_DATOS",
            Self::SeedReceived { .. } => "DATOS_RECIBIDOS_POR_WORKER",
            Self::RegistrationComplete { .. } => "CONFIRMACION_REGISTRO_COMPLETO",
        }
    }
}

/// One task request: an operation kind plus its keyed parameters.
///
/// The operation is carried as the raw wire string so an unsupported kind
/// can be answered with a response instead of tearing down the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// The wire name of the requested operation.
    #[serde(rename = "tipoOperacion")]
    pub operation: String,

    /// Operation parameters (`ID_PARTICION`, `ID_CUENTA`, `MONTO`, ...).
    #[serde(rename = "parametros", default)]
    pub params: Map<String, Value>,
}

impl TaskRequest {
    /// Build a request for `operation` with the given parameters.
    pub fn new(operation: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            operation: operation.into(),
            params,
        }
    }
}

/// The answer to one [`TaskRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Outcome of the operation.
    #[serde(rename = "estado")]
    pub status: OperationStatus,

    /// Human-readable detail.
    #[serde(rename = "mensaje")]
    pub message: String,

    /// Operation payload; `null` on the wire when absent.
    #[serde(rename = "datos", default)]
    pub payload: Option<Value>,
}

impl TaskResponse {
    /// A response without payload.
    pub fn new(status: OperationStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            payload: None,
        }
    }

    /// A response carrying a payload.
    pub fn with_payload(
        status: OperationStatus,
        message: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            payload: Some(payload),
        }
    }
}
