use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::render::OutputGlob;
use crate::step::PathClass;

/// Handle de una operación larga del backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

impl Operation {
    /// Salidas que el backend reporta en el eco del request
    /// (metadata.request.pipelineArgs.outputs).
    pub fn reported_outputs(&self) -> BTreeMap<String, String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.pointer("/request/pipelineArgs/outputs"))
            .and_then(Value::as_object)
            .map(|outs| {
                outs.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Success,
    PermanentFail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Glob relativo esperado (placeholder hasta que el backend responda).
    pub path: String,
    /// Clase declarada en el step: puede ser File o Directory.
    pub class: PathClass,
    /// false: el resultado vive en el bucket, no en el filesystem local.
    pub hostfs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl OutputRecord {
    pub fn is_resolved(&self) -> bool {
        self.location.is_some()
    }
}

/// Tabla de outputs declarados del job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputMap(pub BTreeMap<String, OutputRecord>);

impl OutputMap {
    /// Arma el mapa con placeholders al momento del envío.
    pub fn collect(outputs: &BTreeMap<String, OutputGlob>) -> Self {
        OutputMap(
            outputs
                .iter()
                .map(|(id, out)| {
                    (
                        id.clone(),
                        OutputRecord {
                            path: out.glob.clone(),
                            class: out.class,
                            hostfs: false,
                            location: None,
                        },
                    )
                })
                .collect(),
        )
    }

    pub fn get(&self, id: &str) -> Option<&OutputRecord> {
        self.0.get(id)
    }

    pub fn unresolved(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, rec)| !rec.is_resolved())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Outputs finales + estado, listos para el callback del motor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOutputs {
    pub status: JobStatus,
    pub outputs: OutputMap,
}

impl ResolvedOutputs {
    pub fn unresolved(&self) -> Vec<String> {
        self.outputs.unresolved()
    }

    /// Resultado de un job que nunca llegó a done (cancelado, deadline, ...).
    pub fn failed(outputs: OutputMap) -> Self {
        Self {
            status: JobStatus::PermanentFail,
            outputs,
        }
    }
}

/// Vuelca las ubicaciones finales que reporta el backend en el OutputMap.
/// Los outputs que el backend no reporta quedan con su placeholder y el job
/// se marca como permanentFail.
pub fn finalize(operation: &Operation, mut outputs: OutputMap) -> ResolvedOutputs {
    for (key, location) in operation.reported_outputs() {
        match outputs.0.get_mut(&key) {
            Some(record) => record.location = Some(location),
            None => debug!(output = %key, "el backend reporta un output no declarado, se ignora"),
        }
    }

    let missing = outputs.unresolved();
    let status = if let Some(err) = &operation.error {
        warn!(
            operation = %operation.name,
            code = err.code,
            message = %err.message,
            "la operación terminó con error"
        );
        JobStatus::PermanentFail
    } else if !missing.is_empty() {
        warn!(operation = %operation.name, ?missing, "outputs sin ubicación final");
        JobStatus::PermanentFail
    } else {
        JobStatus::Success
    };

    debug!(operation = %operation.name, ?outputs, "outputs finales");
    ResolvedOutputs { status, outputs }
}

/// Lo que recibe quien espera un job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub operation: String,
    pub status: JobStatus,
    pub outputs: OutputMap,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
