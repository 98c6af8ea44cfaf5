use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use common::{Operation, TaskRequest};
use serde_json::{json, Value};
use std::time::SystemTime;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::{AppState, OperationEntry};

pub const API_VERSION: &str = "v1alpha2";

type ApiError = (StatusCode, Json<Value>);

pub fn build_router(state: AppState) -> Router {
    // "pipelines:run" no se puede declarar como ruta literal en axum,
    // así que todo lo de /v1alpha2 entra por un comodín.
    Router::new()
        .route("/health", get(health))
        .route(
            &format!("/{API_VERSION}/*path"),
            post(run_pipeline).get(get_operation),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

fn api_error(status: StatusCode, reason: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(json!({
            "error": {
                "code": status.as_u16(),
                "message": message.into(),
                "status": reason,
            }
        })),
    )
}

/// Mismas validaciones mínimas que haría el backend real antes de aceptar.
pub fn validate_task(task: &TaskRequest) -> Result<(), String> {
    let pipeline = &task.ephemeral_pipeline;

    if pipeline.project_id.trim().is_empty() {
        return Err("ephemeralPipeline.projectId es obligatorio".into());
    }
    if pipeline.docker.image_name.trim().is_empty() {
        return Err("docker.imageName es obligatorio".into());
    }
    if pipeline.docker.cmd.trim().is_empty() {
        return Err("docker.cmd es obligatorio".into());
    }
    if pipeline.resources.disks.is_empty() {
        return Err("resources.disks no puede estar vacío".into());
    }

    // cada parámetro tiene que apuntar a un disco declarado
    let params = pipeline
        .input_parameters
        .iter()
        .chain(pipeline.output_parameters.iter());
    for param in params {
        let disk = &param.local_copy.disk;
        if !pipeline.resources.disks.iter().any(|d| &d.name == disk) {
            return Err(format!(
                "el parámetro {} usa el disco {} que no existe",
                param.name, disk
            ));
        }
    }

    Ok(())
}

// Crea una operación nueva (todavía no done) con el request como metadata
async fn run_pipeline(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(task): Json<TaskRequest>,
) -> Result<Json<Operation>, ApiError> {
    if path != "pipelines:run" {
        return Err(api_error(StatusCode::NOT_FOUND, "NOT_FOUND", format!("ruta desconocida {path}")));
    }

    if let Err(msg) = validate_task(&task) {
        return Err(api_error(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", msg));
    }

    let request = serde_json::to_value(&task).map_err(|e| {
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", e.to_string())
    })?;

    let name = format!("operations/{}", uuid::Uuid::new_v4());
    let operation = Operation {
        name: name.clone(),
        done: false,
        metadata: Some(json!({
            "request": request,
            "createTime": Utc::now().to_rfc3339(),
        })),
        error: None,
    };

    {
        let mut ops = state.operations.lock().unwrap();
        ops.insert(
            name.clone(),
            OperationEntry {
                operation: operation.clone(),
                created_at: SystemTime::now(),
            },
        );
    }

    info!(
        "operación {} creada (image={}, cmd={})",
        name, task.ephemeral_pipeline.docker.image_name, task.ephemeral_pipeline.docker.cmd
    );
    Ok(Json(operation))
}

// Devuelve el estado actual de una operación
async fn get_operation(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<Operation>, ApiError> {
    let ops = state.operations.lock().unwrap();

    if let Some(entry) = ops.get(&path) {
        Ok(Json(entry.operation.clone()))
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("no existe la operación {path}"),
        ))
    }
}
