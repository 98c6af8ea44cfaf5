// backend/src/state.rs

use common::Operation;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

#[derive(Clone)]
pub struct AppState {
    // operaciones por nombre completo ("operations/<id>")
    pub operations: Arc<Mutex<HashMap<String, OperationEntry>>>,
    // cuánto "corre" cada tarea antes de marcarla done
    pub run_for: Duration,
}

impl AppState {
    pub fn new(run_for: Duration) -> Self {
        Self {
            operations: Arc::new(Mutex::new(HashMap::new())),
            run_for,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationEntry {
    pub operation: Operation,
    pub created_at: SystemTime,
}
