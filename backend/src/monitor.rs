use crate::state::AppState;
use serde_json::json;
use std::time::{Duration, SystemTime};
use tracing::info;

pub const MONITOR_TICK: Duration = Duration::from_millis(250);

/// Loop en segundo plano: "termina" las operaciones que ya corrieron run_for.
pub async fn monitor_operations(state: AppState) {
    loop {
        tokio::time::sleep(MONITOR_TICK).await;
        complete_due(&state, SystemTime::now());
    }
}

/// Una pasada: marca done las operaciones vencidas y devuelve sus nombres.
pub fn complete_due(state: &AppState, now: SystemTime) -> Vec<String> {
    let mut completed = Vec::new();
    let mut ops = state.operations.lock().unwrap();

    for (name, entry) in ops.iter_mut() {
        if entry.operation.done {
            continue;
        }

        let elapsed = match now.duration_since(entry.created_at) {
            Ok(elapsed) => elapsed,
            // created_at en el futuro? raro, lo ignoramos.
            Err(_) => continue,
        };

        if elapsed >= state.run_for {
            entry.operation.done = true;
            if let Some(meta) = entry.operation.metadata.as_mut() {
                meta["endTime"] = json!(chrono::Utc::now().to_rfc3339());
            }
            info!("operación {} terminada tras {:?}", name, elapsed);
            completed.push(name.clone());
        }
    }

    completed
}
