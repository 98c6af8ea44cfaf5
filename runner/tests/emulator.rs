use std::{sync::Arc, time::Duration};

use backend::{build_router, monitor, AppState};
use common::{FunnelError, JobOrder, JobStatus, PipelineConfig, StepSpec};
use runner::{HttpBackend, JobRunner, PipelinesBackend};
use serde_json::json;
use tokio::{net::TcpListener, time::timeout};

/// Levanta el emulador en un puerto libre y devuelve su URL base.
async fn start_emulator(run_for: Duration) -> String {
    let state = AppState::new(run_for);
    let app = build_router(state.clone());

    tokio::spawn(monitor::monitor_operations(state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

fn config(base_url: &str) -> PipelineConfig {
    PipelineConfig {
        output_path: "runs/e2e".into(),
        project_id: "proj".into(),
        bucket: "b".into(),
        service_account: "sa@proj.iam.gserviceaccount.com".into(),
        api_base_url: base_url.to_string(),
        ..PipelineConfig::default()
    }
}

fn step() -> StepSpec {
    serde_json::from_value(json!({
        "id": "#sort",
        "baseCommand": ["sort"],
        "dockerImage": "ubuntu:22.04",
        "inputs": [
            {"id": "#sort#reverse", "type": "boolean", "inputBinding": {"position": 1, "prefix": "-r"}},
            {"id": "#sort#input", "type": "File", "inputBinding": {"position": 2}}
        ],
        "outputs": [
            {"id": "#sort#sorted", "type": "File", "outputBinding": {"glob": "sorted.txt"}},
            {"id": "#sort#logs", "type": "Directory", "outputBinding": {"glob": "logs"}}
        ],
        "stdout": "sorted.txt"
    }))
    .unwrap()
}

fn job() -> JobOrder {
    serde_json::from_value(json!({
        "reverse": true,
        "input": {"class": "File", "location": "/home/u/words.txt"}
    }))
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_completo_contra_el_emulador() {
    let base_url = start_emulator(Duration::from_millis(200)).await;
    let cfg = config(&base_url);
    let backend = Arc::new(HttpBackend::from_config(&cfg).unwrap());
    let runner = JobRunner::new(backend, cfg)
        .unwrap()
        .with_fixed_poll_interval(Duration::from_millis(50));

    let prepared = runner.prepare(&step(), &job()).unwrap();
    assert_eq!(
        prepared.rendered.command,
        "sort -r /mnt/data/b/runs/e2e/words.txt > /mnt/data/sorted.txt"
    );

    let handle = runner.submit(&step(), &job()).await.unwrap();
    assert!(handle.operation().starts_with("operations/"));

    let result = timeout(Duration::from_secs(10), handle.wait())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(
        result.outputs.get("sorted").unwrap().location.as_deref(),
        Some("gs://b/runs/e2e/sorted.txt")
    );
    assert_eq!(
        result.outputs.get("logs").unwrap().location.as_deref(),
        Some("gs://b/runs/e2e/logs/")
    );
    assert_eq!(runner.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn varios_jobs_en_paralelo_no_se_bloquean() {
    let base_url = start_emulator(Duration::from_secs(1)).await;
    let cfg = config(&base_url);
    let backend = Arc::new(HttpBackend::from_config(&cfg).unwrap());
    let runner = JobRunner::new(backend, cfg)
        .unwrap()
        .with_fixed_poll_interval(Duration::from_millis(50));

    let mut handles = Vec::new();
    for _ in 0..5 {
        handles.push(runner.submit(&step(), &job()).await.unwrap());
    }
    assert_eq!(runner.in_flight(), 5);

    for handle in handles {
        let result = timeout(Duration::from_secs(10), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.status, JobStatus::Success);
    }
}

#[tokio::test]
async fn emulador_rechaza_tarea_invalida_y_operacion_desconocida() {
    let base_url = start_emulator(Duration::from_secs(60)).await;
    let cfg = config(&base_url);
    let backend = HttpBackend::from_config(&cfg).unwrap();

    let runner = JobRunner::new(Arc::new(backend.clone()), cfg.clone()).unwrap();
    let mut task = runner.prepare(&step(), &job()).unwrap().task;
    task.ephemeral_pipeline.docker.image_name = String::new();

    let err = backend.run_pipeline(&task).await.unwrap_err();
    assert!(matches!(err, FunnelError::Submission { status: 400, .. }));

    let err = backend.get_operation("operations/nope").await.unwrap_err();
    assert!(err.is_transient());
}
