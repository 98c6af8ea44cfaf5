use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use common::{
    build_task, finalize, paths, render, FunnelError, JobOrder, JobResult, LocationMap, OutputMap,
    PipelineConfig, RenderedJob, ResolvedOutputs, StepSpec, TaskRequest, TaskSpec,
};
use tokio::{
    sync::{oneshot, Semaphore},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::PipelinesBackend;
use crate::poll::{CompletionPoller, PollOutcome};

/// Todo lo que se calcula antes de tocar la red.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub locations: LocationMap,
    pub rendered: RenderedJob,
    pub task: TaskRequest,
    pub outputs: OutputMap,
}

/// Job ya enviado: nombre de la operación + señal para cancelar su poller.
#[derive(Debug)]
pub struct SubmittedJob {
    pub operation: String,
    cancel: CancellationToken,
    poller: JoinHandle<u32>,
}

impl SubmittedJob {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.poller.is_finished()
    }
}

/// Job enviado cuyo resultado se espera con `wait`.
#[derive(Debug)]
pub struct JobHandle {
    job: SubmittedJob,
    result: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    pub fn operation(&self) -> &str {
        &self.job.operation
    }

    pub fn cancel(&self) {
        self.job.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.job.cancel.clone()
    }

    pub async fn wait(self) -> Result<JobResult, FunnelError> {
        let operation = self.job.operation.clone();
        self.result
            .await
            .map_err(|_| FunnelError::Aborted { operation })
    }
}

/// Adaptador de un step: resuelve, renderiza, arma la tarea, la envía y deja
/// un poller por job. Lo comparten todos los steps de una corrida.
#[derive(Clone)]
pub struct JobRunner {
    backend: Arc<dyn PipelinesBackend>,
    config: Arc<PipelineConfig>,
    slots: Arc<Semaphore>,
    fixed_interval: Option<Duration>,
}

impl JobRunner {
    pub fn new(backend: Arc<dyn PipelinesBackend>, config: PipelineConfig) -> Result<Self, FunnelError> {
        config.validate()?;
        let slots = Arc::new(Semaphore::new(config.max_in_flight));
        Ok(Self {
            backend,
            config: Arc::new(config),
            slots,
            fixed_interval: None,
        })
    }

    /// Intervalo de polling fijo para todos los jobs (sin jitter).
    pub fn with_fixed_poll_interval(mut self, interval: Duration) -> Self {
        self.fixed_interval = Some(interval);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Jobs enviados cuyo poller todavía no terminó.
    pub fn in_flight(&self) -> usize {
        self.config.max_in_flight - self.slots.available_permits()
    }

    /// Resolución + render + TaskRequest, sin I/O (también sirve de dry run).
    pub fn prepare(&self, step: &StepSpec, job: &JobOrder) -> Result<PreparedJob, FunnelError> {
        let cfg = &self.config;
        let mount = cfg.mount_point.as_str();

        let locations = paths::resolve(job.referenced_locations(), &cfg.bucket, &cfg.output_path);
        let rendered = render::render(step, job, &locations, mount)?;

        let image = step
            .docker_image
            .as_deref()
            .filter(|i| !i.is_empty())
            .or(Some(cfg.default_image.as_str()).filter(|i| !i.is_empty()))
            .ok_or(FunnelError::MissingContainerImage)?;

        let resources = cfg.resource_policy();
        let task = build_task(&TaskSpec {
            project_id: &cfg.project_id,
            container_image: image,
            service_account: &cfg.service_account,
            bucket: &cfg.bucket,
            command: &rendered.command,
            inputs: &rendered.inputs,
            outputs: &rendered.outputs,
            output_path: &cfg.output_path,
            mount_point: mount,
            resources: &resources,
        });

        let outputs = OutputMap::collect(&rendered.outputs);
        debug!(step = %step.id, ?outputs, "outputs recolectados");

        Ok(PreparedJob {
            locations,
            rendered,
            task,
            outputs,
        })
    }

    /// Envía el job y devuelve enseguida; el resultado llega por `wait`.
    pub async fn submit(&self, step: &StepSpec, job: &JobOrder) -> Result<JobHandle, FunnelError> {
        let (tx, rx) = oneshot::channel();
        let submitted = self
            .submit_with_callback(step, job, move |result| {
                // si nadie espera el handle, el resultado se descarta
                let _ = tx.send(result);
            })
            .await?;

        Ok(JobHandle {
            job: submitted,
            result: rx,
        })
    }

    /// Igual que `submit` pero entrega el resultado a `callback`, que se
    /// invoca una sola vez desde la tarea del poller.
    pub async fn submit_with_callback<C>(
        &self,
        step: &StepSpec,
        job: &JobOrder,
        callback: C,
    ) -> Result<SubmittedJob, FunnelError>
    where
        C: FnOnce(JobResult) + Send + 'static,
    {
        let prepared = self.prepare(step, job)?;

        // backpressure: sin permiso libre esperamos a que termine otro job
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FunnelError::config("el runner ya no acepta jobs"))?;

        debug!(step = %step.id, task = ?prepared.task, "tarea armada");
        let operation = self.backend.run_pipeline(&prepared.task).await?;
        let submitted_at = Utc::now();
        info!(step = %step.id, operation = %operation.name, "tarea enviada");

        let operation_name = operation.name.clone();
        let name = operation_name.clone();
        let cancel = CancellationToken::new();
        let mut poller = CompletionPoller::new(
            self.backend.clone(),
            operation,
            prepared.outputs,
            move |outcome, outputs| {
                let result = conclude(&name, outcome, outputs, submitted_at);
                callback(result);
                drop(permit);
            },
            &self.config.poll_settings(),
        )
        .with_cancel(cancel.clone());
        if let Some(interval) = self.fixed_interval {
            poller = poller.with_interval(interval);
        }

        Ok(SubmittedJob {
            operation: operation_name,
            cancel,
            poller: poller.spawn(),
        })
    }
}

/// Convierte el final del polling en el resultado que ve el motor.
fn conclude(
    operation: &str,
    outcome: PollOutcome,
    outputs: OutputMap,
    submitted_at: DateTime<Utc>,
) -> JobResult {
    let resolved = match outcome {
        PollOutcome::Done(op) => finalize(&op, outputs),
        other => {
            warn!(%operation, outcome = ?other, "el job no terminó, se reporta permanentFail");
            ResolvedOutputs::failed(outputs)
        }
    };

    JobResult {
        operation: operation.to_string(),
        status: resolved.status,
        outputs: resolved.outputs,
        submitted_at,
        finished_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{JobStatus, Operation};
    use serde_json::json;
    use std::sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Mutex,
    };
    use tokio::time::{sleep, timeout};

    /// Backend en memoria: guarda la última tarea y la marca done después de
    /// `polls_until_done` consultas, con el eco del request en la metadata.
    struct FakeBackend {
        submitted: Mutex<Vec<TaskRequest>>,
        polls: AtomicU32,
        polls_until_done: u32,
        reject: AtomicBool,
        drop_outputs: bool,
    }

    impl FakeBackend {
        fn new(polls_until_done: u32) -> Arc<Self> {
            Self::with(polls_until_done, false)
        }

        fn with(polls_until_done: u32, drop_outputs: bool) -> Arc<Self> {
            Arc::new(Self {
                submitted: Mutex::new(Vec::new()),
                polls: AtomicU32::new(0),
                polls_until_done,
                reject: AtomicBool::new(false),
                drop_outputs,
            })
        }
    }

    #[async_trait]
    impl PipelinesBackend for FakeBackend {
        async fn run_pipeline(&self, task: &TaskRequest) -> Result<Operation, FunnelError> {
            if self.reject.load(Ordering::SeqCst) {
                return Err(FunnelError::Submission {
                    status: 400,
                    message: "invalid imageName".into(),
                });
            }
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(task.clone());
            Ok(Operation {
                name: format!("operations/{}", submitted.len()),
                done: false,
                metadata: None,
                error: None,
            })
        }

        async fn get_operation(&self, name: &str) -> Result<Operation, FunnelError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            let task = self.submitted.lock().unwrap().last().cloned().unwrap();
            let mut request = serde_json::to_value(&task).unwrap();
            if self.drop_outputs {
                request["pipelineArgs"]["outputs"] = json!({});
            }
            Ok(Operation {
                name: name.to_string(),
                done: n >= self.polls_until_done,
                metadata: Some(json!({ "request": request })),
                error: None,
            })
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            output_path: "runs/1".into(),
            project_id: "proj".into(),
            bucket: "b".into(),
            service_account: "sa@proj.iam.gserviceaccount.com".into(),
            ..PipelineConfig::default()
        }
    }

    fn step() -> StepSpec {
        serde_json::from_value(json!({
            "id": "#wc",
            "baseCommand": ["wc", "-l"],
            "dockerImage": "ubuntu:22.04",
            "inputs": [{"id": "#wc#in", "type": "File", "inputBinding": {"position": 1}}],
            "outputs": [{"id": "#wc#count", "type": "File", "outputBinding": {"glob": "count.txt"}}],
            "stdout": "count.txt"
        }))
        .unwrap()
    }

    fn job() -> JobOrder {
        serde_json::from_value(json!({"in": {"class": "File", "location": "gs://data/reads.fq"}})).unwrap()
    }

    fn runner(backend: Arc<FakeBackend>, cfg: PipelineConfig) -> JobRunner {
        JobRunner::new(backend, cfg)
            .unwrap()
            .with_fixed_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn prepare_arma_comando_tarea_y_placeholders() {
        let r = runner(FakeBackend::new(1), config());

        let prepared = r.prepare(&step(), &job()).unwrap();

        assert_eq!(
            prepared.rendered.command,
            "wc -l /mnt/data/data/reads.fq > /mnt/data/count.txt"
        );
        assert_eq!(prepared.task.ephemeral_pipeline.docker.image_name, "ubuntu:22.04");
        assert_eq!(
            prepared.task.pipeline_args.outputs["count"],
            "gs://b/runs/1/count.txt"
        );
        assert_eq!(prepared.outputs.unresolved(), vec!["count".to_string()]);
        assert!(prepared.locations.contains("gs://data/reads.fq"));
    }

    #[test]
    fn sin_imagen_ni_default_es_error() {
        let cfg = PipelineConfig {
            default_image: String::new(),
            ..config()
        };
        let r = runner(FakeBackend::new(1), cfg);
        let mut s = step();
        s.docker_image = None;

        assert!(matches!(
            r.prepare(&s, &job()),
            Err(FunnelError::MissingContainerImage)
        ));
    }

    #[test]
    fn config_invalida_no_construye_runner() {
        let cfg = PipelineConfig {
            bucket: String::new(),
            ..config()
        };
        assert!(JobRunner::new(FakeBackend::new(1), cfg).is_err());
    }

    #[test]
    fn max_in_flight_fuera_del_semaforo_es_error_y_no_panic() {
        assert_eq!(common::config::MAX_IN_FLIGHT_LIMIT, Semaphore::MAX_PERMITS);

        let cfg = PipelineConfig {
            max_in_flight: usize::MAX,
            ..config()
        };
        let err = JobRunner::new(FakeBackend::new(1), cfg).err().unwrap();
        assert!(matches!(err, FunnelError::Config { .. }));

        let cfg = PipelineConfig {
            max_in_flight: Semaphore::MAX_PERMITS,
            ..config()
        };
        assert!(JobRunner::new(FakeBackend::new(1), cfg).is_ok());
    }

    #[tokio::test]
    async fn submit_y_wait_entrega_outputs_resueltos() {
        let backend = FakeBackend::new(3);
        let r = runner(backend.clone(), config());

        let handle = r.submit(&step(), &job()).await.unwrap();
        assert_eq!(handle.operation(), "operations/1");

        let result = timeout(Duration::from_secs(5), handle.wait()).await.unwrap().unwrap();

        assert_eq!(result.status, JobStatus::Success);
        let count = result.outputs.get("count").unwrap();
        assert_eq!(count.location.as_deref(), Some("gs://b/runs/1/count.txt"));
        assert!(!count.hostfs);
        assert_eq!(backend.polls.load(Ordering::SeqCst), 3);
        assert!(result.finished_at >= result.submitted_at);
    }

    #[tokio::test]
    async fn outputs_no_reportados_terminan_en_permanent_fail() {
        let r = runner(FakeBackend::with(1, true), config());

        let result = r.submit(&step(), &job()).await.unwrap().wait().await.unwrap();

        assert_eq!(result.status, JobStatus::PermanentFail);
        assert_eq!(result.outputs.get("count").unwrap().location, None);
    }

    #[tokio::test]
    async fn rechazo_del_backend_sale_sincronico() {
        let backend = FakeBackend::new(1);
        backend.reject.store(true, Ordering::SeqCst);
        let r = runner(backend, config());

        let err = r.submit(&step(), &job()).await.unwrap_err();

        assert!(matches!(err, FunnelError::Submission { status: 400, .. }));
        assert_eq!(r.in_flight(), 0);
    }

    #[tokio::test]
    async fn callback_recibe_el_resultado_una_sola_vez() {
        let r = runner(FakeBackend::new(2), config());
        let calls = Arc::new(AtomicU32::new(0));
        let (tx, rx) = oneshot::channel();

        let counter = calls.clone();
        let submitted = r
            .submit_with_callback(&step(), &job(), move |result| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(result.status);
            })
            .await
            .unwrap();

        assert_eq!(rx.await.unwrap(), JobStatus::Success);
        sleep(Duration::from_millis(20)).await;
        assert!(submitted.is_finished());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(r.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelar_un_job_lo_reporta_como_fallido() {
        let r = runner(FakeBackend::new(u32::MAX), config());

        let handle = r.submit(&step(), &job()).await.unwrap();
        assert_eq!(r.in_flight(), 1);
        handle.cancel();

        let result = timeout(Duration::from_secs(5), handle.wait()).await.unwrap().unwrap();
        assert_eq!(result.status, JobStatus::PermanentFail);
        assert_eq!(result.outputs.unresolved(), vec!["count".to_string()]);
    }

    #[tokio::test]
    async fn max_in_flight_frena_nuevos_envios() {
        let backend = FakeBackend::new(u32::MAX);
        let cfg = PipelineConfig {
            max_in_flight: 1,
            ..config()
        };
        let r = runner(backend.clone(), cfg);

        let first = r.submit(&step(), &job()).await.unwrap();

        let r2 = r.clone();
        let second = tokio::spawn(async move { r2.submit(&step(), &job()).await });

        sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.submitted.lock().unwrap().len(), 1);

        first.cancel();
        first.wait().await.unwrap();

        let second = timeout(Duration::from_secs(5), second).await.unwrap().unwrap().unwrap();
        assert_eq!(second.operation(), "operations/2");
        second.cancel();
    }
}
