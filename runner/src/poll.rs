use std::{sync::Arc, time::Duration};

use common::{Operation, OutputMap, PollSettings};
use rand::Rng;
use tokio::{
    task::JoinHandle,
    time::{sleep, sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::PipelinesBackend;

/// Estados del poller. Un fallo en el envío nunca llega a construir uno.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    Polling,
    Done,
}

/// Cómo terminó el polling de una operación.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// El backend reportó done=true.
    Done(Operation),
    Cancelled,
    DeadlineExceeded,
    /// Se superó max-poll-failures fallos de transporte seguidos.
    TooManyFailures { last_error: String },
}

/// Intervalo base + un extra aleatorio dentro de la banda de jitter.
/// Con base de al menos un segundo se redondea hacia arriba a segundos
/// enteros; con base sub-segundo el resultado queda tal cual.
/// Sin jitter se usa el base sin tocar.
pub fn jittered_interval(settings: &PollSettings) -> Duration {
    if settings.jitter.is_zero() {
        return settings.interval;
    }
    let extra = settings.jitter.mul_f64(rand::rng().random_range(0.0..=1.0));
    let total = settings.interval + extra;
    if settings.interval < Duration::from_secs(1) {
        return total;
    }
    Duration::from_secs_f64(total.as_secs_f64().ceil())
}

/// Vigila una operación hasta que termina y llama `on_complete` una sola vez.
pub struct CompletionPoller<F> {
    backend: Arc<dyn PipelinesBackend>,
    operation: Operation,
    outputs: OutputMap,
    on_complete: F,
    interval: Duration,
    deadline: Option<Duration>,
    max_failures: Option<u32>,
    cancel: CancellationToken,
    state: PollState,
}

impl<F> CompletionPoller<F>
where
    F: FnOnce(PollOutcome, OutputMap) + Send + 'static,
{
    pub fn new(
        backend: Arc<dyn PipelinesBackend>,
        operation: Operation,
        outputs: OutputMap,
        on_complete: F,
        settings: &PollSettings,
    ) -> Self {
        Self {
            backend,
            operation,
            outputs,
            on_complete,
            interval: jittered_interval(settings),
            deadline: settings.deadline,
            max_failures: settings.max_failures,
            cancel: CancellationToken::new(),
            state: PollState::Submitted,
        }
    }

    /// Intervalo fijo en lugar del aleatorio.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Corre el loop en su propia tarea de tokio.
    pub fn spawn(self) -> JoinHandle<u32> {
        tokio::spawn(self.run())
    }

    /// Loop de polling; devuelve cuántas veces se consultó al backend.
    pub async fn run(mut self) -> u32 {
        let name = self.operation.name.clone();
        let mut polls: u32 = 0;

        if self.operation.done {
            let op = self.operation.clone();
            self.finish(PollOutcome::Done(op));
            return polls;
        }

        self.state = PollState::Polling;
        info!(operation = %name, interval = ?self.interval, "esperando operación");

        let deadline_at = self.deadline.map(|d| Instant::now() + d);
        let deadline = async move {
            match deadline_at {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let cancel = self.cancel.clone();
        let backend = self.backend.clone();
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.finish(PollOutcome::Cancelled);
                    return polls;
                }
                _ = &mut deadline => {
                    self.finish(PollOutcome::DeadlineExceeded);
                    return polls;
                }
                _ = sleep(self.interval) => {}
            }

            // la consulta también compite con el deadline
            let fetched = tokio::select! {
                _ = cancel.cancelled() => Err(PollOutcome::Cancelled),
                _ = &mut deadline => Err(PollOutcome::DeadlineExceeded),
                r = backend.get_operation(&name) => Ok(r),
            };
            let result = match fetched {
                Ok(result) => result,
                Err(outcome) => {
                    self.finish(outcome);
                    return polls;
                }
            };
            polls += 1;

            match result {
                Ok(op) if op.done => {
                    debug!(operation = %name, polls, "operación terminada");
                    self.finish(PollOutcome::Done(op));
                    return polls;
                }
                Ok(op) => {
                    consecutive_failures = 0;
                    self.operation = op;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        operation = %name,
                        error = %e,
                        consecutive_failures,
                        "fallo consultando la operación, se reintenta en el próximo tick"
                    );
                    if let Some(max) = self.max_failures {
                        if consecutive_failures >= max {
                            self.finish(PollOutcome::TooManyFailures {
                                last_error: e.to_string(),
                            });
                            return polls;
                        }
                    }
                }
            }
        }
    }

    fn finish(mut self, outcome: PollOutcome) {
        self.state = PollState::Done;
        debug!(operation = %self.operation.name, state = ?self.state, "poller terminado");

        let CompletionPoller {
            operation,
            outputs,
            on_complete,
            ..
        } = self;

        match &outcome {
            PollOutcome::Done(_) => info!(operation = %operation.name, "operación completa"),
            other => warn!(operation = %operation.name, outcome = ?other, "polling terminado sin done"),
        }
        on_complete(outcome, outputs);
    }
}
