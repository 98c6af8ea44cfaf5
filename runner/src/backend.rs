use std::{env, time::Duration};

use async_trait::async_trait;
use common::{FunnelError, Operation, PipelineConfig, TaskRequest};
use reqwest::{Client, RequestBuilder, Response};
use tracing::debug;

const API_VERSION: &str = "v1alpha2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Cliente del backend remoto de ejecución. Se comparte entre todos los
/// pollers, así que sólo expone operaciones de lectura sobre `&self`.
#[async_trait]
pub trait PipelinesBackend: Send + Sync {
    /// pipelines:run. Un error acá es fatal para el job; no se reintenta.
    async fn run_pipeline(&self, task: &TaskRequest) -> Result<Operation, FunnelError>;

    /// Vuelve a leer una operación por nombre ("operations/...").
    async fn get_operation(&self, name: &str) -> Result<Operation, FunnelError>;
}

/// Sesión HTTP contra el API de pipelines. Se construye una vez y se inyecta;
/// no hay credenciales globales.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, FunnelError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FunnelError::config(format!("no se pudo crear el cliente HTTP: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Igual que el resto de la config: URL desde la configuración y token
    /// opcional desde FUNNEL_ACCESS_TOKEN.
    pub fn from_config(cfg: &PipelineConfig) -> Result<Self, FunnelError> {
        let token = env::var("FUNNEL_ACCESS_TOKEN").ok().filter(|t| !t.is_empty());
        Self::new(cfg.api_base_url.clone(), token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn decode(resp: Response) -> Result<Operation, FunnelError> {
        resp.json::<Operation>()
            .await
            .map_err(|e| FunnelError::Decode {
                message: e.to_string(),
            })
    }
}

fn transport(e: reqwest::Error) -> FunnelError {
    FunnelError::Transport {
        message: e.to_string(),
    }
}

#[async_trait]
impl PipelinesBackend for HttpBackend {
    async fn run_pipeline(&self, task: &TaskRequest) -> Result<Operation, FunnelError> {
        let url = format!("{}/{API_VERSION}/pipelines:run", self.base_url);
        debug!(%url, "enviando tarea");

        let resp = self
            .authorized(self.client.post(&url).json(task))
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FunnelError::Submission {
                status: status.as_u16(),
                message,
            });
        }

        Self::decode(resp).await
    }

    async fn get_operation(&self, name: &str) -> Result<Operation, FunnelError> {
        let url = format!("{}/{API_VERSION}/{}", self.base_url, name.trim_start_matches('/'));

        let resp = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            // un 5xx o un 404 transitorio no termina el job: se reintenta en el próximo tick
            let message = resp.text().await.unwrap_or_default();
            return Err(FunnelError::Transport {
                message: format!("GET {url} devolvió {status}: {message}"),
            });
        }

        Self::decode(resp).await
    }
}
