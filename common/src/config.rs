use std::{env, fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::FunnelError;

pub const BASE_MOUNT: &str = "/mnt/data";
pub const DEFAULT_API_BASE_URL: &str = "https://genomics.googleapis.com";
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const DEFAULT_IMAGE: &str = "ubuntu";
const DEFAULT_DISK_SIZE_GB: u32 = 150;
const DEFAULT_DISK_TYPE: &str = "PERSISTENT_HDD";
const DEFAULT_MIN_CPU_CORES: u32 = 1;
const DEFAULT_MIN_RAM_GB: u32 = 16;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_POLL_JITTER_SECS: u64 = 5;
const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Tope de permisos que acepta `tokio::sync::Semaphore` (usize::MAX >> 3).
pub const MAX_IN_FLIGHT_LIMIT: usize = usize::MAX >> 3;

/// Prefijo de las variables de entorno que pisan la configuración,
/// ej: FUNNEL_OUTPUT_PATH, FUNNEL_BUCKET.
const ENV_PREFIX: &str = "FUNNEL_";

/// Bolsa de configuración por corrida. Las claves se serializan en kebab-case
/// para que coincidan con las opciones que entrega el motor de workflows
/// ("mount-point", "output-path", ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PipelineConfig {
    pub mount_point: String,
    pub output_path: String,
    pub project_id: String,
    pub bucket: String,
    pub service_account: String,

    pub default_image: String,

    /* --------- política de recursos (parámetros de despliegue) --------- */
    pub disk_size_gb: u32,
    pub disk_type: String,
    pub min_cpu_cores: u32,
    pub min_ram_gb: u32,
    pub scopes: Vec<String>,

    /* --------- polling --------- */
    pub poll_interval_secs: u64,
    pub poll_jitter_secs: u64,
    pub poll_deadline_secs: Option<u64>,
    pub max_poll_failures: Option<u32>,
    pub max_in_flight: usize,

    pub api_base_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mount_point: BASE_MOUNT.to_string(),
            output_path: String::new(),
            project_id: String::new(),
            bucket: String::new(),
            service_account: String::new(),
            default_image: DEFAULT_IMAGE.to_string(),
            disk_size_gb: DEFAULT_DISK_SIZE_GB,
            disk_type: DEFAULT_DISK_TYPE.to_string(),
            min_cpu_cores: DEFAULT_MIN_CPU_CORES,
            min_ram_gb: DEFAULT_MIN_RAM_GB,
            scopes: vec![CLOUD_PLATFORM_SCOPE.to_string()],
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            poll_jitter_secs: DEFAULT_POLL_JITTER_SECS,
            poll_deadline_secs: None,
            max_poll_failures: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

/// Disco + mínimos de CPU/RAM que se copian tal cual al TaskRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePolicy {
    pub disk_size_gb: u32,
    pub disk_type: String,
    pub min_cpu_cores: u32,
    pub min_ram_gb: u32,
    pub scopes: Vec<String>,
}

/// `interval` es el base; el poller le suma un extra aleatorio de hasta
/// `jitter` (ver `jittered_interval` en el runner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub jitter: Duration,
    pub deadline: Option<Duration>,
    pub max_failures: Option<u32>,
}

impl PipelineConfig {
    /// Lee la configuración desde un JSON; las claves ausentes toman su default.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("no se pudo leer la configuración {}", path.display()))?;
        let cfg: PipelineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("configuración inválida en {}", path.display()))?;
        Ok(cfg)
    }

    /// Defaults + variables FUNNEL_*.
    pub fn from_env() -> Self {
        let mut cfg = PipelineConfig::default();
        cfg.apply_env_overrides();
        cfg
    }

    /// Pisa cada campo con su variable de entorno si está definida y parsea.
    pub fn apply_env_overrides(&mut self) {
        override_string(&mut self.mount_point, "MOUNT_POINT");
        override_string(&mut self.output_path, "OUTPUT_PATH");
        override_string(&mut self.project_id, "PROJECT_ID");
        override_string(&mut self.bucket, "BUCKET");
        override_string(&mut self.service_account, "SERVICE_ACCOUNT");
        override_string(&mut self.default_image, "DEFAULT_IMAGE");
        override_parsed(&mut self.disk_size_gb, "DISK_SIZE_GB");
        override_string(&mut self.disk_type, "DISK_TYPE");
        override_parsed(&mut self.min_cpu_cores, "MIN_CPU_CORES");
        override_parsed(&mut self.min_ram_gb, "MIN_RAM_GB");
        override_parsed(&mut self.poll_interval_secs, "POLL_INTERVAL_SECS");
        override_parsed(&mut self.poll_jitter_secs, "POLL_JITTER_SECS");
        override_parsed(&mut self.max_in_flight, "MAX_IN_FLIGHT");
        override_string(&mut self.api_base_url, "API_BASE_URL");

        if let Some(secs) = env_parsed::<u64>("POLL_DEADLINE_SECS") {
            self.poll_deadline_secs = Some(secs);
        }
        if let Some(n) = env_parsed::<u32>("MAX_POLL_FAILURES") {
            self.max_poll_failures = Some(n);
        }
        if let Ok(scopes) = env::var(format!("{ENV_PREFIX}SCOPES")) {
            self.scopes = scopes
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    pub fn validate(&self) -> Result<(), FunnelError> {
        let required = [
            ("output-path", &self.output_path),
            ("project-id", &self.project_id),
            ("bucket", &self.bucket),
            ("service-account", &self.service_account),
            ("mount-point", &self.mount_point),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(FunnelError::config(format!("falta la opción {key}")));
            }
        }

        if self.bucket.contains("://") {
            return Err(FunnelError::config(format!(
                "bucket debe ir sin esquema, se recibió {}",
                self.bucket
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(FunnelError::config("poll-interval-secs debe ser > 0"));
        }
        if self.max_in_flight == 0 {
            return Err(FunnelError::config("max-in-flight debe ser > 0"));
        }
        if self.max_in_flight > MAX_IN_FLIGHT_LIMIT {
            return Err(FunnelError::config(format!(
                "max-in-flight no puede superar {MAX_IN_FLIGHT_LIMIT}, se recibió {}",
                self.max_in_flight
            )));
        }
        Ok(())
    }

    pub fn resource_policy(&self) -> ResourcePolicy {
        ResourcePolicy {
            disk_size_gb: self.disk_size_gb,
            disk_type: self.disk_type.clone(),
            min_cpu_cores: self.min_cpu_cores,
            min_ram_gb: self.min_ram_gb,
            scopes: self.scopes.clone(),
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            jitter: Duration::from_secs(self.poll_jitter_secs),
            deadline: self.poll_deadline_secs.map(Duration::from_secs),
            max_failures: self.max_poll_failures,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
}

fn override_string(field: &mut String, key: &str) {
    if let Ok(value) = env::var(format!("{ENV_PREFIX}{key}")) {
        *field = value;
    }
}

fn override_parsed<T: std::str::FromStr>(field: &mut T, key: &str) {
    if let Some(value) = env_parsed(key) {
        *field = value;
    }
}
