use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Posición que se usa para los inputs sin `position`: siempre quedan al final.
pub const UNORDERED_POSITION: i64 = 9_999_999;

/// Clase de un valor de tipo ruta (entrada o salida).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathClass {
    File,
    Directory,
}

/// Tipo declarado de un input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[serde(rename = "File")]
    File,
    #[serde(rename = "Directory")]
    Directory,
    Boolean,
    /// Cualquier otro escalar ("string", "int", "string[]", ...).
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBinding {
    pub position: Option<i64>,
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputParameter {
    /// Id completo, ej: "#cat#reverse" o "cat#input".
    pub id: String,
    #[serde(rename = "type")]
    pub kind: InputType,
    #[serde(rename = "inputBinding", default)]
    pub binding: Option<InputBinding>,
}

impl InputParameter {
    pub fn position(&self) -> i64 {
        self.binding
            .as_ref()
            .and_then(|b| b.position)
            .unwrap_or(UNORDERED_POSITION)
    }

    pub fn prefix(&self) -> Option<&str> {
        self.binding.as_ref().and_then(|b| b.prefix.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputBinding {
    pub glob: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputParameter {
    pub id: String,
    #[serde(rename = "type")]
    pub class: PathClass,
    #[serde(rename = "outputBinding")]
    pub binding: OutputBinding,
}

/// Descripción de un step tal como la entrega el motor de workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    pub id: String,
    #[serde(default)]
    pub inputs: Vec<InputParameter>,
    #[serde(default)]
    pub outputs: Vec<OutputParameter>,
    pub base_command: Vec<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub stdout: Option<String>,
    /// Imagen del DockerRequirement, si el step declara uno.
    #[serde(default)]
    pub docker_image: Option<String>,
}

impl StepSpec {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("no se pudo leer el step {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("step inválido en {}", path.display()))
    }

    /// Quita el prefijo "<id del step>#" de un id completo.
    pub fn short_id<'a>(&self, full_id: &'a str) -> &'a str {
        let prefix = format!("{}#", self.id);
        full_id.strip_prefix(prefix.as_str()).unwrap_or(full_id)
    }
}

/// Valor de tipo File/Directory dentro del job order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathValue {
    pub class: PathClass,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobValue {
    Path(PathValue),
    Scalar(serde_json::Value),
}

impl JobValue {
    pub fn location(&self) -> Option<&str> {
        match self {
            JobValue::Path(p) => Some(&p.location),
            JobValue::Scalar(_) => None,
        }
    }
}

/// Valores ligados a cada input (por id corto) para esta invocación.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobOrder(pub BTreeMap<String, JobValue>);

impl JobOrder {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("no se pudo leer el job order {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("job order inválido en {}", path.display()))
    }

    pub fn get(&self, input: &str) -> Option<&JobValue> {
        self.0.get(input)
    }

    pub fn insert(&mut self, input: impl Into<String>, value: JobValue) {
        self.0.insert(input.into(), value);
    }

    /// Todas las ubicaciones File/Directory referenciadas, sin repetir.
    pub fn referenced_locations(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for value in self.0.values() {
            if let Some(loc) = value.location() {
                if !out.iter().any(|l| l == loc) {
                    out.push(loc.to_string());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_spec_se_parsea_desde_json_estilo_cwl() {
        let raw = json!({
            "id": "#rev",
            "baseCommand": ["rev"],
            "inputs": [
                {"id": "#rev#input", "type": "File", "inputBinding": {"position": 2}},
                {"id": "#rev#verbose", "type": "boolean", "inputBinding": {"prefix": "-v"}},
                {"id": "#rev#label", "type": "string"}
            ],
            "outputs": [
                {"id": "#rev#output", "type": "File", "outputBinding": {"glob": "out.txt"}}
            ],
            "stdout": "out.txt"
        });

        let step: StepSpec = serde_json::from_value(raw).unwrap();

        assert_eq!(step.inputs[0].kind, InputType::File);
        assert_eq!(step.inputs[0].position(), 2);
        assert_eq!(step.inputs[1].kind, InputType::Boolean);
        assert_eq!(step.inputs[1].prefix(), Some("-v"));
        assert_eq!(step.inputs[1].position(), UNORDERED_POSITION);
        assert_eq!(step.inputs[2].kind, InputType::Other("string".into()));
        assert_eq!(step.outputs[0].class, PathClass::File);
        assert_eq!(step.stdout.as_deref(), Some("out.txt"));
        assert!(step.arguments.is_empty());
    }

    #[test]
    fn short_id_quita_solo_el_prefijo_del_step() {
        let step: StepSpec =
            serde_json::from_value(json!({"id": "#rev", "baseCommand": ["rev"]})).unwrap();

        assert_eq!(step.short_id("#rev#output"), "output");
        assert_eq!(step.short_id("output"), "output");
        assert_eq!(step.short_id("#otro#output"), "#otro#output");
    }

    #[test]
    fn job_order_distingue_rutas_de_escalares() {
        let job: JobOrder = serde_json::from_value(json!({
            "input": {"class": "File", "location": "gs://b/in.txt"},
            "dir": {"class": "Directory", "location": "/tmp/dir"},
            "copia": {"class": "File", "location": "gs://b/in.txt"},
            "n": 3,
            "label": "hola"
        }))
        .unwrap();

        assert_eq!(job.get("input").and_then(|v| v.location()), Some("gs://b/in.txt"));
        assert_eq!(job.get("n"), Some(&JobValue::Scalar(json!(3))));

        let locs = job.referenced_locations();
        assert_eq!(locs.len(), 2);
        assert!(locs.contains(&"gs://b/in.txt".to_string()));
        assert!(locs.contains(&"/tmp/dir".to_string()));
    }
}
