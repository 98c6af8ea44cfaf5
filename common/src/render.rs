use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::FunnelError;
use crate::paths::{strip_scheme, LocationMap};
use crate::step::{
    InputParameter, InputType, JobOrder, JobValue, OutputParameter, PathClass, StepSpec,
};

/// Glob relativo al mount + clase declarada de un output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputGlob {
    pub glob: String,
    pub class: PathClass,
}

/// Resultado de renderizar un step contra su job order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedJob {
    pub command: String,
    /// id corto -> URI física de cada input File/Directory.
    pub inputs: BTreeMap<String, String>,
    /// id corto -> glob de cada output declarado.
    pub outputs: BTreeMap<String, OutputGlob>,
}

fn is_path_input(input: &InputParameter) -> bool {
    matches!(input.kind, InputType::File | InputType::Directory)
}

fn is_boolean_input(input: &InputParameter) -> bool {
    match &input.kind {
        InputType::Boolean => true,
        InputType::Other(name) => name.starts_with("boolean"),
        _ => false,
    }
}

/// Normaliza el glob de un output. Los Directory siempre terminan en "/".
pub fn render_output(step: &StepSpec, output: &OutputParameter) -> (String, OutputGlob) {
    let mut glob = output.binding.glob.clone();

    if output.class == PathClass::Directory {
        if glob == "." {
            glob = "/".to_string();
        } else if !glob.ends_with('/') {
            glob.push('/');
        }
    }

    (
        step.short_id(&output.id).to_string(),
        OutputGlob {
            glob,
            class: output.class,
        },
    )
}

pub fn render_outputs(step: &StepSpec) -> BTreeMap<String, OutputGlob> {
    step.outputs
        .iter()
        .map(|output| render_output(step, output))
        .collect()
}

/// Inputs ordenados por posición; sort estable, así los empates y los que
/// no tienen posición conservan el orden de declaración.
pub fn sorted_inputs(step: &StepSpec) -> Vec<&InputParameter> {
    let mut sorted: Vec<&InputParameter> = step.inputs.iter().collect();
    sorted.sort_by_key(|input| input.position());
    sorted
}

fn scalar_token(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(scalar_token).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        }
        other => Some(other.to_string()),
    }
}

/// Token de línea de comando para un input (con su prefijo si lo declara).
/// None cuando el input no aporta nada.
pub fn command_input(
    step: &StepSpec,
    job: &JobOrder,
    locations: &LocationMap,
    mount: &str,
    input: &InputParameter,
) -> Result<Option<String>, FunnelError> {
    let input_id = step.short_id(&input.id);
    let prefix = input.prefix();

    if is_boolean_input(input) {
        let enabled = !matches!(job.get(input_id), Some(JobValue::Scalar(Value::Bool(false))));
        return Ok(match prefix {
            Some(p) if enabled => Some(p.to_string()),
            _ => None,
        });
    }

    let value = job
        .get(input_id)
        .ok_or_else(|| FunnelError::MissingInputValue {
            input: input_id.to_string(),
        })?;

    let token = if is_path_input(input) {
        let location = value.location().ok_or_else(|| FunnelError::MissingInputValue {
            input: input_id.to_string(),
        })?;
        let physical = locations.physical(location)?;
        Some(format!("{}/{}", mount.trim_end_matches('/'), strip_scheme(physical)))
    } else {
        match value {
            JobValue::Scalar(v) => scalar_token(v),
            JobValue::Path(p) => Some(p.location.clone()),
        }
    };

    Ok(match (prefix, token) {
        (Some(p), Some(t)) => Some(format!("{p} {t}")),
        (None, Some(t)) => Some(t),
        (_, None) => None,
    })
}

/// Arma la línea de comando literal y los mapas de inputs/outputs.
pub fn render(
    step: &StepSpec,
    job: &JobOrder,
    locations: &LocationMap,
    mount: &str,
) -> Result<RenderedJob, FunnelError> {
    let mut parts: Vec<String> = step.base_command.clone();
    parts.extend(step.arguments.iter().cloned());

    for input in sorted_inputs(step) {
        if let Some(token) = command_input(step, job, locations, mount, input)? {
            parts.push(token);
        }
    }

    let mut command = parts.join(" ");
    if let Some(stdout) = &step.stdout {
        command.push_str(&format!(" > {}/{}", mount.trim_end_matches('/'), stdout));
    }

    let mut inputs = BTreeMap::new();
    for input in step.inputs.iter().filter(|i| is_path_input(i)) {
        let input_id = step.short_id(&input.id);
        let location = job
            .get(input_id)
            .and_then(|v| v.location())
            .ok_or_else(|| FunnelError::MissingInputValue {
                input: input_id.to_string(),
            })?;
        inputs.insert(input_id.to_string(), locations.physical(location)?.to_string());
    }

    let outputs = render_outputs(step);

    debug!(step = %step.id, %command, "comando renderizado");
    debug!(step = %step.id, ?outputs, "outputs renderizados");

    Ok(RenderedJob {
        command,
        inputs,
        outputs,
    })
}
