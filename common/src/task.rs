use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ResourcePolicy;
use crate::paths::{promote, strip_scheme, GS_SCHEME};
use crate::render::OutputGlob;

pub const DATA_DISK: &str = "data";
const PIPELINE_NAME: &str = "funnel workflow";
const PIPELINE_DESCRIPTION: &str = "run a google pipeline from cwl";

/* --------- Cuerpo de pipelines:run (v1alpha2) --------- */

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub ephemeral_pipeline: EphemeralPipeline,
    pub pipeline_args: PipelineArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralPipeline {
    pub project_id: String,
    pub name: String,
    pub description: String,
    pub docker: DockerExecutor,
    pub input_parameters: Vec<Parameter>,
    pub output_parameters: Vec<Parameter>,
    pub resources: Resources,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerExecutor {
    pub cmd: String,
    pub image_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    pub description: String,
    pub local_copy: LocalCopy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCopy {
    pub path: String,
    pub disk: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    pub disks: Vec<Disk>,
    pub minimum_cpu_cores: u32,
    pub minimum_ram_gb: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
    pub auto_delete: bool,
    pub mount_point: String,
    pub size_gb: u32,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineArgs {
    pub inputs: BTreeMap<String, String>,
    /// id de output -> URI final donde el backend promueve el resultado.
    pub outputs: BTreeMap<String, String>,
    pub logging: LoggingDestination,
    pub project_id: String,
    pub service_account: ServiceAccount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingDestination {
    pub gcs_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub email: String,
    pub scopes: Vec<String>,
}

/// Todo lo que TaskBuilder necesita; no hace I/O.
#[derive(Debug, Clone)]
pub struct TaskSpec<'a> {
    pub project_id: &'a str,
    pub container_image: &'a str,
    pub service_account: &'a str,
    pub bucket: &'a str,
    pub command: &'a str,
    pub inputs: &'a BTreeMap<String, String>,
    pub outputs: &'a BTreeMap<String, OutputGlob>,
    pub output_path: &'a str,
    pub mount_point: &'a str,
    pub resources: &'a ResourcePolicy,
}

fn local_copy(name: &str, path: &str) -> Parameter {
    Parameter {
        name: name.to_string(),
        description: name.to_string(),
        local_copy: LocalCopy {
            path: path.to_string(),
            disk: DATA_DISK.to_string(),
        },
    }
}

/// Arma el TaskRequest exacto que acepta el backend.
pub fn build_task(spec: &TaskSpec<'_>) -> TaskRequest {
    // inputs: se copian al disco con la ruta física sin "gs://"
    let input_parameters = spec
        .inputs
        .iter()
        .map(|(name, physical)| local_copy(name, strip_scheme(physical)))
        .collect();

    // outputs: se escriben localmente con su glob y después se promueven
    let output_parameters = spec
        .outputs
        .iter()
        .map(|(name, out)| local_copy(name, &out.glob))
        .collect();

    let destinations = spec
        .outputs
        .iter()
        .map(|(name, out)| {
            (
                name.clone(),
                promote(spec.bucket, spec.output_path, &out.glob),
            )
        })
        .collect();

    TaskRequest {
        ephemeral_pipeline: EphemeralPipeline {
            project_id: spec.project_id.to_string(),
            name: PIPELINE_NAME.to_string(),
            description: PIPELINE_DESCRIPTION.to_string(),
            docker: DockerExecutor {
                cmd: spec.command.to_string(),
                image_name: spec.container_image.to_string(),
            },
            input_parameters,
            output_parameters,
            resources: Resources {
                disks: vec![Disk {
                    name: DATA_DISK.to_string(),
                    auto_delete: true,
                    mount_point: spec.mount_point.to_string(),
                    size_gb: spec.resources.disk_size_gb,
                    kind: spec.resources.disk_type.clone(),
                }],
                minimum_cpu_cores: spec.resources.min_cpu_cores,
                minimum_ram_gb: spec.resources.min_ram_gb,
            },
        },
        pipeline_args: PipelineArgs {
            inputs: spec.inputs.clone(),
            outputs: destinations,
            logging: LoggingDestination {
                gcs_path: format!("{GS_SCHEME}{}/{}/logging", spec.bucket, spec.project_id),
            },
            project_id: spec.project_id.to_string(),
            service_account: ServiceAccount {
                email: spec.service_account.to_string(),
                scopes: spec.resources.scopes.clone(),
            },
        },
    }
}
