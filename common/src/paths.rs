use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FunnelError;

pub const GS_SCHEME: &str = "gs://";

/// Marca que buscamos dentro de referencias "medio prefijadas", ej:
/// "file:///tmp/stage/gs:/bucket/x.txt" (el staging colapsa la doble barra).
const GS_MARKER: &str = "gs:/";

/// Nombre visible + ubicación física (URI canónica en el bucket).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationEntry {
    pub target: String,
    pub physical: String,
}

/// Referencia lógica -> LocationEntry. Cada entrada aparece dos veces:
/// bajo la clave original y bajo la URI canónica.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationMap {
    entries: BTreeMap<String, LocationEntry>,
}

impl LocationMap {
    pub fn get(&self, reference: &str) -> Result<&LocationEntry, FunnelError> {
        self.entries
            .get(reference)
            .ok_or_else(|| FunnelError::Resolution {
                reference: reference.to_string(),
            })
    }

    pub fn physical(&self, reference: &str) -> Result<&str, FunnelError> {
        self.get(reference).map(|e| e.physical.as_str())
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.entries.contains_key(reference)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, reference: &str, entry: LocationEntry) {
        self.entries.insert(reference.to_string(), entry);
    }
}

/// Busca una URI gs embebida y la devuelve normalizada ("gs://...").
/// Si no hay marca devuelve None: no es un error, la referencia es local.
pub fn extract_gs(reference: &str) -> Option<String> {
    let index = reference.find(GS_MARKER)?;
    let rest = reference[index + GS_MARKER.len()..].trim_start_matches('/');
    if rest.is_empty() {
        return None;
    }
    Some(format!("{GS_SCHEME}{rest}"))
}

/// Quita el esquema gs:// si lo tiene.
pub fn strip_scheme(location: &str) -> &str {
    location.strip_prefix(GS_SCHEME).unwrap_or(location)
}

/// Último segmento no vacío de la referencia, sin esquema file://.
pub fn base_name(reference: &str) -> &str {
    let local = reference.strip_prefix("file://").unwrap_or(reference);
    local
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(local)
}

/// URI canónica para algo que se promueve del disco local al bucket:
/// gs://<bucket>/<output_path>/<relative>.
pub fn promote(bucket: &str, output_path: &str, relative: &str) -> String {
    let output_path = output_path.trim_matches('/');
    let relative = relative.trim_start_matches('/');
    if output_path.is_empty() {
        format!("{GS_SCHEME}{bucket}/{relative}")
    } else {
        format!("{GS_SCHEME}{bucket}/{output_path}/{relative}")
    }
}

/// Resuelve cada referencia lógica a su ubicación en el bucket.
pub fn resolve<I, S>(references: I, bucket: &str, output_path: &str) -> LocationMap
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut map = LocationMap::default();

    for reference in references {
        let reference = reference.as_ref();

        let canonical = match extract_gs(reference) {
            Some(remote) => remote,
            None => promote(bucket, output_path, base_name(reference)),
        };

        let entry = LocationEntry {
            target: canonical.clone(),
            physical: canonical.clone(),
        };

        debug!(reference, physical = %canonical, "referencia resuelta");
        map.insert(reference, entry.clone());
        map.insert(&canonical, entry);
    }

    map
}
