use thiserror::Error;

/// Errores del adaptador, agrupados según dónde ocurren en el pipeline:
/// resolución/render (antes de enviar), envío, y transporte durante el polling.
#[derive(Debug, Error)]
pub enum FunnelError {
    /// Una referencia lógica no tiene LocationEntry.
    #[error("no hay ubicación resuelta para la referencia {reference}")]
    Resolution { reference: String },

    /// El job order no trae valor para un input que lo necesita.
    #[error("el input {input} no tiene valor en el job order")]
    MissingInputValue { input: String },

    #[error("el step no declara imagen de contenedor y no hay default-image configurada")]
    MissingContainerImage,

    #[error("configuración inválida: {message}")]
    Config { message: String },

    /// El backend rechazó la tarea (parámetros, cuota, auth).
    #[error("el backend rechazó la tarea (status {status}): {message}")]
    Submission { status: u16, message: String },

    /// Falló la llamada de red en sí; en el polling se reintenta.
    #[error("error de transporte: {message}")]
    Transport { message: String },

    #[error("respuesta del backend inválida: {message}")]
    Decode { message: String },

    /// El poller terminó sin entregar resultado (panic o runtime apagado).
    #[error("el poller de {operation} terminó sin entregar resultado")]
    Aborted { operation: String },
}

impl FunnelError {
    pub fn config(message: impl Into<String>) -> Self {
        FunnelError::Config {
            message: message.into(),
        }
    }

    /// true para errores que vale la pena reintentar en el próximo tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, FunnelError::Transport { .. } | FunnelError::Decode { .. })
    }
}
