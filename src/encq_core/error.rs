use std::collections::BTreeMap;

use thiserror::Error;

/// Stable error taxonomy surfaced across the command boundary. Each variant
/// carries a fixed code so front ends can branch without parsing messages.
#[derive(Debug, Error)]
pub enum EncqError {
    #[error("E_VALIDATION: {}", format_fields(.0))]
    Validation(BTreeMap<String, String>),

    #[error("E_TOOL_NOT_FOUND: {0}")]
    ToolNotFound(String),

    #[error("E_TOOL_VERSION_UNSUPPORTED: {0}")]
    ToolVersionUnsupported(String),

    #[error("E_ENCODER_NOT_IMPLEMENTED: {0}")]
    EncoderNotImplemented(String),

    #[error("E_SESSION_RUNNING: a session is already active")]
    SessionRunning,

    #[error("E_IO: {0}")]
    Io(String),

    #[error("E_INTERNAL: {0}")]
    Internal(String),
}

impl EncqError {
    pub fn code(&self) -> &'static str {
        match self {
            EncqError::Validation(_) => "E_VALIDATION",
            EncqError::ToolNotFound(_) => "E_TOOL_NOT_FOUND",
            EncqError::ToolVersionUnsupported(_) => "E_TOOL_VERSION_UNSUPPORTED",
            EncqError::EncoderNotImplemented(_) => "E_ENCODER_NOT_IMPLEMENTED",
            EncqError::SessionRunning => "E_SESSION_RUNNING",
            EncqError::Io(_) => "E_IO",
            EncqError::Internal(_) => "E_INTERNAL",
        }
    }

    /// Wraps a field -> reason map produced by a validator. The map must be
    /// non-empty; validators return an empty map to signal "valid".
    pub fn validation(fields: BTreeMap<String, String>) -> Self {
        EncqError::Validation(fields)
    }

    pub fn validation_field(field: &str, reason: &str) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), reason.to_string());
        EncqError::Validation(fields)
    }
}

impl From<std::io::Error> for EncqError {
    fn from(err: std::io::Error) -> Self {
        EncqError::Io(err.to_string())
    }
}

fn format_fields(fields: &BTreeMap<String, String>) -> String {
    let parts: Vec<String> = fields.iter().map(|(k, v)| format!("{k}: {v}")).collect();
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_fields_in_stable_order() {
        let mut fields = BTreeMap::new();
        fields.insert("rate_value".to_string(), "must be > 0".to_string());
        fields.insert("bframes".to_string(), "must be 0..7".to_string());
        let err = EncqError::validation(fields);
        assert_eq!(err.code(), "E_VALIDATION");
        assert_eq!(
            err.to_string(),
            "E_VALIDATION: bframes: must be 0..7; rate_value: must be > 0"
        );
    }

    #[test]
    fn io_errors_map_to_io_code() {
        let err: EncqError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing file").into();
        assert_eq!(err.code(), "E_IO");
    }
}
