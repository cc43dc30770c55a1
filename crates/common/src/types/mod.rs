use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct Health {
    pub status: &'static str,
}

/// Uniform response body: `{success, data}` on success and
/// `{success, message, code}` on failure.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Stable machine-checkable reason, e.g. `InsufficientRole`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), message: None, code: None }
    }

    pub fn error(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self { success: false, data: None, message: Some(message.into()), code: Some(code.into()) }
    }
}
