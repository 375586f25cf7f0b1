//! Classification of worker replies.

use serde_json::Value;
use tracing::debug;

use super::error::ExtractError;
use super::request::Metadata;
use crate::config::ReplySettings;
use crate::worker::WorkerResult;

/// What a reply means for the active request.
#[derive(Debug)]
pub enum Verdict {
    /// Terminal success.
    Success(Metadata),
    /// The worker could not decide yet; feed it another window.
    NeedMoreData(Metadata),
    /// Terminal failure.
    Failed(ExtractError),
}

/// Turns raw worker replies into verdicts for the active request.
///
/// The warning field is informational and never changes the verdict. The
/// error field means the file was cut short while more bytes can still come,
/// and a real failure once they cannot.
#[derive(Debug, Clone)]
pub struct ResponseRouter {
    error_field: String,
    warning_field: String,
}

impl ResponseRouter {
    pub fn new(settings: &ReplySettings) -> Self {
        Self {
            error_field: settings.error_field.clone(),
            warning_field: settings.warning_field.clone(),
        }
    }

    /// Classify one reply. `can_grow` tells whether the request could still
    /// supply another window.
    pub fn classify(&self, reply: WorkerResult<Value>, can_grow: bool) -> Verdict {
        let value = match reply {
            Ok(value) => value,
            Err(err) => return Verdict::Failed(ExtractError::Protocol(err.to_string())),
        };
        let Some(metadata) = Metadata::from_reply(value) else {
            return Verdict::Failed(ExtractError::Protocol(
                "worker returned no tags".to_string(),
            ));
        };

        if let Some(warning) = metadata.get(&self.warning_field) {
            debug!(warning = %field_text(warning), "worker warning ignored");
        }

        if metadata.get(&self.error_field).is_none() {
            Verdict::Success(metadata)
        } else if can_grow {
            Verdict::NeedMoreData(metadata)
        } else {
            Verdict::Failed(self.exhausted(metadata))
        }
    }

    /// The terminal error for a reply whose error can no longer be cured.
    pub fn exhausted(&self, metadata: Metadata) -> ExtractError {
        let message = metadata
            .get(&self.error_field)
            .map(field_text)
            .unwrap_or_else(|| "worker reported an error".to_string());
        ExtractError::Analysis { message, metadata }
    }
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
