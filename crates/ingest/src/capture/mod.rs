//! Change-data-capture plumbing for relational sources: registration with the
//! capture service, the message-bus client, and the per-connector trigger.

pub mod bus;
pub mod registration;
pub mod trigger;

use thiserror::Error;

pub use bus::{ChangeEvent, ChangeEventBus, ChangeSubscription, KafkaRestBus};
pub use registration::{CaptureRegistrar, CaptureRegistration, CaptureServiceClient};
pub use trigger::{ChangeCaptureHandle, ChangeCaptureTrigger, ChangeHandler, TriggerSettings};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture transport failure: {0}")]
    Transport(String),
    #[error("capture endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("capture response decode failure: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for CaptureError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Turns a non-2xx response into `CaptureError::Status`, keeping the body text.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, CaptureError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CaptureError::Status { status: status.as_u16(), body })
}
