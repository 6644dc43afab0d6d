use crate::types::devices::{DeviceId, Provider};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Notification must have content")]
    EmptyContent,
}

/// Text of one logical notification. Construct through [`NotificationContent::new`]
/// so a notification always carries a title or a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    pub(crate) title: String,
    pub(crate) subtitle: String,
    pub(crate) body: String,
}

impl NotificationContent {
    pub fn new(
        title: impl Into<String>,
        subtitle: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, DispatchError> {
        let content = Self {
            title: title.into(),
            subtitle: subtitle.into(),
            body: body.into(),
        };
        content.validate()?;
        Ok(content)
    }

    pub fn body_only(body: impl Into<String>) -> Result<Self, DispatchError> {
        Self::new(String::new(), String::new(), body)
    }

    pub(crate) fn validate(&self) -> Result<(), DispatchError> {
        if self.title.is_empty() && self.body.is_empty() {
            return Err(DispatchError::EmptyContent);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterruptionLevel {
    TimeSensitive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnsRequest {
    pub device_token: String,
    pub title: String,
    pub subtitle: String,
    pub body: String,
    pub sound: &'static str,
    pub interruption_level: InterruptionLevel,
}

impl ApnsRequest {
    pub const DEFAULT_SOUND: &'static str = "default";

    pub fn new(device_token: &str, content: &NotificationContent) -> Self {
        Self {
            device_token: device_token.to_string(),
            title: content.title.clone(),
            subtitle: content.subtitle.clone(),
            body: content.body.clone(),
            sound: Self::DEFAULT_SOUND,
            interruption_level: InterruptionLevel::TimeSensitive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AndroidPriority {
    High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FcmRequest {
    pub token: String,
    pub title: String,
    pub body: String,
    pub priority: AndroidPriority,
}

impl FcmRequest {
    pub fn new(token: &str, content: &NotificationContent) -> Self {
        Self {
            token: token.to_string(),
            title: content.title.clone(),
            body: content.body.clone(),
            priority: AndroidPriority::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Rejected(String),
    TransportError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOutcome {
    pub device: DeviceId,
    pub device_name: String,
    pub provider: Provider,
    pub outcome: DeliveryOutcome,
}

/// Per-device result of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcomes: Vec<DeviceOutcome>,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome == DeliveryOutcome::Delivered)
            .count()
    }

    pub fn first_transport_error(&self) -> Option<&str> {
        self.outcomes.iter().find_map(|o| match &o.outcome {
            DeliveryOutcome::TransportError(detail) => Some(detail.as_str()),
            _ => None,
        })
    }
}
