use crate::config::{DispatchConfig, FailurePolicy};
use crate::ports::{DeliveryError, PushSender};
use crate::registry::DeviceRegistry;
use crate::types::devices::{Provider, RegisteredDevice, UserId};
use crate::types::notification::{
    ApnsRequest, DeliveryOutcome, DeviceOutcome, DispatchError, DispatchReport, FcmRequest,
    NotificationContent,
};

use std::sync::Arc;

/// Fans one notification out to every endpoint a user has registered.
#[derive(Clone)]
pub struct Dispatcher<A, F> {
    registry: Arc<DeviceRegistry>,
    apns: A,
    fcm: F,
    config: DispatchConfig,
}

enum Flow {
    Continue,
    Stop,
}

impl<A, F> Dispatcher<A, F>
where
    A: PushSender<Request = ApnsRequest>,
    F: PushSender<Request = FcmRequest>,
{
    pub fn new(registry: Arc<DeviceRegistry>, apns: A, fcm: F, config: DispatchConfig) -> Self {
        Self {
            registry,
            apns,
            fcm,
            config,
        }
    }

    /// Sends `content` to each of the user's devices, one provider call at a
    /// time. Endpoints are copied out of the registry first, so no lock is held
    /// while a provider is being called.
    pub async fn dispatch(
        &self,
        identity: &UserId,
        content: &NotificationContent,
    ) -> Result<DispatchReport, DispatchError> {
        content.validate()?;

        let devices = self.registry.devices_for(identity);
        let mut report = DispatchReport::default();
        if devices.is_empty() {
            tracing::info!(user = %identity, "no registered devices");
            return Ok(report);
        }

        for device in &devices.apns {
            let request = ApnsRequest::new(&device.endpoint.token, content);
            let outcome = self.deliver(&self.apns, &request).await;
            if let Flow::Stop = self.record(&mut report, identity, device, outcome) {
                return Ok(report);
            }
        }
        for device in &devices.fcm {
            let request = FcmRequest::new(&device.endpoint.token, content);
            let outcome = self.deliver(&self.fcm, &request).await;
            if let Flow::Stop = self.record(&mut report, identity, device, outcome) {
                return Ok(report);
            }
        }

        tracing::info!(
            user = %identity,
            attempted = report.len(),
            delivered = report.delivered(),
            "dispatch finished"
        );
        Ok(report)
    }

    async fn deliver<S: PushSender>(&self, sender: &S, request: &S::Request) -> DeliveryOutcome {
        let timeout = self.config.provider_timeout;
        match tokio::time::timeout(timeout, sender.send(request)).await {
            Ok(Ok(())) => DeliveryOutcome::Delivered,
            Ok(Err(DeliveryError::Rejected(reason))) => DeliveryOutcome::Rejected(reason),
            Ok(Err(DeliveryError::Transport(detail))) => DeliveryOutcome::TransportError(detail),
            Err(_) => DeliveryOutcome::TransportError(format!(
                "provider did not answer within {}s",
                timeout.as_secs_f32()
            )),
        }
    }

    fn record(
        &self,
        report: &mut DispatchReport,
        identity: &UserId,
        device: &RegisteredDevice,
        outcome: DeliveryOutcome,
    ) -> Flow {
        let provider: Provider = device.endpoint.provider;
        let flow = match &outcome {
            DeliveryOutcome::Delivered => {
                tracing::info!(
                    user = %identity,
                    device = %device.device,
                    device_name = %device.endpoint.display_name,
                    %provider,
                    "notification sent"
                );
                Flow::Continue
            }
            DeliveryOutcome::Rejected(reason) => {
                tracing::warn!(
                    user = %identity,
                    device = %device.device,
                    device_name = %device.endpoint.display_name,
                    token = device.endpoint.token_hint(),
                    %provider,
                    %reason,
                    "provider rejected notification"
                );
                Flow::Continue
            }
            DeliveryOutcome::TransportError(detail) => {
                tracing::error!(
                    user = %identity,
                    device = %device.device,
                    device_name = %device.endpoint.display_name,
                    %provider,
                    %detail,
                    "provider transport error"
                );
                match self.config.failure_policy {
                    FailurePolicy::Continue => Flow::Continue,
                    FailurePolicy::AbortOnTransportError => Flow::Stop,
                }
            }
        };
        report.outcomes.push(DeviceOutcome {
            device: device.device.clone(),
            device_name: device.endpoint.display_name.clone(),
            provider,
            outcome,
        });
        flow
    }
}
