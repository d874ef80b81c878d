use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use frontdesk_core::config::NotificationConfig;
use frontdesk_core::notification::{
    LoggingNotificationGateway, NotificationError, NotificationGateway, NotificationRequest,
};
use tracing::info;

/// Posts each request as JSON to an outbound webhook (SMS/email relay).
pub struct WebhookNotificationGateway {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotificationGateway {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| NotificationError::Delivery(format!("client setup: {error}")))?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl NotificationGateway for WebhookNotificationGateway {
    async fn send(&self, request: &NotificationRequest) -> Result<(), NotificationError> {
        if request.recipient.phone.is_none() && request.recipient.email.is_none() {
            return Err(NotificationError::NoContact);
        }

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|error| NotificationError::Delivery(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Delivery(format!("webhook returned {status}")));
        }

        info!(
            event_name = "notification.webhook_delivered",
            template = request.template.as_str(),
            appointment_ref = %request.appointment_ref,
        );
        Ok(())
    }
}

/// Webhook delivery when enabled and configured, log-only otherwise.
pub fn gateway_from_config(
    config: &NotificationConfig,
) -> Result<Arc<dyn NotificationGateway>, NotificationError> {
    match (&config.webhook_url, config.enabled) {
        (Some(url), true) => Ok(Arc::new(WebhookNotificationGateway::new(
            url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        _ => Ok(Arc::new(LoggingNotificationGateway)),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use frontdesk_core::config::NotificationConfig;
    use frontdesk_core::domain::appointment::ConfirmationId;
    use frontdesk_core::domain::record::ContactInfo;
    use frontdesk_core::notification::{
        NotificationError, NotificationGateway, NotificationRequest, NotificationTemplate,
    };

    use super::{gateway_from_config, WebhookNotificationGateway};

    #[tokio::test]
    async fn webhook_refuses_requests_without_contact() {
        let gateway = WebhookNotificationGateway::new("http://127.0.0.1:9/hook", Duration::from_secs(1))
            .expect("client");
        let request = NotificationRequest {
            recipient: ContactInfo { phone: None, email: None },
            template: NotificationTemplate::AppointmentBooked,
            appointment_ref: ConfirmationId("FD-TEST2345".to_string()),
            body: "booked".to_string(),
        };

        assert_eq!(gateway.send(&request).await, Err(NotificationError::NoContact));
    }

    #[test]
    fn disabled_notifications_fall_back_to_logging() {
        let config = NotificationConfig {
            enabled: false,
            webhook_url: Some("https://relay.example.com/notify".to_string()),
            timeout_secs: 5,
        };
        assert!(gateway_from_config(&config).is_ok());
    }
}
