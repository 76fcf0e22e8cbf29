use crate::errors::AppError;
use crate::models::{Lead, Partner};
use serde_json::json;
use std::time::Duration;

/// Client dispatching lead-assignment notifications to the configured
/// webhook (the downstream system handles email/push delivery).
///
/// Dispatch is fire-and-forget: callers spawn the send and log failures;
/// a failed notification never rolls back an assignment.
#[derive(Clone)]
pub struct PartnerNotifier {
    client: reqwest::Client,
    webhook_url: String,
    token: Option<String>,
}

impl PartnerNotifier {
    pub fn new(webhook_url: String, token: Option<String>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create notification client: {}", e))
            })?;

        Ok(Self {
            client,
            webhook_url,
            token,
        })
    }

    /// POSTs a lead-assignment event for the given partner.
    pub async fn send_lead_assignment(
        &self,
        partner: &Partner,
        lead: &Lead,
        lead_price: f64,
    ) -> Result<(), AppError> {
        let body = json!({
            "event": "lead.assigned",
            "lead_id": lead.id,
            "service_type": lead.service_type,
            "partner_id": partner.id,
            "company_name": partner.company_name,
            "partner_tier": partner.tier,
            "lead_price": lead_price,
        });

        let mut request = self.client.post(&self.webhook_url).json(&body);
        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| {
            AppError::ExternalApiError(format!("Notification request failed: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Notification webhook returned {}: {}",
                status, error_text
            )));
        }

        tracing::info!(
            "Assignment notification sent for lead {} to partner {}",
            lead.id,
            partner.id
        );
        Ok(())
    }
}
