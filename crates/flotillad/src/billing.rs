//! HTTP adapter for the external billing collaborator.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

use flotilla_reconciler::{Billing, BillingError};
use flotilla_state::OwnerId;

#[derive(Serialize)]
struct ChargeRequest {
    owner_id: OwnerId,
    amount: u64,
}

/// Talks to the billing service over JSON. A 402 response is the
/// insufficient-funds signal; anything else non-success (or a transport
/// failure) is `Unavailable`.
pub struct HttpBilling {
    client: Client,
    base_url: String,
}

impl HttpBilling {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BillingError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BillingError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    async fn post_charge(
        &self,
        endpoint: &str,
        owner_id: OwnerId,
        amount: u64,
    ) -> Result<(), BillingError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&ChargeRequest { owner_id, amount })
            .send()
            .await
            .map_err(|e| BillingError::Unavailable(e.to_string()))?;

        debug!(owner = owner_id, amount, %endpoint, status = %response.status(), "billing call");
        map_billing_status(response.status())
    }
}

fn map_billing_status(status: StatusCode) -> Result<(), BillingError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::PAYMENT_REQUIRED {
        Err(BillingError::InsufficientFunds)
    } else {
        Err(BillingError::Unavailable(format!(
            "billing service returned {status}"
        )))
    }
}

#[async_trait]
impl Billing for HttpBilling {
    async fn debit(&self, owner_id: OwnerId, amount: u64) -> Result<(), BillingError> {
        self.post_charge("debit", owner_id, amount).await
    }

    async fn credit(&self, owner_id: OwnerId, amount: u64) -> Result<(), BillingError> {
        self.post_charge("credit", owner_id, amount).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(map_billing_status(StatusCode::OK).is_ok());
        assert!(map_billing_status(StatusCode::NO_CONTENT).is_ok());
        assert_eq!(
            map_billing_status(StatusCode::PAYMENT_REQUIRED),
            Err(BillingError::InsufficientFunds)
        );
        assert!(matches!(
            map_billing_status(StatusCode::INTERNAL_SERVER_ERROR),
            Err(BillingError::Unavailable(_))
        ));
    }
}
