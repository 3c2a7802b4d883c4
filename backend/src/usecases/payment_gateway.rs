use std::collections::HashMap;

use anyhow::{Result as AnyResult, anyhow};
use async_trait::async_trait;
use crates::{
    domain::{
        entities::plans::PlanEntity,
        value_objects::{
            enums::{checkout_modes::CheckoutMode, plan_types::PlanType},
            subscriptions::{CheckoutCustomer, CheckoutSession},
            webhook_events::ProviderEvent,
        },
    },
    payments::stripe_client::{CheckoutPrice, CheckoutSessionRequest, StripeClient},
};

/// Checkout metadata keys. Webhooks read them back to find the buyer and plan.
pub const METADATA_USER_ID: &str = "user_id";
pub const METADATA_PLAN_ID: &str = "plan_id";
pub const METADATA_PLAN_TYPE: &str = "plan_type";
pub const METADATA_CUSTOMER_NAME: &str = "customer_name";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        plan: &PlanEntity,
        customer: &CheckoutCustomer,
        mode: CheckoutMode,
    ) -> AnyResult<CheckoutSession>;

    async fn cancel_subscription(&self, provider_subscription_id: &str) -> AnyResult<()>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str)
    -> AnyResult<ProviderEvent>;
}

pub fn checkout_metadata(plan: &PlanEntity, customer: &CheckoutCustomer) -> HashMap<String, String> {
    let mut metadata = HashMap::from([
        (METADATA_USER_ID.to_string(), customer.user_id.to_string()),
        (METADATA_PLAN_ID.to_string(), plan.id.to_string()),
        (METADATA_PLAN_TYPE.to_string(), plan.plan_type.to_string()),
    ]);
    if let Some(name) = customer.name.as_ref().filter(|name| !name.trim().is_empty()) {
        metadata.insert(METADATA_CUSTOMER_NAME.to_string(), name.clone());
    }
    metadata
}

fn checkout_price(plan: &PlanEntity) -> CheckoutPrice {
    match plan.stripe_price_id.as_ref().filter(|id| !id.is_empty()) {
        Some(price_id) => CheckoutPrice::PriceId(price_id.clone()),
        None => CheckoutPrice::Inline {
            product_name: plan.name.clone(),
            unit_amount: plan.price_minor,
            currency: plan.currency.to_ascii_lowercase(),
            recurring_interval: match plan.plan_type {
                PlanType::Subscription => plan.billing_cycle.map(|cycle| cycle.provider_interval()),
                PlanType::Package => None,
            },
        },
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_checkout_session(
        &self,
        plan: &PlanEntity,
        customer: &CheckoutCustomer,
        mode: CheckoutMode,
    ) -> AnyResult<CheckoutSession> {
        let customer_email = customer
            .email
            .clone()
            .ok_or_else(|| anyhow!("customer email is required for checkout"))?;

        let request = CheckoutSessionRequest {
            mode,
            price: checkout_price(plan),
            customer_email,
            client_reference_id: customer.user_id.to_string(),
            metadata: checkout_metadata(plan, customer),
        };

        self.create_checkout_session(&request).await
    }

    async fn cancel_subscription(&self, provider_subscription_id: &str) -> AnyResult<()> {
        self.cancel_subscription(provider_subscription_id).await
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> AnyResult<ProviderEvent> {
        self.verify_webhook_signature(payload, signature)
            .map(ProviderEvent::from)
    }
}
