use std::{collections::HashMap, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use sha2::Sha256;
use tracing::error;

use crate::domain::value_objects::{
    enums::checkout_modes::CheckoutMode,
    subscriptions::CheckoutSession,
    webhook_events::{CheckoutCompleted, InvoiceEvent, ProviderEvent, SubscriptionDeleted},
};

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Minimal Stripe client built on reqwest.
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    success_url: String,
    cancel_url: String,
    webhook_tolerance_secs: i64,
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub created: Option<i64>,
    pub livemode: Option<bool>,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: Option<String>,
    pub mode: Option<String>,
    pub subscription: Option<String>,
    pub client_reference_id: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub id: Option<String>,
    pub subscription: Option<String>,
    pub parent: Option<StripeInvoiceParent>,
    pub attempt_count: Option<i64>,
    pub amount_due: Option<i64>,
    pub period_end: Option<i64>,
    #[serde(default)]
    pub lines: StripeInvoiceLines,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoiceParent {
    pub subscription_details: Option<StripeSubscriptionDetails>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionDetails {
    pub subscription: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StripeInvoiceLines {
    #[serde(default)]
    pub data: Vec<StripeInvoiceLine>,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoiceLine {
    pub period: Option<StripeInvoicePeriod>,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoicePeriod {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl StripeInvoice {
    /// Subscription id from the top-level field, falling back to the newer
    /// `parent.subscription_details` location.
    pub fn subscription_id(&self) -> Option<String> {
        self.subscription.clone().or_else(|| {
            self.parent
                .as_ref()
                .and_then(|parent| parent.subscription_details.as_ref())
                .and_then(|details| details.subscription.clone())
        })
    }

    /// End of the paid service period. Line items carry the subscription
    /// period; the invoice-level `period_end` is only a fallback.
    pub fn service_period_end(&self) -> Option<i64> {
        self.lines
            .data
            .iter()
            .filter_map(|line| line.period.as_ref().and_then(|period| period.end))
            .max()
            .or(self.period_end)
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionObject {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
    param: Option<String>,
    decline_code: Option<String>,
}

/// Price of a checkout line item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutPrice {
    /// A price pre-created in the Stripe dashboard.
    PriceId(String),
    Inline {
        product_name: String,
        unit_amount: i32,
        currency: String,
        /// `week`/`month` for recurring prices.
        recurring_interval: Option<&'static str>,
    },
}

#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub mode: CheckoutMode,
    pub price: CheckoutPrice,
    pub customer_email: String,
    pub client_reference_id: String,
    pub metadata: HashMap<String, String>,
}

impl CheckoutSessionRequest {
    fn form_fields(&self, success_url: &str, cancel_url: &str) -> Vec<(String, String)> {
        let mut body: Vec<(String, String)> = vec![
            ("mode".to_string(), self.mode.as_str().to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), success_url.to_string()),
            ("cancel_url".to_string(), cancel_url.to_string()),
            ("customer_email".to_string(), self.customer_email.clone()),
            (
                "client_reference_id".to_string(),
                self.client_reference_id.clone(),
            ),
        ];

        match &self.price {
            CheckoutPrice::PriceId(price_id) => {
                body.push(("line_items[0][price]".to_string(), price_id.clone()));
            }
            CheckoutPrice::Inline {
                product_name,
                unit_amount,
                currency,
                recurring_interval,
            } => {
                body.push((
                    "line_items[0][price_data][currency]".to_string(),
                    currency.clone(),
                ));
                body.push((
                    "line_items[0][price_data][unit_amount]".to_string(),
                    unit_amount.to_string(),
                ));
                body.push((
                    "line_items[0][price_data][product_data][name]".to_string(),
                    product_name.clone(),
                ));
                if let Some(interval) = recurring_interval {
                    body.push((
                        "line_items[0][price_data][recurring][interval]".to_string(),
                        interval.to_string(),
                    ));
                }
            }
        }

        // Subscription metadata is copied onto the Stripe subscription so later
        // invoice and deletion events carry it as well.
        let mut keys: Vec<&String> = self.metadata.keys().collect();
        keys.sort();
        for key in keys {
            let value = self.metadata[key].clone();
            body.push((format!("metadata[{key}]"), value.clone()));
            if self.mode == CheckoutMode::Subscription {
                body.push((format!("subscription_data[metadata][{key}]"), value));
            }
        }

        body
    }
}

impl StripeClient {
    pub fn new(
        secret_key: String,
        webhook_secret: String,
        success_url: String,
        cancel_url: String,
        http_timeout: Duration,
        webhook_tolerance_secs: i64,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(http_timeout).build()?;

        Ok(Self {
            http,
            secret_key,
            webhook_secret,
            success_url,
            cancel_url,
            webhook_tolerance_secs,
        })
    }

    async fn ensure_success(
        resp: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .or_else(|| resp.headers().get("stripe-request-id"))
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let details = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .ok()
            .map(|envelope| envelope.error);

        error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?details.as_ref().and_then(|d| d.type_.as_deref()),
            stripe_error_code = ?details.as_ref().and_then(|d| d.code.as_deref()),
            stripe_error_param = ?details.as_ref().and_then(|d| d.param.as_deref()),
            stripe_error_message = ?details.as_ref().and_then(|d| d.message.as_deref()),
            stripe_decline_code = ?details.as_ref().and_then(|d| d.decline_code.as_deref()),
            context = %context,
            "stripe: api request failed"
        );

        anyhow::bail!(
            "Stripe API request failed: {} (status {}, request_id={:?})",
            context,
            status,
            request_id
        );
    }

    /// Creates a Checkout Session and returns its id and hosted URL.
    pub async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession> {
        // https://stripe.com/docs/api/checkout/sessions/create
        let body = request.form_fields(&self.success_url, &self.cancel_url);

        let resp = self
            .http
            .post(format!("{STRIPE_API_BASE}/checkout/sessions"))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create checkout session").await?;

        #[derive(Deserialize)]
        struct CheckoutResp {
            id: String,
            url: Option<String>,
        }

        let parsed: CheckoutResp = resp.json().await?;
        let url = parsed
            .url
            .ok_or_else(|| anyhow::anyhow!("Stripe Checkout session URL is missing"))?;

        Ok(CheckoutSession { id: parsed.id, url })
    }

    /// Cancels a Stripe subscription immediately.
    pub async fn cancel_subscription(&self, provider_subscription_id: &str) -> Result<()> {
        // https://stripe.com/docs/api/subscriptions/cancel
        let resp = self
            .http
            .delete(format!(
                "{STRIPE_API_BASE}/subscriptions/{provider_subscription_id}"
            ))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await?;
        Self::ensure_success(resp, "cancel subscription").await?;

        Ok(())
    }

    /// Verifies the webhook signature. https://stripe.com/docs/webhooks/signatures
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent> {
        self.verify_webhook_signature_at(payload, signature_header, Utc::now().timestamp())
    }

    pub fn verify_webhook_signature_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now_unix: i64,
    ) -> Result<StripeEvent> {
        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            let part = part.trim();
            if let Some(rest) = part.strip_prefix("t=") {
                timestamp = Some(rest);
            } else if let Some(rest) = part.strip_prefix("v1=") {
                signatures.push(rest);
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| anyhow::anyhow!("missing timestamp in stripe-signature"))?;
        if signatures.is_empty() {
            anyhow::bail!("missing v1 in stripe-signature");
        }

        let signed_at: i64 = timestamp.parse()?;
        if (now_unix - signed_at).abs() > self.webhook_tolerance_secs {
            anyhow::bail!("stripe-signature timestamp outside tolerance");
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);

        let matched = signatures.iter().any(|signature| {
            hex::decode(signature)
                .map(|provided| mac.clone().verify_slice(&provided).is_ok())
                .unwrap_or(false)
        });
        if !matched {
            anyhow::bail!("invalid webhook signature");
        }

        let event: StripeEvent = serde_json::from_slice(payload)?;
        Ok(event)
    }
}

fn unix_to_utc(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
}

impl From<StripeEvent> for ProviderEvent {
    fn from(event: StripeEvent) -> Self {
        let event_id = event.id;
        let object = event.data.object;

        match event.type_.as_str() {
            "checkout.session.completed" => {
                match serde_json::from_value::<StripeCheckoutSession>(object) {
                    Ok(session) => ProviderEvent::CheckoutCompleted(CheckoutCompleted {
                        event_id,
                        session_id: session.id,
                        mode: session.mode,
                        subscription_id: session.subscription,
                        metadata: session.metadata.unwrap_or_default(),
                    }),
                    Err(_) => ProviderEvent::CheckoutCompleted(CheckoutCompleted {
                        event_id,
                        ..CheckoutCompleted::default()
                    }),
                }
            }
            "invoice.payment_succeeded" | "invoice.paid" => {
                ProviderEvent::InvoiceSucceeded(invoice_event(event_id, object))
            }
            "invoice.payment_failed" => {
                ProviderEvent::InvoiceFailed(invoice_event(event_id, object))
            }
            "customer.subscription.deleted" => {
                let subscription_id = serde_json::from_value::<StripeSubscriptionObject>(object)
                    .ok()
                    .and_then(|subscription| subscription.id);
                ProviderEvent::SubscriptionDeleted(SubscriptionDeleted {
                    event_id,
                    subscription_id,
                })
            }
            other => ProviderEvent::Unhandled {
                event_id,
                event_type: other.to_string(),
            },
        }
    }
}

fn invoice_event(event_id: Option<String>, object: serde_json::Value) -> InvoiceEvent {
    match serde_json::from_value::<StripeInvoice>(object) {
        Ok(invoice) => InvoiceEvent {
            event_id,
            subscription_id: invoice.subscription_id(),
            period_end: invoice.service_period_end().and_then(unix_to_utc),
            invoice_id: invoice.id,
            attempt_count: invoice.attempt_count,
            amount_due: invoice.amount_due,
        },
        Err(_) => InvoiceEvent {
            event_id,
            ..InvoiceEvent::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn client() -> StripeClient {
        StripeClient::new(
            "sk_test".to_string(),
            SECRET.to_string(),
            "https://app.example/success".to_string(),
            "https://app.example/cancel".to_string(),
            Duration::from_secs(5),
            300,
        )
        .unwrap()
    }

    fn sign(payload: &[u8], timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn payload() -> Vec<u8> {
        json!({
            "id": "evt_1",
            "type": "customer.subscription.deleted",
            "data": { "object": { "id": "sub_1" } }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn accepts_valid_signature() {
        let body = payload();
        let header = format!("t=1700000000,v1={}", sign(&body, 1_700_000_000));

        let event = client()
            .verify_webhook_signature_at(&body, &header, 1_700_000_010)
            .unwrap();

        assert_eq!(event.type_, "customer.subscription.deleted");
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let body = payload();
        let header = format!(
            "t=1700000000,v1={},v1={}",
            "00".repeat(32),
            sign(&body, 1_700_000_000)
        );

        assert!(
            client()
                .verify_webhook_signature_at(&body, &header, 1_700_000_000)
                .is_ok()
        );
    }

    #[test]
    fn rejects_tampered_payload() {
        let body = payload();
        let header = format!("t=1700000000,v1={}", sign(&body, 1_700_000_000));
        let mut tampered = body.clone();
        tampered.push(b' ');

        assert!(
            client()
                .verify_webhook_signature_at(&tampered, &header, 1_700_000_000)
                .is_err()
        );
    }

    #[test]
    fn rejects_stale_timestamp() {
        let body = payload();
        let header = format!("t=1700000000,v1={}", sign(&body, 1_700_000_000));

        assert!(
            client()
                .verify_webhook_signature_at(&body, &header, 1_700_000_301)
                .is_err()
        );
    }

    #[test]
    fn rejects_header_without_signature() {
        assert!(
            client()
                .verify_webhook_signature_at(&payload(), "t=1700000000", 1_700_000_000)
                .is_err()
        );
    }

    fn event(type_: &str, object: serde_json::Value) -> StripeEvent {
        StripeEvent {
            id: Some("evt_1".to_string()),
            type_: type_.to_string(),
            created: None,
            livemode: None,
            data: StripeEventData { object },
        }
    }

    #[test]
    fn decodes_checkout_completed() {
        let decoded = ProviderEvent::from(event(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "mode": "subscription",
                "subscription": "sub_1",
                "metadata": { "user_id": "u", "plan_id": "p" }
            }),
        ));

        let ProviderEvent::CheckoutCompleted(checkout) = decoded else {
            panic!("expected checkout event");
        };
        assert_eq!(checkout.session_id.as_deref(), Some("cs_1"));
        assert_eq!(checkout.subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(checkout.metadata.get("plan_id").map(String::as_str), Some("p"));
    }

    #[test]
    fn decodes_invoice_subscription_from_parent_and_line_period() {
        let decoded = ProviderEvent::from(event(
            "invoice.payment_succeeded",
            json!({
                "id": "in_1",
                "parent": { "subscription_details": { "subscription": "sub_9" } },
                "period_end": 1_700_000_000,
                "lines": { "data": [ { "period": { "start": 1_700_000_000, "end": 1_702_592_000 } } ] }
            }),
        ));

        let ProviderEvent::InvoiceSucceeded(invoice) = decoded else {
            panic!("expected invoice event");
        };
        assert_eq!(invoice.subscription_id.as_deref(), Some("sub_9"));
        assert_eq!(invoice.period_end, unix_to_utc(1_702_592_000));
    }

    #[test]
    fn unknown_type_is_unhandled() {
        let decoded = ProviderEvent::from(event("customer.created", json!({})));
        assert_eq!(decoded.event_type(), "customer.created");
        assert!(matches!(decoded, ProviderEvent::Unhandled { .. }));
    }

    #[test]
    fn inline_subscription_price_carries_interval_and_metadata() {
        let request = CheckoutSessionRequest {
            mode: CheckoutMode::Subscription,
            price: CheckoutPrice::Inline {
                product_name: "Pro".to_string(),
                unit_amount: 999,
                currency: "usd".to_string(),
                recurring_interval: Some("month"),
            },
            customer_email: "a@example.com".to_string(),
            client_reference_id: "user-1".to_string(),
            metadata: HashMap::from([("plan_id".to_string(), "p1".to_string())]),
        };

        let fields = request.form_fields("s", "c");
        let has = |key: &str, value: &str| {
            fields.iter().any(|(k, v)| k == key && v == value)
        };
        assert!(has("line_items[0][price_data][recurring][interval]", "month"));
        assert!(has("line_items[0][price_data][unit_amount]", "999"));
        assert!(has("metadata[plan_id]", "p1"));
        assert!(has("subscription_data[metadata][plan_id]", "p1"));
    }
}
