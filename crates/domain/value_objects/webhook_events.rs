use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Payment-provider lifecycle events, decoded once at the boundary. Every
/// correlation field stays optional here; the reconciler decides what a
/// missing value means.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    CheckoutCompleted(CheckoutCompleted),
    InvoiceSucceeded(InvoiceEvent),
    InvoiceFailed(InvoiceEvent),
    SubscriptionDeleted(SubscriptionDeleted),
    Unhandled {
        event_id: Option<String>,
        event_type: String,
    },
}

impl ProviderEvent {
    pub fn event_type(&self) -> &str {
        match self {
            ProviderEvent::CheckoutCompleted(_) => "checkout.session.completed",
            ProviderEvent::InvoiceSucceeded(_) => "invoice.payment_succeeded",
            ProviderEvent::InvoiceFailed(_) => "invoice.payment_failed",
            ProviderEvent::SubscriptionDeleted(_) => "customer.subscription.deleted",
            ProviderEvent::Unhandled { event_type, .. } => event_type,
        }
    }

    pub fn event_id(&self) -> Option<&str> {
        match self {
            ProviderEvent::CheckoutCompleted(event) => event.event_id.as_deref(),
            ProviderEvent::InvoiceSucceeded(event) | ProviderEvent::InvoiceFailed(event) => {
                event.event_id.as_deref()
            }
            ProviderEvent::SubscriptionDeleted(event) => event.event_id.as_deref(),
            ProviderEvent::Unhandled { event_id, .. } => event_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutCompleted {
    pub event_id: Option<String>,
    pub session_id: Option<String>,
    pub mode: Option<String>,
    pub subscription_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceEvent {
    pub event_id: Option<String>,
    pub invoice_id: Option<String>,
    pub subscription_id: Option<String>,
    pub period_end: Option<DateTime<Utc>>,
    pub attempt_count: Option<i64>,
    pub amount_due: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDeleted {
    pub event_id: Option<String>,
    pub subscription_id: Option<String>,
}
