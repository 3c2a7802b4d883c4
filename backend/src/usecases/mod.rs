pub mod entitlements;
pub mod payment_gateway;
pub mod subscriptions;
pub mod webhook_reconciler;
