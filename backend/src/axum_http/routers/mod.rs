pub mod stripe_webhook;
pub mod subscriptions;
