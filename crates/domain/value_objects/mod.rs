pub mod enums;
pub mod plans;
pub mod publishing_rights;
pub mod subscriptions;
pub mod usage_periods;
pub mod webhook_events;
