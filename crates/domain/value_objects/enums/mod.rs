pub mod billing_cycles;
pub mod checkout_modes;
pub mod plan_types;
pub mod subscription_statuses;
pub mod usage_kinds;
