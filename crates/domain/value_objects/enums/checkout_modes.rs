use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::plan_types::PlanType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    Subscription,
    Payment,
}

impl CheckoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutMode::Subscription => "subscription",
            CheckoutMode::Payment => "payment",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "subscription" => Some(CheckoutMode::Subscription),
            "payment" => Some(CheckoutMode::Payment),
            _ => None,
        }
    }

    pub fn for_plan_type(plan_type: PlanType) -> Self {
        match plan_type {
            PlanType::Subscription => CheckoutMode::Subscription,
            PlanType::Package => CheckoutMode::Payment,
        }
    }

    pub fn plan_type(&self) -> PlanType {
        match self {
            CheckoutMode::Subscription => PlanType::Subscription,
            CheckoutMode::Payment => PlanType::Package,
        }
    }
}

impl Display for CheckoutMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
