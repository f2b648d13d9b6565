//! Subscription state extracted from a `subscriptionsv2.get` payload.

use serde::Serialize;
use serde_json::Value;

/// States in which a subscription can still be revoked for a refund.
pub const ELIGIBLE_STATES: [&str; 4] = [
    "SUBSCRIPTION_STATE_ACTIVE",
    "SUBSCRIPTION_STATE_IN_GRACE_PERIOD",
    "SUBSCRIPTION_STATE_ON_HOLD",
    "SUBSCRIPTION_STATE_PAUSED",
];

/// Fields of interest from a subscription resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionDetails {
    pub subscription_state: Option<String>,
    pub expiry_time: Option<String>,
    pub auto_renew_enabled: Option<bool>,
    pub latest_order_id: Option<String>,
}

impl SubscriptionDetails {
    /// Extract details from a raw payload.
    ///
    /// The first line item supplies expiry and auto-renew, and its
    /// `latestSuccessfulOrderId` takes precedence over the top-level
    /// `latestOrderId`.
    pub fn from_payload(payload: &Value) -> Self {
        let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);

        let mut details = Self {
            subscription_state: text(payload.get("subscriptionState")),
            latest_order_id: text(payload.get("latestOrderId")),
            ..Default::default()
        };

        let first_item = payload
            .get("lineItems")
            .and_then(Value::as_array)
            .and_then(|items| items.first());

        if let Some(item) = first_item {
            details.expiry_time = text(item.get("expiryTime"));
            details.auto_renew_enabled = item
                .get("autoRenewingPlan")
                .and_then(|plan| plan.get("autoRenewEnabled"))
                .and_then(Value::as_bool);
            if let Some(order_id) = text(item.get("latestSuccessfulOrderId")).filter(|s| !s.is_empty())
            {
                details.latest_order_id = Some(order_id);
            }
        }

        details
    }

    /// Whether the state is in [`ELIGIBLE_STATES`].
    pub fn is_eligible(&self) -> bool {
        self.subscription_state
            .as_deref()
            .is_some_and(|state| ELIGIBLE_STATES.contains(&state))
    }
}
