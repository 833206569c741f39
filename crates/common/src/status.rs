//! Order status state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Processing ──► Sent ──► Delivered ──► Returned
///     │           │                        ▲
///     │           └────────────────────────┤
///     ├────────────────────────────────────┘
///     └──► Cancelled
/// ```
///
/// `Returned` and `Cancelled` are terminal. Whether an order's sale movements
/// count against stock is decided by [`OrderStatus::is_consuming`] alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order accepted, stock allocated, not yet shipped.
    #[default]
    Processing,

    /// Handed to the courier.
    Sent,

    /// Received by the customer.
    Delivered,

    /// Goods came back (terminal). Stock is released.
    Returned,

    /// Order called off before shipping (terminal). Stock is released.
    Cancelled,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Processing,
        OrderStatus::Sent,
        OrderStatus::Delivered,
        OrderStatus::Returned,
        OrderStatus::Cancelled,
    ];

    /// Returns true if sale movements referencing an order in this status
    /// still count against batch availability.
    pub fn is_consuming(&self) -> bool {
        matches!(
            self,
            OrderStatus::Processing | OrderStatus::Sent | OrderStatus::Delivered
        )
    }

    /// Statuses directly reachable from this one.
    pub fn allowed_transitions(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Processing => &[
                OrderStatus::Sent,
                OrderStatus::Returned,
                OrderStatus::Cancelled,
            ],
            OrderStatus::Sent => &[OrderStatus::Delivered, OrderStatus::Returned],
            OrderStatus::Delivered => &[OrderStatus::Returned],
            OrderStatus::Returned | OrderStatus::Cancelled => &[],
        }
    }

    /// Returns true if `next` is a legal edge from this status.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Processing => "processing",
            OrderStatus::Sent => "sent",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Returned => "returned",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a string does not name an order status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown order status: {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for OrderStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_processing() {
        assert_eq!(OrderStatus::default(), OrderStatus::Processing);
    }

    #[test]
    fn consuming_statuses() {
        assert!(OrderStatus::Processing.is_consuming());
        assert!(OrderStatus::Sent.is_consuming());
        assert!(OrderStatus::Delivered.is_consuming());
        assert!(!OrderStatus::Returned.is_consuming());
        assert!(!OrderStatus::Cancelled.is_consuming());
    }

    #[test]
    fn processing_transitions() {
        let from = OrderStatus::Processing;
        assert!(from.can_transition_to(OrderStatus::Sent));
        assert!(from.can_transition_to(OrderStatus::Returned));
        assert!(from.can_transition_to(OrderStatus::Cancelled));
        assert!(!from.can_transition_to(OrderStatus::Delivered));
        assert!(!from.can_transition_to(OrderStatus::Processing));
    }

    #[test]
    fn sent_and_delivered_transitions() {
        assert!(OrderStatus::Sent.can_transition_to(OrderStatus::Delivered));
        assert!(OrderStatus::Sent.can_transition_to(OrderStatus::Returned));
        assert!(!OrderStatus::Sent.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Delivered.can_transition_to(OrderStatus::Returned));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Sent));
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        for status in OrderStatus::ALL {
            assert!(!OrderStatus::Returned.can_transition_to(status));
            assert!(!OrderStatus::Cancelled.can_transition_to(status));
        }
        assert!(OrderStatus::Returned.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Delivered.is_terminal());
    }

    #[test]
    fn released_statuses_never_become_consuming_again() {
        for status in OrderStatus::ALL.into_iter().filter(|s| !s.is_consuming()) {
            assert!(
                status
                    .allowed_transitions()
                    .iter()
                    .all(|next| !next.is_consuming())
            );
        }
    }

    #[test]
    fn parse_round_trips_names() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
        assert_eq!(" Sent ".parse::<OrderStatus>(), Ok(OrderStatus::Sent));
        assert!("shipped".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&OrderStatus::Delivered).unwrap();
        assert_eq!(json, "\"delivered\"");
    }
}
