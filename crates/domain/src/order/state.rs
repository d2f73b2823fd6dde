//! Order status state machine.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The status of an order in its lifecycle.
///
/// Status transitions:
/// ```text
/// Placed     ──► Processing | Shipping | Delivered | Cancelled
/// Processing ──► Shipping | Delivered | Cancelled
/// Shipping   ──► Delivered | Cancelled
/// Delivered, Cancelled: terminal
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order committed, stock reserved (initial state).
    #[default]
    Placed,

    /// Being prepared by the shop.
    Processing,

    /// Handed to the courier.
    Shipping,

    /// Received by the customer (terminal state).
    Delivered,

    /// Cancelled, stock restored (terminal state).
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Placed,
        OrderStatus::Processing,
        OrderStatus::Shipping,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Placed => "placed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipping => "shipping",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| DomainError::validation(format!("unknown order status: {s}")))
    }
}

/// Allowed status transitions, as data.
///
/// Any `(from, to)` pair missing from the table is rejected with
/// [`DomainError::InvalidTransition`].
#[derive(Debug, Clone)]
pub struct TransitionTable {
    allowed: HashMap<OrderStatus, HashSet<OrderStatus>>,
}

static STANDARD: LazyLock<TransitionTable> = LazyLock::new(|| {
    use OrderStatus::*;

    TransitionTable::from_edges(&[
        (Placed, &[Processing, Shipping, Delivered, Cancelled]),
        (Processing, &[Shipping, Delivered, Cancelled]),
        (Shipping, &[Delivered, Cancelled]),
    ])
});

impl TransitionTable {
    /// Builds a table from `(from, [to...])` edges.
    pub fn from_edges(edges: &[(OrderStatus, &[OrderStatus])]) -> Self {
        let allowed = edges
            .iter()
            .map(|(from, targets)| (*from, targets.iter().copied().collect()))
            .collect();
        Self { allowed }
    }

    /// The order lifecycle used by the shop.
    pub fn standard() -> &'static TransitionTable {
        &STANDARD
    }

    pub fn allows(&self, from: OrderStatus, to: OrderStatus) -> bool {
        self.allowed
            .get(&from)
            .is_some_and(|targets| targets.contains(&to))
    }

    /// Returns the statuses reachable from `from`, in lifecycle order.
    pub fn next_states(&self, from: OrderStatus) -> Vec<OrderStatus> {
        let mut next: Vec<_> = self
            .allowed
            .get(&from)
            .map(|targets| targets.iter().copied().collect())
            .unwrap_or_default();
        next.sort();
        next
    }

    pub fn check(&self, from: OrderStatus, to: OrderStatus) -> Result<(), DomainError> {
        if self.allows(from, to) {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition { from, to })
        }
    }
}
