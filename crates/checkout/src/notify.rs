//! Notification seam for downstream consumers (email, search indexing).
//!
//! Notifiers never block the request that produced the event.

use std::sync::{Arc, Mutex};

use common::{Money, OrderId, PaymentId, UserId};
use domain::{OrderStatus, PaymentMethod};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    OrderPlaced {
        order_id: OrderId,
        user_id: Option<UserId>,
        total: Money,
        payment_method: PaymentMethod,
    },
    PaymentConfirmed {
        order_id: OrderId,
        payment_id: PaymentId,
        method: PaymentMethod,
        external_transaction_id: String,
    },
    OrderCancelled {
        order_id: OrderId,
        refunded: bool,
    },
    OrderStatusChanged {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },
}

impl OrderEvent {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::OrderPlaced { order_id, .. }
            | OrderEvent::PaymentConfirmed { order_id, .. }
            | OrderEvent::OrderCancelled { order_id, .. }
            | OrderEvent::OrderStatusChanged { order_id, .. } => *order_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced { .. } => "OrderPlaced",
            OrderEvent::PaymentConfirmed { .. } => "PaymentConfirmed",
            OrderEvent::OrderCancelled { .. } => "OrderCancelled",
            OrderEvent::OrderStatusChanged { .. } => "OrderStatusChanged",
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Hands the event off. Must return without waiting on the consumer.
    fn notify(&self, event: OrderEvent);
}

/// Logs every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: OrderEvent) {
        tracing::info!(
            event = event.name(),
            order_id = %event.order_id(),
            payload = ?event,
            "Order notification"
        );
    }
}

/// Queues events on an unbounded channel drained by a background task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<OrderEvent>,
}

impl ChannelNotifier {
    /// Spawns the draining task on the current runtime. It stops once every
    /// sender is dropped.
    pub fn spawn<N>(consumer: N) -> Self
    where
        N: Notifier + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                consumer.notify(event);
            }
            tracing::debug!("Notification channel closed");
        });
        Self { sender }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: OrderEvent) {
        if let Err(err) = self.sender.send(event) {
            tracing::warn!(event = err.0.name(), "Notification dropped: consumer stopped");
        }
    }
}

/// Keeps every event in memory for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<OrderEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OrderEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: OrderEvent) {
        self.events.lock().unwrap().push(event);
    }
}
