//! Order lifecycle orchestration.
//!
//! - [`OrderCoordinator`]: checkout (build, reserve, open payment), status
//!   updates, repayment and queries
//! - [`PaymentCallbackProcessor`]: verified gateway returns and IPNs
//! - [`CancellationOrchestrator`]: cancellation with stock restore and refund
//!
//! Side effects beyond the store are announced through a [`Notifier`].

pub mod callbacks;
pub mod cancellation;
pub mod coordinator;
pub mod error;
pub mod notify;

use std::sync::Arc;

use order_store::OrderStore;
use payments::GatewayRegistry;

pub use callbacks::{CallbackKind, CallbackOutcome, PaymentCallbackProcessor};
pub use cancellation::{CancellationOrchestrator, CancellationOutcome, RefundSummary};
pub use coordinator::{CallbackUrls, OrderCoordinator, OrderDetails, PlacedOrder, Repayment};
pub use error::{CheckoutError, Result};
pub use notify::{ChannelNotifier, Notifier, OrderEvent, RecordingNotifier, TracingNotifier};

/// The three checkout services wired to one store and one set of gateways.
pub struct Checkout<S: OrderStore> {
    pub orders: OrderCoordinator<S>,
    pub callbacks: PaymentCallbackProcessor<S>,
    pub cancellations: CancellationOrchestrator<S>,
}

impl<S: OrderStore + Clone> Checkout<S> {
    pub fn new(
        store: S,
        gateways: GatewayRegistry,
        notifier: Arc<dyn Notifier>,
        urls: CallbackUrls,
    ) -> Self {
        Self {
            orders: OrderCoordinator::new(
                store.clone(),
                gateways.clone(),
                notifier.clone(),
                urls,
            ),
            callbacks: PaymentCallbackProcessor::new(
                store.clone(),
                gateways.clone(),
                notifier.clone(),
            ),
            cancellations: CancellationOrchestrator::new(store, gateways, notifier),
        }
    }
}
