//! Order aggregate, checkout builder and status state machine.

mod aggregate;
mod builder;
mod commands;
mod state;
mod value_objects;

pub use aggregate::{Cancellation, Order, StatusChange};
pub use builder::OrderDraft;
pub use commands::{LineRequest, PlaceOrder};
pub use state::{OrderStatus, TransitionTable};
pub use value_objects::{Contact, OrderLine, ShippingAddress};
