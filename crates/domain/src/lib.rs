//! Domain layer for the order and payment services.
//!
//! This crate holds the pure parts of the order lifecycle:
//! - the order model and the builder that validates and prices a checkout request
//! - the status state machine with its explicit transition table
//! - payment ledger records, coupons and the authenticated principal

pub mod catalog;
pub mod coupon;
pub mod error;
pub mod order;
pub mod payment;
pub mod principal;

pub use catalog::Variant;
pub use coupon::{Coupon, DiscountKind};
pub use error::DomainError;
pub use order::{
    Cancellation, Contact, LineRequest, Order, OrderDraft, OrderLine, OrderStatus, PlaceOrder,
    ShippingAddress, StatusChange, TransitionTable,
};
pub use payment::{Payment, PaymentConfirmation, PaymentFailure, PaymentMethod};
pub use principal::{Principal, Role};
