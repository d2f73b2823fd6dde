//! The already-authenticated caller, as handed over by the authentication layer.

use common::UserId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::order::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Admin,
}

impl std::str::FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "customer" | "user" => Ok(Role::Customer),
            other => Err(DomainError::validation(format!("unknown role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn customer(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Customer,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Administrators may act on any order; customers only on their own.
    pub fn ensure_can_manage(&self, order: &Order) -> Result<(), DomainError> {
        if self.is_admin() || order.user_id == Some(self.user_id) {
            Ok(())
        } else {
            Err(DomainError::Forbidden(format!(
                "user {} may not act on order {}",
                self.user_id, order.id
            )))
        }
    }

    pub fn ensure_admin(&self) -> Result<(), DomainError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(DomainError::Forbidden(
                "administrator role required".to_string(),
            ))
        }
    }
}
