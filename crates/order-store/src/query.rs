use chrono::{DateTime, Utc};
use common::UserId;
use domain::{Order, OrderStatus};
use serde::Serialize;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Filter and pagination for order listings. Results are newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    pub user_id: Option<UserId>,

    /// Placed at or after this instant.
    pub placed_from: Option<DateTime<Utc>>,

    /// Placed at or before this instant.
    pub placed_to: Option<DateTime<Utc>>,

    /// Substring of the contact phone number.
    pub phone: Option<String>,

    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            status: None,
            user_id: None,
            placed_from: None,
            placed_to: None,
            phone: None,
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl OrderQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders belonging to one customer.
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn placed_between(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.placed_from = from;
        self.placed_to = to;
        self
    }

    pub fn phone(mut self, fragment: impl Into<String>) -> Self {
        let fragment = fragment.into();
        self.phone = (!fragment.trim().is_empty()).then(|| fragment.trim().to_string());
        self
    }

    /// Sets the page, clamping to `page >= 1` and `1 <= limit <= MAX_PAGE_SIZE`.
    pub fn paginate(mut self, page: u32, limit: u32) -> Self {
        self.page = page.max(1);
        self.limit = limit.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit)
    }

    /// Returns true if `order` passes every filter.
    pub fn matches(&self, order: &Order) -> bool {
        if let Some(status) = self.status
            && order.status != status
        {
            return false;
        }
        if let Some(user_id) = self.user_id
            && order.user_id != Some(user_id)
        {
            return false;
        }
        if let Some(from) = self.placed_from
            && order.placed_at < from
        {
            return false;
        }
        if let Some(to) = self.placed_to
            && order.placed_at > to
        {
            return false;
        }
        if let Some(ref phone) = self.phone
            && !order.contact.phone.contains(phone.as_str())
        {
            return false;
        }
        true
    }
}

/// One page of results plus the totals needed to render pagination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total_items: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, query: &OrderQuery, total_items: u64) -> Self {
        Self {
            items,
            page: query.page,
            limit: query.limit,
            total_items,
        }
    }

    pub fn total_pages(&self) -> u64 {
        self.total_items.div_ceil(u64::from(self.limit.max(1)))
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            limit: self.limit,
            total_items: self.total_items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        let q = OrderQuery::new().paginate(0, 1_000);
        assert_eq!(q.page, 1);
        assert_eq!(q.limit, MAX_PAGE_SIZE);
        assert_eq!(q.offset(), 0);

        let q = OrderQuery::new().paginate(3, 20);
        assert_eq!(q.offset(), 40);
    }

    #[test]
    fn total_pages_rounds_up() {
        let q = OrderQuery::new().paginate(1, 10);
        let page: Page<u8> = Page::new(vec![], &q, 21);
        assert_eq!(page.total_pages(), 3);

        let empty: Page<u8> = Page::new(vec![], &q, 0);
        assert_eq!(empty.total_pages(), 0);
    }

    #[test]
    fn blank_phone_filter_is_ignored() {
        assert_eq!(OrderQuery::new().phone("  ").phone, None);
        assert_eq!(
            OrderQuery::new().phone(" 0901 ").phone.as_deref(),
            Some("0901")
        );
    }
}
