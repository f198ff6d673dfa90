//! The order ledger: every order ever placed, plus the unique indexes
//! that make "one order per student per service day" hold under
//! concurrent double-submission.
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

use crate::catalog::ItemId;
use crate::roster::AccountId;

/// Identifier of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order#{}", self.0)
    }
}

/// Overall order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    PickedUp,
    NoShow,
    Canceled,
}

impl OrderStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PickedUp => "picked_up",
            Self::NoShow => "no_show",
            Self::Canceled => "canceled",
        }
    }

    /// Terminal for automated processing: the sweep never touches these.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::PickedUp | Self::NoShow | Self::Canceled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kitchen-facing delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Delivered,
    Undelivered,
}

impl DeliveryStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Undelivered => "undelivered",
        }
    }
}

/// One item on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub item: ItemId,
    pub qty: u32,
}

/// Lines stored inline; carts are tiny (one item per category).
pub type OrderLines = SmallVec<[OrderLine; 4]>;

/// A placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub student: AccountId,
    pub service_day: NaiveDate,
    pub status: OrderStatus,
    pub delivery_status: DeliveryStatus,
    /// Assigned exactly once at creation, stable thereafter.
    pub pickup_token: String,
    pub created_at: NaiveDateTime,
    pub delivered_at: Option<NaiveDateTime>,
    pub delivered_by: Option<AccountId>,
    #[serde(default)]
    pub lines: OrderLines,
}

/// A fully-formed order draft, token included, ready for the atomic
/// insert. Orders are never persisted in a partial state.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub student: AccountId,
    pub service_day: NaiveDate,
    pub pickup_token: String,
    pub created_at: NaiveDateTime,
    pub lines: OrderLines,
}

/// Errors raised by the ledger's uniqueness rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{student} already has an order for {day}")]
    DuplicateOrder { student: AccountId, day: NaiveDate },
    #[error("pickup token already in use")]
    TokenTaken,
    #[error("unknown order {0}")]
    UnknownOrder(OrderId),
    #[error("{0} is not pending and cannot be canceled")]
    NotCancelable(OrderId),
}

/// The order set.
///
/// Two unique indexes are authoritative: at most one non-canceled order
/// per (student, service day), and one order per pickup token. A
/// SQL-backed port maps them to a partial unique composite index and a
/// unique token column; here the single `&mut` insert is the
/// transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderLedger {
    orders: BTreeMap<OrderId, Order>,
    next_id: u64,
    #[serde(skip)]
    by_student_day: HashMap<(AccountId, NaiveDate), OrderId>,
    #[serde(skip)]
    by_token: HashMap<String, OrderId>,
}

impl OrderLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the in-memory indexes after deserialization.
    pub fn rehydrate(&mut self) {
        self.by_student_day.clear();
        self.by_token.clear();
        for order in self.orders.values() {
            if order.status != OrderStatus::Canceled {
                self.by_student_day
                    .insert((order.student, order.service_day), order.id);
            }
            self.by_token.insert(order.pickup_token.clone(), order.id);
        }
    }

    /// Atomically insert a draft, enforcing both unique indexes.
    ///
    /// # Errors
    ///
    /// [`LedgerError::DuplicateOrder`] when a non-canceled order already
    /// occupies the (student, service day) slot — the caller translates
    /// this into its "already ordered" domain error.
    /// [`LedgerError::TokenTaken`] when the token index rejects the
    /// draft (the allocator's pre-check lost a race).
    pub fn insert(&mut self, draft: NewOrder) -> Result<OrderId, LedgerError> {
        let slot = (draft.student, draft.service_day);
        if self.by_student_day.contains_key(&slot) {
            return Err(LedgerError::DuplicateOrder {
                student: draft.student,
                day: draft.service_day,
            });
        }
        if self.by_token.contains_key(&draft.pickup_token) {
            return Err(LedgerError::TokenTaken);
        }
        self.next_id += 1;
        let id = OrderId(self.next_id);
        self.by_student_day.insert(slot, id);
        self.by_token.insert(draft.pickup_token.clone(), id);
        self.orders.insert(
            id,
            Order {
                id,
                student: draft.student,
                service_day: draft.service_day,
                status: OrderStatus::Pending,
                delivery_status: DeliveryStatus::Pending,
                pickup_token: draft.pickup_token,
                created_at: draft.created_at,
                delivered_at: None,
                delivered_by: None,
                lines: draft.lines,
            },
        );
        Ok(id)
    }

    /// Cancel a pending order, freeing its daily slot. The token stays
    /// reserved forever.
    pub fn cancel(&mut self, id: OrderId) -> Result<&Order, LedgerError> {
        let order = self
            .orders
            .get_mut(&id)
            .ok_or(LedgerError::UnknownOrder(id))?;
        if order.status != OrderStatus::Pending {
            return Err(LedgerError::NotCancelable(id));
        }
        order.status = OrderStatus::Canceled;
        self.by_student_day.remove(&(order.student, order.service_day));
        Ok(&self.orders[&id])
    }

    #[must_use]
    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn require(&self, id: OrderId) -> Result<&Order, LedgerError> {
        self.orders.get(&id).ok_or(LedgerError::UnknownOrder(id))
    }

    pub(crate) fn get_mut(&mut self, id: OrderId) -> Result<&mut Order, LedgerError> {
        self.orders.get_mut(&id).ok_or(LedgerError::UnknownOrder(id))
    }

    /// The non-canceled order occupying a (student, day) slot, if any.
    #[must_use]
    pub fn active_for(&self, student: AccountId, day: NaiveDate) -> Option<&Order> {
        self.by_student_day
            .get(&(student, day))
            .and_then(|id| self.orders.get(id))
    }

    #[must_use]
    pub fn find_by_token(&self, token: &str) -> Option<&Order> {
        self.by_token.get(token).and_then(|id| self.orders.get(id))
    }

    #[must_use]
    pub fn has_token(&self, token: &str) -> bool {
        self.by_token.contains_key(token)
    }

    /// Non-canceled orders for a service day, in creation order.
    #[must_use]
    pub fn orders_for_day(&self, day: NaiveDate) -> Vec<&Order> {
        let mut day_orders: Vec<&Order> = self
            .orders
            .values()
            .filter(|o| o.service_day == day && o.status != OrderStatus::Canceled)
            .collect();
        day_orders.sort_by_key(|o| o.created_at);
        day_orders
    }

    /// Orders the daily sweep should settle: service day today or
    /// earlier, still pending. Never future orders.
    #[must_use]
    pub fn sweep_candidates(&self, today: NaiveDate) -> Vec<OrderId> {
        self.orders
            .values()
            .filter(|o| o.service_day <= today && !o.status.is_settled())
            .map(|o| o.id)
            .collect()
    }

    /// A student's orders up to `today`, most recent service day first.
    /// Used by the streak recomputation walk.
    #[must_use]
    pub fn history_until(&self, student: AccountId, today: NaiveDate) -> Vec<&Order> {
        let mut history: Vec<&Order> = self
            .orders
            .values()
            .filter(|o| o.student == student && o.service_day <= today)
            .collect();
        history.sort_by(|a, b| {
            b.service_day
                .cmp(&a.service_day)
                .then(b.created_at.cmp(&a.created_at))
        });
        history
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
