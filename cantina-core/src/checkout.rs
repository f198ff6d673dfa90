//! Order placement: validation gates, service-day resolution and the
//! atomic insert into the ledger.
use chrono::{Datelike, NaiveDateTime, Weekday};
use rand::Rng;
use smallvec::SmallVec;
use std::collections::HashSet;
use thiserror::Error;

use crate::calendar::ServiceCalendar;
use crate::catalog::{Catalog, ItemId};
use crate::config::PolicyConfig;
use crate::constants::MAX_LINE_QTY;
use crate::eligibility::{self, ServiceDayOutcome};
use crate::ledger::{LedgerError, NewOrder, OrderId, OrderLedger, OrderLine};
use crate::roster::{AccountId, Role, Roster, RosterError};
use crate::token::{self, TokenError};

/// Why an order could not be placed.
///
/// Validation errors (bad request shape) and policy errors (legitimate
/// business rules) share the enum; both are rejected before anything is
/// persisted. [`CheckoutError::TokenAllocation`] is the one system
/// error: it indicates keyspace exhaustion, not a user mistake.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("student is blocked from ordering")]
    StudentBlocked,
    #[error("operators cannot place lunch orders")]
    OperatorCannotOrder,
    #[error("order placement is paused on weekends")]
    OrdersPaused,
    #[error("cart is empty")]
    EmptyCart,
    #[error("unknown or inactive item {0}")]
    UnknownItem(ItemId),
    #[error("item {item} has no category configured")]
    UncategorizedItem { item: ItemId },
    #[error("only one item of category {category:?} per day")]
    CategoryConflict { category: String },
    #[error("only one unit of {item} per order")]
    QuantityExceedsOne { item: ItemId },
    #[error("student already has an order for {day}")]
    AlreadyOrderedToday { day: chrono::NaiveDate },
    #[error(transparent)]
    UnknownAccount(#[from] RosterError),
    #[error(transparent)]
    TokenAllocation(#[from] TokenError),
}

/// A successfully placed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub order: OrderId,
    pub service_day: ServiceDayOutcome,
}

/// Why a cancel request was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CancelError {
    #[error("unknown order {0}")]
    UnknownOrder(OrderId),
    #[error("order {0} belongs to another student")]
    NotOwner(OrderId),
    #[error("order {0} is not pending")]
    NotCancelable(OrderId),
}

/// Validate the cart against the catalog: every item exists, is active
/// and categorized; one unit per line; one item per category.
fn validate_lines(
    catalog: &Catalog,
    lines: &[(ItemId, u32)],
) -> Result<SmallVec<[OrderLine; 4]>, CheckoutError> {
    if lines.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }
    let mut seen_categories: HashSet<&str> = HashSet::new();
    let mut accepted: SmallVec<[OrderLine; 4]> = SmallVec::new();
    for (item_id, qty) in lines {
        let item = catalog
            .find_item(*item_id)
            .filter(|i| i.active)
            .ok_or(CheckoutError::UnknownItem(*item_id))?;
        if *qty > MAX_LINE_QTY {
            return Err(CheckoutError::QuantityExceedsOne { item: *item_id });
        }
        // Uncategorized items would bypass the per-category rule.
        let Some(slug) = item.category.as_deref() else {
            return Err(CheckoutError::UncategorizedItem { item: *item_id });
        };
        if !seen_categories.insert(slug) {
            return Err(CheckoutError::CategoryConflict {
                category: catalog.category_label(slug).to_string(),
            });
        }
        accepted.push(OrderLine {
            item: *item_id,
            qty: (*qty).min(MAX_LINE_QTY),
        });
    }
    Ok(accepted)
}

/// Place an order for `student`.
///
/// The duplicate pre-check against the ledger is an early exit; the
/// ledger's unique (student, service day) index at insert time is the
/// authoritative enforcement, and its conflict is translated into the
/// same [`CheckoutError::AlreadyOrderedToday`] the pre-check produces.
/// No partial state survives a rejected placement: the draft only
/// reaches the ledger fully formed, token included.
#[allow(clippy::too_many_arguments)]
pub fn place_order<R: Rng + ?Sized>(
    roster: &Roster,
    ledger: &mut OrderLedger,
    catalog: &Catalog,
    calendar: &ServiceCalendar,
    config: &PolicyConfig,
    cutoff: chrono::NaiveTime,
    rng: &mut R,
    student: AccountId,
    lines: &[(ItemId, u32)],
    now: NaiveDateTime,
) -> Result<Placement, CheckoutError> {
    let account = roster.require_account(student)?;
    if account.role != Role::Student {
        return Err(CheckoutError::OperatorCannotOrder);
    }
    if account.is_blocked() {
        return Err(CheckoutError::StudentBlocked);
    }
    if config.weekend_pause && matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return Err(CheckoutError::OrdersPaused);
    }

    let accepted = validate_lines(catalog, lines)?;

    let outcome = eligibility::next_service_day(
        roster,
        student,
        calendar,
        cutoff,
        config.default_days_mask,
        now,
    )?;

    if ledger.active_for(student, outcome.day).is_some() {
        return Err(CheckoutError::AlreadyOrderedToday { day: outcome.day });
    }

    let pickup_token = token::allocate(rng, |candidate| ledger.has_token(candidate))?;
    let draft = NewOrder {
        student,
        service_day: outcome.day,
        pickup_token,
        created_at: now,
        lines: accepted,
    };
    match ledger.insert(draft) {
        Ok(order) => {
            log::debug!("placed {order} for {student} on {}", outcome.day);
            Ok(Placement {
                order,
                service_day: outcome,
            })
        }
        Err(LedgerError::DuplicateOrder { day, .. }) => {
            Err(CheckoutError::AlreadyOrderedToday { day })
        }
        // The allocator pre-checked the token index; losing that race
        // inside a single &mut insert cannot happen, but the constraint
        // still answers for itself.
        Err(LedgerError::TokenTaken) => Err(CheckoutError::TokenAllocation(TokenError::Exhausted {
            attempts: crate::constants::TOKEN_RETRY_LIMIT,
        })),
        Err(LedgerError::UnknownOrder(_) | LedgerError::NotCancelable(_)) => {
            unreachable!("insert only raises uniqueness errors")
        }
    }
}

/// Student-initiated cancellation of their own pending order. Frees the
/// (student, service day) slot for a new order.
pub fn cancel_order(
    ledger: &mut OrderLedger,
    student: AccountId,
    order: OrderId,
) -> Result<(), CancelError> {
    let existing = ledger
        .get(order)
        .ok_or(CancelError::UnknownOrder(order))?;
    if existing.student != student {
        return Err(CancelError::NotOwner(order));
    }
    match ledger.cancel(order) {
        Ok(_) => Ok(()),
        Err(LedgerError::NotCancelable(id)) => Err(CancelError::NotCancelable(id)),
        Err(LedgerError::UnknownOrder(id)) => Err(CancelError::UnknownOrder(id)),
        Err(LedgerError::DuplicateOrder { .. } | LedgerError::TokenTaken) => {
            unreachable!("cancel only raises lookup errors")
        }
    }
}
