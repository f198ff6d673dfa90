//! Order fulfillment outcomes and the student blocking policy.
//!
//! Terminal transitions are idempotent: re-applying `picked_up` to a
//! picked-up order (or `no_show` to a no-show) is a no-op and never
//! double-counts streak effects. Staff may still correct a mistake by
//! applying the opposite mark; the streak recomputation walk exists to
//! repair any drift that causes.
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{DeliveryStatus, OrderId, OrderLedger, OrderStatus};
use crate::roster::{AccountId, BlockSource, Roster, RosterError};

/// Errors raised by fulfillment operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FulfillmentError {
    #[error("unknown order {0}")]
    UnknownOrder(OrderId),
    #[error("unknown account {0}")]
    UnknownAccount(AccountId),
    #[error("{0} lacks the delivery capability")]
    NotOperator(AccountId),
}

/// Unblocking is privileged; there is no automatic path back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("unblock requires a staff actor")]
    StaffRequired,
    #[error(transparent)]
    Roster(#[from] RosterError),
}

/// Outcome receipt of a terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkResult {
    pub order: OrderId,
    pub student: AccountId,
    pub prev_status: OrderStatus,
    pub new_status: OrderStatus,
    pub no_show_streak: u32,
    pub blocked: bool,
    pub block_source: Option<BlockSource>,
}

/// Proof that a streak increment reached the student record.
///
/// `mark_no_show` performs two logically separate writes: the streak
/// update and, past the threshold, the block. Only this receipt can be
/// fed to the block evaluation, so "streak persisted first" is enforced
/// by the type, not by convention.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct StreakWrite {
    student: AccountId,
    streak: u32,
}

impl StreakWrite {
    #[must_use]
    pub const fn streak(&self) -> u32 {
        self.streak
    }
}

fn mark_result(roster: &Roster, ledger: &OrderLedger, order: OrderId, prev: OrderStatus) -> MarkResult {
    let record = ledger.get(order).expect("order checked by caller");
    let account = roster
        .account(record.student)
        .expect("account checked by caller");
    MarkResult {
        order,
        student: record.student,
        prev_status: prev,
        new_status: record.status,
        no_show_streak: account.no_show_streak,
        blocked: account.is_blocked(),
        block_source: account.block_source(),
    }
}

/// Mark an order as picked up and reset the student's no-show streak.
///
/// # Errors
///
/// [`FulfillmentError::NotOperator`] when the actor lacks the delivery
/// capability — a hard error; the counter lane authenticates its
/// operator before scanning.
pub fn mark_picked_up(
    roster: &mut Roster,
    ledger: &mut OrderLedger,
    order: OrderId,
    actor: AccountId,
    now: NaiveDateTime,
) -> Result<MarkResult, FulfillmentError> {
    let operator = roster
        .account(actor)
        .ok_or(FulfillmentError::UnknownAccount(actor))?;
    if !operator.role.is_operator() {
        return Err(FulfillmentError::NotOperator(actor));
    }

    let record = ledger
        .get_mut(order)
        .map_err(|_| FulfillmentError::UnknownOrder(order))?;
    let prev = record.status;
    if prev == OrderStatus::PickedUp {
        return Ok(mark_result(roster, ledger, order, prev));
    }
    record.status = OrderStatus::PickedUp;
    record.delivery_status = DeliveryStatus::Delivered;
    record.delivered_at = Some(now);
    record.delivered_by = Some(actor);
    let student = record.student;

    let account = roster
        .account_mut(student)
        .map_err(|_| FulfillmentError::UnknownAccount(student))?;
    // Skip the write when there is nothing to reset.
    if account.no_show_streak != 0 || account.last_pickup_on.is_none() {
        account.no_show_streak = 0;
        account.last_pickup_on = Some(now.date());
    }
    Ok(mark_result(roster, ledger, order, prev))
}

/// First write: increment the streak and stamp the last-no-show date.
fn record_no_show(
    roster: &mut Roster,
    student: AccountId,
    today: NaiveDate,
) -> Result<StreakWrite, FulfillmentError> {
    let account = roster
        .account_mut(student)
        .map_err(|_| FulfillmentError::UnknownAccount(student))?;
    account.no_show_streak = account.no_show_streak.saturating_add(1);
    account.last_no_show_on = Some(today);
    Ok(StreakWrite {
        student,
        streak: account.no_show_streak,
    })
}

/// Second write: block when the persisted streak crossed the threshold.
/// Consumes the [`StreakWrite`] receipt; an already-blocked student gets
/// no additional event.
fn maybe_auto_block(
    roster: &mut Roster,
    write: StreakWrite,
    threshold: u32,
    now: NaiveDateTime,
) -> Result<(), FulfillmentError> {
    let account = roster
        .account(write.student)
        .ok_or(FulfillmentError::UnknownAccount(write.student))?;
    if write.streak() < threshold || account.is_blocked() {
        return Ok(());
    }
    let reason = format!("{threshold} faltas consecutivas");
    log::info!("auto-blocking {}: {reason}", write.student);
    roster
        .record_block(write.student, BlockSource::Auto, None, &reason, now)
        .map_err(|_| FulfillmentError::UnknownAccount(write.student))?;
    Ok(())
}

/// Mark an order as a no-show, bump the streak and auto-block past the
/// threshold.
pub fn mark_no_show(
    roster: &mut Roster,
    ledger: &mut OrderLedger,
    order: OrderId,
    threshold: u32,
    now: NaiveDateTime,
) -> Result<MarkResult, FulfillmentError> {
    let record = ledger
        .get_mut(order)
        .map_err(|_| FulfillmentError::UnknownOrder(order))?;
    let prev = record.status;
    if prev == OrderStatus::NoShow {
        return Ok(mark_result(roster, ledger, order, prev));
    }
    record.status = OrderStatus::NoShow;
    record.delivery_status = DeliveryStatus::Undelivered;
    let student = record.student;

    let write = record_no_show(roster, student, now.date())?;
    maybe_auto_block(roster, write, threshold, now)?;
    Ok(mark_result(roster, ledger, order, prev))
}

/// Manually block a student. The actor is retained on the record only
/// when it holds staff capability; automated blocks pass no actor.
pub fn block(
    roster: &mut Roster,
    student: AccountId,
    source: BlockSource,
    actor: Option<AccountId>,
    reason: &str,
    now: NaiveDateTime,
) -> Result<(), FulfillmentError> {
    let target = roster
        .account(student)
        .ok_or(FulfillmentError::UnknownAccount(student))?;
    if target.is_blocked() {
        return Ok(());
    }
    let recorded_actor =
        actor.filter(|a| roster.account(*a).is_some_and(|acc| acc.role.is_operator()));
    roster
        .record_block(student, source, recorded_actor, reason, now)
        .map_err(|_| FulfillmentError::UnknownAccount(student))?;
    Ok(())
}

/// Unblock a student: staff only, clears all block metadata and resets
/// the streak. A fresh start, not just a flag flip.
pub fn unblock(
    roster: &mut Roster,
    student: AccountId,
    actor: AccountId,
    reason: &str,
    now: NaiveDateTime,
) -> Result<(), PermissionError> {
    let operator = roster.require_account(actor)?;
    if !operator.role.is_operator() {
        return Err(PermissionError::StaffRequired);
    }
    if !roster.require_account(student)?.is_blocked() {
        return Ok(());
    }
    roster.record_unblock(student, actor, reason, now)?;
    Ok(())
}

/// Target state for the kitchen delivery toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryToggle {
    Delivered,
    Undelivered,
}

/// Options for the daily sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOptions {
    /// Report intended changes without persisting them.
    pub dry_run: bool,
    /// Bypass the cutoff-time gate (manual/test invocation).
    pub force: bool,
}

/// One order the sweep looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepEntry {
    pub order: OrderId,
    pub student: AccountId,
    pub service_day: NaiveDate,
    /// False on dry runs.
    pub applied: bool,
    pub streak_after: Option<u32>,
    pub auto_blocked: bool,
}

/// What a sweep invocation did (or would do).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// False when the cutoff gate refused the run.
    pub ran: bool,
    pub cutoff: NaiveTime,
    pub dry_run: bool,
    pub entries: Vec<SweepEntry>,
}

impl SweepReport {
    #[must_use]
    pub fn marked(&self) -> usize {
        self.entries.iter().filter(|e| e.applied).count()
    }
}

/// Settle every order whose service day has passed and is still pending.
///
/// Intended to run once daily after the cutoff; refuses earlier
/// invocations unless forced. Safe to re-run: settled orders are no
/// longer candidates, and re-marking is a no-op. A SQL-backed port must
/// select candidates with `FOR UPDATE SKIP LOCKED` so overlapping cron
/// runs do not double-process; here the exclusive borrow serializes
/// them.
pub fn sweep(
    roster: &mut Roster,
    ledger: &mut OrderLedger,
    threshold: u32,
    cutoff: NaiveTime,
    now: NaiveDateTime,
    options: SweepOptions,
) -> Result<SweepReport, FulfillmentError> {
    if !options.force && now.time() < cutoff {
        log::info!("sweep skipped: {} is before the {cutoff} cutoff", now.time());
        return Ok(SweepReport {
            ran: false,
            cutoff,
            dry_run: options.dry_run,
            entries: Vec::new(),
        });
    }

    let today = now.date();
    let mut entries = Vec::new();
    for order in ledger.sweep_candidates(today) {
        let record = ledger
            .require(order)
            .map_err(|_| FulfillmentError::UnknownOrder(order))?;
        let student = record.student;
        let service_day = record.service_day;
        if options.dry_run {
            entries.push(SweepEntry {
                order,
                student,
                service_day,
                applied: false,
                streak_after: None,
                auto_blocked: false,
            });
            continue;
        }
        let was_blocked = roster
            .account(student)
            .ok_or(FulfillmentError::UnknownAccount(student))?
            .is_blocked();
        let result = mark_no_show(roster, ledger, order, threshold, now)?;
        entries.push(SweepEntry {
            order,
            student,
            service_day,
            applied: true,
            streak_after: Some(result.no_show_streak),
            auto_blocked: result.blocked && !was_blocked,
        });
    }
    Ok(SweepReport {
        ran: true,
        cutoff,
        dry_run: options.dry_run,
        entries,
    })
}

/// Recompute the true consecutive no-show count from order history.
///
/// Walks the student's orders backward from `today`, counting no-shows
/// until a delivered order breaks the run. Canceled orders are invisible
/// and unresolved pending orders are neutral. Idempotent; exists to
/// repair drift if the incremental accounting ever desyncs from ground
/// truth.
pub fn recompute_streak(
    roster: &mut Roster,
    ledger: &OrderLedger,
    student: AccountId,
    today: NaiveDate,
) -> Result<u32, FulfillmentError> {
    roster
        .account(student)
        .ok_or(FulfillmentError::UnknownAccount(student))?;
    let mut streak = 0u32;
    for order in ledger.history_until(student, today) {
        match order.status {
            OrderStatus::NoShow => streak += 1,
            OrderStatus::PickedUp => break,
            OrderStatus::Canceled | OrderStatus::Pending => {}
        }
    }
    let account = roster
        .account_mut(student)
        .map_err(|_| FulfillmentError::UnknownAccount(student))?;
    if account.no_show_streak != streak {
        log::warn!(
            "streak drift for {student}: stored {} recomputed {streak}",
            account.no_show_streak
        );
        account.no_show_streak = streak;
    }
    Ok(streak)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ItemId;
    use crate::ledger::{NewOrder, OrderLine};
    use crate::roster::{BlockAction, Role};
    use smallvec::smallvec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        date(y, m, d).and_hms_opt(h, 0, 0).unwrap()
    }

    struct Fixture {
        roster: Roster,
        ledger: OrderLedger,
        student: AccountId,
        staff: AccountId,
    }

    fn fixture() -> Fixture {
        let mut roster = Roster::new();
        let student = roster
            .register_account("Ana", "123.456.789-09", Role::Student)
            .unwrap();
        let staff = roster
            .register_account("Chef", "111.444.777-35", Role::Staff)
            .unwrap();
        Fixture {
            roster,
            ledger: OrderLedger::new(),
            student,
            staff,
        }
    }

    fn order_for(fx: &mut Fixture, day: NaiveDate, token_seed: u64) -> OrderId {
        fx.ledger
            .insert(NewOrder {
                student: fx.student,
                service_day: day,
                pickup_token: format!("{token_seed:013}"),
                created_at: day.and_hms_opt(8, 0, 0).unwrap(),
                lines: smallvec![OrderLine {
                    item: ItemId(1),
                    qty: 1
                }],
            })
            .unwrap()
    }

    #[test]
    fn pickup_resets_streak_and_is_idempotent() {
        let mut fx = fixture();
        fx.roster.account_mut(fx.student).unwrap().no_show_streak = 2;
        let order = order_for(&mut fx, date(2026, 8, 5), 1);

        let first = mark_picked_up(&mut fx.roster, &mut fx.ledger, order, fx.staff, at(2026, 8, 5, 12)).unwrap();
        assert_eq!(first.new_status, OrderStatus::PickedUp);
        assert_eq!(first.no_show_streak, 0);

        let account = fx.roster.account(fx.student).unwrap();
        assert_eq!(account.last_pickup_on, Some(date(2026, 8, 5)));

        // Re-applying changes nothing, including delivered_at.
        let again = mark_picked_up(&mut fx.roster, &mut fx.ledger, order, fx.staff, at(2026, 8, 5, 13)).unwrap();
        assert_eq!(again.prev_status, OrderStatus::PickedUp);
        let record = fx.ledger.get(order).unwrap();
        assert_eq!(record.delivered_at, Some(at(2026, 8, 5, 12)));
        assert_eq!(record.delivered_by, Some(fx.staff));
    }

    #[test]
    fn pickup_requires_the_delivery_capability() {
        let mut fx = fixture();
        let order = order_for(&mut fx, date(2026, 8, 5), 1);
        let result = mark_picked_up(
            &mut fx.roster,
            &mut fx.ledger,
            order,
            fx.student,
            at(2026, 8, 5, 12),
        );
        assert_eq!(result, Err(FulfillmentError::NotOperator(fx.student)));
        assert_eq!(fx.ledger.get(order).unwrap().status, OrderStatus::Pending);
    }

    #[test]
    fn no_show_increments_streak_and_is_idempotent() {
        let mut fx = fixture();
        let order = order_for(&mut fx, date(2026, 8, 5), 1);

        let first = mark_no_show(&mut fx.roster, &mut fx.ledger, order, 3, at(2026, 8, 5, 16)).unwrap();
        assert_eq!(first.new_status, OrderStatus::NoShow);
        assert_eq!(first.no_show_streak, 1);
        assert!(!first.blocked);

        let again = mark_no_show(&mut fx.roster, &mut fx.ledger, order, 3, at(2026, 8, 5, 17)).unwrap();
        assert_eq!(again.prev_status, OrderStatus::NoShow);
        assert_eq!(again.no_show_streak, 1);
        assert_eq!(
            fx.roster.account(fx.student).unwrap().last_no_show_on,
            Some(date(2026, 8, 5))
        );
    }

    #[test]
    fn third_no_show_auto_blocks_once() {
        let mut fx = fixture();
        for day in 3..=5 {
            let order = order_for(&mut fx, date(2026, 8, day), u64::from(day));
            let result =
                mark_no_show(&mut fx.roster, &mut fx.ledger, order, 3, at(2026, 8, day, 16)).unwrap();
            assert_eq!(result.no_show_streak, day - 2);
        }
        let account = fx.roster.account(fx.student).unwrap();
        assert!(account.is_blocked());
        assert_eq!(account.block_source(), Some(BlockSource::Auto));
        assert_eq!(account.blocked_by(), None);
        assert_eq!(account.blocked_reason(), Some("3 faltas consecutivas"));

        // A fourth no-show while blocked adds no event.
        let order = order_for(&mut fx, date(2026, 8, 6), 6);
        mark_no_show(&mut fx.roster, &mut fx.ledger, order, 3, at(2026, 8, 6, 16)).unwrap();
        let events: Vec<_> = fx.roster.block_events_for(fx.student).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, BlockAction::Block);
        assert_eq!(events[0].source, BlockSource::Auto);
        assert_eq!(fx.roster.account(fx.student).unwrap().no_show_streak, 4);
    }

    #[test]
    fn manual_block_keeps_staff_actor_only() {
        let mut fx = fixture();
        block(
            &mut fx.roster,
            fx.student,
            BlockSource::Manual,
            Some(fx.staff),
            "comportamento",
            at(2026, 8, 5, 12),
        )
        .unwrap();
        let account = fx.roster.account(fx.student).unwrap();
        assert!(account.is_blocked());
        assert_eq!(account.blocked_by(), Some(fx.staff));

        // Blocking an already-blocked student is a no-op.
        block(
            &mut fx.roster,
            fx.student,
            BlockSource::Manual,
            Some(fx.staff),
            "de novo",
            at(2026, 8, 5, 13),
        )
        .unwrap();
        assert_eq!(fx.roster.block_events_for(fx.student).count(), 1);
    }

    #[test]
    fn unblock_requires_staff_and_resets_streak() {
        let mut fx = fixture();
        fx.roster.account_mut(fx.student).unwrap().no_show_streak = 5;
        block(&mut fx.roster, fx.student, BlockSource::Auto, None, "3 faltas consecutivas", at(2026, 8, 5, 16)).unwrap();

        let other_student = fx
            .roster
            .register_account("Bia", "390.533.447-05", Role::Student)
            .unwrap();
        assert_eq!(
            unblock(&mut fx.roster, fx.student, other_student, "por favor", at(2026, 8, 6, 9)),
            Err(PermissionError::StaffRequired)
        );

        unblock(&mut fx.roster, fx.student, fx.staff, "conversa", at(2026, 8, 6, 10)).unwrap();
        let account = fx.roster.account(fx.student).unwrap();
        assert!(!account.is_blocked());
        assert_eq!(account.no_show_streak, 0);
        assert_eq!(account.block_source(), None);
        let events: Vec<_> = fx.roster.block_events_for(fx.student).collect();
        assert_eq!(events.last().unwrap().action, BlockAction::Unblock);
        assert_eq!(events.last().unwrap().actor, Some(fx.staff));
    }

    #[test]
    fn sweep_respects_gate_dry_run_and_force() {
        let mut fx = fixture();
        let cutoff = NaiveTime::from_hms_opt(15, 0, 0).unwrap();
        let order = order_for(&mut fx, date(2026, 8, 4), 1);

        // Before the cutoff: gate refuses.
        let report = sweep(&mut fx.roster, &mut fx.ledger, 3, cutoff, at(2026, 8, 5, 10), SweepOptions::default()).unwrap();
        assert!(!report.ran);
        assert!(report.entries.is_empty());

        // Forced dry run reports without persisting.
        let report = sweep(
            &mut fx.roster,
            &mut fx.ledger,
            3,
            cutoff,
            at(2026, 8, 5, 10),
            SweepOptions { dry_run: true, force: true },
        )
        .unwrap();
        assert!(report.ran);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.marked(), 0);
        assert_eq!(fx.ledger.get(order).unwrap().status, OrderStatus::Pending);

        // Real run after the cutoff settles the order; a re-run finds
        // nothing left.
        let report = sweep(&mut fx.roster, &mut fx.ledger, 3, cutoff, at(2026, 8, 5, 16), SweepOptions::default()).unwrap();
        assert_eq!(report.marked(), 1);
        assert_eq!(fx.ledger.get(order).unwrap().status, OrderStatus::NoShow);

        let report = sweep(&mut fx.roster, &mut fx.ledger, 3, cutoff, at(2026, 8, 5, 17), SweepOptions::default()).unwrap();
        assert!(report.entries.is_empty());
    }

    #[test]
    fn recompute_walks_history_and_repairs_drift() {
        let mut fx = fixture();
        let staff = fx.staff;

        // Delivered on the 3rd, no-shows on the 4th and 5th, a canceled
        // order in between.
        let delivered = order_for(&mut fx, date(2026, 8, 3), 1);
        mark_picked_up(&mut fx.roster, &mut fx.ledger, delivered, staff, at(2026, 8, 3, 12)).unwrap();
        let missed_a = order_for(&mut fx, date(2026, 8, 4), 2);
        mark_no_show(&mut fx.roster, &mut fx.ledger, missed_a, 3, at(2026, 8, 4, 16)).unwrap();
        let canceled = order_for(&mut fx, date(2026, 8, 5), 3);
        fx.ledger.cancel(canceled).unwrap();
        let missed_b = order_for(&mut fx, date(2026, 8, 5), 4);
        mark_no_show(&mut fx.roster, &mut fx.ledger, missed_b, 3, at(2026, 8, 5, 16)).unwrap();

        // Poison the stored value; recompute restores ground truth.
        fx.roster.account_mut(fx.student).unwrap().no_show_streak = 9;
        let streak = recompute_streak(&mut fx.roster, &fx.ledger, fx.student, date(2026, 8, 6)).unwrap();
        assert_eq!(streak, 2);
        assert_eq!(fx.roster.account(fx.student).unwrap().no_show_streak, 2);
    }
}
