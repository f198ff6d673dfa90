//! Counter fast lane: raw scanner input to a redeemed order.
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::fulfillment::{self, FulfillmentError, MarkResult};
use crate::ledger::{OrderLedger, OrderStatus};
use crate::roster::{AccountId, Roster};
use crate::token;

/// What scanning a code produced. This is a result protocol, not an
/// error taxonomy: every variant is a normal outcome at the counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// Marked delivered just now.
    Delivered(MarkResult),
    /// Someone already collected it; idempotent re-scan.
    AlreadyDelivered {
        order: crate::ledger::OrderId,
        delivered_at: NaiveDateTime,
    },
    /// The token is real but scheduled for another day.
    WrongDay {
        order: crate::ledger::OrderId,
        service_day: NaiveDate,
    },
    /// Valid checksum, no matching order.
    NotFound,
    /// Not a 13-digit code with a correct check digit.
    InvalidFormat,
}

/// Redeem a scanned code: normalize, checksum-validate, then deliver
/// today's matching order.
///
/// Canceled orders are invisible to the counter. The actor must hold
/// the delivery capability; that error propagates rather than folding
/// into an outcome, since it means the lane is misconfigured.
pub fn redeem(
    roster: &mut Roster,
    ledger: &mut OrderLedger,
    raw: &str,
    actor: AccountId,
    now: NaiveDateTime,
) -> Result<ScanOutcome, FulfillmentError> {
    let code = token::normalize(raw);
    if !token::is_valid(&code) {
        return Ok(ScanOutcome::InvalidFormat);
    }

    let Some(order) = ledger.find_by_token(&code) else {
        return Ok(ScanOutcome::NotFound);
    };
    if order.status == OrderStatus::Canceled {
        return Ok(ScanOutcome::NotFound);
    }
    let id = order.id;

    if let Some(delivered_at) = order.delivered_at {
        return Ok(ScanOutcome::AlreadyDelivered {
            order: id,
            delivered_at,
        });
    }
    if order.service_day != now.date() {
        return Ok(ScanOutcome::WrongDay {
            order: id,
            service_day: order.service_day,
        });
    }

    let result = fulfillment::mark_picked_up(roster, ledger, id, actor, now)?;
    Ok(ScanOutcome::Delivered(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ItemId;
    use crate::ledger::{NewOrder, OrderLine};
    use crate::roster::Role;
    use smallvec::smallvec;

    const TOKEN: &str = "4006381333931";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Fixture {
        roster: Roster,
        ledger: OrderLedger,
        staff: AccountId,
    }

    fn fixture_with_order(service_day: NaiveDate) -> Fixture {
        let mut roster = Roster::new();
        let student = roster
            .register_account("Ana", "123.456.789-09", Role::Student)
            .unwrap();
        let staff = roster
            .register_account("Chef", "111.444.777-35", Role::Staff)
            .unwrap();
        let mut ledger = OrderLedger::new();
        ledger
            .insert(NewOrder {
                student,
                service_day,
                pickup_token: TOKEN.to_string(),
                created_at: service_day.and_hms_opt(8, 0, 0).unwrap(),
                lines: smallvec![OrderLine {
                    item: ItemId(1),
                    qty: 1
                }],
            })
            .unwrap();
        Fixture {
            roster,
            ledger,
            staff,
        }
    }

    #[test]
    fn scanner_noise_is_normalized_before_validation() {
        let today = date(2026, 8, 5);
        let mut fx = fixture_with_order(today);
        let now = today.and_hms_opt(11, 30, 0).unwrap();
        let outcome = redeem(&mut fx.roster, &mut fx.ledger, " 4006-3813 3393 1 ", fx.staff, now).unwrap();
        assert!(matches!(outcome, ScanOutcome::Delivered(_)));
    }

    #[test]
    fn rescan_reports_already_delivered_with_time() {
        let today = date(2026, 8, 5);
        let mut fx = fixture_with_order(today);
        let first = today.and_hms_opt(11, 30, 0).unwrap();
        redeem(&mut fx.roster, &mut fx.ledger, TOKEN, fx.staff, first).unwrap();

        let outcome = redeem(
            &mut fx.roster,
            &mut fx.ledger,
            TOKEN,
            fx.staff,
            today.and_hms_opt(11, 45, 0).unwrap(),
        )
        .unwrap();
        assert_eq!(
            outcome,
            ScanOutcome::AlreadyDelivered {
                order: crate::ledger::OrderId(1),
                delivered_at: first
            }
        );
    }

    #[test]
    fn tomorrow_order_is_wrong_day_today() {
        let tomorrow = date(2026, 8, 6);
        let mut fx = fixture_with_order(tomorrow);
        let now = date(2026, 8, 5).and_hms_opt(11, 30, 0).unwrap();
        let outcome = redeem(&mut fx.roster, &mut fx.ledger, TOKEN, fx.staff, now).unwrap();
        assert_eq!(
            outcome,
            ScanOutcome::WrongDay {
                order: crate::ledger::OrderId(1),
                service_day: tomorrow
            }
        );
    }

    #[test]
    fn bad_checksum_and_unknown_tokens_are_distinct() {
        let today = date(2026, 8, 5);
        let mut fx = fixture_with_order(today);
        let now = today.and_hms_opt(11, 30, 0).unwrap();

        let outcome = redeem(&mut fx.roster, &mut fx.ledger, "4006381333930", fx.staff, now).unwrap();
        assert_eq!(outcome, ScanOutcome::InvalidFormat);

        // Validly checksummed but never issued.
        let outcome = redeem(&mut fx.roster, &mut fx.ledger, "1234567890128", fx.staff, now).unwrap();
        assert_eq!(outcome, ScanOutcome::NotFound);
    }

    #[test]
    fn canceled_orders_are_invisible() {
        let today = date(2026, 8, 5);
        let mut fx = fixture_with_order(today);
        fx.ledger.cancel(crate::ledger::OrderId(1)).unwrap();
        let now = today.and_hms_opt(11, 30, 0).unwrap();
        let outcome = redeem(&mut fx.roster, &mut fx.ledger, TOKEN, fx.staff, now).unwrap();
        assert_eq!(outcome, ScanOutcome::NotFound);
    }
}
