//! Cantina Policy Engine
//!
//! Platform-agnostic core logic for the Cantina school lunch platform:
//! service-day eligibility, the order ledger and its uniqueness rules,
//! pickup tokens, and the no-show/blocking policy. This crate provides
//! the domain rules without UI, storage or scheduler dependencies.

pub mod calendar;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod constants;
pub mod eligibility;
pub mod fulfillment;
pub mod ledger;
pub mod roster;
pub mod scan;
pub mod token;
pub mod weekdays;

// Re-export commonly used types
pub use calendar::{CutoffCache, ServiceCalendar, ServiceClosure, default_cutoff};
pub use catalog::{Catalog, Category, ItemId, MenuItem};
pub use checkout::{CancelError, CheckoutError, Placement, cancel_order, place_order};
pub use config::{ConfigError, PolicyConfig};
pub use eligibility::{
    MaskResolution, MaskStrategy, ServiceDayOutcome, is_lunch_day, next_service_day,
    resolve_days_mask,
};
pub use fulfillment::{
    DeliveryToggle, FulfillmentError, MarkResult, PermissionError, SweepEntry, SweepOptions,
    SweepReport, block, mark_no_show, mark_picked_up, recompute_streak, sweep, unblock,
};
pub use ledger::{
    DeliveryStatus, LedgerError, NewOrder, Order, OrderId, OrderLedger, OrderLine, OrderLines,
    OrderStatus,
};
pub use roster::{
    Account, AccountId, BlockAction, BlockEvent, BlockSource, ClassId, Role, Roster, RosterError,
    StudentClass, validate_cpf,
};
pub use scan::{ScanOutcome, redeem};
pub use token::TokenError;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Everything the engine persists: the registry, the ledger, the
/// closure calendar and the stored cutoff setting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CantinaState {
    #[serde(default)]
    pub roster: Roster,
    #[serde(default)]
    pub ledger: OrderLedger,
    #[serde(default)]
    pub calendar: ServiceCalendar,
    #[serde(default)]
    pub cutoff_time: Option<NaiveTime>,
}

impl CantinaState {
    /// Rebuild derived indexes after deserialization.
    #[must_use]
    pub fn rehydrate(mut self) -> Self {
        self.ledger.rehydrate();
        self
    }
}

/// Trait for abstracting data loading operations.
/// Platform-specific implementations should provide this.
pub trait DataSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the menu catalog from the platform-specific source.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be loaded.
    fn load_catalog(&self) -> Result<Catalog, Self::Error>;

    /// Load the policy configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or parsed.
    fn load_policy(&self) -> Result<PolicyConfig, Self::Error>;
}

/// Trait for abstracting state persistence.
///
/// The in-memory state relies on exclusive access for its transactional
/// guarantees. A SQL-backed implementation must map the ledger's
/// invariants onto real constraints: a unique composite index on
/// (student, service day) filtered to non-canceled rows, a unique token
/// column, and `FOR UPDATE SKIP LOCKED` selection in the sweep.
pub trait SnapshotStorage {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist a state snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be saved.
    fn save_state(&self, name: &str, state: &CantinaState) -> Result<(), Self::Error>;

    /// Load a state snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be loaded.
    fn load_state(&self, name: &str) -> Result<Option<CantinaState>, Self::Error>;

    /// Delete a state snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be deleted.
    fn delete_state(&self, name: &str) -> Result<(), Self::Error>;
}

/// Engine facade wiring catalog, policy and the cutoff cache over a
/// [`CantinaState`].
pub struct CantinaEngine<L, S>
where
    L: DataSource,
    S: SnapshotStorage,
{
    data_source: L,
    storage: S,
    config: PolicyConfig,
    catalog: Catalog,
    cutoff_cache: CutoffCache,
}

impl<L, S> CantinaEngine<L, S>
where
    L: DataSource,
    S: SnapshotStorage,
{
    /// Create an engine, loading catalog and policy from the data
    /// source.
    ///
    /// # Errors
    ///
    /// Returns an error if loading fails or the policy is invalid.
    pub fn new(data_source: L, storage: S) -> Result<Self, anyhow::Error>
    where
        L::Error: Into<anyhow::Error>,
    {
        let catalog = data_source.load_catalog().map_err(Into::into)?;
        let config = data_source.load_policy().map_err(Into::into)?;
        config.validate()?;
        let cutoff_cache = CutoffCache::new(config.cutoff_ttl_secs);
        Ok(Self {
            data_source,
            storage,
            config,
            catalog,
            cutoff_cache,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &PolicyConfig {
        &self.config
    }

    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Re-read catalog and policy from the data source.
    ///
    /// # Errors
    ///
    /// Returns an error if reloading fails or the policy is invalid.
    pub fn reload_data(&mut self) -> Result<(), anyhow::Error>
    where
        L::Error: Into<anyhow::Error>,
    {
        let catalog = self.data_source.load_catalog().map_err(Into::into)?;
        let config = self.data_source.load_policy().map_err(Into::into)?;
        config.validate()?;
        self.cutoff_cache = CutoffCache::new(config.cutoff_ttl_secs);
        self.catalog = catalog;
        self.config = config;
        Ok(())
    }

    /// Effective cutoff time, via the TTL cache.
    pub fn cutoff(&mut self, state: &CantinaState, now: NaiveDateTime) -> NaiveTime {
        self.cutoff_cache
            .get(state.cutoff_time, self.config.default_cutoff, now)
    }

    /// Store a new cutoff (or clear it back to the default) and
    /// invalidate the read cache.
    pub fn set_cutoff(&mut self, state: &mut CantinaState, value: Option<NaiveTime>) {
        state.cutoff_time = value;
        self.cutoff_cache.invalidate();
    }

    /// Next date the student may order for.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown account.
    pub fn next_service_day(
        &mut self,
        state: &CantinaState,
        student: AccountId,
        now: NaiveDateTime,
    ) -> Result<ServiceDayOutcome, RosterError> {
        let cutoff = self.cutoff(state, now);
        eligibility::next_service_day(
            &state.roster,
            student,
            &state.calendar,
            cutoff,
            self.config.default_days_mask,
            now,
        )
    }

    /// Place an order using the thread-local CSPRNG for the token.
    ///
    /// # Errors
    ///
    /// See [`CheckoutError`].
    pub fn checkout(
        &mut self,
        state: &mut CantinaState,
        student: AccountId,
        lines: &[(ItemId, u32)],
        now: NaiveDateTime,
    ) -> Result<Placement, CheckoutError> {
        self.checkout_with_rng(state, student, lines, now, &mut rand::thread_rng())
    }

    /// Place an order with an injected RNG (deterministic tests).
    ///
    /// # Errors
    ///
    /// See [`CheckoutError`].
    pub fn checkout_with_rng<R: Rng + ?Sized>(
        &mut self,
        state: &mut CantinaState,
        student: AccountId,
        lines: &[(ItemId, u32)],
        now: NaiveDateTime,
        rng: &mut R,
    ) -> Result<Placement, CheckoutError> {
        let cutoff = self.cutoff(state, now);
        checkout::place_order(
            &state.roster,
            &mut state.ledger,
            &self.catalog,
            &state.calendar,
            &self.config,
            cutoff,
            rng,
            student,
            lines,
            now,
        )
    }

    /// Cancel the student's own pending order.
    ///
    /// # Errors
    ///
    /// See [`CancelError`].
    pub fn cancel_order(
        &self,
        state: &mut CantinaState,
        student: AccountId,
        order: OrderId,
    ) -> Result<(), CancelError> {
        checkout::cancel_order(&mut state.ledger, student, order)
    }

    /// Redeem raw scanner input.
    ///
    /// # Errors
    ///
    /// Propagates [`FulfillmentError`] when the lane itself is
    /// misconfigured (unknown or non-operator actor).
    pub fn redeem(
        &self,
        state: &mut CantinaState,
        raw: &str,
        actor: AccountId,
        now: NaiveDateTime,
    ) -> Result<ScanOutcome, FulfillmentError> {
        scan::redeem(&mut state.roster, &mut state.ledger, raw, actor, now)
    }

    /// Kitchen board toggle: set an order delivered or undelivered.
    ///
    /// # Errors
    ///
    /// Requires the delivery capability for both directions.
    pub fn set_delivery(
        &self,
        state: &mut CantinaState,
        order: OrderId,
        target: DeliveryToggle,
        actor: AccountId,
        now: NaiveDateTime,
    ) -> Result<MarkResult, FulfillmentError> {
        let operator = state
            .roster
            .account(actor)
            .ok_or(FulfillmentError::UnknownAccount(actor))?;
        if !operator.role.is_operator() {
            return Err(FulfillmentError::NotOperator(actor));
        }
        match target {
            DeliveryToggle::Delivered => {
                fulfillment::mark_picked_up(&mut state.roster, &mut state.ledger, order, actor, now)
            }
            DeliveryToggle::Undelivered => fulfillment::mark_no_show(
                &mut state.roster,
                &mut state.ledger,
                order,
                self.config.auto_block_threshold,
                now,
            ),
        }
    }

    /// Manually block a student.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown student.
    pub fn block(
        &self,
        state: &mut CantinaState,
        student: AccountId,
        actor: Option<AccountId>,
        reason: &str,
        now: NaiveDateTime,
    ) -> Result<(), FulfillmentError> {
        fulfillment::block(
            &mut state.roster,
            student,
            BlockSource::Manual,
            actor,
            reason,
            now,
        )
    }

    /// Unblock a student; staff only.
    ///
    /// # Errors
    ///
    /// See [`PermissionError`].
    pub fn unblock(
        &self,
        state: &mut CantinaState,
        student: AccountId,
        actor: AccountId,
        reason: &str,
        now: NaiveDateTime,
    ) -> Result<(), PermissionError> {
        fulfillment::unblock(&mut state.roster, student, actor, reason, now)
    }

    /// Daily no-show sweep.
    ///
    /// # Errors
    ///
    /// See [`FulfillmentError`].
    pub fn sweep(
        &mut self,
        state: &mut CantinaState,
        now: NaiveDateTime,
        options: SweepOptions,
    ) -> Result<SweepReport, FulfillmentError> {
        let cutoff = self.cutoff(state, now);
        fulfillment::sweep(
            &mut state.roster,
            &mut state.ledger,
            self.config.auto_block_threshold,
            cutoff,
            now,
            options,
        )
    }

    /// Recompute a student's no-show streak from order history.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown student.
    pub fn recompute_streak(
        &self,
        state: &mut CantinaState,
        student: AccountId,
        today: NaiveDate,
    ) -> Result<u32, FulfillmentError> {
        fulfillment::recompute_streak(&mut state.roster, &state.ledger, student, today)
    }

    /// Persist a state snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be saved.
    pub fn save_state(&self, name: &str, state: &CantinaState) -> Result<(), S::Error> {
        self.storage.save_state(name, state)
    }

    /// Load and rehydrate a state snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be loaded.
    pub fn load_state(&self, name: &str) -> Result<Option<CantinaState>, anyhow::Error>
    where
        S::Error: Into<anyhow::Error>,
    {
        Ok(self
            .storage
            .load_state(name)
            .map_err(Into::into)?
            .map(CantinaState::rehydrate))
    }
}
