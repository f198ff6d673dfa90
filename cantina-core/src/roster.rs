//! Accounts, student classes and the blocking audit trail.
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use crate::weekdays::MON_FRI_MASK;

/// Identifier of an account (student or staff).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account#{}", self.0)
    }
}

/// Identifier of a student class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub u64);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// Effective role of an account, Admin > Staff > Student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Staff,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Staff => "staff",
            Self::Admin => "admin",
        }
    }

    /// Whether this role may run the counter: mark deliveries, scan
    /// tokens, block and unblock students.
    #[must_use]
    pub const fn is_operator(self) -> bool {
        matches!(self, Self::Staff | Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockSource {
    Manual,
    Auto,
}

impl BlockSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }
}

/// What a [`BlockEvent`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockAction {
    Block,
    Unblock,
}

/// Append-only audit record of a block or unblock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEvent {
    pub student: AccountId,
    pub action: BlockAction,
    pub source: BlockSource,
    /// Absent for automated actions.
    pub actor: Option<AccountId>,
    pub reason: String,
    pub at: NaiveDateTime,
}

/// One account: a student who orders lunch, or staff who fulfill orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    /// Normalized 11-digit identifier.
    pub cpf: String,
    pub role: Role,
    /// Per-student weekday override; the mask only applies while the
    /// enable flag is on.
    #[serde(default)]
    pub override_enabled: bool,
    #[serde(default)]
    pub override_mask: u8,
    #[serde(default)]
    blocked: bool,
    #[serde(default)]
    block_source: Option<BlockSource>,
    #[serde(default)]
    blocked_reason: Option<String>,
    #[serde(default)]
    blocked_at: Option<NaiveDateTime>,
    #[serde(default)]
    blocked_by: Option<AccountId>,
    #[serde(default)]
    pub no_show_streak: u32,
    #[serde(default)]
    pub last_no_show_on: Option<NaiveDate>,
    #[serde(default)]
    pub last_pickup_on: Option<NaiveDate>,
}

impl Account {
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        self.blocked
    }

    #[must_use]
    pub const fn block_source(&self) -> Option<BlockSource> {
        self.block_source
    }

    #[must_use]
    pub fn blocked_reason(&self) -> Option<&str> {
        self.blocked_reason.as_deref()
    }

    #[must_use]
    pub const fn blocked_at(&self) -> Option<NaiveDateTime> {
        self.blocked_at
    }

    #[must_use]
    pub const fn blocked_by(&self) -> Option<AccountId> {
        self.blocked_by
    }
}

/// A class/cohort of students sharing a weekday mask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentClass {
    pub id: ClassId,
    pub name: String,
    #[serde(default)]
    pub year: Option<u16>,
    /// Weekdays the class receives lunch, applied to every member
    /// without an individual override.
    #[serde(default = "StudentClass::default_days_mask")]
    pub days_mask: u8,
    #[serde(default)]
    pub members: BTreeSet<AccountId>,
    /// Temporary extra service dates outside the weekday mask.
    #[serde(default)]
    pub extra_days: BTreeSet<NaiveDate>,
    #[serde(default = "StudentClass::default_active")]
    pub active: bool,
    /// One-to-one link to the next-year class.
    #[serde(default)]
    pub next_year: Option<ClassId>,
}

impl StudentClass {
    const fn default_days_mask() -> u8 {
        MON_FRI_MASK
    }

    const fn default_active() -> bool {
        true
    }
}

/// Errors raised by roster integrity rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RosterError {
    #[error("unknown account {0}")]
    UnknownAccount(AccountId),
    #[error("unknown class {0}")]
    UnknownClass(ClassId),
    #[error("CPF must have 11 digits")]
    CpfLength,
    #[error("invalid CPF")]
    CpfInvalid,
    #[error("CPF already registered")]
    CpfTaken,
    #[error("class name {0:?} already exists")]
    ClassNameTaken(String),
    #[error("only students can be enrolled in a class")]
    NotAStudent(AccountId),
    #[error("a class cannot be its own successor")]
    SelfSuccessor,
    #[error("class {0} is already linked to a different successor")]
    SuccessorTaken(ClassId),
    #[error("linking {0} would create a successor cycle")]
    SuccessorCycle(ClassId),
}

/// Check digits for a 9-digit CPF base (mod-11 scheme).
#[must_use]
pub fn cpf_check_digits(base: &[u8; 9]) -> (u8, u8) {
    let s: u32 = base
        .iter()
        .enumerate()
        .map(|(i, d)| u32::from(*d) * (10 - i as u32))
        .sum();
    let d1 = match (s * 10) % 11 {
        10 => 0,
        d => d as u8,
    };
    let s: u32 = base
        .iter()
        .enumerate()
        .map(|(i, d)| u32::from(*d) * (11 - i as u32))
        .sum::<u32>()
        + u32::from(d1) * 2;
    let d2 = match (s * 10) % 11 {
        10 => 0,
        d => d as u8,
    };
    (d1, d2)
}

/// Strict CPF validation: strips non-digits, requires 11 digits, rejects
/// the all-same-digit degenerates, verifies both check digits. Returns
/// the normalized digit string.
pub fn validate_cpf(raw: &str) -> Result<String, RosterError> {
    let digits: Vec<u8> = raw
        .bytes()
        .filter(u8::is_ascii_digit)
        .map(|b| b - b'0')
        .collect();
    if digits.len() != 11 {
        return Err(RosterError::CpfLength);
    }
    if digits.iter().all(|d| *d == digits[0]) {
        return Err(RosterError::CpfInvalid);
    }
    let mut base = [0u8; 9];
    base.copy_from_slice(&digits[..9]);
    let (d1, d2) = cpf_check_digits(&base);
    if digits[9] != d1 || digits[10] != d2 {
        return Err(RosterError::CpfInvalid);
    }
    Ok(digits.iter().map(|d| (d + b'0') as char).collect())
}

/// The account/class registry plus the append-only block audit log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Roster {
    accounts: BTreeMap<AccountId, Account>,
    classes: BTreeMap<ClassId, StudentClass>,
    next_account_id: u64,
    next_class_id: u64,
    block_log: Vec<BlockEvent>,
}

impl Roster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // --- accounts ---------------------------------------------------------

    /// Register an account under a validated, unique CPF.
    pub fn register_account(
        &mut self,
        name: &str,
        cpf: &str,
        role: Role,
    ) -> Result<AccountId, RosterError> {
        let cpf = validate_cpf(cpf)?;
        if self.accounts.values().any(|a| a.cpf == cpf) {
            return Err(RosterError::CpfTaken);
        }
        self.next_account_id += 1;
        let id = AccountId(self.next_account_id);
        self.accounts.insert(
            id,
            Account {
                id,
                name: name.to_string(),
                cpf,
                role,
                override_enabled: false,
                override_mask: 0,
                blocked: false,
                block_source: None,
                blocked_reason: None,
                blocked_at: None,
                blocked_by: None,
                no_show_streak: 0,
                last_no_show_on: None,
                last_pickup_on: None,
            },
        );
        Ok(id)
    }

    #[must_use]
    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    pub fn require_account(&self, id: AccountId) -> Result<&Account, RosterError> {
        self.accounts.get(&id).ok_or(RosterError::UnknownAccount(id))
    }

    pub(crate) fn account_mut(&mut self, id: AccountId) -> Result<&mut Account, RosterError> {
        self.accounts
            .get_mut(&id)
            .ok_or(RosterError::UnknownAccount(id))
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    /// Toggle the per-student weekday override.
    pub fn set_override(
        &mut self,
        id: AccountId,
        enabled: bool,
        mask: u8,
    ) -> Result<(), RosterError> {
        let account = self.account_mut(id)?;
        account.override_enabled = enabled;
        account.override_mask = mask & 0x7F;
        Ok(())
    }

    // --- classes ----------------------------------------------------------

    pub fn add_class(
        &mut self,
        name: &str,
        year: Option<u16>,
        days_mask: u8,
    ) -> Result<ClassId, RosterError> {
        if self.classes.values().any(|c| c.name == name) {
            return Err(RosterError::ClassNameTaken(name.to_string()));
        }
        self.next_class_id += 1;
        let id = ClassId(self.next_class_id);
        self.classes.insert(
            id,
            StudentClass {
                id,
                name: name.to_string(),
                year,
                days_mask: days_mask & 0x7F,
                members: BTreeSet::new(),
                extra_days: BTreeSet::new(),
                active: true,
                next_year: None,
            },
        );
        Ok(id)
    }

    #[must_use]
    pub fn class(&self, id: ClassId) -> Option<&StudentClass> {
        self.classes.get(&id)
    }

    pub fn class_mut(&mut self, id: ClassId) -> Result<&mut StudentClass, RosterError> {
        self.classes.get_mut(&id).ok_or(RosterError::UnknownClass(id))
    }

    pub fn classes(&self) -> impl Iterator<Item = &StudentClass> {
        self.classes.values()
    }

    /// Enroll a student. Staff accounts cannot be class members.
    pub fn enroll(&mut self, class: ClassId, student: AccountId) -> Result<(), RosterError> {
        let role = self.require_account(student)?.role;
        if role != Role::Student {
            return Err(RosterError::NotAStudent(student));
        }
        self.class_mut(class)?.members.insert(student);
        Ok(())
    }

    /// Grant a temporary extra service date to a class.
    pub fn grant_extra_day(&mut self, class: ClassId, date: NaiveDate) -> Result<(), RosterError> {
        self.class_mut(class)?.extra_days.insert(date);
        Ok(())
    }

    /// Active classes a student belongs to.
    pub fn active_classes_of(&self, student: AccountId) -> impl Iterator<Item = &StudentClass> {
        self.classes
            .values()
            .filter(move |c| c.active && c.members.contains(&student))
    }

    /// Wire the one-to-one next-year link between two classes.
    ///
    /// Rejects self-links, re-linking a class that already has a
    /// different successor, claiming a successor already pointed to by
    /// another class, and anything that would close a successor cycle.
    pub fn link_successor(&mut self, prev: ClassId, next: ClassId) -> Result<(), RosterError> {
        if prev == next {
            return Err(RosterError::SelfSuccessor);
        }
        self.class(next).ok_or(RosterError::UnknownClass(next))?;
        let existing = self.class(prev).ok_or(RosterError::UnknownClass(prev))?.next_year;
        if existing.is_some_and(|id| id != next) {
            return Err(RosterError::SuccessorTaken(prev));
        }
        if self
            .classes
            .values()
            .any(|c| c.id != prev && c.next_year == Some(next))
        {
            return Err(RosterError::SuccessorTaken(next));
        }
        // Walk forward from `next`; reaching `prev` again means a cycle.
        let mut cursor = Some(next);
        let mut hops = self.classes.len();
        while let Some(id) = cursor {
            if id == prev {
                return Err(RosterError::SuccessorCycle(next));
            }
            if hops == 0 {
                break;
            }
            hops -= 1;
            cursor = self.classes.get(&id).and_then(|c| c.next_year);
        }
        self.class_mut(prev)?.next_year = Some(next);
        Ok(())
    }

    /// Create the next-year class, copying the weekday mask and
    /// optionally the member set, and wire the successor link.
    pub fn spawn_successor(
        &mut self,
        class: ClassId,
        name: Option<&str>,
        year: Option<u16>,
        carry_members: bool,
    ) -> Result<ClassId, RosterError> {
        let source = self.class(class).ok_or(RosterError::UnknownClass(class))?;
        let new_name = name.map_or_else(|| format!("{} — próximo", source.name), str::to_string);
        let new_year = year.or_else(|| source.year.map(|y| y + 1));
        let days_mask = source.days_mask;
        let members = if carry_members {
            source.members.clone()
        } else {
            BTreeSet::new()
        };
        let next = self.add_class(&new_name, new_year, days_mask)?;
        self.class_mut(next)?.members = members;
        self.link_successor(class, next)?;
        Ok(next)
    }

    // --- blocking ---------------------------------------------------------

    /// Flip the blocked flag on and append the audit event. This is the
    /// only path allowed to set `blocked = true`; permission and
    /// already-blocked rules live in the fulfillment layer.
    pub(crate) fn record_block(
        &mut self,
        student: AccountId,
        source: BlockSource,
        actor: Option<AccountId>,
        reason: &str,
        at: NaiveDateTime,
    ) -> Result<(), RosterError> {
        let account = self.account_mut(student)?;
        account.blocked = true;
        account.block_source = Some(source);
        account.blocked_reason = Some(reason.to_string());
        account.blocked_at = Some(at);
        account.blocked_by = actor;
        self.block_log.push(BlockEvent {
            student,
            action: BlockAction::Block,
            source,
            actor,
            reason: reason.to_string(),
            at,
        });
        Ok(())
    }

    /// Clear the blocked flag and metadata, reset the no-show streak and
    /// append the audit event. Unblocking is a fresh start.
    pub(crate) fn record_unblock(
        &mut self,
        student: AccountId,
        actor: AccountId,
        reason: &str,
        at: NaiveDateTime,
    ) -> Result<(), RosterError> {
        let account = self.account_mut(student)?;
        account.blocked = false;
        account.block_source = None;
        account.blocked_reason = None;
        account.blocked_at = None;
        account.blocked_by = None;
        account.no_show_streak = 0;
        self.block_log.push(BlockEvent {
            student,
            action: BlockAction::Unblock,
            source: BlockSource::Manual,
            actor: Some(actor),
            reason: reason.to_string(),
            at,
        });
        Ok(())
    }

    #[must_use]
    pub fn block_log(&self) -> &[BlockEvent] {
        &self.block_log
    }

    pub fn block_events_for(&self, student: AccountId) -> impl Iterator<Item = &BlockEvent> {
        self.block_log.iter().filter(move |e| e.student == student)
    }
}
