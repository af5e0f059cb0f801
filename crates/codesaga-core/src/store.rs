use crate::curriculum::Curriculum;
use crate::progress::{
    effort_bonus_xp, planned_xp, CompletionEntry, LegacySave, ProgressRecord, SaveFile,
};
use chrono::{Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const PROGRESS_KEY: &str = "codesaga_progress_v2";
pub const LEGACY_PROGRESS_KEYS: &[&str] = &["codesaga_save_v1"];
pub const DEFAULT_XP_PER_HOUR: u64 = 100;
pub const DEFAULT_BONUS_XP_PER_HOUR: u64 = 10;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob backend error: {0}")]
    Backend(String),
    #[error("blob write rejected: {0}")]
    WriteRejected(String),
}

/// Decides from the current value of a key whether a guarded write may go ahead.
pub type WriteGuard<'a> = &'a dyn Fn(Option<&str>) -> bool;

/// Key-value persistence the progress store writes through.
pub trait BlobStore {
    fn get(&self, key: &str) -> Result<Option<String>, BlobError>;
    fn set(&self, key: &str, value: &str) -> Result<(), BlobError>;
    fn remove(&self, key: &str) -> Result<(), BlobError>;

    /// Writes `value` only if `guard` accepts the value stored at that
    /// moment. Reading, checking and writing happen as one step with respect
    /// to every other writer of the same backend. Returns whether the value
    /// was written.
    fn set_if(&self, key: &str, value: &str, guard: WriteGuard<'_>) -> Result<bool, BlobError>;
}

impl<T: BlobStore + ?Sized> BlobStore for &T {
    fn get(&self, key: &str) -> Result<Option<String>, BlobError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BlobError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), BlobError> {
        (**self).remove(key)
    }

    fn set_if(&self, key: &str, value: &str, guard: WriteGuard<'_>) -> Result<bool, BlobError> {
        (**self).set_if(key, value, guard)
    }
}

impl<T: BlobStore + ?Sized> BlobStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<String>, BlobError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BlobError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), BlobError> {
        (**self).remove(key)
    }

    fn set_if(&self, key: &str, value: &str, guard: WriteGuard<'_>) -> Result<bool, BlobError> {
        (**self).set_if(key, value, guard)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    entries: RefCell<HashMap<String, String>>,
    fail_writes: Cell<bool>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `set`/`remove` fail until switched back.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>, BlobError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BlobError> {
        if self.fail_writes.get() {
            return Err(BlobError::WriteRejected("quota exceeded".to_string()));
        }
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BlobError> {
        if self.fail_writes.get() {
            return Err(BlobError::WriteRejected("quota exceeded".to_string()));
        }
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn set_if(&self, key: &str, value: &str, guard: WriteGuard<'_>) -> Result<bool, BlobError> {
        if self.fail_writes.get() {
            return Err(BlobError::WriteRejected("quota exceeded".to_string()));
        }
        let mut entries = self.entries.borrow_mut();
        if !guard(entries.get(key).map(String::as_str)) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }
}

/// Source of the current calendar date.
pub trait Clock {
    fn today(&self) -> NaiveDate;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn today(&self) -> NaiveDate {
        (**self).today()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

#[derive(Debug, Clone)]
pub struct FixedClock {
    today: Cell<NaiveDate>,
}

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: Cell::new(today),
        }
    }

    pub fn set(&self, today: NaiveDate) {
        self.today.set(today);
    }

    pub fn advance_days(&self, days: i64) {
        self.today.set(self.today.get() + Duration::days(days));
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.today.get()
    }
}

/// What undoing a completion does to the streak history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UndoStreakPolicy {
    /// Activity days are permanent; undo never shortens a streak.
    Retain,
    /// The completion's day leaves the history when no other completion
    /// remains on it.
    Revert,
}

impl Default for UndoStreakPolicy {
    fn default() -> Self {
        Self::Retain
    }
}

impl UndoStreakPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UndoStreakPolicy::Retain => "retain",
            UndoStreakPolicy::Revert => "revert",
        }
    }
}

impl fmt::Display for UndoStreakPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UndoStreakPolicy {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "retain" | "keep" => Ok(UndoStreakPolicy::Retain),
            "revert" | "recompute" => Ok(UndoStreakPolicy::Revert),
            other => Err(format!("Unknown undo streak policy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub key: String,
    pub legacy_keys: Vec<String>,
    pub xp_per_hour: u64,
    pub bonus_xp_per_hour: u64,
    pub undo_streak_policy: UndoStreakPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            key: PROGRESS_KEY.to_string(),
            legacy_keys: LEGACY_PROGRESS_KEYS.iter().map(|k| k.to_string()).collect(),
            xp_per_hour: DEFAULT_XP_PER_HOUR,
            bonus_xp_per_hour: DEFAULT_BONUS_XP_PER_HOUR,
            undo_streak_policy: UndoStreakPolicy::Retain,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("unknown curriculum item '{0}'")]
    UnknownItem(String),
    #[error("item '{0}' is not completed")]
    NotCompleted(String),
    #[error("failed to persist progress: {0}")]
    Persistence(#[from] BlobError),
    #[error("progress was changed by another writer (stored revision {stored}, expected {expected})")]
    Conflict { stored: u64, expected: u64 },
    #[error("failed to serialize progress: {0}")]
    Serialization(String),
    #[error("invalid save file: {0}")]
    InvalidImport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Recorded {
        xp_awarded: u64,
        experience_points: u64,
        streak_count: u32,
    },
    AlreadyComplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    pub xp_revoked: u64,
    pub experience_points: u64,
    pub streak_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub dropped_unknown: Vec<String>,
}

/// Owns the progress record of one learner and writes every change through
/// to a [`BlobStore`] before reporting success.
pub struct ProgressStore<S, C> {
    curriculum: Curriculum,
    blobs: S,
    clock: C,
    options: StoreOptions,
    record: ProgressRecord,
}

impl<S: BlobStore, C: Clock> ProgressStore<S, C> {
    /// Loads the persisted record, falling back to legacy keys and finally to
    /// an empty record. Unreadable or corrupted state is logged, never
    /// returned as an error.
    pub fn initialize(curriculum: Curriculum, blobs: S, clock: C, options: StoreOptions) -> Self {
        let mut store = Self {
            curriculum,
            blobs,
            clock,
            options,
            record: ProgressRecord::default(),
        };
        store.record = store.load();
        store
    }

    pub fn curriculum(&self) -> &Curriculum {
        &self.curriculum
    }

    pub fn record(&self) -> &ProgressRecord {
        &self.record
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Discards in-memory state and re-reads the persisted record.
    pub fn reload(&mut self) {
        self.record = self.load();
    }

    pub fn mark_complete(
        &mut self,
        item_id: &str,
        actual_effort_minutes: Option<u32>,
    ) -> Result<Completion, ProgressError> {
        let item = self
            .curriculum
            .item(item_id)
            .ok_or_else(|| ProgressError::UnknownItem(item_id.to_string()))?;
        if self.record.is_completed(item_id) {
            debug!(item_id, "item already complete");
            return Ok(Completion::AlreadyComplete);
        }

        let today = self.clock.today();
        let xp_awarded = planned_xp(item.planned_effort_hours, self.options.xp_per_hour)
            + effort_bonus_xp(actual_effort_minutes, self.options.bonus_xp_per_hour);

        let mut next = self.record.clone();
        next.completions.push(CompletionEntry {
            item_id: item_id.to_string(),
            completed_on: today,
            actual_effort_minutes: actual_effort_minutes.filter(|minutes| *minutes > 0),
            xp_awarded,
        });
        next.activity_days.insert(today);
        self.commit(next)?;

        info!(item_id, xp_awarded, "item completed");
        Ok(Completion::Recorded {
            xp_awarded,
            experience_points: self.record.experience_points(),
            streak_count: self.record.streak_count(),
        })
    }

    pub fn mark_incomplete(&mut self, item_id: &str) -> Result<Revocation, ProgressError> {
        if !self.curriculum.contains(item_id) {
            return Err(ProgressError::UnknownItem(item_id.to_string()));
        }
        let position = self
            .record
            .completions
            .iter()
            .position(|entry| entry.item_id == item_id)
            .ok_or_else(|| ProgressError::NotCompleted(item_id.to_string()))?;

        let mut next = self.record.clone();
        let removed = next.completions.remove(position);
        if self.options.undo_streak_policy == UndoStreakPolicy::Revert
            && !next
                .completions
                .iter()
                .any(|entry| entry.completed_on == removed.completed_on)
        {
            next.activity_days.remove(&removed.completed_on);
        }
        self.commit(next)?;

        info!(item_id, xp_revoked = removed.xp_awarded, "completion revoked");
        Ok(Revocation {
            xp_revoked: removed.xp_awarded,
            experience_points: self.record.experience_points(),
            streak_count: self.record.streak_count(),
        })
    }

    /// Wipes all progress. Legacy keys are removed as well so they are not
    /// migrated back on the next start.
    pub fn reset(&mut self) -> Result<(), ProgressError> {
        let next = ProgressRecord {
            revision: self.record.revision,
            ..ProgressRecord::default()
        };
        self.commit(next)?;
        for key in &self.options.legacy_keys {
            if let Err(err) = self.blobs.remove(key) {
                warn!(key = key.as_str(), %err, "failed to remove legacy progress key");
            }
        }
        info!("progress reset");
        Ok(())
    }

    pub fn export(&self) -> Result<String, ProgressError> {
        serde_json::to_string_pretty(&SaveFile::from(&self.record))
            .map_err(|err| ProgressError::Serialization(err.to_string()))
    }

    /// Replaces the current record with a previously exported one. Ids the
    /// curriculum does not know are dropped.
    pub fn import(&mut self, content: &str) -> Result<ImportReport, ProgressError> {
        let save: SaveFile = serde_json::from_str(content)
            .map_err(|err| ProgressError::InvalidImport(err.to_string()))?;
        let (mut imported, drift) =
            save.into_record(&self.curriculum, self.options.xp_per_hour, self.clock.today());
        if !drift.is_clean() {
            warn!(?drift, "imported save disagrees with its own log");
        }

        let mut report = ImportReport::default();
        imported.completions.retain(|entry| {
            let known = self.curriculum.contains(&entry.item_id);
            if !known {
                report.dropped_unknown.push(entry.item_id.clone());
            }
            known
        });
        report.imported = imported.completions.len();
        imported.revision = self.record.revision;

        self.commit(imported)?;
        info!(imported = report.imported, "progress imported");
        Ok(report)
    }

    fn load(&self) -> ProgressRecord {
        let today = self.clock.today();
        match self.blobs.get(&self.options.key) {
            Ok(Some(raw)) => match serde_json::from_str::<SaveFile>(&raw) {
                Ok(save) => {
                    let (record, drift) =
                        save.into_record(&self.curriculum, self.options.xp_per_hour, today);
                    if !drift.is_clean() {
                        warn!(?drift, "stored counters drifted from completion log; using log");
                    }
                    self.warn_unknown_ids(&record);
                    return record;
                }
                Err(err) => {
                    warn!(key = self.options.key.as_str(), %err, "corrupted progress blob; starting fresh");
                    return ProgressRecord::default();
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(key = self.options.key.as_str(), %err, "failed to read progress; starting fresh");
                return ProgressRecord::default();
            }
        }

        for key in &self.options.legacy_keys {
            let raw = match self.blobs.get(key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    warn!(key = key.as_str(), %err, "failed to read legacy progress");
                    continue;
                }
            };
            match serde_json::from_str::<LegacySave>(&raw) {
                Ok(legacy) => {
                    let (record, drift) =
                        legacy.into_record(&self.curriculum, self.options.xp_per_hour, today);
                    if !drift.is_clean() {
                        warn!(?drift, "legacy counters disagree with migrated log");
                    }
                    info!(
                        key = key.as_str(),
                        completed = record.completed_count(),
                        streak = record.streak_count(),
                        "migrated legacy progress"
                    );
                    match self.write_guarded(&record, &|current| current.is_none()) {
                        Ok(true) => {}
                        Ok(false) => debug!("progress written concurrently; migration not stored"),
                        Err(err) => warn!(%err, "failed to persist migrated progress"),
                    }
                    return record;
                }
                Err(err) => {
                    warn!(key = key.as_str(), %err, "corrupted legacy progress blob; ignoring");
                }
            }
        }

        ProgressRecord::default()
    }

    fn warn_unknown_ids(&self, record: &ProgressRecord) {
        let unknown: Vec<&str> = record
            .completed_ids()
            .into_iter()
            .filter(|id| !self.curriculum.contains(id))
            .collect();
        if !unknown.is_empty() {
            warn!(?unknown, "completed ids not present in curriculum");
        }
    }

    /// Persists `next` and only then makes it the current record. The write
    /// is refused when another writer has advanced the stored revision past
    /// the one this store last saw.
    fn commit(&mut self, mut next: ProgressRecord) -> Result<(), ProgressError> {
        let expected = self.record.revision;
        next.revision = expected + 1;

        let stored = Cell::new(0);
        let guard = |current: Option<&str>| {
            stored.set(current.map(revision_of).unwrap_or(0));
            stored.get() <= expected
        };
        if !self.write_guarded(&next, &guard)? {
            warn!(stored = stored.get(), expected, "stale progress write refused");
            return Err(ProgressError::Conflict {
                stored: stored.get(),
                expected,
            });
        }
        self.record = next;
        Ok(())
    }

    fn write_guarded(
        &self,
        record: &ProgressRecord,
        guard: WriteGuard<'_>,
    ) -> Result<bool, ProgressError> {
        let payload = serde_json::to_string(&SaveFile::from(record))
            .map_err(|err| ProgressError::Serialization(err.to_string()))?;
        let written = self.blobs.set_if(&self.options.key, &payload, guard)?;
        if written {
            debug!(revision = record.revision, "progress persisted");
        }
        Ok(written)
    }
}

/// Revision stored in a raw blob; unreadable blobs count as revision 0.
fn revision_of(raw: &str) -> u64 {
    serde_json::from_str::<SaveFile>(raw)
        .map(|save| save.revision)
        .unwrap_or(0)
}
