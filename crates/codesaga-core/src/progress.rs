use crate::curriculum::Curriculum;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const SAVE_SCHEMA_VERSION: u32 = 2;

/// Longest mirrored streak that is expanded back into activity days. Larger
/// counters are treated as corrupt and left to drift reporting.
const MAX_STREAK_BACKFILL_DAYS: u32 = 3_660;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEntry {
    pub item_id: String,
    pub completed_on: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_effort_minutes: Option<u32>,
    #[serde(default)]
    pub xp_awarded: u64,
}

/// Completion state of one learner.
///
/// Experience points and the streak are derived from the completion log and
/// the activity-day history on every read; nothing is cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressRecord {
    pub completions: Vec<CompletionEntry>,
    /// Calendar days on which at least one completion happened.
    pub activity_days: BTreeSet<NaiveDate>,
    /// Bumped on every persisted write.
    pub revision: u64,
}

impl ProgressRecord {
    pub fn completed_ids(&self) -> Vec<&str> {
        self.completions
            .iter()
            .map(|entry| entry.item_id.as_str())
            .collect()
    }

    pub fn completed_count(&self) -> usize {
        self.completions.len()
    }

    pub fn is_completed(&self, item_id: &str) -> bool {
        self.completion(item_id).is_some()
    }

    pub fn completion(&self, item_id: &str) -> Option<&CompletionEntry> {
        self.completions
            .iter()
            .find(|entry| entry.item_id == item_id)
    }

    pub fn experience_points(&self) -> u64 {
        self.completions.iter().map(|entry| entry.xp_awarded).sum()
    }

    pub fn last_activity_date(&self) -> Option<NaiveDate> {
        self.activity_days.iter().next_back().copied()
    }

    pub fn first_activity_date(&self) -> Option<NaiveDate> {
        self.activity_days.iter().next().copied()
    }

    /// Length of the run of consecutive activity days ending at the latest one.
    pub fn streak_count(&self) -> u32 {
        let mut days = self.activity_days.iter().rev();
        let Some(mut current) = days.next().copied() else {
            return 0;
        };
        let mut streak = 1;
        for &day in days {
            if current.pred_opt() != Some(day) {
                break;
            }
            streak += 1;
            current = day;
        }
        streak
    }

    pub fn has_activity_on(&self, day: NaiveDate) -> bool {
        self.activity_days.contains(&day)
    }

    /// Planned hours of every completed item still present in the curriculum.
    pub fn completed_hours(&self, curriculum: &Curriculum) -> f64 {
        self.completions
            .iter()
            .filter_map(|entry| curriculum.item(&entry.item_id))
            .map(|item| item.planned_effort_hours)
            .sum()
    }
}

/// On-disk layout of a [`ProgressRecord`].
///
/// `completedIds`, `experiencePoints`, `streakCount` and `lastActivityDate`
/// mirror derived values for readers of older versions; they are reconciled
/// on load and never trusted over the log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SaveFile {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub completed_ids: Vec<String>,
    #[serde(default)]
    pub experience_points: u64,
    #[serde(default)]
    pub streak_count: u32,
    #[serde(default)]
    pub last_activity_date: Option<NaiveDate>,
    #[serde(default)]
    pub first_activity_date: Option<NaiveDate>,
    #[serde(default)]
    pub completions: Vec<CompletionEntry>,
    #[serde(default)]
    pub activity_days: Vec<NaiveDate>,
    #[serde(default)]
    pub revision: u64,
}

/// Save layout written by the first release, stored under `codesaga_save_v1`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySave {
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub xp: u64,
    #[serde(default)]
    pub streak: u32,
    #[serde(default)]
    pub last_login: Option<String>,
}

/// Differences between the cached mirrors of a save and the values derived
/// from its log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Drift {
    pub experience_points: Option<(u64, u64)>,
    pub streak_count: Option<(u32, u32)>,
    pub orphan_completed_ids: Vec<String>,
}

impl Drift {
    pub fn is_clean(&self) -> bool {
        self.experience_points.is_none()
            && self.streak_count.is_none()
            && self.orphan_completed_ids.is_empty()
    }
}

impl From<&ProgressRecord> for SaveFile {
    fn from(record: &ProgressRecord) -> Self {
        Self {
            schema_version: SAVE_SCHEMA_VERSION,
            completed_ids: record
                .completions
                .iter()
                .map(|entry| entry.item_id.clone())
                .collect(),
            experience_points: record.experience_points(),
            streak_count: record.streak_count(),
            last_activity_date: record.last_activity_date(),
            first_activity_date: record.first_activity_date(),
            completions: record.completions.clone(),
            activity_days: record.activity_days.iter().copied().collect(),
            revision: record.revision,
        }
    }
}

impl SaveFile {
    /// Rebuilds the record from the completion log.
    ///
    /// Ids listed in `completedIds` without a log entry (written by a tool that
    /// only knows the mirror fields) are adopted with a completion dated at
    /// `lastActivityDate`, or `fallback_day` when that is absent, worth their
    /// planned XP, and reported in the returned [`Drift`].
    pub fn into_record(
        self,
        curriculum: &Curriculum,
        xp_per_hour: u64,
        fallback_day: NaiveDate,
    ) -> (ProgressRecord, Drift) {
        let mut drift = Drift::default();
        let mut completions: Vec<CompletionEntry> = Vec::with_capacity(self.completions.len());
        for entry in self.completions {
            if !completions.iter().any(|e| e.item_id == entry.item_id) {
                completions.push(entry);
            }
        }

        let orphan_day = self.last_activity_date.unwrap_or(fallback_day);
        for id in &self.completed_ids {
            if !completions.iter().any(|e| &e.item_id == id) {
                drift.orphan_completed_ids.push(id.clone());
                let xp_awarded = curriculum
                    .item(id)
                    .map(|item| planned_xp(item.planned_effort_hours, xp_per_hour))
                    .unwrap_or(0);
                completions.push(CompletionEntry {
                    item_id: id.clone(),
                    completed_on: orphan_day,
                    actual_effort_minutes: None,
                    xp_awarded,
                });
            }
        }

        let mut activity_days: BTreeSet<NaiveDate> = self.activity_days.into_iter().collect();
        activity_days.extend(completions.iter().map(|entry| entry.completed_on));
        if let Some(day) = self.last_activity_date {
            activity_days.insert(day);
        }
        if let Some(day) = self.first_activity_date {
            activity_days.insert(day);
        }
        // Saves that only carry the mirror fields have no day history; the
        // stored streak is the only record of the run ending at lastActivityDate.
        if let Some(last) = self.last_activity_date {
            if activity_days.iter().next_back() == Some(&last) {
                backfill_streak(&mut activity_days, last, self.streak_count);
            }
        }

        let record = ProgressRecord {
            completions,
            activity_days,
            revision: self.revision,
        };

        let derived_xp = record.experience_points();
        if derived_xp != self.experience_points {
            drift.experience_points = Some((self.experience_points, derived_xp));
        }
        let derived_streak = record.streak_count();
        if derived_streak != self.streak_count {
            drift.streak_count = Some((self.streak_count, derived_streak));
        }

        (record, drift)
    }
}

impl LegacySave {
    /// Converts a first-release save. XP is recomputed from the curriculum
    /// because the legacy counter carries no per-item breakdown; ids the
    /// curriculum no longer knows are dropped. The streak is kept by
    /// expanding it into the days ending at `lastLogin`.
    pub fn into_record(
        self,
        curriculum: &Curriculum,
        xp_per_hour: u64,
        fallback_day: NaiveDate,
    ) -> (ProgressRecord, Drift) {
        let last_login = self
            .last_login
            .as_deref()
            .and_then(|raw| parse_login_day(raw.trim()));
        let day = last_login.unwrap_or(fallback_day);

        let mut record = ProgressRecord::default();
        for id in self.completed {
            let Some(item) = curriculum.item(&id) else {
                continue;
            };
            if record.is_completed(&id) {
                continue;
            }
            record.completions.push(CompletionEntry {
                item_id: id,
                completed_on: day,
                actual_effort_minutes: None,
                xp_awarded: planned_xp(item.planned_effort_hours, xp_per_hour),
            });
        }
        if !record.completions.is_empty() {
            record.activity_days.insert(day);
        }
        if let Some(last) = last_login {
            backfill_streak(&mut record.activity_days, last, self.streak);
        }

        let mut drift = Drift::default();
        let derived_xp = record.experience_points();
        if derived_xp != self.xp {
            drift.experience_points = Some((self.xp, derived_xp));
        }
        let derived_streak = record.streak_count();
        if derived_streak != self.streak {
            drift.streak_count = Some((self.streak, derived_streak));
        }
        (record, drift)
    }
}

/// `lastLogin` is an ISO date; a full timestamp is cut to its date part.
fn parse_login_day(raw: &str) -> Option<NaiveDate> {
    let date = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Adds the `streak` consecutive days ending at `last`.
fn backfill_streak(days: &mut BTreeSet<NaiveDate>, last: NaiveDate, streak: u32) {
    if streak == 0 || streak > MAX_STREAK_BACKFILL_DAYS {
        return;
    }
    let mut current = last;
    days.insert(current);
    for _ in 1..streak {
        match current.pred_opt() {
            Some(previous) => {
                days.insert(previous);
                current = previous;
            }
            None => break,
        }
    }
}

/// XP granted for the planned effort of an item.
pub fn planned_xp(hours: f64, xp_per_hour: u64) -> u64 {
    (hours * xp_per_hour as f64).round().max(0.0) as u64
}

/// XP granted on top of the planned award when the learner logs actual time.
pub fn effort_bonus_xp(actual_effort_minutes: Option<u32>, bonus_xp_per_hour: u64) -> u64 {
    match actual_effort_minutes {
        Some(minutes) if minutes > 0 => u64::from(minutes) * bonus_xp_per_hour / 60,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::CurriculumItem;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn entry(id: &str, on: NaiveDate, xp: u64) -> CompletionEntry {
        CompletionEntry {
            item_id: id.to_string(),
            completed_on: on,
            actual_effort_minutes: None,
            xp_awarded: xp,
        }
    }

    #[test]
    fn streak_counts_consecutive_days_ending_at_latest() {
        let mut record = ProgressRecord::default();
        assert_eq!(record.streak_count(), 0);

        record.activity_days.extend([
            day(2026, 3, 1),
            day(2026, 3, 3),
            day(2026, 3, 4),
            day(2026, 3, 5),
        ]);
        assert_eq!(record.streak_count(), 3);
        assert_eq!(record.first_activity_date(), Some(day(2026, 3, 1)));
        assert_eq!(record.last_activity_date(), Some(day(2026, 3, 5)));

        record.activity_days.insert(day(2026, 3, 7));
        assert_eq!(record.streak_count(), 1);
    }

    #[test]
    fn streak_crosses_month_boundary() {
        let mut record = ProgressRecord::default();
        record
            .activity_days
            .extend([day(2026, 2, 27), day(2026, 2, 28), day(2026, 3, 1)]);
        assert_eq!(record.streak_count(), 3);
    }

    #[test]
    fn save_round_trip_preserves_log() {
        let mut record = ProgressRecord::default();
        record.completions.push(entry("a", day(2026, 1, 2), 300));
        record.activity_days.insert(day(2026, 1, 2));
        record.revision = 7;

        let save = SaveFile::from(&record);
        assert_eq!(save.completed_ids, vec!["a"]);
        assert_eq!(save.experience_points, 300);
        assert_eq!(save.streak_count, 1);

        let json = serde_json::to_string(&save).expect("serialize");
        assert!(json.contains("\"lastActivityDate\":\"2026-01-02\""));
        let parsed: SaveFile = serde_json::from_str(&json).expect("parse");
        let (restored, drift) = parsed.into_record(&Curriculum::default(), 100, day(2026, 5, 5));
        assert!(drift.is_clean());
        assert_eq!(restored, record);
    }

    #[test]
    fn missing_fields_default_on_load() {
        let curriculum =
            Curriculum::new(vec![CurriculumItem::new("x", 1, "x", 2.0)]).expect("curriculum");
        let save: SaveFile =
            serde_json::from_str(r#"{"completedIds": ["x"], "experiencePoints": 200, "futureField": true}"#)
                .expect("parse");
        let (record, drift) = save.into_record(&curriculum, 100, day(2026, 4, 1));
        assert!(record.is_completed("x"));
        assert_eq!(record.completion("x").expect("x").completed_on, day(2026, 4, 1));
        assert_eq!(record.experience_points(), 200);
        assert_eq!(drift.orphan_completed_ids, vec!["x"]);
        assert_eq!(drift.experience_points, None);
        assert_eq!(drift.streak_count, Some((0, 1)));
    }

    #[test]
    fn tampered_mirror_is_reported_as_drift() {
        let mut record = ProgressRecord::default();
        record.completions.push(entry("a", day(2026, 1, 2), 200));
        record.activity_days.insert(day(2026, 1, 2));
        let mut save = SaveFile::from(&record);
        save.experience_points = 999;

        let (restored, drift) = save.into_record(&Curriculum::default(), 100, day(2026, 1, 3));
        assert_eq!(drift.experience_points, Some((999, 200)));
        assert_eq!(restored.experience_points(), 200);
    }

    #[test]
    fn legacy_save_is_migrated_against_curriculum() {
        let curriculum = Curriculum::new(vec![
            CurriculumItem::new("2026-01-01", 1, "a", 2.0),
            CurriculumItem::new("2026-01-02", 1, "b", 1.5),
        ])
        .expect("curriculum");
        let legacy: LegacySave = serde_json::from_str(
            r#"{"completed": ["2026-01-01", "2026-01-02", "gone"], "xp": 350, "streak": 2, "lastLogin": "2026-01-02"}"#,
        )
        .expect("legacy");

        let (record, drift) = legacy.into_record(&curriculum, 100, day(2026, 6, 1));
        assert_eq!(record.completed_ids(), vec!["2026-01-01", "2026-01-02"]);
        assert_eq!(record.experience_points(), 350);
        assert_eq!(record.last_activity_date(), Some(day(2026, 1, 2)));
        assert_eq!(record.streak_count(), 2);
        assert!(drift.is_clean());
    }

    #[test]
    fn legacy_streak_without_completions_is_kept() {
        let legacy: LegacySave =
            serde_json::from_str(r#"{"streak": 5, "lastLogin": "2026-03-09"}"#).expect("legacy");
        let (record, drift) = legacy.into_record(&Curriculum::default(), 100, day(2026, 3, 10));
        assert!(record.completions.is_empty());
        assert_eq!(record.streak_count(), 5);
        assert_eq!(record.first_activity_date(), Some(day(2026, 3, 5)));
        assert_eq!(record.last_activity_date(), Some(day(2026, 3, 9)));
        assert!(drift.is_clean());
    }

    #[test]
    fn legacy_xp_mismatch_is_reported() {
        let curriculum =
            Curriculum::new(vec![CurriculumItem::new("a", 1, "a", 2.0)]).expect("curriculum");
        let legacy: LegacySave = serde_json::from_str(
            r#"{"completed": ["a"], "xp": 260, "streak": 1, "lastLogin": "2026-03-09T21:14:00.000Z"}"#,
        )
        .expect("legacy");
        let (record, drift) = legacy.into_record(&curriculum, 100, day(2026, 3, 10));
        assert_eq!(record.experience_points(), 200);
        assert_eq!(drift.experience_points, Some((260, 200)));
        assert_eq!(drift.streak_count, None);
        assert_eq!(record.completion("a").expect("a").completed_on, day(2026, 3, 9));
    }

    #[test]
    fn mirror_only_save_keeps_streak() {
        let curriculum = Curriculum::new(vec![
            CurriculumItem::new("a", 1, "a", 2.0),
            CurriculumItem::new("b", 1, "b", 2.0),
        ])
        .expect("curriculum");
        let save: SaveFile = serde_json::from_str(
            r#"{"completedIds": ["a"], "experiencePoints": 200, "streakCount": 3, "lastActivityDate": "2026-03-09"}"#,
        )
        .expect("parse");

        let (record, drift) = save.into_record(&curriculum, 100, day(2026, 3, 10));
        assert_eq!(record.streak_count(), 3);
        assert_eq!(record.first_activity_date(), Some(day(2026, 3, 7)));
        assert_eq!(record.completion("a").expect("a").completed_on, day(2026, 3, 9));
        assert_eq!(drift.streak_count, None);
        assert_eq!(drift.experience_points, None);
        assert_eq!(drift.orphan_completed_ids, vec!["a"]);
    }

    #[test]
    fn mirror_streak_does_not_override_newer_history() {
        let save: SaveFile = serde_json::from_str(
            r#"{"streakCount": 4, "lastActivityDate": "2026-03-09", "activityDays": ["2026-03-09", "2026-03-12"]}"#,
        )
        .expect("parse");
        let (record, drift) = save.into_record(&Curriculum::default(), 100, day(2026, 3, 12));
        assert_eq!(record.streak_count(), 1);
        assert_eq!(record.activity_days.len(), 2);
        assert_eq!(drift.streak_count, Some((4, 1)));
    }

    #[test]
    fn absurd_mirror_streak_is_not_expanded() {
        let save: SaveFile = serde_json::from_str(
            r#"{"streakCount": 4000000000, "lastActivityDate": "2026-03-09"}"#,
        )
        .expect("parse");
        let (record, drift) = save.into_record(&Curriculum::default(), 100, day(2026, 3, 10));
        assert_eq!(record.streak_count(), 1);
        assert_eq!(drift.streak_count, Some((4_000_000_000, 1)));
    }

    #[test]
    fn xp_helpers() {
        assert_eq!(planned_xp(1.5, 100), 150);
        assert_eq!(planned_xp(0.0, 100), 0);
        assert_eq!(effort_bonus_xp(Some(90), 10), 15);
        assert_eq!(effort_bonus_xp(Some(0), 10), 0);
        assert_eq!(effort_bonus_xp(None, 10), 0);
    }
}
