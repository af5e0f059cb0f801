//! Read-only views computed from a curriculum and a progress record.
//!
//! Nothing here mutates or performs I/O; every function returns the same
//! answer for the same inputs (and `today`, where a date is involved).

use crate::curriculum::{Curriculum, CurriculumItem, SideTrack};
use crate::progress::ProgressRecord;
use crate::rank::{Rank, RankTable};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pace assumed before any effort has been logged: a four hour study day.
pub const DEFAULT_FALLBACK_VELOCITY: f64 = 4.0;

const MASTERED_RATIO: f64 = 0.9;
const IN_PROGRESS_RATIO: f64 = 0.3;

/// Completed items that the curriculum still contains.
pub fn completed_count(curriculum: &Curriculum, record: &ProgressRecord) -> usize {
    record
        .completions
        .iter()
        .filter(|entry| curriculum.contains(&entry.item_id))
        .count()
}

pub fn completion_percent(curriculum: &Curriculum, record: &ProgressRecord) -> u8 {
    if curriculum.is_empty() {
        return 0;
    }
    let ratio = completed_count(curriculum, record) as f64 / curriculum.len() as f64;
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NextItem<'a> {
    Pending(&'a CurriculumItem),
    Finished,
    Empty,
}

/// First item in curriculum order that is not yet complete.
pub fn next_item<'a>(curriculum: &'a Curriculum, record: &ProgressRecord) -> NextItem<'a> {
    if curriculum.is_empty() {
        return NextItem::Empty;
    }
    curriculum
        .items()
        .iter()
        .find(|item| !record.is_completed(&item.id))
        .map(NextItem::Pending)
        .unwrap_or(NextItem::Finished)
}

pub fn rank_for<'t>(ranks: &'t RankTable, experience_points: u64) -> &'t Rank {
    ranks.rank_for(experience_points)
}

/// Linear extrapolation of the finish date.
///
/// Velocity is the planned effort completed per calendar day since the first
/// activity. The whole history is weighted equally, so a single burst day
/// moves the forecast for everything that remains.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub elapsed_days: i64,
    pub velocity: f64,
    pub velocity_is_fallback: bool,
    pub total_hours: f64,
    pub completed_hours: f64,
    pub remaining_hours: f64,
    pub days_left: i64,
    pub finish_date: NaiveDate,
}

pub fn estimated_completion(
    curriculum: &Curriculum,
    record: &ProgressRecord,
    today: NaiveDate,
    fallback_velocity: f64,
) -> Forecast {
    let elapsed_days = record
        .first_activity_date()
        .map(|first| (today - first).num_days())
        .unwrap_or(0)
        .max(1);

    let total_hours = curriculum.total_planned_hours();
    let completed_hours = record.completed_hours(curriculum);
    let measured = completed_hours / elapsed_days as f64;
    let (velocity, velocity_is_fallback) = if measured > 0.0 {
        (measured, false)
    } else {
        (fallback_velocity.max(f64::EPSILON), true)
    };

    let remaining_hours = (total_hours - completed_hours).max(0.0);
    let days_left = (remaining_hours / velocity).ceil().min(i32::MAX as f64) as i64;
    let finish_date = today
        .checked_add_signed(Duration::days(days_left))
        .unwrap_or(NaiveDate::MAX);

    Forecast {
        elapsed_days,
        velocity,
        velocity_is_fallback,
        total_hours,
        completed_hours,
        remaining_hours,
        days_left,
        finish_date,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkillLevel {
    Upcoming,
    InProgress,
    Mastered,
}

impl SkillLevel {
    fn from_ratio(ratio: f64) -> Self {
        if ratio > MASTERED_RATIO {
            SkillLevel::Mastered
        } else if ratio > IN_PROGRESS_RATIO {
            SkillLevel::InProgress
        } else {
            SkillLevel::Upcoming
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SkillLevel::Upcoming => "upcoming",
            SkillLevel::InProgress => "in-progress",
            SkillLevel::Mastered => "mastered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillScore {
    pub category_id: u32,
    pub name: String,
    pub score: f64,
    pub level: SkillLevel,
}

/// Per-category share of planned hours completed. Categories made only of
/// rest entries fall back to the share of items completed.
pub fn skill_scores(curriculum: &Curriculum, record: &ProgressRecord) -> Vec<SkillScore> {
    curriculum
        .categories()
        .into_iter()
        .map(|category| {
            let ratio = if category.planned_hours > 0.0 {
                let done: f64 = curriculum
                    .items_in_category(category.id)
                    .filter(|item| record.is_completed(&item.id))
                    .map(|item| item.planned_effort_hours)
                    .sum();
                done / category.planned_hours
            } else {
                let done = curriculum
                    .items_in_category(category.id)
                    .filter(|item| record.is_completed(&item.id))
                    .count();
                done as f64 / category.item_count as f64
            };
            let ratio = ratio.clamp(0.0, 1.0);
            SkillScore {
                category_id: category.id,
                name: category.name,
                score: ratio * 100.0,
                level: SkillLevel::from_ratio(ratio),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Completed,
    Active,
    Locked,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Completed => "completed",
            ItemStatus::Active => "active",
            ItemStatus::Locked => "locked",
        }
    }
}

/// Items unlock one at a time: the first item and any item whose predecessor
/// is complete are active.
pub fn item_status(
    curriculum: &Curriculum,
    record: &ProgressRecord,
    item_id: &str,
) -> Option<ItemStatus> {
    let position = curriculum.index_of(item_id)?;
    if record.is_completed(item_id) {
        return Some(ItemStatus::Completed);
    }
    let unlocked = position == 0 || record.is_completed(&curriculum.items()[position - 1].id);
    Some(if unlocked {
        ItemStatus::Active
    } else {
        ItemStatus::Locked
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryProgress {
    pub category_id: u32,
    pub name: String,
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
}

pub fn category_progress(curriculum: &Curriculum, record: &ProgressRecord) -> Vec<CategoryProgress> {
    curriculum
        .categories()
        .into_iter()
        .map(|category| {
            let completed = curriculum
                .items_in_category(category.id)
                .filter(|item| record.is_completed(&item.id))
                .count();
            let percent = if category.item_count == 0 {
                0
            } else {
                ((completed as f64 / category.item_count as f64) * 100.0).round() as u8
            };
            CategoryProgress {
                category_id: category.id,
                name: category.name,
                completed,
                total: category.item_count,
                percent,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trophy {
    pub key: String,
    pub name: String,
    pub description: String,
    pub unlocked: bool,
}

const MILESTONES: &[(usize, &str, &str)] = &[
    (1, "The Awakening", "Complete your first item"),
    (10, "First Blood", "Complete 10 items"),
    (30, "Monthly Grind", "Complete 30 items"),
    (100, "Centurion", "Complete 100 items"),
];

pub fn trophies(curriculum: &Curriculum, record: &ProgressRecord) -> Vec<Trophy> {
    let done = completed_count(curriculum, record);
    let total = curriculum.len();

    let mut trophies: Vec<Trophy> = MILESTONES
        .iter()
        .map(|&(count, name, description)| Trophy {
            key: format!("count_{count}"),
            name: name.to_string(),
            description: description.to_string(),
            unlocked: done >= count,
        })
        .collect();

    trophies.push(Trophy {
        key: "half".to_string(),
        name: "Half-Blood Prince".to_string(),
        description: "Complete half of the curriculum".to_string(),
        unlocked: total > 0 && done * 2 >= total,
    });
    trophies.push(Trophy {
        key: "finish".to_string(),
        name: "The Finisher".to_string(),
        description: "Complete the whole curriculum".to_string(),
        unlocked: total > 0 && done >= total,
    });

    for category in curriculum.categories() {
        let mastered = category_complete(curriculum, record, category.id);
        let short = category
            .name
            .split_whitespace()
            .next()
            .unwrap_or("Phase")
            .to_string();
        trophies.push(Trophy {
            key: format!("category_{}", category.id),
            name: format!("{short} Master"),
            description: format!("Finish {}", category.name),
            unlocked: mastered,
        });
    }

    trophies
}

/// True when the category has items and every one of them is complete.
pub fn category_complete(curriculum: &Curriculum, record: &ProgressRecord, category_id: u32) -> bool {
    let mut items = curriculum.items_in_category(category_id).peekable();
    items.peek().is_some() && items.all(|item| record.is_completed(&item.id))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SideTrackStatus<'a> {
    #[serde(flatten)]
    pub track: &'a SideTrack,
    pub unlocked: bool,
}

/// Side tracks open once their required category is finished; a track
/// naming a category the curriculum lacks stays locked.
pub fn side_track_status<'a>(
    curriculum: &'a Curriculum,
    record: &ProgressRecord,
) -> Vec<SideTrackStatus<'a>> {
    curriculum
        .side_tracks()
        .iter()
        .map(|track| SideTrackStatus {
            track,
            unlocked: track
                .requires_category
                .map_or(true, |category| category_complete(curriculum, record, category)),
        })
        .collect()
}

const NOVICE_CLASS: &str = "Novice Hunter";
/// A class applies once the completed count exceeds its bound.
const LICENSE_CLASSES: &[(usize, &str)] = &[
    (10, "Code Vigilante"),
    (50, "System Detective"),
    (150, "Algorithm Knight"),
    (300, "Backend Wraith"),
    (500, "Fullstack Warlord"),
    (800, "Tech Titan"),
];
const LICENSE_STAR_BOUNDS: [usize; 3] = [100, 400, 800];

/// Count-based standing shown alongside the XP rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HunterLicense {
    pub completed: usize,
    pub stars: u8,
    pub class_title: &'static str,
}

pub fn hunter_license(curriculum: &Curriculum, record: &ProgressRecord) -> HunterLicense {
    let completed = completed_count(curriculum, record);
    let stars = LICENSE_STAR_BOUNDS
        .iter()
        .filter(|&&bound| completed > bound)
        .count() as u8;
    let class_title = LICENSE_CLASSES
        .iter()
        .rev()
        .find(|(bound, _)| completed > *bound)
        .map_or(NOVICE_CLASS, |(_, title)| *title);
    HunterLicense {
        completed,
        stars,
        class_title,
    }
}

/// Roles a learner qualifies for by mastering a category, keyed by category id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobBoard {
    jobs: BTreeMap<u32, Vec<String>>,
}

impl JobBoard {
    pub fn new(jobs: BTreeMap<u32, Vec<String>>) -> Self {
        Self { jobs }
    }

    pub fn jobs_for(&self, category_id: u32) -> &[String] {
        self.jobs.get(&category_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for JobBoard {
    fn default() -> Self {
        let table: [(u32, &[&str]); 11] = [
            (1, &["Data Analyst Intern"]),
            (2, &["Hardware Engineer Assistant"]),
            (3, &["Embedded Systems Intern"]),
            (4, &["Game Dev Junior", "System Software Dev"]),
            (5, &["Python Developer", "Data Entry Automator"]),
            (6, &["Junior Backend Developer"]),
            (7, &["Junior Frontend Developer", "UI Specialist"]),
            (8, &["Fullstack Developer", "Freelancer"]),
            (9, &["ML Engineer", "AI Researcher"]),
            (10, &["Cybersecurity Analyst"]),
            (11, &["Senior Software Engineer", "CTO"]),
        ];
        Self::new(
            table
                .into_iter()
                .map(|(category, jobs)| (category, jobs.iter().map(|job| job.to_string()).collect()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOffer {
    pub category_id: u32,
    pub category: String,
    pub title: String,
}

/// Jobs unlocked by every category whose skill level is mastered, in
/// curriculum order.
pub fn eligible_jobs(curriculum: &Curriculum, record: &ProgressRecord, board: &JobBoard) -> Vec<JobOffer> {
    skill_scores(curriculum, record)
        .into_iter()
        .filter(|score| score.level == SkillLevel::Mastered)
        .flat_map(|score| {
            board.jobs_for(score.category_id).iter().map(move |title| JobOffer {
                category_id: score.category_id,
                category: score.name.clone(),
                title: title.clone(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub completed: usize,
    pub total: usize,
    pub completion_percent: u8,
    pub experience_points: u64,
    pub streak_count: u32,
    pub last_activity_date: Option<NaiveDate>,
    pub rank: Rank,
    pub next_rank: Option<Rank>,
    pub xp_to_next_rank: Option<u64>,
    pub next_item: Option<CurriculumItem>,
    pub finished: bool,
    pub forecast: Forecast,
    pub license: HunterLicense,
}

pub fn dashboard(
    curriculum: &Curriculum,
    record: &ProgressRecord,
    ranks: &RankTable,
    today: NaiveDate,
    fallback_velocity: f64,
) -> Dashboard {
    let experience_points = record.experience_points();
    let next_rank = ranks.next_rank(experience_points);
    let next = next_item(curriculum, record);
    Dashboard {
        completed: completed_count(curriculum, record),
        total: curriculum.len(),
        completion_percent: completion_percent(curriculum, record),
        experience_points,
        streak_count: record.streak_count(),
        last_activity_date: record.last_activity_date(),
        rank: ranks.rank_for(experience_points).clone(),
        next_rank: next_rank.map(|(rank, _)| rank.clone()),
        xp_to_next_rank: next_rank.map(|(_, missing)| missing),
        next_item: match next {
            NextItem::Pending(item) => Some(item.clone()),
            _ => None,
        },
        finished: next == NextItem::Finished,
        forecast: estimated_completion(curriculum, record, today, fallback_velocity),
        license: hunter_license(curriculum, record),
    }
}
