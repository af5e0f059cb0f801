pub mod curriculum;
pub mod derive;
pub mod progress;
pub mod rank;
pub mod store;

pub use curriculum::{
    load_curriculum, Category, Curriculum, CurriculumError, CurriculumItem, Resource, SideTrack,
};
pub use derive::{
    category_complete, category_progress, completed_count, completion_percent, dashboard,
    eligible_jobs, estimated_completion, hunter_license, item_status, next_item, rank_for,
    side_track_status, skill_scores, trophies, CategoryProgress, Dashboard, Forecast,
    HunterLicense, ItemStatus, JobBoard, JobOffer, NextItem, SideTrackStatus, SkillLevel,
    SkillScore, Trophy, DEFAULT_FALLBACK_VELOCITY,
};
pub use progress::{CompletionEntry, ProgressRecord, SaveFile};
pub use rank::{Rank, RankTable, RankTableError};
pub use store::{
    BlobError, BlobStore, Clock, Completion, FixedClock, ImportReport, MemoryBlobStore,
    ProgressError, ProgressStore, Revocation, StoreOptions, SystemClock, UndoStreakPolicy,
    WriteGuard, PROGRESS_KEY,
};
