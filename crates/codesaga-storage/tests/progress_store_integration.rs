use chrono::NaiveDate;
use codesaga_core::{
    completion_percent, load_curriculum, BlobStore, Completion, FixedClock, ProgressError,
    ProgressStore, StoreOptions, PROGRESS_KEY,
};
use codesaga_storage::{FileBlobStore, SqliteBlobStore};
use tempfile::TempDir;

const CURRICULUM: &str = r#"[
    {"date": "2026-01-01", "phaseId": 1, "phaseName": "Math Core", "lessonTitle": "Sets", "hoursPlanned": 3},
    {"date": "2026-01-02", "phaseId": 1, "phaseName": "Math Core", "lessonTitle": "Proofs", "hoursPlanned": 3},
    {"date": "2026-01-03", "phaseId": 1, "phaseName": "Math Core", "lessonTitle": "Rest", "hoursPlanned": 0},
    {"date": "2026-01-04", "phaseId": 2, "phaseName": "Nand2Tetris", "lessonTitle": "Gates", "hoursPlanned": 4}
]"#;

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

#[test]
fn sqlite_backed_progress_survives_restart() {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("progress.db");
    let clock = FixedClock::new(day(2026, 1, 1));

    {
        let blobs = SqliteBlobStore::open(&db_path).expect("open db");
        let curriculum = load_curriculum(CURRICULUM).expect("curriculum");
        let mut store = ProgressStore::initialize(curriculum, blobs, &clock, StoreOptions::default());
        store.mark_complete("2026-01-01", None).expect("complete day 1");
        clock.advance_days(1);
        store
            .mark_complete("2026-01-02", Some(120))
            .expect("complete day 2");
    }

    let blobs = SqliteBlobStore::open(&db_path).expect("reopen db");
    let curriculum = load_curriculum(CURRICULUM).expect("curriculum");
    let store = ProgressStore::initialize(curriculum, blobs, &clock, StoreOptions::default());
    let record = store.record();
    assert_eq!(record.completed_ids(), vec!["2026-01-01", "2026-01-02"]);
    assert_eq!(record.experience_points(), 620);
    assert_eq!(record.streak_count(), 2);
    assert_eq!(completion_percent(store.curriculum(), record), 50);
}

#[test]
fn file_backed_stores_detect_each_other() {
    let dir = TempDir::new().expect("temp dir");
    let clock = FixedClock::new(day(2026, 1, 1));
    let first_blobs = FileBlobStore::open(dir.path()).expect("open first");
    let second_blobs = FileBlobStore::open(dir.path()).expect("open second");

    let mut first = ProgressStore::initialize(
        load_curriculum(CURRICULUM).expect("curriculum"),
        first_blobs,
        &clock,
        StoreOptions::default(),
    );
    let mut second = ProgressStore::initialize(
        load_curriculum(CURRICULUM).expect("curriculum"),
        second_blobs,
        &clock,
        StoreOptions::default(),
    );

    first.mark_complete("2026-01-01", None).expect("first writer");
    let err = second
        .mark_complete("2026-01-04", None)
        .expect_err("stale writer must be refused");
    assert!(matches!(err, ProgressError::Conflict { .. }));

    second.reload();
    assert_eq!(
        second.mark_complete("2026-01-01", None).expect("idempotent"),
        Completion::AlreadyComplete
    );
    second.mark_complete("2026-01-04", None).expect("after reload");

    first.reload();
    assert_eq!(first.record().completed_ids(), vec!["2026-01-01", "2026-01-04"]);
}

#[test]
fn corrupted_file_blob_is_recovered() {
    let dir = TempDir::new().expect("temp dir");
    let blobs = FileBlobStore::open(dir.path()).expect("open");
    blobs.set(PROGRESS_KEY, "\u{0}garbage").expect("seed garbage");
    let clock = FixedClock::new(day(2026, 1, 1));

    let mut store = ProgressStore::initialize(
        load_curriculum(CURRICULUM).expect("curriculum"),
        &blobs,
        &clock,
        StoreOptions::default(),
    );
    assert!(store.record().completions.is_empty());

    store.mark_complete("2026-01-03", None).expect("complete rest day");
    assert_eq!(store.record().experience_points(), 0);
    let raw = blobs.get(PROGRESS_KEY).expect("read").expect("blob present");
    assert!(raw.contains("\"completedIds\":[\"2026-01-03\"]"));
}
