use crate::config::{Backend, Settings};
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use codesaga_core::{
    category_progress, completed_count, dashboard, eligible_jobs, estimated_completion,
    hunter_license, item_status, load_curriculum, next_item, side_track_status, skill_scores,
    trophies, BlobStore, Completion, Curriculum, CurriculumItem, HunterLicense, ItemStatus,
    NextItem, ProgressStore, SkillLevel, SystemClock,
};
use codesaga_storage::{FileBlobStore, SqliteBlobStore};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

const SQLITE_FILE: &str = "progress.db";

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum Command {
    /// Overall progress, rank and forecast
    Status(JsonArgs),
    /// List curriculum items with their status
    List(ListArgs),
    /// Show one item in detail
    Show(ShowArgs),
    /// Show the next item to work on
    Next(JsonArgs),
    /// Mark an item complete
    #[command(alias = "complete")]
    Done(DoneArgs),
    /// Revoke a completion
    #[command(alias = "reopen")]
    Undo(TargetArgs),
    /// Wipe all progress
    Reset(ResetArgs),
    /// Current rank and the rank ladder
    Rank,
    /// Finish-date forecast and skill analysis
    Oracle(JsonArgs),
    /// Per-category skill scores
    Skills(JsonArgs),
    /// Achievements
    Trophies(JsonArgs),
    /// Optional side tracks and whether they are open
    Tracks(JsonArgs),
    /// Write a backup of the progress record
    Export(ExportArgs),
    /// Restore progress from a backup
    Import(ImportArgs),
}

#[derive(Args, Debug)]
pub struct JsonArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub category: Option<u32>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub id: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DoneArgs {
    pub id: String,
    /// Time actually spent, earns bonus XP
    #[arg(long)]
    pub minutes: Option<u32>,
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    pub id: String,
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    #[arg(long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    pub path: PathBuf,
}

type Store = ProgressStore<Box<dyn BlobStore>, SystemClock>;

pub fn handle_command(command: Command, settings: &Settings) -> Result<()> {
    let mut store = open_store(settings)?;

    match command {
        Command::Status(args) => status(&store, settings, &args),
        Command::List(args) => list_items(&store, &args),
        Command::Show(args) => show_item(&store, &args),
        Command::Next(args) => show_next(&store, &args),
        Command::Done(args) => mark_done(&mut store, settings, &args),
        Command::Undo(args) => undo(&mut store, &args),
        Command::Reset(args) => reset(&mut store, &args),
        Command::Rank => show_rank(&store, settings),
        Command::Oracle(args) => oracle(&store, settings, &args),
        Command::Skills(args) => skills(&store, &args),
        Command::Trophies(args) => show_trophies(&store, &args),
        Command::Tracks(args) => show_tracks(&store, &args),
        Command::Export(args) => export(&store, &args),
        Command::Import(args) => import(&mut store, &args),
    }
}

fn open_store(settings: &Settings) -> Result<Store> {
    let content = fs::read_to_string(&settings.curriculum_path).with_context(|| {
        format!(
            "Failed to read curriculum {}",
            settings.curriculum_path.display()
        )
    })?;
    let curriculum = load_curriculum(&content).with_context(|| {
        format!(
            "Failed to load curriculum {}",
            settings.curriculum_path.display()
        )
    })?;

    let blobs: Box<dyn BlobStore> = match settings.backend {
        Backend::Sqlite => {
            let path = settings.data_dir.join(SQLITE_FILE);
            Box::new(
                SqliteBlobStore::open(&path)
                    .with_context(|| format!("Failed to open {}", path.display()))?,
            )
        }
        Backend::File => Box::new(
            FileBlobStore::open(&settings.data_dir)
                .with_context(|| format!("Failed to open {}", settings.data_dir.display()))?,
        ),
    };
    tracing::debug!(backend = ?settings.backend, data_dir = %settings.data_dir.display(), "store opened");

    Ok(ProgressStore::initialize(
        curriculum,
        blobs,
        SystemClock,
        settings.store.clone(),
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status(store: &Store, settings: &Settings, args: &JsonArgs) -> Result<()> {
    let view = dashboard(
        store.curriculum(),
        store.record(),
        &settings.ranks,
        store.today(),
        settings.fallback_velocity,
    );
    if args.json {
        return print_json(&view);
    }

    println!(
        "Progress: {}% ({}/{})",
        view.completion_percent, view.completed, view.total
    );
    println!("XP:      {}", view.experience_points);
    println!("Streak:  {} day(s)", view.streak_count);
    println!("Rank:    {}", view.rank.title);
    println!("Class:   {}", license_line(&view.license));
    if let (Some(next), Some(missing)) = (&view.next_rank, view.xp_to_next_rank) {
        println!("         {missing} XP to {}", next.title);
    }
    match &view.next_item {
        Some(item) => println!("Next:    [{}] {}", item.id, item.title),
        None if view.finished => println!("Next:    curriculum finished"),
        None => println!("Next:    -"),
    }
    println!(
        "Finish:  {} ({} day(s) left)",
        view.forecast.finish_date, view.forecast.days_left
    );
    Ok(())
}

fn license_line(license: &HunterLicense) -> String {
    let stars: String = (0..3)
        .map(|slot| if slot < license.stars { '*' } else { '.' })
        .collect();
    format!("{} [{stars}]", license.class_title)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemView<'a> {
    #[serde(flatten)]
    item: &'a CurriculumItem,
    status: Option<ItemStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_on: Option<chrono::NaiveDate>,
}

fn item_view<'a>(store: &Store, item: &'a CurriculumItem) -> ItemView<'a> {
    ItemView {
        item,
        status: item_status(store.curriculum(), store.record(), &item.id),
        completed_on: store
            .record()
            .completion(&item.id)
            .map(|entry| entry.completed_on),
    }
}

fn status_marker(status: Option<ItemStatus>) -> &'static str {
    match status {
        Some(ItemStatus::Completed) => "[x]",
        Some(ItemStatus::Active) => "[>]",
        Some(ItemStatus::Locked) | None => "[ ]",
    }
}

fn status_label(status: Option<ItemStatus>) -> &'static str {
    status.map_or("unknown", |status| status.as_str())
}

fn list_items(store: &Store, args: &ListArgs) -> Result<()> {
    let curriculum = store.curriculum();
    if let Some(category) = args.category {
        if curriculum.items_in_category(category).next().is_none() {
            bail!("Category {category} not found");
        }
    }

    if args.json {
        let views: Vec<ItemView> = curriculum
            .items()
            .iter()
            .filter(|item| args.category.map_or(true, |c| item.category_id == c))
            .map(|item| item_view(store, item))
            .collect();
        return print_json(&views);
    }

    for progress in category_progress(curriculum, store.record()) {
        if args.category.map_or(false, |c| c != progress.category_id) {
            continue;
        }
        println!(
            "Phase {:02} {} ({}/{}, {}%)",
            progress.category_id, progress.name, progress.completed, progress.total, progress.percent
        );
        for item in curriculum.items_in_category(progress.category_id) {
            let view = item_view(store, item);
            let rest = if item.is_rest() { " (rest)" } else { "" };
            println!(
                "  {} {} {}{}",
                status_marker(view.status),
                item.id,
                item.title,
                rest
            );
        }
    }
    Ok(())
}

fn find_item<'a>(curriculum: &'a Curriculum, id: &str) -> Result<&'a CurriculumItem> {
    match curriculum.item(id) {
        Some(item) => Ok(item),
        None => bail!("Item {id} not found"),
    }
}

fn print_item(store: &Store, item: &CurriculumItem) {
    let view = item_view(store, item);
    println!("[{}] {}", item.id, item.title);
    let category = store
        .curriculum()
        .categories()
        .into_iter()
        .find(|category| category.id == item.category_id)
        .map(|category| category.name)
        .unwrap_or_default();
    println!("Phase:   {:02} {}", item.category_id, category);
    if item.is_rest() {
        println!("Effort:  rest day");
    } else {
        println!("Effort:  {}h", item.planned_effort_hours);
    }
    match view.completed_on {
        Some(day) => println!("Status:  {} on {day}", status_label(view.status)),
        None => println!("Status:  {}", status_label(view.status)),
    }
    if let Some(goal) = &item.goal {
        println!("Goal:    {goal}");
    }
    if let Some(url) = &item.external_resource_url {
        println!("Link:    {url}");
    }
    if !item.subtasks.is_empty() {
        println!("Tasks:");
        for task in &item.subtasks {
            println!("  - {task}");
        }
    }
}

fn show_item(store: &Store, args: &ShowArgs) -> Result<()> {
    let item = find_item(store.curriculum(), &args.id)?;
    if args.json {
        return print_json(&item_view(store, item));
    }
    print_item(store, item);
    Ok(())
}

fn show_next(store: &Store, args: &JsonArgs) -> Result<()> {
    match next_item(store.curriculum(), store.record()) {
        NextItem::Pending(item) => {
            if args.json {
                return print_json(&item_view(store, item));
            }
            print_item(store, item);
        }
        NextItem::Finished => {
            if args.json {
                return print_json(&serde_json::json!({ "finished": true }));
            }
            println!("Every item is complete.");
        }
        NextItem::Empty => println!("The curriculum is empty."),
    }
    Ok(())
}

fn mark_done(store: &mut Store, settings: &Settings, args: &DoneArgs) -> Result<()> {
    let rank_before = settings
        .ranks
        .rank_for(store.record().experience_points())
        .title
        .clone();

    match store.mark_complete(&args.id, args.minutes)? {
        Completion::AlreadyComplete => println!("{} is already complete", args.id),
        Completion::Recorded {
            xp_awarded,
            experience_points,
            streak_count,
        } => {
            println!(
                "Completed {} (+{xp_awarded} XP, {experience_points} total, streak {streak_count})",
                args.id
            );
            let rank_after = &settings.ranks.rank_for(experience_points).title;
            if *rank_after != rank_before {
                println!("Rank up: {rank_before} -> {rank_after}");
            }
        }
    }
    Ok(())
}

fn undo(store: &mut Store, args: &TargetArgs) -> Result<()> {
    let revoked = store.mark_incomplete(&args.id)?;
    println!(
        "Reopened {} (-{} XP, {} total, streak {})",
        args.id, revoked.xp_revoked, revoked.experience_points, revoked.streak_count
    );
    Ok(())
}

fn reset(store: &mut Store, args: &ResetArgs) -> Result<()> {
    if !args.yes {
        bail!("Refusing to reset without --yes");
    }
    store.reset()?;
    println!("Progress reset");
    Ok(())
}

fn show_rank(store: &Store, settings: &Settings) -> Result<()> {
    let xp = store.record().experience_points();
    let current = settings.ranks.rank_for(xp);
    println!("{} ({xp} XP)", current.title);
    if !current.description.is_empty() {
        println!("{}", current.description);
    }
    let license = hunter_license(store.curriculum(), store.record());
    println!(
        "Class: {} ({} item(s) complete)",
        license_line(&license),
        license.completed
    );
    println!();
    for rank in settings.ranks.ranks() {
        let marker = if rank == current { ">" } else { " " };
        println!("{marker} {:>7}  {}", rank.threshold, rank.title);
    }
    Ok(())
}

fn oracle(store: &Store, settings: &Settings, args: &JsonArgs) -> Result<()> {
    let curriculum = store.curriculum();
    let record = store.record();
    let forecast = estimated_completion(
        curriculum,
        record,
        store.today(),
        settings.fallback_velocity,
    );
    let scores = skill_scores(curriculum, record);
    let jobs = eligible_jobs(curriculum, record, &settings.jobs);

    if args.json {
        return print_json(&serde_json::json!({
            "forecast": forecast,
            "skills": scores,
            "jobs": jobs,
        }));
    }

    let planned_days = (forecast.total_hours / settings.fallback_velocity).ceil();
    println!(
        "Velocity:  {:.2} h/day{}",
        forecast.velocity,
        if forecast.velocity_is_fallback {
            " (assumed)"
        } else {
            ""
        }
    );
    println!("Observed:  {} day(s)", forecast.elapsed_days);
    println!(
        "Effort:    {:.0} of {:.0} hours",
        forecast.completed_hours, forecast.total_hours
    );
    println!(
        "Finish:    {} ({} day(s), plan at {} h/day: {planned_days} day(s))",
        forecast.finish_date, forecast.days_left, settings.fallback_velocity
    );

    let mastered: Vec<&str> = scores
        .iter()
        .filter(|score| score.level == SkillLevel::Mastered)
        .map(|score| score.name.as_str())
        .collect();
    if mastered.is_empty() {
        println!("Mastered:  none yet");
    } else {
        println!("Mastered:  {}", mastered.join(", "));
    }
    if jobs.is_empty() {
        println!("Jobs:      master a phase to qualify");
    } else {
        let titles: Vec<&str> = jobs.iter().map(|job| job.title.as_str()).collect();
        println!("Jobs:      {}", titles.join(", "));
    }
    Ok(())
}

fn skills(store: &Store, args: &JsonArgs) -> Result<()> {
    let scores = skill_scores(store.curriculum(), store.record());
    if args.json {
        return print_json(&scores);
    }
    for score in scores {
        println!(
            "{:>5.1}%  {:<12} {}",
            score.score,
            score.level.as_str(),
            score.name
        );
    }
    Ok(())
}

fn show_trophies(store: &Store, args: &JsonArgs) -> Result<()> {
    let list = trophies(store.curriculum(), store.record());
    if args.json {
        return print_json(&list);
    }
    let unlocked = list.iter().filter(|trophy| trophy.unlocked).count();
    println!(
        "{unlocked}/{} unlocked, {} item(s) complete",
        list.len(),
        completed_count(store.curriculum(), store.record())
    );
    for trophy in list {
        let marker = if trophy.unlocked { "*" } else { " " };
        println!("{marker} {:<24} {}", trophy.name, trophy.description);
    }
    Ok(())
}

fn show_tracks(store: &Store, args: &JsonArgs) -> Result<()> {
    let tracks = side_track_status(store.curriculum(), store.record());
    if args.json {
        return print_json(&tracks);
    }
    if tracks.is_empty() {
        println!("No side tracks in this curriculum.");
        return Ok(());
    }
    for status in tracks {
        let track = status.track;
        let marker = if status.unlocked { "[>]" } else { "[ ]" };
        let requirement = match (status.unlocked, track.requires_category) {
            (false, Some(category)) => format!(" (requires phase {category})"),
            _ => String::new(),
        };
        println!(
            "{marker} {} {} {}h{requirement}",
            track.id, track.title, track.estimated_hours
        );
    }
    Ok(())
}

fn export(store: &Store, args: &ExportArgs) -> Result<()> {
    let payload = store.export()?;
    match &args.out {
        Some(path) => {
            fs::write(path, payload)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Progress exported to {}", path.display());
        }
        None => println!("{payload}"),
    }
    Ok(())
}

fn import(store: &mut Store, args: &ImportArgs) -> Result<()> {
    let content = fs::read_to_string(&args.path)
        .with_context(|| format!("Failed to read {}", args.path.display()))?;
    let report = store.import(&content)?;
    println!("Imported {} completion(s)", report.imported);
    if !report.dropped_unknown.is_empty() {
        println!(
            "Dropped {} unknown item(s): {}",
            report.dropped_unknown.len(),
            report.dropped_unknown.join(", ")
        );
    }
    Ok(())
}
