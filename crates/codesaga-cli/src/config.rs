use clap::ValueEnum;
use codesaga_core::{
    JobBoard, Rank, RankTable, StoreOptions, UndoStreakPolicy, DEFAULT_FALLBACK_VELOCITY,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const CONFIG_DIR: &str = ".codesaga";
pub const CONFIG_FILE: &str = "config.json";
pub const DEFAULT_CURRICULUM_FILE: &str = "curriculum.json";
pub const ENV_CURRICULUM: &str = "CODESAGA_CURRICULUM";
pub const ENV_DATA_DIR: &str = "CODESAGA_DATA_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    File,
}

impl Default for Backend {
    fn default() -> Self {
        Self::Sqlite
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaConfig {
    pub curriculum_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub backend: Option<Backend>,
    pub fallback_velocity_hours: Option<f64>,
    pub xp_per_hour: Option<u64>,
    pub bonus_xp_per_hour: Option<u64>,
    pub undo_streak_policy: Option<String>,
    pub ranks: Option<Vec<Rank>>,
    pub jobs: Option<JobBoard>,
}

/// Values given on the command line; they win over everything else.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub curriculum: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub backend: Option<Backend>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub curriculum_path: PathBuf,
    pub data_dir: PathBuf,
    pub backend: Backend,
    pub fallback_velocity: f64,
    pub ranks: RankTable,
    pub jobs: JobBoard,
    pub store: StoreOptions,
}

impl Settings {
    /// Precedence: command line, environment, config file, defaults.
    pub fn resolve(
        overrides: Overrides,
        env: impl Fn(&str) -> Option<String>,
        config: Option<SagaConfig>,
        root: &Path,
        default_data_dir: Option<PathBuf>,
    ) -> Self {
        let config = config.unwrap_or_default();
        let env_path = |name: &str| {
            env(name)
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
        };

        let curriculum_path = overrides
            .curriculum
            .or_else(|| env_path(ENV_CURRICULUM))
            .or(config.curriculum_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CURRICULUM_FILE));
        let data_dir = overrides
            .data_dir
            .or_else(|| env_path(ENV_DATA_DIR))
            .or(config.data_dir)
            .or(default_data_dir)
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR));

        let fallback_velocity = match config.fallback_velocity_hours {
            Some(hours) if hours.is_finite() && hours > 0.0 => hours,
            Some(hours) => {
                warn!(hours, "fallbackVelocityHours must be positive; using default");
                DEFAULT_FALLBACK_VELOCITY
            }
            None => DEFAULT_FALLBACK_VELOCITY,
        };

        let ranks = match config.ranks {
            Some(ranks) => RankTable::new(ranks).unwrap_or_else(|err| {
                warn!(%err, "invalid rank table in config; using default ranks");
                RankTable::default()
            }),
            None => RankTable::default(),
        };

        let mut store = StoreOptions::default();
        if let Some(xp) = config.xp_per_hour {
            store.xp_per_hour = xp;
        }
        if let Some(bonus) = config.bonus_xp_per_hour {
            store.bonus_xp_per_hour = bonus;
        }
        if let Some(policy) = config.undo_streak_policy.as_deref() {
            match policy.parse::<UndoStreakPolicy>() {
                Ok(parsed) => store.undo_streak_policy = parsed,
                Err(err) => warn!(%err, "ignoring undoStreakPolicy"),
            }
        }

        Self {
            curriculum_path: absolutize(root, curriculum_path),
            data_dir: absolutize(root, data_dir),
            backend: overrides.backend.or(config.backend).unwrap_or_default(),
            fallback_velocity,
            ranks,
            jobs: config.jobs.unwrap_or_default(),
            store,
        }
    }
}

fn absolutize(root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

/// Reads the project config, falling back to the one in the home directory.
/// A config that fails to parse is reported and ignored.
pub fn load_config(root: &Path) -> Option<SagaConfig> {
    let project = root.join(CONFIG_DIR).join(CONFIG_FILE);
    let path = if project.exists() {
        project
    } else {
        dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE)
    };

    let content = fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<SagaConfig>(&content) {
        Ok(config) => Some(config),
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to parse config");
            None
        }
    }
}

pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("codesaga"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_apply_without_config() {
        let root = Path::new("/work");
        let settings = Settings::resolve(Overrides::default(), no_env, None, root, None);

        assert_eq!(settings.curriculum_path, PathBuf::from("/work/curriculum.json"));
        assert_eq!(settings.data_dir, PathBuf::from("/work/.codesaga"));
        assert_eq!(settings.backend, Backend::Sqlite);
        assert_eq!(settings.fallback_velocity, DEFAULT_FALLBACK_VELOCITY);
        assert_eq!(settings.ranks, RankTable::default());
        assert_eq!(settings.jobs, JobBoard::default());
        assert_eq!(settings.store.undo_streak_policy, UndoStreakPolicy::Retain);
    }

    #[test]
    fn flag_beats_env_beats_config() {
        let config: SagaConfig = serde_json::from_str(
            r#"{"curriculumPath": "plan.json", "dataDir": "/cfg/data", "backend": "file"}"#,
        )
        .expect("config");
        let env: HashMap<&str, &str> = [(ENV_CURRICULUM, "/env/plan.json")].into_iter().collect();
        let lookup = |name: &str| env.get(name).map(|value| value.to_string());

        let settings = Settings::resolve(
            Overrides {
                data_dir: Some(PathBuf::from("flag-data")),
                ..Overrides::default()
            },
            lookup,
            Some(config),
            Path::new("/work"),
            Some(PathBuf::from("/home/u/.local/share/codesaga")),
        );

        assert_eq!(settings.curriculum_path, PathBuf::from("/env/plan.json"));
        assert_eq!(settings.data_dir, PathBuf::from("/work/flag-data"));
        assert_eq!(settings.backend, Backend::File);
    }

    #[test]
    fn config_tunes_store_and_ranks() {
        let config: SagaConfig = serde_json::from_str(
            r#"{
                "fallbackVelocityHours": 0.5,
                "xpPerHour": 50,
                "bonusXpPerHour": 0,
                "undoStreakPolicy": "revert",
                "ranks": [
                    {"threshold": 0, "title": "Novice"},
                    {"threshold": 100, "title": "Apprentice"},
                    {"threshold": 500, "title": "Expert"}
                ],
                "jobs": {"1": ["Tutor"]}
            }"#,
        )
        .expect("config");

        let settings =
            Settings::resolve(Overrides::default(), no_env, Some(config), Path::new("/w"), None);
        assert_eq!(settings.fallback_velocity, 0.5);
        assert_eq!(settings.store.xp_per_hour, 50);
        assert_eq!(settings.store.bonus_xp_per_hour, 0);
        assert_eq!(settings.store.undo_streak_policy, UndoStreakPolicy::Revert);
        assert_eq!(settings.ranks.rank_for(150).title, "Apprentice");
        assert_eq!(settings.jobs.jobs_for(1), ["Tutor".to_string()]);
        assert!(settings.jobs.jobs_for(2).is_empty());
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config: SagaConfig = serde_json::from_str(
            r#"{"fallbackVelocityHours": -2, "undoStreakPolicy": "sometimes", "ranks": [{"threshold": 5, "title": "x"}]}"#,
        )
        .expect("config");
        let settings =
            Settings::resolve(Overrides::default(), no_env, Some(config), Path::new("/w"), None);
        assert_eq!(settings.fallback_velocity, DEFAULT_FALLBACK_VELOCITY);
        assert_eq!(settings.store.undo_streak_policy, UndoStreakPolicy::Retain);
        assert_eq!(settings.ranks, RankTable::default());
    }

    #[test]
    fn project_config_is_loaded_and_bad_json_ignored() {
        let dir = TempDir::new().expect("temp dir");
        let config_dir = dir.path().join(CONFIG_DIR);
        fs::create_dir_all(&config_dir).expect("mkdir");

        fs::write(config_dir.join(CONFIG_FILE), r#"{"backend": "file"}"#).expect("write");
        let config = load_config(dir.path()).expect("config");
        assert_eq!(config.backend, Some(Backend::File));

        fs::write(config_dir.join(CONFIG_FILE), "{oops").expect("write");
        assert!(load_config(dir.path()).is_none());
    }
}
