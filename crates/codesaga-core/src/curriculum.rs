use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CurriculumError {
    #[error("curriculum is not valid JSON: {0}")]
    Parse(String),
    #[error("curriculum root must be an array of items or an object with an 'items' array")]
    UnsupportedShape,
    #[error("curriculum contains no items")]
    Empty,
    #[error("item #{index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },
    #[error("item id must not be empty (item #{index})")]
    EmptyId { index: usize },
    #[error("duplicate item id '{0}'")]
    DuplicateId(String),
    #[error("item '{id}' has invalid planned effort {hours}")]
    InvalidEffort { id: String, hours: f64 },
}

/// One unit of trackable work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumItem {
    pub id: String,
    pub category_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    pub title: String,
    #[serde(default)]
    pub planned_effort_hours: f64,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_resource_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
}

impl CurriculumItem {
    pub fn new(id: impl Into<String>, category_id: u32, title: impl Into<String>, hours: f64) -> Self {
        Self {
            id: id.into(),
            category_id,
            category_name: None,
            title: title.into(),
            planned_effort_hours: hours,
            subtasks: Vec::new(),
            external_resource_url: None,
            goal: None,
        }
    }

    /// Zero planned effort marks a rest day.
    pub fn is_rest(&self) -> bool {
        self.planned_effort_hours == 0.0
    }
}

/// Optional module outside the main timeline, opened by finishing a category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SideTrack {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, alias = "estimated_hours")]
    pub estimated_hours: f64,
    #[serde(default)]
    pub optional: bool,
    /// Category that must be complete before the track opens.
    #[serde(
        default,
        alias = "recommended_start_after_phase",
        deserialize_with = "deserialize_opt_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub requires_category: Option<u32>,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: u32,
    pub name: String,
    pub item_count: usize,
    pub planned_hours: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Curriculum {
    items: Vec<CurriculumItem>,
    index: HashMap<String, usize>,
    side_tracks: Vec<SideTrack>,
}

impl Curriculum {
    pub fn new(items: Vec<CurriculumItem>) -> Result<Self, CurriculumError> {
        let mut index = HashMap::with_capacity(items.len());
        for (position, item) in items.iter().enumerate() {
            if item.id.trim().is_empty() {
                return Err(CurriculumError::EmptyId { index: position });
            }
            if !item.planned_effort_hours.is_finite() || item.planned_effort_hours < 0.0 {
                return Err(CurriculumError::InvalidEffort {
                    id: item.id.clone(),
                    hours: item.planned_effort_hours,
                });
            }
            if index.insert(item.id.clone(), position).is_some() {
                return Err(CurriculumError::DuplicateId(item.id.clone()));
            }
        }
        Ok(Self {
            items,
            index,
            side_tracks: Vec::new(),
        })
    }

    pub fn with_side_tracks(mut self, side_tracks: Vec<SideTrack>) -> Result<Self, CurriculumError> {
        for (position, track) in side_tracks.iter().enumerate() {
            if track.id.trim().is_empty() {
                return Err(CurriculumError::EmptyId { index: position });
            }
            if side_tracks[..position].iter().any(|other| other.id == track.id) {
                return Err(CurriculumError::DuplicateId(track.id.clone()));
            }
        }
        self.side_tracks = side_tracks;
        Ok(self)
    }

    pub fn side_tracks(&self) -> &[SideTrack] {
        &self.side_tracks
    }

    pub fn side_track(&self, id: &str) -> Option<&SideTrack> {
        self.side_tracks.iter().find(|track| track.id == id)
    }

    pub fn items(&self) -> &[CurriculumItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, id: &str) -> Option<&CurriculumItem> {
        self.index.get(id).map(|&position| &self.items[position])
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn total_planned_hours(&self) -> f64 {
        self.items.iter().map(|item| item.planned_effort_hours).sum()
    }

    pub fn items_in_category(&self, category_id: u32) -> impl Iterator<Item = &CurriculumItem> {
        self.items
            .iter()
            .filter(move |item| item.category_id == category_id)
    }

    /// Categories in the order they first appear.
    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<Category> = Vec::new();
        for item in &self.items {
            match categories.iter_mut().find(|c| c.id == item.category_id) {
                Some(category) => {
                    category.item_count += 1;
                    category.planned_hours += item.planned_effort_hours;
                    if category.name.is_empty() {
                        if let Some(name) = &item.category_name {
                            category.name = name.clone();
                        }
                    }
                }
                None => categories.push(Category {
                    id: item.category_id,
                    name: item.category_name.clone().unwrap_or_default(),
                    item_count: 1,
                    planned_hours: item.planned_effort_hours,
                }),
            }
        }
        for category in &mut categories {
            if category.name.is_empty() {
                category.name = format!("Phase {}", category.id);
            }
        }
        categories
    }
}

/// Parses curriculum JSON, accepting both the current field names and the
/// phase/lesson spellings of older data files. The object form may carry
/// side tracks under `sideTracks` or the older `addons.modules`.
pub fn load_curriculum(content: &str) -> Result<Curriculum, CurriculumError> {
    let raw: Value =
        serde_json::from_str(content).map_err(|err| CurriculumError::Parse(err.to_string()))?;

    let (entries, tracks) = match raw {
        Value::Array(entries) => (entries, None),
        Value::Object(mut root) => {
            let entries = match root.remove("items") {
                Some(Value::Array(entries)) => entries,
                _ => return Err(CurriculumError::UnsupportedShape),
            };
            let tracks = root.remove("sideTracks").or_else(|| {
                root.remove("addons")
                    .and_then(|mut addons| addons.get_mut("modules").map(Value::take))
            });
            (entries, tracks)
        }
        _ => return Err(CurriculumError::UnsupportedShape),
    };

    if entries.is_empty() {
        return Err(CurriculumError::Empty);
    }

    let mut items = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let raw: RawItem = serde_json::from_value(entry)
            .map_err(|err| CurriculumError::Parse(format!("item #{index}: {err}")))?;
        items.push(raw.into_item(index)?);
    }

    let side_tracks: Vec<SideTrack> = match tracks {
        None | Some(Value::Null) => Vec::new(),
        Some(tracks) => serde_json::from_value(tracks)
            .map_err(|err| CurriculumError::Parse(format!("side tracks: {err}")))?,
    };

    Curriculum::new(items)?.with_side_tracks(side_tracks)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    unique_id: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_u32")]
    category_id: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_u32")]
    phase_id: Option<u32>,
    #[serde(default)]
    category_name: Option<String>,
    #[serde(default)]
    phase_name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    lesson_title: Option<String>,
    #[serde(default)]
    planned_effort_hours: Option<f64>,
    #[serde(default)]
    hours_planned: Option<f64>,
    #[serde(default)]
    subtasks: Option<Vec<String>>,
    #[serde(default)]
    tasks: Option<Vec<String>>,
    #[serde(default)]
    external_resource_url: Option<String>,
    #[serde(default, rename = "resourceURL")]
    resource_url: Option<String>,
    #[serde(default)]
    goal: Option<String>,
    #[serde(default)]
    day_goal: Option<String>,
}

impl RawItem {
    fn into_item(self, index: usize) -> Result<CurriculumItem, CurriculumError> {
        let id = self
            .id
            .or(self.unique_id)
            .or(self.date)
            .unwrap_or_else(|| index.to_string());
        let category_id = self
            .category_id
            .or(self.phase_id)
            .ok_or(CurriculumError::MissingField {
                index,
                field: "categoryId",
            })?;
        let title = self
            .title
            .or(self.lesson_title)
            .ok_or(CurriculumError::MissingField {
                index,
                field: "title",
            })?;

        Ok(CurriculumItem {
            id,
            category_id,
            category_name: self.category_name.or(self.phase_name),
            title,
            planned_effort_hours: self
                .planned_effort_hours
                .or(self.hours_planned)
                .unwrap_or(0.0),
            subtasks: self.subtasks.or(self.tasks).unwrap_or_default(),
            external_resource_url: self
                .external_resource_url
                .or(self.resource_url)
                .filter(|url| !url.trim().is_empty()),
            goal: self.goal.or(self.day_goal),
        })
    }
}

/// Ids show up as strings in some data files and as numbers in others.
fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Option<Value> = Option::deserialize(deserializer)?;
    match val {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_opt_id(deserializer)?.ok_or_else(|| serde::de::Error::custom("id must not be null"))
}

fn deserialize_opt_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Option<Value> = Option::deserialize(deserializer)?;
    match val {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => s.trim().parse::<u32>().map(Some).map_err(serde::de::Error::custom),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|u| u32::try_from(u).ok())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("invalid u32")),
        Some(_) => Err(serde::de::Error::custom("expected string or number")),
    }
}
