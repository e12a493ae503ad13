//! The flat block record and its kind taxonomy.
//!
//! A document is a flat list of [`Block`]s ordered by `local_index`. Containers
//! (`section`, `group`) always sit at the root; leaves point at the container
//! that encloses them through `parent_id`, or at nothing.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::EnumString;

use crate::ids::BlockId;
use crate::now_millis;
use crate::row::RowError;

/// Default body for a new `text` block.
pub const TEXT_BODY_DEFAULT: &str = "<p>Text</p>";
/// Placeholder source for a new `image` block.
pub const IMAGE_SRC_DEFAULT: &str = "https://cdn.blocksync.dev/placeholder/image.png";
/// Placeholder source for a new `video` block.
pub const VIDEO_SRC_DEFAULT: &str = "https://cdn.blocksync.dev/placeholder/video.mp4";
/// Placeholder source for a new `pdf` block.
pub const PDF_SRC_DEFAULT: &str = "https://cdn.blocksync.dev/placeholder/document.pdf";
pub const HEADER_TITLE_DEFAULT: &str = "Header";
pub const HEADER_DESCRIPTION_DEFAULT: &str = "Description";

/// Row columns the diff engine keeps in sync for blocks.
///
/// Anything outside this list (creation time, free-form `data`) is written
/// only at creation and never diffed.
pub const TRACKED_FIELDS: &[&str] = &[
    "type",
    "parent_id",
    "local_index",
    "form_field_id",
    "v_hidden",
    "title_html",
    "description_html",
    "body_html",
    "src",
];

/// Block kind. Containers group leaves and never nest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum BlockKind {
    /// Top-level container.
    Section,
    /// Secondary container, same rules as a section.
    Group,
    /// Bound form input.
    #[default]
    Field,
    /// Rich text body.
    #[strum(serialize = "text", serialize = "html")]
    #[serde(alias = "html")]
    Text,
    /// Title plus description.
    Header,
    Image,
    Video,
    Pdf,
    Divider,
}

impl BlockKind {
    /// Parse from string (case-insensitive). `html` is accepted for `text`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Section => "section",
            BlockKind::Group => "group",
            BlockKind::Field => "field",
            BlockKind::Text => "text",
            BlockKind::Header => "header",
            BlockKind::Image => "image",
            BlockKind::Video => "video",
            BlockKind::Pdf => "pdf",
            BlockKind::Divider => "divider",
        }
    }

    /// Structural containers hold leaves and are always root-level.
    pub fn is_container(&self) -> bool {
        matches!(self, BlockKind::Section | BlockKind::Group)
    }

    /// Kinds that carry a media `src`.
    pub fn is_media(&self) -> bool {
        matches!(self, BlockKind::Image | BlockKind::Video | BlockKind::Pdf)
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One node of the flat document.
///
/// Column names follow the remote row shape, so a `Block` deserializes
/// directly from a fetched row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    #[serde(default)]
    pub parent_id: Option<BlockId>,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub local_index: usize,

    // ── Payload ──────────────────────────────────────────────────────────
    #[serde(default, rename = "form_field_id")]
    pub field_id: Option<String>,
    #[serde(default, rename = "v_hidden")]
    pub hidden: bool,
    #[serde(default)]
    pub title_html: Option<String>,
    #[serde(default)]
    pub description_html: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub src: Option<String>,
    /// Untracked extra columns.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Unix milliseconds. Rows may carry a number or an RFC 3339 string.
    #[serde(default, deserialize_with = "lenient_millis")]
    pub created_at: u64,
}

/// Accept epoch millis as a number or numeric string, or an RFC 3339
/// timestamp. Anything unparseable reads as 0 rather than failing the row.
fn lenient_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let millis = match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.parse::<u64>().ok().unwrap_or_else(|| {
            chrono::DateTime::parse_from_rfc3339(&s)
                .map(|t| t.timestamp_millis().max(0) as u64)
                .unwrap_or(0)
        }),
        _ => 0,
    };
    Ok(millis)
}

impl Block {
    /// New block of `kind` with its default payload, at the root, index 0.
    pub fn new(id: BlockId, kind: BlockKind) -> Self {
        let mut block = Self {
            id,
            parent_id: None,
            kind,
            local_index: 0,
            field_id: None,
            hidden: false,
            title_html: None,
            description_html: None,
            body_html: None,
            src: None,
            data: Value::Null,
            created_at: now_millis(),
        };
        match kind {
            BlockKind::Text => block.body_html = Some(TEXT_BODY_DEFAULT.to_string()),
            BlockKind::Image => block.src = Some(IMAGE_SRC_DEFAULT.to_string()),
            BlockKind::Video => block.src = Some(VIDEO_SRC_DEFAULT.to_string()),
            BlockKind::Pdf => block.src = Some(PDF_SRC_DEFAULT.to_string()),
            BlockKind::Header => {
                block.title_html = Some(HEADER_TITLE_DEFAULT.to_string());
                block.description_html = Some(HEADER_DESCRIPTION_DEFAULT.to_string());
            }
            _ => {}
        }
        block
    }

    /// Builder: set the parent container.
    pub fn with_parent(mut self, parent: impl Into<BlockId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    /// Builder: set the ordering index.
    pub fn at(mut self, local_index: usize) -> Self {
        self.local_index = local_index;
        self
    }

    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }

    pub fn is_draft(&self) -> bool {
        self.id.is_draft()
    }

    /// Current value of a tracked column, or `None` for an unknown name.
    pub fn field_value(&self, name: &str) -> Option<Value> {
        let opt = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
        let value = match name {
            "type" => Value::String(self.kind.as_str().to_string()),
            "parent_id" => self
                .parent_id
                .as_ref()
                .map(|p| Value::String(p.to_string()))
                .unwrap_or(Value::Null),
            "local_index" => Value::from(self.local_index),
            "form_field_id" => opt(&self.field_id),
            "v_hidden" => Value::Bool(self.hidden),
            "title_html" => opt(&self.title_html),
            "description_html" => opt(&self.description_html),
            "body_html" => opt(&self.body_html),
            "src" => opt(&self.src),
            _ => return None,
        };
        Some(value)
    }

    /// Every tracked column plus `data`, without the id. This is what a
    /// remote create receives.
    pub fn payload(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for name in TRACKED_FIELDS {
            if let Some(value) = self.field_value(name) {
                map.insert((*name).to_string(), value);
            }
        }
        if !self.data.is_null() {
            map.insert("data".to_string(), self.data.clone());
        }
        map
    }

    /// Full row shape, including id and creation time.
    pub fn to_row(&self) -> Map<String, Value> {
        let mut map = self.payload();
        map.insert("id".to_string(), Value::String(self.id.to_string()));
        map.insert("created_at".to_string(), Value::from(self.created_at));
        map
    }

    /// Decode a remote row.
    pub fn from_row(row: &Value) -> Result<Self, RowError> {
        if !row.is_object() {
            return Err(RowError::NotAnObject);
        }
        if row.get("id").is_none() {
            return Err(RowError::MissingKey);
        }
        Ok(serde_json::from_value(row.clone())?)
    }

    /// Apply a typed change. Returns `false` when the change does not apply
    /// to this kind or leaves the value unchanged.
    pub fn apply_change(&mut self, change: &BlockChange) -> bool {
        if !change.applies_to(self.kind) {
            return false;
        }
        fn set<T: PartialEq + Clone>(slot: &mut T, value: &T) -> bool {
            if slot == value {
                false
            } else {
                *slot = value.clone();
                true
            }
        }
        match change {
            BlockChange::Hidden(v) => set(&mut self.hidden, v),
            BlockChange::Title(v) => set(&mut self.title_html, &Some(v.clone())),
            BlockChange::Description(v) => set(&mut self.description_html, &Some(v.clone())),
            BlockChange::Body(v) => set(&mut self.body_html, &Some(v.clone())),
            BlockChange::Src(v) => set(&mut self.src, &Some(v.clone())),
            BlockChange::BindField(v) => set(&mut self.field_id, v),
        }
    }
}

/// Closed set of payload edits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockChange {
    Hidden(bool),
    Title(String),
    Description(String),
    /// Text blocks only.
    Body(String),
    /// Image, video and pdf only.
    Src(String),
    /// Field blocks only. `None` unbinds.
    BindField(Option<String>),
}

impl BlockChange {
    pub fn applies_to(&self, kind: BlockKind) -> bool {
        match self {
            BlockChange::Hidden(_) | BlockChange::Title(_) | BlockChange::Description(_) => true,
            BlockChange::Body(_) => kind == BlockKind::Text,
            BlockChange::Src(_) => kind.is_media(),
            BlockChange::BindField(_) => kind == BlockKind::Field,
        }
    }

    /// Column this change writes.
    pub fn column(&self) -> &'static str {
        match self {
            BlockChange::Hidden(_) => "v_hidden",
            BlockChange::Title(_) => "title_html",
            BlockChange::Description(_) => "description_html",
            BlockChange::Body(_) => "body_html",
            BlockChange::Src(_) => "src",
            BlockChange::BindField(_) => "form_field_id",
        }
    }
}
