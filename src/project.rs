use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Mutex;

use serde::Deserialize;

use crate::error::{HatchError, HatchResult};
use crate::lock;

pub const PROJECT_FILE: &str = "project.json";

/// Byte-stream access to a project's files, keyed by asset reference (`md5ext`).
pub trait AssetSource: Send + Sync {
    fn open(&self, name: &str) -> HatchResult<Vec<u8>>;
}

/// An `.sb3` archive on disk.
pub struct ArchiveAssets {
    archive: Mutex<zip::ZipArchive<File>>,
}

impl ArchiveAssets {
    pub fn open_path(path: impl AsRef<Path>) -> HatchResult<Self> {
        let file = File::open(path.as_ref())?;
        let archive = zip::ZipArchive::new(file)?;
        Ok(Self {
            archive: Mutex::new(archive),
        })
    }
}

impl AssetSource for ArchiveAssets {
    fn open(&self, name: &str) -> HatchResult<Vec<u8>> {
        let mut archive = lock(&self.archive);
        let mut entry = archive.by_name(name).map_err(|e| match e {
            zip::result::ZipError::FileNotFound => {
                HatchError::asset(format!("'{name}' not found in archive"))
            }
            other => other.into(),
        })?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// Files held in memory, for embedders that already unpacked a project.
#[derive(Default, Clone)]
pub struct MemoryAssets {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), bytes.into());
    }

    pub fn with(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }
}

impl AssetSource for MemoryAssets {
    fn open(&self, name: &str) -> HatchResult<Vec<u8>> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| HatchError::asset(format!("'{name}' not found")))
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ProjectJson {
    pub targets: Vec<TargetJson>,
}

impl ProjectJson {
    pub fn from_slice(bytes: &[u8]) -> HatchResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn load(assets: &dyn AssetSource) -> HatchResult<Self> {
        Self::from_slice(&assets.open(PROJECT_FILE)?)
    }

    pub fn stage(&self) -> HatchResult<&TargetJson> {
        let mut stages = self.targets.iter().filter(|t| t.is_stage);
        let stage = stages
            .next()
            .ok_or_else(|| HatchError::project("project has no stage target"))?;
        if stages.next().is_some() {
            return Err(HatchError::project("project has more than one stage target"));
        }
        Ok(stage)
    }

    /// Sprite targets in back-to-front layer order.
    pub fn sprites(&self) -> Vec<&TargetJson> {
        let mut sprites: Vec<_> = self.targets.iter().filter(|t| !t.is_stage).collect();
        sprites.sort_by_key(|t| t.layer_order);
        sprites
    }
}

fn default_size() -> f64 {
    100.0
}

fn default_direction() -> f64 {
    90.0
}

fn default_visible() -> bool {
    true
}

fn default_bitmap_resolution() -> f64 {
    1.0
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TargetJson {
    pub is_stage: bool,
    pub name: String,
    /// Variable id → `[name, initial value, (cloud flag)]`.
    #[serde(default)]
    pub variables: BTreeMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    pub blocks: BTreeMap<String, BlockEntry>,
    #[serde(default)]
    pub costumes: Vec<CostumeJson>,
    #[serde(default)]
    pub sounds: Vec<SoundJson>,
    #[serde(default)]
    pub current_costume: usize,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default = "default_size")]
    pub size: f64,
    #[serde(default = "default_direction")]
    pub direction: f64,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub layer_order: i64,
}

impl TargetJson {
    /// Declared variables as `(name, initial value)` pairs.
    pub fn variable_entries(&self) -> HatchResult<Vec<(String, serde_json::Value)>> {
        self.variables
            .iter()
            .map(|(id, entry)| match entry.as_slice() {
                [serde_json::Value::String(name), value, ..] => Ok((name.clone(), value.clone())),
                _ => Err(HatchError::project(format!(
                    "variable '{id}' in '{}' is malformed",
                    self.name
                ))),
            })
            .collect()
    }
}

/// Entries of the block table are either block records or loose primitives
/// (a variable reporter dropped on the canvas), which carry no behaviour.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum BlockEntry {
    Block(BlockRecord),
    Primitive(serde_json::Value),
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub opcode: String,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub top_level: bool,
    #[serde(default)]
    pub shadow: bool,
}

impl BlockRecord {
    /// First element of a field entry (`"KEY_OPTION": ["space", null]`).
    pub fn field_text(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            serde_json::Value::Array(items) => items.first().map(json_text),
            other => Some(json_text(other)),
        }
    }
}

pub(crate) fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CostumeJson {
    pub name: String,
    pub data_format: String,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub md5ext: Option<String>,
    #[serde(default)]
    pub rotation_center_x: f64,
    #[serde(default)]
    pub rotation_center_y: f64,
    #[serde(default = "default_bitmap_resolution")]
    pub bitmap_resolution: f64,
}

impl CostumeJson {
    pub fn asset_name(&self) -> HatchResult<String> {
        asset_name(&self.md5ext, &self.asset_id, &self.data_format, &self.name)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SoundJson {
    pub name: String,
    pub data_format: String,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub md5ext: Option<String>,
}

impl SoundJson {
    pub fn asset_name(&self) -> HatchResult<String> {
        asset_name(&self.md5ext, &self.asset_id, &self.data_format, &self.name)
    }
}

fn asset_name(
    md5ext: &Option<String>,
    asset_id: &Option<String>,
    data_format: &str,
    owner: &str,
) -> HatchResult<String> {
    if let Some(name) = md5ext {
        return Ok(name.clone());
    }
    asset_id
        .as_ref()
        .map(|id| format!("{id}.{data_format}"))
        .ok_or_else(|| HatchError::asset(format!("'{owner}' has no asset reference")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> serde_json::Value {
        serde_json::json!({
            "targets": [
                {
                    "isStage": false,
                    "name": "Cat",
                    "layerOrder": 2,
                    "variables": { "v1": ["speed", 4] },
                    "blocks": {
                        "a": {
                            "opcode": "event_whenflagclicked",
                            "next": null,
                            "parent": null,
                            "inputs": {},
                            "fields": {},
                            "topLevel": true,
                            "shadow": false
                        },
                        "loose": [12, "speed", "v1", 10, 10]
                    }
                },
                { "isStage": true, "name": "Stage", "variables": { "g": ["score", 0, true] } },
                { "isStage": false, "name": "Dog", "layerOrder": 1 }
            ]
        })
    }

    #[test]
    fn project_json_parses_targets_and_blocks() {
        let bytes = serde_json::to_vec(&sample()).expect("encode sample");
        let project = ProjectJson::from_slice(&bytes).expect("parse project");

        let stage = project.stage().expect("stage");
        assert_eq!(stage.name, "Stage");
        assert_eq!(
            stage.variable_entries().expect("vars"),
            vec![("score".to_string(), serde_json::json!(0))]
        );

        let names: Vec<_> = project.sprites().iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["Dog", "Cat"]);

        let cat = project.sprites()[1];
        assert!(matches!(cat.blocks.get("a"), Some(BlockEntry::Block(b)) if b.top_level));
        assert!(matches!(cat.blocks.get("loose"), Some(BlockEntry::Primitive(_))));
        assert_eq!(cat.size, 100.0);
        assert_eq!(cat.direction, 90.0);
        assert!(cat.visible);
    }

    #[test]
    fn missing_stage_is_a_project_error() {
        let project: ProjectJson = serde_json::from_value(serde_json::json!({
            "targets": [{ "isStage": false, "name": "Cat" }]
        }))
        .expect("parse");
        assert!(matches!(project.stage(), Err(HatchError::Project(_))));
    }

    #[test]
    fn memory_assets_report_missing_files() {
        let assets = MemoryAssets::new().with("a.wav", vec![1u8, 2, 3]);
        assert_eq!(assets.open("a.wav").expect("present"), vec![1, 2, 3]);
        assert!(matches!(assets.open("b.wav"), Err(HatchError::Asset(_))));
    }

    #[test]
    fn asset_name_falls_back_to_asset_id() {
        let costume: CostumeJson = serde_json::from_value(serde_json::json!({
            "name": "c1",
            "dataFormat": "png",
            "assetId": "abc"
        }))
        .expect("parse costume");
        assert_eq!(costume.asset_name().expect("name"), "abc.png");
        assert_eq!(costume.bitmap_resolution, 1.0);
    }

    #[test]
    fn field_text_reads_first_element() {
        let block: BlockRecord = serde_json::from_value(serde_json::json!({
            "opcode": "event_whenkeypressed",
            "fields": { "KEY_OPTION": ["space", null] }
        }))
        .expect("parse block");
        assert_eq!(block.field_text("KEY_OPTION").as_deref(), Some("space"));
        assert_eq!(block.field_text("MISSING"), None);
    }
}
