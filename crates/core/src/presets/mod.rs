use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{
    shader::{UniformKind, UniformValue},
    Result, VizError,
};

mod builtin;
mod storage;

pub use builtin::{builtin_presets, FULLSCREEN_VERTEX};
pub use storage::{JsonFileStorage, MemoryStorage, PresetStorage};

/// Vertex and fragment source of a preset, in WGSL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderPair {
    pub vertex: String,
    pub fragment: String,
}

/// How strongly each band drives the reserved audio uniforms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioResponse {
    pub bass_sensitivity: f32,
    pub mid_sensitivity: f32,
    pub high_sensitivity: f32,
}

impl AudioResponse {
    pub fn new(bass: f32, mid: f32, high: f32) -> Self {
        Self {
            bass_sensitivity: bass,
            mid_sensitivity: mid,
            high_sensitivity: high,
        }
    }
}

/// Declaration of one tunable shader parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawUniformDecl", into = "RawUniformDecl")]
pub struct UniformDecl {
    pub value: UniformValue,
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub step: Option<f32>,
}

impl UniformDecl {
    pub fn new(value: UniformValue) -> Self {
        Self {
            value,
            min: None,
            max: None,
            step: None,
        }
    }

    pub fn ranged(value: UniformValue, min: f32, max: f32) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            ..Self::new(value)
        }
    }

    pub fn kind(&self) -> UniformKind {
        self.value.kind()
    }

    /// Clamps `value` to the declared bounds; missing bounds do not clamp.
    pub fn clamp(&self, value: f32) -> f32 {
        let value = self.min.map_or(value, |min| value.max(min));
        self.max.map_or(value, |max| value.min(max))
    }
}

/// Wire shape of a uniform declaration: `{ "type", "value", "min"?, ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawUniformDecl {
    #[serde(rename = "type")]
    kind: UniformKind,
    value: RawValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    step: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Number(f32),
    List(Vec<f32>),
}

impl TryFrom<RawUniformDecl> for UniformDecl {
    type Error = String;

    fn try_from(raw: RawUniformDecl) -> std::result::Result<Self, Self::Error> {
        let components = match raw.value {
            RawValue::Number(value) => vec![value],
            RawValue::List(values) => values,
        };
        let value = UniformValue::from_components(raw.kind, &components).ok_or_else(|| {
            format!(
                "uniform of type {} needs {} component(s), got {}",
                raw.kind,
                raw.kind.components(),
                components.len()
            )
        })?;
        Ok(UniformDecl {
            value,
            min: raw.min,
            max: raw.max,
            step: raw.step,
        })
    }
}

impl From<UniformDecl> for RawUniformDecl {
    fn from(decl: UniformDecl) -> Self {
        let value = match decl.value {
            UniformValue::Scalar(value) => RawValue::Number(value),
            other => RawValue::List(other.components().to_vec()),
        };
        RawUniformDecl {
            kind: decl.value.kind(),
            value,
            min: decl.min,
            max: decl.max,
            step: decl.step,
        }
    }
}

/// A shareable visualization definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub author: String,
    pub shader: ShaderPair,
    #[serde(default)]
    pub uniforms: BTreeMap<String, UniformDecl>,
    pub audio_responsive: AudioResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Milliseconds since the Unix epoch. Built-ins use zero.
    #[serde(default)]
    pub created_at: i64,
}

/// Partial update applied by [`PresetStore::update`]. `None` keeps the
/// stored field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresetPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub shader: Option<ShaderPair>,
    pub uniforms: Option<BTreeMap<String, UniformDecl>>,
    pub audio_responsive: Option<AudioResponse>,
    pub thumbnail: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl PresetPatch {
    fn apply(self, mut preset: Preset) -> Preset {
        if let Some(name) = self.name {
            preset.name = name;
        }
        if let Some(description) = self.description {
            preset.description = Some(description);
        }
        if let Some(author) = self.author {
            preset.author = author;
        }
        if let Some(shader) = self.shader {
            preset.shader = shader;
        }
        if let Some(uniforms) = self.uniforms {
            preset.uniforms = uniforms;
        }
        if let Some(audio) = self.audio_responsive {
            preset.audio_responsive = audio;
        }
        if let Some(thumbnail) = self.thumbnail {
            preset.thumbnail = Some(thumbnail);
        }
        if let Some(tags) = self.tags {
            preset.tags = tags;
        }
        preset
    }
}

/// Owner of the preset catalog and of the active selection.
///
/// Every mutation rewrites the whole catalog to the storage collaborator.
/// Storage failures are logged and never undo the in-memory change.
///
/// Each mutated preset is stamped with a fresh revision, so an unchanged
/// `(id, revision)` pair means an unchanged preset.
pub struct PresetStore {
    presets: HashMap<String, Preset>,
    revisions: HashMap<String, u64>,
    next_revision: u64,
    active: Option<String>,
    storage: Box<dyn PresetStorage>,
}

impl PresetStore {
    /// Builds the catalog from the built-ins overlaid with whatever the
    /// storage holds.
    pub fn new(storage: impl PresetStorage + 'static) -> Self {
        let mut presets: HashMap<String, Preset> = builtin_presets()
            .into_iter()
            .map(|preset| (preset.id.clone(), preset))
            .collect();

        for (id, mut preset) in load_stored(&storage) {
            if preset.id != id {
                tracing::warn!(key = %id, id = %preset.id, "stored preset id differs from its key");
                preset.id = id.clone();
            }
            presets.insert(id, preset);
        }

        Self {
            presets,
            revisions: HashMap::new(),
            next_revision: 1,
            active: None,
            storage: Box::new(storage),
        }
    }

    /// Store holding only the built-ins, persisted in memory.
    pub fn with_builtins() -> Self {
        Self::new(MemoryStorage::new())
    }

    /// All presets, sorted by name for stable presentation.
    pub fn list(&self) -> Vec<&Preset> {
        let mut presets: Vec<&Preset> = self.presets.values().collect();
        presets.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        presets
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn get(&self, id: &str) -> Result<&Preset> {
        self.presets
            .get(id)
            .ok_or_else(|| VizError::NotFound(id.to_string()))
    }

    /// Marks `id` as active. Does not touch GPU state.
    pub fn select(&mut self, id: &str) -> Result<()> {
        if !self.presets.contains_key(id) {
            return Err(VizError::NotFound(id.to_string()));
        }
        self.active = Some(id.to_string());
        Ok(())
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&Preset> {
        self.active.as_ref().and_then(|id| self.presets.get(id))
    }

    /// Revision of `id`; it changes whenever that preset is added or updated.
    pub fn revision(&self, id: &str) -> Option<u64> {
        self.presets
            .contains_key(id)
            .then(|| self.revisions.get(id).copied().unwrap_or(0))
    }

    /// The active preset with its revision.
    pub fn active_revision(&self) -> Option<(&Preset, u64)> {
        let preset = self.active()?;
        Some((preset, self.revision(&preset.id)?))
    }

    fn bump(&mut self, id: &str) {
        self.revisions.insert(id.to_string(), self.next_revision);
        self.next_revision += 1;
    }

    /// Inserts `preset`, replacing any preset with the same id.
    pub fn add(&mut self, mut preset: Preset) -> Result<()> {
        if preset.id.trim().is_empty() {
            return Err(VizError::invalid("preset id must not be empty"));
        }
        if preset.created_at == 0 {
            preset.created_at = chrono::Utc::now().timestamp_millis();
        }
        self.bump(&preset.id);
        self.presets.insert(preset.id.clone(), preset);
        self.persist();
        Ok(())
    }

    pub fn update(&mut self, id: &str, patch: PresetPatch) -> Result<&Preset> {
        let current = self
            .presets
            .remove(id)
            .ok_or_else(|| VizError::NotFound(id.to_string()))?;
        self.presets.insert(id.to_string(), patch.apply(current));
        self.bump(id);
        self.persist();
        self.get(id)
    }

    /// Removes `id`; removing the active preset clears the selection.
    pub fn remove(&mut self, id: &str) -> Result<Preset> {
        let removed = self
            .presets
            .remove(id)
            .ok_or_else(|| VizError::NotFound(id.to_string()))?;
        self.revisions.remove(id);
        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
        self.persist();
        Ok(removed)
    }

    fn persist(&mut self) {
        let catalog: BTreeMap<&str, &Preset> = self
            .presets
            .iter()
            .map(|(id, preset)| (id.as_str(), preset))
            .collect();
        let result = serde_json::to_string(&catalog)
            .map_err(VizError::from)
            .and_then(|blob| self.storage.save(&blob));
        if let Err(err) = result {
            tracing::warn!(%err, "failed to persist preset catalog");
        }
    }
}

fn load_stored(storage: &dyn PresetStorage) -> HashMap<String, Preset> {
    let blob = match storage.load() {
        Ok(Some(blob)) => blob,
        Ok(None) => return HashMap::new(),
        Err(err) => {
            tracing::warn!(%err, "failed to read stored presets");
            return HashMap::new();
        }
    };
    match serde_json::from_str(&blob) {
        Ok(presets) => presets,
        Err(err) => {
            tracing::warn!(%err, "stored preset catalog is malformed, ignoring it");
            HashMap::new()
        }
    }
}

impl std::fmt::Debug for PresetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresetStore")
            .field("presets", &self.presets.len())
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStorage;

    impl PresetStorage for BrokenStorage {
        fn load(&self) -> Result<Option<String>> {
            Err(VizError::msg("disk on fire"))
        }

        fn save(&mut self, _blob: &str) -> Result<()> {
            Err(VizError::msg("disk on fire"))
        }
    }

    fn custom(id: &str) -> Preset {
        let mut preset = builtin_presets().remove(0);
        preset.id = id.into();
        preset.name = format!("Custom {id}");
        preset
    }

    #[test]
    fn starts_with_builtins() {
        let store = PresetStore::with_builtins();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("bass-gradient").unwrap().name, "Bass Gradient");
        assert!(store.active().is_none());
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let mut store = PresetStore::with_builtins();
        assert!(matches!(store.get("nope"), Err(VizError::NotFound(_))));
        assert!(matches!(store.select("nope"), Err(VizError::NotFound(_))));
        assert!(matches!(
            store.update("nope", PresetPatch::default()),
            Err(VizError::NotFound(_))
        ));
        assert!(matches!(store.remove("nope"), Err(VizError::NotFound(_))));
    }

    #[test]
    fn removing_active_preset_clears_selection() {
        let mut store = PresetStore::with_builtins();
        store.select("noise-pattern").unwrap();
        assert_eq!(store.active_id(), Some("noise-pattern"));

        store.remove("noise-pattern").unwrap();
        assert_eq!(store.active_id(), None);
        assert!(store.active().is_none());
    }

    #[test]
    fn mutations_persist_whole_catalog() {
        let storage = MemoryStorage::new();
        let mut store = PresetStore::new(storage.clone());
        store.add(custom("mine")).unwrap();

        let blob = storage.snapshot().unwrap();
        let stored: HashMap<String, Preset> = serde_json::from_str(&blob).unwrap();
        assert_eq!(stored.len(), 4);
        assert!(stored["mine"].created_at > 0);

        let reopened = PresetStore::new(storage);
        assert_eq!(reopened.get("mine").unwrap().name, "Custom mine");
    }

    #[test]
    fn revisions_track_changes_per_preset() {
        let mut store = PresetStore::with_builtins();
        let gradient = store.revision("bass-gradient").unwrap();
        let noise = store.revision("noise-pattern").unwrap();

        store
            .update("bass-gradient", PresetPatch {
                name: Some("Renamed".into()),
                ..Default::default()
            })
            .unwrap();
        assert_ne!(store.revision("bass-gradient"), Some(gradient));
        assert_eq!(store.revision("noise-pattern"), Some(noise));

        store.select("noise-pattern").unwrap();
        let (active, revision) = store.active_revision().unwrap();
        assert_eq!((active.id.as_str(), revision), ("noise-pattern", noise));

        store.remove("noise-pattern").unwrap();
        assert_eq!(store.revision("noise-pattern"), None);
        store.add(custom("noise-pattern")).unwrap();
        assert_ne!(store.revision("noise-pattern"), Some(noise));
    }

    #[test]
    fn update_replaces_only_patched_fields() {
        let mut store = PresetStore::with_builtins();
        let patch = PresetPatch {
            name: Some("Louder".into()),
            audio_responsive: Some(AudioResponse::new(2.0, 1.0, 1.0)),
            ..Default::default()
        };
        let updated = store.update("bass-gradient", patch).unwrap();
        assert_eq!(updated.name, "Louder");
        assert_eq!(updated.audio_responsive.bass_sensitivity, 2.0);
        assert_eq!(updated.author, "VisuaLive");
    }

    #[test]
    fn storage_failures_do_not_block_the_catalog() {
        let mut store = PresetStore::new(BrokenStorage);
        assert_eq!(store.len(), 3);
        store.add(custom("kept")).unwrap();
        assert!(store.get("kept").is_ok());
    }

    #[test]
    fn malformed_blob_is_treated_as_empty() {
        let store = PresetStore::new(MemoryStorage::with_blob("not json"));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn uniform_declarations_use_the_wire_shape() {
        let json = r#"{
            "intensity": { "type": "float", "value": 0.5, "min": 0, "max": 1 },
            "tint": { "type": "vec3", "value": [1, 0.5, 0] }
        }"#;
        let uniforms: BTreeMap<String, UniformDecl> = serde_json::from_str(json).unwrap();
        assert_eq!(uniforms["intensity"].value, UniformValue::Scalar(0.5));
        assert_eq!(uniforms["intensity"].clamp(3.0), 1.0);
        assert_eq!(uniforms["tint"].value, UniformValue::Vec3([1.0, 0.5, 0.0]));
        assert_eq!(uniforms["tint"].clamp(-4.0), -4.0);

        let encoded = serde_json::to_value(&uniforms["intensity"]).unwrap();
        assert_eq!(encoded["type"], "float");
        assert_eq!(encoded["value"], 0.5);
    }

    #[test]
    fn mismatched_uniform_arity_is_rejected() {
        let json = r#"{ "type": "vec2", "value": [1, 2, 3] }"#;
        assert!(serde_json::from_str::<UniformDecl>(json).is_err());
        let json = r#"{ "type": "mat4", "value": 1 }"#;
        assert!(serde_json::from_str::<UniformDecl>(json).is_err());
    }

    #[test]
    fn presets_serialize_with_camel_case_keys() {
        let preset = builtin_presets().remove(0);
        let value = serde_json::to_value(&preset).unwrap();
        assert!(value.get("audioResponsive").is_some());
        assert_eq!(value["audioResponsive"]["bassSensitivity"], 1.0);
        assert!(value.get("createdAt").is_some());
    }
}
