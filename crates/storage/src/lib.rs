//! Project persistence: versioned save format and load-boundary checks.
//!
//! A project file is a JSON envelope carrying the open documents (with
//! their original PDF payloads), every markup and measurement link, the
//! product catalog, and the scale/snap settings. Loading validates the
//! whole file before anything is handed to the engine; a malformed project
//! is rejected with a descriptive reason and no partial state escapes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use directories::ProjectDirs;
use planmark_core::links::{LinkId, LinkedMeasurement, MeasurementLinkGraph, ProductCatalog};
use planmark_core::markup::{Markup, MarkupId};
use planmark_core::scale::ScaleCalibration;
use planmark_core::snapping::SnapConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const PROJECT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unsupported project version {found} (expected {PROJECT_SCHEMA_VERSION})")]
    UnsupportedVersion { found: u32 },
    #[error("invalid project: {0}")]
    Invalid(String),
}

/// One document inside a project file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDocument {
    pub id: Uuid,
    pub name: String,
    /// Original PDF bytes, base64-encoded for the JSON envelope.
    pub native_pdf_base64: String,
    pub pages: u32,
    pub current_page: u32,
    pub zoom: f32,
    /// Fixed base render scale the markup geometry is anchored to.
    pub base_scale: f32,
    pub markups: Vec<Markup>,
    pub measurements: Vec<LinkedMeasurement>,
}

impl ProjectDocument {
    pub fn new(id: Uuid, name: impl Into<String>, pdf_bytes: &[u8], pages: u32) -> Self {
        Self {
            id,
            name: name.into(),
            native_pdf_base64: BASE64.encode(pdf_bytes),
            pages,
            current_page: 1,
            zoom: 1.0,
            base_scale: 1.0,
            markups: Vec::new(),
            measurements: Vec::new(),
        }
    }

    /// Decode the original PDF payload.
    pub fn pdf_bytes(&self) -> Result<Vec<u8>, StorageError> {
        BASE64
            .decode(&self.native_pdf_base64)
            .map_err(|e| StorageError::Invalid(format!("document {}: bad PDF payload: {e}", self.id)))
    }

    /// Markups grouped by page, in stored order.
    pub fn markups_by_page(&self) -> BTreeMap<u32, Vec<Markup>> {
        let mut map: BTreeMap<u32, Vec<Markup>> = BTreeMap::new();
        for markup in &self.markups {
            map.entry(markup.page).or_default().push(markup.clone());
        }
        map
    }
}

/// Project-wide settings persisted alongside the documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub scale: ScaleCalibration,
    pub snap: SnapConfig,
}

/// The versioned project envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    pub version: u32,
    pub name: String,
    pub created_at: i64,
    pub modified_at: i64,
    pub documents: Vec<ProjectDocument>,
    pub products: ProductCatalog,
    pub settings: ProjectSettings,
}

impl ProjectFile {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_unix();
        Self {
            version: PROJECT_SCHEMA_VERSION,
            name: name.into(),
            created_at: now,
            modified_at: now,
            documents: Vec::new(),
            products: ProductCatalog::new(),
            settings: ProjectSettings::default(),
        }
    }

    pub fn touch(&mut self) {
        self.modified_at = now_unix();
    }
}

/// A validated project plus the structures re-derived at load time.
#[derive(Debug)]
pub struct LoadedProject {
    pub project: ProjectFile,
    /// Link graph per document, rebuilt with fresh link ids.
    pub link_graphs: HashMap<Uuid, MeasurementLinkGraph>,
    /// Old link id to re-derived link id, across all documents.
    pub link_id_remap: HashMap<LinkId, LinkId>,
}

/// Save a project file atomically (temp file + rename).
pub fn save_project(path: &Path, project: &ProjectFile) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_vec_pretty(project)?;
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, &json)?;
    fs::rename(&temp_path, path)?;
    debug!(path = %path.display(), bytes = json.len(), "project saved");
    Ok(())
}

/// Load and validate a project file.
pub fn load_project(path: &Path) -> Result<LoadedProject, StorageError> {
    let bytes = fs::read(path)?;
    load_project_slice(&bytes)
}

/// Load and validate a project from raw bytes.
pub fn load_project_slice(bytes: &[u8]) -> Result<LoadedProject, StorageError> {
    let project: ProjectFile = serde_json::from_slice(bytes)?;

    if project.version != PROJECT_SCHEMA_VERSION {
        return Err(StorageError::UnsupportedVersion { found: project.version });
    }

    let mut link_graphs = HashMap::new();
    let mut link_id_remap = HashMap::new();

    for document in &project.documents {
        validate_document(document)?;

        let (graph, remap) = MeasurementLinkGraph::from_records(document.measurements.clone());
        link_graphs.insert(document.id, graph);
        link_id_remap.extend(remap);
    }

    Ok(LoadedProject { project, link_graphs, link_id_remap })
}

fn validate_document(document: &ProjectDocument) -> Result<(), StorageError> {
    let id = document.id;
    if document.pages == 0 {
        return Err(StorageError::Invalid(format!("document {id}: page count is zero")));
    }
    if document.current_page == 0 || document.current_page > document.pages {
        return Err(StorageError::Invalid(format!(
            "document {id}: current page {} outside 1..={}",
            document.current_page, document.pages
        )));
    }
    if document.zoom <= 0.0 {
        return Err(StorageError::Invalid(format!("document {id}: zoom must be positive")));
    }
    if document.base_scale <= 0.0 {
        return Err(StorageError::Invalid(format!("document {id}: base scale must be positive")));
    }

    // Decode eagerly so a corrupt payload is caught at the load boundary.
    document.pdf_bytes()?;

    let mut markup_ids: HashSet<MarkupId> = HashSet::with_capacity(document.markups.len());
    for markup in &document.markups {
        if markup.page == 0 || markup.page > document.pages {
            return Err(StorageError::Invalid(format!(
                "document {id}: markup {} targets page {} outside 1..={}",
                markup.id, markup.page, document.pages
            )));
        }
        if !markup_ids.insert(markup.id) {
            return Err(StorageError::Invalid(format!(
                "document {id}: duplicate markup id {}",
                markup.id
            )));
        }
    }

    for measurement in &document.measurements {
        if !markup_ids.contains(&measurement.markup_id) {
            return Err(StorageError::Invalid(format!(
                "document {id}: measurement {} references unknown markup {}",
                measurement.id, measurement.markup_id
            )));
        }
        if measurement.page == 0 || measurement.page > document.pages {
            return Err(StorageError::Invalid(format!(
                "document {id}: measurement {} targets page {} outside 1..={}",
                measurement.id, measurement.page, document.pages
            )));
        }
    }

    Ok(())
}

/// Filesystem root for project files.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    pub fn from_default_location() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("dev", "Planmark", "Planmark")
            .ok_or(StorageError::NoDataDirectory)?;
        Ok(Self { root: dirs.data_local_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.planmark.json"))
    }

    pub fn save(&self, project: &ProjectFile) -> Result<PathBuf, StorageError> {
        let path = self.project_path(&project.name);
        save_project(&path, project)?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<LoadedProject, StorageError> {
        load_project(&self.project_path(name))
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use planmark_core::geometry::PagePoint;
    use planmark_core::links::{MeasurementInput, MeasurementKind, ProductId};
    use planmark_core::markup::{MarkupShape, MarkupStyle};

    fn sample_markup(page: u32) -> Markup {
        Markup::new(
            page,
            MarkupShape::CountMarker { position: PagePoint::new(25.0, 30.0), number: 1 },
            MarkupStyle::new(),
        )
    }

    fn sample_project() -> ProjectFile {
        let mut project = ProjectFile::new("riverside-tower");
        let mut document =
            ProjectDocument::new(Uuid::new_v4(), "plans.pdf", b"%PDF-1.5 sample", 3);
        document.base_scale = 2.0;

        let markup = sample_markup(2);
        let product = project.products.add_root("Fixtures", "ea");

        let mut graph = MeasurementLinkGraph::new();
        graph.link(
            product,
            MeasurementInput {
                markup_id: markup.id,
                document_id: document.id,
                page: 2,
                kind: MeasurementKind::Count,
                value: 3.0,
                unit: "ea".into(),
                group_id: None,
                group_label: None,
            },
        );

        document.measurements = graph.records().into_iter().cloned().collect();
        document.markups.push(markup);
        project.documents.push(document);
        project.settings.scale = ScaleCalibration::manual(15.0, "ft");
        project
    }

    #[test]
    fn test_round_trip_preserves_everything() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("project.planmark.json");
        let project = sample_project();

        save_project(&path, &project).expect("save succeeds");
        let loaded = load_project(&path).expect("load succeeds");

        // Geometry, settings, and payload survive byte-for-byte.
        assert_eq!(loaded.project.name, project.name);
        assert_eq!(loaded.project.documents[0].markups, project.documents[0].markups);
        assert_eq!(loaded.project.settings, project.settings);
        assert_eq!(
            loaded.project.documents[0].pdf_bytes().unwrap(),
            b"%PDF-1.5 sample".to_vec()
        );

        // Links are re-derived through the id remap table but keep their
        // associations and values.
        let document = &project.documents[0];
        let graph = &loaded.link_graphs[&document.id];
        let old = &document.measurements[0];
        let restored = graph.get_by_markup(old.markup_id).expect("link restored");
        assert_eq!(restored.product_id, old.product_id);
        assert_eq!(restored.value, old.value);
        assert_eq!(loaded.link_id_remap[&old.id], restored.id);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut project = sample_project();
        project.version = 99;
        let bytes = serde_json::to_vec(&project).unwrap();

        assert!(matches!(
            load_project_slice(&bytes),
            Err(StorageError::UnsupportedVersion { found: 99 })
        ));
    }

    #[test]
    fn test_markup_page_out_of_range_rejected() {
        let mut project = sample_project();
        project.documents[0].markups.push(sample_markup(9));
        let bytes = serde_json::to_vec(&project).unwrap();

        match load_project_slice(&bytes) {
            Err(StorageError::Invalid(reason)) => assert!(reason.contains("page 9")),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_orphan_measurement_rejected() {
        let mut project = sample_project();
        project.documents[0].measurements[0].markup_id = Uuid::new_v4();
        let bytes = serde_json::to_vec(&project).unwrap();

        match load_project_slice(&bytes) {
            Err(StorageError::Invalid(reason)) => {
                assert!(reason.contains("unknown markup"))
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_markup_ids_rejected() {
        let mut project = sample_project();
        let duplicate = project.documents[0].markups[0].clone();
        project.documents[0].markups.push(duplicate);
        let bytes = serde_json::to_vec(&project).unwrap();

        assert!(matches!(load_project_slice(&bytes), Err(StorageError::Invalid(_))));
    }

    #[test]
    fn test_corrupt_pdf_payload_rejected() {
        let mut project = sample_project();
        project.documents[0].native_pdf_base64 = "!!!not base64!!!".into();
        let bytes = serde_json::to_vec(&project).unwrap();

        assert!(matches!(load_project_slice(&bytes), Err(StorageError::Invalid(_))));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            load_project_slice(b"{\"version\": "),
            Err(StorageError::Serde(_))
        ));
    }

    #[test]
    fn test_store_save_and_load() {
        let temp = tempfile::tempdir().expect("temp dir");
        let store = ProjectStore::with_root(temp.path());
        let project = sample_project();

        let path = store.save(&project).expect("save succeeds");
        assert!(path.ends_with("riverside-tower.planmark.json"));

        let loaded = store.load("riverside-tower").expect("load succeeds");
        assert_eq!(loaded.project.documents.len(), 1);
    }
}
