//! Local document repository.
//!
//! On-disk layout, under the repository root:
//!
//! ```text
//! repository/
//!   types/types.json     # document type definitions
//!   docs/index.json      # document metadata index
//!   docs/<doc_id>.pdf    # stored files
//! ```
//!
//! Read-mostly; writes rewrite the whole index behind a temp-file rename so
//! concurrent readers never observe a torn file.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use docket_types::{Document, DocumentType};

pub const TYPES_FILE: &str = "types/types.json";
pub const INDEX_FILE: &str = "docs/index.json";

/// Handle on a repository root.
#[derive(Debug, Clone)]
pub struct RepoStore {
    root: PathBuf,
}

impl RepoStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn types_path(&self) -> PathBuf {
        self.root.join(TYPES_FILE)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Load the document type definitions. Missing file = empty catalog.
    pub fn load_types(&self) -> Result<Vec<DocumentType>> {
        load_json_list(&self.types_path())
    }

    pub fn save_types(&self, types: &[DocumentType]) -> Result<()> {
        save_json_atomic(&self.types_path(), types)
    }

    /// Load the document index. Missing file = empty repository.
    pub fn load_docs(&self) -> Result<Vec<Document>> {
        load_json_list(&self.index_path())
    }

    pub fn save_docs(&self, docs: &[Document]) -> Result<()> {
        save_json_atomic(&self.index_path(), docs)
    }

    /// Insert or replace a document by `doc_id`, rewriting the index.
    pub fn upsert_doc(&self, doc: Document) -> Result<()> {
        let mut docs = self.load_docs()?;
        match docs.iter_mut().find(|d| d.doc_id == doc.doc_id) {
            Some(existing) => *existing = doc,
            None => docs.push(doc),
        }
        self.save_docs(&docs)
    }

    /// Absolute path of a document's stored file, if it has one. Relative
    /// stored paths are resolved against the repository root.
    pub fn resolve_stored_path(&self, doc: &Document) -> Option<PathBuf> {
        let stored = doc.stored_path.as_ref()?;
        if stored.is_absolute() {
            Some(stored.clone())
        } else {
            Some(self.root.join(stored))
        }
    }

    /// Whether the document's stored file exists on disk.
    pub fn has_stored_file(&self, doc: &Document) -> bool {
        self.resolve_stored_path(doc)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Whether `path` stays inside the repository root without escaping
    /// through `..` components. Force-uploaded files must pass this.
    pub fn path_is_under_root(&self, path: &Path) -> bool {
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        if full
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return false;
        }
        full.starts_with(&self.root)
    }
}

fn load_json_list<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse JSON from {}", path.display()))
}

fn save_json_atomic<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create dir {}", parent.display()))?;
    }

    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(value).context("failed to serialize to JSON")?;
    fs::write(&tmp_path, json)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_types::{SubjectScope, ValidityPolicy, ValidityStartMode};
    use tempfile::tempdir;

    fn sample_type(type_id: &str) -> DocumentType {
        DocumentType {
            type_id: type_id.to_string(),
            name: format!("Type {type_id}"),
            scope: SubjectScope::Company,
            platform_aliases: vec!["Recibo SS".to_string()],
            required_fields: Vec::new(),
            issue_date_required: false,
            validity_start_mode: ValidityStartMode::IssueDate,
            validity_policy: ValidityPolicy::default(),
        }
    }

    fn sample_doc(doc_id: &str, stored: Option<&str>) -> Document {
        Document {
            doc_id: doc_id.to_string(),
            type_id: "T1".to_string(),
            company_key: Some("ACME".to_string()),
            person_key: None,
            period_key: Some("2026-01".to_string()),
            extracted: Default::default(),
            issued_at: None,
            stored_path: stored.map(PathBuf::from),
            status: Default::default(),
            validity_override: None,
        }
    }

    #[test]
    fn empty_repository_loads_empty_lists() {
        let td = tempdir().expect("tempdir");
        let store = RepoStore::new(td.path());
        assert!(store.load_types().expect("types").is_empty());
        assert!(store.load_docs().expect("docs").is_empty());
    }

    #[test]
    fn types_roundtrip() {
        let td = tempdir().expect("tempdir");
        let store = RepoStore::new(td.path());

        store
            .save_types(&[sample_type("T1"), sample_type("T2")])
            .expect("save");
        let types = store.load_types().expect("load");
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].type_id, "T1");
    }

    #[test]
    fn upsert_replaces_by_doc_id() {
        let td = tempdir().expect("tempdir");
        let store = RepoStore::new(td.path());

        store.upsert_doc(sample_doc("D1", None)).expect("insert");
        let mut updated = sample_doc("D1", None);
        updated.period_key = Some("2026-02".to_string());
        store.upsert_doc(updated).expect("replace");
        store.upsert_doc(sample_doc("D2", None)).expect("insert");

        let docs = store.load_docs().expect("load");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].period_key.as_deref(), Some("2026-02"));
    }

    #[test]
    fn stored_path_resolution_and_existence() {
        let td = tempdir().expect("tempdir");
        let store = RepoStore::new(td.path());

        let rel = sample_doc("D1", Some("docs/D1.pdf"));
        let resolved = store.resolve_stored_path(&rel).expect("path");
        assert!(resolved.starts_with(td.path()));
        assert!(!store.has_stored_file(&rel));

        fs::create_dir_all(td.path().join("docs")).expect("mkdir");
        fs::write(td.path().join("docs/D1.pdf"), b"%PDF-").expect("write");
        assert!(store.has_stored_file(&rel));

        let no_file = sample_doc("D2", None);
        assert_eq!(store.resolve_stored_path(&no_file), None);
        assert!(!store.has_stored_file(&no_file));
    }

    #[test]
    fn path_containment_rejects_escapes() {
        let td = tempdir().expect("tempdir");
        let store = RepoStore::new(td.path());

        assert!(store.path_is_under_root(Path::new("docs/file.pdf")));
        assert!(store.path_is_under_root(&td.path().join("docs/file.pdf")));
        assert!(!store.path_is_under_root(Path::new("../outside.pdf")));
        assert!(!store.path_is_under_root(Path::new("/etc/passwd")));
        assert!(!store.path_is_under_root(&td.path().join("docs/../../outside.pdf")));
    }

    #[test]
    fn save_is_atomic_against_partial_files() {
        let td = tempdir().expect("tempdir");
        let store = RepoStore::new(td.path());

        store.save_docs(&[sample_doc("D1", None)]).expect("save");
        // No temp leftovers once the save completes.
        assert!(!store.index_path().with_extension("tmp").exists());
        assert!(store.index_path().exists());
    }
}
