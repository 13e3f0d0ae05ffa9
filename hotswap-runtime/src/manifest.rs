//! On-disk module source: YAML / JSON documents under the source root.
//!
//! Each load re-reads and re-parses the file backing an identity and exports
//! a [`Factory<Document>`]. The live [`Document`] carries a revision counter
//! that survives reloads through its backup.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hotswap_core::{BackupState, ModuleId, Reloadable, Resolver};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RuntimeContext;
use crate::error::{io_err, RuntimeError};
use crate::loader::{Export, ModuleSource, SourceError};
use crate::preset::{self, Factory};
use crate::reference::Property;

/// Live object built from one document file.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: ModuleId,
    pub path: PathBuf,
    /// 1 on first load, +1 on every reload that carried a backup.
    pub revision: u64,
    pub body: Value,
}

#[derive(Serialize, Deserialize)]
struct DocumentBackup {
    revision: u64,
}

impl Reloadable for Document {
    fn backup(&self) -> Option<BackupState> {
        BackupState::encode(&DocumentBackup {
            revision: self.revision,
        })
        .ok()
    }
}

pub struct ManifestSource {
    resolver: Resolver,
}

impl ManifestSource {
    pub fn new(resolver: Resolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// First existing file backing `id`, in extension order.
    pub fn path_of(&self, id: &ModuleId) -> Option<PathBuf> {
        self.resolver
            .candidate_paths(id)
            .into_iter()
            .find(|path| path.is_file())
    }

    /// Every identity with a backing file under the root, sorted.
    pub fn discover(&self) -> Result<Vec<ModuleId>, RuntimeError> {
        let root = self.resolver.root();
        let mut ids = Vec::new();
        for file in collect_files(root)? {
            let has_extension = file
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| {
                    self.resolver
                        .extensions()
                        .iter()
                        .any(|known| known.eq_ignore_ascii_case(ext))
                })
                .unwrap_or(false);
            if !has_extension {
                continue;
            }
            match self.resolver.resolve_path(&file) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    tracing::debug!(path = %file.display(), error = %err, "skipping unresolvable file")
                }
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

impl ModuleSource for ManifestSource {
    fn load(&self, id: &ModuleId) -> Result<Export, SourceError> {
        let path = self
            .path_of(id)
            .ok_or_else(|| format!("no document for '{id}' under {}", self.resolver.root().display()))?;
        let body = parse_document(&path)?;

        let id = id.clone();
        let factory = Factory::new(move |backup: Option<BackupState>| {
            let revision = backup
                .and_then(|state| state.decode::<DocumentBackup>().ok())
                .map(|previous| previous.revision + 1)
                .unwrap_or(1);
            Arc::new(Document {
                id: id.clone(),
                path: path.clone(),
                revision,
                body: body.clone(),
            })
        });
        Ok(factory.into_export())
    }
}

fn parse_document(path: &Path) -> Result<Value, SourceError> {
    let contents = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let body = if is_json {
        serde_json::from_str(&contents)
            .map_err(|err| format!("{}: {err}", path.display()))?
    } else {
        serde_yaml::from_str(&contents)
            .map_err(|err| format!("{}: {err}", path.display()))?
    };
    Ok(body)
}

fn collect_files(root: &Path) -> Result<Vec<PathBuf>, RuntimeError> {
    let mut dirs = vec![root.to_path_buf()];
    let mut files = Vec::new();
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&current, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if ty.is_dir() {
                dirs.push(entry.path());
            } else if ty.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Documents mounted by `hotswap run`, one singleton property each.
#[derive(Default)]
pub struct DocumentSet {
    documents: BTreeMap<ModuleId, Property<Document>>,
}

impl DocumentSet {
    /// Load and bind every document under the source root.
    pub async fn mount(ctx: &RuntimeContext, source: &ManifestSource) -> Result<Self, RuntimeError> {
        let mut set = Self::default();
        for id in source.discover()? {
            set.mount_one(ctx, &id).await?;
        }
        tracing::info!(documents = set.len(), "documents mounted");
        Ok(set)
    }

    pub async fn mount_one(&mut self, ctx: &RuntimeContext, id: &ModuleId) -> Result<(), RuntimeError> {
        let property: Property<Document> = Property::new("documents", id.as_str());
        let document = preset::singleton(ctx, id.as_str(), &property).await?;
        tracing::debug!(module = %id, path = %document.path.display(), "document mounted");
        self.documents.insert(id.clone(), property);
        Ok(())
    }

    pub fn get(&self, id: &ModuleId) -> Option<Arc<Document>> {
        self.documents.get(id).and_then(Property::get)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// `(id, revision)` of every mounted document.
    pub fn revisions(&self) -> Vec<(ModuleId, u64)> {
        self.documents
            .iter()
            .filter_map(|(id, property)| property.get().map(|doc| (id.clone(), doc.revision)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write(root: &Path, relative: &str, contents: &str) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, contents).expect("write");
        path
    }

    #[test]
    fn discover_finds_documents_by_extension() {
        let root = TempDir::new().expect("root");
        write(root.path(), "commands/ping.yaml", "reply: pong\n");
        write(root.path(), "settings.json", "{\"prefix\": \"!\"}");
        write(root.path(), "notes.txt", "ignored");

        let source = ManifestSource::new(Resolver::new(root.path()));
        let ids = source.discover().expect("discover");
        assert_eq!(
            ids,
            vec![ModuleId::from("commands/ping"), ModuleId::from("settings")]
        );
    }

    #[test]
    fn load_parses_yaml_and_json() {
        let root = TempDir::new().expect("root");
        write(root.path(), "ping.yaml", "reply: pong\n");
        write(root.path(), "settings.json", "{\"prefix\": \"!\"}");
        let source = ManifestSource::new(Resolver::new(root.path()));

        let export = source.load(&ModuleId::from("ping")).expect("load yaml");
        let factory = export.downcast::<Factory<Document>>().expect("factory");
        let doc = factory.init(None);
        assert_eq!(doc.revision, 1);
        assert_eq!(doc.body["reply"], "pong");

        let export = source.load(&ModuleId::from("settings")).expect("load json");
        let doc = export.downcast::<Factory<Document>>().expect("factory").init(None);
        assert_eq!(doc.body["prefix"], "!");
    }

    #[test]
    fn revision_advances_through_backup() {
        let root = TempDir::new().expect("root");
        write(root.path(), "ping.yaml", "reply: pong\n");
        let source = ManifestSource::new(Resolver::new(root.path()));

        let factory = source
            .load(&ModuleId::from("ping"))
            .expect("load")
            .downcast::<Factory<Document>>()
            .expect("factory");
        let first = factory.init(None);
        let second = factory.init(first.backup());
        assert_eq!(second.revision, 2);
    }

    #[tokio::test]
    async fn mounted_documents_are_bound_singletons() {
        let root = TempDir::new().expect("root");
        write(root.path(), "commands/ping.yaml", "reply: pong\n");
        write(root.path(), "settings.json", "{\"prefix\": \"!\"}");
        let resolver = Resolver::new(root.path());
        let source = Arc::new(ManifestSource::new(resolver.clone()));
        let ctx = RuntimeContext::new(resolver, source.clone());

        let documents = DocumentSet::mount(&ctx, &source).await.expect("mount");

        assert_eq!(documents.len(), 2);
        assert_eq!(
            documents.revisions(),
            vec![(ModuleId::from("commands/ping"), 1), (ModuleId::from("settings"), 1)]
        );
        let ping = documents.get(&ModuleId::from("commands/ping")).expect("ping");
        assert_eq!(ping.body["reply"], "pong");
        assert!(ctx.references().is_bound(&ModuleId::from("settings")));
    }

    #[test]
    fn malformed_document_fails_with_path() {
        let root = TempDir::new().expect("root");
        write(root.path(), "broken.yaml", "reply: [unterminated\n");
        let source = ManifestSource::new(Resolver::new(root.path()));

        let err = source.load(&ModuleId::from("broken")).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"), "got: {err}");
    }

    #[test]
    fn missing_document_fails() {
        let root = TempDir::new().expect("root");
        let source = ManifestSource::new(Resolver::new(root.path()));
        let err = source.load(&ModuleId::from("ghost")).unwrap_err();
        assert!(err.to_string().contains("no document for 'ghost'"));
    }
}
