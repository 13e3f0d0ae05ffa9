//! Specifier → [`ModuleId`] canonicalization.
//!
//! A specifier may be a relative path (`./commands/ping.yaml`,
//! `commands\ping`), an identity that was already resolved (`commands/ping`),
//! or an absolute path under the source root, as delivered by the watcher.
//! All of them collapse to the same identity:
//!
//! ```text
//! <root>/commands/ping.yaml  ─┐
//! ./commands/ping            ─┼─► commands/ping
//! commands\ping.yml          ─┘
//! ```

use std::path::{Path, PathBuf};

use crate::error::ResolveError;
use crate::types::ModuleId;

pub const DEFAULT_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

#[derive(Debug, Clone)]
pub struct Resolver {
    /// Root as configured.
    root: PathBuf,
    /// Root after `fs::canonicalize`; watcher events arrive as real paths
    /// (e.g. `/private/var/...` on macOS).
    canonical_root: PathBuf,
    extensions: Vec<String>,
}

impl Resolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let canonical_root = std::fs::canonicalize(&root).unwrap_or_else(|_| root.clone());
        Self {
            root,
            canonical_root,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Replace the set of extensions stripped from the final segment.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.canonical_root
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Canonicalize a specifier. Deterministic and idempotent:
    /// `resolve(resolve(x)) == resolve(x)`.
    pub fn resolve(&self, specifier: &str) -> Result<ModuleId, ResolveError> {
        let trimmed = specifier.trim();
        if trimmed.is_empty() {
            return Err(ResolveError::Empty);
        }

        let normalized = trimmed.replace('\\', "/");
        let relative = if is_absolute(&normalized) {
            self.strip_root(&normalized)
                .ok_or_else(|| self.outside(specifier))?
        } else {
            normalized
        };

        let mut segments: Vec<&str> = Vec::new();
        for segment in relative.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    if segments.pop().is_none() {
                        return Err(self.outside(specifier));
                    }
                }
                other => segments.push(other),
            }
        }

        let Some(last) = segments.pop() else {
            return Err(ResolveError::Empty);
        };
        let stem = self.strip_extensions(last);
        if stem.is_empty() {
            return Err(ResolveError::Empty);
        }
        segments.push(stem);
        Ok(ModuleId(segments.join("/")))
    }

    /// Canonicalize a filesystem path (usually absolute, from the watcher).
    pub fn resolve_path(&self, path: &Path) -> Result<ModuleId, ResolveError> {
        self.resolve(&path.to_string_lossy())
    }

    /// Candidate files backing `id`, one per configured extension, in order.
    pub fn candidate_paths(&self, id: &ModuleId) -> Vec<PathBuf> {
        let base = id
            .as_str()
            .split('/')
            .fold(self.canonical_root.clone(), |acc, part| acc.join(part));
        self.extensions
            .iter()
            .map(|ext| {
                let mut file = base.clone().into_os_string();
                file.push(".");
                file.push(ext);
                PathBuf::from(file)
            })
            .collect()
    }

    fn strip_root(&self, absolute: &str) -> Option<String> {
        [&self.canonical_root, &self.root].into_iter().find_map(|root| {
            let root = root.to_string_lossy().replace('\\', "/");
            let root = root.trim_end_matches('/');
            let rest = absolute.strip_prefix(root)?;
            // `/srv/modules-old` must not match root `/srv/modules`.
            if rest.is_empty() || rest.starts_with('/') {
                Some(rest.to_string())
            } else {
                None
            }
        })
    }

    fn strip_extensions<'a>(&self, mut name: &'a str) -> &'a str {
        loop {
            let Some((stem, ext)) = name.rsplit_once('.') else {
                return name;
            };
            if stem.is_empty() || !self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
                return name;
            }
            name = stem;
        }
    }

    fn outside(&self, specifier: &str) -> ResolveError {
        ResolveError::OutsideRoot {
            specifier: specifier.to_string(),
            root: self.canonical_root.clone(),
        }
    }
}

fn is_absolute(normalized: &str) -> bool {
    if normalized.starts_with('/') {
        return true;
    }
    // Windows drive prefix, e.g. `C:/modules/...` after separator normalization.
    let bytes = normalized.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> Resolver {
        Resolver::new("/srv/bot/modules")
    }

    #[test]
    fn strips_only_known_extensions() {
        let r = resolver();
        assert_eq!(r.resolve("release.v2").unwrap().as_str(), "release.v2");
        assert_eq!(r.resolve("ping.json").unwrap().as_str(), "ping");
        assert_eq!(r.resolve("ping.yaml.yml").unwrap().as_str(), "ping");
    }

    #[test]
    fn sibling_directory_is_not_under_root() {
        let err = resolver().resolve("/srv/bot/modules-old/ping.yaml").unwrap_err();
        assert!(matches!(err, ResolveError::OutsideRoot { .. }));
    }

    #[test]
    fn parent_segments_cannot_escape_root() {
        let err = resolver().resolve("../secrets.yaml").unwrap_err();
        assert!(matches!(err, ResolveError::OutsideRoot { .. }));
        assert_eq!(
            resolver().resolve("commands/../ping").unwrap().as_str(),
            "ping"
        );
    }

    #[test]
    fn candidate_paths_follow_extension_order() {
        let r = resolver().with_extensions([".json", "yaml"]);
        let candidates = r.candidate_paths(&ModuleId::from("commands/ping"));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/srv/bot/modules/commands/ping.json"),
                PathBuf::from("/srv/bot/modules/commands/ping.yaml"),
            ]
        );
    }
}
