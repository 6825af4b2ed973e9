//! Rule-document persistence seam (spec §1, §6, §11.5). The engine only
//! needs a read path; writing rule documents back to storage is an
//! external collaborator's job (spec §1 Deliberately out of scope).

use std::path::{Path, PathBuf};

use crate::error::{FingerprintError, Result};

use super::model::RuleDocument;

/// The column shape spec §6 names for a KV-backed catalog:
/// `Name/Version/Categories/Tags/Info(JSON)/Method/Path/MatchersCondition/Matchers(JSON)`.
/// A real database-backed implementation is out of scope per spec §1 and
/// is not stubbed here — only the trait and a filesystem implementation
/// ship.
#[async_trait::async_trait]
pub trait RuleDocumentStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<RuleDocument>>;
}

/// Loads every `*.yaml`/`*.yml` file in a directory as a rule document,
/// matching the donor original's `ReadFromFilePath` (spec §11.5).
pub struct FsRuleStore {
    dir: PathBuf,
}

impl FsRuleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FsRuleStore { dir: dir.into() }
    }
}

#[async_trait::async_trait]
impl RuleDocumentStore for FsRuleStore {
    async fn load_all(&self) -> Result<Vec<RuleDocument>> {
        load_dir(&self.dir).await
    }
}

async fn load_dir(dir: &Path) -> Result<Vec<RuleDocument>> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || load_dir_blocking(&dir))
        .await
        .map_err(|e| FingerprintError::invalid_input(format!("rule-store task panicked: {e}")))?
}

fn load_dir_blocking(dir: &Path) -> Result<Vec<RuleDocument>> {
    let mut docs = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| FingerprintError::invalid_input(format!("reading rule directory {dir:?}: {e}")))?;
    for entry in entries {
        let entry = entry.map_err(|e| FingerprintError::invalid_input(e.to_string()))?;
        let path = entry.path();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if !is_yaml {
            continue;
        }
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| FingerprintError::invalid_input(format!("reading {path:?}: {e}")))?;
        match RuleDocument::parse_yaml(&contents) {
            Ok(doc) => docs.push(doc),
            Err(e) => {
                // A single bad rule document is a soft, per-file compilation
                // failure (spec §7: "Compilation failures inside an
                // individual rule matcher fail only that matcher"); the
                // same leniency extends to a whole malformed document so
                // one bad file can't take the rest of the catalog down.
                tracing::warn!("skipping rule document {path:?}: {e}");
            }
        }
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_every_yaml_file_in_a_directory() {
        let dir = tempdir();
        std::fs::write(
            dir.join("wordpress.yaml"),
            "id: wordpress\nhttp:\n  - path: [\"{{BaseURL}}\"]\n    matchers:\n      - type: word\n        words: [\"wp-content\"]\n",
        )
        .unwrap();
        std::fs::write(dir.join("not-yaml.txt"), "ignored").unwrap();

        let store = FsRuleStore::new(&dir);
        let docs = store.load_all().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "wordpress");

        std::fs::remove_dir_all(&dir).ok();
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("stackscout-rulestore-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
