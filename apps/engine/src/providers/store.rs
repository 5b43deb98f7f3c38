//! Reference store implementations: a JSON-file document store and a
//! filesystem artifact store. Both are blocking and run on the
//! data-operations pool.

use std::fs;
use std::path::PathBuf;

use tracing::info;
use uuid::Uuid;

use crate::models::job::{JobInput, JobRecord};
use crate::providers::{ArtifactStore, DocumentStore, ProviderError};

/// Loads job inputs from `{root}/{job_id}.json` and saves accumulated
/// records to `{root}/{job_id}.record.json`.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ProviderError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }
}

impl DocumentStore for JsonFileStore {
    fn load(&self, job_id: Uuid) -> Result<JobInput, ProviderError> {
        let path = self.root.join(format!("{job_id}.json"));
        if !path.exists() {
            return Err(ProviderError::NotFound(format!("job input {job_id}")));
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, record: &JobRecord) -> Result<(), ProviderError> {
        let path = self.root.join(format!("{}.record.json", record.job_id));
        let tmp = self.root.join(format!("{}.record.json.tmp", record.job_id));
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &path)?;
        info!(job_id = %record.job_id, status = %record.status, "job record saved");
        Ok(())
    }
}

/// Writes artifact blobs under `{root}/{job-scoped name}` and returns the
/// path as the reference.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ProviderError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }
}

impl ArtifactStore for FsArtifactStore {
    fn store(&self, name: &str, blob: &[u8]) -> Result<String, ProviderError> {
        // Artifact names are generated internally, but flatten separators
        // anyway so a name can never escape the root.
        let safe: String = name
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        let path = self.root.join(safe);
        fs::write(&path, blob)?;
        Ok(path.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobInput;

    fn input(job_id: Uuid) -> JobInput {
        JobInput {
            job_id,
            title: "Engineer".into(),
            company_name: "Acme".into(),
            posting_text: "Build things.".into(),
        }
    }

    #[test]
    fn test_load_round_trips_job_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        let job_id = Uuid::new_v4();

        let path = dir.path().join(format!("{job_id}.json"));
        fs::write(&path, serde_json::to_vec(&input(job_id)).unwrap()).unwrap();

        let loaded = store.load(job_id).unwrap();
        assert_eq!(loaded.job_id, job_id);
        assert_eq!(loaded.company_name, "Acme");
    }

    #[test]
    fn test_load_missing_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        let err = store.load(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_save_writes_record_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        let record = JobRecord::new(input(Uuid::new_v4()));

        store.save(&record).unwrap();

        let path = dir.path().join(format!("{}.record.json", record.job_id));
        let raw = fs::read_to_string(path).unwrap();
        let back: JobRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.job_id, record.job_id);
    }

    #[test]
    fn test_artifact_store_returns_readable_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();

        let reference = store.store("cover_letter.md", b"Dear team,").unwrap();
        assert_eq!(fs::read(reference).unwrap(), b"Dear team,");
    }

    #[test]
    fn test_artifact_name_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();

        let reference = store.store("../escape.md", b"x").unwrap();
        assert!(PathBuf::from(&reference).starts_with(dir.path()));
    }
}
