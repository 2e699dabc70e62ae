//! The lock file: the content-addressed record of a resolved composition.
//!
//! `genome.lock` makes runs reproducible: it stores the hash of the genome
//! it was resolved against, the enriched module list and the batched
//! execution plan. A subsequent run whose genome hashes to the same value
//! skips composition entirely.

use crate::{
    error::{ArchitechError, Result},
    genome::Genome,
    utils,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

/// The file name in the project root.
pub const LOCK_FILE_NAME: &str = "genome.lock";

/// Format version written into every lock file.
pub const LOCK_FORMAT_VERSION: &str = "1";

/// Top-level key order is fixed by field declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockFile {
    pub version: String,
    pub genome_hash: String,
    pub resolved_at: String,
    pub modules: Vec<LockedModule>,
    pub execution_plan: Vec<PlanBatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedModule {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub parameters: Value,
    /// sha256 of the canonicalized `{id, version, parameters}` triple.
    pub integrity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_package: Option<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanBatch {
    pub batch_number: usize,
    pub modules: Vec<String>,
    pub can_execute_in_parallel: bool,
}

/// Hash of the canonically-serialized genome: keys sorted at every level,
/// no insignificant whitespace.
pub fn hash_genome(genome: &Genome) -> Result<String> {
    let value = serde_json::to_value(genome)?;
    Ok(utils::sha256_hex(utils::canonical_json(&value)))
}

/// Integrity hash of one resolved module.
pub fn module_integrity(id: &str, version: &str, parameters: &Value) -> String {
    let triple = serde_json::json!({
        "id": id,
        "version": version,
        "parameters": parameters,
    });
    utils::sha256_hex(utils::canonical_json(&triple))
}

pub fn lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE_NAME)
}

/// Reads the lock file. A missing file is `None`; a file that exists but
/// cannot be parsed or carries an unknown format version is
/// [`ArchitechError::LockFileInvalid`]; any other io failure surfaces.
pub fn read(root: &Path) -> Result<Option<LockFile>> {
    let path = lock_path(root);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ArchitechError::io(err, path)),
    };
    let lock: LockFile = serde_json::from_str(&raw).map_err(|err| {
        ArchitechError::LockFileInvalid { path: path.clone(), reason: err.to_string() }
    })?;
    if lock.version != LOCK_FORMAT_VERSION {
        return Err(ArchitechError::LockFileInvalid {
            path,
            reason: format!("unsupported format version `{}`", lock.version),
        });
    }
    trace!(modules = lock.modules.len(), "read lock file");
    Ok(Some(lock))
}

/// Writes the lock file atomically: serialize to a temp file in the same
/// directory, fsync, rename over the target.
pub fn write(root: &Path, lock: &LockFile) -> Result<()> {
    fs::create_dir_all(root).map_err(|err| ArchitechError::io(err, root))?;
    let path = lock_path(root);
    let tmp = root.join(format!(".{LOCK_FILE_NAME}.tmp"));

    let mut content = serde_json::to_string_pretty(lock)?;
    content.push('\n');

    let mut file = fs::File::create(&tmp).map_err(|err| ArchitechError::io(err, &tmp))?;
    file.write_all(content.as_bytes()).map_err(|err| ArchitechError::io(err, &tmp))?;
    file.sync_all().map_err(|err| ArchitechError::io(err, &tmp))?;
    drop(file);
    fs::rename(&tmp, &path).map_err(|err| ArchitechError::io(err, &path))?;
    debug!(path = %path.display(), modules = lock.modules.len(), "lock file written");
    Ok(())
}

/// Whether a lock file exists and matches the genome's current hash.
pub fn is_valid(root: &Path, genome: &Genome) -> Result<bool> {
    match read(root)? {
        Some(lock) => Ok(lock.genome_hash == hash_genome(genome)?),
        None => Ok(false),
    }
}

/// Removes the lock file; a missing file is fine.
pub fn delete(root: &Path) -> Result<()> {
    let path = lock_path(root);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ArchitechError::io(err, path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn genome() -> Genome {
        let (genome, _) = Genome::from_value(json!({
            "project": {"name": "hello", "framework": "nextjs"},
            "modules": [{"id": "adapters/framework/nextjs"}]
        }))
        .unwrap();
        genome
    }

    fn lock(hash: String) -> LockFile {
        LockFile {
            version: LOCK_FORMAT_VERSION.to_string(),
            genome_hash: hash,
            resolved_at: "2026-01-01T00:00:00Z".to_string(),
            modules: vec![LockedModule {
                id: "adapters/framework/nextjs".to_string(),
                version: "1.0.0".to_string(),
                parameters: json!({}),
                integrity: module_integrity("adapters/framework/nextjs", "1.0.0", &json!({})),
                target_package: None,
                prerequisites: Vec::new(),
            }],
            execution_plan: vec![PlanBatch {
                batch_number: 1,
                modules: vec!["adapters/framework/nextjs".to_string()],
                can_execute_in_parallel: true,
            }],
        }
    }

    #[test]
    fn hash_is_stable_and_order_insensitive() {
        let a = hash_genome(&genome()).unwrap();
        let b = hash_genome(&genome()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn roundtrip_preserves_content_and_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let hash = hash_genome(&genome()).unwrap();
        let original = lock(hash);
        write(dir.path(), &original).unwrap();

        let raw = fs::read_to_string(lock_path(dir.path())).unwrap();
        assert!(raw.ends_with('\n'));
        let version_at = raw.find("\"version\"").unwrap();
        let hash_at = raw.find("\"genomeHash\"").unwrap();
        let resolved_at = raw.find("\"resolvedAt\"").unwrap();
        let modules_at = raw.find("\"modules\"").unwrap();
        let plan_at = raw.find("\"executionPlan\"").unwrap();
        assert!(version_at < hash_at && hash_at < resolved_at);
        assert!(resolved_at < modules_at && modules_at < plan_at);

        let read_back = read(dir.path()).unwrap().unwrap();
        assert_eq!(read_back, original);
    }

    #[test]
    fn missing_lock_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read(dir.path()).unwrap(), None);
        assert!(!is_valid(dir.path(), &genome()).unwrap());
        delete(dir.path()).unwrap();
    }

    #[test]
    fn corrupt_lock_is_invalid_not_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(lock_path(dir.path()), "not json").unwrap();
        assert!(matches!(
            read(dir.path()),
            Err(ArchitechError::LockFileInvalid { .. })
        ));
    }

    #[test]
    fn unknown_format_version_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let mut l = lock(hash_genome(&genome()).unwrap());
        l.version = "99".to_string();
        write(dir.path(), &l).unwrap();
        assert!(matches!(
            read(dir.path()),
            Err(ArchitechError::LockFileInvalid { reason, .. }) if reason.contains("99")
        ));
    }

    #[test]
    fn validity_tracks_genome_hash() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &lock(hash_genome(&genome()).unwrap())).unwrap();
        assert!(is_valid(dir.path(), &genome()).unwrap());

        let (changed, _) = Genome::from_value(json!({
            "project": {"name": "hello", "framework": "nextjs"},
            "modules": [{"id": "adapters/framework/nextjs", "parameters": {"ts": true}}]
        }))
        .unwrap();
        assert!(!is_valid(dir.path(), &changed).unwrap());
    }

    #[test]
    fn integrity_depends_on_parameters() {
        let a = module_integrity("m/x", "1.0.0", &json!({"a": 1}));
        let b = module_integrity("m/x", "1.0.0", &json!({"a": 2}));
        assert_ne!(a, b);
        let c = module_integrity("m/x", "1.0.0", &json!({"a": 1}));
        assert_eq!(a, c);
    }

    #[test]
    fn delete_then_read_is_none() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &lock(hash_genome(&genome()).unwrap())).unwrap();
        delete(dir.path()).unwrap();
        assert_eq!(read(dir.path()).unwrap(), None);
    }
}
