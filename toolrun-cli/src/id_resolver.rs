//! ID resolver module
//!
//! Resolves job ID prefixes to full UUIDs by scanning the job store, so
//! users can pass short, unambiguous prefixes instead of full UUIDs.

use anyhow::{Context, Result, anyhow};
use toolrun_runner::repository::JobStore;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a job ID or prefix to a full UUID
///
/// If the input is already a full UUID, returns it immediately.
/// Otherwise, lists all persisted jobs and finds the one matching the prefix.
///
/// # Errors
/// Returns an error if:
/// - No job matches the prefix
/// - Multiple jobs match the prefix (ambiguous)
/// - The store cannot be read
pub fn resolve_job_id(store: &dyn JobStore, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    // If it's already a full UUID, return it
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let prefix = id_or_prefix.as_str().to_lowercase();
    if prefix.is_empty() {
        return Err(anyhow!("Job ID cannot be empty"));
    }

    let jobs = store
        .list_all()
        .context("Failed to list jobs for ID resolution")?;

    let matches: Vec<Uuid> = jobs
        .iter()
        .map(|j| j.id)
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();

    match matches.len() {
        0 => Err(anyhow!("No job found with ID starting with '{}'", prefix)),
        1 => Ok(matches[0]),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple jobs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use toolrun_core::domain::job::{Job, JobPriority};
    use toolrun_runner::repository::FileJobStore;

    #[test]
    fn test_resolves_unique_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();
        let job = Job::new("echo", HashMap::new(), JobPriority::Normal);
        store.save(&job).unwrap();

        let prefix = job.id.to_string()[..8].to_uppercase();
        let resolved = resolve_job_id(&store, &IdOrPrefix::parse(&prefix)).unwrap();
        assert_eq!(resolved, job.id);
    }

    #[test]
    fn test_unknown_prefix_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();

        let err = resolve_job_id(&store, &IdOrPrefix::parse("zz")).unwrap_err();
        assert!(err.to_string().contains("No job found"));
    }

    #[test]
    fn test_full_id_skips_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();
        let id = Uuid::new_v4();

        assert_eq!(resolve_job_id(&store, &IdOrPrefix::Full(id)).unwrap(), id);
    }
}
