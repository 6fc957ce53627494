// Versioned artifact rules shared by every store backend.
//
// Versions are append-only: a new edit takes `max + 1`, stored versions are
// never rewritten, and the current pointer always names a stored version.
// Backends compute plans here while holding their per-thread lock.

use canvas_common::types::{Artifact, ArtifactDraft, ArtifactVersion};

use crate::store::{StoreError, StoreResult};

/// Index the next appended version receives.
pub fn next_index(stored: &[ArtifactVersion]) -> u32 {
    stored.iter().map(|version| version.index).max().unwrap_or(0) + 1
}

/// Turn a draft into the version that follows `stored`.
pub fn plan_append(stored: &[ArtifactVersion], draft: ArtifactDraft) -> ArtifactVersion {
    draft.into_version(next_index(stored))
}

/// Assemble the artifact view from stored rows.
pub fn assemble(mut versions: Vec<ArtifactVersion>, current_index: Option<u32>) -> Option<Artifact> {
    if versions.is_empty() {
        return None;
    }
    versions.sort_by_key(|version| version.index);
    let max = versions.last().map(|version| version.index).unwrap_or(0);
    let current_index = current_index
        .filter(|index| versions.iter().any(|version| version.index == *index))
        .unwrap_or(max);
    Some(Artifact { current_index, versions })
}

/// A requested change to a thread's artifact, validated against the stored
/// versions by [`ArtifactImport::plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactImport {
    incoming: Vec<ArtifactVersion>,
    current_index: Option<u32>,
}

/// What a backend has to write for an accepted import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportPlan {
    pub append: Vec<ArtifactVersion>,
    pub current_index: Option<u32>,
}

impl ArtifactImport {
    pub fn from_artifact(artifact: Artifact) -> Self {
        Self { incoming: artifact.versions, current_index: Some(artifact.current_index) }
    }

    pub fn select_only(index: u32) -> Self {
        Self { incoming: Vec::new(), current_index: Some(index) }
    }

    pub fn plan(&self, stored: &[ArtifactVersion]) -> StoreResult<ImportPlan> {
        let mut incoming = self.incoming.clone();
        incoming.sort_by_key(|version| version.index);

        let stored_max = next_index(stored) - 1;
        let mut expected_next = stored_max + 1;
        let mut append = Vec::new();
        let mut previous = None;

        for version in incoming {
            if version.index == 0 {
                return Err(invalid("artifact version indices start at 1"));
            }
            if previous == Some(version.index) {
                return Err(invalid(format!("artifact version {} appears twice", version.index)));
            }
            previous = Some(version.index);

            if version.index <= stored_max {
                match stored.iter().find(|existing| existing.index == version.index) {
                    Some(existing) if *existing == version => continue,
                    _ => {
                        return Err(invalid(format!(
                            "artifact version {} is immutable and differs from the stored copy",
                            version.index
                        )))
                    }
                }
            }

            if version.index != expected_next {
                return Err(invalid(format!(
                    "artifact version {} is not contiguous; expected {expected_next}",
                    version.index
                )));
            }
            expected_next += 1;
            append.push(version);
        }

        if let Some(index) = self.current_index {
            let known = stored.iter().chain(append.iter()).any(|version| version.index == index);
            if !known {
                return Err(invalid(format!("current index {index} does not name a version")));
            }
        }

        Ok(ImportPlan { append, current_index: self.current_index })
    }
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::Validation(message.into())
}
