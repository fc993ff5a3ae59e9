use anyhow::Result;

use crate::model::Evidence;

/// Collaborator contract for the vector-similarity retriever. Returned
/// scores are distances (lower = closer); calibration assumes the retriever
/// is deterministic for a fixed index.
pub trait Retriever {
    fn search(&self, query: &str, k: usize) -> Result<Vec<Evidence>>;
}
