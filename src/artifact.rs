use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Output produced by a processor
pub trait Artifact: Send + Sync + Debug {
    /// Identifier, unique among the artifacts of one run
    fn id(&self) -> String;

    /// Convert to Any for downcasting
    fn as_any(&self) -> &dyn Any;
}

pub type ArtifactList = Vec<Arc<dyn Artifact>>;

/// Find an artifact by ID and downcast it to its concrete type.
pub fn find_artifact<'a, T: Artifact + 'static>(
    artifacts: &'a [Arc<dyn Artifact>],
    id: &str,
) -> Option<&'a T> {
    artifacts
        .iter()
        .filter(|artifact| artifact.id() == id)
        .find_map(|artifact| artifact.as_any().downcast_ref::<T>())
}

/// All artifacts of a concrete type, in list order.
pub fn artifacts_of<T: Artifact + 'static>(artifacts: &[Arc<dyn Artifact>]) -> Vec<&T> {
    artifacts
        .iter()
        .filter_map(|artifact| artifact.as_any().downcast_ref::<T>())
        .collect()
}
