/// Deployment plan model: typed resource declarations, reference tokens,
/// and the environment-scoped naming/value store.
mod graph;
mod params;
mod resource;

pub use graph::{Plan, PlanError};
pub use params::{publish_string_parameter, ParamStore};
pub use resource::{attribute, embedded_refs, pseudo, reference, Resource, ResourceType, Tag};
