//! Preview instance management.
//!
//! - one live worker per resource id, tracked by [`InstanceRegistry`]
//! - ports come from the configured preview range
//! - workers report their own exit back to the registry

mod registry;
mod types;

pub use registry::InstanceRegistry;
pub use types::{
    InstanceInfo, ResourceId, StartPreviewRequest, StartPreviewResult, StopPreviewRequest,
    StopPreviewResult,
};
