// ============================================================================
// Profile Domain
// ============================================================================
//
// The user profile aggregate: model, partial-update semantics, the
// ProfileUpdated event, and the service that ties the mutation to the outbox
// recorder. Everything generic about the outbox lives in src/outbox; only
// profile-specific code belongs here.
//
// ============================================================================

pub mod errors;
pub mod events;
pub mod model;
pub mod service;

pub use errors::ProfileError;
pub use events::ProfileUpdated;
pub use model::{ProfileUpdate, UserProfile};
pub use service::{migrate, ProfileService};
