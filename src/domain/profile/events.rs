use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::UserProfile;
use crate::outbox::OutboxEvent;

// ============================================================================
// Profile Domain Events
// ============================================================================

/// Emitted after a profile update commits. Carries the full post-update
/// snapshot so consumers don't need a follow-up read.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProfileUpdated {
    pub user_id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Uuid,
    pub correlation_id: String,
}

impl ProfileUpdated {
    pub fn from_profile(profile: &UserProfile, updated_by: Uuid, correlation_id: &str) -> Self {
        Self {
            user_id: profile.id,
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            phone: profile.phone.clone(),
            location: profile.location.clone(),
            bio: profile.bio.clone(),
            avatar_url: profile.avatar_url.clone(),
            updated_at: profile.updated_at,
            updated_by,
            correlation_id: correlation_id.to_string(),
        }
    }
}

impl OutboxEvent for ProfileUpdated {
    fn event_type(&self) -> &str {
        "ProfileUpdated"
    }

    fn aggregate_id(&self) -> Uuid {
        self.user_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
