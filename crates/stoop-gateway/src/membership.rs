//! Membership boundary. Event, community, and conversation membership is
//! owned by the profile/community subsystem; the messaging core only asks
//! these three questions.

use stoop_db::Database;
use stoop_types::{ChatError, SurfaceRef};

pub trait MembershipProvider: Send + Sync {
    fn is_participant(&self, user_id: i64, surface: SurfaceRef) -> Result<bool, ChatError>;
    fn participants_of(&self, surface: SurfaceRef) -> Result<Vec<i64>, ChatError>;
    fn surfaces_of(&self, user_id: i64) -> Result<Vec<SurfaceRef>, ChatError>;
}

impl MembershipProvider for Database {
    fn is_participant(&self, user_id: i64, surface: SurfaceRef) -> Result<bool, ChatError> {
        Database::is_participant(self, user_id, surface)
    }

    fn participants_of(&self, surface: SurfaceRef) -> Result<Vec<i64>, ChatError> {
        Database::participants_of(self, surface)
    }

    fn surfaces_of(&self, user_id: i64) -> Result<Vec<SurfaceRef>, ChatError> {
        Database::surfaces_of(self, user_id)
    }
}
