//! Organization model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Organization entity, the owner of meters and the recipient of
/// credit notifications
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}
