use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::Role;

/// Staff profile linked to an authenticated user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TeacherProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub school_id: Uuid,
    pub name: String,
    pub role: Role,
}
