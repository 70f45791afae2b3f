//! School reference data.

use serde::Serialize;
use uuid::Uuid;

/// A school, as far as invitations are concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct School {
    pub id: Uuid,
    pub name: String,
}
