use crate::model::{generate_id, Extra, Id};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct School {
    pub id: Id,
    pub name: String,
    #[serde(flatten, default)]
    pub extra: Extra,
}

/// A grade or grade band within a school.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub id: Id,
    pub school_id: Id,
    pub name: String,
    #[serde(flatten, default)]
    pub extra: Extra,
}

/// Input model for creating a new school
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSchool {
    pub id: Option<Id>,
    pub name: String,
    #[serde(flatten, default)]
    pub extra: Extra,
}

impl NewSchool {
    pub fn into_school(self) -> School {
        School {
            id: self.id.unwrap_or_else(generate_id),
            name: self.name,
            extra: self.extra,
        }
    }
}

/// Input model for creating a new level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLevel {
    pub id: Option<Id>,
    pub school_id: Id,
    pub name: String,
    #[serde(flatten, default)]
    pub extra: Extra,
}

impl NewLevel {
    pub fn into_level(self) -> Level {
        Level {
            id: self.id.unwrap_or_else(generate_id),
            school_id: self.school_id,
            name: self.name,
            extra: self.extra,
        }
    }
}
