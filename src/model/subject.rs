use crate::model::{generate_id, reserved_keys, strip_reserved, Extra, Id, IdSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A course offered within one level of one school.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: Id,
    pub name: String,
    pub level_id: Id,
    pub school_id: Id,
    #[serde(default)]
    pub teacher_ids: IdSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten, default)]
    pub extra: Extra,
}

impl Subject {
    pub fn has_teacher(&self, teacher_id: &str) -> bool {
        self.teacher_ids.contains(teacher_id)
    }

    /// Returns true if the teacher was not already present.
    pub fn add_teacher(&mut self, teacher_id: &str) -> bool {
        self.teacher_ids.insert(teacher_id.to_string())
    }

    /// Returns true if the teacher was present.
    pub fn remove_teacher(&mut self, teacher_id: &str) -> bool {
        self.teacher_ids.remove(teacher_id)
    }
}

/// Input model for creating a new subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubject {
    pub id: Option<Id>,
    pub name: String,
    pub level_id: Id,
    pub school_id: Id,
    #[serde(flatten, default)]
    pub extra: Extra,
}

/// Wire names of the modelled subject fields.
pub const SUBJECT_FIELDS: &[&str] = &["id", "name", "levelId", "schoolId", "teacherIds", "updatedAt"];

impl NewSubject {
    /// Modelled fields that arrived in the passthrough map, such as `teacherIds`.
    pub fn managed_fields(&self) -> Vec<String> {
        reserved_keys(&self.extra, SUBJECT_FIELDS)
    }

    /// Convert to a full Subject with no teachers assigned
    pub fn into_subject(self) -> Subject {
        let mut extra = self.extra;
        strip_reserved(&mut extra, SUBJECT_FIELDS);
        Subject {
            id: self.id.unwrap_or_else(generate_id),
            name: self.name,
            level_id: self.level_id,
            school_id: self.school_id,
            teacher_ids: IdSet::new(),
            updated_at: None,
            extra,
        }
    }
}
