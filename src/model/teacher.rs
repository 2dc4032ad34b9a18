use crate::model::{generate_id, reserved_keys, strip_reserved, Extra, Id, IdSet, UserRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Level id -> subject ids taught by the teacher within that level.
pub type LevelSubjects = BTreeMap<Id, IdSet>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
}

impl Default for AccountStatus {
    fn default() -> Self {
        AccountStatus::Active
    }
}

/// A staff or tutor user document and its denormalized assignments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: UserRole,
    pub school_id: Id,
    /// Levels the teacher is active in.
    #[serde(default)]
    pub classes: IdSet,
    #[serde(default)]
    pub subjects: LevelSubjects,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten, default)]
    pub extra: Extra,
}

impl Teacher {
    pub fn subjects_for_level(&self, level_id: &str) -> Option<&IdSet> {
        self.subjects.get(level_id)
    }

    pub fn teaches(&self, level_id: &str, subject_id: &str) -> bool {
        self.subjects
            .get(level_id)
            .map(|ids| ids.contains(subject_id))
            .unwrap_or(false)
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.values().map(|ids| ids.len()).sum()
    }

    /// Returns true if the level was not already present.
    pub fn add_class(&mut self, level_id: &str) -> bool {
        self.classes.insert(level_id.to_string())
    }

    /// Adds a subject under its level and marks the level active.
    pub fn add_subject(&mut self, level_id: &str, subject_id: &str) {
        self.subjects
            .entry(level_id.to_string())
            .or_default()
            .insert(subject_id.to_string());
        self.classes.insert(level_id.to_string());
    }

    /// Removes a subject from a level. When the level has no subjects left the
    /// level key is dropped and the level leaves `classes`.
    ///
    /// A level with no `subjects` entry at all is left alone, so a level that
    /// was assigned without subjects survives an unrelated removal.
    pub fn remove_subject(&mut self, level_id: &str, subject_id: &str) {
        let Some(ids) = self.subjects.get_mut(level_id) else {
            return;
        };
        ids.remove(subject_id);
        if ids.is_empty() {
            self.subjects.remove(level_id);
            self.classes.remove(level_id);
        }
    }

    /// Replaces the subject set for a level. An empty set clears the level.
    pub fn replace_level_subjects(&mut self, level_id: &str, subject_ids: IdSet) {
        if subject_ids.is_empty() {
            self.subjects.remove(level_id);
            self.classes.remove(level_id);
        } else {
            self.subjects.insert(level_id.to_string(), subject_ids);
            self.classes.insert(level_id.to_string());
        }
    }
}

/// Wire names of the modelled teacher fields.
pub const TEACHER_FIELDS: &[&str] = &[
    "id", "name", "email", "role", "schoolId", "classes", "subjects", "status", "updatedAt",
];

/// Input model for creating a new teacher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTeacher {
    pub id: Option<Id>,
    pub name: String,
    pub email: Option<String>,
    pub role: UserRole,
    pub school_id: Id,
    #[serde(flatten, default)]
    pub extra: Extra,
}

impl NewTeacher {
    /// Modelled fields that arrived in the passthrough map. Assignments and
    /// status are managed by the service, never set on create.
    pub fn managed_fields(&self) -> Vec<String> {
        reserved_keys(&self.extra, TEACHER_FIELDS)
    }

    /// Convert to a full Teacher with empty classes and subjects
    pub fn into_teacher(self) -> Teacher {
        let mut extra = self.extra;
        strip_reserved(&mut extra, TEACHER_FIELDS);
        Teacher {
            id: self.id.unwrap_or_else(generate_id),
            name: self.name,
            email: self.email,
            role: self.role,
            school_id: self.school_id,
            classes: IdSet::new(),
            subjects: LevelSubjects::new(),
            status: AccountStatus::Active,
            updated_at: None,
            extra,
        }
    }
}

/// Counts shown next to a teacher in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherSummary {
    pub class_count: usize,
    pub subject_count: usize,
}

impl From<&Teacher> for TeacherSummary {
    fn from(teacher: &Teacher) -> Self {
        Self {
            class_count: teacher.classes.len(),
            subject_count: teacher.subject_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn teacher() -> Teacher {
        NewTeacher {
            id: Some("T1".to_string()),
            name: "Ada".to_string(),
            email: None,
            role: UserRole::Staff,
            school_id: "SCH1".to_string(),
            extra: Extra::new(),
        }
        .into_teacher()
    }

    #[test]
    fn test_add_subject_activates_level() {
        let mut t = teacher();
        t.add_subject("L1", "SUB1");
        t.add_subject("L1", "SUB1");

        assert!(t.classes.contains("L1"));
        assert_eq!(t.subjects_for_level("L1").map(|s| s.len()), Some(1));
        assert!(t.teaches("L1", "SUB1"));
    }

    #[test]
    fn test_removing_last_subject_drops_level() {
        let mut t = teacher();
        t.add_subject("L1", "SUB1");
        t.add_subject("L1", "SUB2");

        t.remove_subject("L1", "SUB1");
        assert!(t.classes.contains("L1"));
        assert!(t.teaches("L1", "SUB2"));

        t.remove_subject("L1", "SUB2");
        assert!(!t.classes.contains("L1"));
        assert!(!t.subjects.contains_key("L1"));
    }

    #[test]
    fn test_remove_keeps_bare_level() {
        let mut t = teacher();
        t.add_class("L2");

        t.remove_subject("L2", "SUB9");
        assert!(t.classes.contains("L2"));
    }

    #[test]
    fn test_replace_with_empty_set_clears_level() {
        let mut t = teacher();
        t.add_subject("L1", "SUB1");

        t.replace_level_subjects("L1", IdSet::new());
        assert!(t.classes.is_empty());
        assert!(t.subjects.is_empty());
    }

    #[test]
    fn test_summary_counts_subjects_across_levels() {
        let mut t = teacher();
        t.add_subject("L1", "SUB1");
        t.add_subject("L1", "SUB2");
        t.add_subject("L2", "SUB3");
        t.add_class("L3");

        let summary = TeacherSummary::from(&t);
        assert_eq!(summary.class_count, 3);
        assert_eq!(summary.subject_count, 3);
    }

    #[test]
    fn test_create_body_cannot_seed_assignments() {
        let new_teacher: NewTeacher = serde_json::from_value(json!({
            "name": "Eve",
            "role": "staff",
            "schoolId": "SCH1",
            "classes": ["L1"],
            "subjects": {"L1": ["A"]},
            "phone": "555"
        }))
        .unwrap();
        assert_eq!(new_teacher.managed_fields(), vec!["classes", "subjects"]);

        let created = new_teacher.into_teacher();
        let wire = serde_json::to_string(&created).unwrap();
        assert_eq!(wire.matches("\"classes\"").count(), 1);
        assert_eq!(wire.matches("\"subjects\"").count(), 1);

        let stored: Teacher = serde_json::from_str(&wire).unwrap();
        assert!(stored.classes.is_empty());
        assert!(stored.subjects.is_empty());
        assert_eq!(stored.extra.get("phone"), Some(&json!("555")));
    }

    #[test]
    fn test_teacher_wire_format() {
        let mut t = teacher();
        t.add_subject("L1", "SUB1");

        let value = serde_json::to_value(&t).unwrap();
        assert_eq!(value["schoolId"], json!("SCH1"));
        assert_eq!(value["classes"], json!(["L1"]));
        assert_eq!(value["subjects"], json!({"L1": ["SUB1"]}));
        assert_eq!(value["role"], json!("staff"));
    }
}
