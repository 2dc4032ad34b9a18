use crate::model::{generate_id, reserved_keys, strip_reserved, Extra, Id, UserRole};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// A parent account. Students point at it through `parentId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parent {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten, default)]
    pub extra: Extra,
}

/// Input model for creating a new parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewParent {
    pub id: Option<Id>,
    pub name: String,
    pub email: Option<String>,
    #[serde(flatten, default)]
    pub extra: Extra,
}

pub const PARENT_FIELDS: &[&str] = &["id", "name", "email", "role", "createdAt", "updatedAt"];

impl NewParent {
    pub fn managed_fields(&self) -> Vec<String> {
        reserved_keys(&self.extra, PARENT_FIELDS)
    }

    pub fn into_parent(self) -> Parent {
        let mut extra = self.extra;
        strip_reserved(&mut extra, PARENT_FIELDS);
        Parent {
            id: self.id.unwrap_or_else(generate_id),
            name: self.name,
            email: self.email,
            role: UserRole::Parent,
            created_at: None,
            updated_at: None,
            extra,
        }
    }
}

/// A student enrolled in one level of one school.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub school_id: Id,
    pub level_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten, default)]
    pub extra: Extra,
}

/// Input model for enrolling a student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub id: Option<Id>,
    pub name: String,
    pub email: Option<String>,
    pub school_id: Id,
    pub level_id: Id,
    pub parent_id: Option<Id>,
    #[serde(flatten, default)]
    pub extra: Extra,
}

pub const STUDENT_FIELDS: &[&str] = &[
    "id",
    "name",
    "email",
    "role",
    "schoolId",
    "levelId",
    "parentId",
    "createdAt",
    "updatedAt",
];

impl NewStudent {
    pub fn managed_fields(&self) -> Vec<String> {
        reserved_keys(&self.extra, STUDENT_FIELDS)
    }

    /// Convert to a full Student. A missing email is generated from the name
    /// and the creation time.
    pub fn into_student(self, now: DateTime<Utc>) -> Student {
        let mut extra = self.extra;
        strip_reserved(&mut extra, STUDENT_FIELDS);
        let email = self
            .email
            .filter(|email| !email.trim().is_empty())
            .unwrap_or_else(|| generated_email(&self.name, now));
        Student {
            id: self.id.unwrap_or_else(generate_id),
            name: self.name,
            email,
            role: UserRole::Student,
            school_id: self.school_id,
            level_id: self.level_id,
            parent_id: self.parent_id,
            created_at: Some(now),
            updated_at: Some(now),
            extra,
        }
    }
}

/// Fields an admin may change on an existing student. Absent fields are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentUpdate {
    pub name: Option<String>,
    pub school_id: Option<Id>,
    pub level_id: Option<Id>,
    pub parent_id: Option<Id>,
}

impl StudentUpdate {
    pub fn apply(self, student: &mut Student) {
        if let Some(name) = self.name {
            student.name = name;
        }
        if let Some(school_id) = self.school_id {
            student.school_id = school_id;
        }
        if let Some(level_id) = self.level_id {
            student.level_id = level_id;
        }
        if let Some(parent_id) = self.parent_id {
            student.parent_id = Some(parent_id);
        }
    }
}

/// `Ann Lee` enrolled at millisecond 1700000000000 becomes
/// `ann.lee.1700000000000@school.com`.
pub fn generated_email(name: &str, now: DateTime<Utc>) -> String {
    let local = name.to_lowercase().split_whitespace().join(".");
    format!("{}.{}@school.com", local, now.timestamp_millis())
}
