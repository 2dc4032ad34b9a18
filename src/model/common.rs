use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

pub type Id = String;

/// Ordered set of document ids. Serialized as a plain JSON array.
pub type IdSet = BTreeSet<Id>;

/// Untyped fields carried by a document but not modelled here.
pub type Extra = serde_json::Map<String, serde_json::Value>;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Keys in `extra` that collide with a modelled field.
pub fn reserved_keys(extra: &Extra, fields: &[&str]) -> Vec<String> {
    extra
        .keys()
        .filter(|key| fields.contains(&key.as_str()))
        .cloned()
        .collect()
}

/// Drop every key of `extra` that collides with a modelled field, so the
/// document never serializes a field twice.
pub fn strip_reserved(extra: &mut Extra, fields: &[&str]) {
    extra.retain(|key, _| !fields.contains(&key.as_str()));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    School,
    Level,
    Subject,
    Teacher,
    Parent,
    Student,
    Lesson,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::School => "school",
            DocumentKind::Level => "level",
            DocumentKind::Subject => "subject",
            DocumentKind::Teacher => "teacher",
            DocumentKind::Parent => "parent",
            DocumentKind::Student => "student",
            DocumentKind::Lesson => "lesson",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    SuperAdmin,
    Admin,
    Staff,
    Tutor,
    Parent,
    Student,
}

impl UserRole {
    /// Staff and tutors are the only users that can hold subject assignments.
    pub fn can_teach(&self) -> bool {
        matches!(self, UserRole::Staff | UserRole::Tutor)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::SuperAdmin)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "super_admin" | "superadmin" => Some(UserRole::SuperAdmin),
            "admin" => Some(UserRole::Admin),
            "staff" => Some(UserRole::Staff),
            "tutor" => Some(UserRole::Tutor),
            "parent" => Some(UserRole::Parent),
            "student" => Some(UserRole::Student),
            _ => None,
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UserRole::SuperAdmin => "super_admin",
            UserRole::Admin => "admin",
            UserRole::Staff => "staff",
            UserRole::Tutor => "tutor",
            UserRole::Parent => "parent",
            UserRole::Student => "student",
        };
        f.write_str(name)
    }
}
