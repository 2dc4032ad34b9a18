use crate::model::{generate_id, reserved_keys, strip_reserved, Extra, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An uploaded file referenced by a lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub url: String,
}

/// Teaching material attached to one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: Id,
    pub title: String,
    pub subject_id: Id,
    #[serde(default)]
    pub document: Option<Attachment>,
    #[serde(default)]
    pub audio: Option<Attachment>,
    #[serde(default)]
    pub exercise: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten, default)]
    pub extra: Extra,
}

impl Lesson {
    /// Number of files attached, document and audio counted separately.
    pub fn material_count(&self) -> usize {
        usize::from(self.document.is_some()) + usize::from(self.audio.is_some())
    }

    pub fn has_exercise(&self) -> bool {
        !self.exercise.trim().is_empty()
    }
}

/// Input model for creating a new lesson
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLesson {
    pub id: Option<Id>,
    pub title: String,
    pub subject_id: Id,
    #[serde(default)]
    pub document: Option<Attachment>,
    #[serde(default)]
    pub audio: Option<Attachment>,
    #[serde(default)]
    pub exercise: String,
    #[serde(flatten, default)]
    pub extra: Extra,
}

pub const LESSON_FIELDS: &[&str] = &[
    "id",
    "title",
    "subjectId",
    "document",
    "audio",
    "exercise",
    "createdAt",
    "updatedAt",
];

impl NewLesson {
    pub fn managed_fields(&self) -> Vec<String> {
        reserved_keys(&self.extra, LESSON_FIELDS)
    }

    pub fn into_lesson(self, now: DateTime<Utc>) -> Lesson {
        let mut extra = self.extra;
        strip_reserved(&mut extra, LESSON_FIELDS);
        Lesson {
            id: self.id.unwrap_or_else(generate_id),
            title: self.title,
            subject_id: self.subject_id,
            document: self.document,
            audio: self.audio,
            exercise: self.exercise,
            created_at: Some(now),
            updated_at: Some(now),
            extra,
        }
    }
}

/// Replacement content for an existing lesson. The subject never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonUpdate {
    pub title: String,
    #[serde(default)]
    pub document: Option<Attachment>,
    #[serde(default)]
    pub audio: Option<Attachment>,
    #[serde(default)]
    pub exercise: String,
}

impl LessonUpdate {
    pub fn apply(self, lesson: &mut Lesson, now: DateTime<Utc>) {
        lesson.title = self.title;
        lesson.document = self.document;
        lesson.audio = self.audio;
        lesson.exercise = self.exercise;
        lesson.updated_at = Some(now);
    }
}

/// Counts shown on a subject's detail page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonStats {
    pub lesson_count: usize,
    pub material_count: usize,
    pub exercise_count: usize,
}

impl LessonStats {
    pub fn of(lessons: &[Lesson]) -> Self {
        Self {
            lesson_count: lessons.len(),
            material_count: lessons.iter().map(Lesson::material_count).sum(),
            exercise_count: lessons.iter().filter(|l| l.has_exercise()).count(),
        }
    }
}
