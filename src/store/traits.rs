use crate::model::{
    DocumentKind, Id, Lesson, Level, Parent, School, Student, Subject, Teacher, UserContext,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: DocumentKind, id: Id },
    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: DocumentKind, id: Id },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("{kind} '{id}' was modified concurrently")]
    Conflict { kind: DocumentKind, id: Id },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn not_found(kind: DocumentKind, id: &str) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A document together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub doc: T,
    pub version: i64,
}

impl<T> Versioned<T> {
    pub fn new(doc: T, version: i64) -> Self {
        Self { doc, version }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentWrite {
    Teacher(Teacher),
    Subject(Subject),
}

impl DocumentWrite {
    pub fn kind(&self) -> DocumentKind {
        match self {
            DocumentWrite::Teacher(_) => DocumentKind::Teacher,
            DocumentWrite::Subject(_) => DocumentKind::Subject,
        }
    }

    pub fn id(&self) -> &Id {
        match self {
            DocumentWrite::Teacher(t) => &t.id,
            DocumentWrite::Subject(s) => &s.id,
        }
    }
}

/// A full-document replacement guarded by the version observed at read time.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub write: DocumentWrite,
    pub expected_version: i64,
}

/// Writes that commit together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<PendingWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_teacher(&mut self, teacher: Teacher, expected_version: i64) -> &mut Self {
        self.writes.push(PendingWrite {
            write: DocumentWrite::Teacher(teacher),
            expected_version,
        });
        self
    }

    pub fn update_subject(&mut self, subject: Subject, expected_version: i64) -> &mut Self {
        self.writes.push(PendingWrite {
            write: DocumentWrite::Subject(subject),
            expected_version,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[PendingWrite] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<PendingWrite> {
        self.writes
    }
}

#[async_trait::async_trait]
pub trait SchoolStore: Send + Sync {
    async fn get_school(&self, id: &Id) -> StoreResult<Option<School>>;
    async fn list_schools(&self) -> StoreResult<Vec<School>>;
    async fn insert_school(&self, actor: &UserContext, school: School) -> StoreResult<()>;
    async fn delete_school(&self, actor: &UserContext, id: &Id) -> StoreResult<bool>;
}

#[async_trait::async_trait]
pub trait LevelStore: Send + Sync {
    async fn get_level(&self, id: &Id) -> StoreResult<Option<Level>>;
    async fn list_levels_for_school(&self, school_id: &Id) -> StoreResult<Vec<Level>>;
    async fn insert_level(&self, actor: &UserContext, level: Level) -> StoreResult<()>;
    async fn delete_level(&self, actor: &UserContext, id: &Id) -> StoreResult<bool>;
}

#[async_trait::async_trait]
pub trait SubjectStore: Send + Sync {
    async fn get_subject(&self, id: &Id) -> StoreResult<Option<Versioned<Subject>>>;
    /// List subjects of a school, optionally narrowed to one level
    async fn list_subjects_for_school(
        &self,
        school_id: &Id,
        level_id: Option<&Id>,
    ) -> StoreResult<Vec<Subject>>;
    async fn insert_subject(&self, actor: &UserContext, subject: Subject) -> StoreResult<()>;
    async fn delete_subject(&self, actor: &UserContext, id: &Id) -> StoreResult<bool>;
}

#[async_trait::async_trait]
pub trait TeacherStore: Send + Sync {
    async fn get_teacher(&self, id: &Id) -> StoreResult<Option<Versioned<Teacher>>>;
    async fn list_teachers_for_school(&self, school_id: &Id) -> StoreResult<Vec<Teacher>>;
    async fn insert_teacher(&self, actor: &UserContext, teacher: Teacher) -> StoreResult<()>;
    async fn delete_teacher(&self, actor: &UserContext, id: &Id) -> StoreResult<bool>;
}

#[async_trait::async_trait]
pub trait RosterStore: Send + Sync {
    async fn get_parent(&self, id: &Id) -> StoreResult<Option<Parent>>;
    async fn list_parents(&self) -> StoreResult<Vec<Parent>>;
    async fn insert_parent(&self, actor: &UserContext, parent: Parent) -> StoreResult<()>;
    async fn delete_parent(&self, actor: &UserContext, id: &Id) -> StoreResult<bool>;

    async fn get_student(&self, id: &Id) -> StoreResult<Option<Student>>;
    async fn list_students_for_school(&self, school_id: &Id) -> StoreResult<Vec<Student>>;
    async fn list_students_for_parent(&self, parent_id: &Id) -> StoreResult<Vec<Student>>;
    async fn insert_student(&self, actor: &UserContext, student: Student) -> StoreResult<()>;
    /// Replace a stored student. Fails with `NotFound` if it is gone.
    async fn update_student(&self, actor: &UserContext, student: Student) -> StoreResult<()>;
    async fn delete_student(&self, actor: &UserContext, id: &Id) -> StoreResult<bool>;
}

#[async_trait::async_trait]
pub trait LessonStore: Send + Sync {
    async fn get_lesson(&self, id: &Id) -> StoreResult<Option<Lesson>>;
    async fn list_lessons_for_subject(&self, subject_id: &Id) -> StoreResult<Vec<Lesson>>;
    async fn insert_lesson(&self, actor: &UserContext, lesson: Lesson) -> StoreResult<()>;
    /// Replace a stored lesson. Fails with `NotFound` if it is gone.
    async fn update_lesson(&self, actor: &UserContext, lesson: Lesson) -> StoreResult<()>;
    async fn delete_lesson(&self, actor: &UserContext, id: &Id) -> StoreResult<bool>;
}

#[async_trait::async_trait]
pub trait TransactionStore: Send + Sync {
    /// Apply every write in the batch atomically.
    ///
    /// Fails with `Conflict` if any document moved past its expected version
    /// and with `NotFound` if any document no longer exists. On success each
    /// written document gets a new version and a server-assigned `updated_at`.
    async fn commit(&self, actor: &UserContext, batch: WriteBatch) -> StoreResult<()>;
}

pub trait Store:
    SchoolStore
    + LevelStore
    + SubjectStore
    + TeacherStore
    + RosterStore
    + LessonStore
    + TransactionStore
    + Send
    + Sync
{
}
