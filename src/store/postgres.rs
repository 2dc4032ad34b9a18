use anyhow::{anyhow, Context};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::model::{
    DocumentKind, Id, Lesson, Level, Parent, School, Student, Subject, Teacher, UserContext,
};
use crate::store::access;
use crate::store::traits::{
    DocumentWrite, LessonStore, LevelStore, RosterStore, SchoolStore, Store, StoreError,
    StoreResult, SubjectStore, TeacherStore, TransactionStore, Versioned, WriteBatch,
};

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS schools (
        id TEXT PRIMARY KEY,
        data JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS levels (
        id TEXT PRIMARY KEY,
        school_id TEXT NOT NULL,
        data JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subjects (
        id TEXT PRIMARY KEY,
        school_id TEXT NOT NULL,
        level_id TEXT NOT NULL,
        data JSONB NOT NULL,
        version BIGINT NOT NULL DEFAULT 1,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS teachers (
        id TEXT PRIMARY KEY,
        school_id TEXT NOT NULL,
        data JSONB NOT NULL,
        version BIGINT NOT NULL DEFAULT 1,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS parents (
        id TEXT PRIMARY KEY,
        data JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS students (
        id TEXT PRIMARY KEY,
        school_id TEXT NOT NULL,
        parent_id TEXT,
        data JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lessons (
        id TEXT PRIMARY KEY,
        subject_id TEXT NOT NULL,
        data JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS levels_school_idx ON levels (school_id)",
    "CREATE INDEX IF NOT EXISTS subjects_school_level_idx ON subjects (school_id, level_id)",
    "CREATE INDEX IF NOT EXISTS teachers_school_idx ON teachers (school_id)",
    "CREATE INDEX IF NOT EXISTS students_school_idx ON students (school_id)",
    "CREATE INDEX IF NOT EXISTS students_parent_idx ON students (parent_id)",
    "CREATE INDEX IF NOT EXISTS lessons_subject_idx ON lessons (subject_id)",
];

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn migrate(&self) -> anyhow::Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to run database migration")?;
        }
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn table_for(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::School => "schools",
        DocumentKind::Level => "levels",
        DocumentKind::Subject => "subjects",
        DocumentKind::Teacher => "teachers",
        DocumentKind::Parent => "parents",
        DocumentKind::Student => "students",
        DocumentKind::Lesson => "lessons",
    }
}

fn encode<T: Serialize>(doc: &T) -> StoreResult<serde_json::Value> {
    serde_json::to_value(doc)
        .context("Failed to encode document")
        .map_err(StoreError::Backend)
}

fn decode<T: DeserializeOwned>(kind: DocumentKind, value: serde_json::Value) -> StoreResult<T> {
    serde_json::from_value(value)
        .with_context(|| format!("Failed to decode {} document", kind))
        .map_err(StoreError::Backend)
}

/// Serialization failures and deadlocks are retryable conflicts; everything
/// else is a backend failure.
/// SQLSTATE codes for serialization failure and deadlock. Both mean the
/// transaction lost a race and may be retried.
fn is_retryable(code: Option<&str>) -> bool {
    matches!(code, Some("40001") | Some("40P01"))
}

fn classify(err: sqlx::Error, kind: DocumentKind, id: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if is_retryable(db_err.code().as_deref()) {
            return StoreError::Conflict {
                kind,
                id: id.to_string(),
            };
        }
    }
    StoreError::Backend(anyhow!(err).context(format!("Database error on {} '{}'", kind, id)))
}

fn backend(err: sqlx::Error, what: &str) -> StoreError {
    StoreError::Backend(anyhow!(err).context(what.to_string()))
}

impl PostgresStore {
    async fn fetch_doc<T: DeserializeOwned>(
        &self,
        kind: DocumentKind,
        id: &Id,
    ) -> StoreResult<Option<(T, i64)>> {
        let versioned = matches!(kind, DocumentKind::Subject | DocumentKind::Teacher);
        let sql = if versioned {
            format!("SELECT data, version FROM {} WHERE id = $1", table_for(kind))
        } else {
            format!("SELECT data, 1::BIGINT AS version FROM {} WHERE id = $1", table_for(kind))
        };

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, kind, id))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let doc = decode(kind, row.get("data"))?;
        Ok(Some((doc, row.get("version"))))
    }

    async fn fetch_all<T: DeserializeOwned>(
        &self,
        kind: DocumentKind,
        sql: &str,
        binds: &[&str],
    ) -> StoreResult<Vec<T>> {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend(e, &format!("Failed to list {} documents", kind)))?;

        rows.into_iter()
            .map(|row| decode(kind, row.get("data")))
            .collect()
    }

    async fn insert_doc<T: Serialize>(
        &self,
        actor: &UserContext,
        kind: DocumentKind,
        id: &Id,
        columns: &[(&str, Option<&str>)],
        doc: &T,
    ) -> StoreResult<()> {
        access::check_write(actor, kind)?;

        let mut names = vec!["id", "data"];
        let mut placeholders = vec!["$1".to_string(), "$2".to_string()];
        for (i, (name, _)) in columns.iter().enumerate() {
            names.push(*name);
            placeholders.push(format!("${}", i + 3));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (id) DO NOTHING",
            table_for(kind),
            names.join(", "),
            placeholders.join(", ")
        );

        let mut query = sqlx::query(&sql).bind(id).bind(encode(doc)?);
        for (_, value) in columns {
            query = query.bind(*value);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, kind, id))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                kind,
                id: id.clone(),
            });
        }
        Ok(())
    }

    /// Overwrite an unversioned document and its index columns.
    async fn replace_doc<T: Serialize>(
        &self,
        actor: &UserContext,
        kind: DocumentKind,
        id: &Id,
        columns: &[(&str, Option<&str>)],
        doc: &T,
    ) -> StoreResult<()> {
        access::check_write(actor, kind)?;

        let mut assignments = vec!["data = $2".to_string()];
        for (i, (name, _)) in columns.iter().enumerate() {
            assignments.push(format!("{} = ${}", name, i + 3));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE id = $1",
            table_for(kind),
            assignments.join(", ")
        );

        let mut query = sqlx::query(&sql).bind(id).bind(encode(doc)?);
        for (_, value) in columns {
            query = query.bind(*value);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, kind, id))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind,
                id: id.clone(),
            });
        }
        Ok(())
    }

    async fn delete_doc(&self, actor: &UserContext, kind: DocumentKind, id: &Id) -> StoreResult<bool> {
        access::check_write(actor, kind)?;
        let sql = format!("DELETE FROM {} WHERE id = $1", table_for(kind));
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, kind, id))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl SchoolStore for PostgresStore {
    async fn get_school(&self, id: &Id) -> StoreResult<Option<School>> {
        Ok(self
            .fetch_doc(DocumentKind::School, id)
            .await?
            .map(|(doc, _)| doc))
    }

    async fn list_schools(&self) -> StoreResult<Vec<School>> {
        self.fetch_all(
            DocumentKind::School,
            "SELECT data FROM schools ORDER BY id",
            &[],
        )
        .await
    }

    async fn insert_school(&self, actor: &UserContext, school: School) -> StoreResult<()> {
        self.insert_doc(actor, DocumentKind::School, &school.id, &[], &school)
            .await
    }

    async fn delete_school(&self, actor: &UserContext, id: &Id) -> StoreResult<bool> {
        self.delete_doc(actor, DocumentKind::School, id).await
    }
}

#[async_trait::async_trait]
impl LevelStore for PostgresStore {
    async fn get_level(&self, id: &Id) -> StoreResult<Option<Level>> {
        Ok(self
            .fetch_doc(DocumentKind::Level, id)
            .await?
            .map(|(doc, _)| doc))
    }

    async fn list_levels_for_school(&self, school_id: &Id) -> StoreResult<Vec<Level>> {
        self.fetch_all(
            DocumentKind::Level,
            "SELECT data FROM levels WHERE school_id = $1 ORDER BY id",
            &[school_id.as_str()],
        )
        .await
    }

    async fn insert_level(&self, actor: &UserContext, level: Level) -> StoreResult<()> {
        self.insert_doc(
            actor,
            DocumentKind::Level,
            &level.id,
            &[("school_id", Some(level.school_id.as_str()))],
            &level,
        )
        .await
    }

    async fn delete_level(&self, actor: &UserContext, id: &Id) -> StoreResult<bool> {
        self.delete_doc(actor, DocumentKind::Level, id).await
    }
}

#[async_trait::async_trait]
impl SubjectStore for PostgresStore {
    async fn get_subject(&self, id: &Id) -> StoreResult<Option<Versioned<Subject>>> {
        Ok(self
            .fetch_doc(DocumentKind::Subject, id)
            .await?
            .map(|(doc, version)| Versioned::new(doc, version)))
    }

    async fn list_subjects_for_school(
        &self,
        school_id: &Id,
        level_id: Option<&Id>,
    ) -> StoreResult<Vec<Subject>> {
        match level_id {
            Some(level_id) => {
                self.fetch_all(
                    DocumentKind::Subject,
                    "SELECT data FROM subjects WHERE school_id = $1 AND level_id = $2 ORDER BY id",
                    &[school_id.as_str(), level_id.as_str()],
                )
                .await
            }
            None => {
                self.fetch_all(
                    DocumentKind::Subject,
                    "SELECT data FROM subjects WHERE school_id = $1 ORDER BY id",
                    &[school_id.as_str()],
                )
                .await
            }
        }
    }

    async fn insert_subject(&self, actor: &UserContext, mut subject: Subject) -> StoreResult<()> {
        subject.updated_at = Some(Utc::now());
        self.insert_doc(
            actor,
            DocumentKind::Subject,
            &subject.id,
            &[
                ("school_id", Some(subject.school_id.as_str())),
                ("level_id", Some(subject.level_id.as_str())),
            ],
            &subject,
        )
        .await
    }

    async fn delete_subject(&self, actor: &UserContext, id: &Id) -> StoreResult<bool> {
        self.delete_doc(actor, DocumentKind::Subject, id).await
    }
}

#[async_trait::async_trait]
impl TeacherStore for PostgresStore {
    async fn get_teacher(&self, id: &Id) -> StoreResult<Option<Versioned<Teacher>>> {
        Ok(self
            .fetch_doc(DocumentKind::Teacher, id)
            .await?
            .map(|(doc, version)| Versioned::new(doc, version)))
    }

    async fn list_teachers_for_school(&self, school_id: &Id) -> StoreResult<Vec<Teacher>> {
        self.fetch_all(
            DocumentKind::Teacher,
            "SELECT data FROM teachers WHERE school_id = $1 ORDER BY id",
            &[school_id.as_str()],
        )
        .await
    }

    async fn insert_teacher(&self, actor: &UserContext, mut teacher: Teacher) -> StoreResult<()> {
        teacher.updated_at = Some(Utc::now());
        self.insert_doc(
            actor,
            DocumentKind::Teacher,
            &teacher.id,
            &[("school_id", Some(teacher.school_id.as_str()))],
            &teacher,
        )
        .await
    }

    async fn delete_teacher(&self, actor: &UserContext, id: &Id) -> StoreResult<bool> {
        self.delete_doc(actor, DocumentKind::Teacher, id).await
    }
}

#[async_trait::async_trait]
impl RosterStore for PostgresStore {
    async fn get_parent(&self, id: &Id) -> StoreResult<Option<Parent>> {
        Ok(self
            .fetch_doc(DocumentKind::Parent, id)
            .await?
            .map(|(doc, _)| doc))
    }

    async fn list_parents(&self) -> StoreResult<Vec<Parent>> {
        self.fetch_all(
            DocumentKind::Parent,
            "SELECT data FROM parents ORDER BY id",
            &[],
        )
        .await
    }

    async fn insert_parent(&self, actor: &UserContext, parent: Parent) -> StoreResult<()> {
        self.insert_doc(actor, DocumentKind::Parent, &parent.id, &[], &parent)
            .await
    }

    async fn delete_parent(&self, actor: &UserContext, id: &Id) -> StoreResult<bool> {
        self.delete_doc(actor, DocumentKind::Parent, id).await
    }

    async fn get_student(&self, id: &Id) -> StoreResult<Option<Student>> {
        Ok(self
            .fetch_doc(DocumentKind::Student, id)
            .await?
            .map(|(doc, _)| doc))
    }

    async fn list_students_for_school(&self, school_id: &Id) -> StoreResult<Vec<Student>> {
        self.fetch_all(
            DocumentKind::Student,
            "SELECT data FROM students WHERE school_id = $1 ORDER BY id",
            &[school_id.as_str()],
        )
        .await
    }

    async fn list_students_for_parent(&self, parent_id: &Id) -> StoreResult<Vec<Student>> {
        self.fetch_all(
            DocumentKind::Student,
            "SELECT data FROM students WHERE parent_id = $1 ORDER BY id",
            &[parent_id.as_str()],
        )
        .await
    }

    async fn insert_student(&self, actor: &UserContext, student: Student) -> StoreResult<()> {
        self.insert_doc(
            actor,
            DocumentKind::Student,
            &student.id,
            &[
                ("school_id", Some(student.school_id.as_str())),
                ("parent_id", student.parent_id.as_deref()),
            ],
            &student,
        )
        .await
    }

    async fn update_student(&self, actor: &UserContext, student: Student) -> StoreResult<()> {
        self.replace_doc(
            actor,
            DocumentKind::Student,
            &student.id,
            &[
                ("school_id", Some(student.school_id.as_str())),
                ("parent_id", student.parent_id.as_deref()),
            ],
            &student,
        )
        .await
    }

    async fn delete_student(&self, actor: &UserContext, id: &Id) -> StoreResult<bool> {
        self.delete_doc(actor, DocumentKind::Student, id).await
    }
}

#[async_trait::async_trait]
impl LessonStore for PostgresStore {
    async fn get_lesson(&self, id: &Id) -> StoreResult<Option<Lesson>> {
        Ok(self
            .fetch_doc(DocumentKind::Lesson, id)
            .await?
            .map(|(doc, _)| doc))
    }

    async fn list_lessons_for_subject(&self, subject_id: &Id) -> StoreResult<Vec<Lesson>> {
        self.fetch_all(
            DocumentKind::Lesson,
            "SELECT data FROM lessons WHERE subject_id = $1 ORDER BY id",
            &[subject_id.as_str()],
        )
        .await
    }

    async fn insert_lesson(&self, actor: &UserContext, lesson: Lesson) -> StoreResult<()> {
        self.insert_doc(
            actor,
            DocumentKind::Lesson,
            &lesson.id,
            &[("subject_id", Some(lesson.subject_id.as_str()))],
            &lesson,
        )
        .await
    }

    async fn update_lesson(&self, actor: &UserContext, lesson: Lesson) -> StoreResult<()> {
        self.replace_doc(
            actor,
            DocumentKind::Lesson,
            &lesson.id,
            &[("subject_id", Some(lesson.subject_id.as_str()))],
            &lesson,
        )
        .await
    }

    async fn delete_lesson(&self, actor: &UserContext, id: &Id) -> StoreResult<bool> {
        self.delete_doc(actor, DocumentKind::Lesson, id).await
    }
}

#[async_trait::async_trait]
impl TransactionStore for PostgresStore {
    async fn commit(&self, actor: &UserContext, batch: WriteBatch) -> StoreResult<()> {
        access::check_batch(actor, batch.writes().iter().map(|w| w.write.kind()))?;
        let Some((guard_kind, guard_id)) = batch
            .writes()
            .first()
            .map(|w| (w.write.kind(), w.write.id().clone()))
        else {
            return Ok(());
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend(e, "Failed to begin transaction"))?;
        let now = Utc::now();

        // Any early return drops `tx`, which rolls the transaction back.
        for pending in batch.into_writes() {
            let kind = pending.write.kind();
            let id = pending.write.id().clone();
            let data = match pending.write {
                DocumentWrite::Teacher(mut teacher) => {
                    teacher.updated_at = Some(now);
                    encode(&teacher)?
                }
                DocumentWrite::Subject(mut subject) => {
                    subject.updated_at = Some(now);
                    encode(&subject)?
                }
            };

            let sql = format!(
                "UPDATE {} SET data = $1, version = version + 1, updated_at = $2 WHERE id = $3 AND version = $4",
                table_for(kind)
            );
            let result = sqlx::query(&sql)
                .bind(data)
                .bind(now)
                .bind(&id)
                .bind(pending.expected_version)
                .execute(&mut *tx)
                .await
                .map_err(|e| classify(e, kind, &id))?;

            if result.rows_affected() == 0 {
                let sql = format!("SELECT version FROM {} WHERE id = $1", table_for(kind));
                let current: Option<i64> = sqlx::query_scalar(&sql)
                    .bind(&id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| classify(e, kind, &id))?;
                return Err(match current {
                    Some(_) => StoreError::Conflict { kind, id },
                    None => StoreError::NotFound { kind, id },
                });
            }
        }

        // A serialization failure can surface at commit time as well.
        tx.commit()
            .await
            .map_err(|e| classify(e, guard_kind, &guard_id))?;
        Ok(())
    }
}

impl Store for PostgresStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_document_kind_has_a_table() {
        for kind in [
            DocumentKind::School,
            DocumentKind::Level,
            DocumentKind::Subject,
            DocumentKind::Teacher,
            DocumentKind::Parent,
            DocumentKind::Student,
            DocumentKind::Lesson,
        ] {
            let table = table_for(kind);
            assert!(
                MIGRATIONS.iter().any(|m| m.contains(&format!("EXISTS {} (", table))),
                "missing migration for {}",
                table
            );
        }
    }

    #[test]
    fn test_serialization_failures_are_retryable() {
        assert!(is_retryable(Some("40001")));
        assert!(is_retryable(Some("40P01")));
        assert!(!is_retryable(Some("23505")));
        assert!(!is_retryable(None));
    }

    #[test]
    fn test_non_database_errors_are_backend_failures() {
        let err = classify(sqlx::Error::RowNotFound, DocumentKind::Teacher, "T1");
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
