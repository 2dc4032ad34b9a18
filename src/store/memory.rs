use anyhow::anyhow;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::model::{
    DocumentKind, Id, Lesson, Level, Parent, School, Student, Subject, Teacher, UserContext,
};
use crate::store::access;
use crate::store::traits::{
    DocumentWrite, LessonStore, LevelStore, RosterStore, SchoolStore, Store, StoreError,
    StoreResult, SubjectStore, TeacherStore, TransactionStore, Versioned, WriteBatch,
};

#[derive(Debug, Default)]
struct Collections {
    schools: BTreeMap<Id, School>,
    levels: BTreeMap<Id, Level>,
    subjects: BTreeMap<Id, Versioned<Subject>>,
    teachers: BTreeMap<Id, Versioned<Teacher>>,
    parents: BTreeMap<Id, Parent>,
    students: BTreeMap<Id, Student>,
    lessons: BTreeMap<Id, Lesson>,
}

fn insert_new<T>(
    map: &mut BTreeMap<Id, T>,
    kind: DocumentKind,
    id: &Id,
    doc: T,
) -> StoreResult<()> {
    if map.contains_key(id) {
        return Err(StoreError::AlreadyExists {
            kind,
            id: id.clone(),
        });
    }
    map.insert(id.clone(), doc);
    Ok(())
}

fn replace_existing<T>(
    map: &mut BTreeMap<Id, T>,
    kind: DocumentKind,
    id: &Id,
    doc: T,
) -> StoreResult<()> {
    let slot = map
        .get_mut(id)
        .ok_or_else(|| StoreError::not_found(kind, id))?;
    *slot = doc;
    Ok(())
}

#[derive(Debug, Default)]
struct Faults {
    failing_writes: HashSet<(DocumentKind, Id)>,
    pending_conflicts: usize,
}

/// Process-local document store.
///
/// Commits validate and stage every write before applying any of them, so a
/// failed batch never leaves a partial write behind. Tests can inject write
/// failures and optimistic-concurrency conflicts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Collections>,
    faults: Mutex<Faults>,
    commit_attempts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every commit that writes this document fail while staging.
    pub fn fail_writes_to(&self, kind: DocumentKind, id: &str) {
        self.faults
            .lock()
            .failing_writes
            .insert((kind, id.to_string()));
    }

    /// Make the next `count` commits fail with a conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.faults.lock().pending_conflicts = count;
    }

    /// Number of `commit` calls seen so far, successful or not.
    pub fn commit_attempts(&self) -> usize {
        self.commit_attempts.load(Ordering::SeqCst)
    }

    /// Overwrite a stored document in place, bumping its version. Simulates a
    /// concurrent writer outside any transaction.
    pub fn touch_teacher(&self, teacher: Teacher) -> StoreResult<()> {
        let mut data = self.data.write();
        let entry = data
            .teachers
            .get_mut(&teacher.id)
            .ok_or_else(|| StoreError::not_found(DocumentKind::Teacher, &teacher.id))?;
        entry.version += 1;
        entry.doc = teacher;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SchoolStore for MemoryStore {
    async fn get_school(&self, id: &Id) -> StoreResult<Option<School>> {
        Ok(self.data.read().schools.get(id).cloned())
    }

    async fn list_schools(&self) -> StoreResult<Vec<School>> {
        Ok(self.data.read().schools.values().cloned().collect())
    }

    async fn insert_school(&self, actor: &UserContext, school: School) -> StoreResult<()> {
        access::check_write(actor, DocumentKind::School)?;
        let mut data = self.data.write();
        if data.schools.contains_key(&school.id) {
            return Err(StoreError::AlreadyExists {
                kind: DocumentKind::School,
                id: school.id,
            });
        }
        data.schools.insert(school.id.clone(), school);
        Ok(())
    }

    async fn delete_school(&self, actor: &UserContext, id: &Id) -> StoreResult<bool> {
        access::check_write(actor, DocumentKind::School)?;
        Ok(self.data.write().schools.remove(id).is_some())
    }
}

#[async_trait::async_trait]
impl LevelStore for MemoryStore {
    async fn get_level(&self, id: &Id) -> StoreResult<Option<Level>> {
        Ok(self.data.read().levels.get(id).cloned())
    }

    async fn list_levels_for_school(&self, school_id: &Id) -> StoreResult<Vec<Level>> {
        Ok(self
            .data
            .read()
            .levels
            .values()
            .filter(|level| &level.school_id == school_id)
            .cloned()
            .collect())
    }

    async fn insert_level(&self, actor: &UserContext, level: Level) -> StoreResult<()> {
        access::check_write(actor, DocumentKind::Level)?;
        let mut data = self.data.write();
        if data.levels.contains_key(&level.id) {
            return Err(StoreError::AlreadyExists {
                kind: DocumentKind::Level,
                id: level.id,
            });
        }
        data.levels.insert(level.id.clone(), level);
        Ok(())
    }

    async fn delete_level(&self, actor: &UserContext, id: &Id) -> StoreResult<bool> {
        access::check_write(actor, DocumentKind::Level)?;
        Ok(self.data.write().levels.remove(id).is_some())
    }
}

#[async_trait::async_trait]
impl SubjectStore for MemoryStore {
    async fn get_subject(&self, id: &Id) -> StoreResult<Option<Versioned<Subject>>> {
        Ok(self.data.read().subjects.get(id).cloned())
    }

    async fn list_subjects_for_school(
        &self,
        school_id: &Id,
        level_id: Option<&Id>,
    ) -> StoreResult<Vec<Subject>> {
        Ok(self
            .data
            .read()
            .subjects
            .values()
            .map(|v| &v.doc)
            .filter(|s| &s.school_id == school_id)
            .filter(|s| level_id.map_or(true, |level| &s.level_id == level))
            .cloned()
            .collect())
    }

    async fn insert_subject(&self, actor: &UserContext, mut subject: Subject) -> StoreResult<()> {
        access::check_write(actor, DocumentKind::Subject)?;
        let mut data = self.data.write();
        if data.subjects.contains_key(&subject.id) {
            return Err(StoreError::AlreadyExists {
                kind: DocumentKind::Subject,
                id: subject.id,
            });
        }
        subject.updated_at = Some(Utc::now());
        data.subjects
            .insert(subject.id.clone(), Versioned::new(subject, 1));
        Ok(())
    }

    async fn delete_subject(&self, actor: &UserContext, id: &Id) -> StoreResult<bool> {
        access::check_write(actor, DocumentKind::Subject)?;
        Ok(self.data.write().subjects.remove(id).is_some())
    }
}

#[async_trait::async_trait]
impl TeacherStore for MemoryStore {
    async fn get_teacher(&self, id: &Id) -> StoreResult<Option<Versioned<Teacher>>> {
        Ok(self.data.read().teachers.get(id).cloned())
    }

    async fn list_teachers_for_school(&self, school_id: &Id) -> StoreResult<Vec<Teacher>> {
        Ok(self
            .data
            .read()
            .teachers
            .values()
            .map(|v| &v.doc)
            .filter(|t| &t.school_id == school_id)
            .cloned()
            .collect())
    }

    async fn insert_teacher(&self, actor: &UserContext, mut teacher: Teacher) -> StoreResult<()> {
        access::check_write(actor, DocumentKind::Teacher)?;
        let mut data = self.data.write();
        if data.teachers.contains_key(&teacher.id) {
            return Err(StoreError::AlreadyExists {
                kind: DocumentKind::Teacher,
                id: teacher.id,
            });
        }
        teacher.updated_at = Some(Utc::now());
        data.teachers
            .insert(teacher.id.clone(), Versioned::new(teacher, 1));
        Ok(())
    }

    async fn delete_teacher(&self, actor: &UserContext, id: &Id) -> StoreResult<bool> {
        access::check_write(actor, DocumentKind::Teacher)?;
        Ok(self.data.write().teachers.remove(id).is_some())
    }
}

#[async_trait::async_trait]
impl RosterStore for MemoryStore {
    async fn get_parent(&self, id: &Id) -> StoreResult<Option<Parent>> {
        Ok(self.data.read().parents.get(id).cloned())
    }

    async fn list_parents(&self) -> StoreResult<Vec<Parent>> {
        Ok(self.data.read().parents.values().cloned().collect())
    }

    async fn insert_parent(&self, actor: &UserContext, parent: Parent) -> StoreResult<()> {
        access::check_write(actor, DocumentKind::Parent)?;
        let id = parent.id.clone();
        insert_new(&mut self.data.write().parents, DocumentKind::Parent, &id, parent)
    }

    async fn delete_parent(&self, actor: &UserContext, id: &Id) -> StoreResult<bool> {
        access::check_write(actor, DocumentKind::Parent)?;
        Ok(self.data.write().parents.remove(id).is_some())
    }

    async fn get_student(&self, id: &Id) -> StoreResult<Option<Student>> {
        Ok(self.data.read().students.get(id).cloned())
    }

    async fn list_students_for_school(&self, school_id: &Id) -> StoreResult<Vec<Student>> {
        Ok(self
            .data
            .read()
            .students
            .values()
            .filter(|s| &s.school_id == school_id)
            .cloned()
            .collect())
    }

    async fn list_students_for_parent(&self, parent_id: &Id) -> StoreResult<Vec<Student>> {
        Ok(self
            .data
            .read()
            .students
            .values()
            .filter(|s| s.parent_id.as_ref() == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn insert_student(&self, actor: &UserContext, student: Student) -> StoreResult<()> {
        access::check_write(actor, DocumentKind::Student)?;
        let id = student.id.clone();
        insert_new(&mut self.data.write().students, DocumentKind::Student, &id, student)
    }

    async fn update_student(&self, actor: &UserContext, student: Student) -> StoreResult<()> {
        access::check_write(actor, DocumentKind::Student)?;
        let id = student.id.clone();
        replace_existing(&mut self.data.write().students, DocumentKind::Student, &id, student)
    }

    async fn delete_student(&self, actor: &UserContext, id: &Id) -> StoreResult<bool> {
        access::check_write(actor, DocumentKind::Student)?;
        Ok(self.data.write().students.remove(id).is_some())
    }
}

#[async_trait::async_trait]
impl LessonStore for MemoryStore {
    async fn get_lesson(&self, id: &Id) -> StoreResult<Option<Lesson>> {
        Ok(self.data.read().lessons.get(id).cloned())
    }

    async fn list_lessons_for_subject(&self, subject_id: &Id) -> StoreResult<Vec<Lesson>> {
        Ok(self
            .data
            .read()
            .lessons
            .values()
            .filter(|l| &l.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn insert_lesson(&self, actor: &UserContext, lesson: Lesson) -> StoreResult<()> {
        access::check_write(actor, DocumentKind::Lesson)?;
        let id = lesson.id.clone();
        insert_new(&mut self.data.write().lessons, DocumentKind::Lesson, &id, lesson)
    }

    async fn update_lesson(&self, actor: &UserContext, lesson: Lesson) -> StoreResult<()> {
        access::check_write(actor, DocumentKind::Lesson)?;
        let id = lesson.id.clone();
        replace_existing(&mut self.data.write().lessons, DocumentKind::Lesson, &id, lesson)
    }

    async fn delete_lesson(&self, actor: &UserContext, id: &Id) -> StoreResult<bool> {
        access::check_write(actor, DocumentKind::Lesson)?;
        Ok(self.data.write().lessons.remove(id).is_some())
    }
}

#[async_trait::async_trait]
impl TransactionStore for MemoryStore {
    async fn commit(&self, actor: &UserContext, batch: WriteBatch) -> StoreResult<()> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        access::check_batch(actor, batch.writes().iter().map(|w| w.write.kind()))?;

        let failing = {
            let mut faults = self.faults.lock();
            if faults.pending_conflicts > 0 {
                faults.pending_conflicts -= 1;
                if let Some(first) = batch.writes().first() {
                    return Err(StoreError::Conflict {
                        kind: first.write.kind(),
                        id: first.write.id().clone(),
                    });
                }
            }
            faults.failing_writes.clone()
        };

        let mut data = self.data.write();

        // Validate and stage everything before the first mutation.
        let mut staged = Vec::with_capacity(batch.len());
        for pending in batch.into_writes() {
            let kind = pending.write.kind();
            let id = pending.write.id().clone();
            let current = match &pending.write {
                DocumentWrite::Teacher(t) => data.teachers.get(&t.id).map(|v| v.version),
                DocumentWrite::Subject(s) => data.subjects.get(&s.id).map(|v| v.version),
            };
            let Some(current) = current else {
                return Err(StoreError::NotFound { kind, id });
            };
            if current != pending.expected_version {
                return Err(StoreError::Conflict { kind, id });
            }
            if failing.contains(&(kind, id.clone())) {
                return Err(StoreError::Backend(anyhow!(
                    "write to {} '{}' failed",
                    kind,
                    id
                )));
            }
            staged.push((pending.write, current + 1));
        }

        let now = Utc::now();
        for (write, version) in staged {
            match write {
                DocumentWrite::Teacher(mut teacher) => {
                    teacher.updated_at = Some(now);
                    data.teachers
                        .insert(teacher.id.clone(), Versioned::new(teacher, version));
                }
                DocumentWrite::Subject(mut subject) => {
                    subject.updated_at = Some(now);
                    data.subjects
                        .insert(subject.id.clone(), Versioned::new(subject, version));
                }
            }
        }
        Ok(())
    }
}

impl Store for MemoryStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewStudent, NewSubject, NewTeacher, UserRole};

    fn admin() -> UserContext {
        UserContext::default_user()
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_teacher(
                &admin(),
                NewTeacher {
                    id: Some("T1".to_string()),
                    name: "Ada".to_string(),
                    email: None,
                    role: UserRole::Staff,
                    school_id: "SCH1".to_string(),
                    extra: Default::default(),
                }
                .into_teacher(),
            )
            .await
            .unwrap();
        store
            .insert_subject(
                &admin(),
                NewSubject {
                    id: Some("SUB1".to_string()),
                    name: "Mathematics".to_string(),
                    level_id: "L1".to_string(),
                    school_id: "SCH1".to_string(),
                    extra: Default::default(),
                }
                .into_subject(),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_commit_bumps_versions() {
        let store = seeded().await;
        let teacher = store.get_teacher(&"T1".to_string()).await.unwrap().unwrap();
        let subject = store.get_subject(&"SUB1".to_string()).await.unwrap().unwrap();

        let mut batch = WriteBatch::new();
        batch
            .update_teacher(teacher.doc.clone(), teacher.version)
            .update_subject(subject.doc.clone(), subject.version);
        store.commit(&admin(), batch).await.unwrap();

        let teacher = store.get_teacher(&"T1".to_string()).await.unwrap().unwrap();
        assert_eq!(teacher.version, 2);
        assert!(teacher.doc.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_version_is_a_conflict() {
        let store = seeded().await;
        let teacher = store.get_teacher(&"T1".to_string()).await.unwrap().unwrap();
        store.touch_teacher(teacher.doc.clone()).unwrap();

        let mut batch = WriteBatch::new();
        batch.update_teacher(teacher.doc, teacher.version);
        let err = store.commit(&admin(), batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { kind: DocumentKind::Teacher, .. }));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_every_document_untouched() {
        let store = seeded().await;
        let teacher = store.get_teacher(&"T1".to_string()).await.unwrap().unwrap();
        let subject = store.get_subject(&"SUB1".to_string()).await.unwrap().unwrap();
        store.fail_writes_to(DocumentKind::Teacher, "T1");

        let mut changed_subject = subject.doc.clone();
        changed_subject.add_teacher("T1");
        let mut changed_teacher = teacher.doc.clone();
        changed_teacher.add_subject("L1", "SUB1");

        let mut batch = WriteBatch::new();
        batch
            .update_subject(changed_subject, subject.version)
            .update_teacher(changed_teacher, teacher.version);
        assert!(store.commit(&admin(), batch).await.is_err());

        assert_eq!(store.get_subject(&"SUB1".to_string()).await.unwrap(), Some(subject));
        assert_eq!(store.get_teacher(&"T1".to_string()).await.unwrap(), Some(teacher));
    }

    #[tokio::test]
    async fn test_commit_requires_admin() {
        let store = seeded().await;
        let teacher = store.get_teacher(&"T1".to_string()).await.unwrap().unwrap();
        let actor = UserContext::new("T1".to_string(), UserRole::Staff);

        let mut batch = WriteBatch::new();
        batch.update_teacher(teacher.doc, teacher.version);
        let err = store.commit(&actor, batch).await.unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let store = seeded().await;
        let subject = store.get_subject(&"SUB1".to_string()).await.unwrap().unwrap();
        let err = store.insert_subject(&admin(), subject.doc).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_subjects_filter_by_level() {
        let store = seeded().await;
        let school = "SCH1".to_string();
        let l1 = "L1".to_string();
        let l2 = "L2".to_string();

        assert_eq!(store.list_subjects_for_school(&school, None).await.unwrap().len(), 1);
        assert_eq!(store.list_subjects_for_school(&school, Some(&l1)).await.unwrap().len(), 1);
        assert!(store.list_subjects_for_school(&school, Some(&l2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_students_list_by_parent_and_update_needs_existing() {
        let store = MemoryStore::new();
        let student = NewStudent {
            id: Some("S1".to_string()),
            name: "Ann".to_string(),
            email: None,
            school_id: "SCH1".to_string(),
            level_id: "L1".to_string(),
            parent_id: Some("P1".to_string()),
            extra: Default::default(),
        }
        .into_student(Utc::now());
        store.insert_student(&admin(), student.clone()).await.unwrap();

        let children = store.list_students_for_parent(&"P1".to_string()).await.unwrap();
        assert_eq!(children, vec![student.clone()]);
        assert!(store.list_students_for_parent(&"P2".to_string()).await.unwrap().is_empty());

        let mut ghost = student;
        ghost.id = "S2".to_string();
        let err = store.update_student(&admin(), ghost).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: DocumentKind::Student, .. }));
    }
}
