use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::logic::error::AssignmentError;
use crate::logic::reconcile::SubjectSetDiff;
use crate::logic::validate::{self, ConsistencyReport};
use crate::model::{DocumentKind, IdSet, Level, Subject, Teacher, TeacherSummary, UserContext};
use crate::store::{Store, Versioned, WriteBatch};

pub type AssignmentResult<T> = Result<T, AssignmentError>;

/// Bounded retry for optimistic transactions that lose a write race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

/// Keeps `Subject.teacherIds` and `Teacher.classes`/`Teacher.subjects` in
/// step. Every mutation re-reads both sides, computes the new documents and
/// commits them as one version-checked batch.
pub struct AssignmentService<S> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: Store> AssignmentService<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Assign one subject to a teacher, activating the subject's level.
    pub async fn assign_teacher_to_subject(
        &self,
        actor: &UserContext,
        teacher_id: &str,
        subject_id: &str,
        level_id: &str,
    ) -> AssignmentResult<()> {
        let attempts = self
            .run_transaction("assign_teacher_to_subject", || {
                self.try_assign_teacher_to_subject(actor, teacher_id, subject_id, level_id)
            })
            .await?;
        info!(
            "Assigned teacher {} to subject {} in level {} ({} attempt(s))",
            teacher_id, subject_id, level_id, attempts
        );
        Ok(())
    }

    /// Replace the teacher's subjects for a level and reconcile every subject
    /// that gains or loses the teacher.
    pub async fn assign_subjects_to_teacher_for_level(
        &self,
        actor: &UserContext,
        teacher_id: &str,
        level_id: &str,
        subject_ids: &IdSet,
    ) -> AssignmentResult<()> {
        let attempts = self
            .run_transaction("assign_subjects_to_teacher_for_level", || {
                self.try_replace_level_subjects(actor, teacher_id, level_id, subject_ids)
            })
            .await?;
        info!(
            "Set subjects of teacher {} in level {} to {} subject(s) ({} attempt(s))",
            teacher_id,
            level_id,
            subject_ids.len(),
            attempts
        );
        Ok(())
    }

    /// Remove one subject from a teacher. Removing an absent assignment is a
    /// successful no-op.
    pub async fn remove_teacher_from_subject(
        &self,
        actor: &UserContext,
        teacher_id: &str,
        subject_id: &str,
        level_id: &str,
    ) -> AssignmentResult<()> {
        let attempts = self
            .run_transaction("remove_teacher_from_subject", || {
                self.try_remove_teacher_from_subject(actor, teacher_id, subject_id, level_id)
            })
            .await?;
        info!(
            "Removed teacher {} from subject {} in level {} ({} attempt(s))",
            teacher_id, subject_id, level_id, attempts
        );
        Ok(())
    }

    /// Add a level to the teacher's classes without assigning subjects.
    pub async fn assign_level_to_teacher(
        &self,
        actor: &UserContext,
        teacher_id: &str,
        level_id: &str,
    ) -> AssignmentResult<()> {
        let attempts = self
            .run_transaction("assign_level_to_teacher", || {
                self.try_assign_level(actor, teacher_id, level_id)
            })
            .await?;
        info!(
            "Assigned level {} to teacher {} ({} attempt(s))",
            level_id, teacher_id, attempts
        );
        Ok(())
    }

    /// Levels of the teacher's school the teacher is not active in yet.
    pub async fn available_levels(&self, teacher_id: &str) -> AssignmentResult<Vec<Level>> {
        let teacher = self.load_teacher(teacher_id).await?.doc;
        let levels = self.store.list_levels_for_school(&teacher.school_id).await?;
        Ok(levels
            .into_iter()
            .filter(|level| !teacher.classes.contains(&level.id))
            .collect())
    }

    /// Subjects of a level the teacher could still be assigned to.
    pub async fn available_subjects(
        &self,
        teacher_id: &str,
        level_id: &str,
    ) -> AssignmentResult<Vec<Subject>> {
        let teacher = self.load_teacher(teacher_id).await?.doc;
        let level_id = level_id.to_string();
        let subjects = self
            .store
            .list_subjects_for_school(&teacher.school_id, Some(&level_id))
            .await?;
        Ok(subjects
            .into_iter()
            .filter(|subject| !teacher.teaches(&level_id, &subject.id))
            .collect())
    }

    pub async fn teacher_summary(&self, teacher_id: &str) -> AssignmentResult<TeacherSummary> {
        let teacher = self.load_teacher(teacher_id).await?;
        Ok(TeacherSummary::from(&teacher.doc))
    }

    /// Check every relationship invariant for one school.
    pub async fn audit_school(&self, school_id: &str) -> AssignmentResult<ConsistencyReport> {
        let school_id = school_id.to_string();
        if self.store.get_school(&school_id).await?.is_none() {
            return Err(AssignmentError::not_found(DocumentKind::School, &school_id));
        }
        let teachers = self.store.list_teachers_for_school(&school_id).await?;
        let subjects = self.store.list_subjects_for_school(&school_id, None).await?;
        let report = validate::audit_assignments(&teachers, &subjects);
        if !report.valid {
            warn!(
                "School {} has {} assignment inconsistencies",
                school_id,
                report.violations.len()
            );
        }
        Ok(report)
    }

    /// Runs `attempt` until it stops failing with a conflict or the retry
    /// budget is spent. Returns the number of attempts used.
    async fn run_transaction<F, Fut>(&self, operation: &str, mut attempt: F) -> AssignmentResult<u32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AssignmentResult<()>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt().await {
                Ok(()) => return Ok(attempts),
                Err(err) if err.is_conflict() => {
                    if attempts >= max_attempts {
                        warn!(
                            "{} gave up after {} conflicting attempt(s)",
                            operation, attempts
                        );
                        return Err(AssignmentError::Conflict { attempts });
                    }
                    warn!(
                        "{} hit a write conflict (attempt {}/{}), retrying",
                        operation, attempts, max_attempts
                    );
                    if !self.retry.backoff.is_zero() {
                        tokio::time::sleep(self.retry.backoff * attempts).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_assign_teacher_to_subject(
        &self,
        actor: &UserContext,
        teacher_id: &str,
        subject_id: &str,
        level_id: &str,
    ) -> AssignmentResult<()> {
        let subject = self.load_subject(subject_id).await?;
        let teacher = self.load_teacher(teacher_id).await?;

        validate::ensure_can_teach(&teacher.doc)?;
        validate::ensure_subject_in_level(&subject.doc, level_id)?;
        validate::ensure_same_school_as_subject(&teacher.doc, &subject.doc)?;

        let mut next_subject = subject.doc.clone();
        let mut next_teacher = teacher.doc.clone();
        next_subject.add_teacher(teacher_id);
        next_teacher.add_subject(level_id, subject_id);

        self.commit_pair(actor, teacher, next_teacher, subject, next_subject)
            .await
    }

    async fn try_remove_teacher_from_subject(
        &self,
        actor: &UserContext,
        teacher_id: &str,
        subject_id: &str,
        level_id: &str,
    ) -> AssignmentResult<()> {
        let subject = self.load_subject(subject_id).await?;
        let teacher = self.load_teacher(teacher_id).await?;

        validate::ensure_subject_in_level(&subject.doc, level_id)?;

        let mut next_subject = subject.doc.clone();
        let mut next_teacher = teacher.doc.clone();
        next_subject.remove_teacher(teacher_id);
        next_teacher.remove_subject(level_id, subject_id);

        self.commit_pair(actor, teacher, next_teacher, subject, next_subject)
            .await
    }

    async fn try_replace_level_subjects(
        &self,
        actor: &UserContext,
        teacher_id: &str,
        level_id: &str,
        subject_ids: &IdSet,
    ) -> AssignmentResult<()> {
        let teacher = self.load_teacher(teacher_id).await?;
        validate::ensure_can_teach(&teacher.doc)?;
        let level = self.load_level(level_id).await?;
        validate::ensure_same_school_as_level(&teacher.doc, &level).map_err(school_as_argument)?;

        let previous = teacher
            .doc
            .subjects_for_level(level_id)
            .cloned()
            .unwrap_or_default();
        let diff = SubjectSetDiff::between(&previous, subject_ids);
        debug!(
            "Teacher {} level {} subject change {}",
            teacher_id,
            level_id,
            diff.describe()
        );

        let mut batch = WriteBatch::new();

        // Every subject in the new set must exist and belong to this level
        // and school before anything is written.
        for subject_id in subject_ids {
            let subject = self.load_subject(subject_id).await?;
            validate::ensure_subject_in_level(&subject.doc, level_id)?;
            validate::ensure_same_school_as_subject(&teacher.doc, &subject.doc)
                .map_err(school_as_argument)?;
            if !subject.doc.has_teacher(teacher_id) {
                let mut next = subject.doc.clone();
                next.add_teacher(teacher_id);
                batch.update_subject(next, subject.version);
            }
        }

        for subject_id in &diff.removed {
            let Some(subject) = self.store.get_subject(subject_id).await? else {
                warn!(
                    "Subject {} vanished before teacher {} could be detached; skipping",
                    subject_id, teacher_id
                );
                continue;
            };
            if subject.doc.has_teacher(teacher_id) {
                let mut next = subject.doc.clone();
                next.remove_teacher(teacher_id);
                batch.update_subject(next, subject.version);
            }
        }

        let mut next_teacher = teacher.doc.clone();
        next_teacher.replace_level_subjects(level_id, subject_ids.clone());

        if batch.is_empty() && next_teacher == teacher.doc {
            debug!("Teacher {} level {} already up to date", teacher_id, level_id);
            return Ok(());
        }
        // The teacher write always goes in: its version guards the whole set.
        batch.update_teacher(next_teacher, teacher.version);
        self.store.commit(actor, batch).await?;
        Ok(())
    }

    async fn try_assign_level(
        &self,
        actor: &UserContext,
        teacher_id: &str,
        level_id: &str,
    ) -> AssignmentResult<()> {
        let teacher = self.load_teacher(teacher_id).await?;
        validate::ensure_can_teach(&teacher.doc)?;
        let level = self.load_level(level_id).await?;
        validate::ensure_same_school_as_level(&teacher.doc, &level)?;

        let mut next_teacher = teacher.doc.clone();
        if !next_teacher.add_class(level_id) {
            debug!("Teacher {} already active in level {}", teacher_id, level_id);
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        batch.update_teacher(next_teacher, teacher.version);
        self.store.commit(actor, batch).await?;
        Ok(())
    }

    /// Writes both documents if either changed; skips the commit otherwise.
    async fn commit_pair(
        &self,
        actor: &UserContext,
        teacher: Versioned<Teacher>,
        next_teacher: Teacher,
        subject: Versioned<Subject>,
        next_subject: Subject,
    ) -> AssignmentResult<()> {
        if next_teacher == teacher.doc && next_subject == subject.doc {
            debug!(
                "Teacher {} and subject {} already consistent, nothing to write",
                teacher.doc.id, subject.doc.id
            );
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        batch
            .update_subject(next_subject, subject.version)
            .update_teacher(next_teacher, teacher.version);
        self.store.commit(actor, batch).await?;
        Ok(())
    }

    async fn load_teacher(&self, teacher_id: &str) -> AssignmentResult<Versioned<Teacher>> {
        self.store
            .get_teacher(&teacher_id.to_string())
            .await?
            .ok_or_else(|| AssignmentError::not_found(DocumentKind::Teacher, teacher_id))
    }

    async fn load_subject(&self, subject_id: &str) -> AssignmentResult<Versioned<Subject>> {
        self.store
            .get_subject(&subject_id.to_string())
            .await?
            .ok_or_else(|| AssignmentError::not_found(DocumentKind::Subject, subject_id))
    }

    async fn load_level(&self, level_id: &str) -> AssignmentResult<Level> {
        self.store
            .get_level(&level_id.to_string())
            .await?
            .ok_or_else(|| AssignmentError::not_found(DocumentKind::Level, level_id))
    }
}

/// Bulk replace reports a foreign school as a bad input list.
fn school_as_argument(err: AssignmentError) -> AssignmentError {
    match err {
        AssignmentError::SchoolMismatch { .. } => AssignmentError::InvalidArgument(err.to_string()),
        other => other,
    }
}
