//! Students, parents and lessons. Each write checks that every id it points
//! at exists and that a student's level sits in the student's school.

use chrono::Utc;
use log::info;

use crate::logic::assignment::AssignmentResult;
use crate::logic::error::AssignmentError;
use crate::model::{
    DocumentKind, Id, Lesson, LessonStats, LessonUpdate, NewLesson, NewParent, NewStudent, Parent,
    Student, StudentUpdate, UserContext,
};
use crate::store::Store;

async fn check_placement<S: Store>(store: &S, student: &Student) -> AssignmentResult<()> {
    if store.get_school(&student.school_id).await?.is_none() {
        return Err(AssignmentError::not_found(
            DocumentKind::School,
            &student.school_id,
        ));
    }
    let level = store
        .get_level(&student.level_id)
        .await?
        .ok_or_else(|| AssignmentError::not_found(DocumentKind::Level, &student.level_id))?;
    if level.school_id != student.school_id {
        return Err(AssignmentError::InvalidArgument(format!(
            "level '{}' belongs to school '{}', not '{}'",
            level.id, level.school_id, student.school_id
        )));
    }
    if let Some(parent_id) = &student.parent_id {
        if store.get_parent(parent_id).await?.is_none() {
            return Err(AssignmentError::not_found(DocumentKind::Parent, parent_id));
        }
    }
    Ok(())
}

pub async fn add_parent<S: Store>(
    store: &S,
    actor: &UserContext,
    new_parent: NewParent,
) -> AssignmentResult<Parent> {
    let now = Utc::now();
    let mut parent = new_parent.into_parent();
    parent.created_at = Some(now);
    parent.updated_at = Some(now);
    store.insert_parent(actor, parent.clone()).await?;
    info!("Added parent {}", parent.id);
    Ok(parent)
}

/// Delete a parent that no student points at any more.
pub async fn remove_parent<S: Store>(
    store: &S,
    actor: &UserContext,
    parent_id: &Id,
) -> AssignmentResult<()> {
    let children = store.list_students_for_parent(parent_id).await?;
    if !children.is_empty() {
        return Err(AssignmentError::InvalidArgument(format!(
            "parent '{}' still has {} student(s)",
            parent_id,
            children.len()
        )));
    }
    if !store.delete_parent(actor, parent_id).await? {
        return Err(AssignmentError::not_found(DocumentKind::Parent, parent_id));
    }
    Ok(())
}

pub async fn enroll_student<S: Store>(
    store: &S,
    actor: &UserContext,
    new_student: NewStudent,
) -> AssignmentResult<Student> {
    let student = new_student.into_student(Utc::now());
    check_placement(store, &student).await?;
    store.insert_student(actor, student.clone()).await?;
    info!(
        "Enrolled student {} in level {} of school {}",
        student.id, student.level_id, student.school_id
    );
    Ok(student)
}

/// Apply a partial update. The resulting placement is checked again, so a
/// move to another school must name a level of that school.
pub async fn update_student<S: Store>(
    store: &S,
    actor: &UserContext,
    student_id: &Id,
    update: StudentUpdate,
) -> AssignmentResult<Student> {
    let mut student = store
        .get_student(student_id)
        .await?
        .ok_or_else(|| AssignmentError::not_found(DocumentKind::Student, student_id))?;
    update.apply(&mut student);
    check_placement(store, &student).await?;
    student.updated_at = Some(Utc::now());
    store.update_student(actor, student.clone()).await?;
    Ok(student)
}

pub async fn add_lesson<S: Store>(
    store: &S,
    actor: &UserContext,
    new_lesson: NewLesson,
) -> AssignmentResult<Lesson> {
    let lesson = new_lesson.into_lesson(Utc::now());
    if store.get_subject(&lesson.subject_id).await?.is_none() {
        return Err(AssignmentError::not_found(
            DocumentKind::Subject,
            &lesson.subject_id,
        ));
    }
    store.insert_lesson(actor, lesson.clone()).await?;
    info!("Added lesson {} to subject {}", lesson.id, lesson.subject_id);
    Ok(lesson)
}

pub async fn update_lesson<S: Store>(
    store: &S,
    actor: &UserContext,
    lesson_id: &Id,
    update: LessonUpdate,
) -> AssignmentResult<Lesson> {
    let mut lesson = store
        .get_lesson(lesson_id)
        .await?
        .ok_or_else(|| AssignmentError::not_found(DocumentKind::Lesson, lesson_id))?;
    update.apply(&mut lesson, Utc::now());
    store.update_lesson(actor, lesson.clone()).await?;
    Ok(lesson)
}

/// Lessons of a subject, which must exist.
pub async fn subject_lessons<S: Store>(store: &S, subject_id: &Id) -> AssignmentResult<Vec<Lesson>> {
    if store.get_subject(subject_id).await?.is_none() {
        return Err(AssignmentError::not_found(DocumentKind::Subject, subject_id));
    }
    Ok(store.list_lessons_for_subject(subject_id).await?)
}

pub async fn lesson_stats<S: Store>(store: &S, subject_id: &Id) -> AssignmentResult<LessonStats> {
    let lessons = subject_lessons(store, subject_id).await?;
    Ok(LessonStats::of(&lessons))
}
