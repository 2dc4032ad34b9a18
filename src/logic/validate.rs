use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::logic::error::AssignmentError;
use crate::model::{DocumentKind, Id, Level, Subject, Teacher};

pub fn ensure_can_teach(teacher: &Teacher) -> Result<(), AssignmentError> {
    if teacher.role.can_teach() {
        return Ok(());
    }
    Err(AssignmentError::InvalidArgument(format!(
        "user '{}' has role '{}' and cannot be assigned subjects",
        teacher.id, teacher.role
    )))
}

pub fn ensure_same_school_as_subject(teacher: &Teacher, subject: &Subject) -> Result<(), AssignmentError> {
    if teacher.school_id == subject.school_id {
        return Ok(());
    }
    Err(AssignmentError::SchoolMismatch {
        teacher_school: teacher.school_id.clone(),
        kind: DocumentKind::Subject,
        id: subject.id.clone(),
        other_school: subject.school_id.clone(),
    })
}

pub fn ensure_same_school_as_level(teacher: &Teacher, level: &Level) -> Result<(), AssignmentError> {
    if teacher.school_id == level.school_id {
        return Ok(());
    }
    Err(AssignmentError::SchoolMismatch {
        teacher_school: teacher.school_id.clone(),
        kind: DocumentKind::Level,
        id: level.id.clone(),
        other_school: level.school_id.clone(),
    })
}

pub fn ensure_subject_in_level(subject: &Subject, level_id: &str) -> Result<(), AssignmentError> {
    if subject.level_id == level_id {
        return Ok(());
    }
    Err(AssignmentError::InvalidArgument(format!(
        "subject '{}' belongs to level '{}', not '{}'",
        subject.id, subject.level_id, level_id
    )))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub valid: bool,
    pub teacher_count: usize,
    pub subject_count: usize,
    pub violations: Vec<ConsistencyViolation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyViolation {
    pub violation_type: ViolationType,
    pub teacher_id: Option<Id>,
    pub subject_id: Option<Id>,
    pub level_id: Option<Id>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationType {
    /// Teacher lists the subject but the subject does not list the teacher.
    SubjectMissingTeacher,
    /// Subject lists the teacher but the teacher does not list the subject.
    TeacherMissingSubject,
    /// Level has subjects but is not among the teacher's classes.
    LevelNotInClasses,
    /// Level key is present with no subjects under it.
    EmptyLevelEntry,
    /// Subject is filed under a level it does not belong to.
    SubjectOutsideLevel,
    /// Teacher and subject belong to different schools.
    CrossSchoolAssignment,
    /// Teacher references a subject that does not exist.
    UnknownSubject,
    /// Subject references a teacher that does not exist in its school.
    UnknownTeacher,
}

fn violation(
    violation_type: ViolationType,
    teacher_id: Option<&Id>,
    subject_id: Option<&Id>,
    level_id: Option<&Id>,
    message: String,
) -> ConsistencyViolation {
    ConsistencyViolation {
        violation_type,
        teacher_id: teacher_id.cloned(),
        subject_id: subject_id.cloned(),
        level_id: level_id.cloned(),
        message,
    }
}

/// Check the teacher/subject relationship invariants across a set of
/// documents. Read-only; reports every violation rather than stopping early.
pub fn audit_assignments(teachers: &[Teacher], subjects: &[Subject]) -> ConsistencyReport {
    let subjects_by_id: BTreeMap<&Id, &Subject> = subjects.iter().map(|s| (&s.id, s)).collect();
    let teachers_by_id: BTreeMap<&Id, &Teacher> = teachers.iter().map(|t| (&t.id, t)).collect();
    let mut violations = Vec::new();

    for teacher in teachers {
        for (level_id, subject_ids) in &teacher.subjects {
            if subject_ids.is_empty() {
                violations.push(violation(
                    ViolationType::EmptyLevelEntry,
                    Some(&teacher.id),
                    None,
                    Some(level_id),
                    format!("teacher '{}' has an empty subject list for level '{}'", teacher.id, level_id),
                ));
                continue;
            }
            if !teacher.classes.contains(level_id) {
                violations.push(violation(
                    ViolationType::LevelNotInClasses,
                    Some(&teacher.id),
                    None,
                    Some(level_id),
                    format!("teacher '{}' teaches in level '{}' but it is not among their classes", teacher.id, level_id),
                ));
            }

            for subject_id in subject_ids {
                let Some(subject) = subjects_by_id.get(subject_id) else {
                    violations.push(violation(
                        ViolationType::UnknownSubject,
                        Some(&teacher.id),
                        Some(subject_id),
                        Some(level_id),
                        format!("teacher '{}' references missing subject '{}'", teacher.id, subject_id),
                    ));
                    continue;
                };
                if subject.school_id != teacher.school_id {
                    violations.push(violation(
                        ViolationType::CrossSchoolAssignment,
                        Some(&teacher.id),
                        Some(subject_id),
                        Some(level_id),
                        format!(
                            "teacher '{}' (school '{}') is assigned subject '{}' of school '{}'",
                            teacher.id, teacher.school_id, subject_id, subject.school_id
                        ),
                    ));
                }
                if &subject.level_id != level_id {
                    violations.push(violation(
                        ViolationType::SubjectOutsideLevel,
                        Some(&teacher.id),
                        Some(subject_id),
                        Some(level_id),
                        format!(
                            "subject '{}' belongs to level '{}' but is filed under '{}'",
                            subject_id, subject.level_id, level_id
                        ),
                    ));
                }
                if !subject.has_teacher(&teacher.id) {
                    violations.push(violation(
                        ViolationType::SubjectMissingTeacher,
                        Some(&teacher.id),
                        Some(subject_id),
                        Some(level_id),
                        format!("subject '{}' does not list teacher '{}'", subject_id, teacher.id),
                    ));
                }
            }
        }
    }

    for subject in subjects {
        for teacher_id in &subject.teacher_ids {
            match teachers_by_id.get(teacher_id) {
                None => violations.push(violation(
                    ViolationType::UnknownTeacher,
                    Some(teacher_id),
                    Some(&subject.id),
                    Some(&subject.level_id),
                    format!("subject '{}' lists unknown teacher '{}'", subject.id, teacher_id),
                )),
                Some(teacher) if !teacher.teaches(&subject.level_id, &subject.id) => {
                    violations.push(violation(
                        ViolationType::TeacherMissingSubject,
                        Some(teacher_id),
                        Some(&subject.id),
                        Some(&subject.level_id),
                        format!(
                            "teacher '{}' does not list subject '{}' under level '{}'",
                            teacher_id, subject.id, subject.level_id
                        ),
                    ))
                }
                Some(_) => {}
            }
        }
    }

    ConsistencyReport {
        valid: violations.is_empty(),
        teacher_count: teachers.len(),
        subject_count: subjects.len(),
        violations,
    }
}

/// Violation kinds present in a report, for quick assertions and logging.
pub fn violation_types(report: &ConsistencyReport) -> BTreeSet<String> {
    report
        .violations
        .iter()
        .map(|v| format!("{:?}", v.violation_type))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewSubject, NewTeacher, UserRole};

    fn teacher(id: &str, school: &str) -> Teacher {
        NewTeacher {
            id: Some(id.to_string()),
            name: id.to_string(),
            email: None,
            role: UserRole::Tutor,
            school_id: school.to_string(),
            extra: Default::default(),
        }
        .into_teacher()
    }

    fn subject(id: &str, level: &str, school: &str) -> Subject {
        NewSubject {
            id: Some(id.to_string()),
            name: id.to_string(),
            level_id: level.to_string(),
            school_id: school.to_string(),
            extra: Default::default(),
        }
        .into_subject()
    }

    #[test]
    fn test_consistent_documents_pass() {
        let mut t = teacher("T1", "SCH1");
        let mut s = subject("SUB1", "L1", "SCH1");
        t.add_subject("L1", "SUB1");
        s.add_teacher("T1");

        let report = audit_assignments(&[t], &[s]);
        assert!(report.valid, "{:?}", report.violations);
        assert_eq!(report.teacher_count, 1);
    }

    #[test]
    fn test_one_sided_assignments_are_reported() {
        let mut t = teacher("T1", "SCH1");
        t.add_subject("L1", "SUB1");
        let mut s2 = subject("SUB2", "L1", "SCH1");
        s2.add_teacher("T1");

        let report = audit_assignments(&[t], &[subject("SUB1", "L1", "SCH1"), s2]);
        let kinds = violation_types(&report);
        assert!(!report.valid);
        assert!(kinds.contains("SubjectMissingTeacher"));
        assert!(kinds.contains("TeacherMissingSubject"));
    }

    #[test]
    fn test_legacy_level_shapes_are_reported() {
        let mut t = teacher("T1", "SCH1");
        t.subjects.insert("L1".to_string(), Default::default());
        t.subjects
            .insert("L2".to_string(), ["SUB2".to_string()].into_iter().collect());
        let mut s = subject("SUB2", "L2", "SCH2");
        s.add_teacher("T1");

        let kinds = violation_types(&audit_assignments(&[t], &[s]));
        assert!(kinds.contains("EmptyLevelEntry"));
        assert!(kinds.contains("LevelNotInClasses"));
        assert!(kinds.contains("CrossSchoolAssignment"));
    }

    #[test]
    fn test_precondition_helpers() {
        let t = teacher("T1", "SCH1");
        let s = subject("SUB1", "L1", "SCH2");

        assert!(matches!(
            ensure_same_school_as_subject(&t, &s),
            Err(AssignmentError::SchoolMismatch { .. })
        ));
        assert!(ensure_subject_in_level(&s, "L1").is_ok());
        assert!(matches!(
            ensure_subject_in_level(&s, "L2"),
            Err(AssignmentError::InvalidArgument(_))
        ));

        let mut admin = teacher("A1", "SCH1");
        admin.role = UserRole::Admin;
        assert!(ensure_can_teach(&admin).is_err());
    }
}
