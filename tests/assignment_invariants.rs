use itertools::Itertools;
use school_admin_db::logic::validate::violation_types;
use school_admin_db::model::{
    IdSet, NewLevel, NewSchool, NewSubject, NewTeacher, UserContext, UserRole,
};
use school_admin_db::store::{
    LevelStore, MemoryStore, SchoolStore, SubjectStore, TeacherStore,
};
use school_admin_db::{audit_assignments, AssignmentService, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Op {
    Assign(&'static str, &'static str, &'static str),
    Remove(&'static str, &'static str, &'static str),
    Replace(&'static str, &'static str, &'static [&'static str]),
    AssignLevel(&'static str, &'static str),
}

async fn school_service() -> AssignmentService<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let ctx = UserContext::system();

    store
        .insert_school(
            &ctx,
            NewSchool { id: Some("SCH1".into()), name: "North".into(), extra: Default::default() }
                .into_school(),
        )
        .await
        .unwrap();
    for level in ["L1", "L2"] {
        store
            .insert_level(
                &ctx,
                NewLevel {
                    id: Some(level.into()),
                    school_id: "SCH1".into(),
                    name: level.into(),
                    extra: Default::default(),
                }
                .into_level(),
            )
            .await
            .unwrap();
    }
    for (id, level) in [("A", "L1"), ("B", "L1"), ("C", "L1"), ("E", "L2")] {
        store
            .insert_subject(
                &ctx,
                NewSubject {
                    id: Some(id.into()),
                    name: id.into(),
                    level_id: level.into(),
                    school_id: "SCH1".into(),
                    extra: Default::default(),
                }
                .into_subject(),
            )
            .await
            .unwrap();
    }
    for (id, role) in [("T1", UserRole::Staff), ("T2", UserRole::Tutor)] {
        store
            .insert_teacher(
                &ctx,
                NewTeacher {
                    id: Some(id.into()),
                    name: id.into(),
                    email: None,
                    role,
                    school_id: "SCH1".into(),
                    extra: Default::default(),
                }
                .into_teacher(),
            )
            .await
            .unwrap();
    }

    let retry = RetryPolicy { max_attempts: 3, backoff: Duration::ZERO };
    AssignmentService::new(store, retry)
}

async fn apply(service: &AssignmentService<MemoryStore>, op: &Op) {
    let ctx = UserContext::default_user();
    let result = match op {
        Op::Assign(t, l, s) => service.assign_teacher_to_subject(&ctx, t, s, l).await,
        Op::Remove(t, l, s) => service.remove_teacher_from_subject(&ctx, t, s, l).await,
        Op::Replace(t, l, subjects) => {
            let ids: IdSet = subjects.iter().map(|s| s.to_string()).collect();
            service
                .assign_subjects_to_teacher_for_level(&ctx, t, l, &ids)
                .await
        }
        Op::AssignLevel(t, l) => service.assign_level_to_teacher(&ctx, t, l).await,
    };
    result.unwrap_or_else(|e| panic!("{:?} failed: {}", op, e));
}

async fn assert_consistent(service: &AssignmentService<MemoryStore>, history: &[Op]) {
    let school = "SCH1".to_string();
    let teachers = service.store().list_teachers_for_school(&school).await.unwrap();
    let subjects = service
        .store()
        .list_subjects_for_school(&school, None)
        .await
        .unwrap();
    let report = audit_assignments(&teachers, &subjects);
    assert!(
        report.valid,
        "after {:?}: {:?}",
        history,
        violation_types(&report)
    );
}

#[tokio::test]
async fn test_every_ordering_keeps_both_sides_in_sync() {
    let ops = vec![
        Op::Assign("T1", "L1", "A"),
        Op::Assign("T2", "L1", "A"),
        Op::Replace("T1", "L1", &["B", "C"]),
        Op::Remove("T1", "L1", "B"),
        Op::Assign("T1", "L2", "E"),
    ];

    for ordering in ops.iter().cloned().permutations(ops.len()) {
        let service = school_service().await;
        for (step, op) in ordering.iter().enumerate() {
            apply(&service, op).await;
            assert_consistent(&service, &ordering[..=step]).await;
        }
    }
}

#[tokio::test]
async fn test_replacement_sets_converge() {
    let subjects = ["A", "B", "C"];
    let sets: Vec<Vec<&str>> = (0..=subjects.len())
        .flat_map(|k| subjects.iter().copied().combinations(k))
        .collect();

    let service = school_service().await;
    let ctx = UserContext::default_user();

    for (from, to) in sets.iter().cartesian_product(sets.iter()) {
        for target in [from, to] {
            let ids: IdSet = target.iter().map(|s| s.to_string()).collect();
            service
                .assign_subjects_to_teacher_for_level(&ctx, "T1", "L1", &ids)
                .await
                .unwrap();

            let teacher = service.store().get_teacher(&"T1".to_string()).await.unwrap().unwrap();
            match teacher.doc.subjects_for_level("L1") {
                Some(current) => assert_eq!(current, &ids),
                None => {
                    assert!(ids.is_empty());
                    assert!(!teacher.doc.classes.contains("L1"));
                }
            }
        }
        assert_consistent(&service, &[]).await;
    }
}

#[tokio::test]
async fn test_level_survives_until_last_subject_removed() {
    let service = school_service().await;
    for op in [
        Op::AssignLevel("T2", "L2"),
        Op::Assign("T2", "L1", "A"),
        Op::Assign("T2", "L1", "B"),
        Op::Remove("T2", "L1", "A"),
    ] {
        apply(&service, &op).await;
    }

    let teacher = service.store().get_teacher(&"T2".to_string()).await.unwrap().unwrap().doc;
    assert!(teacher.classes.contains("L1"));
    assert!(teacher.classes.contains("L2"));

    apply(&service, &Op::Remove("T2", "L1", "B")).await;
    let teacher = service.store().get_teacher(&"T2".to_string()).await.unwrap().unwrap().doc;
    assert!(!teacher.classes.contains("L1"));
    assert!(teacher.classes.contains("L2"));
    assert!(teacher.subjects.is_empty());
}
