use crate::model::{
    Level, NewLevel, NewSchool, NewSubject, NewTeacher, School, Subject, Teacher, UserContext,
    UserRole,
};
use crate::store::traits::Store;
use anyhow::Result;

const SCHOOL_ID: &str = "school-north";

fn school() -> School {
    NewSchool {
        id: Some(SCHOOL_ID.to_string()),
        name: "North Primary".to_string(),
        extra: Default::default(),
    }
    .into_school()
}

fn level(id: &str, name: &str) -> Level {
    NewLevel {
        id: Some(id.to_string()),
        school_id: SCHOOL_ID.to_string(),
        name: name.to_string(),
        extra: Default::default(),
    }
    .into_level()
}

fn subject(id: &str, name: &str, level_id: &str) -> Subject {
    NewSubject {
        id: Some(id.to_string()),
        name: name.to_string(),
        level_id: level_id.to_string(),
        school_id: SCHOOL_ID.to_string(),
        extra: Default::default(),
    }
    .into_subject()
}

fn teacher(id: &str, name: &str, email: &str, role: UserRole) -> Teacher {
    NewTeacher {
        id: Some(id.to_string()),
        name: name.to_string(),
        email: Some(email.to_string()),
        role,
        school_id: SCHOOL_ID.to_string(),
        extra: Default::default(),
    }
    .into_teacher()
}

/// Insert a small demonstration school. Skipped when the school already exists.
pub async fn load_seed_data<S: Store>(store: &S) -> Result<()> {
    let ctx = UserContext::system();

    if store.get_school(&SCHOOL_ID.to_string()).await?.is_some() {
        log::info!("Seed school '{}' already present, skipping", SCHOOL_ID);
        return Ok(());
    }

    store.insert_school(&ctx, school()).await?;
    store.insert_level(&ctx, level("grade-1", "Grade 1")).await?;
    store.insert_level(&ctx, level("grade-2", "Grade 2")).await?;

    let mut maths = subject("g1-maths", "Mathematics", "grade-1");
    let reading = subject("g1-reading", "Reading", "grade-1");
    let science = subject("g2-science", "Science", "grade-2");

    // One assignment, written on both sides.
    let mut ada = teacher("teacher-ada", "Ada Lovelace", "ada@north.example", UserRole::Staff);
    ada.add_subject(&maths.level_id, &maths.id);
    maths.add_teacher(&ada.id);

    for doc in [maths, reading, science] {
        store.insert_subject(&ctx, doc).await?;
    }
    store.insert_teacher(&ctx, ada).await?;
    store
        .insert_teacher(
            &ctx,
            teacher("teacher-alan", "Alan Turing", "alan@north.example", UserRole::Tutor),
        )
        .await?;

    log::info!("Seeded school '{}' with 2 levels, 3 subjects, 2 teachers", SCHOOL_ID);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::audit_assignments;
    use crate::store::{LevelStore, MemoryStore, SubjectStore, TeacherStore};

    #[tokio::test]
    async fn test_seed_is_consistent_and_idempotent() {
        let store = MemoryStore::new();
        load_seed_data(&store).await.unwrap();
        load_seed_data(&store).await.unwrap();

        let school_id = SCHOOL_ID.to_string();
        let teachers = store.list_teachers_for_school(&school_id).await.unwrap();
        let subjects = store.list_subjects_for_school(&school_id, None).await.unwrap();
        assert_eq!(teachers.len(), 2);
        assert_eq!(subjects.len(), 3);
        assert_eq!(store.list_levels_for_school(&school_id).await.unwrap().len(), 2);

        let report = audit_assignments(&teachers, &subjects);
        assert!(report.valid, "{:?}", report.violations);
    }
}
