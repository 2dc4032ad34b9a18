use axum::{
    routing::{get, post, put},
    Extension, Router,
};
use tower_http::cors::CorsLayer;

use crate::api::handlers::{self, AppState};
use crate::config::AuthConfig;
use crate::store::traits::Store;

pub fn create_router<S: Store + 'static>(auth: AuthConfig) -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Schools
        .route(
            "/schools",
            get(handlers::list_schools::<S>).post(handlers::create_school::<S>),
        )
        .route(
            "/schools/:school_id",
            get(handlers::get_school::<S>).delete(handlers::delete_school::<S>),
        )
        .route(
            "/schools/:school_id/levels",
            get(handlers::list_school_levels::<S>),
        )
        .route(
            "/schools/:school_id/subjects",
            get(handlers::list_school_subjects::<S>),
        )
        .route(
            "/schools/:school_id/teachers",
            get(handlers::list_school_teachers::<S>),
        )
        .route(
            "/schools/:school_id/students",
            get(handlers::list_school_students::<S>),
        )
        .route("/schools/:school_id/audit", get(handlers::audit_school::<S>))
        // Levels
        .route("/levels", post(handlers::create_level::<S>))
        .route(
            "/levels/:level_id",
            get(handlers::get_level::<S>).delete(handlers::delete_level::<S>),
        )
        // Subjects
        .route("/subjects", post(handlers::create_subject::<S>))
        .route(
            "/subjects/:subject_id",
            get(handlers::get_subject::<S>).delete(handlers::delete_subject::<S>),
        )
        .route(
            "/subjects/:subject_id/lessons",
            get(handlers::list_subject_lessons::<S>),
        )
        .route(
            "/subjects/:subject_id/lessons/stats",
            get(handlers::subject_lesson_stats::<S>),
        )
        // Teachers
        .route("/teachers", post(handlers::create_teacher::<S>))
        .route(
            "/teachers/:teacher_id",
            get(handlers::get_teacher::<S>).delete(handlers::delete_teacher::<S>),
        )
        .route(
            "/teachers/:teacher_id/summary",
            get(handlers::teacher_summary::<S>),
        )
        .route(
            "/teachers/:teacher_id/available-levels",
            get(handlers::available_levels::<S>),
        )
        // Assignments
        .route(
            "/teachers/:teacher_id/levels/:level_id",
            post(handlers::assign_level::<S>),
        )
        .route(
            "/teachers/:teacher_id/levels/:level_id/available-subjects",
            get(handlers::available_subjects::<S>),
        )
        .route(
            "/teachers/:teacher_id/levels/:level_id/subjects",
            put(handlers::replace_level_subjects::<S>),
        )
        .route(
            "/teachers/:teacher_id/levels/:level_id/subjects/:subject_id",
            post(handlers::assign_subject::<S>).delete(handlers::remove_subject::<S>),
        )
        // Parents
        .route(
            "/parents",
            get(handlers::list_parents::<S>).post(handlers::create_parent::<S>),
        )
        .route(
            "/parents/:parent_id",
            get(handlers::get_parent::<S>).delete(handlers::delete_parent::<S>),
        )
        .route(
            "/parents/:parent_id/students",
            get(handlers::list_parent_students::<S>),
        )
        // Students
        .route("/students", post(handlers::create_student::<S>))
        .route(
            "/students/:student_id",
            get(handlers::get_student::<S>)
                .put(handlers::update_student::<S>)
                .delete(handlers::delete_student::<S>),
        )
        // Lessons
        .route("/lessons", post(handlers::create_lesson::<S>))
        .route(
            "/lessons/:lesson_id",
            get(handlers::get_lesson::<S>)
                .put(handlers::update_lesson::<S>)
                .delete(handlers::delete_lesson::<S>),
        )
        .layer(Extension(auth))
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::{AssignmentResponse, ErrorResponse};
    use crate::logic::{AssignmentService, RetryPolicy};
    use crate::model::{
        NewLevel, NewSchool, NewSubject, NewTeacher, Teacher, UserContext, UserRole,
    };
    use crate::store::{LevelStore, MemoryStore, SchoolStore, SubjectStore, TeacherStore};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde::de::DeserializeOwned;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app_with_auth(auth: AuthConfig) -> Router {
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
        store
            .insert_level(
                &ctx,
                NewLevel {
                    id: Some("L1".into()),
                    school_id: "SCH1".into(),
                    name: "Grade 1".into(),
                    extra: Default::default(),
                }
                .into_level(),
            )
            .await
            .unwrap();
        for id in ["MATH", "ART"] {
            store
                .insert_subject(
                    &ctx,
                    NewSubject {
                        id: Some(id.into()),
                        name: id.into(),
                        level_id: "L1".into(),
                        school_id: "SCH1".into(),
                        extra: Default::default(),
                    }
                    .into_subject(),
                )
                .await
                .unwrap();
        }
        store
            .insert_teacher(
                &ctx,
                NewTeacher {
                    id: Some("T1".into()),
                    name: "Ada".into(),
                    email: None,
                    role: UserRole::Staff,
                    school_id: "SCH1".into(),
                    extra: Default::default(),
                }
                .into_teacher(),
            )
            .await
            .unwrap();

        let retry = RetryPolicy { max_attempts: 3, backoff: Duration::ZERO };
        create_router(auth).with_state(Arc::new(AssignmentService::new(store, retry)))
    }

    async fn app() -> Router {
        app_with_auth(AuthConfig::default()).await
    }

    /// A request from an admin user.
    fn request(method: Method, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", "admin-1")
            .header("x-user-role", "admin");
        send(builder, body)
    }

    fn anonymous(method: Method, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        send(Request::builder().method(method).uri(uri), body)
    }

    fn send(builder: axum::http::request::Builder, body: Option<serde_json::Value>) -> Request<Body> {
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn read_json<T: DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = app()
            .await
            .oneshot(request(Method::GET, "/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_assign_and_remove_subject_over_http() {
        let app = app().await;

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/teachers/T1/levels/L1/subjects/MATH", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: AssignmentResponse = read_json(response).await;
        assert!(body.ok);
        assert!(body.teacher.teaches("L1", "MATH"));
        assert!(body.teacher.classes.contains("L1"));

        let response = app
            .clone()
            .oneshot(request(Method::DELETE, "/teachers/T1/levels/L1/subjects/MATH", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: AssignmentResponse = read_json(response).await;
        assert!(body.teacher.subjects.is_empty());
        assert!(body.teacher.classes.is_empty());
    }

    #[tokio::test]
    async fn test_replace_level_subjects_over_http() {
        let app = app().await;

        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                "/teachers/T1/levels/L1/subjects",
                Some(serde_json::json!({ "subjectIds": ["MATH", "ART"] })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request(Method::GET, "/subjects/ART", None))
            .await
            .unwrap();
        let subject: serde_json::Value = read_json(response).await;
        assert_eq!(subject["teacherIds"], serde_json::json!(["T1"]));
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let app = app().await;

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/teachers/NOPE/levels/L1/subjects/MATH", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let error: ErrorResponse = read_json(response).await;
        assert_eq!(error.code, "not_found");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/teachers/T1/levels/L1/subjects/MATH")
                    .header("x-user-id", "s1")
                    .header("x-user-role", "student")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(request(
                Method::POST,
                "/schools",
                Some(serde_json::json!({ "id": "SCH1", "name": "Duplicate" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_subject_level_must_share_school() {
        let app = app().await;
        let response = app
            .oneshot(request(
                Method::POST,
                "/subjects",
                Some(serde_json::json!({ "name": "Music", "levelId": "L1", "schoolId": "SCH2" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_teacher_views() {
        let app = app().await;
        app.clone()
            .oneshot(request(Method::POST, "/teachers/T1/levels/L1/subjects/ART", None))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/teachers/T1/summary", None))
            .await
            .unwrap();
        let summary: serde_json::Value = read_json(response).await;
        assert_eq!(summary["classCount"], 1);
        assert_eq!(summary["subjectCount"], 1);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/schools/SCH1/audit", None))
            .await
            .unwrap();
        let report: serde_json::Value = read_json(response).await;
        assert_eq!(report["valid"], true);

        let response = app
            .oneshot(request(Method::GET, "/teachers/T1", None))
            .await
            .unwrap();
        let teacher: Teacher = read_json(response).await;
        assert_eq!(teacher.subject_count(), 1);
    }

    #[tokio::test]
    async fn test_anonymous_writes_are_unauthorized() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(anonymous(Method::POST, "/teachers/T1/levels/L1/subjects/MATH", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request(Method::GET, "/teachers/T1", None))
            .await
            .unwrap();
        let teacher: Teacher = read_json(response).await;
        assert!(teacher.subjects.is_empty());
    }

    #[tokio::test]
    async fn test_dev_user_only_when_enabled() {
        let app = app_with_auth(AuthConfig { allow_dev_user: true }).await;
        let response = app
            .oneshot(anonymous(Method::POST, "/teachers/T1/levels/L1/subjects/MATH", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_teacher_rejects_assignment_fields() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/teachers",
                Some(serde_json::json!({
                    "id": "T9",
                    "name": "Mallory",
                    "role": "staff",
                    "schoolId": "SCH1",
                    "classes": ["L1"],
                    "subjects": { "L1": ["MATH"] }
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(request(Method::GET, "/teachers/T9", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_student_and_parent_routes() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/parents",
                Some(serde_json::json!({ "id": "P1", "name": "Grace" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/students",
                Some(serde_json::json!({
                    "id": "S1",
                    "name": "Ann Lee",
                    "schoolId": "SCH1",
                    "levelId": "L1",
                    "parentId": "P1"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let student: serde_json::Value = read_json(response).await;
        assert_eq!(student["role"], "student");

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/students",
                Some(serde_json::json!({
                    "name": "Bob",
                    "schoolId": "SCH2",
                    "levelId": "L1"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/parents/P1/students", None))
            .await
            .unwrap();
        let children: serde_json::Value = read_json(response).await;
        assert_eq!(children["total"], 1);

        let response = app
            .clone()
            .oneshot(request(Method::DELETE, "/parents/P1", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                "/students/S1",
                Some(serde_json::json!({ "name": "Ann Lee-Smith" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request(Method::GET, "/schools/SCH1/students", None))
            .await
            .unwrap();
        let listed: serde_json::Value = read_json(response).await;
        assert_eq!(listed["items"][0]["name"], "Ann Lee-Smith");
    }

    #[tokio::test]
    async fn test_lesson_routes() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/lessons",
                Some(serde_json::json!({
                    "id": "LS1",
                    "title": "Counting",
                    "subjectId": "MATH",
                    "audio": { "name": "count.mp3", "type": "audio/mpeg", "url": "https://files/count.mp3" }
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/subjects/MATH/lessons/stats", None))
            .await
            .unwrap();
        let stats: serde_json::Value = read_json(response).await;
        assert_eq!(stats["lessonCount"], 1);
        assert_eq!(stats["materialCount"], 1);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/subjects/NOPE/lessons", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(request(Method::DELETE, "/lessons/LS1", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(request(Method::GET, "/subjects/MATH/lessons", None))
            .await
            .unwrap();
        let lessons: serde_json::Value = read_json(response).await;
        assert_eq!(lessons["total"], 0);
    }
}
