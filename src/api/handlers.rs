use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Json as RequestJson,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::logic::{roster, AssignmentError, AssignmentService, ConsistencyReport};
use crate::model::{
    DocumentKind, Id, IdSet, Lesson, LessonStats, LessonUpdate, Level, NewLesson, NewLevel,
    NewParent, NewSchool, NewStudent, NewSubject, NewTeacher, Parent, School, Student,
    StudentUpdate, Subject, Teacher, TeacherSummary, UserContext,
};
use crate::store::{Store, StoreError};

pub type AppState<S> = Arc<AssignmentService<S>>;

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        let total = items.len();
        Self { items, total }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(message: &str, code: &str) -> Self {
        Self {
            error: message.to_string(),
            code: code.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubjectQuery {
    pub level: Option<Id>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceSubjectsRequest {
    pub subject_ids: IdSet,
}

/// Returned by every assignment mutation.
#[derive(Debug, Serialize, Deserialize)]
pub struct AssignmentResponse {
    pub ok: bool,
    pub teacher: Teacher,
}

fn assignment_error(err: AssignmentError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        AssignmentError::NotFound { .. } => StatusCode::NOT_FOUND,
        AssignmentError::AlreadyExists { .. } => StatusCode::CONFLICT,
        AssignmentError::SchoolMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AssignmentError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        AssignmentError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        AssignmentError::Conflict { .. } | AssignmentError::WriteConflict { .. } => {
            StatusCode::CONFLICT
        }
        AssignmentError::Store(e) => {
            log::error!("Store failure: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ErrorResponse::new(&err.to_string(), err.code())))
}

fn store_error(err: StoreError) -> (StatusCode, Json<ErrorResponse>) {
    assignment_error(err.into())
}

fn not_found(kind: DocumentKind, id: &str) -> (StatusCode, Json<ErrorResponse>) {
    assignment_error(AssignmentError::not_found(kind, id))
}

fn bad_request(message: String) -> (StatusCode, Json<ErrorResponse>) {
    assignment_error(AssignmentError::InvalidArgument(message))
}

fn reject_managed_fields(kind: &str, fields: Vec<String>) -> ApiResult<()> {
    if fields.is_empty() {
        return Ok(());
    }
    Err(bad_request(format!(
        "{} cannot be set when creating a {}",
        fields.join(", "),
        kind
    )))
}

async fn fresh_teacher<S: Store>(state: &AppState<S>, teacher_id: &Id) -> ApiResult<Teacher> {
    state
        .store()
        .get_teacher(teacher_id)
        .await
        .map_err(store_error)?
        .map(|v| v.doc)
        .ok_or_else(|| not_found(DocumentKind::Teacher, teacher_id))
}

async fn assignment_response<S: Store>(
    state: &AppState<S>,
    teacher_id: &Id,
) -> ApiResult<Json<AssignmentResponse>> {
    let teacher = fresh_teacher(state, teacher_id).await?;
    Ok(Json(AssignmentResponse { ok: true, teacher }))
}

// Schools

pub async fn list_schools<S: Store>(
    State(state): State<AppState<S>>,
) -> ApiResult<Json<ListResponse<School>>> {
    let schools = state.store().list_schools().await.map_err(store_error)?;
    Ok(Json(schools.into()))
}

pub async fn create_school<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    RequestJson(new_school): RequestJson<NewSchool>,
) -> ApiResult<(StatusCode, Json<School>)> {
    let school = new_school.into_school();
    state
        .store()
        .insert_school(&user, school.clone())
        .await
        .map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(school)))
}

pub async fn get_school<S: Store>(
    State(state): State<AppState<S>>,
    Path(school_id): Path<Id>,
) -> ApiResult<Json<School>> {
    state
        .store()
        .get_school(&school_id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| not_found(DocumentKind::School, &school_id))
}

pub async fn delete_school<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    Path(school_id): Path<Id>,
) -> ApiResult<StatusCode> {
    match state.store().delete_school(&user, &school_id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_found(DocumentKind::School, &school_id)),
        Err(e) => Err(store_error(e)),
    }
}

pub async fn list_school_levels<S: Store>(
    State(state): State<AppState<S>>,
    Path(school_id): Path<Id>,
) -> ApiResult<Json<ListResponse<Level>>> {
    let levels = state
        .store()
        .list_levels_for_school(&school_id)
        .await
        .map_err(store_error)?;
    Ok(Json(levels.into()))
}

pub async fn list_school_subjects<S: Store>(
    State(state): State<AppState<S>>,
    Path(school_id): Path<Id>,
    Query(query): Query<SubjectQuery>,
) -> ApiResult<Json<ListResponse<Subject>>> {
    let subjects = state
        .store()
        .list_subjects_for_school(&school_id, query.level.as_ref())
        .await
        .map_err(store_error)?;
    Ok(Json(subjects.into()))
}

pub async fn list_school_teachers<S: Store>(
    State(state): State<AppState<S>>,
    Path(school_id): Path<Id>,
) -> ApiResult<Json<ListResponse<Teacher>>> {
    let teachers = state
        .store()
        .list_teachers_for_school(&school_id)
        .await
        .map_err(store_error)?;
    Ok(Json(teachers.into()))
}

pub async fn audit_school<S: Store>(
    State(state): State<AppState<S>>,
    Path(school_id): Path<Id>,
) -> ApiResult<Json<ConsistencyReport>> {
    state
        .audit_school(&school_id)
        .await
        .map(Json)
        .map_err(assignment_error)
}

// Levels

pub async fn create_level<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    RequestJson(new_level): RequestJson<NewLevel>,
) -> ApiResult<(StatusCode, Json<Level>)> {
    let level = new_level.into_level();
    if state
        .store()
        .get_school(&level.school_id)
        .await
        .map_err(store_error)?
        .is_none()
    {
        return Err(not_found(DocumentKind::School, &level.school_id));
    }
    state
        .store()
        .insert_level(&user, level.clone())
        .await
        .map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(level)))
}

pub async fn get_level<S: Store>(
    State(state): State<AppState<S>>,
    Path(level_id): Path<Id>,
) -> ApiResult<Json<Level>> {
    state
        .store()
        .get_level(&level_id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| not_found(DocumentKind::Level, &level_id))
}

pub async fn delete_level<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    Path(level_id): Path<Id>,
) -> ApiResult<StatusCode> {
    match state.store().delete_level(&user, &level_id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_found(DocumentKind::Level, &level_id)),
        Err(e) => Err(store_error(e)),
    }
}

// Subjects

pub async fn create_subject<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    RequestJson(new_subject): RequestJson<NewSubject>,
) -> ApiResult<(StatusCode, Json<Subject>)> {
    reject_managed_fields("subject", new_subject.managed_fields())?;
    let subject = new_subject.into_subject();
    let level = state
        .store()
        .get_level(&subject.level_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| not_found(DocumentKind::Level, &subject.level_id))?;
    if level.school_id != subject.school_id {
        return Err(bad_request(format!(
            "level '{}' belongs to school '{}', not '{}'",
            level.id, level.school_id, subject.school_id
        )));
    }
    state
        .store()
        .insert_subject(&user, subject.clone())
        .await
        .map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(subject)))
}

pub async fn get_subject<S: Store>(
    State(state): State<AppState<S>>,
    Path(subject_id): Path<Id>,
) -> ApiResult<Json<Subject>> {
    state
        .store()
        .get_subject(&subject_id)
        .await
        .map_err(store_error)?
        .map(|v| Json(v.doc))
        .ok_or_else(|| not_found(DocumentKind::Subject, &subject_id))
}

pub async fn delete_subject<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    Path(subject_id): Path<Id>,
) -> ApiResult<StatusCode> {
    match state.store().delete_subject(&user, &subject_id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_found(DocumentKind::Subject, &subject_id)),
        Err(e) => Err(store_error(e)),
    }
}

// Teachers

pub async fn create_teacher<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    RequestJson(new_teacher): RequestJson<NewTeacher>,
) -> ApiResult<(StatusCode, Json<Teacher>)> {
    reject_managed_fields("teacher", new_teacher.managed_fields())?;
    let teacher = new_teacher.into_teacher();
    if !teacher.role.can_teach() {
        return Err(bad_request(format!(
            "role '{}' is not a teaching role",
            teacher.role
        )));
    }
    state
        .store()
        .insert_teacher(&user, teacher.clone())
        .await
        .map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(teacher)))
}

pub async fn get_teacher<S: Store>(
    State(state): State<AppState<S>>,
    Path(teacher_id): Path<Id>,
) -> ApiResult<Json<Teacher>> {
    fresh_teacher(&state, &teacher_id).await.map(Json)
}

pub async fn delete_teacher<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    Path(teacher_id): Path<Id>,
) -> ApiResult<StatusCode> {
    match state.store().delete_teacher(&user, &teacher_id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_found(DocumentKind::Teacher, &teacher_id)),
        Err(e) => Err(store_error(e)),
    }
}

pub async fn teacher_summary<S: Store>(
    State(state): State<AppState<S>>,
    Path(teacher_id): Path<Id>,
) -> ApiResult<Json<TeacherSummary>> {
    state
        .teacher_summary(&teacher_id)
        .await
        .map(Json)
        .map_err(assignment_error)
}

pub async fn available_levels<S: Store>(
    State(state): State<AppState<S>>,
    Path(teacher_id): Path<Id>,
) -> ApiResult<Json<ListResponse<Level>>> {
    let levels = state
        .available_levels(&teacher_id)
        .await
        .map_err(assignment_error)?;
    Ok(Json(levels.into()))
}

pub async fn available_subjects<S: Store>(
    State(state): State<AppState<S>>,
    Path((teacher_id, level_id)): Path<(Id, Id)>,
) -> ApiResult<Json<ListResponse<Subject>>> {
    let subjects = state
        .available_subjects(&teacher_id, &level_id)
        .await
        .map_err(assignment_error)?;
    Ok(Json(subjects.into()))
}

// Assignments

pub async fn assign_level<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    Path((teacher_id, level_id)): Path<(Id, Id)>,
) -> ApiResult<Json<AssignmentResponse>> {
    state
        .assign_level_to_teacher(&user, &teacher_id, &level_id)
        .await
        .map_err(assignment_error)?;
    assignment_response(&state, &teacher_id).await
}

pub async fn replace_level_subjects<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    Path((teacher_id, level_id)): Path<(Id, Id)>,
    RequestJson(request): RequestJson<ReplaceSubjectsRequest>,
) -> ApiResult<Json<AssignmentResponse>> {
    state
        .assign_subjects_to_teacher_for_level(&user, &teacher_id, &level_id, &request.subject_ids)
        .await
        .map_err(assignment_error)?;
    assignment_response(&state, &teacher_id).await
}

pub async fn assign_subject<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    Path((teacher_id, level_id, subject_id)): Path<(Id, Id, Id)>,
) -> ApiResult<Json<AssignmentResponse>> {
    state
        .assign_teacher_to_subject(&user, &teacher_id, &subject_id, &level_id)
        .await
        .map_err(assignment_error)?;
    assignment_response(&state, &teacher_id).await
}

pub async fn remove_subject<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    Path((teacher_id, level_id, subject_id)): Path<(Id, Id, Id)>,
) -> ApiResult<Json<AssignmentResponse>> {
    state
        .remove_teacher_from_subject(&user, &teacher_id, &subject_id, &level_id)
        .await
        .map_err(assignment_error)?;
    assignment_response(&state, &teacher_id).await
}

// Parents

pub async fn list_parents<S: Store>(
    State(state): State<AppState<S>>,
) -> ApiResult<Json<ListResponse<Parent>>> {
    let parents = state.store().list_parents().await.map_err(store_error)?;
    Ok(Json(parents.into()))
}

pub async fn create_parent<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    RequestJson(new_parent): RequestJson<NewParent>,
) -> ApiResult<(StatusCode, Json<Parent>)> {
    reject_managed_fields("parent", new_parent.managed_fields())?;
    let parent = roster::add_parent(state.store(), &user, new_parent)
        .await
        .map_err(assignment_error)?;
    Ok((StatusCode::CREATED, Json(parent)))
}

pub async fn get_parent<S: Store>(
    State(state): State<AppState<S>>,
    Path(parent_id): Path<Id>,
) -> ApiResult<Json<Parent>> {
    state
        .store()
        .get_parent(&parent_id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| not_found(DocumentKind::Parent, &parent_id))
}

pub async fn delete_parent<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    Path(parent_id): Path<Id>,
) -> ApiResult<StatusCode> {
    roster::remove_parent(state.store(), &user, &parent_id)
        .await
        .map_err(assignment_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_parent_students<S: Store>(
    State(state): State<AppState<S>>,
    Path(parent_id): Path<Id>,
) -> ApiResult<Json<ListResponse<Student>>> {
    let students = state
        .store()
        .list_students_for_parent(&parent_id)
        .await
        .map_err(store_error)?;
    Ok(Json(students.into()))
}

// Students

pub async fn list_school_students<S: Store>(
    State(state): State<AppState<S>>,
    Path(school_id): Path<Id>,
) -> ApiResult<Json<ListResponse<Student>>> {
    let students = state
        .store()
        .list_students_for_school(&school_id)
        .await
        .map_err(store_error)?;
    Ok(Json(students.into()))
}

pub async fn create_student<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    RequestJson(new_student): RequestJson<NewStudent>,
) -> ApiResult<(StatusCode, Json<Student>)> {
    reject_managed_fields("student", new_student.managed_fields())?;
    let student = roster::enroll_student(state.store(), &user, new_student)
        .await
        .map_err(assignment_error)?;
    Ok((StatusCode::CREATED, Json(student)))
}

pub async fn get_student<S: Store>(
    State(state): State<AppState<S>>,
    Path(student_id): Path<Id>,
) -> ApiResult<Json<Student>> {
    state
        .store()
        .get_student(&student_id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| not_found(DocumentKind::Student, &student_id))
}

pub async fn update_student<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    Path(student_id): Path<Id>,
    RequestJson(update): RequestJson<StudentUpdate>,
) -> ApiResult<Json<Student>> {
    roster::update_student(state.store(), &user, &student_id, update)
        .await
        .map(Json)
        .map_err(assignment_error)
}

pub async fn delete_student<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    Path(student_id): Path<Id>,
) -> ApiResult<StatusCode> {
    match state.store().delete_student(&user, &student_id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_found(DocumentKind::Student, &student_id)),
        Err(e) => Err(store_error(e)),
    }
}

// Lessons

pub async fn list_subject_lessons<S: Store>(
    State(state): State<AppState<S>>,
    Path(subject_id): Path<Id>,
) -> ApiResult<Json<ListResponse<Lesson>>> {
    let lessons = roster::subject_lessons(state.store(), &subject_id)
        .await
        .map_err(assignment_error)?;
    Ok(Json(lessons.into()))
}

pub async fn subject_lesson_stats<S: Store>(
    State(state): State<AppState<S>>,
    Path(subject_id): Path<Id>,
) -> ApiResult<Json<LessonStats>> {
    roster::lesson_stats(state.store(), &subject_id)
        .await
        .map(Json)
        .map_err(assignment_error)
}

pub async fn create_lesson<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    RequestJson(new_lesson): RequestJson<NewLesson>,
) -> ApiResult<(StatusCode, Json<Lesson>)> {
    reject_managed_fields("lesson", new_lesson.managed_fields())?;
    let lesson = roster::add_lesson(state.store(), &user, new_lesson)
        .await
        .map_err(assignment_error)?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

pub async fn get_lesson<S: Store>(
    State(state): State<AppState<S>>,
    Path(lesson_id): Path<Id>,
) -> ApiResult<Json<Lesson>> {
    state
        .store()
        .get_lesson(&lesson_id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| not_found(DocumentKind::Lesson, &lesson_id))
}

pub async fn update_lesson<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    Path(lesson_id): Path<Id>,
    RequestJson(update): RequestJson<LessonUpdate>,
) -> ApiResult<Json<Lesson>> {
    roster::update_lesson(state.store(), &user, &lesson_id, update)
        .await
        .map(Json)
        .map_err(assignment_error)
}

pub async fn delete_lesson<S: Store>(
    State(state): State<AppState<S>>,
    user: UserContext,
    Path(lesson_id): Path<Id>,
) -> ApiResult<StatusCode> {
    match state.store().delete_lesson(&user, &lesson_id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_found(DocumentKind::Lesson, &lesson_id)),
        Err(e) => Err(store_error(e)),
    }
}
