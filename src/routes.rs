use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Deserialize;

use crate::{
    catalog::{CatalogEntity, REGION_HEADER},
    dashboard::{self, Certificate, Dashboard, DashboardQuery, SortKey},
    error::ApiError,
    models::*,
    preferences::{all_regions, region_info, RegionInfo},
    AppState,
};

pub const CATALOG_SOURCE_HEADER: &str = "x-catalog-source";

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        // catalog
        .route("/api/regions", get(list_regions))
        .route("/api/courses", get(list_entities::<Course>))
        .route("/api/courses/:slug", get(get_entity::<Course>))
        .route("/api/labs", get(list_entities::<Lab>))
        .route("/api/labs/:slug", get(get_entity::<Lab>))
        // auth + preferences
        .route("/api/auth/sign-in", post(sign_in))
        .route("/api/auth/sign-out", post(sign_out))
        .route("/api/auth/me", get(me))
        .route("/api/preferences/region", get(get_region).put(put_region))
        .route("/api/preferences/theme", get(get_theme).put(put_theme))
        // enrollments
        .route("/api/enrollments", get(list_enrollments).post(enroll))
        .route("/api/enrollments/:course_id", get(get_enrollment))
        .route("/api/enrollments/:course_id/current-item", post(set_current_item))
        .route("/api/enrollments/:course_id/complete", post(complete_lesson))
        .route("/api/enrollments/:course_id/pause", post(pause))
        .route("/api/enrollments/:course_id/resume", post(resume))
        .route("/api/enrollments/:course_id/cancel", post(cancel))
        .route("/api/enrollments/:course_id/reset", post(reset_enrollment))
        // lab runs
        .route("/api/lab-runs", get(list_lab_runs).post(start_lab))
        .route("/api/lab-runs/:lab_id", get(get_lab_run))
        .route("/api/lab-runs/:lab_id/step", post(set_active_step))
        .route("/api/lab-runs/:lab_id/complete", post(complete_step))
        .route("/api/lab-runs/:lab_id/reset", post(reset_lab_run))
        // derived views
        .route("/api/dashboard", get(get_dashboard))
        .route("/api/certificates", get(list_certificates))
        .with_state(state)
}

/// The signed-in learner, resolved from the bearer access token.
pub struct Learner(pub UserProfile);

#[async_trait]
impl FromRequestParts<AppState> for Learner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::Unauthorized)?;
        let user = state
            .auth
            .authenticate(bearer.token())?
            .ok_or(ApiError::Unauthorized)?;
        Ok(Learner(user))
    }
}

type MaybeBearer = Option<TypedHeader<Authorization<Bearer>>>;

fn token_of(bearer: &MaybeBearer) -> Option<&str> {
    bearer.as_ref().map(|TypedHeader(Authorization(b))| b.token())
}

/// Region from the request header, else the stored preference.
fn request_region(state: &AppState, headers: &HeaderMap) -> Result<RegionCode, ApiError> {
    let from_header = headers
        .get(REGION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());
    match from_header {
        Some(region) => Ok(region),
        None => Ok(state.prefs.region()?),
    }
}

// --- catalog ---

async fn list_regions() -> Json<Vec<RegionInfo>> {
    Json(all_regions())
}

async fn list_entities<E: CatalogEntity + serde::Serialize>(
    State(state): State<AppState>,
    bearer: MaybeBearer,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let region = request_region(&state, &headers)?;
    let fetched = state.catalog.fetch_list::<E>(token_of(&bearer), Some(region)).await;
    let source = fetched.source();
    Ok(([(CATALOG_SOURCE_HEADER, source)], Json(fetched.into_inner())))
}

async fn get_entity<E: CatalogEntity + serde::Serialize>(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    bearer: MaybeBearer,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let region = request_region(&state, &headers)?;
    let fetched = state
        .catalog
        .fetch_by_slug::<E>(&slug, token_of(&bearer), Some(region))
        .await;
    let source = fetched.source();
    match fetched.into_inner() {
        Some(entity) => Ok(([(CATALOG_SOURCE_HEADER, source)], Json(entity))),
        None => Err(not_found(
            format!("{} '{}' not found", singular(E::COLLECTION), slug),
            format!("/api/{}", E::COLLECTION),
        )),
    }
}

// --- auth + preferences ---

async fn sign_in(State(state): State<AppState>, Json(req): Json<SignInReq>) -> ApiResult<AuthSession> {
    if !req.email.contains('@') {
        return Err(e400("a valid email is required"));
    }
    Ok(Json(state.auth.sign_in(&req.email, req.name.as_deref())?))
}

/// Signing out also drops the learner's progress so the next account on this
/// device starts clean. The session is only removed once progress is gone.
async fn sign_out(State(state): State<AppState>, Learner(user): Learner) -> ApiResult<serde_json::Value> {
    let enrollments = state.enrollments.reset_for_learner(&user.id)?;
    let lab_runs = state.lab_runs.reset_for_learner(&user.id)?;
    state.auth.sign_out()?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "clearedEnrollments": enrollments,
        "clearedLabRuns": lab_runs,
    })))
}

async fn me(Learner(user): Learner) -> Json<UserProfile> {
    Json(user)
}

async fn get_region(State(state): State<AppState>) -> ApiResult<RegionInfo> {
    Ok(Json(region_info(state.prefs.region()?)))
}

async fn put_region(State(state): State<AppState>, Json(req): Json<RegionReq>) -> ApiResult<RegionInfo> {
    state.prefs.set_region(req.region)?;
    Ok(Json(region_info(req.region)))
}

async fn get_theme(State(state): State<AppState>) -> ApiResult<ThemeReq> {
    Ok(Json(ThemeReq {
        theme: state.prefs.theme()?,
    }))
}

async fn put_theme(State(state): State<AppState>, Json(req): Json<ThemeReq>) -> ApiResult<ThemeReq> {
    state.prefs.set_theme(req.theme)?;
    Ok(Json(req))
}

// --- enrollments ---

async fn list_enrollments(
    State(state): State<AppState>,
    Learner(user): Learner,
) -> ApiResult<Vec<EnrollmentRecord>> {
    Ok(Json(state.enrollments.list_for_learner(&user.id)?))
}

/// Without an explicit `firstItemId` the resume pointer starts at the
/// course's first lesson, when the catalog knows the course.
async fn enroll(
    State(state): State<AppState>,
    Learner(user): Learner,
    bearer: MaybeBearer,
    headers: HeaderMap,
    Json(req): Json<EnrollReq>,
) -> ApiResult<EnrollmentRecord> {
    let first_item_id = match req.first_item_id {
        Some(id) => Some(id),
        None => {
            let region = request_region(&state, &headers)?;
            let courses = state
                .catalog
                .fetch_list::<Course>(token_of(&bearer), Some(region))
                .await
                .into_inner();
            dashboard::find_course(&courses, &req.course_id)
                .and_then(Course::first_lesson_id)
                .map(str::to_owned)
        }
    };
    let record = state
        .enrollments
        .enroll(&user.id, &req.course_id, first_item_id.as_deref())?;
    Ok(Json(record))
}

async fn get_enrollment(
    State(state): State<AppState>,
    Learner(user): Learner,
    Path(course_id): Path<String>,
) -> ApiResult<EnrollmentRecord> {
    found_enrollment(state.enrollments.get(&user.id, &course_id)?, &course_id)
}

async fn set_current_item(
    State(state): State<AppState>,
    Learner(user): Learner,
    Path(course_id): Path<String>,
    Json(req): Json<CurrentItemReq>,
) -> ApiResult<EnrollmentRecord> {
    let record = state
        .enrollments
        .set_current_item(&user.id, &course_id, &req.item_id)?;
    found_enrollment(record, &course_id)
}

async fn complete_lesson(
    State(state): State<AppState>,
    Learner(user): Learner,
    Path(course_id): Path<String>,
    Json(req): Json<CompleteItemReq>,
) -> ApiResult<EnrollmentRecord> {
    let record = state.enrollments.mark_item_complete(
        &user.id,
        &course_id,
        &req.item_id,
        req.total_item_count,
    )?;
    found_enrollment(record, &course_id)
}

async fn pause(
    State(state): State<AppState>,
    Learner(user): Learner,
    Path(course_id): Path<String>,
) -> ApiResult<EnrollmentRecord> {
    found_enrollment(state.enrollments.pause(&user.id, &course_id)?, &course_id)
}

async fn resume(
    State(state): State<AppState>,
    Learner(user): Learner,
    Path(course_id): Path<String>,
) -> ApiResult<EnrollmentRecord> {
    found_enrollment(state.enrollments.resume(&user.id, &course_id)?, &course_id)
}

async fn cancel(
    State(state): State<AppState>,
    Learner(user): Learner,
    Path(course_id): Path<String>,
) -> ApiResult<EnrollmentRecord> {
    found_enrollment(state.enrollments.cancel(&user.id, &course_id)?, &course_id)
}

/// The body is optional, but one that is sent must parse.
async fn reset_enrollment(
    State(state): State<AppState>,
    Learner(user): Learner,
    Path(course_id): Path<String>,
    body: Result<Json<ResetReq>, JsonRejection>,
) -> ApiResult<EnrollmentRecord> {
    let req = match body {
        Ok(Json(req)) => req,
        Err(JsonRejection::MissingJsonContentType(_)) => ResetReq::default(),
        Err(rejection) => return Err(e400(rejection.body_text())),
    };
    let record = state
        .enrollments
        .reset(&user.id, &course_id, req.current_item_id.as_deref())?;
    found_enrollment(record, &course_id)
}

// --- lab runs ---

async fn list_lab_runs(State(state): State<AppState>, Learner(user): Learner) -> ApiResult<Vec<LabRunRecord>> {
    Ok(Json(state.lab_runs.list_for_learner(&user.id)?))
}

async fn start_lab(
    State(state): State<AppState>,
    Learner(user): Learner,
    Json(req): Json<StartLabReq>,
) -> ApiResult<LabRunRecord> {
    Ok(Json(state.lab_runs.start(&user.id, &req.lab_id)?))
}

async fn get_lab_run(
    State(state): State<AppState>,
    Learner(user): Learner,
    Path(lab_id): Path<String>,
) -> ApiResult<LabRunRecord> {
    found_lab_run(state.lab_runs.get(&user.id, &lab_id)?, &lab_id)
}

async fn set_active_step(
    State(state): State<AppState>,
    Learner(user): Learner,
    Path(lab_id): Path<String>,
    Json(req): Json<ActiveStepReq>,
) -> ApiResult<LabRunRecord> {
    let record = state
        .lab_runs
        .set_active_step(&user.id, &lab_id, req.index, req.total_steps)?;
    found_lab_run(record, &lab_id)
}

async fn complete_step(
    State(state): State<AppState>,
    Learner(user): Learner,
    Path(lab_id): Path<String>,
    Json(req): Json<CompleteStepReq>,
) -> ApiResult<LabRunRecord> {
    let record = state
        .lab_runs
        .mark_step_complete(&user.id, &lab_id, &req.step_id, req.total_steps)?;
    found_lab_run(record, &lab_id)
}

async fn reset_lab_run(
    State(state): State<AppState>,
    Learner(user): Learner,
    Path(lab_id): Path<String>,
) -> ApiResult<LabRunRecord> {
    found_lab_run(state.lab_runs.reset(&user.id, &lab_id)?, &lab_id)
}

// --- derived views ---

#[derive(Deserialize, Debug, Default)]
struct DashboardParams {
    status: Option<String>,
    sort: Option<SortKey>,
}

async fn get_dashboard(
    State(state): State<AppState>,
    Learner(user): Learner,
    bearer: MaybeBearer,
    headers: HeaderMap,
    Query(params): Query<DashboardParams>,
) -> ApiResult<Dashboard> {
    let filter = params
        .status
        .as_deref()
        .map(str::parse::<EnrollmentStatus>)
        .transpose()
        .map_err(e400)?;
    let region = request_region(&state, &headers)?;
    let token = token_of(&bearer);
    let courses = state.catalog.fetch_list::<Course>(token, Some(region)).await.into_inner();
    let labs = state.catalog.fetch_list::<Lab>(token, Some(region)).await.into_inner();

    let enrollments = state.enrollments.list_for_learner(&user.id)?;
    let runs = state.lab_runs.list_for_learner(&user.id)?;
    let query = DashboardQuery {
        filter,
        sort: params.sort.unwrap_or_default(),
        region,
    };
    Ok(Json(dashboard::build_dashboard(&user.id, &enrollments, &runs, &courses, &labs, query)))
}

async fn list_certificates(
    State(state): State<AppState>,
    Learner(user): Learner,
    bearer: MaybeBearer,
    headers: HeaderMap,
) -> ApiResult<Vec<Certificate>> {
    let region = request_region(&state, &headers)?;
    let courses = state
        .catalog
        .fetch_list::<Course>(token_of(&bearer), Some(region))
        .await
        .into_inner();
    let enrollments = state.enrollments.list_for_learner(&user.id)?;
    Ok(Json(dashboard::certificates(&user, &enrollments, &courses)))
}

// --- helpers ---

fn found_enrollment(record: Option<EnrollmentRecord>, course_id: &str) -> ApiResult<EnrollmentRecord> {
    record.map(Json).ok_or_else(|| {
        not_found(
            format!("not enrolled in course '{course_id}'"),
            "/api/courses".to_string(),
        )
    })
}

fn found_lab_run(record: Option<LabRunRecord>, lab_id: &str) -> ApiResult<LabRunRecord> {
    record
        .map(Json)
        .ok_or_else(|| not_found(format!("lab '{lab_id}' not started"), "/api/labs".to_string()))
}

fn singular(collection: &str) -> &str {
    collection.strip_suffix('s').unwrap_or(collection)
}

fn not_found(message: String, back: String) -> ApiError {
    ApiError::NotFound { message, back }
}

fn e400<T: Into<String>>(msg: T) -> ApiError {
    ApiError::BadRequest(msg.into())
}
