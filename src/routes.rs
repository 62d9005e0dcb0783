use actix_identity::Identity;
use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, ResponseError};
use chrono::prelude::*;
use diesel::Connection;
use log::error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::auth;
use crate::cache::{compose_key, Cache};
use crate::grading::{GradingError, GradingPipeline, TestCaseOutcome, VerdictStatus};
use crate::language;
use crate::leaderboard::{self, ChallengeRanking, LeaderboardEntry, Period};
use crate::models::battle::{self, Battle, NewBattle};
use crate::models::challenge::{self, Challenge, TestCase};
use crate::models::submission::{self, NewSubmission, STATUS_PASSED};
use crate::models::user::{self, UserStoreError};
use crate::participants::{self, ParticipantView, DEFAULT_ACTIVITY_WINDOW_SECS};
use crate::rate_limit::RateLimiter;
use crate::scoring::{self, PriorPasses, SubmissionLocks};
use crate::setup::DbPool;

const LEADERBOARD_TTL: Duration = Duration::from_secs(60);
const PARTICIPANTS_TTL: Duration = Duration::from_secs(15);

pub struct AppState {
    pub pool: DbPool,
    pub grader: GradingPipeline,
    pub locks: SubmissionLocks,
    pub leaderboard_cache: Arc<Cache<Vec<LeaderboardEntry>>>,
    pub challenge_board_cache: Arc<Cache<Vec<ChallengeRanking>>>,
    pub participant_cache: Arc<Cache<Vec<ParticipantView>>>,
    pub api_limiter: RateLimiter,
    pub auth_limiter: RateLimiter,
    pub submission_limiter: RateLimiter,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("prohibited construct: {0}")]
    Prohibited(&'static str),
    #[error("authentication required")]
    Unauthorized,
    #[error("host privileges required")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("too many requests")]
    RateLimited { retry_after_ms: i64 },
    #[error("internal storage failure")]
    Storage,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) | ApiError::Prohibited(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::RateLimited { retry_after_ms } = self {
            let retry_after_secs = (retry_after_ms + 999) / 1_000;
            return HttpResponse::build(self.status_code())
                .insert_header((header::RETRY_AFTER, retry_after_secs.to_string()))
                .json(serde_json::json!({
                    "error": self.to_string(),
                    "retry_after_ms": retry_after_ms,
                }));
        }
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "error": self.to_string() }))
    }
}

impl From<GradingError> for ApiError {
    fn from(e: GradingError) -> ApiError {
        match e {
            GradingError::InvalidInput(message) => ApiError::InvalidInput(message),
            GradingError::Prohibited(pattern) => ApiError::Prohibited(pattern),
        }
    }
}

impl From<diesel::result::Error> for ApiError {
    fn from(e: diesel::result::Error) -> ApiError {
        error!("storage failure: {}", e);
        ApiError::Storage
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(e: r2d2::Error) -> ApiError {
        error!("connection pool failure: {}", e);
        ApiError::Storage
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(e: actix_web::error::BlockingError) -> ApiError {
        error!("blocking task failure: {}", e);
        ApiError::Storage
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> ApiError {
        error!("stored document decode failure: {}", e);
        ApiError::Storage
    }
}

impl From<UserStoreError> for ApiError {
    fn from(e: UserStoreError) -> ApiError {
        error!("user store failure: {}", e);
        ApiError::Storage
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/auth/register", web::post().to(register))
            .route("/auth/login", web::post().to(login))
            .route("/auth/logout", web::post().to(logout))
            .route("/languages", web::get().to(supported_languages))
            .route("/leaderboard", web::get().to(global_board))
            .route("/users/me/submissions", web::get().to(my_submissions))
            .route(
                "/challenges/{language}/{index}",
                web::get().to(challenge_detail),
            )
            .route(
                "/challenges/{language}/{index}/submit",
                web::post().to(submit_challenge),
            )
            .route(
                "/challenges/{language}/{index}/leaderboard",
                web::get().to(challenge_board),
            )
            .route(
                "/challenges/{language}/{index}/participants",
                web::get().to(challenge_participants),
            )
            .route(
                "/admin/challenges/{language}/{index}/participants/{user_id}",
                web::delete().to(remove_participant),
            )
            .route("/admin/battles", web::post().to(create_battle))
            .route("/battles/{id}/submit", web::post().to(submit_battle))
            .route("/battles/{id}/leaderboard", web::get().to(battle_board)),
    );
}

fn enforce_limit(limiter: &RateLimiter, identity: &str) -> Result<(), ApiError> {
    let decision = limiter.check(identity);
    if decision.allowed {
        return Ok(());
    }
    let retry_after_ms = (decision.reset_at_ms - Utc::now().timestamp_millis()).max(0);
    Err(ApiError::RateLimited { retry_after_ms })
}

fn rate_identity(req: &HttpRequest, identity: &Option<Identity>) -> String {
    if let Some(id) = identity.as_ref().and_then(|i| i.id().ok()) {
        return format!("user:{}", id);
    }
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}

async fn load_challenge_by_route(
    pool: &DbPool,
    language: String,
    index_num: i32,
) -> Result<Challenge, ApiError> {
    let pool = pool.clone();
    let found = web::block(move || -> Result<Option<Challenge>, ApiError> {
        let mut connection = pool.get()?;
        Ok(challenge::get_challenge_by_route(
            &mut connection,
            &language,
            index_num,
        )?)
    })
    .await??;
    match found {
        Some(challenge) if challenge.is_active => Ok(challenge),
        _ => Err(ApiError::NotFound),
    }
}

// ---- auth ----

#[derive(Deserialize)]
struct CredentialsRequest {
    name: String,
    password: String,
}

async fn register(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CredentialsRequest>,
) -> Result<HttpResponse, ApiError> {
    enforce_limit(&state.api_limiter, &rate_identity(&req, &None))?;
    enforce_limit(
        &state.auth_limiter,
        &format!("register:{}", rate_identity(&req, &None)),
    )?;

    let name = body.name.trim().to_owned();
    if name.is_empty() || name.len() > 32 {
        return Err(ApiError::InvalidInput(
            "name must be between 1 and 32 characters".into(),
        ));
    }
    if body.password.len() < 4 {
        return Err(ApiError::InvalidInput(
            "password must be at least 4 characters".into(),
        ));
    }

    let pool = state.pool.clone();
    let password = body.password.clone();
    let insert_name = name.clone();
    let inserted = web::block(
        move || -> Result<Result<user::User, UserStoreError>, ApiError> {
            let mut connection = pool.get()?;
            Ok(user::insert_new_user(
                &mut connection,
                user::NewUser {
                    name: &insert_name,
                    password: &password,
                    is_host: false,
                },
            ))
        },
    )
    .await??;

    let registered = match inserted {
        Ok(user) => user,
        Err(UserStoreError::Database(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        ))) => return Err(ApiError::InvalidInput("name already taken".into())),
        Err(e) => return Err(e.into()),
    };

    Identity::login(&req.extensions(), registered.id.to_string()).map_err(|e| {
        error!("session login failure: {}", e);
        ApiError::Storage
    })?;
    Ok(HttpResponse::Ok().json(&registered))
}

async fn login(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CredentialsRequest>,
) -> Result<HttpResponse, ApiError> {
    // Keyed by claimed name so one account can't be brute-forced from many
    // addresses.
    enforce_limit(&state.auth_limiter, &format!("login:{}", body.name))?;

    let pool = state.pool.clone();
    let name = body.name.clone();
    let password = body.password.clone();
    let matched = web::block(move || -> Result<_, ApiError> {
        let mut connection = pool.get()?;
        Ok(user::check_matching_password(
            &mut connection,
            &name,
            &password,
        )?)
    })
    .await??;

    let user = matched.ok_or(ApiError::Unauthorized)?;
    Identity::login(&req.extensions(), user.id.to_string()).map_err(|e| {
        error!("session login failure: {}", e);
        ApiError::Storage
    })?;
    Ok(HttpResponse::Ok().json(&user))
}

async fn logout(identity: Option<Identity>) -> HttpResponse {
    if let Some(identity) = identity {
        identity.logout();
    }
    HttpResponse::Ok().finish()
}

// ---- challenges ----

#[derive(Serialize)]
struct LanguageListing {
    key: String,
    name: String,
}

async fn supported_languages() -> HttpResponse {
    let languages = language::get_supported_languages();
    let mut ordered: Vec<(i32, LanguageListing)> = languages
        .iter()
        .map(|(key, params)| {
            (
                params.order,
                LanguageListing {
                    key: key.clone(),
                    name: params.name.clone(),
                },
            )
        })
        .collect();
    ordered.sort_by_key(|(order, _)| *order);
    let listings: Vec<LanguageListing> =
        ordered.into_iter().map(|(_, listing)| listing).collect();
    HttpResponse::Ok().json(listings)
}

#[derive(Serialize)]
struct PublicTestCase {
    input: String,
    expected: String,
}

#[derive(Serialize)]
struct ChallengeDetailResponse {
    language: String,
    index: i32,
    slug: String,
    title: String,
    difficulty: String,
    points: i32,
    submission_count: i32,
    sample_test_cases: Vec<PublicTestCase>,
}

async fn challenge_detail(
    state: web::Data<AppState>,
    req: HttpRequest,
    identity: Option<Identity>,
    path: web::Path<(String, i32)>,
) -> Result<HttpResponse, ApiError> {
    enforce_limit(&state.api_limiter, &rate_identity(&req, &identity))?;
    let (language, index_num) = path.into_inner();
    let challenge = load_challenge_by_route(&state.pool, language, index_num).await?;
    let sample_test_cases = challenge
        .test_cases()?
        .into_iter()
        .filter(|case| !case.hidden)
        .map(|case| PublicTestCase {
            input: case.input,
            expected: case.expected,
        })
        .collect();
    Ok(HttpResponse::Ok().json(ChallengeDetailResponse {
        language: challenge.language,
        index: challenge.index_num,
        slug: challenge.slug,
        title: challenge.title,
        difficulty: challenge.difficulty,
        points: challenge.points,
        submission_count: challenge.submission_count,
        sample_test_cases,
    }))
}

// ---- submissions ----

#[derive(Deserialize)]
struct SubmitRequest {
    code: String,
}

#[derive(Serialize)]
struct SubmitResponse {
    uuid: String,
    status: VerdictStatus,
    test_results: Vec<TestCaseOutcome>,
    time_wall_ms: i64,
    points_earned: i32,
    is_first_solve: bool,
}

fn redact_hidden(results: &[TestCaseOutcome], cases: &[TestCase]) -> Vec<TestCaseOutcome> {
    results
        .iter()
        .enumerate()
        .map(|(index, result)| {
            if cases.get(index).map(|case| case.hidden).unwrap_or(false) {
                TestCaseOutcome {
                    input: "<hidden>".into(),
                    expected: "<hidden>".into(),
                    actual: "<hidden>".into(),
                    ..result.clone()
                }
            } else {
                result.clone()
            }
        })
        .collect()
}

fn invalidate_challenge_caches(state: &AppState, challenge_id: i32) {
    state.leaderboard_cache.clear();
    state
        .challenge_board_cache
        .delete(&compose_key("challenge-board", &[&challenge_id.to_string()]));
    // Participant keys also carry the window; wipe the namespace wholesale.
    state.participant_cache.clear();
}

async fn submit_challenge(
    state: web::Data<AppState>,
    req: HttpRequest,
    identity: Option<Identity>,
    path: web::Path<(String, i32)>,
    body: web::Json<SubmitRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = auth::current_user(&state.pool, identity).await?;
    enforce_limit(&state.submission_limiter, &format!("user:{}", user.id))?;

    let (language, index_num) = path.into_inner();
    let challenge = load_challenge_by_route(&state.pool, language, index_num).await?;
    let test_cases = challenge.test_cases()?;

    let verdict = state
        .grader
        .grade(&body.code, &challenge.language, &test_cases)
        .await?;
    let results_json = serde_json::to_string(&verdict.test_results)?;
    let submission_uuid = uuid::Uuid::new_v4().to_string();

    // Prior-state read and append stay inside one per-challenge critical
    // section; see ScoringPolicy.
    let lock = state.locks.challenge(challenge.id);
    let guard = lock.lock().await;

    let pool = state.pool.clone();
    let record = RecordSubmission {
        uuid: submission_uuid,
        challenge_id: challenge.id,
        challenge_points: challenge.points,
        user_id: user.id,
        language: challenge.language.clone(),
        source_text: body.code.clone(),
        verdict_status: verdict.status,
        results_json,
        time_wall_ms: verdict.time_wall_ms,
    };
    let (uuid, outcome) = web::block(move || -> Result<_, ApiError> {
        let mut connection = pool.get()?;
        Ok(record_challenge_submission(&mut connection, record)?)
    })
    .await??;
    drop(guard);

    invalidate_challenge_caches(&state, challenge.id);

    Ok(HttpResponse::Ok().json(SubmitResponse {
        uuid,
        status: verdict.status,
        test_results: redact_hidden(&verdict.test_results, &test_cases),
        time_wall_ms: verdict.time_wall_ms,
        points_earned: outcome.points,
        is_first_solve: outcome.is_first_solve,
    }))
}

struct RecordSubmission {
    uuid: String,
    challenge_id: i32,
    challenge_points: i32,
    user_id: i32,
    language: String,
    source_text: String,
    verdict_status: VerdictStatus,
    results_json: String,
    time_wall_ms: i64,
}

fn record_challenge_submission(
    connection: &mut diesel::sqlite::SqliteConnection,
    record: RecordSubmission,
) -> Result<(String, scoring::ScoreOutcome), diesel::result::Error> {
    connection.immediate_transaction(|connection| {
        let prior = PriorPasses {
            challenge_has_passed: submission::find_passed_for(connection, record.challenge_id)?
                .is_some(),
            user_has_passed: submission::user_has_passed(
                connection,
                record.challenge_id,
                record.user_id,
            )?,
        };
        let outcome = scoring::score_challenge(
            record.challenge_points,
            record.verdict_status == VerdictStatus::Passed,
            prior,
        );
        submission::insert_submission(
            connection,
            NewSubmission {
                uuid: record.uuid.clone(),
                challenge_id: record.challenge_id,
                user_id: record.user_id,
                battle_id: None,
                language: record.language,
                source_text: record.source_text,
                status: record.verdict_status.as_str().into(),
                test_results_json: record.results_json,
                time_wall_ms: record.time_wall_ms,
                points_earned: outcome.points,
                is_first_solve: outcome.is_first_solve,
                submission_instant: Utc::now().naive_utc(),
            },
        )?;
        challenge::increment_submission_count(connection, record.challenge_id)?;
        Ok((record.uuid, outcome))
    })
}

#[derive(Serialize)]
struct SubmissionSummary {
    uuid: String,
    challenge_id: i32,
    battle_id: Option<i32>,
    status: String,
    points_earned: i32,
    is_first_solve: bool,
    submission_instant: NaiveDateTime,
}

async fn my_submissions(
    state: web::Data<AppState>,
    req: HttpRequest,
    identity: Option<Identity>,
) -> Result<HttpResponse, ApiError> {
    enforce_limit(&state.api_limiter, &rate_identity(&req, &identity))?;
    let user = auth::current_user(&state.pool, identity).await?;

    let pool = state.pool.clone();
    let rows = web::block(move || -> Result<_, ApiError> {
        let mut connection = pool.get()?;
        Ok(submission::get_submissions_by_user(&mut connection, user.id)?)
    })
    .await??;

    let summaries: Vec<SubmissionSummary> = rows
        .into_iter()
        .map(|row| SubmissionSummary {
            uuid: row.uuid,
            challenge_id: row.challenge_id,
            battle_id: row.battle_id,
            status: row.status,
            points_earned: row.points_earned,
            is_first_solve: row.is_first_solve,
            submission_instant: row.submission_instant,
        })
        .collect();
    Ok(HttpResponse::Ok().json(summaries))
}

// ---- boards and presence ----

#[derive(Deserialize)]
struct LeaderboardQuery {
    language: Option<String>,
    period: Option<String>,
}

async fn global_board(
    state: web::Data<AppState>,
    req: HttpRequest,
    identity: Option<Identity>,
    query: web::Query<LeaderboardQuery>,
) -> Result<HttpResponse, ApiError> {
    enforce_limit(&state.api_limiter, &rate_identity(&req, &identity))?;

    let period = match query.period.as_deref() {
        None => Period::All,
        Some(value) => Period::parse(value)
            .ok_or_else(|| ApiError::InvalidInput(format!("unknown period {}", value)))?,
    };
    let language = query.language.clone();

    let key = compose_key(
        "leaderboard",
        &[language.as_deref().unwrap_or("all"), period.as_str()],
    );
    if let Some(entries) = state.leaderboard_cache.get(&key) {
        return Ok(HttpResponse::Ok().json(entries));
    }

    let pool = state.pool.clone();
    let entries = web::block(move || -> Result<_, ApiError> {
        let mut connection = pool.get()?;
        Ok(leaderboard::global_leaderboard(
            &mut connection,
            language.as_deref(),
            period,
        )?)
    })
    .await??;

    state
        .leaderboard_cache
        .set(&key, entries.clone(), LEADERBOARD_TTL);
    Ok(HttpResponse::Ok().json(entries))
}

async fn challenge_board(
    state: web::Data<AppState>,
    req: HttpRequest,
    identity: Option<Identity>,
    path: web::Path<(String, i32)>,
) -> Result<HttpResponse, ApiError> {
    enforce_limit(&state.api_limiter, &rate_identity(&req, &identity))?;
    let (language, index_num) = path.into_inner();
    let challenge = load_challenge_by_route(&state.pool, language, index_num).await?;

    let key = compose_key("challenge-board", &[&challenge.id.to_string()]);
    if let Some(rankings) = state.challenge_board_cache.get(&key) {
        return Ok(HttpResponse::Ok().json(rankings));
    }

    let pool = state.pool.clone();
    let rankings = web::block(move || -> Result<_, ApiError> {
        let mut connection = pool.get()?;
        Ok(leaderboard::challenge_leaderboard(
            &mut connection,
            challenge.id,
        )?)
    })
    .await??;

    state
        .challenge_board_cache
        .set(&key, rankings.clone(), LEADERBOARD_TTL);
    Ok(HttpResponse::Ok().json(rankings))
}

#[derive(Deserialize)]
struct ParticipantsQuery {
    window: Option<i64>,
}

async fn challenge_participants(
    state: web::Data<AppState>,
    req: HttpRequest,
    identity: Option<Identity>,
    path: web::Path<(String, i32)>,
    query: web::Query<ParticipantsQuery>,
) -> Result<HttpResponse, ApiError> {
    enforce_limit(&state.api_limiter, &rate_identity(&req, &identity))?;
    let (language, index_num) = path.into_inner();
    let challenge = load_challenge_by_route(&state.pool, language, index_num).await?;

    let window_secs = query.window.unwrap_or(DEFAULT_ACTIVITY_WINDOW_SECS);
    if !(1..=86_400).contains(&window_secs) {
        return Err(ApiError::InvalidInput(
            "window must be between 1 and 86400 seconds".into(),
        ));
    }

    let key = compose_key(
        "participants",
        &[&challenge.id.to_string(), &window_secs.to_string()],
    );
    if let Some(views) = state.participant_cache.get(&key) {
        return Ok(HttpResponse::Ok().json(views));
    }

    let pool = state.pool.clone();
    let views = web::block(move || -> Result<_, ApiError> {
        let mut connection = pool.get()?;
        Ok(participants::active_for(
            &mut connection,
            challenge.id,
            window_secs,
        )?)
    })
    .await??;

    state
        .participant_cache
        .set(&key, views.clone(), PARTICIPANTS_TTL);
    Ok(HttpResponse::Ok().json(views))
}

// ---- host administration ----

async fn remove_participant(
    state: web::Data<AppState>,
    req: HttpRequest,
    identity: Option<Identity>,
    path: web::Path<(String, i32, i32)>,
) -> Result<HttpResponse, ApiError> {
    enforce_limit(&state.api_limiter, &rate_identity(&req, &identity))?;
    let host = auth::current_user(&state.pool, identity).await?;
    auth::require_host(&host)?;

    let (language, index_num, target_user_id) = path.into_inner();
    let challenge = load_challenge_by_route(&state.pool, language, index_num).await?;

    let pool = state.pool.clone();
    let removed = web::block(move || -> Result<_, ApiError> {
        let mut connection = pool.get()?;
        Ok(submission::delete_for_user_challenge(
            &mut connection,
            challenge.id,
            target_user_id,
        )?)
    })
    .await??;

    invalidate_challenge_caches(&state, challenge.id);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "removed": removed })))
}

#[derive(Deserialize)]
struct CreateBattleRequest {
    name: String,
    challenge_id: i32,
    start_instant: NaiveDateTime,
    end_instant: NaiveDateTime,
}

async fn create_battle(
    state: web::Data<AppState>,
    req: HttpRequest,
    identity: Option<Identity>,
    body: web::Json<CreateBattleRequest>,
) -> Result<HttpResponse, ApiError> {
    enforce_limit(&state.api_limiter, &rate_identity(&req, &identity))?;
    let host = auth::current_user(&state.pool, identity).await?;
    auth::require_host(&host)?;

    if body.end_instant <= body.start_instant {
        return Err(ApiError::InvalidInput(
            "battle must end after it starts".into(),
        ));
    }

    let pool = state.pool.clone();
    let new_battle = NewBattle {
        name: body.name.clone(),
        challenge_id: body.challenge_id,
        start_instant: body.start_instant,
        end_instant: body.end_instant,
        creation_user_id: host.id,
        creation_instant: Utc::now().naive_utc(),
    };
    let created = web::block(move || -> Result<_, ApiError> {
        let mut connection = pool.get()?;
        if challenge::get_challenge(&mut connection, new_battle.challenge_id)?.is_none() {
            return Err(ApiError::NotFound);
        }
        Ok(battle::insert_battle(&mut connection, new_battle)?)
    })
    .await??;

    Ok(HttpResponse::Ok().json(&created))
}

// ---- battles ----

async fn load_battle(pool: &DbPool, battle_id: i32) -> Result<Battle, ApiError> {
    let pool = pool.clone();
    web::block(move || -> Result<_, ApiError> {
        let mut connection = pool.get()?;
        Ok(battle::get_battle(&mut connection, battle_id)?)
    })
    .await??
    .ok_or(ApiError::NotFound)
}

async fn submit_battle(
    state: web::Data<AppState>,
    _req: HttpRequest,
    identity: Option<Identity>,
    path: web::Path<i32>,
    body: web::Json<SubmitRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = auth::current_user(&state.pool, identity).await?;
    enforce_limit(&state.submission_limiter, &format!("user:{}", user.id))?;

    let battle_id = path.into_inner();
    let battle = load_battle(&state.pool, battle_id).await?;
    if !battle.is_open_at(Utc::now().naive_utc()) {
        return Err(ApiError::InvalidInput("battle is not open".into()));
    }

    let pool = state.pool.clone();
    let challenge_id = battle.challenge_id;
    let challenge = web::block(move || -> Result<_, ApiError> {
        let mut connection = pool.get()?;
        Ok(challenge::get_challenge(&mut connection, challenge_id)?)
    })
    .await??
    .ok_or(ApiError::NotFound)?;
    let test_cases = challenge.test_cases()?;

    let verdict = state
        .grader
        .grade(&body.code, &challenge.language, &test_cases)
        .await?;
    let results_json = serde_json::to_string(&verdict.test_results)?;
    let submission_uuid = uuid::Uuid::new_v4().to_string();

    // Passing order decides rank, so the count and the append are serialized
    // per battle.
    let lock = state.locks.battle(battle.id);
    let guard = lock.lock().await;

    let pool = state.pool.clone();
    let record = RecordBattleSubmission {
        uuid: submission_uuid,
        battle_id: battle.id,
        challenge_id: challenge.id,
        user_id: user.id,
        language: challenge.language.clone(),
        source_text: body.code.clone(),
        verdict_status: verdict.status,
        results_json,
        time_wall_ms: verdict.time_wall_ms,
    };
    let (uuid, points_earned) = web::block(move || -> Result<_, ApiError> {
        let mut connection = pool.get()?;
        Ok(record_battle_submission(&mut connection, record)?)
    })
    .await??;
    drop(guard);

    invalidate_challenge_caches(&state, challenge.id);

    Ok(HttpResponse::Ok().json(SubmitResponse {
        uuid,
        status: verdict.status,
        test_results: redact_hidden(&verdict.test_results, &test_cases),
        time_wall_ms: verdict.time_wall_ms,
        points_earned,
        is_first_solve: false,
    }))
}

struct RecordBattleSubmission {
    uuid: String,
    battle_id: i32,
    challenge_id: i32,
    user_id: i32,
    language: String,
    source_text: String,
    verdict_status: VerdictStatus,
    results_json: String,
    time_wall_ms: i64,
}

fn record_battle_submission(
    connection: &mut diesel::sqlite::SqliteConnection,
    record: RecordBattleSubmission,
) -> Result<(String, i32), diesel::result::Error> {
    connection.immediate_transaction(|connection| {
        let rows = submission::submissions_for_battle(connection, record.battle_id)?;
        let mut passers: HashSet<i32> = HashSet::new();
        for row in rows.iter().filter(|row| row.status == STATUS_PASSED) {
            passers.insert(row.user_id);
        }

        let passed = record.verdict_status == VerdictStatus::Passed;
        let points = if passed && passers.contains(&record.user_id) {
            // Re-solving is recorded but never re-awarded.
            0
        } else if passed {
            scoring::score_battle(true, passers.len() as i64 + 1)
        } else {
            scoring::score_battle(false, 0)
        };

        submission::insert_submission(
            connection,
            NewSubmission {
                uuid: record.uuid.clone(),
                challenge_id: record.challenge_id,
                user_id: record.user_id,
                battle_id: Some(record.battle_id),
                language: record.language,
                source_text: record.source_text,
                status: record.verdict_status.as_str().into(),
                test_results_json: record.results_json,
                time_wall_ms: record.time_wall_ms,
                points_earned: points,
                is_first_solve: false,
                submission_instant: Utc::now().naive_utc(),
            },
        )?;
        challenge::increment_submission_count(connection, record.challenge_id)?;
        Ok((record.uuid, points))
    })
}

#[derive(Serialize, Clone)]
struct BattleRanking {
    user_id: i32,
    name: String,
    points_earned: i32,
    submission_instant: NaiveDateTime,
}

async fn battle_board(
    state: web::Data<AppState>,
    req: HttpRequest,
    identity: Option<Identity>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    enforce_limit(&state.api_limiter, &rate_identity(&req, &identity))?;
    let battle_id = path.into_inner();
    let battle = load_battle(&state.pool, battle_id).await?;

    let pool = state.pool.clone();
    let (rows, names) = web::block(move || -> Result<_, ApiError> {
        let mut connection = pool.get()?;
        let rows = submission::submissions_for_battle(&mut connection, battle.id)?;
        let ids: Vec<i32> = rows.iter().map(|row| row.user_id).collect();
        let names = user::get_user_names(&mut connection, &ids)?;
        Ok((rows, names))
    })
    .await??;

    // Best attempt per user; rows arrive in submission order.
    let mut best: HashMap<i32, BattleRanking> = HashMap::new();
    for row in rows {
        let candidate = BattleRanking {
            user_id: row.user_id,
            name: names.get(&row.user_id).cloned().unwrap_or_default(),
            points_earned: row.points_earned,
            submission_instant: row.submission_instant,
        };
        let replace = match best.get(&row.user_id) {
            Some(current) => candidate.points_earned > current.points_earned,
            None => true,
        };
        if replace {
            best.insert(row.user_id, candidate);
        }
    }
    let mut rankings: Vec<BattleRanking> = best.into_values().collect();
    rankings.sort_by(|a, b| {
        b.points_earned
            .cmp(&a.points_earned)
            .then(a.submission_instant.cmp(&b.submission_instant))
            .then(a.user_id.cmp(&b.user_id))
    });

    Ok(HttpResponse::Ok().json(rankings))
}
