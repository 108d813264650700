// handlers.rs
use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, Path, Query, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::auth::{
    clear_flash_cookie, clear_session_cookie, flash_message, found, redirect_with_flash,
    safe_next, session_cookie, session_token, AuthUser, FlashMessage, StaffUser, INDEX_PATH,
};
use crate::error::AppError;
use crate::models::{
    LoginForm, LoginQuery, NewChoice, NewQuestion, Question, QuestionView, SignupForm, User,
    VoteForm,
};
use crate::state::AppState;

/// How many questions the list page shows.
pub const LATEST_LIMIT: i64 = 5;

const NO_POLLS: &str = "No polls are available.";
const NO_CHOICE: &str = "You didn't select a choice.";
const MAX_USERNAME_LEN: usize = 150;

pub async fn home() -> Response {
    found(INDEX_PATH, &[])
}

/// The five most recent published questions, plus any pending flash message.
pub async fn index(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let now = Utc::now();
    let latest: Vec<QuestionView> = state
        .store
        .latest_published(now, LATEST_LIMIT)
        .await?
        .iter()
        .map(|q| QuestionView::at(q, now))
        .collect();
    let flash = flash_message(&headers);
    let messages: Vec<&str> = flash.map(FlashMessage::text).into_iter().collect();

    let mut body = json!({
        "latest_question_list": latest,
        "messages": messages,
    });
    if latest.is_empty() {
        body["notice"] = json!(NO_POLLS);
    }

    let mut response = Json(body).into_response();
    if flash.is_some() {
        if let Ok(value) = HeaderValue::try_from(clear_flash_cookie()) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
    Ok(response)
}

/// Voting page for a question that is currently open.
pub async fn detail(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(question_id): Path<i64>,
) -> Result<Response, AppError> {
    let Some(question) = state.store.question(question_id).await? else {
        return Ok(redirect_with_flash(INDEX_PATH, FlashMessage::QuestionMissing));
    };
    if !question.can_vote() {
        return Ok(redirect_with_flash(INDEX_PATH, FlashMessage::VotingClosed));
    }

    detail_page(&state, &question, &user, None).await
}

async fn detail_page(
    state: &AppState,
    question: &Question,
    user: &User,
    error_message: Option<&str>,
) -> Result<Response, AppError> {
    let choices = state.store.choices(question.id).await?;
    let voted = state.store.user_vote(user.id, question.id).await?;

    let mut body = json!({
        "question": QuestionView::at(question, Utc::now()),
        "choices": choices,
        "voted": voted.map(|v| v.choice_text),
    });
    if let Some(message) = error_message {
        body["error_message"] = json!(message);
    }
    Ok(Json(body).into_response())
}

/// Records the user's choice, replacing any earlier vote on the same question.
pub async fn vote(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(question_id): Path<i64>,
    form: Result<Form<VoteForm>, FormRejection>,
) -> Result<Response, AppError> {
    let question = state
        .store
        .question(question_id)
        .await?
        .ok_or(AppError::NotFound("Question does not exist."))?;
    if !question.can_vote() {
        return Ok(redirect_with_flash(INDEX_PATH, FlashMessage::VotingClosed));
    }

    // An unreadable submission counts as no selection.
    let choice_id = form
        .ok()
        .and_then(|Form(form)| form.choice)
        .and_then(|c| c.trim().parse::<i64>().ok());
    let selected = match choice_id {
        Some(choice_id) => state.store.choice_for_question(question.id, choice_id).await?,
        None => None,
    };
    let Some(choice) = selected else {
        return detail_page(&state, &question, &user, Some(NO_CHOICE)).await;
    };

    let outcome = state.store.cast_vote(user.id, question.id, choice.id).await?;
    info!(
        user = %user.username,
        question_id,
        choice_id = choice.id,
        ?outcome,
        "Vote recorded"
    );

    Ok(found(&format!("/polls/{question_id}/results/"), &[]))
}

/// Published question with the number of votes each choice holds.
pub async fn results(
    State(state): State<Arc<AppState>>,
    Path(question_id): Path<i64>,
) -> Result<Response, AppError> {
    let now = Utc::now();
    let question = state
        .store
        .question(question_id)
        .await?
        .filter(|q| q.is_published_at(now))
        .ok_or(AppError::NotFound("Question does not exist."))?;

    let choices = state.store.results(question.id).await?;
    let total_votes: i64 = choices.iter().map(|c| c.votes).sum();

    Ok(Json(json!({
        "question": QuestionView::at(&question, now),
        "choices": choices,
        "total_votes": total_votes,
    }))
    .into_response())
}

pub async fn login_page(Query(query): Query<LoginQuery>) -> Response {
    Json(json!({ "next": safe_next(query.next.as_deref()) })).into_response()
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let user = state
        .store
        .authenticate(form.username.trim(), &form.password)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    let cookie = start_session(&state, &user).await?;
    info!(username = %user.username, "User logged in");
    Ok(found(safe_next(form.next.as_deref()), &[cookie]))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if let Some(token) = session_token(&headers) {
        state.store.delete_session(token).await?;
    }
    Ok(found(INDEX_PATH, &[clear_session_cookie()]))
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SignupForm>,
) -> Result<Response, AppError> {
    let username = form.username.trim();
    if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN {
        return Err(AppError::Validation(format!(
            "username must be 1 to {MAX_USERNAME_LEN} characters"
        )));
    }
    if form.password.is_empty() {
        return Err(AppError::Validation("password must not be empty".to_string()));
    }

    let user = state.store.create_user(username, &form.password, false).await?;
    let cookie = start_session(&state, &user).await?;
    info!(username = %user.username, "User signed up");
    Ok(found(INDEX_PATH, &[cookie]))
}

async fn start_session(state: &AppState, user: &User) -> Result<String, AppError> {
    let ttl = state.config.session_ttl;
    let token = state.store.create_session(user.id, Utc::now() + ttl).await?;
    Ok(session_cookie(token, ttl))
}

/// Creates a question with its initial choices (staff only).
pub async fn create_question(
    State(state): State<Arc<AppState>>,
    StaffUser(staff): StaffUser,
    Json(new): Json<NewQuestion>,
) -> Result<Response, AppError> {
    let now = Utc::now();
    new.validate(now)?;
    let (question, choices) = state.store.create_question(&new, now).await?;
    info!(staff = %staff.username, question_id = question.id, "Question created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "question": QuestionView::at(&question, now),
            "choices": choices,
        })),
    )
        .into_response())
}

pub async fn add_choice(
    State(state): State<Arc<AppState>>,
    StaffUser(staff): StaffUser,
    Path(question_id): Path<i64>,
    Json(new): Json<NewChoice>,
) -> Result<Response, AppError> {
    new.validate()?;
    let choice = state.store.add_choice(question_id, &new.choice_text).await?;
    info!(staff = %staff.username, question_id, choice_id = choice.id, "Choice added");

    Ok((StatusCode::CREATED, Json(choice)).into_response())
}
