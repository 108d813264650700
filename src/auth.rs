//! Session and flash-message cookies, and the extractors guarding
//! login-only and staff-only routes.
//!
//! Sessions live in the store; the browser only carries the random token
//! in the `sessionid` cookie. Flash messages travel as a short code in the
//! `flash` cookie and are cleared by the page that displays them.
use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use http::{
    header::{COOKIE, LOCATION, SET_COOKIE},
    request::Parts,
    HeaderMap, HeaderValue, StatusCode,
};
use tracing::debug;
use uuid::Uuid;

use crate::{error::AppError, models::User, state::AppState};

pub const SESSION_COOKIE: &str = "sessionid";
pub const FLASH_COOKIE: &str = "flash";
pub const LOGIN_PATH: &str = "/accounts/login/";
pub const INDEX_PATH: &str = "/polls/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashMessage {
    QuestionMissing,
    VotingClosed,
}

impl FlashMessage {
    pub fn code(self) -> &'static str {
        match self {
            FlashMessage::QuestionMissing => "question_missing",
            FlashMessage::VotingClosed => "voting_closed",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "question_missing" => Some(FlashMessage::QuestionMissing),
            "voting_closed" => Some(FlashMessage::VotingClosed),
            _ => None,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            FlashMessage::QuestionMissing => "Question does not exist.",
            FlashMessage::VotingClosed => "Voting is not allowed at this time.",
        }
    }
}

pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find_map(|(key, value)| (key == name).then_some(value))
}

pub fn session_token(headers: &HeaderMap) -> Option<Uuid> {
    cookie_value(headers, SESSION_COOKIE).and_then(|value| Uuid::parse_str(value).ok())
}

pub fn flash_message(headers: &HeaderMap) -> Option<FlashMessage> {
    cookie_value(headers, FLASH_COOKIE).and_then(FlashMessage::from_code)
}

pub fn session_cookie(token: Uuid, ttl: Duration) -> String {
    format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        ttl.num_seconds()
    )
}

pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

pub fn flash_cookie(message: FlashMessage) -> String {
    format!("{FLASH_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax", message.code())
}

pub fn clear_flash_cookie() -> String {
    format!("{FLASH_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// `302 Found` to `location`, setting each cookie given.
pub fn found(location: &str, cookies: &[String]) -> Response {
    let location =
        HeaderValue::try_from(location).unwrap_or_else(|_| HeaderValue::from_static(INDEX_PATH));
    let mut response = (StatusCode::FOUND, [(LOCATION, location)]).into_response();
    for cookie in cookies {
        if let Ok(value) = HeaderValue::try_from(cookie.as_str()) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
    response
}

pub fn redirect_with_flash(location: &str, message: FlashMessage) -> Response {
    found(location, &[flash_cookie(message)])
}

/// Only same-site absolute paths are followed after login.
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path,
        _ => INDEX_PATH,
    }
}

/// Login page URL that returns to `next` afterwards.
pub fn login_redirect(next: &str) -> String {
    match serde_urlencoded::to_string(&[("next", next)]) {
        Ok(query) => format!("{LOGIN_PATH}?{query}"),
        Err(_) => LOGIN_PATH.to_string(),
    }
}

/// The signed-in user. Anonymous requests are sent to the login page.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        if let Some(token) = session_token(&parts.headers) {
            let user = state
                .store
                .session_user(token, Utc::now())
                .await
                .map_err(|e| AppError::from(e).into_response())?;
            if let Some(user) = user {
                return Ok(AuthUser(user));
            }
            debug!("Session token unknown or expired");
        }

        let next = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(INDEX_PATH);
        Err(found(&login_redirect(next), &[]))
    }
}

/// A signed-in user with the staff flag.
#[derive(Debug, Clone)]
pub struct StaffUser(pub User);

impl FromRequestParts<Arc<AppState>> for StaffUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_staff {
            return Err(AppError::Forbidden.into_response());
        }
        Ok(StaffUser(user))
    }
}
