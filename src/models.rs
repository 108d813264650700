// models.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Longest question or choice text accepted.
pub const MAX_TEXT_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Question {
    pub id: i64,
    pub question_text: String,
    pub pub_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Question {
    /// Published within the last day, and not in the future.
    pub fn was_published_recently(&self) -> bool {
        self.was_published_recently_at(Utc::now())
    }

    pub fn was_published_recently_at(&self, now: DateTime<Utc>) -> bool {
        now - Duration::days(1) <= self.pub_date && self.pub_date <= now
    }

    pub fn is_published(&self) -> bool {
        self.is_published_at(Utc::now())
    }

    pub fn is_published_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.pub_date
    }

    /// Voting opens at `pub_date` and closes after `end_date`, if one is set.
    pub fn can_vote(&self) -> bool {
        self.can_vote_at(Utc::now())
    }

    pub fn can_vote_at(&self, now: DateTime<Utc>) -> bool {
        self.is_published_at(now) && self.end_date.map_or(true, |end| now <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Choice {
    pub id: i64,
    pub question_id: i64,
    pub choice_text: String,
}

/// A choice with the number of votes currently pointing at it.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ChoiceTally {
    pub id: i64,
    pub question_id: i64,
    pub choice_text: String,
    pub votes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub id: i64,
    pub user_id: i64,
    pub choice_id: i64,
}

/// A user's vote joined with the text of the chosen answer.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CurrentVote {
    pub id: i64,
    pub choice_id: i64,
    pub choice_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_staff: bool,
}

/// Question as shown on the list and detail pages.
#[derive(Debug, Serialize)]
pub struct QuestionView {
    pub id: i64,
    pub question_text: String,
    pub pub_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub was_published_recently: bool,
    pub can_vote: bool,
}

impl QuestionView {
    pub fn at(question: &Question, now: DateTime<Utc>) -> Self {
        Self {
            id: question.id,
            question_text: question.question_text.clone(),
            pub_date: question.pub_date,
            end_date: question.end_date,
            was_published_recently: question.was_published_recently_at(now),
            can_vote: question.can_vote_at(now),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VoteForm {
    pub choice: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewQuestion {
    pub question_text: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub choices: Vec<String>,
}

impl NewQuestion {
    /// `now` stands in for a missing `pub_date`, as it does on insert.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        check_text("question_text", &self.question_text)?;
        for choice in &self.choices {
            check_text("choice_text", choice)?;
        }
        if let Some(end_date) = self.end_date {
            if end_date < self.pub_date.unwrap_or(now) {
                return Err(AppError::Validation(
                    "end_date must not be before pub_date".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct NewChoice {
    pub choice_text: String,
}

impl NewChoice {
    pub fn validate(&self) -> Result<(), AppError> {
        check_text("choice_text", &self.choice_text)
    }
}

pub fn check_text(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} must not be empty")));
    }
    if value.chars().count() > MAX_TEXT_LEN {
        return Err(AppError::Validation(format!(
            "{field} must be at most {MAX_TEXT_LEN} characters"
        )));
    }
    Ok(())
}
