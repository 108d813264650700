// src/poll.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Choice, ChoiceTally, CurrentVote, NewQuestion, Question, User};
use crate::store::{PollStore, VoteOutcome};

/// `PollStore` backed by PostgreSQL.
#[derive(Clone)]
pub struct PgPollStore {
    pool: PgPool,
}

impl PgPollStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PollStore for PgPollStore {
    async fn latest_published(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Question>, StoreError> {
        let questions = sqlx::query_as::<_, Question>(
            r#"
            SELECT id, question_text, pub_date, end_date
            FROM questions
            WHERE pub_date <= $1
            ORDER BY pub_date DESC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(questions)
    }

    async fn question(&self, id: i64) -> Result<Option<Question>, StoreError> {
        let question = sqlx::query_as::<_, Question>(
            "SELECT id, question_text, pub_date, end_date FROM questions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(question)
    }

    async fn choices(&self, question_id: i64) -> Result<Vec<Choice>, StoreError> {
        let choices = sqlx::query_as::<_, Choice>(
            "SELECT id, question_id, choice_text FROM choices WHERE question_id = $1 ORDER BY id",
        )
        .bind(question_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(choices)
    }

    async fn choice_for_question(&self, question_id: i64, choice_id: i64) -> Result<Option<Choice>, StoreError> {
        let choice = sqlx::query_as::<_, Choice>(
            "SELECT id, question_id, choice_text FROM choices WHERE id = $1 AND question_id = $2",
        )
        .bind(choice_id)
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(choice)
    }

    async fn user_vote(&self, user_id: i64, question_id: i64) -> Result<Option<CurrentVote>, StoreError> {
        let vote = sqlx::query_as::<_, CurrentVote>(
            r#"
            SELECT v.id, v.choice_id, c.choice_text
            FROM votes v
            JOIN choices c ON c.id = v.choice_id
            WHERE v.user_id = $1 AND c.question_id = $2
            "#,
        )
        .bind(user_id)
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(vote)
    }

    async fn cast_vote(&self, user_id: i64, question_id: i64, choice_id: i64) -> Result<VoteOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialises votes by the same user so the lookup below cannot go stale.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let existing: Option<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT v.id, v.choice_id
            FROM votes v
            JOIN choices c ON c.id = v.choice_id
            WHERE v.user_id = $1 AND c.question_id = $2
            "#,
        )
        .bind(user_id)
        .bind(question_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            Some((_, current)) if current == choice_id => VoteOutcome::Unchanged,
            Some((vote_id, previous_choice)) => {
                sqlx::query("UPDATE votes SET choice_id = $1 WHERE id = $2")
                    .bind(choice_id)
                    .bind(vote_id)
                    .execute(&mut *tx)
                    .await?;
                VoteOutcome::Changed { previous_choice }
            }
            None => {
                sqlx::query("INSERT INTO votes (user_id, choice_id) VALUES ($1, $2)")
                    .bind(user_id)
                    .bind(choice_id)
                    .execute(&mut *tx)
                    .await?;
                VoteOutcome::Created
            }
        };

        tx.commit().await?;
        debug!(user_id, question_id, choice_id, ?outcome, "vote stored");
        Ok(outcome)
    }

    async fn results(&self, question_id: i64) -> Result<Vec<ChoiceTally>, StoreError> {
        let tallies = sqlx::query_as::<_, ChoiceTally>(
            r#"
            SELECT c.id, c.question_id, c.choice_text, COUNT(v.id) AS votes
            FROM choices c
            LEFT JOIN votes v ON v.choice_id = c.id
            WHERE c.question_id = $1
            GROUP BY c.id
            ORDER BY c.id
            "#,
        )
        .bind(question_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tallies)
    }

    async fn create_question(&self, new: &NewQuestion, now: DateTime<Utc>) -> Result<(Question, Vec<Choice>), StoreError> {
        let mut tx = self.pool.begin().await?;

        let question = sqlx::query_as::<_, Question>(
            r#"
            INSERT INTO questions (question_text, pub_date, end_date)
            VALUES ($1, $2, $3)
            RETURNING id, question_text, pub_date, end_date
            "#,
        )
        .bind(&new.question_text)
        .bind(new.pub_date.unwrap_or(now))
        .bind(new.end_date)
        .fetch_one(&mut *tx)
        .await?;

        let mut choices = Vec::with_capacity(new.choices.len());
        for text in &new.choices {
            let choice = sqlx::query_as::<_, Choice>(
                "INSERT INTO choices (question_id, choice_text) VALUES ($1, $2) RETURNING id, question_id, choice_text",
            )
            .bind(question.id)
            .bind(text)
            .fetch_one(&mut *tx)
            .await?;
            choices.push(choice);
        }

        tx.commit().await?;
        Ok((question, choices))
    }

    async fn add_choice(&self, question_id: i64, choice_text: &str) -> Result<Choice, StoreError> {
        let choice = sqlx::query_as::<_, Choice>(
            r#"
            INSERT INTO choices (question_id, choice_text)
            SELECT id, $2 FROM questions WHERE id = $1
            RETURNING id, question_id, choice_text
            "#,
        )
        .bind(question_id)
        .bind(choice_text)
        .fetch_optional(&self.pool)
        .await?;

        choice.ok_or(StoreError::UnknownQuestion(question_id))
    }

    async fn create_user(&self, username: &str, password: &str, is_staff: bool) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash, is_staff)
            VALUES ($1, crypt($2, gen_salt('bf')), $3)
            RETURNING id, username, is_staff
            "#,
        )
        .bind(username)
        .bind(password)
        .bind(is_staff)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::DuplicateUsername(username.to_string())
            }
            other => StoreError::Database(other),
        })
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, is_staff
            FROM users
            WHERE username = $1 AND password_hash = crypt($2, password_hash)
            "#,
        )
        .bind(username)
        .bind(password)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create_session(&self, user_id: i64, expires_at: DateTime<Utc>) -> Result<Uuid, StoreError> {
        let token = Uuid::new_v4();
        sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(token)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;

        Ok(token)
    }

    async fn session_user(&self, token: Uuid, now: DateTime<Utc>) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.username, u.is_staff
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token = $1 AND s.expires_at > $2
            "#,
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn delete_session(&self, token: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
