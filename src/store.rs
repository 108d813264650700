// store.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Choice, ChoiceTally, CurrentVote, NewQuestion, Question, User};

#[cfg(any(test, feature = "testkit"))]
pub use memory::MemoryPollStore;

/// What `cast_vote` did to the voter's single row for the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VoteOutcome {
    Created,
    Changed { previous_choice: i64 },
    Unchanged,
}

#[async_trait]
pub trait PollStore: Send + Sync {
    /// Questions published at or before `now`, newest first.
    async fn latest_published(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Question>, StoreError>;

    async fn question(&self, id: i64) -> Result<Option<Question>, StoreError>;

    async fn choices(&self, question_id: i64) -> Result<Vec<Choice>, StoreError>;

    /// The choice, but only when it belongs to `question_id`.
    async fn choice_for_question(&self, question_id: i64, choice_id: i64) -> Result<Option<Choice>, StoreError>;

    async fn user_vote(&self, user_id: i64, question_id: i64) -> Result<Option<CurrentVote>, StoreError>;

    /// Creates the user's vote on the question or points the existing one at `choice_id`.
    async fn cast_vote(&self, user_id: i64, question_id: i64, choice_id: i64) -> Result<VoteOutcome, StoreError>;

    async fn results(&self, question_id: i64) -> Result<Vec<ChoiceTally>, StoreError>;

    async fn create_question(&self, new: &NewQuestion, now: DateTime<Utc>) -> Result<(Question, Vec<Choice>), StoreError>;

    async fn add_choice(&self, question_id: i64, choice_text: &str) -> Result<Choice, StoreError>;

    async fn create_user(&self, username: &str, password: &str, is_staff: bool) -> Result<User, StoreError>;

    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>, StoreError>;

    async fn create_session(&self, user_id: i64, expires_at: DateTime<Utc>) -> Result<Uuid, StoreError>;

    async fn session_user(&self, token: Uuid, now: DateTime<Utc>) -> Result<Option<User>, StoreError>;

    async fn delete_session(&self, token: Uuid) -> Result<(), StoreError>;
}

#[cfg(any(test, feature = "testkit"))]
mod memory {
    use std::collections::HashMap;

    use tokio::sync::Mutex;

    use super::*;
    use crate::models::Vote;

    struct StoredUser {
        user: User,
        password: String,
    }

    #[derive(Default)]
    struct Inner {
        next_id: i64,
        questions: Vec<Question>,
        choices: Vec<Choice>,
        votes: Vec<Vote>,
        users: Vec<StoredUser>,
        sessions: HashMap<Uuid, (i64, DateTime<Utc>)>,
    }

    impl Inner {
        fn next_id(&mut self) -> i64 {
            self.next_id += 1;
            self.next_id
        }

        fn question_of(&self, choice_id: i64) -> Option<i64> {
            self.choices
                .iter()
                .find(|c| c.id == choice_id)
                .map(|c| c.question_id)
        }
    }

    /// In-process store used by the test suite.
    #[derive(Default)]
    pub struct MemoryPollStore {
        inner: Mutex<Inner>,
    }

    impl MemoryPollStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of vote rows held for `user_id` on `question_id`.
        pub async fn vote_rows(&self, user_id: i64, question_id: i64) -> usize {
            let inner = self.inner.lock().await;
            inner
                .votes
                .iter()
                .filter(|v| v.user_id == user_id && inner.question_of(v.choice_id) == Some(question_id))
                .count()
        }
    }

    #[async_trait]
    impl PollStore for MemoryPollStore {
        async fn latest_published(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Question>, StoreError> {
            let inner = self.inner.lock().await;
            let mut questions: Vec<Question> = inner
                .questions
                .iter()
                .filter(|q| q.pub_date <= now)
                .cloned()
                .collect();
            questions.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
            questions.truncate(usize::try_from(limit).unwrap_or(0));
            Ok(questions)
        }

        async fn question(&self, id: i64) -> Result<Option<Question>, StoreError> {
            let inner = self.inner.lock().await;
            Ok(inner.questions.iter().find(|q| q.id == id).cloned())
        }

        async fn choices(&self, question_id: i64) -> Result<Vec<Choice>, StoreError> {
            let inner = self.inner.lock().await;
            Ok(inner
                .choices
                .iter()
                .filter(|c| c.question_id == question_id)
                .cloned()
                .collect())
        }

        async fn choice_for_question(&self, question_id: i64, choice_id: i64) -> Result<Option<Choice>, StoreError> {
            let inner = self.inner.lock().await;
            Ok(inner
                .choices
                .iter()
                .find(|c| c.id == choice_id && c.question_id == question_id)
                .cloned())
        }

        async fn user_vote(&self, user_id: i64, question_id: i64) -> Result<Option<CurrentVote>, StoreError> {
            let inner = self.inner.lock().await;
            let vote = inner.votes.iter().find_map(|v| {
                let choice = inner
                    .choices
                    .iter()
                    .find(|c| c.id == v.choice_id && c.question_id == question_id)?;
                (v.user_id == user_id).then(|| CurrentVote {
                    id: v.id,
                    choice_id: choice.id,
                    choice_text: choice.choice_text.clone(),
                })
            });
            Ok(vote)
        }

        async fn cast_vote(&self, user_id: i64, question_id: i64, choice_id: i64) -> Result<VoteOutcome, StoreError> {
            let mut inner = self.inner.lock().await;
            let existing = inner
                .votes
                .iter()
                .position(|v| v.user_id == user_id && inner.question_of(v.choice_id) == Some(question_id));

            let outcome = match existing {
                Some(index) if inner.votes[index].choice_id == choice_id => VoteOutcome::Unchanged,
                Some(index) => {
                    let previous_choice = inner.votes[index].choice_id;
                    inner.votes[index].choice_id = choice_id;
                    VoteOutcome::Changed { previous_choice }
                }
                None => {
                    let id = inner.next_id();
                    inner.votes.push(Vote { id, user_id, choice_id });
                    VoteOutcome::Created
                }
            };
            Ok(outcome)
        }

        async fn results(&self, question_id: i64) -> Result<Vec<ChoiceTally>, StoreError> {
            let inner = self.inner.lock().await;
            Ok(inner
                .choices
                .iter()
                .filter(|c| c.question_id == question_id)
                .map(|c| ChoiceTally {
                    id: c.id,
                    question_id: c.question_id,
                    choice_text: c.choice_text.clone(),
                    votes: inner.votes.iter().filter(|v| v.choice_id == c.id).count() as i64,
                })
                .collect())
        }

        async fn create_question(&self, new: &NewQuestion, now: DateTime<Utc>) -> Result<(Question, Vec<Choice>), StoreError> {
            let mut inner = self.inner.lock().await;
            let question = Question {
                id: inner.next_id(),
                question_text: new.question_text.clone(),
                pub_date: new.pub_date.unwrap_or(now),
                end_date: new.end_date,
            };
            inner.questions.push(question.clone());

            let mut choices = Vec::with_capacity(new.choices.len());
            for text in &new.choices {
                let choice = Choice {
                    id: inner.next_id(),
                    question_id: question.id,
                    choice_text: text.clone(),
                };
                inner.choices.push(choice.clone());
                choices.push(choice);
            }
            Ok((question, choices))
        }

        async fn add_choice(&self, question_id: i64, choice_text: &str) -> Result<Choice, StoreError> {
            let mut inner = self.inner.lock().await;
            if !inner.questions.iter().any(|q| q.id == question_id) {
                return Err(StoreError::UnknownQuestion(question_id));
            }
            let choice = Choice {
                id: inner.next_id(),
                question_id,
                choice_text: choice_text.to_string(),
            };
            inner.choices.push(choice.clone());
            Ok(choice)
        }

        async fn create_user(&self, username: &str, password: &str, is_staff: bool) -> Result<User, StoreError> {
            let mut inner = self.inner.lock().await;
            if inner.users.iter().any(|u| u.user.username == username) {
                return Err(StoreError::DuplicateUsername(username.to_string()));
            }
            let user = User {
                id: inner.next_id(),
                username: username.to_string(),
                is_staff,
            };
            inner.users.push(StoredUser {
                user: user.clone(),
                password: password.to_string(),
            });
            Ok(user)
        }

        async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>, StoreError> {
            let inner = self.inner.lock().await;
            Ok(inner
                .users
                .iter()
                .find(|u| u.user.username == username && u.password == password)
                .map(|u| u.user.clone()))
        }

        async fn create_session(&self, user_id: i64, expires_at: DateTime<Utc>) -> Result<Uuid, StoreError> {
            let token = Uuid::new_v4();
            self.inner
                .lock()
                .await
                .sessions
                .insert(token, (user_id, expires_at));
            Ok(token)
        }

        async fn session_user(&self, token: Uuid, now: DateTime<Utc>) -> Result<Option<User>, StoreError> {
            let inner = self.inner.lock().await;
            let Some(&(user_id, expires_at)) = inner.sessions.get(&token) else {
                return Ok(None);
            };
            if expires_at <= now {
                return Ok(None);
            }
            Ok(inner
                .users
                .iter()
                .find(|u| u.user.id == user_id)
                .map(|u| u.user.clone()))
        }

        async fn delete_session(&self, token: Uuid) -> Result<(), StoreError> {
            self.inner.lock().await.sessions.remove(&token);
            Ok(())
        }
    }

}
