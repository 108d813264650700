use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, Response, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use polls_backend::{
    config::Config,
    models::{Choice, NewQuestion, Question, User},
    routes::create_routes,
    state::AppState,
    store::{MemoryPollStore, PollStore},
};
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestApp {
    store: Arc<MemoryPollStore>,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let config = Config::from_lookup(|key| {
            (key == "DATABASE_URL").then(|| "postgres://localhost/unused".to_string())
        })
        .unwrap();
        let store = Arc::new(MemoryPollStore::new());
        let router = create_routes(AppState::new(config, store.clone()));
        Self { store, router }
    }

    async fn question(
        &self,
        text: &str,
        days: i64,
        end_in: Option<Duration>,
        choices: &[&str],
    ) -> (Question, Vec<Choice>) {
        let now = Utc::now();
        let new = NewQuestion {
            question_text: text.to_string(),
            pub_date: Some(now + Duration::days(days)),
            end_date: end_in.map(|d| now + d),
            choices: choices.iter().map(|c| c.to_string()).collect(),
        };
        self.store.create_question(&new, now).await.unwrap()
    }

    /// Creates a user with a live session and returns the `Cookie` header for it.
    async fn login(&self, username: &str, is_staff: bool) -> (User, String) {
        let user = self.store.create_user(username, "1234", is_staff).await.unwrap();
        let token = self
            .store
            .create_session(user.id, Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        (user, format!("sessionid={token}"))
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::get(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn post_form(&self, uri: &str, form: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(form.to_string())).unwrap()).await
    }

    async fn post_json(&self, uri: &str, body: Value, cookie: &str) -> Response<Body> {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::COOKIE, cookie)
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn location(response: &Response<Body>) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}

fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn listed_texts(body: &Value) -> Vec<String> {
    body["latest_question_list"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["question_text"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn root_redirects_to_question_list() {
    let app = TestApp::new();
    let response = app.get("/", None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/polls/");
}

#[tokio::test]
async fn index_without_questions_shows_notice() {
    let app = TestApp::new();
    let response = app.get("/polls/", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["notice"], "No polls are available.");
    assert_eq!(body["latest_question_list"], json!([]));
}

#[tokio::test]
async fn index_lists_past_questions_only() {
    let app = TestApp::new();
    app.question("Past question.", -30, None, &[]).await;
    app.question("Future question.", 30, None, &[]).await;

    let body = body_json(app.get("/polls/", None).await).await;
    assert_eq!(listed_texts(&body), vec!["Past question."]);
    assert!(body.get("notice").is_none());
}

#[tokio::test]
async fn index_is_newest_first_and_capped_at_five() {
    let app = TestApp::new();
    for days in 1..=7 {
        app.question(&format!("Asked {days} days ago"), -days, None, &[]).await;
    }

    let body = body_json(app.get("/polls/", None).await).await;
    assert_eq!(
        listed_texts(&body),
        (1..=5).map(|d| format!("Asked {d} days ago")).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn detail_requires_login() {
    let app = TestApp::new();
    let (question, _) = app.question("Past question.", -5, None, &[]).await;

    let response = app.get(&format!("/polls/{}/", question.id), None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        format!("/accounts/login/?next=%2Fpolls%2F{}%2F", question.id)
    );
}

#[tokio::test]
async fn detail_of_future_question_redirects_with_flash() {
    let app = TestApp::new();
    let (_, cookie) = app.login("test", false).await;
    let (question, _) = app.question("Future question.", 5, None, &[]).await;

    let response = app.get(&format!("/polls/{}/", question.id), Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/polls/");
    assert!(set_cookies(&response)[0].starts_with("flash=voting_closed"));

    let index = app.get("/polls/", Some("flash=voting_closed")).await;
    assert!(set_cookies(&index)[0].contains("Max-Age=0"));
    let body = body_json(index).await;
    assert_eq!(body["messages"], json!(["Voting is not allowed at this time."]));
}

#[tokio::test]
async fn detail_of_missing_question_redirects_with_flash() {
    let app = TestApp::new();
    let (_, cookie) = app.login("test", false).await;

    let response = app.get("/polls/999/", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(set_cookies(&response)[0].starts_with("flash=question_missing"));
}

#[tokio::test]
async fn detail_of_closed_question_redirects() {
    let app = TestApp::new();
    let (_, cookie) = app.login("test", false).await;
    let (question, _) = app.question("Closed.", -2, Some(-Duration::days(1)), &["A"]).await;

    let response = app.get(&format!("/polls/{}/", question.id), Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/polls/");
}

#[tokio::test]
async fn detail_shows_question_and_current_vote() {
    let app = TestApp::new();
    let (user, cookie) = app.login("test", false).await;
    let (question, choices) = app.question("Past Question.", -5, None, &["Red", "Blue"]).await;
    app.store.cast_vote(user.id, question.id, choices[1].id).await.unwrap();

    let response = app.get(&format!("/polls/{}/", question.id), Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["question"]["question_text"], "Past Question.");
    assert_eq!(body["choices"].as_array().unwrap().len(), 2);
    assert_eq!(body["voted"], "Blue");
}

#[tokio::test]
async fn vote_requires_login() {
    let app = TestApp::new();
    let (question, _) = app.question("Test Question?", 0, None, &[]).await;

    let response = app.get(&format!("/polls/{}/vote/", question.id), None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).starts_with("/accounts/login/"));
}

#[tokio::test]
async fn vote_without_choice_rerenders_detail_with_error() {
    let app = TestApp::new();
    let (_, cookie) = app.login("test", false).await;
    let (question, _) = app.question("Test Question?", 0, None, &["Yes"]).await;

    let response = app.get(&format!("/polls/{}/vote/", question.id), Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["error_message"], "You didn't select a choice.");
}

#[tokio::test]
async fn vote_with_unreadable_body_rerenders_detail_with_error() {
    let app = TestApp::new();
    let (user, cookie) = app.login("test", false).await;
    let (question, _) = app.question("Test Question?", 0, None, &["Yes"]).await;

    let request = Request::post(format!("/polls/{}/vote/", question.id))
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["error_message"], "You didn't select a choice.");
    assert_eq!(body["voted"], Value::Null);
    assert_eq!(app.store.vote_rows(user.id, question.id).await, 0);
}

#[tokio::test]
async fn login_round_trip_keeps_query_with_ampersand() {
    let app = TestApp::new();
    let (question, _) = app.question("Open?", -1, None, &["Yes"]).await;
    let original = format!("/polls/{}/vote/?choice=2&x=1", question.id);

    let response = app.get(&original, None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let login_page = location(&response).to_string();
    assert!(login_page.starts_with("/accounts/login/?next="));

    let body = body_json(app.get(&login_page, None).await).await;
    assert_eq!(body["next"], original);
}

#[tokio::test]
async fn vote_for_choice_of_another_question_is_rejected() {
    let app = TestApp::new();
    let (user, cookie) = app.login("test", false).await;
    let (question, _) = app.question("First?", -1, None, &["Yes"]).await;
    let (_, other_choices) = app.question("Second?", -1, None, &["No"]).await;

    let uri = format!("/polls/{}/vote/", question.id);
    let response = app
        .post_form(&uri, &format!("choice={}", other_choices[0].id), Some(&cookie))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["error_message"], "You didn't select a choice.");

    let response = app.post_form(&uri, "choice=banana", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.store.vote_rows(user.id, question.id).await, 0);
}

#[tokio::test]
async fn revote_replaces_earlier_vote() {
    let app = TestApp::new();
    let (user, cookie) = app.login("test", false).await;
    let (question, choices) = app.question("Tea or coffee?", -1, None, &["Tea", "Coffee"]).await;
    let uri = format!("/polls/{}/vote/", question.id);

    let response = app.post_form(&uri, &format!("choice={}", choices[0].id), Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), format!("/polls/{}/results/", question.id));

    app.post_form(&uri, &format!("choice={}", choices[1].id), Some(&cookie)).await;
    assert_eq!(app.store.vote_rows(user.id, question.id).await, 1);

    let body = body_json(app.get(&format!("/polls/{}/results/", question.id), None).await).await;
    assert_eq!(body["total_votes"], 1);
    assert_eq!(body["choices"][0]["votes"], 0);
    assert_eq!(body["choices"][1]["votes"], 1);
}

#[tokio::test]
async fn results_count_every_voter() {
    let app = TestApp::new();
    let (question, choices) = app.question("Best day?", -1, None, &["Mon", "Fri"]).await;
    for name in ["a", "b", "c"] {
        let (_, cookie) = app.login(name, false).await;
        app.post_form(
            &format!("/polls/{}/vote/", question.id),
            &format!("choice={}", choices[1].id),
            Some(&cookie),
        )
        .await;
    }

    let body = body_json(app.get(&format!("/polls/{}/results/", question.id), None).await).await;
    assert_eq!(body["total_votes"], 3);
    assert_eq!(body["choices"][1]["choice_text"], "Fri");
    assert_eq!(body["choices"][1]["votes"], 3);
}

#[tokio::test]
async fn vote_on_missing_question_is_not_found() {
    let app = TestApp::new();
    let (_, cookie) = app.login("test", false).await;
    let response = app.post_form("/polls/42/vote/", "choice=1", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn vote_after_end_date_is_refused() {
    let app = TestApp::new();
    let (user, cookie) = app.login("test", false).await;
    let (question, choices) = app.question("Over?", -3, Some(-Duration::hours(1)), &["Yes"]).await;

    let response = app
        .post_form(
            &format!("/polls/{}/vote/", question.id),
            &format!("choice={}", choices[0].id),
            Some(&cookie),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/polls/");
    assert_eq!(app.store.vote_rows(user.id, question.id).await, 0);
}

#[tokio::test]
async fn results_of_unpublished_question_are_hidden() {
    let app = TestApp::new();
    let (question, _) = app.question("Not yet.", 3, None, &["A"]).await;
    let response = app.get(&format!("/polls/{}/results/", question.id), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn login_sets_session_cookie_and_follows_next() {
    let app = TestApp::new();
    app.store.create_user("ann", "secret", false).await.unwrap();

    let rejected = app.post_form("/accounts/login/", "username=ann&password=wrong", None).await;
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_form("/accounts/login/", "username=ann&password=secret&next=/polls/", None)
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/polls/");
    let cookie = set_cookies(&response)[0].split(';').next().unwrap().to_string();
    assert!(cookie.starts_with("sessionid="));

    let (question, _) = app.question("Open?", -1, None, &["Yes"]).await;
    let detail = app.get(&format!("/polls/{}/", question.id), Some(&cookie)).await;
    assert_eq!(detail.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_page_ignores_offsite_next() {
    let app = TestApp::new();
    let body = body_json(app.get("/accounts/login/?next=//evil.example", None).await).await;
    assert_eq!(body["next"], "/polls/");
}

#[tokio::test]
async fn signup_logs_in_and_rejects_taken_username() {
    let app = TestApp::new();
    let response = app.post_form("/accounts/signup/", "username=zoe&password=pw", None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(set_cookies(&response)[0].starts_with("sessionid="));

    let again = app.post_form("/accounts/signup/", "username=zoe&password=pw", None).await;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let blank = app.post_form("/accounts/signup/", "username=&password=pw", None).await;
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signup_and_login_agree_on_surrounding_spaces() {
    let app = TestApp::new();
    let signup = app.post_form("/accounts/signup/", "username=+bob+&password=pw", None).await;
    assert_eq!(signup.status(), StatusCode::FOUND);

    let login = app.post_form("/accounts/login/", "username=+bob+&password=pw", None).await;
    assert_eq!(login.status(), StatusCode::FOUND);
    let plain = app.post_form("/accounts/login/", "username=bob&password=pw", None).await;
    assert_eq!(plain.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let app = TestApp::new();
    let (_, cookie) = app.login("test", false).await;
    let (question, _) = app.question("Open?", -1, None, &["Yes"]).await;

    let response = app.post_form("/accounts/logout/", "", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(set_cookies(&response)[0].contains("Max-Age=0"));

    let detail = app.get(&format!("/polls/{}/", question.id), Some(&cookie)).await;
    assert_eq!(detail.status(), StatusCode::FOUND);
    assert!(location(&detail).starts_with("/accounts/login/"));
}

#[tokio::test]
async fn admin_routes_require_staff() {
    let app = TestApp::new();
    let (_, member) = app.login("member", false).await;
    let (_, staff) = app.login("admin", true).await;
    let payload = json!({ "question_text": "Lunch?", "choices": ["Pizza", "Soup"] });

    let forbidden = app.post_json("/admin/questions/", payload.clone(), &member).await;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let created = app.post_json("/admin/questions/", payload, &staff).await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = body_json(created).await;
    assert_eq!(body["choices"].as_array().unwrap().len(), 2);
    let question_id = body["question"]["id"].as_i64().unwrap();

    let choice = app
        .post_json(
            &format!("/admin/questions/{question_id}/choices/"),
            json!({ "choice_text": "Salad" }),
            &staff,
        )
        .await;
    assert_eq!(choice.status(), StatusCode::CREATED);
    assert_eq!(app.store.choices(question_id).await.unwrap().len(), 3);

    let missing = app
        .post_json("/admin/questions/999/choices/", json!({ "choice_text": "Salad" }), &staff)
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let invalid = app
        .post_json("/admin/questions/", json!({ "question_text": "" }), &staff)
        .await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    let already_closed = app
        .post_json(
            "/admin/questions/",
            json!({ "question_text": "Too late?", "end_date": Utc::now() - Duration::hours(1) }),
            &staff,
        )
        .await;
    assert_eq!(already_closed.status(), StatusCode::BAD_REQUEST);

    let listed = body_json(app.get("/polls/", None).await).await;
    assert_eq!(listed_texts(&listed), vec!["Lunch?"]);
}
