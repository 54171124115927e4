use exam_portal::client::{AuthContext, ClientError, ExamClient};
use exam_portal::config::Settings;
use exam_portal::models::Role;
use exam_portal::{build_state, routes::build_router};
use reqwest::StatusCode;
use serde_json::{json, Value};

async fn spawn_server() -> (String, reqwest::Client) {
    let state = build_state(Settings::ephemeral()).expect("state");
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), reqwest::Client::new())
}

async fn create_question(base: &str, client: &reqwest::Client, body: Value) -> Value {
    let resp = client
        .post(format!("{}/api/questions/questions", base))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.json().await.unwrap()
}

fn mcq(text: &str, correct: &str, assigned: &[&str]) -> Value {
    json!({
        "questionText": text,
        "type": "mcq",
        "options": ["A", "B", "C"],
        "correctAnswer": correct,
        "assignedToEmails": assigned,
    })
}

#[tokio::test]
async fn health_responds() {
    let (base, client) = spawn_server().await;
    let resp = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn register_login_and_profile() {
    let (base, client) = spawn_server().await;

    let resp = client
        .post(format!("{}/api/auth/register", base))
        .json(&json!({"name": "Ada", "email": "ada@x.io", "password": "secret1", "role": "student"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let user: Value = resp.json().await.unwrap();
    assert_eq!(user["email"], "ada@x.io");
    assert!(user.get("password_hash").is_none());

    let dup = client
        .post(format!("{}/api/auth/register", base))
        .json(&json!({"name": "Ada", "email": "ada@x.io", "password": "secret1", "role": "student"}))
        .send()
        .await
        .unwrap();
    assert_eq!(dup.status(), StatusCode::CONFLICT);

    let bad = client
        .post(format!("{}/api/auth/register", base))
        .json(&json!({"name": "", "email": "nope", "password": "1", "role": "admin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    let body: Value = bad.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    let fields: Vec<&str> = body["error"]["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"email"));
    assert!(fields.contains(&"role"));

    let wrong = client
        .post(format!("{}/api/auth/login", base))
        .json(&json!({"email": "ada@x.io", "password": "wrong-pass"}))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let login: Value = client
        .post(format!("{}/api/auth/login", base))
        .json(&json!({"email": "ada@x.io", "password": "secret1"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(login["role"], "student");
    let token = login["token"].as_str().unwrap();

    let profile: Value = client
        .get(format!("{}/api/auth/profile", base))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(profile["email"], "ada@x.io");

    let missing = client.get(format!("{}/api/auth/profile", base)).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let forged = client
        .get(format!("{}/api/auth/profile", base))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn auth_context_enforces_expected_role() {
    let (base, _) = spawn_server().await;
    let api = ExamClient::new(&base).unwrap();
    api.register("Tom", "tom@x.io", "secret1", Role::Teacher).await.unwrap();

    let denied = AuthContext::login(&api, "tom@x.io", "secret1", Role::Student).await;
    assert!(matches!(denied, Err(ClientError::Auth(_))));

    let bad_password = AuthContext::login(&api, "tom@x.io", "secret2", Role::Teacher).await;
    assert!(matches!(bad_password, Err(ClientError::Auth(_))));

    let ctx = AuthContext::login(&api, "tom@x.io", "secret1", Role::Teacher).await.unwrap();
    assert_eq!(ctx.email(), "tom@x.io");
    assert_eq!(ctx.role(), Role::Teacher);
    assert!(!ctx.token().is_empty());
    ctx.logout(None);
}

#[tokio::test]
async fn question_crud_and_assignment_filter() {
    let (base, client) = spawn_server().await;

    let q1 = create_question(&base, &client, mcq("2+2?", "A", &["s@x.io", " s@x.io "])).await;
    let q2 = create_question(
        &base,
        &client,
        json!({"questionText": "Sky is blue", "type": "boolean", "correctAnswer": "True", "assignedToEmails": ["other@x.io"]}),
    )
    .await;
    assert_eq!(q1["assignedToEmails"], json!(["s@x.io"]));
    assert_eq!(q2["options"], json!(["True", "False"]));
    assert_eq!(q2["difficulty"], "Medium");

    let all: Vec<Value> = client
        .get(format!("{}/api/questions/getquestions", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let mine: Vec<Value> = client
        .get(format!("{}/api/questions/getquestions?email=s@x.io", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["_id"], q1["_id"]);

    let id = q1["_id"].as_str().unwrap();
    let fetched: Value = client
        .get(format!("{}/api/questions/getquestions/{}", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["questionText"], "2+2?");

    let updated: Value = client
        .put(format!("{}/api/questions/getupdate/{}", base, id))
        .json(&mcq("2+3?", "B", &["s@x.io"]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["correctAnswer"], "B");
    assert_eq!(updated["_id"], q1["_id"]);
    assert_eq!(updated["createdAt"], q1["createdAt"]);

    let invalid = client
        .post(format!("{}/api/questions/questions", base))
        .json(&mcq("bad", "Z", &[]))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    let deleted = client
        .delete(format!("{}/api/questions/delete/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);
    let again = client
        .delete(format!("{}/api/questions/delete/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
    let gone = client
        .get(format!("{}/api/questions/getquestions/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bulk_create_is_all_or_nothing() {
    let (base, client) = spawn_server().await;

    let rejected = client
        .post(format!("{}/api/questions/bulk-create", base))
        .json(&json!({"questions": [mcq("ok", "A", &[]), mcq("broken", "Q", &[])]}))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    let body: Value = rejected.json().await.unwrap();
    assert!(body["error"]["details"][0]["field"]
        .as_str()
        .unwrap()
        .starts_with("questions[1]"));

    let not_array = client
        .post(format!("{}/api/questions/bulk-create", base))
        .json(&json!({"questions": "nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(not_array.status(), StatusCode::BAD_REQUEST);

    let none: Vec<Value> = client
        .get(format!("{}/api/questions/getquestions", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(none.is_empty());

    let created = client
        .post(format!("{}/api/questions/bulk-create", base))
        .json(&json!({"questions": [mcq("one", "A", &[]), mcq("two", "C", &[])]}))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let body: Value = created.json().await.unwrap();
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn submit_rejects_malformed_payloads() {
    let (base, client) = spawn_server().await;
    let cases = [
        json!({"answers": [{"questionId": "q1", "answer": "A"}]}),
        json!({"studentEmail": "  ", "answers": [{"questionId": "q1", "answer": "A"}]}),
        json!({"studentEmail": "s@x.io", "answers": []}),
        json!({"studentEmail": "s@x.io", "answers": "A"}),
        json!({"studentEmail": "s@x.io", "answers": [{"answer": "A"}]}),
    ];
    for case in cases {
        let resp = client
            .post(format!("{}/api/submission/submit", base))
            .json(&case)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "payload {case}");
    }

    let garbage = client
        .post(format!("{}/api/submission/submit", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);

    let all: Vec<Value> = client
        .get(format!("{}/api/submission/getAll", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(all.is_empty());
}

#[tokio::test]
async fn submissions_survive_question_deletion_and_are_scored() {
    let (base, client) = spawn_server().await;
    let q1 = create_question(&base, &client, mcq("one", "A", &["s@x.io"])).await;
    let q2 = create_question(&base, &client, mcq("two", "B", &["s@x.io"])).await;
    let q1_id = q1["_id"].as_str().unwrap();
    let q2_id = q2["_id"].as_str().unwrap();

    let receipt: Value = client
        .post(format!("{}/api/submission/submit", base))
        .json(&json!({
            "studentEmail": "s@x.io",
            "answers": [
                {"questionId": q1_id, "answer": "A"},
                {"questionId": q2_id, "answer": "C"},
                {"questionId": "missing", "answer": 7},
            ],
            "snapshots": [{"image": "data:image/jpeg;base64,AA==", "timestamp": "2024-01-01T00:00:00Z"}],
            "submittedAt": "1999-01-01T00:00:00Z",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(receipt["message"], "Submission successful");
    let sub_id = receipt["id"].as_str().unwrap().to_string();

    let stored: Value = client
        .get(format!("{}/api/submission/submission/s@x.io", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stored["_id"], sub_id);
    assert_eq!(stored["answers"][2]["answer"], "");
    assert_ne!(stored["submittedAt"], "1999-01-01T00:00:00Z");

    let unknown = client
        .get(format!("{}/api/submission/submission/nobody@x.io", base))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    client
        .delete(format!("{}/api/questions/delete/{}", base, q1_id))
        .send()
        .await
        .unwrap();

    let all: Vec<Value> = client
        .get(format!("{}/api/submission/getAll", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0]["answers"][0]["question"].is_null());
    assert_eq!(all[0]["answers"][1]["question"]["correctAnswer"], "B");

    let report: Value = client
        .get(format!("{}/api/submission/monitoring", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let student = &report[0];
    assert_eq!(student["studentEmail"], "s@x.io");
    assert_eq!(student["submissionCount"], 1);
    let score = &student["submissions"][0]["score"];
    assert_eq!(score["correct"], 0);
    assert_eq!(score["wrong"], 3);
    assert_eq!(score["total"], 3);
    assert_eq!(score["negativeMarks"], 1);
    assert_eq!(score["score"], 0);
    assert_eq!(student["submissions"][0]["answers"][1]["isCorrect"], false);

    let api = ExamClient::new(&base).unwrap();
    api.delete_submission(&sub_id).await.unwrap();
    let again = api.delete_submission(&sub_id).await;
    assert!(matches!(again, Err(ClientError::Status { status, .. }) if status == StatusCode::NOT_FOUND));
    assert!(api.all_submissions().await.unwrap().is_empty());
}
