use axum::{
    body::Body,
    http::{Request, StatusCode},
    routing::post,
    Extension, Json, Router,
};
use std::sync::Arc;
use tellme_db::{DbRuntimeSettings, Model, Storage, StorageLocation, TableDef};
use tellme_server::{app, ApiError, AppState, Lifespan, RouteSet};
use tower::ServiceExt;

struct Note;

impl Model for Note {
    const TABLE: TableDef = TableDef::new("note", "id INTEGER PRIMARY KEY, body TEXT NOT NULL");
}

async fn create_note(
    Extension(state): Extension<Arc<AppState>>,
    body: String,
) -> Result<StatusCode, ApiError> {
    if body.trim().is_empty() {
        return Err(ApiError::BadRequest("note body is empty".into()));
    }
    state
        .run_session(move |s| {
            s.begin()?;
            s.execute("INSERT INTO note (body) VALUES (?1)", [&body])?;
            s.commit()?;
            Ok(())
        })
        .await?;
    Ok(StatusCode::CREATED)
}

async fn abandon_note(Extension(state): Extension<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state
        .run_session(|s| {
            s.begin()?;
            s.execute("INSERT INTO note (body) VALUES ('orphan')", [])?;
            Err(ApiError::Conflict("refusing to commit".into()))
        })
        .await
}

async fn list_notes(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<String>>, ApiError> {
    let notes = state
        .run_session(|s| {
            let mut stmt = s.prepare("SELECT body FROM note ORDER BY id")?;
            let notes = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(notes)
        })
        .await?;
    Ok(Json(notes))
}

fn notes_routes() -> RouteSet {
    RouteSet::new().model::<Note>().router(
        Router::new()
            .route("/api/notes", post(create_note).get(list_notes))
            .route("/api/notes/abandon", post(abandon_note)),
    )
}

async fn setup() -> (tempfile::TempDir, AppState, Router) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(
        StorageLocation::new(dir.path().join("routes.db")),
        DbRuntimeSettings::default(),
    )
    .unwrap();
    let state = AppState::new(storage);

    let (api, metadata) = notes_routes().into_parts();
    let _running = Lifespan::new(metadata).startup(&state).await.unwrap();

    let router = app(state.clone(), api);
    (dir, state, router)
}

async fn post_note(app: &Router, uri: &str, body: &str) -> StatusCode {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

async fn list(app: &Router) -> Vec<String> {
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/notes").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn mounted_routes_share_storage_through_sessions() {
    let (_dir, state, app) = setup().await;

    assert_eq!(post_note(&app, "/api/notes", "first").await, StatusCode::CREATED);
    assert_eq!(post_note(&app, "/api/notes", "second").await, StatusCode::CREATED);

    assert_eq!(list(&app).await, vec!["first".to_string(), "second".to_string()]);

    let counts = state.storage.session_counts();
    assert_eq!(counts.opened, 3, "one session per request");
    assert_eq!(counts.active(), 0, "every request released its session");
}

#[tokio::test]
async fn abandoned_work_is_rolled_back_on_release() {
    let (_dir, state, app) = setup().await;

    assert_eq!(
        post_note(&app, "/api/notes/abandon", "").await,
        StatusCode::CONFLICT
    );
    assert!(list(&app).await.is_empty());
    assert_eq!(state.storage.session_counts().active(), 0);
}

#[tokio::test]
async fn handler_errors_keep_their_status() {
    let (_dir, state, app) = setup().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/notes")
                .body(Body::from("   "))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "note body is empty");
    assert_eq!(
        state.storage.session_counts().opened,
        0,
        "rejected input never reaches storage"
    );
}

#[tokio::test]
async fn storage_failures_surface_as_internal_errors() {
    let (_dir, state, app) = setup().await;
    state
        .storage
        .with_session(|s| s.execute_batch("DROP TABLE note").map_err(tellme_db::DbError::from))
        .unwrap();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/notes").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(state.storage.session_counts().active(), 0);
}

#[tokio::test]
async fn session_work_runs_off_the_request_thread() {
    let (_dir, state, _app) = setup().await;
    let request_thread = std::thread::current().id();

    let session_thread = state
        .run_session(|s| {
            s.execute("INSERT INTO note (body) VALUES ('threaded')", [])?;
            Ok(std::thread::current().id())
        })
        .await
        .expect("session work should succeed");

    assert_ne!(session_thread, request_thread);
    assert_eq!(state.storage.session_counts().active(), 0);
}

#[tokio::test]
async fn panicking_session_work_is_released_and_reported() {
    let (_dir, state, _app) = setup().await;

    let err = state
        .run_session(|s| -> Result<(), ApiError> {
            s.begin()?;
            s.execute("INSERT INTO note (body) VALUES ('half done')", [])?;
            panic!("handler blew up");
        })
        .await
        .expect_err("a panic should surface as an error");

    assert!(matches!(err, ApiError::InternalServerError(_)));
    let counts = state.storage.session_counts();
    assert_eq!(counts.opened, 1);
    assert_eq!(counts.active(), 0);
}

#[test]
fn included_route_sets_collect_their_tables() {
    struct Audit;
    impl Model for Audit {
        const TABLE: TableDef = TableDef::new("audit", "id INTEGER PRIMARY KEY");
    }

    let routes = notes_routes().include(RouteSet::new().model::<Audit>());
    let names: Vec<&str> = routes.metadata().tables().iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["note", "audit"]);
}
