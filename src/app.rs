//! 路由装配：公开接口、受保护接口与公共中间件。

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::credentials::CredentialStore;
use crate::files::FileService;
use crate::http::{add_security_headers, forwarded_client_ip};
use crate::session::SessionRegistry;
use crate::{auth, files};

/// 各处理器通过 `Extension` 共享的服务实例。
#[derive(Clone)]
pub struct AppServices {
    pub credentials: Arc<CredentialStore>,
    pub sessions: Arc<SessionRegistry>,
    pub files: Arc<FileService>,
}

pub fn build_router(services: AppServices, upload_max_size: usize) -> Router {
    let protected = Router::new()
        .route(
            "/api/upload",
            post(files::upload_file).layer(DefaultBodyLimit::max(upload_max_size)),
        )
        .route("/api/files", get(files::list_files))
        .route("/api/preview", get(files::preview_file))
        .route("/api/download/{id}", get(files::download_file))
        .route_layer(middleware::from_fn(auth::require_bearer));

    Router::new()
        .route("/api/register", post(auth::register))
        .route("/api/login", post(auth::login))
        .merge(protected)
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip().to_string());
                    let client_ip = forwarded_client_ip(request.headers())
                        .or(connect_ip)
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(services.credentials))
        .layer(Extension(services.sessions))
        .layer(Extension(services.files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use axum::http::{HeaderMap, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::db::Database;
    use crate::records::FileRecordStore;
    use crate::storage::Storage;

    const BOUNDARY: &str = "filekeep-test-boundary";

    struct TestApp {
        _temp: TempDir,
        router: Router,
    }

    struct TestResponse {
        status: StatusCode,
        headers: HeaderMap,
        body: Vec<u8>,
    }

    impl TestResponse {
        fn json(&self) -> Value {
            serde_json::from_slice(&self.body).expect("json body")
        }
    }

    async fn test_app(upload_max_size: usize) -> TestApp {
        let temp = TempDir::new().expect("tempdir");
        let storage = Arc::new(
            Storage::open(temp.path().join("userfiles"))
                .await
                .expect("open storage"),
        );
        let db = Arc::new(Database::open(&temp.path().join("files.db")).expect("open db"));
        let credentials = Arc::new(CredentialStore::new(db.clone(), storage.clone()));
        let records = Arc::new(FileRecordStore::new(db));
        let services = AppServices {
            credentials: credentials.clone(),
            sessions: Arc::new(SessionRegistry::new(
                "test-secret",
                Duration::from_secs(3600),
                1000,
            )),
            files: Arc::new(FileService::new(credentials, records, storage)),
        };
        TestApp {
            _temp: temp,
            router: build_router(services, upload_max_size),
        }
    }

    impl TestApp {
        async fn send(&self, request: Request<AxumBody>) -> TestResponse {
            let response = self
                .router
                .clone()
                .oneshot(request)
                .await
                .expect("router is infallible");
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .into_body()
                .collect()
                .await
                .expect("collect body")
                .to_bytes()
                .to_vec();
            TestResponse {
                status,
                headers,
                body,
            }
        }

        async fn post_json(&self, uri: &str, body: Value) -> TestResponse {
            self.send(
                Request::post(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(AxumBody::from(body.to_string()))
                    .expect("request"),
            )
            .await
        }

        async fn register_and_login(&self, username: &str, password: &str) -> String {
            let credentials = json!({ "username": username, "password": password });
            let registered = self.post_json("/api/register", credentials.clone()).await;
            assert_eq!(registered.status, StatusCode::CREATED);
            let login = self.post_json("/api/login", credentials).await;
            assert_eq!(login.status, StatusCode::OK);
            login.json()["token"]
                .as_str()
                .expect("token string")
                .to_string()
        }

        async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
            let mut builder = Request::get(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            self.send(builder.body(AxumBody::empty()).expect("request"))
                .await
        }

        async fn upload(&self, token: &str, filename: &str, content: &str) -> TestResponse {
            let body = format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
                 Content-Type: text/plain\r\n\r\n\
                 {content}\r\n\
                 --{BOUNDARY}--\r\n"
            );
            self.send(
                Request::post("/api/upload")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={BOUNDARY}"),
                    )
                    .body(AxumBody::from(body))
                    .expect("request"),
            )
            .await
        }
    }

    #[tokio::test]
    async fn register_login_upload_list_preview_flow() {
        let app = test_app(1024 * 1024).await;

        let registered = app
            .post_json("/api/register", json!({ "username": "alice", "password": "pw1" }))
            .await;
        assert_eq!(registered.status, StatusCode::CREATED);
        assert_eq!(registered.json(), json!({ "status": "created" }));

        let login = app
            .post_json("/api/login", json!({ "username": "alice", "password": "pw1" }))
            .await;
        assert_eq!(login.status, StatusCode::OK);
        let token = login.json()["token"].as_str().expect("token").to_string();

        let uploaded = app.upload(&token, "notes.txt", "a\nb\nc\n").await;
        assert_eq!(uploaded.status, StatusCode::CREATED);
        assert_eq!(uploaded.json(), json!({ "status": "uploaded" }));

        let listed = app.get("/api/files", Some(&token)).await;
        assert_eq!(listed.status, StatusCode::OK);
        let entries = listed.json();
        let entries = entries.as_array().expect("array");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["filename"], "notes.txt");
        let file_id = entries[0]["id"].as_i64().expect("numeric id");

        let preview = app
            .get(&format!("/api/preview?file_id={file_id}"), Some(&token))
            .await;
        assert_eq!(preview.status, StatusCode::OK);
        assert_eq!(preview.body, b"a\nb\nc\n");
        assert_eq!(
            preview.headers.get(header::X_CONTENT_TYPE_OPTIONS).map(|v| v.as_bytes()),
            Some(&b"nosniff"[..])
        );

        let wrong = app
            .post_json("/api/login", json!({ "username": "alice", "password": "wrong" }))
            .await;
        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_routes_reject_bad_authorization() {
        let app = test_app(1024 * 1024).await;

        let missing = app.get("/api/files", None).await;
        assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
        assert_eq!(missing.body, b"authorization required");

        let malformed = app
            .send(
                Request::get("/api/files")
                    .header(header::AUTHORIZATION, "Basic YWxpY2U6cHcx")
                    .body(AxumBody::empty())
                    .expect("request"),
            )
            .await;
        assert_eq!(malformed.status, StatusCode::UNAUTHORIZED);
        assert_eq!(malformed.body, b"invalid authorization format");

        for value in ["Bearer ", "Bearer  tok"] {
            let blank = app
                .send(
                    Request::get("/api/files")
                        .header(header::AUTHORIZATION, value)
                        .body(AxumBody::empty())
                        .expect("request"),
                )
                .await;
            assert_eq!(blank.status, StatusCode::UNAUTHORIZED, "{value:?}");
            assert_eq!(blank.body, b"invalid authorization format", "{value:?}");
        }

        let invalid = app.get("/api/files", Some("not-a-real-token")).await;
        assert_eq!(invalid.status, StatusCode::UNAUTHORIZED);
        assert_eq!(invalid.body, b"invalid or expired session");
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_bad_bodies() {
        let app = test_app(1024 * 1024).await;
        app.register_and_login("alice", "pw1").await;

        let duplicate = app
            .post_json("/api/register", json!({ "username": "alice", "password": "x" }))
            .await;
        assert_eq!(duplicate.status, StatusCode::CONFLICT);

        let malformed = app
            .send(
                Request::post("/api/register")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(AxumBody::from("{not json"))
                    .expect("request"),
            )
            .await;
        assert_eq!(malformed.status, StatusCode::BAD_REQUEST);

        let missing_field = app
            .post_json("/api/register", json!({ "username": "bob" }))
            .await;
        assert_eq!(missing_field.status, StatusCode::BAD_REQUEST);

        let traversal = app
            .post_json("/api/register", json!({ "username": "../x", "password": "pw" }))
            .await;
        assert_eq!(traversal.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn files_are_isolated_between_users() {
        let app = test_app(1024 * 1024).await;
        let alice = app.register_and_login("alice", "pw1").await;
        let bob = app.register_and_login("bob", "pw2").await;

        assert_eq!(
            app.upload(&alice, "secret.txt", "top secret").await.status,
            StatusCode::CREATED
        );
        let listed = app.get("/api/files", Some(&alice)).await.json();
        let file_id = listed[0]["id"].as_i64().expect("id");

        let bob_list = app.get("/api/files", Some(&bob)).await;
        assert_eq!(bob_list.json(), json!([]));

        let preview = app
            .get(&format!("/api/preview?file_id={file_id}"), Some(&bob))
            .await;
        assert_eq!(preview.status, StatusCode::NOT_FOUND);
        let download = app
            .get(&format!("/api/download/{file_id}"), Some(&bob))
            .await;
        assert_eq!(download.status, StatusCode::NOT_FOUND);

        let missing = app
            .get(&format!("/api/download/{}", file_id + 1000), Some(&alice))
            .await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert_eq!(missing.body, download.body);
    }

    #[tokio::test]
    async fn download_streams_content_with_original_name() {
        let app = test_app(1024 * 1024).await;
        let token = app.register_and_login("alice", "pw1").await;
        app.upload(&token, "report.txt", "first").await;
        app.upload(&token, "report.txt", "second").await;

        let listed = app.get("/api/files", Some(&token)).await.json();
        let entries = listed.as_array().expect("array");
        assert_eq!(entries.len(), 2);
        assert_ne!(entries[0]["id"], entries[1]["id"]);

        for entry in entries {
            let id = entry["id"].as_i64().expect("id");
            let download = app.get(&format!("/api/download/{id}"), Some(&token)).await;
            assert_eq!(download.status, StatusCode::OK);
            assert_eq!(
                download.headers.get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
                Some(&b"application/octet-stream"[..])
            );
            assert_eq!(
                download
                    .headers
                    .get(header::CONTENT_DISPOSITION)
                    .map(|v| v.as_bytes()),
                Some(&b"attachment; filename=\"report.txt\""[..])
            );
            assert_eq!(download.body, b"second");
        }
    }

    #[tokio::test]
    async fn malformed_file_ids_are_bad_requests() {
        let app = test_app(1024 * 1024).await;
        let token = app.register_and_login("alice", "pw1").await;

        for uri in ["/api/preview", "/api/preview?file_id=", "/api/preview?file_id=abc"] {
            assert_eq!(
                app.get(uri, Some(&token)).await.status,
                StatusCode::BAD_REQUEST,
                "{uri}"
            );
        }
        assert_eq!(
            app.get("/api/download/abc", Some(&token)).await.status,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn upload_rejects_traversal_and_missing_file() {
        let app = test_app(1024 * 1024).await;
        let token = app.register_and_login("alice", "pw1").await;

        let traversal = app.upload(&token, "../../etc/passwd", "root:x").await;
        assert_eq!(traversal.status, StatusCode::BAD_REQUEST);
        assert_eq!(app.get("/api/files", Some(&token)).await.json(), json!([]));

        let no_file = app
            .send(
                Request::post("/api/upload")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={BOUNDARY}"),
                    )
                    .body(AxumBody::from(format!(
                        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nx\r\n--{BOUNDARY}--\r\n"
                    )))
                    .expect("request"),
            )
            .await;
        assert_eq!(no_file.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let app = test_app(64).await;
        let token = app.register_and_login("alice", "pw1").await;
        let content = "x".repeat(1024);

        let response = app.upload(&token, "big.txt", &content).await;
        assert!(response.status.is_client_error(), "{}", response.status);
        assert_eq!(app.get("/api/files", Some(&token)).await.json(), json!([]));
    }
}
