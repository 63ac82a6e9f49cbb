use std::{net::SocketAddr, sync::Arc};

use axum::{middleware, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::{auth, cors, error::AppError, expense, forms, income, receipts, state::AppState};

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn no_route() -> AppError {
    AppError::NotFound("Route")
}

pub fn build_app(state: AppState) -> anyhow::Result<Router> {
    let cors_cfg = &state.config.cors;
    let cors = cors::layer(cors_cfg)?;
    let origins = Arc::new(cors_cfg.allow_origins.clone());
    let max_receipt = state.config.receipt_max_bytes;

    Ok(Router::new()
        .merge(auth::router())
        .merge(income::router())
        .merge(expense::router())
        .merge(receipts::router(max_receipt))
        .merge(forms::router())
        .route("/health", get(health))
        .fallback(no_route)
        .with_state(state)
        .layer(cors)
        .layer(middleware::from_fn_with_state(origins, cors::reject_disallowed_origin))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        ))
}

pub async fn serve(app: Router, host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining connections");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
    }

    impl TestApp {
        fn new() -> Self {
            Self {
                router: build_app(AppState::fake()).unwrap(),
            }
        }

        async fn send(&self, req: Request<Body>) -> Response {
            self.router.clone().oneshot(req).await.unwrap()
        }

        async fn json(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some(t) = token {
                req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
            }
            let req = match body {
                Some(b) => req
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(b.to_string()))
                    .unwrap(),
                None => req.body(Body::empty()).unwrap(),
            };
            let res = self.send(req).await;
            let status = res.status();
            (status, body_json(res).await)
        }

        async fn token_for(&self, username: &str) -> String {
            let (status, body) = self
                .json(
                    Method::POST,
                    "/auth/register",
                    None,
                    Some(json!({ "username": username, "password": "correct-horse" })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
            body["access_token"].as_str().unwrap().to_string()
        }
    }

    async fn body_json(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        }
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = TestApp::new();
        let (status, body) = app.json(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn resources_require_a_token() {
        let app = TestApp::new();
        for uri in ["/income/", "/expense", "/receipt/", "/form", "/auth/me"] {
            let (status, body) = app.json(Method::GET, uri, None, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(body["code"], "unauthorized");
        }
        let (status, _) = app.json(Method::GET, "/income/", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn expired_access_token_is_unauthorized() {
        use crate::auth::services::{Claims, JwtKeys, TokenKind};
        use axum::extract::FromRef;
        use jsonwebtoken::{encode, EncodingKey, Header};

        let app = TestApp::new();
        let token = app.token_for("ana").await;
        let keys = JwtKeys::from_ref(&AppState::fake());
        let live = keys.verify(&token).unwrap();

        // well past the default 60s leeway
        let now = time::OffsetDateTime::now_utc().unix_timestamp() as usize;
        let expired = Claims {
            iat: now - 7200,
            exp: now - 3600,
            kind: TokenKind::Access,
            ..live
        };
        let stale = encode(&Header::default(), &expired, &EncodingKey::from_secret(b"test")).unwrap();

        let (status, body) = app.json(Method::GET, "/income/", Some(&stale), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthorized");
        let (status, _) = app.json(Method::GET, "/income/", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn refresh_token_is_not_a_bearer_token() {
        let app = TestApp::new();
        let (status, body) = app
            .json(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({ "username": "ana", "password": "correct-horse" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let refresh = body["refresh_token"].as_str().unwrap();

        for uri in ["/income/", "/auth/me"] {
            let (status, body) = app.json(Method::GET, uri, Some(refresh), None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(body["code"], "unauthorized");
        }
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let app = TestApp::new();
        let (status, body) = app.json(Method::GET, "/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn expense_crud_round() {
        let app = TestApp::new();
        let token = app.token_for("ana").await;

        let (status, created) = app
            .json(
                Method::POST,
                "/expense/add_expense",
                Some(&token),
                Some(json!({ "amount": "12.5", "category": "food", "date": "2024-01-05", "note": "lunch" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{created}");
        assert_eq!(created["amount"], "12.50");
        let id = created["id"].as_i64().unwrap();

        let (status, list) = app.json(Method::GET, "/expense/", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, patched) = app
            .json(
                Method::PATCH,
                &format!("/expense/{id}"),
                Some(&token),
                Some(json!({ "note": null, "category": "groceries" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{patched}");
        assert_eq!(patched["category"], "groceries");
        assert_eq!(patched["note"], Value::Null);
        assert_eq!(patched["amount"], "12.50");

        let (status, _) = app.json(Method::DELETE, &format!("/expense/{id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.json(Method::GET, &format!("/expense/{id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_income_lists_fields() {
        let app = TestApp::new();
        let token = app.token_for("ana").await;
        let (status, body) = app
            .json(
                Method::POST,
                "/income/",
                Some(&token),
                Some(json!({ "amount": "-5", "category": "salary", "date": "2024-02-30" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_input");
        assert!(body["fields"]["amount"].is_string());
        assert!(body["fields"]["date"].is_string());

        let (status, _) = app.json(Method::GET, "/income/abc", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn other_users_records_are_invisible() {
        let app = TestApp::new();
        let ana = app.token_for("ana").await;
        let bob = app.token_for("bob").await;

        let (_, created) = app
            .json(
                Method::POST,
                "/income/",
                Some(&ana),
                Some(json!({ "amount": 100, "category": "salary", "date": "2024-01-31" })),
            )
            .await;
        let id = created["id"].as_i64().unwrap();

        let (status, _) = app.json(Method::GET, &format!("/income/{id}"), Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.json(Method::DELETE, &format!("/income/{id}"), Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, list) = app.json(Method::GET, "/income", Some(&bob), None).await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn multipart_receipt_upload() {
        let app = TestApp::new();
        let token = app.token_for("ana").await;

        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"scan.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\n\
             not really a jpeg\r\n\
             --{boundary}--\r\n"
        );
        let req = Request::post("/receipt/")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let res = app.send(req).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let receipt = body_json(res).await;
        assert_eq!(receipt["status"], "extraction_failed");
        assert_eq!(receipt["file_name"], "scan.jpg");
        assert!(receipt.get("file_key").is_none());
        let id = receipt["id"].as_i64().unwrap();

        let req = Request::get(format!("/receipt/{id}/file"))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let res = app.send(req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "image/jpeg");
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"not really a jpeg");
    }

    #[tokio::test]
    async fn base64_receipt_is_extracted_and_counted_in_form() {
        let app = TestApp::new();
        let token = app.token_for("ana").await;

        let (status, receipt) = app
            .json(
                Method::POST,
                "/receipt/base64",
                Some(&token),
                // "Cafe\nTOTAL 4.50\n"
                Some(json!({ "file_b64": "data:text/plain;base64,Q2FmZQpUT1RBTCA0LjUwCg==" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{receipt}");
        assert_eq!(receipt["status"], "processed");
        assert_eq!(receipt["amount"], "4.50");
        assert_eq!(receipt["vendor"], "Cafe");

        let (status, form) = app.json(Method::GET, "/form/", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK, "{form}");
        assert_eq!(form["receipt_count"], 1);
        assert_eq!(form["net"], "0.00");
        assert_eq!(form["expense"]["total"], "0.00");
    }

    #[tokio::test]
    async fn base64_receipt_size_limit_is_inclusive() {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        let app = TestApp::new();
        let token = app.token_for("ana").await;
        let max = AppState::fake().config.receipt_max_bytes;
        assert_eq!(max, 1024 * 1024);

        let too_big = STANDARD.encode(vec![b'a'; max + 1]);
        let (status, body) = app
            .json(
                Method::POST,
                "/receipt/base64",
                Some(&token),
                Some(json!({ "file_b64": too_big, "content_type": "text/plain" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(body["code"], "invalid_input");
        assert!(body["fields"]["file"].is_string());

        let exact = STANDARD.encode(vec![b'a'; max]);
        let (status, receipt) = app
            .json(
                Method::POST,
                "/receipt/base64",
                Some(&token),
                Some(json!({ "file_b64": exact, "content_type": "text/plain" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{receipt}");
        assert_eq!(receipt["size_bytes"], max);
    }

    #[tokio::test]
    async fn form_rejects_inverted_range() {
        let app = TestApp::new();
        let token = app.token_for("ana").await;
        let (status, body) = app
            .json(Method::GET, "/form?start=2024-02-01&end=2024-01-01", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["fields"]["start"].is_string());
    }

    #[tokio::test]
    async fn form_csv_is_text_csv() {
        let app = TestApp::new();
        let token = app.token_for("ana").await;
        app.json(
            Method::POST,
            "/income/add_income",
            Some(&token),
            Some(json!({ "amount": "10", "category": "gift", "date": "2024-03-01" })),
        )
        .await;

        let req = Request::get("/form/csv?start=2024-03-01&end=2024-03-31")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let res = app.send(req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/csv"));
        let text = String::from_utf8(to_bytes(res.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
        assert_eq!(text, "kind,date,category,amount,note\nincome,2024-03-01,gift,10.00,\n");
    }

    #[tokio::test]
    async fn cors_headers_on_regular_responses() {
        let app = TestApp::new();
        let req = Request::get("/health")
            .header(header::ORIGIN, "https://app.test")
            .body(Body::empty())
            .unwrap();
        let res = app.send(req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.test");
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }
}
