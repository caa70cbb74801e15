use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::{self, HeaderName, HeaderValue, Method},
    routing::{get, patch, post},
};
use crm::email::Mailer;
use platform_db::DbPool;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::{api, config::AppConfig};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub mailer: Mailer,
    pub config: Arc<AppConfig>,
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, "leadline listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ]);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(AllowOrigin::any());
    }
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    layer.allow_origin(AllowOrigin::list(allowed))
}

pub fn build_router(state: AppState) -> Router {
    let request_id = MakeRequestUuid;
    let header_name = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/health", get(health_handler))
        .route("/leads", get(api::leads::list).post(api::leads::create))
        .route("/leads/bulk", post(api::leads::bulk_import))
        .route("/leads/bulk/stage", patch(api::leads::bulk_stage))
        .route("/leads/import/map-columns", post(api::leads::map_columns))
        .route("/leads/import/parse", post(api::leads::parse_import))
        .route("/leads/check-duplicates", post(api::leads::check_duplicates))
        .route("/leads/duplicates", get(api::leads::duplicates))
        .route("/leads/merge", post(api::leads::merge))
        .route("/leads/export/csv", get(api::leads::export_csv))
        .route(
            "/leads/{id}",
            get(api::leads::get)
                .put(api::leads::update)
                .delete(api::leads::delete),
        )
        .route("/leads/{id}/stage", patch(api::leads::set_stage))
        .route("/leads/{id}/cadence-step", patch(api::leads::set_cadence))
        .route(
            "/leads/{id}/history",
            get(api::leads::history).post(api::leads::log_contact),
        )
        .route("/tasks", get(api::tasks::list).post(api::tasks::create))
        .route("/tasks/reminders", post(api::tasks::reminders))
        .route(
            "/tasks/{id}",
            get(api::tasks::get)
                .put(api::tasks::update)
                .delete(api::tasks::delete),
        )
        .route("/tasks/{id}/toggle", patch(api::tasks::toggle))
        .route(
            "/email-templates",
            get(api::email::list_templates).post(api::email::create_template),
        )
        .route(
            "/email-templates/{id}",
            get(api::email::get_template)
                .put(api::email::update_template)
                .delete(api::email::delete_template),
        )
        .route("/email/status", get(api::email::status))
        .route("/email/send", post(api::email::send))
        .route("/email/batch", post(api::email::batch))
        .route("/email/scheduled/process", post(api::email::process_scheduled))
        .route("/analytics/funnel", get(api::analytics::funnel))
        .route("/analytics/stage-durations", get(api::analytics::stage_durations))
        .route("/analytics/win-loss", get(api::analytics::win_loss))
        .route("/analytics/dashboard", get(api::analytics::dashboard))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), request_id))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors_allowed_origins)),
        )
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    db_ok: bool,
    email_configured: bool,
    version: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_ok = platform_db::ping(&state.pool).await;
    Json(HealthResponse {
        ok: db_ok,
        db_ok,
        email_configured: state.mailer.is_configured(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    ctrl_c.await;

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use crm::email::EmailSettings;
    use http_body_util::BodyExt;
    use migration::{Migrator, MigratorTrait};
    use platform_db::{DatabaseSettings, connect};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    async fn app() -> Router {
        let pool = connect(&DatabaseSettings::sqlite_memory()).await.unwrap();
        Migrator::up(&pool, None).await.unwrap();
        build_router(AppState {
            pool,
            mailer: Mailer::new(EmailSettings::default()).unwrap(),
            config: Arc::new(AppConfig::default()),
        })
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_database_and_email() {
        let app = app().await;
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["db_ok"], true);
        assert_eq!(body["email_configured"], false);
    }

    #[tokio::test]
    async fn request_id_is_propagated() {
        let app = app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn lead_round_trip_through_the_api() {
        let app = app().await;
        let (status, created) = call(
            &app,
            "POST",
            "/leads",
            Some(json!({
                "dispensary_name": "Green Leaf",
                "phone": "303-555-0140",
                "deal_value": "$650",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["stage"], "New Lead");
        assert_eq!(created["deal_value"], 650.0);
        let id = created["id"].as_i64().unwrap();

        let (status, moved) = call(
            &app,
            "PATCH",
            &format!("/leads/{id}/stage"),
            Some(json!({ "stage": "Contacted" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["changed"], true);
        assert_eq!(moved["entry"]["outcome"], "Stage: Contacted");

        let (status, detail) = call(&app, "GET", &format!("/leads/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["stage"], "Contacted");
        assert_eq!(detail["history"].as_array().unwrap().len(), 1);

        let (status, list) = call(&app, "GET", "/leads?q=green&sort=name", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert!(list[0]["score"].is_number());

        let (status, _) = call(&app, "DELETE", &format!("/leads/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = call(&app, "GET", &format!("/leads/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "lead not found");
    }

    #[tokio::test]
    async fn validation_errors_use_the_error_envelope() {
        let app = app().await;
        let (status, body) = call(
            &app,
            "POST",
            "/leads",
            Some(json!({ "dispensary_name": " ", "priority": "Urgent" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation failed");
        let fields: Vec<&str> = body["details"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|d| d["field"].as_str())
            .collect();
        assert!(fields.contains(&"dispensary_name"));
        assert!(fields.contains(&"priority"));

        let (status, body) = call(&app, "GET", "/leads?sort=random", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"][0]["field"], "sort");
    }

    #[tokio::test]
    async fn column_mapping_endpoint() {
        let app = app().await;
        let (status, body) = call(
            &app,
            "POST",
            "/leads/import/map-columns",
            Some(json!({ "headers": ["Company Name", "E-mail", "Random123"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["field"], "dispensary_name");
        assert_eq!(body[1]["field"], "contact_email");
        assert_eq!(body[2]["field"], Value::Null);
    }

    #[tokio::test]
    async fn email_endpoints_answer_503_without_a_provider() {
        let app = app().await;
        let (status, body) = call(&app, "GET", "/email/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["configured"], false);

        let (status, _) = call(
            &app,
            "POST",
            "/email/send",
            Some(json!({ "lead_id": 1, "subject": "Hi", "body": "Hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn export_is_csv() {
        let app = app().await;
        call(&app, "POST", "/leads", Some(json!({ "dispensary_name": "Shop, Inc" }))).await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/leads/export/csv")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[http::header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/csv")
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("id,dispensary_name,"));
        assert!(text.contains("\"Shop, Inc\""));
    }
}
