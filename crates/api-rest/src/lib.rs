//! # API REST
//!
//! HTTP surface for the messaging pipeline.
//!
//! Handles:
//! - visit dispatch and operator release of held messages
//! - ledger listing and lookup
//! - per-institution messaging configuration
//! - OpenAPI/Swagger documentation and CORS
//!
//! The router is built over an already running [`MessagingService`]; the `hie-run` binary owns
//! the pipeline lifecycle.

#![warn(rust_2018_idioms)]

mod dto;

pub use dto::{DispatchRes, ErrorRes, HealthRes, ListMessagesRes, MessageRecordRes};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use hie_core::config::MessagingConfiguration;
use hie_core::ledger::LedgerQuery;
use hie_core::{HieError, MessagingService, VisitEvent};
use hie_types::{Assessment, Institution};
use hie_uuid::ShardableUuid;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: MessagingService,
}

type ApiError = (StatusCode, Json<ErrorRes>);
type ApiResult<T> = Result<T, ApiError>;

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        dispatch_visit,
        list_messages,
        get_message,
        release_message,
        get_messaging_config,
        put_messaging_config,
    ),
    components(schemas(HealthRes, DispatchRes, MessageRecordRes, ListMessagesRes, ErrorRes))
)]
struct ApiDoc;

/// Builds the REST router over `state`, with Swagger UI at `/swagger-ui`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/dispatch", post(dispatch_visit))
        .route("/messages", get(list_messages))
        .route("/messages/:id", get(get_message))
        .route("/messages/:id/release", post(release_message))
        .route(
            "/institutions/:id/messaging-config",
            get(get_messaging_config).put(put_messaging_config),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Maps a pipeline error to a status code. Internal failures are logged and reported
/// without detail.
fn error_response(e: HieError) -> ApiError {
    let status = match &e {
        HieError::RecordNotFound(_) => StatusCode::NOT_FOUND,
        HieError::InvalidTransition { .. }
        | HieError::ControlIdTaken(_)
        | HieError::NotHeld(_)
        | HieError::ReleaseClaimed(_) => StatusCode::CONFLICT,
        HieError::InvalidInput(_)
        | HieError::InvalidConfiguration(_)
        | HieError::Uuid(_)
        | HieError::Text(_)
        | HieError::Hl7(_) => StatusCode::BAD_REQUEST,
        HieError::YamlDeserialization(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => {
            tracing::error!(error = %e, "request failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorRes::new("internal error")),
            );
        }
    };
    (status, Json(ErrorRes::new(e.to_string())))
}

fn parse_record_id(id: &str) -> ApiResult<ShardableUuid> {
    ShardableUuid::parse(id).map_err(|e| error_response(e.into()))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthRes)
    )
)]
async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "HIE messaging is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/dispatch",
    request_body(content = Object, description = "Completed visit: student, visit, institution and optional assessment"),
    responses(
        (status = 202, description = "Visit handled; see outcome", body = DispatchRes),
        (status = 422, description = "Malformed visit event"),
        (status = 500, description = "Ledger write failed", body = ErrorRes)
    )
)]
/// Records the HL7 message for a completed visit and queues it if policy allows.
///
/// Delivery happens in the background; the response reports what was recorded, not whether
/// the exchange accepted it.
#[axum::debug_handler]
async fn dispatch_visit(
    State(state): State<AppState>,
    Json(mut event): Json<VisitEvent>,
) -> ApiResult<(StatusCode, Json<DispatchRes>)> {
    event.assessment = event.assessment.take().map(Assessment::with_derived_bmi);
    let outcome = state.service.dispatch(&event).map_err(error_response)?;
    Ok((StatusCode::ACCEPTED, Json(DispatchRes::from(&outcome))))
}

#[utoipa::path(
    get,
    path = "/messages",
    params(
        ("institution_id" = Option<String>, Query, description = "Institution UUID"),
        ("student_id" = Option<String>, Query, description = "Student UUID"),
        ("visit_id" = Option<String>, Query, description = "Visit UUID"),
        ("status" = Option<String>, Query, description = "PENDING, SENT or FAILED"),
        ("message_type" = Option<String>, Query, description = "ADMIT_UPDATE or OBSERVATION_RESULT"),
        ("created_from" = Option<String>, Query, description = "Created at or after (RFC 3339)"),
        ("created_to" = Option<String>, Query, description = "Created before (RFC 3339)")
    ),
    responses(
        (status = 200, description = "Matching records, oldest first", body = ListMessagesRes),
        (status = 400, description = "Invalid filter"),
        (status = 500, description = "Ledger read failed", body = ErrorRes)
    )
)]
async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<LedgerQuery>,
) -> ApiResult<Json<ListMessagesRes>> {
    let records = state.service.store().query(&query).map_err(error_response)?;
    Ok(Json(ListMessagesRes {
        messages: records.iter().map(MessageRecordRes::from).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/messages/{id}",
    params(("id" = String, Path, description = "Record UUID (32 lowercase hex)")),
    responses(
        (status = 200, description = "The record", body = MessageRecordRes),
        (status = 400, description = "Malformed record id", body = ErrorRes),
        (status = 404, description = "No such record", body = ErrorRes)
    )
)]
async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageRecordRes>> {
    let id = parse_record_id(&id)?;
    let record = state.service.store().get(&id).map_err(error_response)?;
    Ok(Json(MessageRecordRes::from(&record)))
}

#[utoipa::path(
    post,
    path = "/messages/{id}/release",
    params(("id" = String, Path, description = "Record UUID (32 lowercase hex)")),
    request_body(content = Object, description = "The institution that owns the record"),
    responses(
        (status = 202, description = "Queued for delivery", body = DispatchRes),
        (status = 400, description = "Record or institution cannot be released", body = ErrorRes),
        (status = 404, description = "No such record", body = ErrorRes),
        (status = 409, description = "Record is no longer PENDING, was never held, or was already released", body = ErrorRes)
    )
)]
/// Queues a held `PENDING` record for delivery.
#[axum::debug_handler]
async fn release_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(institution): Json<Institution>,
) -> ApiResult<(StatusCode, Json<DispatchRes>)> {
    let id = parse_record_id(&id)?;
    let outcome = state
        .service
        .release(&id, &institution)
        .map_err(error_response)?;
    Ok((StatusCode::ACCEPTED, Json(DispatchRes::from(&outcome))))
}

#[utoipa::path(
    get,
    path = "/institutions/{id}/messaging-config",
    params(("id" = String, Path, description = "Institution UUID")),
    responses(
        (status = 200, description = "Stored configuration; empty when defaults apply", body = Object),
        (status = 422, description = "Stored configuration is unusable", body = ErrorRes)
    )
)]
async fn get_messaging_config(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MessagingConfiguration>> {
    let stored = state
        .service
        .resolver()
        .store()
        .load(&id)
        .map_err(error_response)?;
    Ok(Json(stored.unwrap_or_default()))
}

#[utoipa::path(
    put,
    path = "/institutions/{id}/messaging-config",
    params(("id" = String, Path, description = "Institution UUID")),
    request_body(content = Object, description = "Messaging configuration; absent fields take defaults"),
    responses(
        (status = 200, description = "Configuration saved", body = Object),
        (status = 400, description = "Configuration failed validation", body = ErrorRes),
        (status = 422, description = "Unknown or mistyped field")
    )
)]
/// Replaces an institution's messaging configuration. The next dispatch picks it up.
#[axum::debug_handler]
async fn put_messaging_config(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(config): Json<MessagingConfiguration>,
) -> ApiResult<Json<MessagingConfiguration>> {
    state
        .service
        .resolver()
        .store()
        .save(&id, &config)
        .map_err(error_response)?;
    Ok(Json(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use hie_core::worker::DeliveryWorker;
    use hie_core::{start_pipeline, RuntimeConfig};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        _dir: TempDir,
        app: Router,
        worker: DeliveryWorker,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().expect("tempdir");
        let runtime = RuntimeConfig::new(dir.path().to_path_buf())
            .with_backoff_unit(std::time::Duration::from_millis(1));
        let (service, worker) = start_pipeline(&runtime).expect("pipeline");
        Harness {
            _dir: dir,
            app: router(AppState { service }),
            worker,
        }
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).expect("request"))
            .await
            .expect("response");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn institution(id: Uuid) -> Value {
        json!({ "id": id, "code": "NHS01", "name": "North Hill School" })
    }

    fn visit_event(institution_id: Uuid) -> Value {
        let student_id = Uuid::new_v4();
        json!({
            "student": {
                "id": student_id,
                "name": { "given": "Ada", "family": "Okafor" },
                "birth_date": "2012-04-09",
                "identifier": "S-1042",
                "gender": "female"
            },
            "visit": {
                "id": Uuid::new_v4(),
                "student_id": student_id,
                "institution_id": institution_id,
                "visit_type": "SICK_CALL",
                "chief_complaint": "Headache",
                "started_at": "2026-10-01T09:30:00Z"
            },
            "institution": institution(institution_id),
            "assessment": { "temperature_c": 38.2, "height_cm": 150.0, "weight_kg": 45.0 }
        })
    }

    async fn hold_everything(app: &Router, institution_id: Uuid) {
        let (status, _) = call(
            app,
            Method::PUT,
            &format!("/institutions/{institution_id}/messaging-config"),
            Some(json!({ "auto_send": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let h = harness();
        let (status, body) = call(&h.app, Method::GET, "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn held_dispatch_is_recorded_and_listed() {
        let h = harness();
        let institution_id = Uuid::new_v4();
        hold_everything(&h.app, institution_id).await;

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/dispatch",
            Some(visit_event(institution_id)),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["outcome"], "held");
        let record_id = body["record_id"].as_str().expect("record id").to_owned();

        let (status, record) = call(&h.app, Method::GET, &format!("/messages/{record_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["status"], "PENDING");
        assert_eq!(record["message_type"], "OBSERVATION_RESULT");
        assert_eq!(record["hold_reason"], "auto-send is disabled");
        assert!(record["message"].as_str().expect("text").contains("39156-5"));

        let (status, list) = call(
            &h.app,
            Method::GET,
            &format!("/messages?institution_id={institution_id}&status=PENDING"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["messages"].as_array().expect("array").len(), 1);

        let (_, empty) = call(&h.app, Method::GET, "/messages?status=SENT", None).await;
        assert!(empty["messages"].as_array().expect("array").is_empty());

        drop(h.app);
        h.worker.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_institution_records_nothing() {
        let h = harness();
        let institution_id = Uuid::new_v4();
        call(
            &h.app,
            Method::PUT,
            &format!("/institutions/{institution_id}/messaging-config"),
            Some(json!({ "enabled": false })),
        )
        .await;

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/dispatch",
            Some(visit_event(institution_id)),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["outcome"], "skipped");

        let (_, list) = call(&h.app, Method::GET, "/messages", None).await;
        assert!(list["messages"].as_array().expect("array").is_empty());
    }

    #[tokio::test]
    async fn release_checks_ownership() {
        let h = harness();
        let institution_id = Uuid::new_v4();
        hold_everything(&h.app, institution_id).await;
        let (_, body) = call(
            &h.app,
            Method::POST,
            "/dispatch",
            Some(visit_event(institution_id)),
        )
        .await;
        let record_id = body["record_id"].as_str().expect("record id").to_owned();

        let (status, _) = call(
            &h.app,
            Method::POST,
            &format!("/messages/{record_id}/release"),
            Some(institution(Uuid::new_v4())),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing = ShardableUuid::new();
        let (status, _) = call(
            &h.app,
            Method::POST,
            &format!("/messages/{missing}/release"),
            Some(institution(institution_id)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn queued_record_release_is_conflict() {
        let h = harness();
        let institution_id = Uuid::new_v4();
        let (_, body) = call(
            &h.app,
            Method::POST,
            "/dispatch",
            Some(visit_event(institution_id)),
        )
        .await;
        assert_eq!(body["outcome"], "queued");
        let record_id = body["record_id"].as_str().expect("record id").to_owned();

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/messages/{record_id}/release"),
            Some(institution(institution_id)),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn malformed_record_id_is_bad_request() {
        let h = harness();
        let (status, body) = call(&h.app, Method::GET, "/messages/not-a-uuid", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn configuration_round_trips_and_rejects_invalid_values() {
        let h = harness();
        let uri = format!("/institutions/{}/messaging-config", Uuid::new_v4());

        let (status, body) = call(&h.app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));

        let config = json!({
            "environment": "production",
            "auto_send_types": ["ADMIT_UPDATE"],
            "retry_budget": 5
        });
        let (status, _) = call(&h.app, Method::PUT, &uri, Some(config.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let (_, stored) = call(&h.app, Method::GET, &uri, None).await;
        assert_eq!(stored, config);

        let (status, _) = call(
            &h.app,
            Method::PUT,
            &uri,
            Some(json!({ "retry_budget": 50 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, unchanged) = call(&h.app, Method::GET, &uri, None).await;
        assert_eq!(unchanged, config);

        let (status, _) = call(&h.app, Method::PUT, &uri, Some(json!({ "retries": 2 }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
