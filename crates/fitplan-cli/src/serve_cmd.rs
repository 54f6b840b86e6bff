use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use fitplan_core::activation::{ActivationTarget, PlanActivationService};
use fitplan_core::catalog::{PlanCatalog, TemplateRef};
use fitplan_core::draft::PlanDraft;
use fitplan_core::error::PlanError;
use fitplan_core::query::PlanQueryService;
use fitplan_db::models::Family;

/// Header carrying the caller's user id, set by the upstream auth layer.
pub const OWNER_HEADER: &str = "x-owner-id";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
    problems: Vec<String>,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
            problems: Vec::new(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: msg.into(),
            problems: Vec::new(),
        }
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: msg.into(),
            problems: Vec::new(),
        }
    }
}

impl From<PlanError> for AppError {
    fn from(err: PlanError) -> Self {
        let (status, problems) = match &err {
            PlanError::Validation(v) => (StatusCode::UNPROCESSABLE_ENTITY, v.problems.clone()),
            PlanError::NotFoundOrUnauthorized { .. } => (StatusCode::NOT_FOUND, Vec::new()),
            PlanError::Conflict(_) => (StatusCode::CONFLICT, Vec::new()),
            PlanError::Storage(_) => {
                tracing::error!(error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
            }
        };
        Self {
            status,
            message: err.to_string(),
            problems,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = if self.problems.is_empty() {
            serde_json::json!({ "error": self.message })
        } else {
            serde_json::json!({ "error": self.message, "problems": self.problems })
        };
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Extractors and request types
// ---------------------------------------------------------------------------

/// The authenticated caller.
pub struct Owner(pub Uuid);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or_else(|| AppError::unauthorized(format!("missing {OWNER_HEADER} header")))?;
        value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(Owner)
            .ok_or_else(|| AppError::unauthorized(format!("malformed {OWNER_HEADER} header")))
    }
}

/// Body of `POST /api/{family}/activate`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ActivateRequest {
    Preset {
        #[serde(rename = "isPreset")]
        is_preset: bool,
        template: TemplateRef,
    },
    Owned {
        #[serde(rename = "planId")]
        plan_id: Uuid,
    },
}

impl TryFrom<ActivateRequest> for ActivationTarget {
    type Error = AppError;

    fn try_from(req: ActivateRequest) -> Result<Self, Self::Error> {
        match req {
            ActivateRequest::Preset {
                is_preset: true,
                template,
            } => Ok(Self::Preset(template)),
            ActivateRequest::Preset { .. } => Err(AppError::unprocessable(
                "template activation requires isPreset: true",
            )),
            ActivateRequest::Owned { plan_id } => Ok(Self::Owned(plan_id)),
        }
    }
}

fn parse_family(raw: &str) -> Result<Family, AppError> {
    raw.parse().map_err(|e: fitplan_db::models::FamilyParseError| {
        AppError::not_found(e.to_string())
    })
}

fn parse_body<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(body).map_err(|e| AppError::unprocessable(format!("malformed request: {e}")))
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub activation: PlanActivationService,
    pub query: PlanQueryService,
}

impl AppState {
    pub fn new(pool: PgPool, catalog: Arc<PlanCatalog>) -> Self {
        Self {
            activation: PlanActivationService::new(pool.clone(), catalog.clone()),
            query: PlanQueryService::new(pool, catalog),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/{family}/templates", get(list_templates))
        .route("/api/{family}/plans", get(list_plans).post(create_plan))
        .route("/api/{family}/plans/{id}", patch(update_plan))
        .route("/api/{family}/display", get(list_display))
        .route("/api/{family}/activate", post(activate))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, catalog: Arc<PlanCatalog>, bind: &str, port: u16) -> Result<()> {
    let app = build_router(AppState::new(pool, catalog));
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("fitplan serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("fitplan serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C; shutting down");
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn list_templates(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(family): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let family = parse_family(&family)?;
    let templates = state.query.list_preset_templates(owner, family).await?;
    Ok(Json(templates).into_response())
}

async fn list_plans(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(family): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let family = parse_family(&family)?;
    let plans = state.query.list_owned_plans(owner, family).await?;
    Ok(Json(plans).into_response())
}

async fn list_display(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(family): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let family = parse_family(&family)?;
    let entries = state.query.list_for_display(owner, family).await?;
    Ok(Json(entries).into_response())
}

async fn activate(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(family): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<axum::response::Response, AppError> {
    let family = parse_family(&family)?;
    let target = ActivationTarget::try_from(parse_body::<ActivateRequest>(body)?)?;
    let activation = state.activation.activate(owner, family, &target).await?;
    Ok(Json(activation).into_response())
}

async fn create_plan(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(family): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<axum::response::Response, AppError> {
    let family = parse_family(&family)?;
    let draft = PlanDraft::from_json(body).map_err(PlanError::from)?;
    let activation = state.activation.create_custom(owner, family, draft).await?;
    Ok((StatusCode::CREATED, Json(activation)).into_response())
}

async fn update_plan(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path((family, id)): Path<(String, Uuid)>,
    Json(body): Json<serde_json::Value>,
) -> Result<axum::response::Response, AppError> {
    let family = parse_family(&family)?;
    let plan = state.activation.update_owned(owner, family, id, body).await?;
    Ok(Json(plan).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use sqlx::PgPool;
    use tower::ServiceExt;
    use uuid::Uuid;

    use fitplan_core::catalog::PlanCatalog;
    use fitplan_db::models::Family;
    use fitplan_test_utils::{create_test_db, create_test_user, drop_test_db};

    use super::{AppState, OWNER_HEADER};

    // -----------------------------------------------------------------------
    // HTTP helpers
    // -----------------------------------------------------------------------

    async fn send(
        pool: &PgPool,
        method: &str,
        uri: &str,
        owner: Option<Uuid>,
        body: Option<serde_json::Value>,
    ) -> axum::response::Response {
        let catalog = Arc::new(PlanCatalog::builtin().unwrap());
        let app = super::build_router(AppState::new(pool.clone(), catalog));

        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(owner) = owner {
            builder = builder.header(OWNER_HEADER, owner.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.oneshot(request).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn diet_template_count() -> usize {
        PlanCatalog::builtin().unwrap().list(Family::Diet).len()
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_list_templates_for_new_owner() {
        let (pool, db_name) = create_test_db().await;
        let user = create_test_user(&pool).await;

        let resp = send(&pool, "GET", "/api/diet/templates", Some(user.id), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        let arr = json.as_array().expect("response should be an array");
        assert_eq!(arr.len(), diet_template_count());
        assert!(arr.iter().all(|t| t["isActive"] == false));

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_missing_or_bad_owner_is_unauthorized() {
        let (pool, db_name) = create_test_db().await;

        let resp = send(&pool, "GET", "/api/diet/plans", None, None).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let app_resp = {
            let catalog = Arc::new(PlanCatalog::builtin().unwrap());
            let app = super::build_router(AppState::new(pool.clone(), catalog));
            app.oneshot(
                Request::builder()
                    .uri("/api/diet/plans")
                    .header(OWNER_HEADER, "not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
        };
        assert_eq!(app_resp.status(), StatusCode::UNAUTHORIZED);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_unknown_family_or_owner_is_not_found() {
        let (pool, db_name) = create_test_db().await;
        let user = create_test_user(&pool).await;

        let resp = send(&pool, "GET", "/api/cardio/templates", Some(user.id), None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = send(&pool, "GET", "/api/diet/templates", Some(Uuid::new_v4()), None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_activate_preset_then_display() {
        let (pool, db_name) = create_test_db().await;
        let user = create_test_user(&pool).await;

        let body = json!({ "isPreset": true, "template": { "name": "Keto Burn", "category": "keto" } });
        let resp = send(&pool, "POST", "/api/diet/activate", Some(user.id), Some(body)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["created"], true);
        assert_eq!(json["plan"]["isActive"], true);
        assert_eq!(json["plan"]["templateId"], "keto-burn");
        let plan_id = json["plan"]["id"].as_str().unwrap().to_owned();

        let resp = send(&pool, "GET", "/api/diet/display", Some(user.id), None).await;
        let display = body_json(resp).await;
        let active: Vec<&serde_json::Value> = display
            .as_array()
            .unwrap()
            .iter()
            .filter(|e| e["isActive"] == true)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0]["kind"], "template");
        assert_eq!(active[0]["planId"], plan_id.as_str());

        // Activating by plan id is idempotent.
        let body = json!({ "planId": plan_id });
        let resp = send(&pool, "POST", "/api/diet/activate", Some(user.id), Some(body)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["created"], false);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_activate_rejects_bad_requests() {
        let (pool, db_name) = create_test_db().await;
        let alice = create_test_user(&pool).await;
        let bob = create_test_user(&pool).await;

        let body = json!({ "isPreset": false, "template": { "id": "keto-burn" } });
        let resp = send(&pool, "POST", "/api/diet/activate", Some(alice.id), Some(body)).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = json!({ "nonsense": 1 });
        let resp = send(&pool, "POST", "/api/diet/activate", Some(alice.id), Some(body)).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let draft = json!({ "name": "Hers", "category": "cut", "calories": 1700 });
        let resp = send(&pool, "POST", "/api/diet/plans", Some(alice.id), Some(draft)).await;
        let plan_id = body_json(resp).await["plan"]["id"].as_str().unwrap().to_owned();

        let body = json!({ "planId": plan_id });
        let resp = send(&pool, "POST", "/api/diet/activate", Some(bob.id), Some(body)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("not found"));

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_create_plan_validates() {
        let (pool, db_name) = create_test_db().await;
        let user = create_test_user(&pool).await;

        let draft = json!({ "name": "Half a workout", "category": "strength" });
        let resp = send(&pool, "POST", "/api/workout/plans", Some(user.id), Some(draft)).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(resp).await;
        assert_eq!(json["problems"].as_array().unwrap().len(), 4);

        let draft = json!({
            "name": "Garage Strength",
            "category": "strength",
            "difficulty": "beginner",
            "duration": "40 minutes",
            "frequency": "3x per week",
            "exercises": [{ "name": "Squat", "sets": 3, "reps": "8-10" }]
        });
        let resp = send(&pool, "POST", "/api/workout/plans", Some(user.id), Some(draft)).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert_eq!(json["plan"]["isCustom"], true);
        assert_eq!(json["plan"]["attributes"]["exercises"][0]["reps"], "8-10");

        let resp = send(&pool, "GET", "/api/workout/plans", Some(user.id), None).await;
        let plans = body_json(resp).await;
        assert_eq!(plans.as_array().unwrap().len(), 1);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_update_plan() {
        let (pool, db_name) = create_test_db().await;
        let user = create_test_user(&pool).await;

        let draft = json!({ "name": "Mine", "category": "cut", "calories": 1900 });
        let resp = send(&pool, "POST", "/api/diet/plans", Some(user.id), Some(draft)).await;
        let plan_id = body_json(resp).await["plan"]["id"].as_str().unwrap().to_owned();
        let uri = format!("/api/diet/plans/{plan_id}");

        let resp = send(&pool, "PATCH", &uri, Some(user.id), Some(json!({ "isActive": false }))).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = send(&pool, "PATCH", &uri, Some(user.id), Some(json!({ "calories": 2100 }))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["attributes"]["calories"], 2100);
        assert_eq!(json["isActive"], true);

        let resp = send(&pool, "PATCH", &uri, Some(Uuid::new_v4()), Some(json!({ "calories": 1 }))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
