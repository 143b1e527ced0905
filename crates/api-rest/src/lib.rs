//! # API REST
//!
//! REST API for the form engine.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, status codes)
//!
//! Form logic lives in `forms-core`; handlers only translate requests and map errors.

#![warn(rust_2018_idioms)]

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use forms_core::{
    AmbientDefaults, CoreConfig, EncounterContext, FormError, FormIntent, FormLoader,
    FormRegistry, FormResult, FormSession, SessionMode, StaticFormSource,
};
use openmrs::OpenmrsEncounter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

/// Application state for the REST API server
///
/// The registry and the form loader are built once at startup; the loader's cache is shared
/// across requests.
#[derive(Clone)]
pub struct AppState {
    cfg: Arc<CoreConfig>,
    registry: Arc<FormRegistry>,
    loader: Arc<FormLoader<StaticFormSource>>,
}

impl AppState {
    /// Load the registry and the form documents from the configured directories.
    pub fn load(cfg: Arc<CoreConfig>) -> FormResult<Self> {
        let registry = FormRegistry::load_dir(cfg.registry_dir())?;
        let source = StaticFormSource::load_dir(cfg.forms_dir())?;
        Ok(Self::from_parts(cfg, registry, source))
    }

    pub fn from_parts(cfg: Arc<CoreConfig>, registry: FormRegistry, source: StaticFormSource) -> Self {
        Self {
            cfg,
            registry: Arc::new(registry),
            loader: Arc::new(FormLoader::new(source)),
        }
    }

    fn intent(&self, requested: Option<String>) -> FormResult<FormIntent> {
        self.cfg.session_intent(requested.as_deref())
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct VersionsRes {
    pub package: String,
    pub namespace: String,
    pub versions: Vec<String>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FormQuery {
    /// Requested version or range; the latest version when absent.
    pub version: Option<String>,
    /// Fail instead of falling back to the latest version.
    pub strict: Option<bool>,
    pub intent: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct FormRes {
    #[schema(value_type = Object)]
    pub form: Value,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolveReq {
    pub identifier: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub form_json: Option<Value>,
    pub intent: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntentRes {
    pub intent: String,
    pub display: Option<String>,
    pub default_page: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct IntentsRes {
    pub intents: Vec<IntentRes>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrepareReq {
    pub identifier: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub form_json: Option<Value>,
    pub intent: Option<String>,
    /// `enter`, `edit`, `view` or `embedded-view`.
    #[serde(default)]
    #[schema(value_type = String)]
    pub mode: SessionMode,
    pub patient: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub defaults: AmbientDefaults,
    /// Saved encounter being edited.
    #[schema(value_type = Option<Object>)]
    pub encounter: Option<OpenmrsEncounter>,
    /// New UI values keyed by field id.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub values: BTreeMap<String, Value>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct PrepareRes {
    #[schema(value_type = Object)]
    pub payload: Value,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        list_versions,
        get_registry_form,
        resolve_form,
        list_intents,
        prepare_encounter,
    ),
    components(schemas(
        HealthRes,
        VersionsRes,
        FormRes,
        ResolveReq,
        IntentRes,
        IntentsRes,
        PrepareReq,
        PrepareRes,
    ))
)]
pub struct ApiDoc;

/// Build the REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/registry/:package/:namespace", get(list_versions))
        .route("/registry/:package/:namespace/form", get(get_registry_form))
        .route("/forms/resolve", post(resolve_form))
        .route("/forms/prepare", post(prepare_encounter))
        .route("/forms/:identifier/intents", get(list_intents))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiError = (StatusCode, String);

fn api_error(operation: &str, err: FormError) -> ApiError {
    let status = match &err {
        FormError::PackageNotFound(_)
        | FormError::NamespaceNotFound { .. }
        | FormError::VersionNotFound(_)
        | FormError::NoVersionsAvailable { .. }
        | FormError::FormNotFound(_) => StatusCode::NOT_FOUND,
        FormError::InvalidArguments(_)
        | FormError::InvalidInput(_)
        | FormError::UnknownField(_)
        | FormError::Schema(_) => StatusCode::BAD_REQUEST,
        FormError::NotSubmittable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!("{} error: {:?}", operation, err);
        (status, "Internal error".to_string())
    } else {
        tracing::warn!("{} rejected: {}", operation, err);
        (status, err.to_string())
    }
}

fn to_json<T: Serialize>(operation: &str, value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!("{} serialization error: {:?}", operation, e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for monitoring and load balancers.
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "Forms REST API is alive".into(),
    })
}

#[utoipa::path(
    get,
    path = "/registry/{package}/{namespace}",
    params(
        ("package" = String, Path, description = "Form package"),
        ("namespace" = String, Path, description = "Form namespace within the package")
    ),
    responses(
        (status = 200, description = "Stored versions", body = VersionsRes),
        (status = 404, description = "Unknown package or namespace")
    )
)]
/// List the stored versions of a packaged form.
async fn list_versions(
    State(state): State<AppState>,
    Path((package, namespace)): Path<(String, String)>,
) -> Result<Json<VersionsRes>, ApiError> {
    let forms = state
        .registry
        .lookup_forms(&package, &namespace)
        .map_err(|e| api_error("List versions", e))?;
    Ok(Json(VersionsRes {
        package,
        namespace,
        versions: forms.into_iter().map(|form| form.version).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/registry/{package}/{namespace}/form",
    params(
        ("package" = String, Path, description = "Form package"),
        ("namespace" = String, Path, description = "Form namespace within the package"),
        FormQuery
    ),
    responses(
        (status = 200, description = "Selected version with sub-forms and intent applied", body = FormRes),
        (status = 404, description = "Unknown form or version")
    )
)]
/// Fetch a packaged form by version and apply an intent to it.
///
/// `strict` defaults to the server's configured version policy.
async fn get_registry_form(
    State(state): State<AppState>,
    Path((package, namespace)): Path<(String, String)>,
    Query(query): Query<FormQuery>,
) -> Result<Json<FormRes>, ApiError> {
    let strict = query.strict.unwrap_or(state.cfg.strict_versions());
    let schema = state
        .registry
        .get_form(&package, &namespace, query.version.as_deref(), strict)
        .map_err(|e| api_error("Get registry form", e))?;

    let intent = state
        .intent(query.intent)
        .map_err(|e| api_error("Get registry form", e))?;
    let schema = forms_core::apply_form_intent(&intent, &schema, &[]);
    Ok(Json(FormRes {
        form: to_json("Get registry form", &schema)?,
    }))
}

#[utoipa::path(
    post,
    path = "/forms/resolve",
    request_body = ResolveReq,
    responses(
        (status = 200, description = "Resolved form", body = FormRes),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Form not found"),
        (status = 500, description = "Internal server error")
    )
)]
/// Resolve a form by identifier, or from raw JSON, and apply an intent.
async fn resolve_form(
    State(state): State<AppState>,
    Json(req): Json<ResolveReq>,
) -> Result<Json<FormRes>, ApiError> {
    let intent = state
        .intent(req.intent)
        .map_err(|e| api_error("Resolve form", e))?;
    let schema = state
        .loader
        .load_form_json(req.identifier.as_deref(), req.form_json, &intent)
        .await
        .map_err(|e| api_error("Resolve form", e))?;
    Ok(Json(FormRes {
        form: to_json("Resolve form", &schema)?,
    }))
}

#[utoipa::path(
    get,
    path = "/forms/{identifier}/intents",
    params(
        ("identifier" = String, Path, description = "Form uuid or name")
    ),
    responses(
        (status = 200, description = "Intents declared by the form", body = IntentsRes),
        (status = 404, description = "Form not found")
    )
)]
/// List the intents a form declares.
async fn list_intents(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<IntentsRes>, ApiError> {
    let schema = state
        .loader
        .load_form_json(Some(&identifier), None, &FormIntent::default())
        .await
        .map_err(|e| api_error("List intents", e))?;

    let intents = schema
        .available_intents
        .into_iter()
        .map(|descriptor| IntentRes {
            intent: descriptor.intent,
            display: descriptor.display,
            default_page: descriptor.default_page,
        })
        .collect();
    Ok(Json(IntentsRes { intents }))
}

#[utoipa::path(
    post,
    path = "/forms/prepare",
    request_body = PrepareReq,
    responses(
        (status = 200, description = "Encounter payload ready to save", body = PrepareRes),
        (status = 400, description = "Bad request"),
        (status = 422, description = "Form has validation errors"),
        (status = 500, description = "Internal server error")
    )
)]
/// Dry-run a submission: hydrate from `encounter`, apply `values` and build the save payload.
///
/// Nothing is sent to the EMR; the payload is returned to the caller.
async fn prepare_encounter(
    State(state): State<AppState>,
    Json(req): Json<PrepareReq>,
) -> Result<Json<PrepareRes>, ApiError> {
    let intent = state
        .intent(req.intent)
        .map_err(|e| api_error("Prepare encounter", e))?;
    let schema = state
        .loader
        .load_form_json(req.identifier.as_deref(), req.form_json, &intent)
        .await
        .map_err(|e| api_error("Prepare encounter", e))?;

    let mut ctx = EncounterContext::new(schema.name.clone(), req.mode).with_defaults(req.defaults);
    if let Some(patient) = req.patient {
        ctx = ctx.with_patient(patient);
    }

    let mut session = FormSession::new(schema, ctx);
    session.hydrate(req.encounter);
    for (field_id, value) in req.values {
        session
            .set_value(&field_id, value)
            .map_err(|e| api_error("Prepare encounter", e))?;
    }
    let payload = session
        .prepare()
        .map_err(|e| api_error("Prepare encounter", e))?;

    Ok(Json(PrepareRes {
        payload: to_json("Prepare encounter", &payload)?,
    }))
}
