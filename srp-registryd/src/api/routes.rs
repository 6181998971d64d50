use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use shared::protocol::API_PREFIX;
use shared::types::{
    AddressMode, DeregistrationRequest, HostView, RegistrationRequest, RegistryState, ServiceView,
};
use srp_registry::{parse_sequence_number, LeaseConfig, RegistryError, ServiceFilter};
use crate::registry_manager::{RegistryHandle, RegistryStatus};

#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryHandle,
    pub hash_rx: watch::Receiver<String>,
    pub status_rx: watch::Receiver<RegistryStatus>,
}

#[derive(Deserialize)]
pub struct ServiceQuery {
    #[serde(rename = "type")]
    pub service_type: Option<String>,
    pub instance: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl ServiceQuery {
    fn to_filter(&self) -> ServiceFilter {
        let mut filter = ServiceFilter::any();
        if let Some(service_type) = &self.service_type {
            filter = filter.with_service_type(service_type);
        }
        if let Some(instance) = &self.instance {
            filter = filter.with_instance_name(instance);
        }
        if !self.include_deleted {
            filter = filter.active_only();
        }
        filter
    }
}

#[derive(Serialize, Deserialize)]
pub struct AddressModeBody {
    pub address_mode: AddressMode,
}

/// Wider than the stored `u8` so out-of-range values reach validation
/// instead of failing deserialization.
#[derive(Serialize, Deserialize)]
pub struct SequenceNumberBody {
    pub sequence_number: u64,
}

#[derive(Serialize, Deserialize)]
pub struct DomainBody {
    pub domain: String,
}

#[derive(Serialize, Deserialize)]
pub struct StateBody {
    pub state: RegistryState,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Registry failures become client errors; anything else is ours.
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<RegistryError>() {
            Some(RegistryError::InvalidArgs(_) | RegistryError::OrphanSubType { .. }) => {
                StatusCode::BAD_REQUEST
            }
            Some(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(RegistryError::InvalidState(_)) => StatusCode::CONFLICT,
            None => {
                tracing::error!("Request failed: {:#}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/hosts", get(get_hosts))
        .route("/services", get(get_services))
        .route("/services/hash", get(get_hash))
        .route("/register", post(register))
        .route("/deregister", post(deregister))
        .route("/lease", get(get_lease).put(put_lease))
        .route("/addrmode", get(get_address_mode).put(put_address_mode))
        .route("/seqnum", get(get_sequence_number).put(put_sequence_number))
        .route("/domain", get(get_domain).put(put_domain))
        .route("/state", get(get_state))
        .route("/enable", post(enable))
        .route("/disable", post(disable));

    Router::new().nest(API_PREFIX, v1).with_state(state)
}

async fn get_hosts(State(state): State<AppState>) -> ApiResult<Json<Vec<HostView>>> {
    Ok(Json(state.registry.hosts().await?))
}

async fn get_services(
    State(state): State<AppState>,
    Query(params): Query<ServiceQuery>,
) -> ApiResult<Json<Vec<ServiceView>>> {
    Ok(Json(state.registry.services(params.to_filter()).await?))
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.hash_rx.borrow().clone()
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegistrationRequest>,
) -> ApiResult<Json<HostView>> {
    tracing::debug!("Registration for {}", request.full_name);
    Ok(Json(state.registry.register(request).await?))
}

async fn deregister(
    State(state): State<AppState>,
    Json(request): Json<DeregistrationRequest>,
) -> ApiResult<StatusCode> {
    tracing::debug!("Deregistration for {}", request.full_name);
    state.registry.deregister(request).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_lease(State(state): State<AppState>) -> Json<LeaseConfig> {
    Json(state.status_rx.borrow().lease)
}

async fn put_lease(
    State(state): State<AppState>,
    Json(config): Json<LeaseConfig>,
) -> ApiResult<StatusCode> {
    state.registry.set_lease_config(config).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_address_mode(State(state): State<AppState>) -> Json<AddressModeBody> {
    Json(AddressModeBody {
        address_mode: state.status_rx.borrow().address_mode,
    })
}

async fn put_address_mode(
    State(state): State<AppState>,
    Json(body): Json<AddressModeBody>,
) -> ApiResult<StatusCode> {
    state.registry.set_address_mode(body.address_mode).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_sequence_number(State(state): State<AppState>) -> Json<SequenceNumberBody> {
    Json(SequenceNumberBody {
        sequence_number: state.status_rx.borrow().sequence_number.into(),
    })
}

async fn put_sequence_number(
    State(state): State<AppState>,
    Json(body): Json<SequenceNumberBody>,
) -> ApiResult<StatusCode> {
    let sequence_number = parse_sequence_number(body.sequence_number)?;
    state.registry.set_sequence_number(sequence_number).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_domain(State(state): State<AppState>) -> Json<DomainBody> {
    Json(DomainBody {
        domain: state.status_rx.borrow().domain.clone(),
    })
}

async fn put_domain(
    State(state): State<AppState>,
    Json(body): Json<DomainBody>,
) -> ApiResult<StatusCode> {
    state.registry.set_domain(body.domain).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_state(State(state): State<AppState>) -> Json<StateBody> {
    Json(StateBody {
        state: state.status_rx.borrow().state,
    })
}

async fn enable(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.registry.set_enabled(true).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disable(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.registry.set_enabled(false).await?;
    Ok(StatusCode::NO_CONTENT)
}
