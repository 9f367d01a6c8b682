//! Route handlers.

use super::{ApiError, ApiResult, AppState, STEP_UP_HEADER};
use crate::auth::{role_allows, Actor, Permission, StepUpToken};
use crate::error::WardenError;
use crate::evidence::{CustodyView, NewEvidence};
use crate::governance::DeleteRequest;
use crate::jobs::{JobHandle, JobStatus, Task};
use crate::package::signing::encode_public_key;
use crate::package::{EvidenceFilter, SigningKey};
use crate::policy::{FamilyPolicy, LegalHold, PolicyUpdate};
use crate::types::EvidenceItem;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

fn require(actor: &Actor, permission: Permission) -> Result<(), ApiError> {
    if role_allows(actor.role, permission) {
        Ok(())
    } else {
        Err(WardenError::Forbidden(format!("role {:?} lacks {:?}", actor.role, permission)).into())
    }
}

// Evidence

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(flatten)]
    pub evidence: NewEvidence,
    /// Base64-encoded evidence bytes.
    pub content: String,
}

pub async fn ingest_evidence(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<EvidenceItem>)> {
    let mut new = request.evidence;
    new.bytes = STANDARD.decode(request.content.as_bytes()).map_err(|e| {
        WardenError::Validation(format!("content is not valid base64: {}", e))
    })?;
    let item = state.warden.evidence.ingest(new, &actor).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn get_evidence(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(evidence_id): Path<String>,
) -> ApiResult<Json<EvidenceItem>> {
    Ok(Json(state.warden.evidence.get(&evidence_id, &actor).await?))
}

pub async fn view_evidence(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(evidence_id): Path<String>,
) -> ApiResult<Response> {
    let (item, bytes) = state.warden.evidence.view(&evidence_id, &actor).await?;
    Ok(([(header::CONTENT_TYPE, item.content_type)], bytes).into_response())
}

pub async fn get_custody(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(evidence_id): Path<String>,
) -> ApiResult<Json<CustodyView>> {
    Ok(Json(state.warden.evidence.custody(&evidence_id, &actor).await?))
}

// Packages and jobs

pub async fn create_package(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(family_id): Path<String>,
    Json(filter): Json<EvidenceFilter>,
) -> ApiResult<(StatusCode, Json<JobHandle>)> {
    actor.authorize(Permission::ExportPackage, &family_id)?;
    filter.validate()?;

    let handle = state.jobs.submit(Task::BuildPackage {
        family_id: family_id.clone(),
        filter,
        actor: actor.clone(),
    })?;
    info!(family_id = %family_id, job_id = %handle.job_id, actor = %actor.id, "Queued package build");
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    let task = state.jobs.task(&job_id)?;
    actor.authorize(Permission::ViewEvidence, task.family_id())?;
    Ok(Json(state.jobs.status(&job_id)?))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    let task = state.jobs.task(&job_id)?;
    let permission = match &task {
        Task::BuildPackage { .. } => Permission::ExportPackage,
        Task::PurgeFamily { .. } => Permission::PurgeEvidence,
    };
    actor.authorize(permission, task.family_id())?;
    Ok(Json(state.jobs.cancel(&job_id)?))
}

// Policy and holds

pub async fn get_policy(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(family_id): Path<String>,
) -> ApiResult<Json<FamilyPolicy>> {
    actor.authorize(Permission::ViewEvidence, &family_id)?;
    Ok(Json(state.warden.policies.get_policy(&family_id).await))
}

pub async fn put_policy(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(family_id): Path<String>,
    Json(update): Json<PolicyUpdate>,
) -> ApiResult<Json<FamilyPolicy>> {
    Ok(Json(
        state
            .warden
            .policies
            .set_policy(&family_id, update, &actor)
            .await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListHoldsQuery {
    #[serde(default)]
    pub include_released: bool,
}

pub async fn list_holds(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(family_id): Path<String>,
    Query(query): Query<ListHoldsQuery>,
) -> ApiResult<Json<Vec<LegalHold>>> {
    actor.authorize(Permission::ViewEvidence, &family_id)?;
    Ok(Json(
        state
            .warden
            .holds
            .list_holds(&family_id, query.include_released)
            .await,
    ))
}

#[derive(Debug, Deserialize)]
pub struct CreateHoldRequest {
    pub incident_id: Option<String>,
    pub reason: String,
}

pub async fn create_hold(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(family_id): Path<String>,
    Json(request): Json<CreateHoldRequest>,
) -> ApiResult<(StatusCode, Json<LegalHold>)> {
    let hold = state
        .warden
        .holds
        .create_hold(&family_id, request.incident_id.as_deref(), &request.reason, &actor)
        .await?;
    Ok((StatusCode::CREATED, Json(hold)))
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

pub async fn release_hold(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(hold_id): Path<String>,
    Json(request): Json<ReasonRequest>,
) -> ApiResult<Json<LegalHold>> {
    Ok(Json(
        state
            .warden
            .holds
            .release_hold(&hold_id, &request.reason, &actor)
            .await?,
    ))
}

// Deletion governance

#[derive(Debug, Deserialize)]
pub struct CreateDeleteRequest {
    pub evidence_id: String,
    pub reason: String,
}

pub async fn create_delete_request(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<CreateDeleteRequest>,
) -> ApiResult<(StatusCode, Json<DeleteRequest>)> {
    let created = state
        .warden
        .governance
        .request_delete(&request.evidence_id, &request.reason, &actor)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_delete_requests(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(family_id): Path<String>,
) -> ApiResult<Json<Vec<DeleteRequest>>> {
    actor.authorize(Permission::ViewEvidence, &family_id)?;
    Ok(Json(state.warden.governance.list(&family_id).await))
}

pub async fn get_delete_request(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<DeleteRequest>> {
    let request = state.warden.governance.get(&request_id).await?;
    actor.authorize(Permission::ViewEvidence, &request.family_id)?;
    Ok(Json(request))
}

pub async fn approve_delete_request(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<DeleteRequest>> {
    Ok(Json(state.warden.governance.approve(&request_id, &actor).await?))
}

pub async fn reject_delete_request(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<DeleteRequest>> {
    Ok(Json(state.warden.governance.reject(&request_id, &actor).await?))
}

pub async fn execute_delete_request(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<DeleteRequest>> {
    let token = headers
        .get(STEP_UP_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    Ok(Json(
        state
            .warden
            .governance
            .execute(&request_id, token, &actor)
            .await?,
    ))
}

// Step-up

#[derive(Debug, Deserialize)]
pub struct StepUpRequest {
    pub secret: String,
}

pub async fn step_up(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<StepUpRequest>,
) -> ApiResult<Json<StepUpToken>> {
    Ok(Json(state.warden.step_up.verify_step_up(&actor, &request.secret)?))
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub secret: String,
    /// Required when a secret is already enrolled.
    pub current_secret: Option<String>,
}

pub async fn enroll_step_up(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<EnrollRequest>,
) -> ApiResult<StatusCode> {
    let step_up = &state.warden.step_up;
    match request.current_secret.as_deref() {
        Some(current) => step_up.change_secret(&actor.id, current, &request.secret)?,
        None => step_up.enroll(&actor.id, &request.secret)?,
    }
    Ok(StatusCode::NO_CONTENT)
}

// Keys

#[derive(Debug, Serialize)]
pub struct SigningKeyInfo {
    pub key_id: String,
    /// Base64 raw Ed25519 public key.
    pub public_key: String,
}

impl From<&SigningKey> for SigningKeyInfo {
    fn from(key: &SigningKey) -> Self {
        Self {
            key_id: key.key_id().to_string(),
            public_key: encode_public_key(&key.public_key()),
        }
    }
}

pub async fn get_signing_key(State(state): State<AppState>) -> Json<SigningKeyInfo> {
    Json(SigningKeyInfo::from(&state.warden.keyring.active()))
}

pub async fn stage_signing_key(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<SigningKeyInfo>> {
    require(&actor, Permission::RotateKeys)?;
    let staged = state.warden.keyring.stage_next()?;
    Ok(Json(SigningKeyInfo::from(&staged)))
}

pub async fn commit_signing_key(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<SigningKeyInfo>> {
    require(&actor, Permission::RotateKeys)?;
    let active = state.warden.keyring.commit()?;
    info!(key_id = active.key_id(), actor = %actor.id, "Signing key rotated");
    Ok(Json(SigningKeyInfo::from(&active)))
}

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub device_id: String,
}

/// Key material handed to a device.
#[derive(Debug, Serialize)]
pub struct DeviceKeyGrant {
    pub device_id: String,
    pub key_version: u32,
    /// Base64 shared key.
    pub shared_key: String,
}

#[derive(Debug, Serialize)]
pub struct DeviceKeyStatus {
    pub device_id: String,
    pub key_version: u32,
    pub staged_version: Option<u32>,
    pub rotated_at: Option<DateTime<Utc>>,
}

pub async fn register_device(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<RegisterDeviceRequest>,
) -> ApiResult<(StatusCode, Json<DeviceKeyGrant>)> {
    require(&actor, Permission::RotateKeys)?;
    let device = state.warden.devices.register_device(&request.device_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(DeviceKeyGrant {
            device_id: device.device_id,
            key_version: device.key_version,
            shared_key: STANDARD.encode(&device.shared_key),
        }),
    ))
}

pub async fn stage_device_key(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<DeviceKeyGrant>> {
    require(&actor, Permission::RotateKeys)?;
    let staged = state.warden.devices.stage_next_key(&device_id).await?;
    Ok(Json(DeviceKeyGrant {
        device_id,
        key_version: staged.version,
        shared_key: STANDARD.encode(&staged.key),
    }))
}

pub async fn commit_device_key(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<DeviceKeyStatus>> {
    require(&actor, Permission::RotateKeys)?;
    let device = state.warden.devices.commit_rotated_key(&device_id).await?;
    Ok(Json(DeviceKeyStatus {
        device_id: device.device_id,
        key_version: device.key_version,
        staged_version: device.staged.map(|s| s.version),
        rotated_at: device.rotated_at,
    }))
}

pub async fn discard_device_key(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(device_id): Path<String>,
) -> ApiResult<StatusCode> {
    require(&actor, Permission::RotateKeys)?;
    state.warden.devices.discard_staged(&device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
