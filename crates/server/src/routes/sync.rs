use axum::extract::{Path, State};
use serde::Serialize;
use uuid::Uuid;

use service::domain::{Business, Property};
use service::sync::{CycleReport, SyncStatus, SyncTrigger};

use crate::auth::CurrentActor;
use crate::errors::{ok, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SyncOutput {
    pub report: CycleReport,
    pub status: SyncStatus,
}

pub async fn status(State(state): State<AppState>, CurrentActor(actor): CurrentActor) -> ApiResult<SyncStatus> {
    let session = state.sync.attach(&actor).await?;
    ok(SyncStatus::clone(&session.status()))
}

/// Run a cycle for the caller; concurrent requests share one cycle.
pub async fn sync_now(State(state): State<AppState>, CurrentActor(actor): CurrentActor) -> ApiResult<SyncOutput> {
    let session = state.sync.attach(&actor).await?;
    let report = session.sync_now(SyncTrigger::FocusRegained).await?;
    ok(SyncOutput { report, status: SyncStatus::clone(&session.status()) })
}

pub async fn select_business(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Business> {
    let session = state.sync.attach(&actor).await?;
    ok(session.switch_business(&id).await?)
}

pub async fn select_property(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<Property> {
    let session = state.sync.attach(&actor).await?;
    ok(session.switch_property(id).await?)
}
