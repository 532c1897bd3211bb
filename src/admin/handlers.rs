use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::Value;

use crate::admin::AdminState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub routes: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let pipeline = state.pipeline.load();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        routes: pipeline.router().routes().len(),
    })
}

/// Global handler snapshots, in execution order.
pub async fn get_pipeline(State(state): State<AdminState>) -> Json<Value> {
    let pipeline = state.pipeline.load();
    Json(pipeline.orchestrator().global().describe())
}

/// Route snapshots, in match order.
pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<Value>> {
    let pipeline = state.pipeline.load();
    Json(pipeline.router().routes().iter().map(|r| r.snapshot()).collect())
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Value> {
    Json(state.pipeline.load().backends().snapshot())
}
