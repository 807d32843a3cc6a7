use crate::config::{HighsOptions, ModelOptions, OptimizerConfig, ServerConfig, SolveOptions};
use crate::data::Schedule;
use crate::error::ScheduleError;
use crate::objectives::ObjectiveRegistry;
use crate::scheduler::{ObjectiveSummary, Scheduler};
use crate::solver::HighsBackend;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;

/// One objective of a request, looked up by name in the objective registry.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectiveRequest {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingInput {
    pub rooms: Vec<Value>,
    pub courses: Vec<Value>,
    pub time_slots: Vec<Value>,
    pub instructors: Vec<Value>,
    /// Highest priority first.
    #[serde(default)]
    pub objectives: Vec<ObjectiveRequest>,
    pub options: SolveOptions,
    /// Room turnover and course-type room restrictions.
    #[serde(default)]
    pub model: ModelOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingOutput {
    pub sessions: Schedule,
    pub objectives: Vec<ObjectiveSummary>,
}

#[derive(Clone)]
struct AppState {
    objectives: Arc<ObjectiveRegistry>,
    highs: HighsOptions,
}

/// Runs one complete request. Blocking; call from a blocking-capable thread.
pub fn solve(
    input: SchedulingInput,
    objectives: &ObjectiveRegistry,
    highs: HighsOptions,
) -> Result<SchedulingOutput, ScheduleError> {
    let config = OptimizerConfig::try_from(input.options)?;
    let ranked = input
        .objectives
        .iter()
        .map(|o| objectives.construct(&o.name, &o.params))
        .collect::<Result<Vec<_>, _>>()?;

    let mut scheduler =
        Scheduler::new(HighsBackend::new(highs), config).with_model_options(input.model);
    let registry = scheduler.registry_mut();
    registry.load_room_records(input.rooms)?;
    registry.load_time_slot_records(input.time_slots)?;
    registry.load_instructor_records(input.instructors)?;
    registry.load_course_records(input.courses)?;

    let sessions = scheduler.lexicographic_optimize(&ranked)?;
    let objectives = scheduler
        .report()
        .map(|report| report.objectives.clone())
        .unwrap_or_default();
    Ok(SchedulingOutput {
        sessions,
        objectives,
    })
}

fn status_code(error: &ScheduleError) -> StatusCode {
    match error {
        ScheduleError::Validation(_) | ScheduleError::Objective(_) | ScheduleError::Config(_) => {
            StatusCode::BAD_REQUEST
        }
        ScheduleError::InfeasibleModel { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ScheduleError::SolverTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ScheduleError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ScheduleError::LexicographicConflict { .. }
        | ScheduleError::SolverUnbounded { .. }
        | ScheduleError::Backend(_)
        | ScheduleError::Extraction(_)
        | ScheduleError::NoSchedule
        | ScheduleError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn solve_handler(
    State(state): State<AppState>,
    Json(input): Json<SchedulingInput>,
) -> Result<Json<SchedulingOutput>, (StatusCode, String)> {
    let result = tokio::task::spawn_blocking(move || solve(input, &state.objectives, state.highs))
        .await
        .map_err(|e| {
            error!("Solve task failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    match result {
        Ok(output) => Ok(Json(output)),
        Err(e) => Err((status_code(&e), e.to_string())),
    }
}

async fn objectives_handler(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.objectives.names().map(str::to_string).collect())
}

/// Routes of the scheduling service. Only the solve route counts towards the concurrency
/// limit.
pub fn router(config: &ServerConfig) -> Router {
    let state = AppState {
        objectives: Arc::new(ObjectiveRegistry::with_builtins()),
        highs: HighsOptions::default(),
    };
    Router::new()
        .route("/v1/schedule/solve", post(solve_handler))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrent_solves))
        .route("/v1/objectives", get(objectives_handler))
        .with_state(state)
}

pub async fn run_server(config: ServerConfig) -> std::io::Result<()> {
    let app = router(&config);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(
        "Server running at http://{} (max {} concurrent solves)",
        listener.local_addr()?,
        config.max_concurrent_solves
    );
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    fn request(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/schedule/solve")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn input() -> Value {
        json!({
            "rooms": [{"id": "R1", "capacity": 30}],
            "courses": [
                {"id": "C1", "enrollment": 20, "instructors": ["smith"]},
                {"id": "C2", "enrollment": 25, "instructors": ["jones"]}
            ],
            "timeSlots": [
                {"id": "MWF8", "days": "MWF", "start": "8:00", "end": "8:50"},
                {"id": "MWF9", "days": "MWF", "start": "9:00", "end": "9:50"},
                {"id": "TTH8", "days": "TTH", "start": "8:00", "end": "9:15"}
            ],
            "instructors": [{"id": "smith"}, {"id": "jones"}],
            "objectives": [
                {"name": "minimize_sessions_before", "params": {"cutoff": "9:00"}},
                {"name": "maximize_instructor_load_balance"}
            ],
            "options": {"pinning": {"mode": "exact"}}
        })
    }

    async fn send(body: Value) -> (StatusCode, Vec<u8>) {
        let response = router(&ServerConfig::default())
            .oneshot(request(&body))
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn solves_a_request() {
        let (status, body) = send(input()).await;
        assert_eq!(status, StatusCode::OK);
        let output: Value = serde_json::from_slice(&body).unwrap();
        let sessions = output["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 2);
        // only one session fits after the cutoff in the single room
        let early = sessions.iter().filter(|s| s["start"] == "08:00").count();
        assert_eq!(early, 1);
        assert_eq!(output["objectives"][0]["pinned"], 1.0);
        assert_eq!(output["objectives"][0]["status"], "optimal");
        assert_eq!(output["objectives"][1]["achieved"], 1.0);
    }

    #[tokio::test]
    async fn rejects_unknown_objectives() {
        let mut body = input();
        body["objectives"] = json!([{"name": "minimize_commute"}]);
        let (status, body) = send(body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&body).contains("minimize_commute"));
    }

    #[tokio::test]
    async fn reports_infeasible_input() {
        let mut body = input();
        body["rooms"] = json!([{"id": "R1", "capacity": 10}]);
        let (status, _) = send(body).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn applies_model_options() {
        let mut body = input();
        body["courses"][0]["courseType"] = json!("Lecture");
        body["model"] = json!({"avoidRooms": [{"courseType": "Lecture", "rooms": ["R1"]}]});
        let (status, body) = send(body).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(String::from_utf8_lossy(&body).contains("C1"));

        // unknown option names fail request deserialization
        let mut body = input();
        body["model"] = json!({"roomTurnover": 5});
        let (status, _) = send(body).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn rejects_missing_fields() {
        let mut body = input();
        body["rooms"] = json!([{"id": "R1"}]);
        let (status, body) = send(body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&body).contains("capacity"));
    }

    #[tokio::test]
    async fn lists_objectives() {
        let response = router(&ServerConfig::default())
            .oneshot(
                Request::builder()
                    .uri("/v1/objectives")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let names: Vec<String> = serde_json::from_slice(&bytes).unwrap();
        assert!(names.iter().any(|n| n == ObjectiveRegistry::COUNT_MATCHING));
        assert_eq!(names.len(), 8);
    }
}
