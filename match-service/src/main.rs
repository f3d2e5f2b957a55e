// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

mod config;
mod matches;
mod reaper;
mod solo;
mod store;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use armada_common::{
    AbandonRequest, AbandonResponse, Cell, FireShotRequest, JoinMatchRequest, JoinMatchResponse,
    MatchError, MatchRecord, MatchStateView, MatchSummary, PlacementResponse, Rules, ShotReport,
    Slot, SoloShotRequest, SoloShotResponse, SoloStateView, StartSoloRequest, StartSoloResponse,
    SubmitPlacementRequest, SubmitPlacementResponse,
};
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoClient;
use axum::{
    Json, Router,
    extract::{
        FromRequest, FromRequestParts, Request, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lambda_http::run as lambda_run;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::{Settings, StoreBackend},
    matches::{Clock, MatchLocks, MatchService, SystemClock},
    reaper::Reaper,
    solo::SoloSessions,
    store::{DynamoMatchStore, FileMatchStore, InMemoryMatchStore, MatchStore},
};

#[derive(Clone)]
struct AppState {
    matches: MatchService,
    solo: SoloSessions,
    reaper: Arc<Reaper>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    fn new(
        store: Arc<dyn MatchStore>,
        rules: Rules,
        clock: Arc<dyn Clock>,
        settings: &Settings,
    ) -> Self {
        let rules = Arc::new(rules);
        let locks = MatchLocks::default();
        let solo = SoloSessions::new(rules.clone());
        let reaper = Arc::new(Reaper::new(
            store.clone(),
            locks.clone(),
            solo.clone(),
            settings.reaper_cadence,
            settings.inactivity_threshold,
        ));
        Self {
            matches: MatchService::new(store, locks, rules, clock.clone(), settings.save_attempts),
            solo,
            reaper,
            clock,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "match_service=debug,tower_http=info".to_string()),
        )
        .init();

    let settings = Settings::from_env()?;
    info!(
        grid_size = settings.rules.grid_size,
        ships = settings.rules.ships.len(),
        "game rules loaded"
    );

    let store = build_store(&settings.backend).await?;
    let state = AppState::new(
        store,
        settings.rules.clone(),
        Arc::new(SystemClock),
        &settings,
    );
    spawn_reaper_loop(state.clone(), settings.reaper_poll);

    let app = build_router(state);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        info!("AWS Lambda runtime detected; running match-service in lambda mode");
        lambda_run(app)
            .await
            .map_err(|e| anyhow::Error::msg(format!("lambda runtime error: {e}")))?;
        return Ok(());
    }

    let bind_addr = parse_bind_addr("MATCH_SERVICE_BIND", "0.0.0.0:8080")?;
    info!(%bind_addr, "match-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_store(backend: &StoreBackend) -> anyhow::Result<Arc<dyn MatchStore>> {
    match backend {
        StoreBackend::Memory => {
            info!("using in-memory match store");
            Ok(Arc::new(InMemoryMatchStore::new()))
        }
        StoreBackend::File { dir } => {
            let store = FileMatchStore::new(dir).context("failed to open file match store")?;
            info!(dir = %store.dir().display(), "using file match store");
            Ok(Arc::new(store))
        }
        StoreBackend::Dynamo {
            table_name,
            endpoint,
        } => {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(endpoint) = endpoint {
                loader = loader.endpoint_url(endpoint);
            }
            let config = loader.load().await;
            info!(table = %table_name, "using dynamodb match store");
            Ok(Arc::new(DynamoMatchStore::new(
                DynamoClient::new(&config),
                table_name.clone(),
            )))
        }
    }
}

fn spawn_reaper_loop(state: AppState, poll: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll);
        loop {
            interval.tick().await;
            state.reaper.tick(state.clock.now()).await;
        }
    });
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/rules", get(get_rules_handler))
        .route("/v1/matches/join", post(join_match_handler))
        .route(
            "/v1/matches/{match_id}/placement",
            post(submit_placement_handler),
        )
        .route(
            "/v1/matches/{match_id}/players/{slot}/placement",
            get(get_placement_handler),
        )
        .route(
            "/v1/matches/{match_id}/players/{slot}/state",
            get(get_state_handler),
        )
        .route("/v1/matches/{match_id}/shots", post(fire_shot_handler))
        .route("/v1/matches/{match_id}/abandon", post(abandon_handler))
        .route("/v1/solo", post(start_solo_handler))
        .route("/v1/solo/{solo_id}", get(get_solo_handler))
        .route("/v1/solo/{solo_id}/shots", post(solo_shot_handler))
        .route("/internal/v1/matches", get(list_matches_handler))
        .route("/internal/v1/matches/{match_id}", get(get_match_record_handler))
        .layer(middleware::from_fn_with_state(state.clone(), reap_on_request))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

/// Gives the reaper a chance to run on every request, off the request path.
async fn reap_on_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let reaper = state.reaper.clone();
    let now = state.clock.now();
    tokio::spawn(async move {
        reaper.tick(now).await;
    });
    next.run(request).await
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "match-service"}))
}

async fn get_rules_handler(State(state): State<AppState>) -> Json<Rules> {
    Json(state.matches.rules().clone())
}

async fn join_match_handler(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<JoinMatchRequest>,
) -> Result<Json<JoinMatchResponse>, ApiError> {
    let response = state
        .matches
        .join(request.match_id.as_deref(), request.slot)
        .await?;
    Ok(Json(response))
}

async fn submit_placement_handler(
    State(state): State<AppState>,
    ApiPath(match_id): ApiPath<String>,
    ApiJson(request): ApiJson<SubmitPlacementRequest>,
) -> Result<Json<SubmitPlacementResponse>, ApiError> {
    let response = state
        .matches
        .submit_placement(&match_id, request.slot, request.placement)
        .await?;
    Ok(Json(response))
}

async fn get_placement_handler(
    State(state): State<AppState>,
    ApiPath((match_id, slot)): ApiPath<(String, Slot)>,
) -> Result<Json<PlacementResponse>, ApiError> {
    Ok(Json(state.matches.get_placement(&match_id, slot).await?))
}

async fn get_state_handler(
    State(state): State<AppState>,
    ApiPath((match_id, slot)): ApiPath<(String, Slot)>,
) -> Result<Json<MatchStateView>, ApiError> {
    Ok(Json(state.matches.get_state(&match_id, slot).await?))
}

async fn fire_shot_handler(
    State(state): State<AppState>,
    ApiPath(match_id): ApiPath<String>,
    ApiJson(request): ApiJson<FireShotRequest>,
) -> Result<Json<ShotReport>, ApiError> {
    let cell = Cell::new(request.row, request.col);
    Ok(Json(
        state
            .matches
            .fire_shot(&match_id, request.slot, cell)
            .await?,
    ))
}

async fn abandon_handler(
    State(state): State<AppState>,
    ApiPath(match_id): ApiPath<String>,
    ApiJson(request): ApiJson<AbandonRequest>,
) -> Result<Json<AbandonResponse>, ApiError> {
    Ok(Json(state.matches.abandon(&match_id, request.slot).await?))
}

async fn start_solo_handler(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<StartSoloRequest>,
) -> Result<Json<StartSoloResponse>, ApiError> {
    let response = state
        .solo
        .start(request.placement, state.clock.now())
        .await?;
    Ok(Json(response))
}

async fn get_solo_handler(
    State(state): State<AppState>,
    ApiPath(solo_id): ApiPath<String>,
) -> Result<Json<SoloStateView>, ApiError> {
    Ok(Json(state.solo.view(&solo_id, state.clock.now()).await?))
}

async fn solo_shot_handler(
    State(state): State<AppState>,
    ApiPath(solo_id): ApiPath<String>,
    ApiJson(request): ApiJson<SoloShotRequest>,
) -> Result<Json<SoloShotResponse>, ApiError> {
    let cell = Cell::new(request.row, request.col);
    let response = state
        .solo
        .fire(&solo_id, cell, state.clock.now())
        .await?;
    Ok(Json(response))
}

async fn list_matches_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<MatchSummary>>, ApiError> {
    Ok(Json(state.matches.summaries().await?))
}

async fn get_match_record_handler(
    State(state): State<AppState>,
    ApiPath(match_id): ApiPath<String>,
) -> Result<Json<MatchRecord>, ApiError> {
    Ok(Json(state.matches.record(&match_id).await?))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl From<MatchError> for ApiError {
    fn from(error: MatchError) -> Self {
        let status = match &error {
            MatchError::InvalidSession(_) => StatusCode::BAD_REQUEST,
            MatchError::NotFound(_) => StatusCode::NOT_FOUND,
            MatchError::InvalidPlacement(_) => StatusCode::UNPROCESSABLE_ENTITY,
            MatchError::NotYourTurn
            | MatchError::DuplicateShot(_)
            | MatchError::OpponentNotReady
            | MatchError::GameNotPlaying(_)
            | MatchError::PlacementLocked => StatusCode::CONFLICT,
            MatchError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            MatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let mut error = Self::from(MatchError::InvalidSession(rejection.body_text()));
        if rejection.status() == StatusCode::UNSUPPORTED_MEDIA_TYPE {
            error.status = StatusCode::UNSUPPORTED_MEDIA_TYPE;
        }
        error
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::from(MatchError::InvalidSession(rejection.body_text()))
    }
}

/// `Json` whose rejections come back as tagged `ApiError` bodies.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
struct ApiJson<T>(T);

/// `Path` whose rejections come back as tagged `ApiError` bodies.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
struct ApiPath<T>(T);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, kind = self.kind, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.kind, "message": self.message})),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matches::ManualClock;
    use armada_common::{MatchStatus, Placement, ShipSpec};
    use axum::body::to_bytes;
    use chrono::{TimeZone, Utc};

    fn settings() -> Settings {
        Settings {
            backend: StoreBackend::Memory,
            reaper_cadence: chrono::Duration::minutes(15),
            inactivity_threshold: chrono::Duration::minutes(60),
            reaper_poll: Duration::from_secs(60),
            save_attempts: 5,
            rules: small_rules(),
        }
    }

    fn small_rules() -> Rules {
        Rules {
            grid_size: 5,
            ships: vec![ShipSpec::new("frigate", 2)],
        }
    }

    fn frigate(row: u8) -> Placement {
        Placement::new().with_ship("frigate", vec![Cell::new(row, 0), Cell::new(row, 1)])
    }

    fn app_state() -> (AppState, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let settings = settings();
        let state = AppState::new(
            Arc::new(InMemoryMatchStore::new()),
            settings.rules.clone(),
            clock.clone(),
            &settings,
        );
        (state, clock)
    }

    async fn join(state: &AppState, slot: Slot) -> JoinMatchResponse {
        join_match_handler(
            State(state.clone()),
            ApiJson(JoinMatchRequest {
                slot,
                match_id: None,
            }),
        )
        .await
        .unwrap()
        .0
    }

    async fn place(state: &AppState, match_id: &str, slot: Slot, row: u8) -> SubmitPlacementResponse {
        submit_placement_handler(
            State(state.clone()),
            ApiPath(match_id.to_string()),
            ApiJson(SubmitPlacementRequest {
                slot,
                placement: frigate(row),
            }),
        )
        .await
        .unwrap()
        .0
    }

    async fn shoot(
        state: &AppState,
        match_id: &str,
        slot: Slot,
        row: u8,
        col: u8,
    ) -> Result<Json<ShotReport>, ApiError> {
        fire_shot_handler(
            State(state.clone()),
            ApiPath(match_id.to_string()),
            ApiJson(FireShotRequest { slot, row, col }),
        )
        .await
    }

    #[tokio::test]
    async fn two_players_pair_up_and_play() {
        let (state, _) = app_state();
        let host = join(&state, Slot::One).await;
        let guest = join(&state, Slot::Two).await;
        assert!(host.created);
        assert_eq!(guest.match_id, host.match_id);

        let first = place(&state, &host.match_id, Slot::One, 0).await;
        assert!(!first.both_ready);
        assert_eq!(first.status, MatchStatus::Waiting);
        let second = place(&state, &host.match_id, Slot::Two, 3).await;
        assert!(second.both_ready);
        assert_eq!(second.status, MatchStatus::Playing);

        let report = shoot(&state, &host.match_id, Slot::One, 3, 0).await.unwrap().0;
        assert!(report.hit);
        assert_eq!(report.ship.as_deref(), Some("frigate"));

        let view = get_state_handler(
            State(state.clone()),
            ApiPath((host.match_id.clone(), Slot::Two)),
        )
        .await
        .unwrap()
        .0;
        assert!(view.is_my_turn);
        assert_eq!(view.opponent_shots.len(), 1);
        assert!(view.opponent_joined && view.opponent_ready);

        let reply = shoot(&state, &host.match_id, Slot::Two, 4, 4).await.unwrap().0;
        assert!(!reply.hit);
        let last = shoot(&state, &host.match_id, Slot::One, 3, 1).await.unwrap().0;
        assert!(last.game_over);
        assert_eq!(last.sunk_ship.as_deref(), Some("frigate"));
        assert_eq!(last.winner, Some(Slot::One));
    }

    #[tokio::test]
    async fn errors_map_to_status_and_kind() {
        let (state, _) = app_state();
        let host = join(&state, Slot::One).await;

        let err = shoot(&state, &host.match_id, Slot::One, 0, 0).await.unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.kind, "GAME_NOT_PLAYING");

        let err = shoot(&state, &host.match_id, Slot::Two, 0, 0).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.kind, "INVALID_SESSION");

        let err = shoot(&state, "ZZZZZZ", Slot::One, 0, 0).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = submit_placement_handler(
            State(state.clone()),
            ApiPath(host.match_id.clone()),
            ApiJson(SubmitPlacementRequest {
                slot: Slot::One,
                placement: Placement::new(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.kind, "INVALID_PLACEMENT");
    }

    #[tokio::test]
    async fn error_body_carries_kind_and_message() {
        let response = ApiError::from(MatchError::DuplicateShot(Cell::new(2, 3))).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "DUPLICATE_SHOT");
        assert_eq!(value["message"], "already fired at (2, 3)");
    }

    #[tokio::test]
    async fn internal_errors_are_500() {
        let response =
            ApiError::from(MatchError::Internal("bot fleet could not be laid out".into()))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "INTERNAL");
    }

    #[tokio::test]
    async fn placement_is_only_returned_to_its_owner_slot() {
        let (state, _) = app_state();
        let host = join(&state, Slot::One).await;
        place(&state, &host.match_id, Slot::One, 2).await;

        let own = get_placement_handler(
            State(state.clone()),
            ApiPath((host.match_id.clone(), Slot::One)),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(own.placement, frigate(2));

        let err = get_placement_handler(
            State(state.clone()),
            ApiPath((host.match_id.clone(), Slot::Two)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, "INVALID_SESSION");
    }

    #[tokio::test]
    async fn abandon_then_join_allocates_new_match() {
        let (state, clock) = app_state();
        let host = join(&state, Slot::One).await;
        let response = abandon_handler(
            State(state.clone()),
            ApiPath(host.match_id.clone()),
            ApiJson(AbandonRequest { slot: Slot::One }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(response.status, MatchStatus::Abandoned);

        clock.advance(chrono::Duration::seconds(1));
        let rejoin = join_match_handler(
            State(state.clone()),
            ApiJson(JoinMatchRequest {
                slot: Slot::One,
                match_id: Some(host.match_id.clone()),
            }),
        )
        .await
        .unwrap()
        .0;
        assert_ne!(rejoin.match_id, host.match_id);

        let summaries = list_matches_handler(State(state.clone())).await.unwrap().0;
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].status, MatchStatus::Abandoned);
    }

    #[tokio::test]
    async fn idle_matches_are_reaped_on_tick() {
        let (state, clock) = app_state();
        let host = join(&state, Slot::One).await;

        clock.advance(chrono::Duration::minutes(61));
        let report = state.reaper.tick(clock.now()).await.unwrap();
        assert_eq!(report.deleted, vec![host.match_id.clone()]);

        let err = get_match_record_handler(State(state.clone()), ApiPath(host.match_id))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn solo_round_trip_through_handlers() {
        let (state, _) = app_state();
        let started = start_solo_handler(
            State(state.clone()),
            ApiJson(StartSoloRequest {
                placement: frigate(0),
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(started.status, MatchStatus::Playing);

        let response = solo_shot_handler(
            State(state.clone()),
            ApiPath(started.solo_id.clone()),
            ApiJson(SoloShotRequest { row: 4, col: 4 }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(response.player_shot.row, 4);

        let view = get_solo_handler(State(state.clone()), ApiPath(started.solo_id))
            .await
            .unwrap()
            .0;
        assert_eq!(view.my_shots.len(), 1);
        assert_eq!(view.my_placement, frigate(0));
    }

    #[tokio::test]
    async fn rules_endpoint_reports_active_fleet() {
        let (state, _) = app_state();
        let rules = get_rules_handler(State(state)).await.0;
        assert_eq!(rules, small_rules());
    }

    async fn send_raw(state: AppState, request: String) -> (u16, serde_json::Value) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(state);
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        let status = raw.split_whitespace().nth(1).unwrap().parse().unwrap();
        let body = raw.split("\r\n\r\n").nth(1).unwrap();
        (status, serde_json::from_str(body).unwrap())
    }

    fn post(uri: &str, body: &str) -> String {
        format!(
            "POST {uri} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[tokio::test]
    async fn malformed_requests_get_tagged_error_bodies() {
        let (state, _) = app_state();
        let host = join(&state, Slot::One).await;

        let (status, body) = send_raw(state.clone(), post("/v1/matches/join", r#"{"slot":3}"#)).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "INVALID_SESSION");
        assert!(body["message"].is_string());

        let shot = r#"{"slot":1,"row":300,"col":0}"#;
        let uri = format!("/v1/matches/{}/shots", host.match_id);
        let (status, body) = send_raw(state.clone(), post(&uri, shot)).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "INVALID_SESSION");

        let request = format!(
            "GET /v1/matches/{}/players/7/state HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            host.match_id
        );
        let (status, body) = send_raw(state, request).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "INVALID_SESSION");
    }
}
