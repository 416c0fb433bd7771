use crate::authenticate::{AuthApp, LoginPayload, SessionInfo};
use crate::booker::BookingApp;
use crate::error::AppError;
use crate::model::Room;
use aide::axum::routing::{delete, get, post};
use aide::axum::ApiRouter;
use aide::openapi::{Info, OpenApi};
use aide::redoc::Redoc;
use anyhow::anyhow;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::{Extension, Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

pub type AppState = (Arc<BookingApp>, Arc<RwLock<AuthApp>>);

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NewReservation {
    /// `YYYY-MM-DD`, read as UTC.
    pub date: String,
    /// `HH:MM`, read as UTC.
    pub time: String,
    /// Minutes; a positive multiple of 30.
    pub duration: i64,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct Ack {
    pub success: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RoomView {
    pub id: u32,
    pub name: String,
    pub description: Option<String>,
    pub capacity: Option<u32>,
    /// Pre-rendered, correctly pluralized ("1 person" / "4 people").
    pub capacity_label: Option<String>,
}

impl From<Room> for RoomView {
    fn from(room: Room) -> Self {
        let name = room.display_name();
        let capacity_label = room.capacity_label();
        Self {
            id: room.id,
            name,
            description: room.description,
            capacity: room.capacity,
            capacity_label,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ScheduleEntry {
    pub id: u64,
    pub room_id: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_own_reservation: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct BookedEntry {
    pub id: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub room: RoomView,
}

// ── Booking handlers ─────────────────────────────────────────────

async fn list_rooms(State((booker, _)): State<AppState>) -> Json<Vec<RoomView>> {
    Json(booker.rooms().into_iter().map(RoomView::from).collect())
}

async fn room_details(
    State((booker, _)): State<AppState>,
    Path(room_id): Path<u32>,
) -> Result<Json<RoomView>, AppError> {
    booker.room(room_id).map(RoomView::from).map(Json)
}

async fn room_schedule(
    State((booker, auth)): State<AppState>,
    cookies: CookieJar,
    Path(room_id): Path<u32>,
) -> Result<Json<Vec<ScheduleEntry>>, AppError> {
    // Anonymous viewers may look at the schedule; they just own nothing.
    let viewer = auth
        .read()
        .await
        .assert_login(&cookies)
        .ok()
        .map(|s| s.user_id);

    let entries = booker
        .room_schedule(room_id, Utc::now())?
        .into_iter()
        .map(|r| ScheduleEntry {
            id: r.id,
            room_id: r.room_id,
            start_time: r.start_time,
            end_time: r.end_time,
            is_own_reservation: viewer.as_deref() == Some(r.user_id.as_str()),
        })
        .collect();
    Ok(Json(entries))
}

async fn new_reservation(
    State((booker, auth)): State<AppState>,
    cookies: CookieJar,
    Path(room_id): Path<u32>,
    Json(payload): Json<NewReservation>,
) -> Result<Response, AppError> {
    let session = auth.read().await.assert_login(&cookies)?;

    booker.create_reservation(
        room_id,
        &session.user_id,
        &payload.date,
        &payload.time,
        payload.duration,
        Utc::now(),
    )?;

    Ok((StatusCode::CREATED, Json(Ack { success: true })).into_response())
}

async fn delete_reservation(
    State((booker, auth)): State<AppState>,
    cookies: CookieJar,
    Path(reservation_id): Path<u64>,
) -> Result<Json<Ack>, AppError> {
    let session = auth.read().await.assert_login(&cookies)?;
    booker.delete_reservation(reservation_id, &session.user_id)?;
    Ok(Json(Ack { success: true }))
}

async fn my_reservations(
    State((booker, auth)): State<AppState>,
    cookies: CookieJar,
) -> Result<Json<Vec<BookedEntry>>, AppError> {
    let session = auth.read().await.assert_login(&cookies)?;

    let entries = booker
        .user_reservations(&session.user_id)
        .into_iter()
        .map(|(r, room)| BookedEntry {
            id: r.id,
            start_time: r.start_time,
            end_time: r.end_time,
            created_at: r.created_at,
            room: room.into(),
        })
        .collect();
    Ok(Json(entries))
}

// ── Auth handlers ────────────────────────────────────────────────

async fn handle_login(
    State(auth): State<Arc<RwLock<AuthApp>>>,
    cookies: CookieJar,
    Json(payload): Json<LoginPayload>,
) -> Result<Response, AppError> {
    let (cookie, info) = auth
        .write()
        .await
        .authenticate_user(&payload.username, &payload.password)
        .await?;

    let cookie = Cookie::parse(cookie)
        .map_err(|e| AppError::Persistence(anyhow!("assembling session cookie: {e}")))?;
    Ok((cookies.add(cookie), Json(info)).into_response())
}

async fn check_login(
    State(auth): State<Arc<RwLock<AuthApp>>>,
    cookies: CookieJar,
) -> Result<Json<SessionInfo>, AppError> {
    auth.read().await.assert_login(&cookies).map(Json)
}

async fn handle_logout(
    State(auth): State<Arc<RwLock<AuthApp>>>,
    cookies: CookieJar,
) -> Result<Json<Ack>, AppError> {
    auth.write().await.logout(&cookies)?;
    Ok(Json(Ack { success: true }))
}

// ── Session refresh middleware ───────────────────────────────────

/// Re-issue the session cookie on every authenticated request so active
/// users never fall off an expiry cliff.
async fn refresh_session(
    State(auth): State<Arc<RwLock<AuthApp>>>,
    cookies: CookieJar,
    request: Request,
    next: Next,
) -> (CookieJar, Response) {
    trace!("{} {}", request.method(), request.uri().path());
    let response = next.run(request).await;

    let refreshed = auth
        .write()
        .await
        .refresh(&cookies)
        .ok()
        .and_then(|c| Cookie::parse(c).ok());
    match refreshed {
        Some(cookie) => (cookies.add(cookie), response),
        None => (CookieJar::new(), response),
    }
}

// ── Router assembly ──────────────────────────────────────────────

fn booking_api(state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route("/rooms", get(list_rooms))
        .api_route("/rooms/:id", get(room_details))
        .api_route(
            "/rooms/:id/reservations",
            get(room_schedule).post(new_reservation),
        )
        .api_route("/reservations/:id", delete(delete_reservation))
        .api_route("/mine", get(my_reservations))
        .with_state(state)
}

fn auth_api(auth: Arc<RwLock<AuthApp>>) -> ApiRouter {
    ApiRouter::new()
        .api_route("/login", post(handle_login).get(check_login))
        .api_route("/logout", get(handle_logout))
        .with_state(auth)
}

async fn serve_api(Extension(api): Extension<Arc<OpenApi>>) -> Json<Arc<OpenApi>> {
    Json(api)
}

pub fn router(booker: Arc<BookingApp>, auth: Arc<RwLock<AuthApp>>) -> Router {
    let mut api = OpenApi {
        info: Info {
            title: "roombook API".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Info::default()
        },
        ..OpenApi::default()
    };

    let docs_page = Redoc::new("/api.json").with_title("roombook API").html();

    ApiRouter::new()
        .nest_api_service("/api/book", booking_api((booker, auth.clone())))
        .nest_api_service("/api", auth_api(auth.clone()))
        .finish_api(&mut api)
        .route("/api.json", axum::routing::get(serve_api))
        .route(
            "/docs",
            axum::routing::get(move || async move { Html(docs_page) }),
        )
        .layer(Extension(Arc::new(api)))
        .layer(middleware::from_fn_with_state(auth, refresh_session))
}
