use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket, Ws};
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::auth::TokenVerifier;
use super::types::*;
use crate::error_handling::types::{AuthError, SessionError};
use crate::session_management::messages::{ClientEvent, ServerEvent};
use crate::session_management::session_orchestrator::SessionOrchestrator;
use crate::storage::types::UserId;

/// Authentication failure carried through warp's rejection chain.
#[derive(Debug)]
pub struct Unauthorized(pub AuthError);

impl warp::reject::Reject for Unauthorized {}

type JsonReply = reply::WithStatus<reply::Json>;

fn json_error(message: impl Into<String>, status: StatusCode) -> JsonReply {
    reply::with_status(
        reply::json(&ApiError {
            message: message.into(),
        }),
        status,
    )
}

fn session_error(err: &SessionError) -> JsonReply {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_error(err.to_string(), status)
}

fn success() -> JsonReply {
    reply::with_status(reply::json(&SuccessResponse { success: true }), StatusCode::OK)
}

/// Extracts the authenticated user or rejects with [`Unauthorized`].
pub fn authenticated(
    verifier: Arc<TokenVerifier>,
) -> impl Filter<Extract = (UserId,), Error = Rejection> + Clone {
    warp::header::optional::<String>("cookie")
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::query::<TokenQuery>())
        .and_then(
            move |cookie: Option<String>, authorization: Option<String>, query: TokenQuery| {
                let verifier = verifier.clone();
                async move {
                    verifier
                        .authenticate(
                            cookie.as_deref(),
                            authorization.as_deref(),
                            query.token.as_deref(),
                        )
                        .map_err(|e| warp::reject::custom(Unauthorized(e)))
                }
            },
        )
}

fn with_orchestrator(
    orchestrator: Arc<SessionOrchestrator>,
) -> impl Filter<Extract = (Arc<SessionOrchestrator>,), Error = Infallible> + Clone {
    warp::any().map(move || orchestrator.clone())
}

/// GET /ws
pub fn ws_route(
    orchestrator: Arc<SessionOrchestrator>,
    verifier: Arc<TokenVerifier>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::end())
        .and(authenticated(verifier))
        .and(warp::ws())
        .and(with_orchestrator(orchestrator))
        .map(|user_id: UserId, ws: Ws, orchestrator: Arc<SessionOrchestrator>| {
            ws.on_upgrade(move |socket| run_socket(socket, user_id, orchestrator))
        })
}

/// Pumps one upgraded socket: an outbound writer task drains the connection's queue
/// while this task parses inbound frames in arrival order.
pub async fn run_socket(socket: WebSocket, user_id: UserId, orchestrator: Arc<SessionOrchestrator>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Dropping unserializable frame: {}", e);
                    continue;
                }
            };
            if sink.send(Message::text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let connection_id = orchestrator.connect(user_id, tx).await;

    while let Some(result) = stream.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                debug!("Websocket error on {}: {}", connection_id, e);
                break;
            }
        };
        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_str() else {
            continue;
        };
        match ClientEvent::parse(text) {
            Ok(event) => orchestrator.handle_event(&connection_id, event).await,
            Err(e) => warn!("Ignoring frame on {}: {}", connection_id, e),
        }
    }

    info!("Websocket {} closed", connection_id);
    orchestrator.disconnect(&connection_id).await;
}

pub async fn get_file_content(
    user_id: UserId,
    query: ContentQuery,
    orchestrator: Arc<SessionOrchestrator>,
) -> Result<JsonReply, Rejection> {
    match orchestrator.read_file(&user_id, &query.path).await {
        Ok(content) => Ok(reply::with_status(
            reply::json(&ContentResponse { content }),
            StatusCode::OK,
        )),
        Err(e) => Ok(session_error(&e)),
    }
}

pub async fn create_entry(
    user_id: UserId,
    request: CreateRequest,
    orchestrator: Arc<SessionOrchestrator>,
) -> Result<JsonReply, Rejection> {
    match orchestrator
        .create_entry(&user_id, &request.path, request.kind)
        .await
    {
        Ok(()) => Ok(success()),
        Err(e) => Ok(session_error(&e)),
    }
}

pub async fn delete_entry(
    user_id: UserId,
    request: PathRequest,
    orchestrator: Arc<SessionOrchestrator>,
) -> Result<JsonReply, Rejection> {
    match orchestrator.delete_entry(&user_id, &request.path).await {
        Ok(()) => Ok(success()),
        Err(e) => Ok(session_error(&e)),
    }
}

pub async fn rename_entry(
    user_id: UserId,
    request: RenameRequest,
    orchestrator: Arc<SessionOrchestrator>,
) -> Result<JsonReply, Rejection> {
    match orchestrator
        .rename_entry(&user_id, &request.old_path, &request.new_path)
        .await
    {
        Ok(()) => Ok(success()),
        Err(e) => Ok(session_error(&e)),
    }
}

/// Only the caller's own port state is visible; any other id reads as missing.
pub async fn get_ports(
    requested: String,
    user_id: UserId,
    orchestrator: Arc<SessionOrchestrator>,
) -> Result<JsonReply, Rejection> {
    if requested != user_id.as_str() {
        return Ok(json_error("Port information not found", StatusCode::NOT_FOUND));
    }
    match orchestrator.port_info(&user_id).await {
        Some(info) => Ok(reply::with_status(reply::json(&info), StatusCode::OK)),
        None => Ok(json_error("Port information not found", StatusCode::NOT_FOUND)),
    }
}

pub async fn get_stats(orchestrator: Arc<SessionOrchestrator>) -> Result<JsonReply, Rejection> {
    match orchestrator.container_stats().await {
        Ok(stats) => Ok(reply::with_status(
            reply::json(&StatsResponse { stats }),
            StatusCode::OK,
        )),
        Err(e) => Ok(session_error(&e)),
    }
}

pub fn health(orchestrator: &SessionOrchestrator) -> HealthResponse {
    HealthResponse {
        status: "ok".to_string(),
        active_connections: orchestrator.active_connections(),
        timestamp: chrono::Utc::now(),
    }
}

/// GET /files/content?path=
pub fn file_content_route(
    orchestrator: Arc<SessionOrchestrator>,
    verifier: Arc<TokenVerifier>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("files" / "content")
        .and(warp::get())
        .and(authenticated(verifier))
        .and(warp::query::<ContentQuery>())
        .and(with_orchestrator(orchestrator))
        .and_then(get_file_content)
}

/// POST /files/create
pub fn create_route(
    orchestrator: Arc<SessionOrchestrator>,
    verifier: Arc<TokenVerifier>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("files" / "create")
        .and(warp::post())
        .and(authenticated(verifier))
        .and(warp::body::json())
        .and(with_orchestrator(orchestrator))
        .and_then(create_entry)
}

/// POST /files/delete
pub fn delete_route(
    orchestrator: Arc<SessionOrchestrator>,
    verifier: Arc<TokenVerifier>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("files" / "delete")
        .and(warp::post())
        .and(authenticated(verifier))
        .and(warp::body::json())
        .and(with_orchestrator(orchestrator))
        .and_then(delete_entry)
}

/// POST /files/rename
pub fn rename_route(
    orchestrator: Arc<SessionOrchestrator>,
    verifier: Arc<TokenVerifier>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("files" / "rename")
        .and(warp::post())
        .and(authenticated(verifier))
        .and(warp::body::json())
        .and(with_orchestrator(orchestrator))
        .and_then(rename_entry)
}

/// GET /ports/:userId
pub fn ports_route(
    orchestrator: Arc<SessionOrchestrator>,
    verifier: Arc<TokenVerifier>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("ports" / String)
        .and(warp::get())
        .and(authenticated(verifier))
        .and(with_orchestrator(orchestrator))
        .and_then(get_ports)
}

/// GET /stats
pub fn stats_route(
    orchestrator: Arc<SessionOrchestrator>,
    verifier: Arc<TokenVerifier>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("stats")
        .and(warp::path::end())
        .and(warp::get())
        .and(authenticated(verifier))
        .and(with_orchestrator(orchestrator))
        .and_then(|_user: UserId, orchestrator: Arc<SessionOrchestrator>| get_stats(orchestrator))
}

/// GET /health, unauthenticated
pub fn health_route(
    orchestrator: Arc<SessionOrchestrator>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_orchestrator(orchestrator))
        .map(|orchestrator: Arc<SessionOrchestrator>| reply::json(&health(&orchestrator)))
}

/// Turns rejections into JSON errors; authentication failures become 401.
pub async fn handle_rejection(err: Rejection) -> Result<JsonReply, Infallible> {
    if let Some(Unauthorized(e)) = err.find::<Unauthorized>() {
        return Ok(json_error(e.to_string(), StatusCode::UNAUTHORIZED));
    }
    if err.is_not_found() {
        return Ok(json_error("Not found", StatusCode::NOT_FOUND));
    }
    if let Some(e) = err.find::<warp::body::BodyDeserializeError>() {
        return Ok(json_error(e.to_string(), StatusCode::BAD_REQUEST));
    }
    if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        return Ok(json_error(e.to_string(), StatusCode::BAD_REQUEST));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(json_error("Method not allowed", StatusCode::METHOD_NOT_ALLOWED));
    }
    warn!("Unhandled rejection: {:?}", err);
    Ok(json_error(
        "Internal server error",
        StatusCode::INTERNAL_SERVER_ERROR,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_management::types::EntryKind;
    use crate::session_management::messages::ServerEvent;
    use crate::session_management::tests::{connect, fixture, next_matching};

    fn status(reply: JsonReply) -> StatusCode {
        reply.into_response().status()
    }

    #[tokio::test]
    async fn file_endpoints_need_an_active_connection() {
        let f = fixture().await;
        let reply = get_file_content(
            UserId::new("u1"),
            ContentQuery {
                path: "/a.js".to_string(),
            },
            f.orchestrator.clone(),
        )
        .await
        .unwrap();
        assert_eq!(status(reply), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_then_read_through_handlers() {
        let f = fixture().await;
        let (_conn, mut events) = connect(&f, "u1").await;
        let user = UserId::new("u1");

        let reply = create_entry(
            user.clone(),
            CreateRequest {
                path: "/src/app.js".to_string(),
                kind: EntryKind::File,
            },
            f.orchestrator.clone(),
        )
        .await
        .unwrap();
        assert_eq!(status(reply), StatusCode::OK);

        // structural change is pushed to the user's connection
        let refresh = next_matching(&mut events, |e| match e {
            ServerEvent::FileRefresh(tree) => tree.lookup("src/app.js").is_some(),
            _ => false,
        })
        .await;
        assert!(matches!(refresh, ServerEvent::FileRefresh(_)));

        let reply = get_file_content(
            user.clone(),
            ContentQuery {
                path: "/src/app.js".to_string(),
            },
            f.orchestrator.clone(),
        )
        .await
        .unwrap();
        assert_eq!(status(reply), StatusCode::OK);

        let missing = get_file_content(
            user,
            ContentQuery {
                path: "/nope.js".to_string(),
            },
            f.orchestrator.clone(),
        )
        .await
        .unwrap();
        assert_eq!(status(missing), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn escaping_paths_are_bad_requests() {
        let f = fixture().await;
        let (_conn, _events) = connect(&f, "u1").await;

        let reply = delete_entry(
            UserId::new("u1"),
            PathRequest {
                path: "../../etc/passwd".to_string(),
            },
            f.orchestrator.clone(),
        )
        .await
        .unwrap();
        assert_eq!(status(reply), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rename_moves_the_file() {
        let f = fixture().await;
        let (_conn, _events) = connect(&f, "u1").await;
        let user = UserId::new("u1");
        let workspace = f.orchestrator.workspace_for(&user).unwrap().workspace_dir;
        std::fs::write(workspace.join("a.js"), "x").unwrap();

        let reply = rename_entry(
            user,
            RenameRequest {
                old_path: "/a.js".to_string(),
                new_path: "/b.js".to_string(),
            },
            f.orchestrator.clone(),
        )
        .await
        .unwrap();
        assert_eq!(status(reply), StatusCode::OK);
        assert!(!workspace.join("a.js").exists());
        assert_eq!(std::fs::read_to_string(workspace.join("b.js")).unwrap(), "x");
    }

    #[tokio::test]
    async fn ports_are_private_to_their_owner() {
        let f = fixture().await;
        let (_a, _ea) = connect(&f, "u1").await;
        let (_b, _eb) = connect(&f, "u2").await;

        let own = get_ports("u1".to_string(), UserId::new("u1"), f.orchestrator.clone())
            .await
            .unwrap();
        assert_eq!(status(own), StatusCode::OK);

        let other = get_ports("u2".to_string(), UserId::new("u1"), f.orchestrator.clone())
            .await
            .unwrap();
        assert_eq!(status(other), StatusCode::NOT_FOUND);

        let unknown = get_ports("u9".to_string(), UserId::new("u9"), f.orchestrator.clone())
            .await
            .unwrap();
        assert_eq!(status(unknown), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_counts_connections() {
        let f = fixture().await;
        assert_eq!(health(&f.orchestrator).active_connections, 0);
        let (_conn, _events) = connect(&f, "u1").await;
        let report = health(&f.orchestrator);
        assert_eq!(report.status, "ok");
        assert_eq!(report.active_connections, 1);
    }

    #[tokio::test]
    async fn rejections_map_to_statuses() {
        let unauthorized = handle_rejection(warp::reject::custom(Unauthorized(AuthError::MissingToken)))
            .await
            .unwrap();
        assert_eq!(status(unauthorized), StatusCode::UNAUTHORIZED);

        let missing = handle_rejection(warp::reject::not_found()).await.unwrap();
        assert_eq!(status(missing), StatusCode::NOT_FOUND);
    }
}
