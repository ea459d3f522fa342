use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::container_management::types::ContainerBinding;
use crate::file_management::command_tracker::CommandTracker;
use crate::session_management::messages::ServerEvent;
use crate::session_management::session::UserSession;
use crate::session_management::ConnectionState;
use crate::storage::types::UserId;
use crate::terminal_management::types::ConnectionId;

/// Outbound half of a connection: frames queued here are written to the socket in order.
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

struct Connection {
    session: UserSession,
    outbound: Outbound,
    port_poll: Option<JoinHandle<()>>,
    trackers: HashMap<String, CommandTracker>,
}

/// What is left of a connection once it is removed from the registry.
pub struct ClosedConnection {
    pub session: UserSession,
    pub port_poll: Option<JoinHandle<()>>,
}

/// Live connections by connection id.
///
/// Every operation is a short map access, so one lock for the whole table is enough.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashMap<ConnectionId, Connection>) -> R) -> R {
        let mut connections = self.connections.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut connections)
    }

    pub fn register(&self, session: UserSession, outbound: Outbound) {
        debug!(
            "Registering connection {} for user {}",
            session.connection_id, session.user_id
        );
        self.with(|c| {
            c.insert(
                session.connection_id.clone(),
                Connection {
                    session,
                    outbound,
                    port_poll: None,
                    trackers: HashMap::new(),
                },
            )
        });
    }

    pub fn set_state(&self, connection_id: &ConnectionId, state: ConnectionState) -> bool {
        self.with(|c| match c.get_mut(connection_id) {
            Some(conn) => {
                debug!(
                    "Connection {}: {:?} -> {:?}",
                    connection_id, conn.session.state, state
                );
                conn.session.state = state;
                true
            }
            None => false,
        })
    }

    pub fn bind_container(&self, connection_id: &ConnectionId, binding: &ContainerBinding) -> bool {
        self.with(|c| match c.get_mut(connection_id) {
            Some(conn) => {
                conn.session.bind(binding);
                true
            }
            None => false,
        })
    }

    /// Attaches the port poll task. Returns the handle back if the connection is gone,
    /// so the caller can stop it.
    pub fn set_port_poll(
        &self,
        connection_id: &ConnectionId,
        handle: JoinHandle<()>,
    ) -> Result<(), JoinHandle<()>> {
        self.with(|c| match c.get_mut(connection_id) {
            Some(conn) => {
                if let Some(previous) = conn.port_poll.replace(handle) {
                    previous.abort();
                }
                Ok(())
            }
            None => Err(handle),
        })
    }

    pub fn session(&self, connection_id: &ConnectionId) -> Option<UserSession> {
        self.with(|c| c.get(connection_id).map(|conn| conn.session.clone()))
    }

    /// Queues a frame for one connection. False when it is gone or its socket closed.
    pub fn send(&self, connection_id: &ConnectionId, event: ServerEvent) -> bool {
        self.with(|c| match c.get(connection_id) {
            Some(conn) => conn.outbound.send(event).is_ok(),
            None => false,
        })
    }

    /// Queues a frame for every connection of a user; returns how many got it.
    pub fn broadcast(&self, user_id: &UserId, event: &ServerEvent) -> usize {
        self.with(|c| {
            c.values()
                .filter(|conn| &conn.session.user_id == user_id)
                .filter(|conn| conn.outbound.send(event.clone()).is_ok())
                .count()
        })
    }

    /// A connection of the user whose container is ready, oldest first.
    pub fn ready_session_for(&self, user_id: &UserId) -> Option<UserSession> {
        self.with(|c| {
            c.values()
                .filter(|conn| &conn.session.user_id == user_id && conn.session.binding().is_some())
                .min_by_key(|conn| conn.session.connected_at)
                .map(|conn| conn.session.clone())
        })
    }

    /// Feeds user keystrokes to the terminal's command tracker and returns completed commands.
    pub fn track_input(&self, connection_id: &ConnectionId, terminal_id: &str, input: &str) -> Vec<String> {
        self.with(|c| match c.get_mut(connection_id) {
            Some(conn) => conn
                .trackers
                .entry(terminal_id.to_string())
                .or_default()
                .feed(input),
            None => Vec::new(),
        })
    }

    pub fn forget_terminal(&self, connection_id: &ConnectionId, terminal_id: &str) {
        self.with(|c| {
            if let Some(conn) = c.get_mut(connection_id) {
                conn.trackers.remove(terminal_id);
            }
        });
    }

    pub fn remove(&self, connection_id: &ConnectionId) -> Option<ClosedConnection> {
        self.with(|c| c.remove(connection_id)).map(|conn| ClosedConnection {
            session: conn.session,
            port_poll: conn.port_poll,
        })
    }

    pub fn count(&self) -> usize {
        self.with(|c| c.len())
    }

    pub fn connections_of(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.with(|c| {
            c.values()
                .filter(|conn| &conn.session.user_id == user_id)
                .map(|conn| conn.session.connection_id.clone())
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn register(registry: &ConnectionRegistry, conn: &str, user: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(UserSession::new(ConnectionId::new(conn), UserId::new(user)), tx);
        rx
    }

    fn closed(id: &str) -> ServerEvent {
        ServerEvent::TerminalClosed {
            terminal_id: id.to_string(),
        }
    }

    #[test]
    fn send_reaches_only_the_addressed_connection() {
        let registry = ConnectionRegistry::new();
        let mut a = register(&registry, "a", "u1");
        let mut b = register(&registry, "b", "u1");

        assert!(registry.send(&ConnectionId::new("a"), closed("t1")));
        assert_eq!(a.try_recv().unwrap(), closed("t1"));
        assert!(b.try_recv().is_err());
        assert!(!registry.send(&ConnectionId::new("ghost"), closed("t1")));
    }

    #[test]
    fn broadcast_targets_every_connection_of_the_user() {
        let registry = ConnectionRegistry::new();
        let mut a = register(&registry, "a", "u1");
        let mut b = register(&registry, "b", "u1");
        let mut c = register(&registry, "c", "u2");

        assert_eq!(registry.broadcast(&UserId::new("u1"), &closed("x")), 2);
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
        assert!(c.try_recv().is_err());
    }

    #[test]
    fn ready_session_requires_a_bound_container() {
        let registry = ConnectionRegistry::new();
        let _rx = register(&registry, "a", "u1");
        let user = UserId::new("u1");
        assert!(registry.ready_session_for(&user).is_none());

        let binding = ContainerBinding {
            container_name: "user_u1".to_string(),
            workspace_dir: PathBuf::from("/srv/tmp/user_u1"),
        };
        assert!(registry.bind_container(&ConnectionId::new("a"), &binding));
        assert_eq!(
            registry.ready_session_for(&user).and_then(|s| s.binding()),
            Some(binding)
        );
    }

    #[test]
    fn trackers_are_per_terminal() {
        let registry = ConnectionRegistry::new();
        let _rx = register(&registry, "a", "u1");
        let conn = ConnectionId::new("a");

        assert!(registry.track_input(&conn, "default", "touch a").is_empty());
        assert!(registry.track_input(&conn, "t1", "ls").is_empty());
        assert_eq!(registry.track_input(&conn, "default", "\r"), vec!["touch a"]);

        registry.forget_terminal(&conn, "t1");
        assert!(registry.track_input(&conn, "t1", "\r").is_empty());
    }

    #[tokio::test]
    async fn remove_hands_back_the_poll_task() {
        let registry = ConnectionRegistry::new();
        let _rx = register(&registry, "a", "u1");
        let conn = ConnectionId::new("a");
        let handle = tokio::spawn(std::future::pending::<()>());
        assert!(registry.set_port_poll(&conn, handle).is_ok());
        registry.set_state(&conn, ConnectionState::Active);

        let closed = registry.remove(&conn).unwrap();
        assert_eq!(closed.session.state, ConnectionState::Active);
        let poll = closed.port_poll.unwrap();
        poll.abort();
        assert!(poll.await.unwrap_err().is_cancelled());

        assert_eq!(registry.count(), 0);
        let late = tokio::spawn(async {});
        assert!(registry.set_port_poll(&conn, late).is_err());
    }
}
