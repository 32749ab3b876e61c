//! Who is reachable right now, and through which socket, partitioned by group.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use saathi_proto::{GroupId, ServerEvent, UserId};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Notify};
use uuid::Uuid;

use crate::backend::MembershipResolver;
use crate::error::RelayError;

pub type Tx = mpsc::Sender<ServerEvent>;
pub type ConnectionId = Uuid;

/// One authenticated socket. Cloning shares the outbound queue.
#[derive(Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub is_admin: bool,
    tx: Tx,
    evicted: Arc<Notify>,
}

impl Connection {
    pub fn new(user_id: UserId, is_admin: bool, tx: Tx) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            is_admin,
            tx,
            evicted: Arc::new(Notify::new()),
        }
    }

    /// Queue `event` for this socket without waiting.
    pub fn send(&self, event: ServerEvent) -> Result<(), RelayError> {
        self.tx.try_send(event).map_err(|_| RelayError::Transport)
    }

    /// Fires once the registry drops this connection for not keeping up.
    pub fn evicted(&self) -> Arc<Notify> {
        self.evicted.clone()
    }
}

struct Entry {
    conn: Connection,
    group: Option<GroupId>,
}

#[derive(Default)]
struct RegistryIndex {
    connections: HashMap<UserId, Entry>,
    groups: HashMap<GroupId, HashSet<UserId>>,
}

impl RegistryIndex {
    fn leave_groups(&mut self, user_id: UserId) {
        self.groups.retain(|_, members| {
            members.remove(&user_id);
            !members.is_empty()
        });
    }

    fn detach(&mut self, user_id: UserId) -> Option<Entry> {
        self.leave_groups(user_id);
        self.connections.remove(&user_id)
    }

    fn attach(&mut self, conn: Connection, group: Option<GroupId>) {
        let user_id = conn.user_id;
        if let Some(group) = &group {
            self.groups
                .entry(group.clone())
                .or_default()
                .insert(user_id);
        }
        self.connections.insert(user_id, Entry { conn, group });
    }
}

/// The only shared mutable state of the relay. Both maps live behind one
/// lock so they always change together.
pub struct ConnectionRegistry {
    index: Mutex<RegistryIndex>,
    resolver: Arc<dyn MembershipResolver>,
}

impl ConnectionRegistry {
    pub fn new(resolver: Arc<dyn MembershipResolver>) -> Self {
        Self {
            index: Mutex::new(RegistryIndex::default()),
            resolver,
        }
    }

    /// Index `conn` under its user's group. A user without a group stays
    /// reachable by direct send and is told why group features are off.
    /// Returns the group the connection was filed under.
    pub async fn register(&self, conn: Connection) -> Option<GroupId> {
        let group = match self.resolver.find_user_group(conn.user_id).await {
            Ok(Some(group)) => Some(group),
            Ok(None) => {
                let _ = conn.send(ServerEvent::error(RelayError::Lookup.client_message()));
                None
            }
            Err(err) => {
                log::warn!("resolving group for user {}: {err:#}", conn.user_id);
                let _ = conn.send(ServerEvent::error("Failed to resolve group"));
                None
            }
        };

        let mut index = self.index.lock().await;
        if let Some(previous) = index.detach(conn.user_id) {
            log::debug!(
                "connection {} supersedes {} for user {}",
                conn.id,
                previous.conn.id,
                conn.user_id
            );
        }
        log::info!(
            "registered user {} (connection {}) in group {:?}",
            conn.user_id,
            conn.id,
            group
        );
        index.attach(conn, group.clone());
        group
    }

    /// Drop the user's route, whichever connection it points at.
    pub async fn unregister(&self, user_id: UserId) -> bool {
        self.index.lock().await.detach(user_id).is_some()
    }

    /// Drop the user's route only if it still belongs to `connection_id`.
    pub async fn release(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut index = self.index.lock().await;
        match index.connections.get(&user_id) {
            Some(entry) if entry.conn.id == connection_id => {
                index.detach(user_id);
                log::info!("unregistered user {user_id} (connection {connection_id})");
                true
            }
            _ => false,
        }
    }

    /// Move a registered user to `group`. Returns whether the index changed.
    pub async fn rejoin(&self, user_id: UserId, group: Option<GroupId>) -> bool {
        let mut index = self.index.lock().await;
        let Some(entry) = index.detach(user_id) else {
            return false;
        };
        let changed = entry.group != group;
        if changed {
            log::info!(
                "user {user_id} moved from group {:?} to {:?}",
                entry.group,
                group
            );
        }
        index.attach(entry.conn, group);
        changed
    }

    /// Push `event` to every live member of `group`. Members whose queue is
    /// closed or full are dropped from the index. Returns how many were
    /// reached.
    pub async fn fan_out(&self, group: &str, event: &ServerEvent) -> usize {
        let mut index = self.index.lock().await;
        let Some(members) = index.groups.get(group) else {
            return 0;
        };
        let members: Vec<UserId> = members.iter().copied().collect();

        let mut delivered = 0;
        let mut stale = Vec::new();
        for user_id in members {
            let Some(entry) = index.connections.get(&user_id) else {
                stale.push((user_id, "not connected"));
                continue;
            };
            match entry.conn.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    entry.conn.evicted.notify_one();
                    stale.push((user_id, "outbound queue full"));
                }
                Err(TrySendError::Closed(_)) => stale.push((user_id, "socket closed")),
            }
        }

        for (user_id, reason) in stale {
            log::warn!("pruning user {user_id} from group {group}: {reason}");
            index.detach(user_id);
        }
        delivered
    }

    /// Best-effort push to one user. Never prunes.
    pub async fn send_direct(&self, user_id: UserId, event: ServerEvent) -> bool {
        let index = self.index.lock().await;
        match index.connections.get(&user_id) {
            Some(entry) => entry.conn.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn group_of(&self, user_id: UserId) -> Option<GroupId> {
        let index = self.index.lock().await;
        index
            .connections
            .get(&user_id)
            .and_then(|entry| entry.group.clone())
    }

    pub async fn group_size(&self, group: &str) -> usize {
        let index = self.index.lock().await;
        index.groups.get(group).map_or(0, HashSet::len)
    }

    /// Groups with at least one indexed member.
    pub async fn active_groups(&self) -> Vec<GroupId> {
        let index = self.index.lock().await;
        index
            .groups
            .iter()
            .filter(|(_, members)| !members.is_empty())
            .map(|(group, _)| group.clone())
            .collect()
    }

    pub async fn is_registered(&self, user_id: UserId) -> bool {
        self.index.lock().await.connections.contains_key(&user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.index.lock().await.connections.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use k9::assert_equal;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    pub(crate) struct FakeResolver {
        groups: StdMutex<HashMap<UserId, GroupId>>,
        broken: StdMutex<bool>,
    }

    impl FakeResolver {
        pub(crate) fn with(members: &[(UserId, &str)]) -> Arc<Self> {
            let resolver = Self::default();
            for (user, group) in members {
                resolver.set(*user, Some(group));
            }
            Arc::new(resolver)
        }

        pub(crate) fn set(&self, user_id: UserId, group: Option<&str>) {
            let mut groups = self.groups.lock().unwrap();
            match group {
                Some(group) => groups.insert(user_id, group.to_string()),
                None => groups.remove(&user_id),
            };
        }

        fn break_it(&self) {
            *self.broken.lock().unwrap() = true;
        }
    }

    #[async_trait]
    impl MembershipResolver for FakeResolver {
        async fn find_user_group(&self, user_id: UserId) -> anyhow::Result<Option<GroupId>> {
            if *self.broken.lock().unwrap() {
                anyhow::bail!("resolver offline");
            }
            Ok(self.groups.lock().unwrap().get(&user_id).cloned())
        }
    }

    pub(crate) fn connection(
        user_id: UserId,
        buffer: usize,
    ) -> (Connection, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Connection::new(user_id, false, tx), rx)
    }

    pub(crate) fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn ping() -> ServerEvent {
        ServerEvent::connected("ping")
    }

    #[tokio::test]
    async fn register_files_users_under_their_group() {
        let registry = ConnectionRegistry::new(FakeResolver::with(&[
            (1, "GR00001"),
            (2, "GR00001"),
            (3, "GR00002"),
        ]));
        let (a, mut a_rx) = connection(1, 8);
        let (b, mut b_rx) = connection(2, 8);
        let (c, mut c_rx) = connection(3, 8);

        assert_equal!(registry.register(a).await, Some("GR00001".to_string()));
        registry.register(b).await;
        registry.register(c).await;

        assert_equal!(registry.group_size("GR00001").await, 2);
        assert_equal!(registry.group_size("GR00002").await, 1);
        assert_equal!(registry.fan_out("GR00001", &ping()).await, 2);

        assert_equal!(drain(&mut a_rx), vec![ping()]);
        assert_equal!(drain(&mut b_rx), vec![ping()]);
        assert!(drain(&mut c_rx).is_empty());
    }

    #[tokio::test]
    async fn user_without_group_is_addressable_but_not_grouped() {
        let registry = ConnectionRegistry::new(FakeResolver::with(&[]));
        let (a, mut a_rx) = connection(1, 8);

        assert_equal!(registry.register(a).await, None);
        assert_equal!(
            drain(&mut a_rx),
            vec![ServerEvent::error("User not found or not in a group")]
        );
        assert!(registry.is_registered(1).await);
        assert!(registry.active_groups().await.is_empty());

        assert!(registry.send_direct(1, ping()).await);
        assert_equal!(drain(&mut a_rx), vec![ping()]);
    }

    #[tokio::test]
    async fn resolver_failure_registers_without_group() {
        let resolver = FakeResolver::with(&[(1, "GR00001")]);
        resolver.break_it();
        let registry = ConnectionRegistry::new(resolver);
        let (a, mut a_rx) = connection(1, 8);

        assert_equal!(registry.register(a).await, None);
        assert_equal!(
            drain(&mut a_rx),
            vec![ServerEvent::error("Failed to resolve group")]
        );
        assert!(registry.is_registered(1).await);
        assert_equal!(registry.group_size("GR00001").await, 0);
    }

    #[tokio::test]
    async fn newer_connection_supersedes_older_route() {
        let registry = ConnectionRegistry::new(FakeResolver::with(&[(1, "GR00001")]));
        let (old, mut old_rx) = connection(1, 8);
        let (new, mut new_rx) = connection(1, 8);
        let (old_id, new_id) = (old.id, new.id);

        registry.register(old).await;
        registry.register(new).await;

        assert_equal!(registry.connection_count().await, 1);
        assert_equal!(registry.group_size("GR00001").await, 1);
        assert_equal!(registry.fan_out("GR00001", &ping()).await, 1);
        assert!(registry.send_direct(1, ping()).await);
        assert!(drain(&mut old_rx).is_empty());
        assert_equal!(drain(&mut new_rx), vec![ping(), ping()]);

        assert!(!registry.release(1, old_id).await);
        assert!(registry.is_registered(1).await);
        assert!(registry.release(1, new_id).await);
        assert!(!registry.is_registered(1).await);
        assert_equal!(registry.group_size("GR00001").await, 0);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new(FakeResolver::with(&[(1, "GR00001")]));
        let (a, _a_rx) = connection(1, 8);
        registry.register(a).await;

        assert!(registry.unregister(1).await);
        assert!(!registry.unregister(1).await);
        assert!(!registry.send_direct(1, ping()).await);
        assert!(registry.active_groups().await.is_empty());
    }

    #[tokio::test]
    async fn fan_out_prunes_closed_sockets() {
        let registry = ConnectionRegistry::new(FakeResolver::with(&[
            (1, "GR00001"),
            (2, "GR00001"),
        ]));
        let (a, mut a_rx) = connection(1, 8);
        let (b, b_rx) = connection(2, 8);
        registry.register(a).await;
        registry.register(b).await;
        drop(b_rx);

        assert_equal!(registry.group_size("GR00001").await, 2);
        assert_equal!(registry.fan_out("GR00001", &ping()).await, 1);
        assert_equal!(registry.group_size("GR00001").await, 1);
        assert!(!registry.is_registered(2).await);
        assert_equal!(drain(&mut a_rx), vec![ping()]);
    }

    #[tokio::test]
    async fn fan_out_evicts_slow_consumers() {
        let registry = ConnectionRegistry::new(FakeResolver::with(&[
            (1, "GR00001"),
            (2, "GR00001"),
        ]));
        let (a, _a_rx) = connection(1, 8);
        let (b, _b_rx) = connection(2, 1);
        let evicted = b.evicted();
        registry.register(a).await;
        registry.register(b).await;

        assert!(registry.send_direct(2, ping()).await);
        assert_equal!(registry.fan_out("GR00001", &ping()).await, 1);
        assert!(!registry.is_registered(2).await);
        assert!(tokio::time::timeout(Duration::from_secs(1), evicted.notified())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn send_direct_never_prunes() {
        let registry = ConnectionRegistry::new(FakeResolver::with(&[(1, "GR00001")]));
        let (a, a_rx) = connection(1, 8);
        registry.register(a).await;
        drop(a_rx);

        assert!(!registry.send_direct(1, ping()).await);
        assert!(registry.is_registered(1).await);
    }

    #[tokio::test]
    async fn rejoin_moves_user_between_groups() {
        let registry = ConnectionRegistry::new(FakeResolver::with(&[(1, "GR00001")]));
        let (a, _a_rx) = connection(1, 8);
        registry.register(a).await;

        assert!(!registry.rejoin(1, Some("GR00001".to_string())).await);
        assert!(registry.rejoin(1, Some("GR00002".to_string())).await);
        assert_equal!(registry.group_of(1).await, Some("GR00002".to_string()));
        assert_equal!(registry.group_size("GR00001").await, 0);
        assert_equal!(registry.group_size("GR00002").await, 1);

        assert!(registry.rejoin(1, None).await);
        assert!(registry.active_groups().await.is_empty());
        assert!(registry.is_registered(1).await);

        assert!(!registry.rejoin(42, Some("GR00001".to_string())).await);
    }
}
