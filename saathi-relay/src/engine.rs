use std::sync::Arc;
use std::time::Duration;

use chrono::{SubsecRound, Utc};
use saathi_proto::{ClientEvent, GroupId, LocationPayload, ServerEvent};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::backend::{LocationStore, MembershipResolver};
use crate::error::RelayError;
use crate::registry::{Connection, ConnectionRegistry};

pub const WELCOME: &str = "Connected to location tracking service";
pub const UPDATE_ACK: &str = "Location updated successfully";

const UPDATE_FAILED: &str = "Failed to update location";
const ROSTER_FAILED: &str = "Failed to get group locations";
const STALE_POINT: &str = "A newer location is already recorded";

/// Which wire name a roster pull is answered with. The payload is the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterReply {
    GroupLocations,
    AllGroupLocations,
}

/// Turns location events into group-wide roster pushes and keeps idle groups
/// fresh with a periodic sweep.
pub struct BroadcastEngine {
    registry: Arc<ConnectionRegistry>,
    resolver: Arc<dyn MembershipResolver>,
    store: Arc<dyn LocationStore>,
}

impl BroadcastEngine {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        resolver: Arc<dyn MembershipResolver>,
        store: Arc<dyn LocationStore>,
    ) -> Self {
        Self {
            registry,
            resolver,
            store,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Greet a freshly authenticated connection, register it and hand it the
    /// current roster of its group.
    pub async fn connect(&self, conn: &Connection) -> Option<GroupId> {
        let _ = conn.send(ServerEvent::connected(WELCOME));
        let group = self.registry.register(conn.clone()).await?;

        match self.store.group_roster(&group).await {
            Ok(roster) => {
                let _ = conn.send(ServerEvent::snapshot(roster, Utc::now()));
            }
            Err(err) => {
                log::warn!("initial roster for group {group}: {err:#}");
                let _ = conn.send(ServerEvent::error(ROSTER_FAILED));
            }
        }
        Some(group)
    }

    pub async fn disconnect(&self, conn: &Connection) {
        self.registry.release(conn.user_id, conn.id).await;
    }

    /// Handle one inbound event. Failures go back to `conn` only. Returns
    /// `false` once the connection can no longer be served.
    pub async fn handle_event(&self, conn: &Connection, event: ClientEvent) -> bool {
        let result = match event {
            ClientEvent::LocationUpdate(payload) => {
                self.update_location(conn, &payload).await.map(|_| ())
            }
            ClientEvent::GetGroupLocations => {
                self.reply_roster(conn, RosterReply::GroupLocations).await
            }
            ClientEvent::RequestAllLocations => {
                self.reply_roster(conn, RosterReply::AllGroupLocations)
                    .await
            }
        };

        match result {
            Ok(()) => true,
            Err(err) if err.is_terminal() => {
                log::debug!("dropping connection {} of user {}: {err}", conn.id, conn.user_id);
                false
            }
            Err(err) => {
                log::debug!("event from user {} failed: {err}", conn.user_id);
                conn.send(ServerEvent::error(err.client_message())).is_ok()
            }
        }
    }

    /// Persist, then broadcast the group's roster and the new point, then
    /// acknowledge. Nothing is broadcast unless the point was stored; a point
    /// older than the stored one is rejected.
    /// Returns how many connections received the snapshot.
    pub async fn update_location(
        &self,
        conn: &Connection,
        payload: &LocationPayload,
    ) -> Result<usize, RelayError> {
        let (latitude, longitude) = payload
            .validate()
            .map_err(|err| RelayError::Validation(err.to_string()))?;

        // Stored with millisecond precision; the delta must carry the same instant.
        let captured_at = Utc::now().trunc_subsecs(3);
        let written = self
            .store
            .upsert_location(conn.user_id, latitude, longitude, captured_at)
            .await
            .map_err(RelayError::persistence(UPDATE_FAILED))?;
        if !written {
            return Err(RelayError::Validation(STALE_POINT.to_string()));
        }

        let group = self.resolve_group(conn, UPDATE_FAILED).await?;
        let roster = self
            .store
            .group_roster(&group)
            .await
            .map_err(RelayError::persistence(UPDATE_FAILED))?;

        let delivered = self
            .registry
            .fan_out(&group, &ServerEvent::snapshot(roster, captured_at))
            .await;
        self.registry
            .fan_out(
                &group,
                &ServerEvent::point_update(conn.user_id, latitude, longitude, captured_at),
            )
            .await;
        log::debug!(
            "user {} moved to ({latitude}, {longitude}); {delivered} member(s) of {group} notified",
            conn.user_id
        );

        conn.send(ServerEvent::location_updated(UPDATE_ACK))?;
        Ok(delivered)
    }

    /// Answer a roster pull directly to the requester.
    pub async fn reply_roster(
        &self,
        conn: &Connection,
        reply: RosterReply,
    ) -> Result<(), RelayError> {
        let group = self.resolve_group(conn, ROSTER_FAILED).await?;
        let roster = self
            .store
            .group_roster(&group)
            .await
            .map_err(RelayError::persistence(ROSTER_FAILED))?;

        conn.send(match reply {
            RosterReply::GroupLocations => ServerEvent::group_locations(roster),
            RosterReply::AllGroupLocations => ServerEvent::snapshot(roster, Utc::now()),
        })
    }

    /// Authoritative group lookup. The registry is moved along when the
    /// answer differs from the group the connection was filed under.
    async fn resolve_group(
        &self,
        conn: &Connection,
        failure: &'static str,
    ) -> Result<GroupId, RelayError> {
        let group = self
            .resolver
            .find_user_group(conn.user_id)
            .await
            .map_err(RelayError::persistence(failure))?;
        self.registry.rejoin(conn.user_id, group.clone()).await;
        group.ok_or(RelayError::Lookup)
    }

    /// Push a fresh snapshot to every group with live members. A group whose
    /// roster cannot be read is skipped. Returns how many groups were served.
    pub async fn sweep_once(&self) -> usize {
        let mut served = 0;
        for group in self.registry.active_groups().await {
            match self.store.group_roster(&group).await {
                Ok(roster) => {
                    self.registry
                        .fan_out(&group, &ServerEvent::snapshot(roster, Utc::now()))
                        .await;
                    served += 1;
                }
                Err(err) => log::warn!("sweep skipped group {group}: {err:#}"),
            }
        }
        served
    }

    /// Run [`sweep_once`](Self::sweep_once) every `period`, first one
    /// `period` from now.
    pub fn spawn_sweep(self: &Arc<Self>, period: Duration) -> SweepHandle {
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let served = engine.sweep_once().await;
                log::debug!("sweep refreshed {served} group(s)");
            }
        });
        SweepHandle { task }
    }
}

/// Owns the sweep task. Dropping the handle stops the sweep.
pub struct SweepHandle {
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub fn shutdown(self) {
        log::info!("stopping location sweep");
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
