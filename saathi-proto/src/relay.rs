use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type UserId = i64;
pub type GroupId = String;

/// One member's latest known position, as shown in a group roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub user_id: UserId,
    pub full_name: Option<String>,
    pub is_admin: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoordinateError {
    #[error("Latitude and longitude required")]
    Missing,
    #[error("latitude {0} is out of range")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is out of range")]
    LongitudeOutOfRange(f64),
}

/// Body of an inbound `location_update`. Both fields are optional on the wire
/// so that a missing coordinate is reported as a validation error rather than
/// a malformed frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationPayload {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl LocationPayload {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
        }
    }

    /// Returns `(latitude, longitude)` when both are present and plausible.
    pub fn validate(&self) -> Result<(f64, f64), CoordinateError> {
        let (Some(lat), Some(lon)) = (self.latitude, self.longitude) else {
            return Err(CoordinateError::Missing);
        };
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::LongitudeOutOfRange(lon));
        }
        Ok((lat, lon))
    }
}

/// Client -> Relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Persist my position and push the new roster to my group
    LocationUpdate(LocationPayload),
    /// Reply with my group's roster as `group_locations`
    GetGroupLocations,
    /// Reply with my group's roster as `all_group_locations`
    RequestAllLocations,
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub message: String,
}

/// Incremental single-point event fanned out next to every snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: UserId,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupLocations {
    pub data: Vec<RosterEntry>,
}

/// Full replace-state view of a group. Receivers must never merge two of
/// these; the newest one wins outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterSnapshot {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Vec<RosterEntry>,
    pub timestamp: DateTime<Utc>,
}

/// Relay -> Client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected(Notice),
    LocationUpdated(Notice),
    LocationUpdate(PointUpdate),
    GroupLocations(GroupLocations),
    AllGroupLocations(RosterSnapshot),
    Error(Notice),
}

impl ServerEvent {
    pub fn connected(message: impl Into<String>) -> Self {
        ServerEvent::Connected(Notice {
            message: message.into(),
        })
    }

    pub fn location_updated(message: impl Into<String>) -> Self {
        ServerEvent::LocationUpdated(Notice {
            message: message.into(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(Notice {
            message: message.into(),
        })
    }

    pub fn point_update(
        user_id: UserId,
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        ServerEvent::LocationUpdate(PointUpdate {
            kind: "location_update".to_string(),
            user_id,
            latitude,
            longitude,
            timestamp,
        })
    }

    pub fn group_locations(data: Vec<RosterEntry>) -> Self {
        ServerEvent::GroupLocations(GroupLocations { data })
    }

    pub fn snapshot(data: Vec<RosterEntry>, timestamp: DateTime<Utc>) -> Self {
        ServerEvent::AllGroupLocations(RosterSnapshot {
            kind: "all_group_locations".to_string(),
            data,
            timestamp,
        })
    }

    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::LocationUpdated(_) => "location_updated",
            ServerEvent::LocationUpdate(_) => "location_update",
            ServerEvent::GroupLocations(_) => "group_locations",
            ServerEvent::AllGroupLocations(_) => "all_group_locations",
            ServerEvent::Error(_) => "error",
        }
    }

    /// The roster carried by either snapshot form.
    pub fn roster(&self) -> Option<&[RosterEntry]> {
        match self {
            ServerEvent::GroupLocations(g) => Some(&g.data),
            ServerEvent::AllGroupLocations(s) => Some(&s.data),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
