//! Wire types shared by the realtime relay and its clients.

pub mod relay;

pub use relay::{
    ClientEvent, CoordinateError, GroupId, GroupLocations, LocationPayload, Notice, PointUpdate,
    RosterEntry, RosterSnapshot, ServerEvent, UserId,
};
