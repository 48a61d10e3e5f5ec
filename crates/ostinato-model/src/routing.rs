//! Per-track MIDI and audio routing.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TrackRouteKind {
    #[default]
    None = 0,
    Master = 1,
    Track = 2,
    ExternalInput = 3,
}

impl TrackRouteKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Master),
            2 => Some(Self::Track),
            3 => Some(Self::ExternalInput),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackRoute {
    pub kind: TrackRouteKind,
    pub track_id: u32,
    pub input_id: u32,
}

impl TrackRoute {
    pub const fn master() -> Self {
        Self {
            kind: TrackRouteKind::Master,
            track_id: 0,
            input_id: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackRouting {
    pub midi_in: TrackRoute,
    pub midi_out: TrackRoute,
    pub audio_in: TrackRoute,
    pub audio_out: TrackRoute,
    pub pre_fader_send: bool,
}

impl Default for TrackRouting {
    fn default() -> Self {
        Self {
            midi_in: TrackRoute::default(),
            midi_out: TrackRoute::default(),
            audio_in: TrackRoute::default(),
            audio_out: TrackRoute::master(),
            pre_fader_send: true,
        }
    }
}

/// Why a route was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    #[error("a track route may not point at its own track")]
    SelfRoute,
    #[error("route target track does not exist")]
    MissingTarget,
}

/// A track route may not point at its own track, and a `Track` route's
/// target must exist.
pub fn validate_route(
    route: TrackRoute,
    own_track_id: u32,
    track_exists: impl Fn(u32) -> bool,
) -> Result<(), RouteError> {
    if route.kind != TrackRouteKind::Track {
        return Ok(());
    }
    if route.track_id == own_track_id {
        return Err(RouteError::SelfRoute);
    }
    if !track_exists(route.track_id) {
        return Err(RouteError::MissingTarget);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_routing_sends_audio_to_master() {
        let routing = TrackRouting::default();
        assert_eq!(routing.audio_out.kind, TrackRouteKind::Master);
        assert!(routing.pre_fader_send);
        assert_eq!(routing.midi_in.kind, TrackRouteKind::None);
    }

    #[test]
    fn self_route_is_rejected() {
        let route = TrackRoute {
            kind: TrackRouteKind::Track,
            track_id: 3,
            input_id: 0,
        };
        assert_eq!(validate_route(route, 3, |_| true), Err(RouteError::SelfRoute));
    }

    #[test]
    fn missing_target_is_rejected() {
        let route = TrackRoute {
            kind: TrackRouteKind::Track,
            track_id: 9,
            input_id: 0,
        };
        assert_eq!(
            validate_route(route, 0, |id| id < 4),
            Err(RouteError::MissingTarget)
        );
    }

    #[test]
    fn non_track_kinds_always_validate() {
        let route = TrackRoute::master();
        assert!(validate_route(route, 0, |_| false).is_ok());
    }
}
