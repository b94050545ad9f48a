use crate::core::particle::DIM;
use crate::error::{Error, Result};
use ordered_float::NotNan;

/// Kinds of tagged records found in the event log.
///
/// The simulator writes `O` for obstacle collisions and `W` for wall collisions; any other tag
/// (particle-particle collisions, bookkeeping records) is preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Particle hit the obstacle (tag `O`).
    ObstacleCollision,
    /// Particle hit the domain wall (tag `W`).
    WallCollision,
    /// Any other tag.
    Other(String),
}

impl EventKind {
    /// Map a raw tag onto an event kind.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "O" => EventKind::ObstacleCollision,
            "W" => EventKind::WallCollision,
            other => EventKind::Other(other.to_string()),
        }
    }

    /// The tag written in the event log.
    pub fn tag(&self) -> &str {
        match self {
            EventKind::ObstacleCollision => "O",
            EventKind::WallCollision => "W",
            EventKind::Other(tag) => tag,
        }
    }

    /// Whether records of this kind must carry a collision payload.
    #[inline]
    pub fn requires_payload(&self) -> bool {
        !matches!(self, EventKind::Other(_))
    }
}

/// Position plus pre/post collision velocity of the colliding participant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionPayload {
    pub position: [f64; DIM],
    pub velocity_before: [f64; DIM],
    pub velocity_after: [f64; DIM],
}

impl CollisionPayload {
    /// Build a payload from the six stored values `x y vx_pre vy_pre vx_post vy_post`.
    pub fn from_values(values: &[f64; 6]) -> Self {
        Self {
            position: [values[0], values[1]],
            velocity_before: [values[2], values[3]],
            velocity_after: [values[4], values[5]],
        }
    }
}

/// One record of the event log.
///
/// - `time`: event occurrence time (finite, non-NaN).
/// - `kind`: tag written by the simulator.
/// - `participant_id`: row index of the colliding particle.
/// - `payload`: kinematics, always present for obstacle and wall collisions.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub time: NotNan<f64>,
    pub kind: EventKind,
    pub participant_id: usize,
    pub payload: Option<CollisionPayload>,
}

impl EventRecord {
    /// Create a new record. Time must be finite and collision kinds must carry a payload.
    pub fn new(
        time: f64,
        kind: EventKind,
        participant_id: usize,
        payload: Option<CollisionPayload>,
    ) -> Result<Self> {
        if !time.is_finite() {
            return Err(Error::InvalidParam("event time must be finite".into()));
        }
        let time = NotNan::new(time)
            .map_err(|_| Error::InvalidParam("event time cannot be NaN".into()))?;
        if kind.requires_payload() && payload.is_none() {
            return Err(Error::InvalidParam(format!(
                "'{}' events must carry position and velocities",
                kind.tag()
            )));
        }
        Ok(Self {
            time,
            kind,
            participant_id,
            payload,
        })
    }

    /// Returns the raw f64 event time.
    #[inline]
    pub fn time_f64(&self) -> f64 {
        self.time.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> CollisionPayload {
        CollisionPayload::from_values(&[1.0, 2.0, 3.0, 4.0, -3.0, -4.0])
    }

    #[test]
    fn tags_map_to_kinds() {
        assert_eq!(EventKind::from_tag("O"), EventKind::ObstacleCollision);
        assert_eq!(EventKind::from_tag("W"), EventKind::WallCollision);
        assert_eq!(EventKind::from_tag("P"), EventKind::Other("P".into()));
        assert_eq!(EventKind::from_tag("P").tag(), "P");
    }

    #[test]
    fn new_event_rejects_nan_time() {
        let err = EventRecord::new(f64::NAN, EventKind::WallCollision, 0, Some(payload()))
            .unwrap_err();
        assert!(err.to_string().contains("finite"));
    }

    #[test]
    fn collision_without_payload_rejected() {
        let err = EventRecord::new(0.5, EventKind::ObstacleCollision, 3, None).unwrap_err();
        assert!(err.to_string().contains("'O'"));
        assert!(EventRecord::new(0.5, EventKind::Other("P".into()), 3, None).is_ok());
    }

    #[test]
    fn payload_layout() {
        let p = payload();
        assert_eq!(p.position, [1.0, 2.0]);
        assert_eq!(p.velocity_before, [3.0, 4.0]);
        assert_eq!(p.velocity_after, [-3.0, -4.0]);
    }
}
