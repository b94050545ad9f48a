use std::iter::{Enumerate, Peekable};
use std::str::{FromStr, Lines};

use serde::{Deserialize, Serialize};

use crate::core::particle::{unit_from, DIM};
use crate::error::{Error, Result};

/// Simulation domain. Circular domains are centered on the origin; square domains span
/// `[0, side] x [0, side]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainKind {
    Circular { radius: f64 },
    Square { side: f64 },
}

impl DomainKind {
    /// Header tag.
    pub fn tag(&self) -> &'static str {
        match self {
            DomainKind::Circular { .. } => "circular",
            DomainKind::Square { .. } => "square",
        }
    }

    /// Radius (circular) or side (square), as written in the header.
    pub fn size(&self) -> f64 {
        match *self {
            DomainKind::Circular { radius } => radius,
            DomainKind::Square { side } => side,
        }
    }

    /// Geometric center of the domain.
    pub fn center(&self) -> [f64; DIM] {
        match *self {
            DomainKind::Circular { .. } => [0.0, 0.0],
            DomainKind::Square { side } => [side / 2.0, side / 2.0],
        }
    }

    /// Length of the confining boundary (circumference or perimeter).
    pub fn boundary_length(&self) -> f64 {
        match *self {
            DomainKind::Circular { radius } => 2.0 * std::f64::consts::PI * radius,
            DomainKind::Square { side } => 4.0 * side,
        }
    }

    /// Signed gap between a particle's surface and the nearest wall. Zero means contact.
    pub fn wall_gap(&self, position: [f64; DIM], particle_radius: f64) -> f64 {
        match *self {
            DomainKind::Circular { radius } => {
                let d = (position[0] * position[0] + position[1] * position[1]).sqrt();
                radius - (d + particle_radius)
            }
            DomainKind::Square { side } => {
                let nearest = position[0]
                    .min(position[1])
                    .min(side - position[0])
                    .min(side - position[1]);
                nearest - particle_radius
            }
        }
    }

    /// Outward unit normal of the wall closest to `position`.
    pub fn wall_normal(&self, position: [f64; DIM]) -> Option<[f64; DIM]> {
        match *self {
            DomainKind::Circular { .. } => unit_from(&self.center(), &position),
            DomainKind::Square { side } => {
                let candidates = [
                    (position[0], [-1.0, 0.0]),
                    (side - position[0], [1.0, 0.0]),
                    (position[1], [0.0, -1.0]),
                    (side - position[1], [0.0, 1.0]),
                ];
                candidates
                    .iter()
                    .min_by(|a, b| a.0.total_cmp(&b.0))
                    .map(|(_, n)| *n)
            }
        }
    }
}

/// Obstacle placed at the domain center. A free obstacle is recorded as the last row of every
/// frame and moves under collisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObstacleKind {
    Fixed { radius: f64 },
    Free { radius: f64, mass: f64 },
}

impl ObstacleKind {
    /// Header tag.
    pub fn tag(&self) -> &'static str {
        match self {
            ObstacleKind::Fixed { .. } => "fixed",
            ObstacleKind::Free { .. } => "free",
        }
    }

    pub fn radius(&self) -> f64 {
        match *self {
            ObstacleKind::Fixed { radius } | ObstacleKind::Free { radius, .. } => radius,
        }
    }

    pub fn mass(&self) -> Option<f64> {
        match *self {
            ObstacleKind::Fixed { .. } => None,
            ObstacleKind::Free { mass, .. } => Some(mass),
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        matches!(self, ObstacleKind::Free { .. })
    }

    /// Circumference of the obstacle.
    pub fn boundary_length(&self) -> f64 {
        2.0 * std::f64::consts::PI * self.radius()
    }
}

/// Record counts declared at the end of the header.
///
/// `snapshots` is only written by simulator versions that produce a separate snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredCounts {
    pub events: usize,
    pub snapshots: Option<usize>,
}

/// Immutable description of one simulator run, parsed from its header file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub particle_count: usize,
    pub particle_radius: f64,
    pub particle_mass: f64,
    pub initial_speed: f64,
    pub domain: DomainKind,
    pub obstacle: ObstacleKind,
    pub counts: DeclaredCounts,
}

impl RunConfig {
    /// Number of gas particles, i.e. rows that are not the free obstacle.
    pub fn gas_particle_count(&self) -> usize {
        match self.obstacle_row() {
            Some(_) => self.particle_count.saturating_sub(1),
            None => self.particle_count,
        }
    }

    /// Row index of the free obstacle inside each frame, if the obstacle is free.
    pub fn obstacle_row(&self) -> Option<usize> {
        self.obstacle
            .is_free()
            .then(|| self.particle_count.saturating_sub(1))
    }

    /// Parse a header text blob in strict field order.
    pub fn parse_header(text: &str) -> Result<Self> {
        let mut cursor = HeaderCursor::new(text);

        let particle_count: usize = cursor.parse("particle_count")?;
        if particle_count == 0 {
            return Err(cursor.malformed("particle_count must be > 0"));
        }
        let particle_radius = cursor.positive("particle_radius")?;
        let particle_mass = cursor.positive("particle_mass")?;
        let initial_speed = cursor.non_negative("initial_speed")?;

        let domain = match cursor.field("domain_kind")? {
            "circular" => DomainKind::Circular {
                radius: cursor.positive("domain_radius")?,
            },
            "square" => DomainKind::Square {
                side: cursor.positive("domain_side")?,
            },
            other => {
                return Err(cursor.malformed(format!("unknown domain kind '{other}'")));
            }
        };

        let obstacle = match cursor.field("obstacle_kind")? {
            "fixed" | "obstacle" => ObstacleKind::Fixed {
                radius: cursor.positive("obstacle_radius")?,
            },
            "free" => {
                let radius = cursor.positive("obstacle_radius")?;
                let mass = cursor.positive("obstacle_mass")?;
                if particle_count < 2 {
                    return Err(cursor.malformed(
                        "a free obstacle run needs at least one gas particle besides the obstacle",
                    ));
                }
                ObstacleKind::Free { radius, mass }
            }
            other => {
                return Err(cursor.malformed(format!("unknown obstacle kind '{other}'")));
            }
        };

        let mut tail: Vec<usize> = Vec::with_capacity(2);
        while !cursor.is_exhausted() {
            if tail.len() == 2 {
                return Err(cursor.malformed("unexpected trailing header fields"));
            }
            tail.push(cursor.parse("record_count")?);
        }
        let counts = match tail.as_slice() {
            [events] => DeclaredCounts {
                events: *events,
                snapshots: None,
            },
            [snapshots, events] => DeclaredCounts {
                events: *events,
                snapshots: Some(*snapshots),
            },
            _ => return Err(cursor.premature("event_count")),
        };

        Ok(Self {
            particle_count,
            particle_radius,
            particle_mass,
            initial_speed,
            domain,
            obstacle,
            counts,
        })
    }

    /// Render the header in the same field order `parse_header` expects.
    pub fn to_header(&self) -> String {
        let mut fields = vec![
            self.particle_count.to_string(),
            self.particle_radius.to_string(),
            self.particle_mass.to_string(),
            self.initial_speed.to_string(),
            self.domain.tag().to_string(),
            self.domain.size().to_string(),
            self.obstacle.tag().to_string(),
            self.obstacle.radius().to_string(),
        ];
        if let Some(mass) = self.obstacle.mass() {
            fields.push(mass.to_string());
        }
        if let Some(snapshots) = self.counts.snapshots {
            fields.push(snapshots.to_string());
        }
        fields.push(self.counts.events.to_string());

        let mut out = fields.join("\n");
        out.push('\n');
        out
    }
}

/// Walks the non-blank header lines, remembering the 1-based line number of the last field read.
struct HeaderCursor<'a> {
    lines: Peekable<Enumerate<Lines<'a>>>,
    line: usize,
}

impl<'a> HeaderCursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().enumerate().peekable(),
            line: 0,
        }
    }

    fn skip_blank(&mut self) {
        while self.lines.next_if(|&(_, l)| l.trim().is_empty()).is_some() {}
    }

    fn is_exhausted(&mut self) -> bool {
        self.skip_blank();
        self.lines.peek().is_none()
    }

    fn field(&mut self, name: &str) -> Result<&'a str> {
        self.skip_blank();
        match self.lines.next() {
            Some((idx, value)) => {
                self.line = idx + 1;
                Ok(value.trim())
            }
            None => Err(self.premature(name)),
        }
    }

    fn parse<T: FromStr>(&mut self, name: &str) -> Result<T> {
        let raw = self.field(name)?;
        raw.parse::<T>()
            .map_err(|_| self.malformed(format!("cannot parse {name} from '{raw}'")))
    }

    fn non_negative(&mut self, name: &str) -> Result<f64> {
        let v: f64 = self.parse(name)?;
        if !v.is_finite() || v < 0.0 {
            return Err(self.malformed(format!("{name} must be finite and >= 0")));
        }
        Ok(v)
    }

    fn positive(&mut self, name: &str) -> Result<f64> {
        let v: f64 = self.parse(name)?;
        if !v.is_finite() || v <= 0.0 {
            return Err(self.malformed(format!("{name} must be finite and > 0")));
        }
        Ok(v)
    }

    fn malformed(&self, reason: impl Into<String>) -> Error {
        Error::MalformedHeader {
            line: self.line,
            reason: reason.into(),
        }
    }

    fn premature(&self, name: &str) -> Error {
        Error::MalformedHeader {
            line: self.line + 1,
            reason: format!("header ended before {name}"),
        }
    }
}
