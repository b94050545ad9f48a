use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::debug;

use crate::core::particle::{ParticleState, STATE_WIDTH};
use crate::error::{Error, Result};
use crate::stream::reserve_hint;

/// Dense time-major storage of full-state frames.
///
/// Used for both the legacy trajectory dump (one frame per event) and the snapshot file (one
/// frame per declared snapshot). Values are laid out as
/// `frame * particle_count * 4 + particle * 4 + {x, y, vx, vy}`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryFrames {
    particle_count: usize,
    times: Vec<f64>,
    states: Vec<f64>,
}

/// Borrowed view of one stored frame.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub time: f64,
    rows: &'a [f64],
}

impl<'a> Frame<'a> {
    pub fn len(&self) -> usize {
        self.rows.len() / STATE_WIDTH
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// State of particle `i` (panics if out of range, like slice indexing).
    pub fn state(&self, i: usize) -> ParticleState {
        ParticleState::from_row(&self.rows[i * STATE_WIDTH..(i + 1) * STATE_WIDTH])
    }

    pub fn states(&self) -> impl Iterator<Item = ParticleState> + 'a {
        self.rows.chunks_exact(STATE_WIDTH).map(ParticleState::from_row)
    }
}

impl TrajectoryFrames {
    /// Open and parse a frame file.
    pub fn from_path(
        path: &Path,
        stream: &'static str,
        particle_count: usize,
        declared_frames: usize,
    ) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingOutput(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        Self::parse(reader, stream, particle_count, declared_frames)
    }

    /// Stream-parse time-marker / state-row blocks.
    ///
    /// A line with one token opens a new frame; a line with four tokens is a particle row
    /// appended to the open frame. Storage is sized from `declared_frames` up front and the
    /// stream must contain exactly that many frames of exactly `particle_count` rows.
    pub fn parse<R: BufRead>(
        reader: R,
        stream: &'static str,
        particle_count: usize,
        declared_frames: usize,
    ) -> Result<Self> {
        let row_values = particle_count.saturating_mul(STATE_WIDTH);
        let mut times: Vec<f64> = Vec::with_capacity(reserve_hint(declared_frames, 1));
        let mut states: Vec<f64> =
            Vec::with_capacity(reserve_hint(declared_frames, row_values));

        let mut frames_seen = 0usize;
        let mut rows_in_frame = 0usize;
        let mut open = false;

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line?;
            let fields: Vec<&str> = line.split_whitespace().collect();

            match fields.len() {
                0 => continue,
                1 => {
                    if open {
                        check_rows(stream, particle_count, rows_in_frame)?;
                    }
                    let t = parse_number(fields[0], stream, line_no)?;
                    if let Some(&prev) = times.last() {
                        if frames_seen <= declared_frames && t < prev {
                            return Err(Error::MalformedRecord {
                                stream,
                                line: line_no,
                                reason: format!("time {t} precedes previous frame time {prev}"),
                            });
                        }
                    }
                    frames_seen += 1;
                    rows_in_frame = 0;
                    open = true;
                    if frames_seen <= declared_frames {
                        times.push(t);
                    }
                }
                STATE_WIDTH => {
                    if !open {
                        return Err(Error::MalformedRecord {
                            stream,
                            line: line_no,
                            reason: "particle row before the first time marker".into(),
                        });
                    }
                    rows_in_frame += 1;
                    if rows_in_frame > particle_count {
                        return Err(row_mismatch(stream, particle_count, rows_in_frame));
                    }
                    for tok in &fields {
                        let v = parse_number(tok, stream, line_no)?;
                        if frames_seen <= declared_frames {
                            states.push(v);
                        }
                    }
                }
                other => {
                    return Err(Error::MalformedRecord {
                        stream,
                        line: line_no,
                        reason: format!("expected 1 or {STATE_WIDTH} values, found {other}"),
                    });
                }
            }
        }

        if open {
            check_rows(stream, particle_count, rows_in_frame)?;
        }
        if frames_seen != declared_frames {
            return Err(Error::RecordCountMismatch {
                stream,
                what: "frames",
                declared: declared_frames,
                found: frames_seen,
            });
        }

        debug!(stream, frames = frames_seen, particle_count, "parsed frame stream");
        Ok(Self {
            particle_count,
            times,
            states,
        })
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn particle_count(&self) -> usize {
        self.particle_count
    }

    /// Stored frame times, non-decreasing.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Frame `i`, or `None` when out of range.
    pub fn frame(&self, i: usize) -> Option<Frame<'_>> {
        let time = *self.times.get(i)?;
        let width = self.particle_count * STATE_WIDTH;
        Some(Frame {
            time,
            rows: &self.states[i * width..(i + 1) * width],
        })
    }

    pub fn frames(&self) -> impl Iterator<Item = Frame<'_>> + '_ {
        (0..self.len()).filter_map(move |i| self.frame(i))
    }

    /// Index of the stored frame whose time is closest to `t`; ties resolve to the earlier frame.
    pub fn nearest_index(&self, t: f64) -> Option<usize> {
        if self.times.is_empty() {
            return None;
        }
        let upper = self.times.partition_point(|&x| x < t);
        if upper == 0 {
            return Some(0);
        }
        if upper == self.times.len() {
            return Some(upper - 1);
        }
        let below = t - self.times[upper - 1];
        let above = self.times[upper] - t;
        Some(if above < below { upper } else { upper - 1 })
    }
}

fn parse_number(tok: &str, stream: &'static str, line: usize) -> Result<f64> {
    let v: f64 = tok.parse().map_err(|_| Error::MalformedRecord {
        stream,
        line,
        reason: format!("cannot parse '{tok}' as a number"),
    })?;
    if !v.is_finite() {
        return Err(Error::MalformedRecord {
            stream,
            line,
            reason: format!("non-finite value '{tok}'"),
        });
    }
    Ok(v)
}

fn check_rows(stream: &'static str, expected: usize, found: usize) -> Result<()> {
    if found != expected {
        return Err(row_mismatch(stream, expected, found));
    }
    Ok(())
}

fn row_mismatch(stream: &'static str, expected: usize, found: usize) -> Error {
    Error::RecordCountMismatch {
        stream,
        what: "particle rows in a frame",
        declared: expected,
        found,
    }
}
