use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::debug;

use crate::core::event::{CollisionPayload, EventKind, EventRecord};
use crate::error::{Error, Result};
use crate::stream::reserve_hint;

const STREAM: &str = "events.txt";

/// Number of payload values: x, y, vx_pre, vy_pre, vx_post, vy_post.
const PAYLOAD_LEN: usize = 6;

/// Parsed event log, in file (time) order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventLog {
    events: Vec<EventRecord>,
}

impl EventLog {
    pub fn from_path(path: &Path, particle_count: usize, declared_events: usize) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingOutput(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        Self::parse(reader, particle_count, declared_events)
    }

    /// Parse one tagged record per line:
    /// `<time> <kind> <participant_id> [<x> <y> <vx_pre> <vy_pre> <vx_post> <vy_post>]`.
    ///
    /// Obstacle (`O`) and wall (`W`) records must carry the full payload; other tags may omit
    /// it. The log must hold exactly `declared_events` records with non-decreasing times.
    pub fn parse<R: BufRead>(
        reader: R,
        particle_count: usize,
        declared_events: usize,
    ) -> Result<Self> {
        let mut events: Vec<EventRecord> = Vec::with_capacity(reserve_hint(declared_events, 1));
        let mut found = 0usize;
        let mut last_time = f64::NEG_INFINITY;

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            found += 1;
            if found > declared_events {
                continue;
            }
            let record = parse_record(&fields, particle_count, line_no)?;
            let t = record.time_f64();
            if t < last_time {
                return Err(malformed(
                    line_no,
                    format!("time {t} precedes previous event time {last_time}"),
                ));
            }
            last_time = t;
            events.push(record);
        }

        if found != declared_events {
            return Err(Error::RecordCountMismatch {
                stream: STREAM,
                what: "events",
                declared: declared_events,
                found,
            });
        }

        debug!(events = found, "parsed event log");
        Ok(Self { events })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[EventRecord] {
        &self.events
    }
}

impl From<Vec<EventRecord>> for EventLog {
    fn from(events: Vec<EventRecord>) -> Self {
        Self { events }
    }
}

fn parse_record(fields: &[&str], particle_count: usize, line: usize) -> Result<EventRecord> {
    if fields.len() < 3 {
        return Err(malformed(
            line,
            format!("expected time, kind and participant, found {} values", fields.len()),
        ));
    }
    let time: f64 = fields[0]
        .parse()
        .map_err(|_| malformed(line, format!("cannot parse time '{}'", fields[0])))?;
    let kind = EventKind::from_tag(fields[1]);
    let participant_id: usize = fields[2]
        .parse()
        .map_err(|_| malformed(line, format!("cannot parse participant id '{}'", fields[2])))?;
    if participant_id >= particle_count {
        return Err(malformed(
            line,
            format!("participant {participant_id} out of range for {particle_count} particles"),
        ));
    }

    let payload = match fields.len() - 3 {
        0 => None,
        PAYLOAD_LEN => {
            let mut values = [0.0f64; PAYLOAD_LEN];
            for (slot, tok) in values.iter_mut().zip(&fields[3..]) {
                *slot = tok
                    .parse()
                    .ok()
                    .filter(|v: &f64| v.is_finite())
                    .ok_or_else(|| malformed(line, format!("invalid payload value '{tok}'")))?;
            }
            Some(CollisionPayload::from_values(&values))
        }
        other => {
            return Err(malformed(
                line,
                format!("expected 0 or {PAYLOAD_LEN} payload values, found {other}"),
            ));
        }
    };

    EventRecord::new(time, kind, participant_id, payload)
        .map_err(|e| malformed(line, e.to_string()))
}

fn malformed(line: usize, reason: String) -> Error {
    Error::MalformedRecord {
        stream: STREAM,
        line,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LOG: &str = "\
0.1 O 0 0.006 0 -1 0 1 0
0.15 P 1
0.2 W 1 0.049 0 1 0 -1 0
";

    #[test]
    fn parses_tagged_records() -> Result<()> {
        let log = EventLog::parse(Cursor::new(LOG), 3, 3)?;
        assert_eq!(log.len(), 3);
        let kinds: Vec<&str> = log.iter().map(|e| e.kind.tag()).collect();
        assert_eq!(kinds, ["O", "P", "W"]);
        let first = &log.as_slice()[0];
        let payload = first.payload.expect("obstacle payload");
        assert_eq!(payload.position, [0.006, 0.0]);
        assert_eq!(payload.velocity_before, [-1.0, 0.0]);
        assert_eq!(payload.velocity_after, [1.0, 0.0]);
        assert!(log.as_slice()[1].payload.is_none());
        Ok(())
    }

    #[test]
    fn count_mismatch_rejected() {
        for declared in [2usize, 4] {
            let err = EventLog::parse(Cursor::new(LOG), 3, declared).unwrap_err();
            assert!(matches!(
                err,
                Error::RecordCountMismatch { found: 3, .. }
            ));
        }
    }

    #[test]
    fn oversized_declared_count_is_a_mismatch() {
        let declared = 4_000_000_000_000_000_000usize;
        match EventLog::parse(Cursor::new(LOG), 3, declared) {
            Err(Error::RecordCountMismatch { declared: d, found, .. }) => {
                assert_eq!((d, found), (declared, 3));
            }
            other => panic!("expected RecordCountMismatch, got {other:?}"),
        }
    }

    #[test]
    fn collision_without_payload_rejected() {
        let err = EventLog::parse(Cursor::new("0.1 O 0\n"), 1, 1).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { line: 1, .. }));
    }

    #[test]
    fn partial_payload_rejected() {
        let err = EventLog::parse(Cursor::new("0.1 W 0 1 2 3\n"), 1, 1).unwrap_err();
        assert!(err.to_string().contains("payload"));
    }

    #[test]
    fn participant_out_of_range_rejected() {
        let err = EventLog::parse(Cursor::new("0.1 P 5\n"), 2, 1).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn decreasing_time_rejected() {
        let err = EventLog::parse(Cursor::new("0.2 P 0\n0.1 P 0\n"), 1, 2).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { line: 2, .. }));
    }
}
