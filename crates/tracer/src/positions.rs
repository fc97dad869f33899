//! Player positions from ADM lines.
//!
//! DayZ prints coordinates as `<x, z, y>` with altitude last; events here
//! store them as `x`, `y` (altitude) and `z` (north/south).

use chrono::{DateTime, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static TIME_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?P<hh>\d{2}):(?P<mm>\d{2}):(?P<ss>\d{2})\s+\|\s*").expect("time prefix pattern is valid")
});

const TRIPLE: &str = r"<\s*(?P<x>-?\d+(?:\.\d+)?)\s*,\s*(?P<z>-?\d+(?:\.\d+)?)\s*,\s*(?P<y>-?\d+(?:\.\d+)?)\s*>";

// Player "Name" (id=... pos=<x, z, y>)
static POS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r#"(?i)Player\s+"(?P<name>[^"]+)"[^<]*?pos={}"#, TRIPLE)).expect("pos pattern is valid")
});

// ... was teleported from: <...> to: <x, z, y>
static TELEPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"(?i)Player\s+"(?P<name>[^"]+)"[^\n]*?\bteleport(?:ed)?\b[^\n]*?\bto:\s*{}"#,
        TRIPLE
    ))
    .expect("teleport pattern is valid")
});

static BARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r#"(?i)Player\s+"(?P<name>[^"]+)"[^\n]*?{}"#, TRIPLE)).expect("bare pattern is valid")
});

/// Words that make a bare `<x, z, y>` worth trusting.
const ACTION_WORDS: [&str; 4] = ["performed", "placed", "teleport", "connected"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionKind {
    /// `pos=<...>`
    Position,
    /// Teleport destination.
    Teleport,
    /// Bare triple on an action line.
    Action,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionEvent {
    pub player: String,
    pub x: f64,
    /// Altitude.
    pub y: f64,
    pub z: f64,
    pub at: DateTime<Utc>,
    pub kind: PositionKind,
}

/// Time of the event a line describes.
///
/// A leading `HH:MM:SS | ` is placed on the UTC date of `fallback`; lines
/// without one (or with an impossible time) get `fallback` itself. Lines
/// polled just after midnight but written just before it land on the wrong
/// day.
pub fn event_time(line: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let Some(caps) = TIME_PREFIX.captures(line) else {
        return fallback;
    };
    let field = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u32>().ok());
    match (field("hh"), field("mm"), field("ss")) {
        (Some(h), Some(m), Some(s)) => NaiveTime::from_hms_opt(h, m, s)
            .map(|time| fallback.date_naive().and_time(time).and_utc())
            .unwrap_or(fallback),
        _ => fallback,
    }
}

fn event_from(caps: &Captures<'_>, kind: PositionKind, at: DateTime<Utc>) -> Option<PositionEvent> {
    let number = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<f64>().ok());
    let player = caps.name("name")?.as_str().trim();
    if player.is_empty() {
        return None;
    }
    Some(PositionEvent {
        player: player.to_string(),
        x: number("x")?,
        z: number("z")?,
        y: number("y")?,
        at,
        kind,
    })
}

/// Extracts the player position an ADM line reports, if any.
pub fn parse_line(line: &str, observed_at: DateTime<Utc>) -> Option<PositionEvent> {
    let at = event_time(line, observed_at);

    if let Some(caps) = POS.captures(line) {
        return event_from(&caps, PositionKind::Position, at);
    }
    if let Some(caps) = TELEPORT.captures(line) {
        return event_from(&caps, PositionKind::Teleport, at);
    }
    if ACTION_WORDS.iter().any(|word| line.contains(word)) {
        if let Some(caps) = BARE.captures(line) {
            return event_from(&caps, PositionKind::Action, at);
        }
    }
    None
}
