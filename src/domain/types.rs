//! Shared types for the geofence engine

use crate::domain::error::GeofenceError;
use serde::{Deserialize, Deserializer, Serialize};

/// A point on the WGS84 sphere, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    #[inline]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Finite and inside the valid latitude/longitude ranges
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

impl std::fmt::Display for LatLon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

/// Kind of region transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    #[serde(alias = "ENTER")]
    Enter,
    #[serde(alias = "EXIT")]
    Exit,
    #[serde(alias = "DWELL")]
    Dwell,
}

impl TransitionKind {
    pub const ALL: [TransitionKind; 3] =
        [TransitionKind::Enter, TransitionKind::Exit, TransitionKind::Dwell];

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Enter => "enter",
            TransitionKind::Exit => "exit",
            TransitionKind::Dwell => "dwell",
        }
    }

    /// Kinds that close an episode of this kind (ENTER/DWELL vs EXIT)
    #[inline]
    pub fn is_opposite(&self, other: TransitionKind) -> bool {
        matches!(
            (self, other),
            (TransitionKind::Enter, TransitionKind::Exit)
                | (TransitionKind::Exit, TransitionKind::Enter)
                | (TransitionKind::Dwell, TransitionKind::Exit)
                | (TransitionKind::Exit, TransitionKind::Dwell)
        )
    }

    #[inline]
    fn bit(&self) -> u8 {
        match self {
            TransitionKind::Enter => 0b001,
            TransitionKind::Exit => 0b010,
            TransitionKind::Dwell => 0b100,
        }
    }
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of transition kinds, serialized as a list of names
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<TransitionKind>", into = "Vec<TransitionKind>")]
pub struct TransitionSet(u8);

impl TransitionSet {
    pub const EMPTY: TransitionSet = TransitionSet(0);

    pub fn of(kinds: &[TransitionKind]) -> Self {
        kinds.iter().fold(Self::EMPTY, |set, &k| set.with(k))
    }

    #[inline]
    pub fn contains(&self, kind: TransitionKind) -> bool {
        self.0 & kind.bit() != 0
    }

    #[inline]
    pub fn with(self, kind: TransitionKind) -> Self {
        Self(self.0 | kind.bit())
    }

    #[inline]
    pub fn insert(&mut self, kind: TransitionKind) {
        self.0 |= kind.bit();
    }

    #[inline]
    pub fn remove(&mut self, kind: TransitionKind) {
        self.0 &= !kind.bit();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = TransitionKind> + '_ {
        TransitionKind::ALL.into_iter().filter(|k| self.contains(*k))
    }
}

impl From<Vec<TransitionKind>> for TransitionSet {
    fn from(kinds: Vec<TransitionKind>) -> Self {
        Self::of(&kinds)
    }
}

impl From<TransitionSet> for Vec<TransitionKind> {
    fn from(set: TransitionSet) -> Self {
        set.iter().collect()
    }
}

impl std::fmt::Display for TransitionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.iter().map(|k| k.as_str()).collect();
        write!(f, "{}", names.join("|"))
    }
}

/// A registered circular region
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: String,
    pub center: LatLon,
    pub radius_meters: f64,
    pub transitions: TransitionSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dwell_delay_ms: Option<u32>,
    /// Absolute expiry in engine time (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
    pub initial_trigger: bool,
}

impl Region {
    #[inline]
    pub fn watches(&self, kind: TransitionKind) -> bool {
        self.transitions.contains(kind)
    }

    #[inline]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}

/// Region configuration shape shared by the HTTP API, TOML seeds and replay files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSpec {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub radius_meters: f64,
    pub transitions: TransitionSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dwell_delay_ms: Option<u32>,
    /// Relative lifetime; converted to an absolute expiry at registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_ms: Option<u64>,
    #[serde(default = "default_initial_trigger")]
    pub initial_trigger: bool,
}

fn default_initial_trigger() -> bool {
    true
}

impl RegionSpec {
    pub fn new(id: &str, lat: f64, lon: f64, radius_meters: f64, transitions: &[TransitionKind]) -> Self {
        Self {
            id: id.to_string(),
            lat,
            lon,
            radius_meters,
            transitions: TransitionSet::of(transitions),
            dwell_delay_ms: None,
            expires_in_ms: None,
            initial_trigger: true,
        }
    }

    pub fn with_dwell_delay_ms(mut self, ms: u32) -> Self {
        self.dwell_delay_ms = Some(ms);
        self
    }

    pub fn with_expires_in_ms(mut self, ms: u64) -> Self {
        self.expires_in_ms = Some(ms);
        self
    }

    pub fn with_initial_trigger(mut self, initial_trigger: bool) -> Self {
        self.initial_trigger = initial_trigger;
        self
    }

    /// Validate and build a region; `now_ms` anchors the relative expiry
    pub fn into_region(self, now_ms: u64) -> Result<Region, GeofenceError> {
        let invalid = |reason: &str| GeofenceError::InvalidRegion {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("empty id"));
        }
        let center = LatLon::new(self.lat, self.lon);
        if !center.is_valid() {
            return Err(invalid("center out of range"));
        }
        if !self.radius_meters.is_finite() || self.radius_meters <= 0.0 {
            return Err(invalid("radius must be positive"));
        }
        if self.transitions.is_empty() {
            return Err(invalid("no transitions watched"));
        }
        if self.transitions.contains(TransitionKind::Dwell) && self.dwell_delay_ms.is_none() {
            return Err(invalid("dwell watched without dwellDelayMs"));
        }

        Ok(Region {
            id: self.id,
            center,
            radius_meters: self.radius_meters,
            transitions: self.transitions,
            dwell_delay_ms: self.dwell_delay_ms,
            expires_at_ms: self.expires_in_ms.map(|ms| now_ms.saturating_add(ms)),
            initial_trigger: self.initial_trigger,
        })
    }
}

/// A single timestamped position observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionFix {
    pub position: LatLon,
    pub timestamp_ms: u64,
    pub accuracy_meters: f64,
}

impl PositionFix {
    #[inline]
    pub fn new(lat: f64, lon: f64, timestamp_ms: u64, accuracy_meters: f64) -> Self {
        Self { position: LatLon::new(lat, lon), timestamp_ms, accuracy_meters }
    }

    pub fn validate(&self) -> Result<(), GeofenceError> {
        if !self.position.is_valid() {
            return Err(GeofenceError::InvalidFix { reason: "coordinates out of range".to_string() });
        }
        if !self.accuracy_meters.is_finite() || self.accuracy_meters < 0.0 {
            return Err(GeofenceError::InvalidFix { reason: "negative accuracy".to_string() });
        }
        Ok(())
    }
}

/// A detected transition for one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    pub region_id: String,
    pub kind: TransitionKind,
    pub at_timestamp_ms: u64,
}

impl TransitionEvent {
    #[inline]
    pub fn new(region_id: &str, kind: TransitionKind, at_timestamp_ms: u64) -> Self {
        Self { region_id: region_id.to_string(), kind, at_timestamp_ms }
    }
}

/// Wire shape of a fix as pushed by external position sources
#[derive(Debug, Deserialize)]
pub struct FixMessage {
    pub lat: f64,
    pub lon: f64,
    /// Timestamp - can be ISO 8601 string or epoch milliseconds integer
    #[serde(default, alias = "timestampMs", deserialize_with = "deserialize_timestamp")]
    pub ts: TimestampValue,
    #[serde(default, alias = "accuracyMeters")]
    pub acc: Option<f64>,
}

/// Timestamp that can be either ISO 8601 string or epoch milliseconds
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TimestampValue {
    #[default]
    None,
    IsoString(String),
    EpochMs(u64),
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<TimestampValue, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = TimestampValue;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or numeric timestamp")
        }

        fn visit_str<E>(self, value: &str) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            // Negative timestamps clamp to zero and will be rejected as stale
            let epoch_ms = u64::try_from(value).unwrap_or(0);
            Ok(TimestampValue::EpochMs(epoch_ms))
        }

        fn visit_f64<E>(self, value: f64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            // Fractional milliseconds are truncated; negatives clamp like integers
            if !value.is_finite() || value < 0.0 {
                return Ok(TimestampValue::EpochMs(0));
            }
            Ok(TimestampValue::EpochMs(value as u64))
        }

        fn visit_unit<E>(self) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}
