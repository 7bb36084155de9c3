use serde::Deserialize;
use serde_json::Value;

/// Literal values the dialplan and older scripts use to mean "nothing captured".
const EMPTY_MARKERS: &[&str] = &["null", "None", "{}", "[]", "\"\""];

/// Geocoder `location_type` values that only approximate the spoken address.
const LOW_CONFIDENCE_TYPES: &[&str] = &["APPROXIMATE", "GEOMETRIC_CENTER"];

/// Outcome of validating a captured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    /// Blank, an empty marker, or a structurally broken location.
    Empty,
    /// A location the geocoder flagged as approximate.
    LowConfidence,
}

/// What to do with a [`Validity::LowConfidence`] result.
///
/// Applied identically to freshly geocoded addresses and to the address
/// offered from the caller's profile.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LowConfidencePolicy {
    /// Treat as a failed attempt and retry.
    #[default]
    Reject,
    Accept,
}

impl Validity {
    pub fn is_acceptable(self, policy: LowConfidencePolicy) -> bool {
        match self {
            Validity::Valid => true,
            Validity::Empty => false,
            Validity::LowConfidence => policy == LowConfidencePolicy::Accept,
        }
    }

    /// Dialplan-compatible flag: `1` accepted, `0` rejected.
    pub fn as_flag(self, policy: LowConfidencePolicy) -> u8 {
        u8::from(self.is_acceptable(policy))
    }
}

/// Validate a raw captured string, which may itself be JSON.
pub fn validate(raw: &str) -> Validity {
    let trimmed = raw.trim();
    if trimmed.is_empty() || EMPTY_MARKERS.contains(&trimmed) {
        return Validity::Empty;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(parsed) => validate_value(&parsed),
        // Plain transcript text
        Err(_) => Validity::Valid,
    }
}

/// Validate an already-structured value (e.g. a serialized location).
pub fn validate_value(value: &Value) -> Validity {
    match value {
        Value::Null => Validity::Empty,
        Value::String(s) if s.trim().is_empty() => Validity::Empty,
        Value::Array(items) if items.is_empty() => Validity::Empty,
        Value::Object(map) if map.is_empty() => Validity::Empty,
        Value::Object(map) => {
            if let Some(lat_lng) = map.get("latLng") {
                let Some(coords) = lat_lng.as_object() else {
                    return Validity::Empty;
                };
                let present = |key: &str| coords.get(key).is_some_and(|v| !v.is_null());
                if !present("lat") || !present("lng") {
                    return Validity::Empty;
                }
            }

            let low_confidence = map
                .get("location_type")
                .and_then(Value::as_str)
                .is_some_and(|t| LOW_CONFIDENCE_TYPES.contains(&t));
            if low_confidence {
                Validity::LowConfidence
            } else {
                Validity::Valid
            }
        }
        _ => Validity::Valid,
    }
}
