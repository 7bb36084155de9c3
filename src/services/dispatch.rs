use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CallerProfile, LatLng, Location};
use crate::progress::{keys, Record};

/// Client for the dispatch backend: caller lookup and trip registration.
pub struct DispatchClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    timeout: Duration,
}

/// Fixed trip attributes that do not come from the caller.
#[derive(Debug, Clone)]
pub struct TripDefaults {
    pub taxis: u32,
    pub comment_prefix: String,
    pub days_valid: Option<i64>,
    /// Correlates the trip with this call's working directory.
    pub reference: String,
}

/// Body of `RegisterNoLogin`.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TripRequest {
    pub call_time_stamp: Option<String>,
    pub caller_phone: String,
    pub customer_name: String,
    pub road_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub destination: String,
    pub dest_latitude: f64,
    pub dest_longitude: f64,
    pub taxis_no: u32,
    pub comments: String,
    pub reference_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_valid: Option<i64>,
}

impl TripRequest {
    /// Build the request from a finished progress record.
    pub fn from_record(record: &Record, defaults: &TripDefaults) -> Result<Self, DispatchError> {
        let text = |key: &'static str| -> Result<String, DispatchError> {
            match record.get(key) {
                Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                _ => Err(DispatchError::MissingField(key)),
            }
        };
        let location = |key: &'static str| -> Option<LatLng> {
            record
                .get(key)
                .and_then(|v| serde_json::from_value::<Location>(v.clone()).ok())
                .map(|l| l.lat_lng)
        };

        let pickup = location(keys::PICKUP_LOCATION)
            .ok_or(DispatchError::MissingField(keys::PICKUP_LOCATION))?;
        // Unspecified destinations are registered without coordinates.
        let dest = location(keys::DESTINATION_LOCATION).unwrap_or(LatLng { lat: 0.0, lng: 0.0 });

        Ok(Self {
            // Booked for now; the call flow never collects a reservation time
            call_time_stamp: None,
            caller_phone: text(keys::PHONE)?,
            customer_name: text(keys::NAME)?,
            road_name: text(keys::PICKUP)?,
            latitude: pickup.lat,
            longitude: pickup.lng,
            destination: text(keys::DESTINATION)?,
            dest_latitude: dest.lat,
            dest_longitude: dest.lng,
            taxis_no: defaults.taxis,
            comments: defaults.comment_prefix.clone(),
            reference_path: defaults.reference.clone(),
            days_valid: defaults.days_valid,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<ResultBlock>,
    #[serde(default)]
    response: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultBlock {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    result_code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
}

impl DispatchClient {
    pub fn new(client: reqwest::Client, base_url: String, token: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout,
        }
    }

    fn configured(&self) -> Result<(), DispatchError> {
        if self.base_url.is_empty() || self.token.is_empty() {
            return Err(DispatchError::NotConfigured);
        }
        Ok(())
    }

    /// Look up what the backend knows about a caller.
    pub async fn lookup_caller(&self, phone: &str) -> Result<CallerProfile, DispatchError> {
        self.configured()?;
        let url = format!("{}/api/Calls/checkCallerID/{phone}", self.base_url);

        let resp = self
            .client
            .get(&url)
            .header("Authorization", &self.token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DispatchError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DispatchError::Api(format!("{status}: {body}")));
        }

        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| DispatchError::Parse(e.to_string()))?;
        profile_from_envelope(envelope)
    }

    /// Submit a trip. Returns the backend's trip id.
    pub async fn register_call(&self, trip: &TripRequest) -> Result<i64, DispatchError> {
        self.configured()?;
        let url = format!("{}/api/Calls/RegisterNoLogin", self.base_url);
        tracing::debug!(?trip, "Registering trip");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", &self.token)
            .timeout(self.timeout)
            .json(trip)
            .send()
            .await
            .map_err(|e| DispatchError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DispatchError::Api(format!("{status}: {body}")));
        }

        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| DispatchError::Parse(e.to_string()))?;
        trip_id_from_envelope(envelope)
    }
}

fn profile_from_envelope(envelope: Envelope) -> Result<CallerProfile, DispatchError> {
    let result = envelope.result.unwrap_or_default();
    if result.result.as_deref() != Some("SUCCESS") {
        return Err(DispatchError::Rejected(result.msg.filter(|m| !m.trim().is_empty())));
    }

    let response = envelope.response.unwrap_or(Value::Null);
    let text = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let main = response.get("mainAddresss");
    let pickup = text(main.and_then(|m| m.get("address")));
    let lat_lng = main.and_then(|m| {
        let lat = m.get("lat").and_then(number)?;
        let lng = m.get("lng").and_then(number)?;
        Some(LatLng { lat, lng })
    });

    Ok(CallerProfile {
        name: text(response.get("callerName")),
        pickup,
        lat_lng,
        do_not_serve: response.get("doNotServe").is_some_and(truthy),
    })
}

fn trip_id_from_envelope(envelope: Envelope) -> Result<i64, DispatchError> {
    let id = envelope
        .response
        .as_ref()
        .and_then(|r| r.get("id"))
        .and_then(number)
        .unwrap_or(0.0);
    if id > 0.0 {
        return Ok(id as i64);
    }

    let result = envelope.result.unwrap_or_default();
    tracing::warn!(code = ?result.result_code, msg = ?result.msg, "Trip not accepted");
    Err(DispatchError::Rejected(result.msg.filter(|m| !m.trim().is_empty())))
}

/// Coordinates arrive as numbers or numeric strings.
fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => matches!(s.trim(), "1" | "true" | "True"),
        _ => false,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch backend not configured")]
    NotConfigured,
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("unexpected response: {0}")]
    Parse(String),
    #[error("rejected by backend: {}", .0.as_deref().unwrap_or("no message"))]
    Rejected(Option<String>),
    #[error("progress record is missing {0}")]
    MissingField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(v: Value) -> Envelope {
        serde_json::from_value(v).unwrap()
    }

    fn defaults() -> TripDefaults {
        TripDefaults {
            taxis: 1,
            comment_prefix: "[ΑΥΤΟΜΑΤΟΠΟΙΗΜΕΝΗ ΚΛΗΣΗ]".into(),
            days_valid: Some(7),
            reference: "/tmp/auto_register_call/4039/6900000000/1700000000.1".into(),
        }
    }

    fn complete_record() -> Record {
        let Value::Object(map) = json!({
            "phone": "6900000000",
            "name": "Γιώργος",
            "pickup": "Πλατεία Συντάγματος",
            "pickupLocation": {"address": "Πλατεία Συντάγματος, Αθήνα", "latLng": {"lat": 37.9755, "lng": 23.7348}},
            "destination": "Πειραιάς",
            "destinationLocation": {"address": "Πειραιάς", "latLng": {"lat": 37.94, "lng": 23.64}}
        }) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn lookup_parses_profile() {
        let profile = profile_from_envelope(envelope(json!({
            "result": {"result": "SUCCESS"},
            "response": {
                "callerName": "Μαρία",
                "mainAddresss": {"address": "Ερμού 10", "lat": 37.97, "lng": "23.73"},
                "doNotServe": "0"
            }
        })))
        .unwrap();
        assert_eq!(profile.name.as_deref(), Some("Μαρία"));
        assert_eq!(profile.pickup.as_deref(), Some("Ερμού 10"));
        assert_eq!(profile.lat_lng, Some(LatLng { lat: 37.97, lng: 23.73 }));
        assert!(!profile.do_not_serve);
    }

    #[test]
    fn lookup_flags_do_not_serve() {
        for flag in [json!(true), json!(1), json!("1")] {
            let profile = profile_from_envelope(envelope(json!({
                "result": {"result": "SUCCESS"},
                "response": {"doNotServe": flag}
            })))
            .unwrap();
            assert!(profile.do_not_serve);
            assert!(profile.name.is_none());
        }
    }

    #[test]
    fn lookup_failure_is_rejected() {
        let err = profile_from_envelope(envelope(json!({
            "result": {"result": "FAILURE", "msg": "not found"}
        })))
        .unwrap_err();
        assert!(matches!(err, DispatchError::Rejected(Some(m)) if m == "not found"));
    }

    #[test]
    fn registration_needs_positive_id() {
        assert_eq!(
            trip_id_from_envelope(envelope(json!({"response": {"id": 4711}}))).unwrap(),
            4711
        );
        assert!(matches!(
            trip_id_from_envelope(envelope(json!({"response": {"id": 0}}))),
            Err(DispatchError::Rejected(None))
        ));
        assert!(matches!(
            trip_id_from_envelope(envelope(json!({
                "result": {"resultCode": 3, "msg": "Εκτός περιοχής εξυπηρέτησης"}
            }))),
            Err(DispatchError::Rejected(Some(_)))
        ));
    }

    #[test]
    fn trip_request_from_record() {
        let trip = TripRequest::from_record(&complete_record(), &defaults()).unwrap();
        assert_eq!(trip.caller_phone, "6900000000");
        assert_eq!(trip.latitude, 37.9755);
        assert_eq!(trip.dest_longitude, 23.64);
        assert_eq!(trip.comments, "[ΑΥΤΟΜΑΤΟΠΟΙΗΜΕΝΗ ΚΛΗΣΗ]");

        let body = serde_json::to_value(&trip).unwrap();
        assert_eq!(body["taxisNo"], 1);
        assert_eq!(body["daysValid"], 7);
        assert!(body["callTimeStamp"].is_null());
        assert!(body["referencePath"].as_str().unwrap().ends_with("1700000000.1"));
    }

    #[test]
    fn only_collected_fields_reach_the_request() {
        let mut record = complete_record();
        record.insert("comments".into(), json!("δίπλα στο περίπτερο"));
        record.insert("reservationStamp".into(), json!("2024-05-01T10:00:00"));

        let trip = TripRequest::from_record(&record, &defaults()).unwrap();
        assert_eq!(trip.comments, "[ΑΥΤΟΜΑΤΟΠΟΙΗΜΕΝΗ ΚΛΗΣΗ]");
        assert_eq!(trip.call_time_stamp, None);
    }

    #[test]
    fn numeric_phone_and_missing_destination_coordinates() {
        let mut record = complete_record();
        record.insert("phone".into(), json!(6900000000u64));
        record.remove("destinationLocation");

        let trip = TripRequest::from_record(&record, &defaults()).unwrap();
        assert_eq!(trip.caller_phone, "6900000000");
        assert_eq!((trip.dest_latitude, trip.dest_longitude), (0.0, 0.0));
    }

    #[test]
    fn missing_name_is_an_error() {
        let mut record = complete_record();
        record.remove("name");
        assert!(matches!(
            TripRequest::from_record(&record, &defaults()),
            Err(DispatchError::MissingField("name"))
        ));
    }
}
