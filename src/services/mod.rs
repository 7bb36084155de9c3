//! External collaborators of a call: speech, geocoding and the dispatch
//! backend.
//!
//! The flow talks to them only through [`CallServices`], whose methods
//! never fail. Every transport or provider error is logged here and
//! mapped to the empty result the flow treats as "try again".

pub mod dispatch;
pub mod geocode;
pub mod stt;
pub mod tts;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{Config, Tenant};
use crate::progress::Record;
use dispatch::{DispatchClient, DispatchError, TripDefaults, TripRequest};
use geocode::{AddressKind, Geocoder};
use stt::SttClient;
use tts::TtsClient;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// A geocoded address. Serializes to the record shape `{address, latLng}`;
/// the provider's precision tag is read but never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub address: String,
    #[serde(rename = "location_type", default, skip_serializing)]
    pub location_type: Option<String>,
    #[serde(rename = "latLng")]
    pub lat_lng: LatLng,
}

impl Location {
    /// Input for the validator: the stored shape plus `location_type`.
    pub fn validation_value(&self) -> Value {
        let mut value = json!({
            "address": self.address,
            "latLng": {"lat": self.lat_lng.lat, "lng": self.lat_lng.lng},
        });
        if let Some(kind) = &self.location_type {
            value["location_type"] = Value::String(kind.clone());
        }
        value
    }
}

/// What the dispatch backend remembers about a caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallerProfile {
    pub name: Option<String>,
    pub pickup: Option<String>,
    pub lat_lng: Option<LatLng>,
    pub do_not_serve: bool,
}

impl CallerProfile {
    /// The remembered pickup, if it came with coordinates.
    pub fn pickup_location(&self) -> Option<Location> {
        Some(Location {
            address: self.pickup.clone()?,
            location_type: None,
            lat_lng: self.lat_lng?,
        })
    }
}

/// Outcome of submitting a trip, with the sentence to speak to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub success: bool,
    pub message: String,
}

/// Everything the call flow needs from the outside world.
#[allow(async_fn_in_trait)]
pub trait CallServices {
    /// Transcript of a recording. Empty when nothing usable was heard.
    async fn transcribe(&self, recording: &Path) -> String;

    async fn geocode(&self, spoken: &str, kind: AddressKind) -> Option<Location>;

    /// Empty profile when the caller is unknown or the backend is down.
    async fn lookup_caller(&self, phone: &str) -> CallerProfile;

    async fn register_call(&self, record: &Record) -> Registration;

    /// Synthesize `text` next to `base` and return the playable name.
    async fn synthesize(&self, text: &str, base: &Path) -> Option<PathBuf>;
}

/// Production services backed by Google APIs and the dispatch backend.
pub struct HttpServices {
    stt: SttClient,
    tts: TtsClient,
    geocoder: Geocoder,
    dispatch: DispatchClient,
    trip: TripDefaults,
    registered_message: String,
    failed_message: String,
}

impl HttpServices {
    /// `reference` ties the registered trip back to this call's files.
    pub fn new(config: &Config, tenant: &Tenant, reference: String) -> Self {
        // One connection pool per call
        let client = reqwest::Client::new();
        let google = &config.google;

        Self {
            stt: SttClient::new(
                client.clone(),
                tenant.google_api_key.clone(),
                google.language.clone(),
                google.profanity_filter,
                Duration::from_secs(google.stt_timeout_secs),
                config.collection.min_recording_ms,
            ),
            tts: TtsClient::new(
                client.clone(),
                tenant.tts_api_key().to_string(),
                google.language.clone(),
                Duration::from_secs(google.tts_timeout_secs),
            ),
            geocoder: Geocoder::new(
                client.clone(),
                tenant.google_api_key.clone(),
                google.language.clone(),
                Duration::from_secs(google.geocode_timeout_secs),
                config.geocode.clone(),
                tenant.name.clone(),
            ),
            dispatch: DispatchClient::new(
                client,
                tenant.register_base_url.clone(),
                tenant.client_token.clone(),
                Duration::from_secs(config.dispatch.timeout_secs),
            ),
            trip: TripDefaults {
                taxis: config.dispatch.taxis,
                comment_prefix: config.dispatch.comment_prefix.clone(),
                days_valid: tenant.days_valid(),
                reference,
            },
            registered_message: config.messages.registered.clone(),
            failed_message: config.messages.registration_failed.clone(),
        }
    }

    async fn try_register(&self, record: &Record) -> Result<i64, DispatchError> {
        let trip = TripRequest::from_record(record, &self.trip)?;
        self.dispatch.register_call(&trip).await
    }
}

impl CallServices for HttpServices {
    async fn transcribe(&self, recording: &Path) -> String {
        match self.stt.transcribe(recording).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(recording = %recording.display(), "Transcription failed: {e}");
                String::new()
            }
        }
    }

    async fn geocode(&self, spoken: &str, kind: AddressKind) -> Option<Location> {
        self.geocoder
            .geocode(spoken, kind)
            .await
            .inspect_err(|e| tracing::warn!(?kind, "Geocoding failed: {e}"))
            .ok()
    }

    async fn lookup_caller(&self, phone: &str) -> CallerProfile {
        match self.dispatch.lookup_caller(phone).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::info!("Caller lookup returned nothing: {e}");
                CallerProfile::default()
            }
        }
    }

    async fn register_call(&self, record: &Record) -> Registration {
        match self.try_register(record).await {
            Ok(id) => {
                tracing::info!(id, "Trip registered");
                Registration {
                    success: true,
                    message: self.registered_message.clone(),
                }
            }
            Err(DispatchError::Rejected(Some(msg))) => {
                tracing::warn!("Trip rejected: {msg}");
                Registration {
                    success: false,
                    message: msg,
                }
            }
            Err(e) => {
                tracing::error!("Trip registration failed: {e}");
                Registration {
                    success: false,
                    message: self.failed_message.clone(),
                }
            }
        }
    }

    async fn synthesize(&self, text: &str, base: &Path) -> Option<PathBuf> {
        self.tts
            .synthesize_to_file(text, base)
            .await
            .inspect_err(|e| tracing::warn!("Speech synthesis failed: {e}"))
            .ok()
    }
}
