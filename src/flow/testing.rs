//! Scripted stand-ins for the telephony engine and external services.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::agi::{AgiChannel, AgiError, AgiReply};
use crate::progress::Record;
use crate::services::geocode::AddressKind;
use crate::services::{CallServices, CallerProfile, LatLng, Location, Registration};

/// Answers every command with `200 result=0` unless told otherwise.
///
/// `EXEC Read` consumes the next scripted key; with none left it reports
/// a hangup, so a test can never spin forever on a menu.
pub struct FakeAgi {
    log: Arc<Mutex<Vec<String>>>,
    digits: VecDeque<String>,
    pending: Option<String>,
    replies: Vec<(String, String)>,
}

impl FakeAgi {
    pub fn new() -> Self {
        Self {
            log: Arc::default(),
            digits: VecDeque::new(),
            pending: None,
            replies: Vec::new(),
        }
    }

    pub fn with_digits<'a>(mut self, digits: impl IntoIterator<Item = &'a str>) -> Self {
        self.digits.extend(digits.into_iter().map(String::from));
        self
    }

    /// Reply with `line` to commands starting with `prefix`.
    pub fn with_reply(mut self, prefix: &str, line: &str) -> Self {
        self.replies.push((prefix.into(), line.into()));
        self
    }

    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.log.clone()
    }
}

impl AgiChannel for FakeAgi {
    async fn send(&mut self, command: &str) -> Result<AgiReply, AgiError> {
        self.log.lock().unwrap().push(command.to_string());

        if let Some((_, line)) = self.replies.iter().find(|(p, _)| command.starts_with(p)) {
            return AgiReply::parse(line);
        }

        let line = if command.starts_with("EXEC Read ") {
            match self.digits.pop_front() {
                Some(digit) => {
                    self.pending = Some(digit);
                    "200 result=0".to_string()
                }
                None => "200 result=-1".to_string(),
            }
        } else if command.starts_with("GET VARIABLE ") {
            match self.pending.take().filter(|d| !d.is_empty()) {
                Some(digit) => format!("200 result=1 ({digit})"),
                None => "200 result=0".to_string(),
            }
        } else {
            "200 result=0".to_string()
        };
        AgiReply::parse(&line)
    }
}

#[derive(Default)]
struct Script {
    transcripts: Mutex<VecDeque<String>>,
    locations: Mutex<HashMap<String, Location>>,
    profile: Mutex<CallerProfile>,
    registration: Mutex<Option<Registration>>,
    tts_broken: AtomicBool,
    lookups: Mutex<Vec<String>>,
    geocoded: Mutex<Vec<(String, AddressKind)>>,
    registered: Mutex<Vec<Record>>,
    synthesized: Mutex<Vec<String>>,
}

/// In-memory [`CallServices`]. Clones share the same script and history.
#[derive(Clone, Default)]
pub struct FakeServices {
    script: Arc<Script>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcripts returned in order; exhausted means silence.
    pub fn with_transcripts<'a>(self, texts: impl IntoIterator<Item = &'a str>) -> Self {
        self.script
            .transcripts
            .lock()
            .unwrap()
            .extend(texts.into_iter().map(String::from));
        self
    }

    pub fn with_location(self, spoken: &str, address: &str, lat: f64, lng: f64) -> Self {
        self.with_typed_location(spoken, address, None, lat, lng)
    }

    pub fn with_typed_location(
        self,
        spoken: &str,
        address: &str,
        location_type: Option<&str>,
        lat: f64,
        lng: f64,
    ) -> Self {
        self.script.locations.lock().unwrap().insert(
            spoken.into(),
            Location {
                address: address.into(),
                location_type: location_type.map(String::from),
                lat_lng: LatLng { lat, lng },
            },
        );
        self
    }

    pub fn with_profile(self, profile: CallerProfile) -> Self {
        *self.script.profile.lock().unwrap() = profile;
        self
    }

    pub fn with_registration(self, success: bool, message: &str) -> Self {
        *self.script.registration.lock().unwrap() = Some(Registration {
            success,
            message: message.into(),
        });
        self
    }

    pub fn without_tts(self) -> Self {
        self.script.tts_broken.store(true, Ordering::Relaxed);
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.script.lookups.lock().unwrap().clone()
    }

    pub fn geocoded(&self) -> Vec<(String, AddressKind)> {
        self.script.geocoded.lock().unwrap().clone()
    }

    pub fn registered(&self) -> Vec<Record> {
        self.script.registered.lock().unwrap().clone()
    }

    pub fn synthesized(&self) -> Vec<String> {
        self.script.synthesized.lock().unwrap().clone()
    }
}

impl CallServices for FakeServices {
    async fn transcribe(&self, _recording: &Path) -> String {
        self.script
            .transcripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default()
    }

    async fn geocode(&self, spoken: &str, kind: AddressKind) -> Option<Location> {
        self.script
            .geocoded
            .lock()
            .unwrap()
            .push((spoken.to_string(), kind));
        self.script.locations.lock().unwrap().get(spoken).cloned()
    }

    async fn lookup_caller(&self, phone: &str) -> CallerProfile {
        self.script.lookups.lock().unwrap().push(phone.to_string());
        self.script.profile.lock().unwrap().clone()
    }

    async fn register_call(&self, record: &Record) -> Registration {
        self.script.registered.lock().unwrap().push(record.clone());
        self.script
            .registration
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Registration {
                success: true,
                message: "Σας ευχαριστούμε".into(),
            })
    }

    async fn synthesize(&self, text: &str, base: &Path) -> Option<PathBuf> {
        self.script
            .synthesized
            .lock()
            .unwrap()
            .push(text.to_string());
        if self.script.tts_broken.load(Ordering::Relaxed) {
            return None;
        }
        Some(base.to_path_buf())
    }
}
