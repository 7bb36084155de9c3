use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::validate::LowConfidencePolicy;

/// Driver settings, read from TOML. Every section is optional.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub prompts: PromptConfig,
    pub messages: MessageConfig,
    pub collection: CollectionConfig,
    pub operator: OperatorConfig,
    pub google: GoogleConfig,
    pub dispatch: DispatchConfig,
    pub geocode: GeocodeRules,
    pub fastagi: FastAgiConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    /// Tenant directory (JSON), shared with the dialplan scripts.
    pub tenants: PathBuf,
    /// Root under which each call gets `<extension>/<caller>/<uniqueid>/`.
    pub work_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            tenants: PathBuf::from("/usr/local/bin/config.json"),
            work_root: PathBuf::from("/tmp/auto_register_call"),
        }
    }
}

/// Pre-recorded prompt names as the engine resolves them (no extension).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PromptConfig {
    pub anonymous: String,
    pub welcome: String,
    pub name: String,
    pub pickup: String,
    pub destination: String,
    pub options: String,
    pub invalid: String,
    pub failure: String,
    pub default_address_accepted: String,
    pub registration_fallback: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            anonymous: "custom/anonymous-v2".into(),
            welcome: "custom/welcome-v2".into(),
            name: "custom/give-name-v2".into(),
            pickup: "custom/give-pickup-address-v2".into(),
            destination: "custom/give-dest-address-v2".into(),
            options: "custom/options-v2".into(),
            invalid: "custom/invalid-v2".into(),
            failure: "custom/invalid-v3".into(),
            default_address_accepted: "custom/confirm-default-address-v2".into(),
            registration_fallback: "custom/register-call-conf".into(),
        }
    }
}

/// Spoken text synthesized at runtime, in the caller's language.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MessageConfig {
    /// Placeholders: `{address}`.
    pub offer_pickup: String,
    /// Placeholders: `{name}`, `{pickup}`, `{destination}`.
    pub confirm_summary: String,
    pub registered: String,
    pub registration_failed: String,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            offer_pickup: "Βρήκαμε μια προεπιλεγμένη διεύθυνση: {address}. Πατήστε 1 για να τη χρησιμοποιήσετε ή 2 για να δώσετε νέα διεύθυνση.".into(),
            confirm_summary: "Παρακαλώ επιβεβαιώστε. Όνομα: {name}. Παραλαβή: {pickup}. Προορισμός: {destination}".into(),
            registered: "Σας ευχαριστούμε που καλέσατε. Ο οδηγός θα είναι κοντά σας σύντομα. Καλή διαδρομή!".into(),
            registration_failed: "Κάτι πήγε στραβά με την καταχώρηση της διαδρομής σας".into(),
        }
    }
}

/// What happens after registration is rejected or unreachable.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegisterFailurePolicy {
    /// Speak the failure message and end the call normally.
    #[default]
    Hangup,
    /// Speak the failure message, then bridge to the operator.
    Operator,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectionConfig {
    pub max_attempts: u32,
    pub confirm_rounds: u32,
    pub record_silence_secs: u32,
    pub record_max_secs: u32,
    pub dtmf_timeout_secs: u32,
    /// Transcripts shorter than this (in characters) are treated as noise.
    pub min_transcript_chars: usize,
    /// Recordings shorter than this are not sent to speech-to-text.
    pub min_recording_ms: u64,
    pub low_confidence: LowConfidencePolicy,
    pub register_failure: RegisterFailurePolicy,
    /// Cap on invalid confirm-menu keys. Unbounded when absent.
    pub max_invalid_menu_inputs: Option<u32>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            confirm_rounds: 3,
            record_silence_secs: 2,
            record_max_secs: 10,
            dtmf_timeout_secs: 10,
            min_transcript_chars: 3,
            min_recording_ms: 300,
            low_confidence: LowConfidencePolicy::default(),
            register_failure: RegisterFailurePolicy::default(),
            max_invalid_menu_inputs: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OperatorConfig {
    /// Dial string used when the tenant has no `failCallTo`.
    pub dial: String,
    pub timeout_secs: u32,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            dial: "SIP/10".into(),
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GoogleConfig {
    pub language: String,
    pub stt_timeout_secs: u64,
    pub tts_timeout_secs: u64,
    pub geocode_timeout_secs: u64,
    pub profanity_filter: bool,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            language: "el-GR".into(),
            stt_timeout_secs: 30,
            tts_timeout_secs: 30,
            geocode_timeout_secs: 15,
            profanity_filter: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    pub timeout_secs: u64,
    pub comment_prefix: String,
    pub taxis: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            comment_prefix: "[ΑΥΤΟΜΑΤΟΠΟΙΗΜΕΝΗ ΚΛΗΣΗ]".into(),
            taxis: 1,
        }
    }
}

/// Local rules applied to spoken addresses before the geocoding provider.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeocodeRules {
    /// Place names the provider resolves badly, mapped to a better query.
    pub aliases: BTreeMap<String, String>,
    pub landmarks: Vec<Landmark>,
    /// Destination phrases accepted without coordinates (sent as 0,0).
    pub unspecified_destinations: Vec<String>,
}

impl Default for GeocodeRules {
    fn default() -> Self {
        Self {
            aliases: BTreeMap::new(),
            landmarks: Vec::new(),
            unspecified_destinations: [
                "κεντρο",
                "τοπικο",
                "κεντρο αθηνα",
                "κεντρο θεσσαλονικη",
                "κεντρο πατρα",
                "κεντρο ηρακλειο",
                "κεντρο λαρισα",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// A well-known place resolved locally when any keyword is spoken.
#[derive(Debug, Deserialize, Clone)]
pub struct Landmark {
    pub keywords: Vec<String>,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    /// Restrict to these tenant names. Empty means every tenant.
    #[serde(default)]
    pub tenants: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FastAgiConfig {
    pub host: String,
    pub port: u16,
    /// Port for `/health` and `/status`. Disabled when absent.
    pub health_port: Option<u16>,
}

impl Default for FastAgiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4573,
            health_port: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        load_dotenv();

        let path = config_path();
        tracing::info!("Loading config from {}", path.display());

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            format!(
                "Failed to read config at {}: {}. Copy config.example.toml to {}",
                path.display(),
                e,
                path.display()
            )
        })?;

        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing or broken file yields defaults.
    /// A call in progress must never die on configuration.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Using built-in defaults: {e}");
                let mut config = Config::default();
                config.apply_env();
                config
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("TAXI_AGI_TENANTS") {
            self.paths.tenants = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TAXI_AGI_WORK_ROOT") {
            self.paths.work_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TAXI_AGI_OPERATOR_DIAL") {
            self.operator.dial = v;
        }
    }
}

fn load_dotenv() {
    let env_path = config_dir().join(".env");
    match dotenvy::from_path(&env_path) {
        Ok(()) => tracing::info!("Loaded .env from {}", env_path.display()),
        Err(dotenvy::Error::Io(_)) => {
            tracing::debug!(
                "No .env file at {}, using environment only",
                env_path.display()
            );
        }
        Err(e) => tracing::warn!("Failed to parse .env: {e}"),
    }
}

pub fn config_dir() -> PathBuf {
    if let Ok(p) = std::env::var("TAXI_AGI_CONFIG") {
        // If pointing to a file, use its parent directory
        let path = PathBuf::from(p);
        return path.parent().map(|p| p.to_path_buf()).unwrap_or(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".taxi-agi")
}

pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("TAXI_AGI_CONFIG") {
        return PathBuf::from(p);
    }

    config_dir().join("config.toml")
}

/// Per-tenant credentials and overrides from the shared JSON directory.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Tenant {
    pub name: String,
    pub client_token: String,
    pub register_base_url: String,
    pub google_api_key: String,
    pub google_tts_api_key: Option<String>,
    /// Number or numeric string in the wild.
    pub days_valid: Option<Value>,
    pub fail_call_to: Option<String>,
    pub welcome_playback: Option<String>,
}

impl Tenant {
    pub fn days_valid(&self) -> Option<i64> {
        match self.days_valid.as_ref()? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn tts_api_key(&self) -> &str {
        self.google_tts_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(&self.google_api_key)
    }
}

/// Keys that mark a single-tenant (flat) directory.
const FLAT_MARKERS: &[&str] = &["clientToken", "registerBaseUrl", "googleApiKey"];

/// Resolve the tenant for `extension` from the directory at `path`.
pub fn load_tenant(path: &Path, extension: &str) -> Result<Tenant, TenantError> {
    let contents = std::fs::read_to_string(path).map_err(|e| TenantError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let directory: Value = serde_json::from_str(&contents)?;
    resolve_tenant(directory, extension)
}

fn resolve_tenant(directory: Value, extension: &str) -> Result<Tenant, TenantError> {
    let Value::Object(mut map) = directory else {
        return Err(TenantError::Shape);
    };

    if FLAT_MARKERS.iter().any(|k| map.contains_key(*k)) {
        return Ok(serde_json::from_value(Value::Object(map))?);
    }

    let entry = map
        .remove(extension)
        .ok_or_else(|| TenantError::UnknownExtension(extension.to_string()))?;
    Ok(serde_json::from_value(entry)?)
}

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("failed to read tenant directory {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("tenant directory is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("tenant directory must be a JSON object")]
    Shape,
    #[error("extension {0} not found in tenant directory")]
    UnknownExtension(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_toml_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.collection.max_attempts, 3);
        assert_eq!(config.collection.confirm_rounds, 3);
        assert_eq!(config.operator.dial, "SIP/10");
        assert_eq!(config.google.language, "el-GR");
        assert_eq!(config.collection.low_confidence, LowConfidencePolicy::Reject);
        assert_eq!(config.collection.register_failure, RegisterFailurePolicy::Hangup);
        assert!(config.collection.max_invalid_menu_inputs.is_none());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config: Config = toml::from_str(
            r#"
[collection]
max_attempts = 5
low_confidence = "accept"
register_failure = "operator"

[operator]
dial = "PJSIP/2104115200@vodafone_sip"

[geocode.aliases]
"Μπουρνάζι" = "Χαλάνδρι"

[[geocode.landmarks]]
keywords = ["αεροδρομιο", "airport"]
address = "Αεροδρόμιο Αθηνών Ελευθέριος Βενιζέλος, Σπάτα"
lat = 37.9363405
lng = 23.946668
tenants = ["Cosmos"]
"#,
        )
        .unwrap();

        assert_eq!(config.collection.max_attempts, 5);
        assert_eq!(config.collection.confirm_rounds, 3);
        assert_eq!(config.collection.low_confidence, LowConfidencePolicy::Accept);
        assert_eq!(config.collection.register_failure, RegisterFailurePolicy::Operator);
        assert_eq!(config.operator.timeout_secs, 20);
        assert_eq!(config.geocode.aliases["Μπουρνάζι"], "Χαλάνδρι");
        assert_eq!(config.geocode.landmarks[0].tenants, vec!["Cosmos"]);
        assert!(!config.geocode.unspecified_destinations.is_empty());
    }

    #[test]
    fn tenant_by_extension() {
        let directory = json!({
            "4039": {
                "name": "iqtaxi.com",
                "clientToken": "token-a",
                "registerBaseUrl": "https://dispatch.example/api",
                "googleApiKey": "g-key",
                "daysValid": 7,
                "failCallTo": "PJSIP/6974888710@vodafone_sip"
            },
            "4036": { "name": "Cosmos", "clientToken": "token-b", "daysValid": "30" }
        });

        let tenant = resolve_tenant(directory.clone(), "4039").unwrap();
        assert_eq!(tenant.client_token, "token-a");
        assert_eq!(tenant.days_valid(), Some(7));
        assert_eq!(tenant.fail_call_to.as_deref(), Some("PJSIP/6974888710@vodafone_sip"));
        assert_eq!(tenant.tts_api_key(), "g-key");

        let cosmos = resolve_tenant(directory.clone(), "4036").unwrap();
        assert_eq!(cosmos.days_valid(), Some(30));

        assert!(matches!(
            resolve_tenant(directory, "9999"),
            Err(TenantError::UnknownExtension(_))
        ));
    }

    #[test]
    fn flat_tenant_ignores_extension() {
        let directory = json!({
            "clientToken": "flat-token",
            "registerBaseUrl": "https://dispatch.example",
            "googleApiKey": "k",
            "googleTtsApiKey": "tts-k"
        });
        let tenant = resolve_tenant(directory, "whatever").unwrap();
        assert_eq!(tenant.client_token, "flat-token");
        assert_eq!(tenant.tts_api_key(), "tts-k");
        assert_eq!(tenant.days_valid(), None);
    }

    #[test]
    fn non_object_directory_rejected() {
        assert!(matches!(
            resolve_tenant(json!(["a"]), "1"),
            Err(TenantError::Shape)
        ));
    }

    #[test]
    fn missing_directory_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_tenant(&dir.path().join("nope.json"), "1");
        assert!(matches!(result, Err(TenantError::Read { .. })));
    }
}
