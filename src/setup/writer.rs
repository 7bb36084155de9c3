use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use serde_json::{Map, Value};

use super::ansi;
use super::prompts::confirm;

const CONFIG_TEMPLATE: &str = include_str!("../../config.example.toml");

/// Keys that mark a single-tenant (flat) directory.
const FLAT_MARKERS: &[&str] = &["clientToken", "registerBaseUrl", "googleApiKey"];

/// A tenant entry collected by the wizard.
pub struct TenantValues {
    pub name: String,
    pub client_token: String,
    pub register_base_url: String,
    pub google_api_key: String,
    pub google_tts_api_key: Option<String>,
    pub days_valid: i64,
    pub fail_call_to: Option<String>,
    pub welcome_playback: Option<String>,
}

impl TenantValues {
    fn to_json(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("name".into(), self.name.clone().into());
        entry.insert("clientToken".into(), self.client_token.clone().into());
        entry.insert("registerBaseUrl".into(), self.register_base_url.clone().into());
        entry.insert("googleApiKey".into(), self.google_api_key.clone().into());
        entry.insert("daysValid".into(), self.days_valid.into());

        let optional = [
            ("googleTtsApiKey", &self.google_tts_api_key),
            ("failCallTo", &self.fail_call_to),
            ("welcomePlayback", &self.welcome_playback),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                entry.insert(key.into(), v.clone().into());
            }
        }
        Value::Object(entry)
    }
}

/// Insert `entry` into a tenant directory.
///
/// With an extension the directory is keyed by extension; without one the
/// directory itself is the (flat) tenant. Existing keys the wizard does not
/// ask about are kept.
pub fn merge_tenant(directory: Value, extension: Option<&str>, entry: Value) -> Result<Value, String> {
    let mut directory = match directory {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => return Err("tenant directory must be a JSON object".into()),
    };
    let Value::Object(entry) = entry else {
        return Err("tenant entry must be a JSON object".into());
    };
    let is_flat = FLAT_MARKERS.iter().any(|k| directory.contains_key(*k));

    match extension {
        Some(ext) => {
            if is_flat {
                return Err("tenant directory is single-tenant; add an extension by hand".into());
            }
            let slot = directory
                .entry(ext.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match slot {
                Value::Object(existing) => existing.extend(entry),
                other => *other = Value::Object(entry),
            }
        }
        None => {
            if !is_flat && !directory.is_empty() {
                return Err("tenant directory is keyed by extension; give an extension".into());
            }
            directory.extend(entry);
        }
    }
    Ok(Value::Object(directory))
}

/// Merge the tenant into the directory file, replacing it atomically.
pub fn write_tenant(path: &Path, extension: Option<&str>, values: &TenantValues) -> Result<(), String> {
    let existing = match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .map_err(|e| format!("{} is not valid JSON: {e}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Value::Null,
        Err(e) => return Err(format!("cannot read {}: {e}", path.display())),
    };

    let merged = merge_tenant(existing, extension, values.to_json())?;
    let body = serde_json::to_string_pretty(&merged).map_err(|e| e.to_string())?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| format!("cannot create {}: {e}", dir.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).map_err(|e| format!("cannot write {}: {e}", tmp.display()))?;
    // Owner read/write only: the directory holds API keys
    fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600)).ok();
    fs::rename(&tmp, path).map_err(|e| format!("cannot replace {}: {e}", path.display()))?;

    println!(
        "  {} {} {}",
        ansi::green("\u{2713}"),
        path.display(),
        ansi::dim("(mode 0600)")
    );
    Ok(())
}

/// Write the default driver config unless one exists and the user keeps it.
pub fn write_default_config(path: &Path) {
    if path.exists() {
        println!("  {} {} already exists", ansi::yellow("!"), path.display());
        if !confirm("Overwrite with defaults?") {
            println!("  Skipping config.toml");
            return;
        }
    }

    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir) {
            println!("  {} Failed to create {}: {e}", ansi::red("\u{2717}"), dir.display());
            return;
        }
    }

    match fs::write(path, CONFIG_TEMPLATE) {
        Ok(()) => println!("  {} {}", ansi::green("\u{2713}"), path.display()),
        Err(e) => println!("  {} Failed to write config: {e}", ansi::red("\u{2717}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_tenant, Config};
    use serde_json::json;

    fn values() -> TenantValues {
        TenantValues {
            name: "Cosmos".into(),
            client_token: "token".into(),
            register_base_url: "https://dispatch.example".into(),
            google_api_key: "g-key".into(),
            google_tts_api_key: None,
            days_valid: 30,
            fail_call_to: Some("PJSIP/6974888710@vodafone_sip".into()),
            welcome_playback: None,
        }
    }

    #[test]
    fn adds_extension_and_keeps_others() {
        let directory = json!({"4039": {"name": "iqtaxi.com", "clientToken": "a"}});
        let merged = merge_tenant(directory, Some("4036"), values().to_json()).unwrap();
        assert_eq!(merged["4039"]["clientToken"], "a");
        assert_eq!(merged["4036"]["daysValid"], 30);
        assert!(merged["4036"].get("googleTtsApiKey").is_none());
    }

    #[test]
    fn updates_existing_entry_in_place() {
        let directory = json!({"4036": {"name": "old", "customField": true}});
        let merged = merge_tenant(directory, Some("4036"), values().to_json()).unwrap();
        assert_eq!(merged["4036"]["name"], "Cosmos");
        assert_eq!(merged["4036"]["customField"], true);
    }

    #[test]
    fn refuses_to_mix_layouts() {
        let flat = json!({"clientToken": "x"});
        assert!(merge_tenant(flat, Some("4036"), values().to_json()).is_err());

        let keyed = json!({"4039": {}});
        assert!(merge_tenant(keyed, None, values().to_json()).is_err());
        assert!(merge_tenant(json!([]), None, values().to_json()).is_err());
    }

    #[test]
    fn written_directory_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        write_tenant(&path, Some("4036"), &values()).unwrap();

        let tenant = load_tenant(&path, "4036").unwrap();
        assert_eq!(tenant.name, "Cosmos");
        assert_eq!(tenant.days_valid(), Some(30));
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn config_template_parses_to_defaults() {
        let config: Config = toml::from_str(CONFIG_TEMPLATE).unwrap();
        let defaults = Config::default();
        assert_eq!(config.prompts.welcome, defaults.prompts.welcome);
        assert_eq!(config.messages.registered, defaults.messages.registered);
        assert_eq!(
            config.geocode.unspecified_destinations,
            defaults.geocode.unspecified_destinations
        );
        assert!(config.collection.max_invalid_menu_inputs.is_none());
    }
}
