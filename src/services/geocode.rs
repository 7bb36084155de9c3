use std::time::Duration;

use serde::Deserialize;

use super::{LatLng, Location};
use crate::config::GeocodeRules;

const ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Which leg of the trip an address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Pickup,
    Destination,
}

/// Google Geocoding client with local pre-rules.
pub struct Geocoder {
    client: reqwest::Client,
    api_key: String,
    language: String,
    timeout: Duration,
    rules: GeocodeRules,
    tenant_name: String,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(default)]
    formatted_address: String,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: RawLatLng,
    #[serde(default)]
    location_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLatLng {
    lat: Option<f64>,
    lng: Option<f64>,
}

impl Geocoder {
    pub fn new(
        client: reqwest::Client,
        api_key: String,
        language: String,
        timeout: Duration,
        rules: GeocodeRules,
        tenant_name: String,
    ) -> Self {
        Self {
            client,
            api_key,
            language,
            timeout,
            rules,
            tenant_name,
        }
    }

    pub async fn geocode(&self, spoken: &str, kind: AddressKind) -> Result<Location, GeocodeError> {
        if let Some(location) = self.resolve_locally(spoken, kind) {
            tracing::debug!(address = %location.address, "Address resolved by local rule");
            return Ok(location);
        }

        if self.api_key.is_empty() {
            return Err(GeocodeError::NotConfigured);
        }

        let query = apply_aliases(spoken, &self.rules);
        let resp = self
            .client
            .get(ENDPOINT)
            .query(&[
                ("address", query.as_str()),
                ("key", self.api_key.as_str()),
                ("language", self.language.as_str()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GeocodeError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GeocodeError::Api(format!("{status}: {body}")));
        }

        let parsed: GeocodeResponse = resp
            .json()
            .await
            .map_err(|e| GeocodeError::Parse(e.to_string()))?;

        location_from_response(parsed)
    }

    /// Landmarks and unspecified destinations never reach the provider.
    fn resolve_locally(&self, spoken: &str, kind: AddressKind) -> Option<Location> {
        let folded = fold_accents(spoken.trim());

        let landmark = self.rules.landmarks.iter().find(|l| {
            let tenant_ok = l.tenants.is_empty()
                || l.tenants
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(&self.tenant_name));
            tenant_ok && l.keywords.iter().any(|k| folded.contains(&fold_accents(k)))
        });
        if let Some(l) = landmark {
            return Some(Location {
                address: l.address.clone(),
                location_type: Some("ROOFTOP".into()),
                lat_lng: LatLng { lat: l.lat, lng: l.lng },
            });
        }

        let unspecified = kind == AddressKind::Destination
            && self
                .rules
                .unspecified_destinations
                .iter()
                .any(|d| fold_accents(d) == folded);
        unspecified.then(|| Location {
            address: spoken.trim().to_string(),
            location_type: Some("EXACT".into()),
            lat_lng: LatLng { lat: 0.0, lng: 0.0 },
        })
    }
}

fn location_from_response(resp: GeocodeResponse) -> Result<Location, GeocodeError> {
    match resp.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => return Err(GeocodeError::NoResults),
        other => return Err(GeocodeError::Status(other.to_string())),
    }

    let first = resp
        .results
        .into_iter()
        .next()
        .ok_or(GeocodeError::NoResults)?;
    let (Some(lat), Some(lng)) = (first.geometry.location.lat, first.geometry.location.lng) else {
        return Err(GeocodeError::MissingCoordinates);
    };

    Ok(Location {
        address: first.formatted_address,
        location_type: first.geometry.location_type,
        lat_lng: LatLng { lat, lng },
    })
}

/// Replace whole-word aliases, ignoring case and Greek accents.
fn apply_aliases(spoken: &str, rules: &GeocodeRules) -> String {
    let mut words: Vec<String> = spoken.split_whitespace().map(String::from).collect();

    for (from, to) in &rules.aliases {
        let pattern: Vec<String> = from.split_whitespace().map(fold_accents).collect();
        if pattern.is_empty() {
            continue;
        }
        let mut i = 0;
        while i + pattern.len() <= words.len() {
            let matches = words[i..i + pattern.len()]
                .iter()
                .zip(&pattern)
                .all(|(w, p)| fold_accents(w.trim_matches(|c: char| !c.is_alphanumeric())) == *p);
            if matches {
                words.splice(i..i + pattern.len(), [to.clone()]);
            }
            i += 1;
        }
    }

    words.join(" ")
}

/// Lowercase and strip Greek tonos/dialytika so spoken variants compare equal.
pub fn fold_accents(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'ά' => 'α',
            'έ' => 'ε',
            'ή' => 'η',
            'ί' | 'ϊ' | 'ΐ' => 'ι',
            'ό' => 'ο',
            'ύ' | 'ϋ' | 'ΰ' => 'υ',
            'ώ' => 'ω',
            other => other,
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("geocoding API key not configured")]
    NotConfigured,
    #[error("no results for address")]
    NoResults,
    #[error("result has no coordinates")]
    MissingCoordinates,
    #[error("geocoder status {0}")]
    Status(String),
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("unexpected response: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Landmark;

    fn geocoder(rules: GeocodeRules, tenant: &str) -> Geocoder {
        Geocoder::new(
            reqwest::Client::new(),
            String::new(),
            "el-GR".into(),
            Duration::from_secs(1),
            rules,
            tenant.into(),
        )
    }

    fn airport() -> Landmark {
        Landmark {
            keywords: vec!["αεροδρομιο".into(), "airport".into()],
            address: "Αεροδρόμιο Αθηνών Ελευθέριος Βενιζέλος, Σπάτα".into(),
            lat: 37.9363405,
            lng: 23.946668,
            tenants: vec!["Cosmos".into()],
        }
    }

    #[test]
    fn parses_first_result() {
        let resp: GeocodeResponse = serde_json::from_str(
            r#"{"status":"OK","results":[{
                "formatted_address":"Πλατεία Συντάγματος, Αθήνα 105 63, Ελλάδα",
                "geometry":{"location":{"lat":37.9755,"lng":23.7348},"location_type":"GEOMETRIC_CENTER"}
            }]}"#,
        )
        .unwrap();
        let location = location_from_response(resp).unwrap();
        assert_eq!(location.address, "Πλατεία Συντάγματος, Αθήνα 105 63, Ελλάδα");
        assert_eq!(location.lat_lng, LatLng { lat: 37.9755, lng: 23.7348 });
        assert_eq!(location.location_type.as_deref(), Some("GEOMETRIC_CENTER"));
    }

    #[test]
    fn status_and_shape_failures() {
        let zero: GeocodeResponse =
            serde_json::from_str(r#"{"status":"ZERO_RESULTS","results":[]}"#).unwrap();
        assert!(matches!(location_from_response(zero), Err(GeocodeError::NoResults)));

        let denied: GeocodeResponse =
            serde_json::from_str(r#"{"status":"REQUEST_DENIED"}"#).unwrap();
        assert!(matches!(location_from_response(denied), Err(GeocodeError::Status(_))));

        let no_coords: GeocodeResponse = serde_json::from_str(
            r#"{"status":"OK","results":[{"formatted_address":"x","geometry":{"location":{"lat":null,"lng":1.0}}}]}"#,
        )
        .unwrap();
        assert!(matches!(
            location_from_response(no_coords),
            Err(GeocodeError::MissingCoordinates)
        ));
    }

    #[test]
    fn folding_ignores_case_and_accents() {
        assert_eq!(fold_accents("Κέντρο Αθήνα"), "κεντρο αθηνα");
        assert_eq!(fold_accents("ΑΕΡΟΔΡΌΜΙΟ"), "αεροδρομιο");
    }

    #[test]
    fn aliases_replace_whole_words() {
        let mut rules = GeocodeRules::default();
        rules.aliases.insert("Μπουρνάζι".into(), "Χαλάνδρι".into());
        assert_eq!(
            apply_aliases("Κύπρου 12 ΜΠΟΥΡΝΑΖΙ", &rules),
            "Κύπρου 12 Χαλάνδρι"
        );
        assert_eq!(
            apply_aliases("Μπουρναζιώτικη 3", &rules),
            "Μπουρναζιώτικη 3"
        );
    }

    #[tokio::test]
    async fn landmark_applies_only_to_listed_tenant() {
        let rules = GeocodeRules {
            landmarks: vec![airport()],
            ..GeocodeRules::default()
        };

        let cosmos = geocoder(rules.clone(), "Cosmos");
        let location = cosmos
            .geocode("στο αεροδρόμιο παρακαλώ", AddressKind::Destination)
            .await
            .unwrap();
        assert_eq!(location.lat_lng.lat, 37.9363405);

        let other = geocoder(rules, "iqtaxi.com");
        assert!(matches!(
            other.geocode("αεροδρόμιο", AddressKind::Destination).await,
            Err(GeocodeError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn unspecified_destination_only_for_destination() {
        let g = geocoder(GeocodeRules::default(), "any");
        let location = g.geocode("Κέντρο", AddressKind::Destination).await.unwrap();
        assert_eq!(location.address, "Κέντρο");
        assert_eq!(location.lat_lng, LatLng { lat: 0.0, lng: 0.0 });

        assert!(matches!(
            g.geocode("Κέντρο", AddressKind::Pickup).await,
            Err(GeocodeError::NotConfigured)
        ));
    }
}
