mod ansi;
mod prompts;
mod writer;

use std::io::IsTerminal;
use std::path::PathBuf;

use crate::config::{self, Config};
use writer::TenantValues;

/// Entry point for `taxi-agi --setup`.
pub fn run() {
    if !std::io::stdin().is_terminal() {
        eprintln!("Error: --setup requires an interactive terminal");
        std::process::exit(1);
    }

    println!();
    println!("  {}", ansi::bold("taxi-agi setup"));
    println!("  {}", ansi::dim("Tenant directory and driver config wizard"));

    let config = Config::load_or_default();

    // Driver config
    println!("\n  {} Driver config", ansi::bold(">>"));
    writer::write_default_config(&config::config_path());

    // Tenant directory
    println!("\n  {} Tenant directory", ansi::bold(">>"));
    let default_path = config.paths.tenants.display().to_string();
    let tenants = PathBuf::from(prompts::ask("Directory file", Some(&default_path)));
    let extension = prompts::ask_optional("Dialed extension, blank for single-tenant");

    // Tenant
    println!("\n  {} Tenant", ansi::bold(">>"));
    let name = prompts::ask("Company name", None);
    let client_token = prompts::ask_secret("Dispatch client token");
    let register_base_url = loop {
        let url = prompts::ask("Dispatch base URL", None);
        if is_http_url(&url) {
            break url;
        }
        println!("  {} Expected an http:// or https:// URL", ansi::red("!"));
    };

    // Google
    println!("\n  {} Google (speech, geocoding)", ansi::bold(">>"));
    let google_api_key = prompts::ask_secret("API key");
    let google_tts_api_key = prompts::ask_secret_optional("Text-to-speech key, blank to reuse");

    // Call handling
    println!("\n  {} Call handling", ansi::bold(">>"));
    let days_valid = loop {
        let days = prompts::ask("Days a registration stays valid", Some("7"));
        match days.parse::<i64>() {
            Ok(d) if d >= 0 => break d,
            _ => println!("  {} Expected a whole number of days", ansi::red("!")),
        }
    };
    let fail_call_to = prompts::ask_optional("Operator dial target");
    let welcome_playback = prompts::ask_optional("Welcome prompt");

    let values = TenantValues {
        name,
        client_token,
        register_base_url,
        google_api_key,
        google_tts_api_key,
        days_valid,
        fail_call_to,
        welcome_playback,
    };

    if let Err(e) = writer::write_tenant(&tenants, extension.as_deref(), &values) {
        eprintln!("  {} {e}", ansi::red("\u{2717}"));
        std::process::exit(1);
    }

    println!("\n  {} Setup complete!", ansi::green("\u{2713}"));
    println!();
    println!("  Next steps:");
    println!("    1. Review {}", config::config_path().display());
    println!("    2. Point the dialplan at: AGI(taxi-agi)");
    println!(
        "       or run: taxi-agi --serve  (FastAGI on port {})",
        config.fastagi.port
    );
    println!();
}

fn is_http_url(s: &str) -> bool {
    let rest = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty() && !host.contains(char::is_whitespace))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_urls() {
        assert!(is_http_url("https://dispatch.example"));
        assert!(is_http_url("http://10.0.0.5:8080/"));
        assert!(!is_http_url("ftp://dispatch.example"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("dispatch.example"));
        assert!(!is_http_url("https://bad host"));
    }
}
