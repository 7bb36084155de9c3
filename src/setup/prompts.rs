use std::io::{self, BufRead, Write};

use super::ansi;

/// Ask for a line of input, falling back to `default` on an empty answer.
pub fn ask(label: &str, default: Option<&str>) -> String {
    loop {
        match default {
            Some(d) => print!("  {label} {}: ", ansi::dim(&format!("[{d}]"))),
            None => print!("  {label}: "),
        }
        io::stdout().flush().ok();

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            std::process::exit(1);
        }
        let answer = line.trim();

        if !answer.is_empty() {
            return answer.to_string();
        }
        if let Some(d) = default {
            return d.to_string();
        }
        println!("  {} A value is required", ansi::red("!"));
    }
}

/// Like [`ask`], but an empty answer is allowed and yields `None`.
pub fn ask_optional(label: &str) -> Option<String> {
    print!("  {label} {}: ", ansi::dim("(optional)"));
    io::stdout().flush().ok();

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).ok()?;
    Some(line.trim().to_string()).filter(|s| !s.is_empty())
}

/// Read a secret without echoing it.
pub fn ask_secret(label: &str) -> String {
    loop {
        match rpassword::prompt_password(format!("  {label}: ")) {
            Ok(s) if !s.trim().is_empty() => return s.trim().to_string(),
            Ok(_) => println!("  {} A value is required", ansi::red("!")),
            Err(e) => {
                eprintln!("  Failed to read input: {e}");
                std::process::exit(1);
            }
        }
    }
}

/// Secret that may be left blank.
pub fn ask_secret_optional(label: &str) -> Option<String> {
    rpassword::prompt_password(format!("  {label} {}: ", ansi::dim("(optional)")))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn confirm(question: &str) -> bool {
    print!("  {question} {} ", ansi::dim("[y/N]"));
    io::stdout().flush().ok();

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}
