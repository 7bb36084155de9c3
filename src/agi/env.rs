use std::collections::HashMap;

/// Call metadata block the engine sends before the first command.
#[derive(Debug, Clone, Default)]
pub struct AgiEnv {
    vars: HashMap<String, String>,
}

impl AgiEnv {
    /// Parse one `key: value` line. Lines without a colon are ignored.
    pub fn push_line(&mut self, line: &str) {
        if let Some((key, value)) = line.split_once(':') {
            self.vars
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn unique_id(&self) -> &str {
        self.get("agi_uniqueid")
            .filter(|v| !v.is_empty())
            .unwrap_or("unknown")
    }

    /// Caller number with any `<...>` wrapping removed.
    pub fn caller_id(&self) -> String {
        self.get("agi_callerid")
            .unwrap_or_default()
            .replace(['<', '>'], "")
            .trim()
            .to_string()
    }

    pub fn extension(&self) -> &str {
        self.get("agi_extension").unwrap_or_default()
    }

    pub fn channel(&self) -> &str {
        self.get("agi_channel").unwrap_or_default()
    }
}

impl<'a> FromIterator<&'a str> for AgiEnv {
    fn from_iter<I: IntoIterator<Item = &'a str>>(lines: I) -> Self {
        let mut env = AgiEnv::default();
        for line in lines {
            env.push_line(line);
        }
        env
    }
}
