use std::path::Path;

use crate::agi::{AgiChannel, AgiError, AgiReply};
use crate::audit::AuditLog;

/// Typed telephony commands over an [`AgiChannel`].
///
/// Every command and its reply lands in the call's audit log.
pub struct Telephony<C> {
    channel: C,
    audit: AuditLog,
}

impl<C: AgiChannel> Telephony<C> {
    pub fn new(channel: C, audit: AuditLog) -> Self {
        Self { channel, audit }
    }

    async fn send(&mut self, command: &str) -> Result<AgiReply, AgiError> {
        match self.channel.send(command).await {
            Ok(reply) => {
                self.audit.record(format!(
                    "AGI Command: {command} | Response: {} result={}{}",
                    reply.code,
                    reply.result,
                    reply
                        .data
                        .as_deref()
                        .map(|d| format!(" ({d})"))
                        .unwrap_or_default()
                ));
                if !reply.is_success() {
                    tracing::warn!(command, code = reply.code, "AGI command not accepted");
                }
                Ok(reply)
            }
            Err(e) => {
                self.audit.record(format!("AGI Command: {command} | Error: {e}"));
                Err(e)
            }
        }
    }

    /// Run a dialplan application. `result=-1` means the channel went away.
    async fn exec(&mut self, app: &str, args: &str) -> Result<AgiReply, AgiError> {
        let command = if args.is_empty() {
            format!("EXEC {app}")
        } else {
            format!("EXEC {app} {args}")
        };
        let reply = self.send(&command).await?;
        if reply.is_success() && reply.result == -1 {
            return Err(AgiError::HungUp);
        }
        Ok(reply)
    }

    pub async fn wait(&mut self, secs: u32) -> Result<(), AgiError> {
        self.exec("Wait", &secs.to_string()).await.map(drop)
    }

    pub async fn playback(&mut self, prompt: &str) -> Result<(), AgiError> {
        self.exec("Playback", prompt).await.map(drop)
    }

    /// Record into `path`; its extension selects the format (e.g. `.wav16`).
    pub async fn record(&mut self, path: &Path, silence_secs: u32, max_secs: u32) -> Result<(), AgiError> {
        self.exec(
            "Record",
            &format!("{},{silence_secs},{max_secs}", path.display()),
        )
        .await
        .map(drop)
    }

    /// Play `prompt` and collect one key. Empty when the caller pressed nothing.
    pub async fn read_digit(&mut self, var: &str, prompt: &str, timeout_secs: u32) -> Result<String, AgiError> {
        self.exec("Read", &format!("{var},{prompt},1,,1,{timeout_secs}"))
            .await?;
        let reply = self.send(&format!("GET VARIABLE {var}")).await?;
        Ok(match reply.result {
            1 => reply.data.unwrap_or_default().trim().to_string(),
            _ => String::new(),
        })
    }

    pub async fn start_music_on_hold(&mut self) -> Result<(), AgiError> {
        self.exec("StartMusicOnHold", "").await.map(drop)
    }

    pub async fn stop_music_on_hold(&mut self) -> Result<(), AgiError> {
        self.exec("StopMusicOnHold", "").await.map(drop)
    }

    /// Bridge to `target`. The caller hanging up afterwards is expected.
    pub async fn dial(&mut self, target: &str, timeout_secs: u32) -> Result<(), AgiError> {
        match self.exec("Dial", &format!("{target},{timeout_secs}")).await {
            Ok(_) | Err(AgiError::HungUp) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
