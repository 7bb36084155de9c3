use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::env::AgiEnv;

/// Synchronous command/reply seam to the telephony engine.
///
/// Every command is a single line; the engine answers with exactly one
/// reply before the next command may be sent.
#[allow(async_fn_in_trait)]
pub trait AgiChannel {
    async fn send(&mut self, command: &str) -> Result<AgiReply, AgiError>;
}

/// Parsed reply line, e.g. `200 result=1 (5) endpos=1234`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgiReply {
    pub code: u16,
    pub result: i64,
    /// Text inside the parentheses, if any.
    pub data: Option<String>,
}

impl AgiReply {
    pub fn parse(line: &str) -> Result<Self, AgiError> {
        let line = line.trim();
        let (Some(code), Some(rest)) = (line.get(..3), line.get(3..)) else {
            return Err(AgiError::Malformed(line.to_string()));
        };
        let code: u16 = code
            .parse()
            .map_err(|_| AgiError::Malformed(line.to_string()))?;
        let rest = rest.trim_start_matches(['-', ' ']);

        if code != 200 {
            return Ok(Self {
                code,
                result: -1,
                data: Some(rest.to_string()).filter(|s| !s.is_empty()),
            });
        }

        let value = rest
            .strip_prefix("result=")
            .ok_or_else(|| AgiError::Malformed(line.to_string()))?;
        let digits_end = value
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
            .map(|(i, _)| i)
            .unwrap_or(value.len());
        let result: i64 = value[..digits_end]
            .parse()
            .map_err(|_| AgiError::Malformed(line.to_string()))?;

        let data = match (value.find('('), value.rfind(')')) {
            (Some(open), Some(close)) if close > open => Some(value[open + 1..close].to_string()),
            _ => None,
        };

        Ok(Self { code, result, data })
    }

    pub fn is_success(&self) -> bool {
        self.code == 200
    }
}

/// Line-oriented AGI transport over any async reader/writer pair
/// (process stdin/stdout, or a FastAGI TCP connection).
pub struct AgiSession<R, W> {
    reader: R,
    writer: W,
    hung_up: bool,
}

impl<R, W> AgiSession<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Consume the metadata block (terminated by a blank line) and return
    /// a session ready for commands.
    pub async fn start(mut reader: R, writer: W) -> Result<(Self, AgiEnv), AgiError> {
        let mut env = AgiEnv::default();
        loop {
            let line = read_line(&mut reader).await?;
            if line.is_empty() {
                break;
            }
            env.push_line(&line);
        }

        tracing::debug!(
            call_id = %env.unique_id(),
            extension = %env.extension(),
            channel = %env.channel(),
            "AGI environment received"
        );

        Ok((
            Self {
                reader,
                writer,
                hung_up: false,
            },
            env,
        ))
    }

}

impl<R, W> AgiChannel for AgiSession<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn send(&mut self, command: &str) -> Result<AgiReply, AgiError> {
        // The caller is gone; the engine would only answer 511 from here on
        if self.hung_up {
            return Err(AgiError::HungUp);
        }

        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let mut line = read_line(&mut self.reader).await?;

        // Asynchronous hangup notice precedes the actual reply
        while line == "HANGUP" {
            if !self.hung_up {
                tracing::info!("Engine reported hangup");
            }
            self.hung_up = true;
            line = read_line(&mut self.reader).await?;
        }

        // Multi-line usage text: 520-... up to "520 End of proper usage."
        if line.starts_with("520-") {
            while !line.starts_with("520 ") {
                line = read_line(&mut self.reader).await?;
            }
        }

        let reply = AgiReply::parse(&line)?;
        if reply.code == 511 {
            return Err(AgiError::DeadChannel);
        }
        Ok(reply)
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, AgiError> {
    let mut buf = String::new();
    let n = reader.read_line(&mut buf).await?;
    if n == 0 {
        return Err(AgiError::Closed);
    }
    Ok(buf.trim_end_matches(['\r', '\n']).to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum AgiError {
    #[error("AGI channel I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("AGI channel closed by the engine")]
    Closed,
    #[error("caller hung up")]
    HungUp,
    #[error("command not permitted on a dead channel")]
    DeadChannel,
    #[error("malformed AGI reply: {0}")]
    Malformed(String),
}
