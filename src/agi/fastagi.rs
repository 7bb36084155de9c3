use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::flow;
use crate::registry::CallRegistry;

/// Accept FastAGI connections until `cancel` fires.
///
/// Each call runs on its own thread with a single-threaded runtime, so a
/// call stays strictly sequential and never shares state with another.
pub async fn serve(
    config: Arc<Config>,
    registry: CallRegistry,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.fastagi.host, config.fastagi.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "FastAGI listening");

    let mut next_connection = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let active = registry.active().await;
                tracing::info!(active, "FastAGI listener stopped");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        next_connection += 1;
                        spawn_call(next_connection, stream, peer, config.clone(), registry.clone());
                    }
                    Err(e) => tracing::warn!("Accept failed: {e}"),
                }
            }
        }
    }
}

fn spawn_call(
    connection: u64,
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<Config>,
    registry: CallRegistry,
) {
    // Detach from the listener's runtime; the call thread re-registers it
    let stream = match stream.into_std() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%peer, "Cannot hand off connection: {e}");
            return;
        }
    };

    let spawned = std::thread::Builder::new()
        .name(format!("agi-call-{connection}"))
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!(connection, "Failed to create call runtime: {e}");
                    return;
                }
            };

            rt.block_on(async move {
                registry.register(connection, peer).await;
                run_connection(connection, stream, &config).await;
                registry.deregister(connection).await;
            });
        });

    if let Err(e) = spawned {
        tracing::error!(connection, "Failed to spawn call thread: {e}");
    }
}

async fn run_connection(connection: u64, stream: std::net::TcpStream, config: &Config) {
    let stream = match TcpStream::from_std(stream) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(connection, "Connection unusable: {e}");
            return;
        }
    };

    let (reader, writer) = stream.into_split();
    match flow::handle_call(BufReader::new(reader), writer, config).await {
        Ok(outcome) => tracing::info!(connection, ?outcome, "FastAGI call done"),
        Err(e) => tracing::warn!(connection, "FastAGI session failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn serves_a_call_over_tcp() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.fastagi.host = "127.0.0.1".into();
        config.paths.work_root = dir.path().to_path_buf();
        config.paths.tenants = dir.path().join("none.json");

        // serve() does not report its bound port, so pick a free one first
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        config.fastagi.port = probe.local_addr().unwrap().port();
        drop(probe);

        let registry = CallRegistry::new();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(
            Arc::new(config.clone()),
            registry.clone(),
            cancel.clone(),
        ));

        let addr = format!("127.0.0.1:{}", config.fastagi.port);
        let mut stream = loop {
            match TcpStream::connect(&addr).await {
                Ok(s) => break s,
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        };

        stream
            .write_all(b"agi_network: yes\nagi_uniqueid: 1700000000.9\nagi_callerid: anonymous\n\n")
            .await
            .unwrap();
        let (reader, mut writer) = stream.split();
        let mut lines = BufReader::new(reader).lines();

        let first = lines.next_line().await.unwrap().unwrap();
        assert_eq!(first, "EXEC Playback custom/anonymous-v2");
        writer.write_all(b"200 result=0\n").await.unwrap();
        let second = lines.next_line().await.unwrap().unwrap();
        assert_eq!(second, "EXEC Dial SIP/10,20");
        writer.write_all(b"200 result=0\n").await.unwrap();

        // The call thread deregisters once the flow is done
        for _ in 0..100 {
            if registry.status().await.calls_handled == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(registry.status().await.calls_handled, 1);

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
