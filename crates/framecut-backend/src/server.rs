//! The accept loop and the per-connection line loop.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;

use framecut_core::ServiceSettings;

use crate::protocol::Message;
use crate::session::Session;
use crate::transport;

/// Why a connection stopped being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// The client closed its side.
    Disconnected,
    /// The client sent `ShutDown`.
    Shutdown,
    /// The cancellation signal fired.
    Cancelled,
}

fn cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

/// Run blocking work (a render) on the current task. On a multi-thread
/// runtime the worker hands its other tasks off first.
fn run_blocking<T>(work: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

/// Serve line-delimited requests on `stream` until the client goes away,
/// asks to shut down, or `cancel` fires.
///
/// Lines that are not valid JSON are logged and skipped. A render in
/// progress is never interrupted; cancellation is checked between lines.
pub async fn serve_connection<S>(
    stream: S,
    session: &mut Session,
    cancel: &mut watch::Receiver<bool>,
) -> io::Result<ConnectionEnd>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half).lines();
    let mut writer = BufWriter::new(write_half);

    loop {
        if cancelled(cancel) {
            return Ok(ConnectionEnd::Cancelled);
        }
        let line = tokio::select! {
            line = reader.next_line() => line?,
            _ = cancel.changed() => return Ok(ConnectionEnd::Cancelled),
        };
        let Some(line) = line else {
            return Ok(ConnectionEnd::Disconnected);
        };
        if line.trim().is_empty() {
            continue;
        }

        let msg = match Message::parse(&line) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::error!("Failed to parse request ({}): {}", err, line);
                continue;
            }
        };

        let handled = run_blocking(|| session.handle(&msg));
        if let Some(response) = handled.response {
            let out = response.to_line().map_err(io::Error::other)?;
            writer.write_all(out.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        if handled.shutdown {
            return Ok(ConnectionEnd::Shutdown);
        }
    }
}

/// Listen on the control and raw-data channels and serve clients one at a
/// time until cancelled or asked to shut down.
pub async fn run(
    settings: &ServiceSettings,
    mut session: Session,
    mut cancel: watch::Receiver<bool>,
) -> io::Result<()> {
    let mut control = transport::bind(&settings.pipe)?;
    let raw_data = transport::bind(&settings.raw_data_pipe)?;
    tracing::info!(
        "Listening on {} (raw data on {})",
        control.endpoint(),
        raw_data.endpoint()
    );
    let raw_data_task = tokio::spawn(hold_raw_data(raw_data));

    let result = loop {
        if cancelled(&cancel) {
            break Ok(());
        }
        tracing::info!("Waiting for client...");
        let stream = tokio::select! {
            accepted = control.accept() => accepted,
            _ = cancel.changed() => break Ok(()),
        };
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => break Err(err),
        };
        tracing::info!("Client connected");

        match serve_connection(stream, &mut session, &mut cancel).await {
            Ok(ConnectionEnd::Disconnected) => tracing::info!("Client disconnected"),
            Ok(ConnectionEnd::Shutdown) => break Ok(()),
            Ok(ConnectionEnd::Cancelled) => break Ok(()),
            Err(err) => tracing::warn!("Connection dropped: {}", err),
        }
    };

    raw_data_task.abort();
    tracing::info!("Backend stopped");
    result
}

/// Accept raw-data clients and keep the latest one open. Nothing is
/// exchanged on this channel yet.
async fn hold_raw_data(mut listener: transport::Listener) {
    let mut held: Option<transport::Connection> = None;
    loop {
        match listener.accept().await {
            Ok(connection) => {
                tracing::debug!("Raw data client connected");
                if held.replace(connection).is_some() {
                    tracing::debug!("Replaced previous raw data client");
                }
            }
            Err(err) => {
                tracing::warn!("Raw data channel closed: {}", err);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use framecut_core::config::OutputSize;
    use framecut_core::{Color, PluginRegistry};
    use framecut_render::{Compositor, CpuAccelerator, InternalPlugin};
    use tokio::io::AsyncReadExt;

    fn session() -> Session {
        let mut registry = PluginRegistry::new();
        registry
            .init(vec![Box::new(InternalPlugin::new(Arc::new(CpuAccelerator::default())))])
            .unwrap();
        Session::new(Compositor::new(
            Arc::new(registry),
            OutputSize { width: 2, height: 2 },
            Color::BLACK,
            std::env::temp_dir(),
        ))
    }

    #[tokio::test]
    async fn test_bad_lines_are_skipped() {
        let (mut client, server) = tokio::io::duplex(4096);
        let (_tx, mut rx) = watch::channel(false);
        let mut session = session();
        let serving = tokio::spawn(async move {
            let end = serve_connection(server, &mut session, &mut rx).await;
            end.unwrap()
        });

        client
            .write_all(b"not json\n\n{\"Type\":\"ping\",\"RequestId\":\"1\"}\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert_eq!(serving.await.unwrap(), ConnectionEnd::Disconnected);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"RequestId\":\"1\""));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_requests_on_multi_thread_runtime() {
        let (client, server) = tokio::io::duplex(4096);
        let (_tx, mut rx) = watch::channel(false);
        let mut session = session();
        let serving =
            tokio::spawn(async move { serve_connection(server, &mut session, &mut rx).await });

        let (read_half, mut write_half) = tokio::io::split(client);
        write_half
            .write_all(b"{\"Type\":\"RenderOne\",\"RequestId\":\"r\",\"Payload\":0}\n")
            .await
            .unwrap();
        let mut lines = BufReader::new(read_half).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let response = Message::parse(&line).unwrap();
        assert_eq!(response.payload["status"], "completed");

        write_half.shutdown().await.unwrap();
        assert_eq!(serving.await.unwrap().unwrap(), ConnectionEnd::Disconnected);
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_connection() {
        let (_client, server) = tokio::io::duplex(64);
        let (tx, mut rx) = watch::channel(false);
        let mut session = session();
        let serving =
            tokio::spawn(async move { serve_connection(server, &mut session, &mut rx).await });
        tx.send(true).unwrap();
        assert_eq!(serving.await.unwrap().unwrap(), ConnectionEnd::Cancelled);
    }
}
