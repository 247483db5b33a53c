//! Async Unix socket server for session control.
//!
//! Each connection carries line-delimited JSON: one [`ControlRequest`] per
//! line in, one [`ControlResponse`] per line out, until the client hangs up.

use crate::error::{ParleyError, Result};
use crate::ipc::protocol::{ControlRequest, ControlResponse};
use crate::sys;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Handler trait for processing control requests.
#[async_trait::async_trait]
pub trait ControlHandler: Send + Sync {
    /// Handle a request and return a response.
    async fn handle(&self, request: ControlRequest) -> ControlResponse;
}

/// Control server bound to a Unix socket.
pub struct IpcServer {
    socket_path: PathBuf,
    shutdown: watch::Sender<bool>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            socket_path,
            shutdown,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// `$XDG_RUNTIME_DIR/parley.sock`, or `/tmp/parley-{uid}.sock` without a
    /// runtime dir.
    pub fn default_socket_path() -> PathBuf {
        match dirs::runtime_dir() {
            Some(dir) => dir.join("parley.sock"),
            None => {
                PathBuf::from(format!("/tmp/parley-{}.sock", sys::current_uid()))
            }
        }
    }

    /// Accepts connections until [`IpcServer::stop`] is called.
    pub async fn start<H>(&self, handler: H) -> Result<()>
    where
        H: ControlHandler + 'static,
    {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| ParleyError::IpcSocket {
                message: format!("Failed to remove existing socket: {}", e),
            })?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| ParleyError::IpcSocket {
                message: format!("Failed to bind to socket: {}", e),
            })?;
        info!(socket = %self.socket_path.display(), "control server listening");

        let handler = Arc::new(handler);
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => continue,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, handler).await {
                                warn!(error = %e, "control client failed");
                            }
                        });
                    }
                    Err(e) => {
                        return Err(ParleyError::IpcConnection {
                            message: format!("Failed to accept connection: {}", e),
                        });
                    }
                },
            }
        }

        debug!("control server stopped accepting");
        Ok(())
    }

    /// Stops accepting and removes the socket file.
    pub async fn stop(&self) -> Result<()> {
        self.shutdown.send_replace(true);

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| ParleyError::IpcSocket {
                message: format!("Failed to remove socket file: {}", e),
            })?;
        }

        Ok(())
    }
}

async fn handle_client<H>(stream: UnixStream, handler: Arc<H>) -> Result<()>
where
    H: ControlHandler + ?Sized,
{
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| ParleyError::IpcConnection {
            message: format!("Failed to read from client: {}", e),
        })?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // A malformed line gets an error response; the connection stays open.
        let response = match ControlRequest::from_json(line) {
            Ok(request) => handler.handle(request).await,
            Err(e) => {
                debug!(error = %e, "unparseable control request");
                ControlResponse::error(format!("Failed to parse request: {}", e))
            }
        };

        let mut response_json = response.to_json().map_err(|e| ParleyError::IpcProtocol {
            message: format!("Failed to serialize response: {}", e),
        })?;
        response_json.push('\n');

        writer
            .write_all(response_json.as_bytes())
            .await
            .map_err(|e| ParleyError::IpcConnection {
                message: format!("Failed to write to client: {}", e),
            })?;
        writer
            .flush()
            .await
            .map_err(|e| ParleyError::IpcConnection {
                message: format!("Failed to flush writer: {}", e),
            })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use tempfile::TempDir;

    struct MockControlHandler;

    #[async_trait::async_trait]
    impl ControlHandler for MockControlHandler {
        async fn handle(&self, request: ControlRequest) -> ControlResponse {
            match request {
                ControlRequest::Ping => ControlResponse::Pong,
                ControlRequest::CreateSession { .. } => ControlResponse::Created {
                    session_id: SessionId::from("test-session"),
                },
                ControlRequest::SubmitText { text, .. } if text.trim().is_empty() => {
                    ControlResponse::Ignored
                }
                ControlRequest::SubmitText { .. } => ControlResponse::Accepted { epoch: 1 },
                _ => ControlResponse::Ok,
            }
        }
    }

    async fn start_server(socket_path: PathBuf) -> tokio::task::JoinHandle<Result<()>> {
        let handle = tokio::spawn(async move {
            IpcServer::new(socket_path)
                .start(MockControlHandler)
                .await
        });
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        handle
    }

    async fn round_trip(
        lines: &mut tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
        writer: &mut tokio::net::unix::OwnedWriteHalf,
        raw: &str,
    ) -> ControlResponse {
        writer
            .write_all(format!("{}\n", raw).as_bytes())
            .await
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        ControlResponse::from_json(&line).unwrap()
    }

    #[test]
    fn test_default_socket_path_returns_valid_path() {
        let path = IpcServer::default_socket_path();
        match dirs::runtime_dir() {
            Some(dir) => assert_eq!(path, dir.join("parley.sock")),
            None => {
                let uid = crate::sys::current_uid();
                assert_eq!(path, PathBuf::from(format!("/tmp/parley-{}.sock", uid)));
            }
        }
    }

    #[tokio::test]
    async fn test_server_binds_to_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = IpcServer::new(socket_path.clone());
        assert_eq!(server.socket_path(), socket_path.as_path());

        let server_handle = start_server(socket_path.clone()).await;
        assert!(socket_path.exists());
        server_handle.abort();
    }

    #[tokio::test]
    async fn test_many_requests_on_one_connection() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server_handle = start_server(socket_path.clone()).await;

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let ping = ControlRequest::Ping.to_json().unwrap();
        assert_eq!(
            round_trip(&mut lines, &mut writer, &ping).await,
            ControlResponse::Pong
        );

        let create = ControlRequest::CreateSession { settings: None }
            .to_json()
            .unwrap();
        assert!(matches!(
            round_trip(&mut lines, &mut writer, &create).await,
            ControlResponse::Created { .. }
        ));

        let submit = ControlRequest::SubmitText {
            session_id: SessionId::from("test-session"),
            text: "hello".to_string(),
        }
        .to_json()
        .unwrap();
        assert_eq!(
            round_trip(&mut lines, &mut writer, &submit).await,
            ControlResponse::Accepted { epoch: 1 }
        );

        server_handle.abort();
    }

    #[tokio::test]
    async fn test_invalid_json_gets_error_and_connection_survives() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server_handle = start_server(socket_path.clone()).await;

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let response = round_trip(&mut lines, &mut writer, "not valid json").await;
        assert!(matches!(response, ControlResponse::Error { .. }));

        let ping = ControlRequest::Ping.to_json().unwrap();
        assert_eq!(
            round_trip(&mut lines, &mut writer, &ping).await,
            ControlResponse::Pong
        );

        server_handle.abort();
    }

    #[tokio::test]
    async fn test_multiple_concurrent_clients() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server_handle = start_server(socket_path.clone()).await;

        let mut clients = vec![];
        for i in 0..5 {
            let socket_path = socket_path.clone();
            clients.push(tokio::spawn(async move {
                let stream = UnixStream::connect(&socket_path).await.unwrap();
                let (reader, mut writer) = stream.into_split();
                let mut lines = BufReader::new(reader).lines();
                let request = if i % 2 == 0 {
                    ControlRequest::Ping
                } else {
                    ControlRequest::Catalog
                };
                round_trip(&mut lines, &mut writer, &request.to_json().unwrap()).await
            }));
        }

        for client in clients {
            let response = client.await.unwrap();
            assert!(matches!(
                response,
                ControlResponse::Pong | ControlResponse::Ok
            ));
        }

        server_handle.abort();
    }

    #[tokio::test]
    async fn test_stop_ends_accept_loop_and_removes_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = Arc::new(IpcServer::new(socket_path.clone()));

        let running = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.start(MockControlHandler).await })
        };
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert!(socket_path.exists());

        server.stop().await.unwrap();
        let result = tokio::time::timeout(tokio::time::Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(!socket_path.exists());
    }
}
