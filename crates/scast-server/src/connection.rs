use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use libscast::{SessionController, StatusBroker};
use scast_protocol::{ErrorCode, Event, Request, Response};

/// Handle a single client connection.
///
/// Requests arrive as JSON lines; each gets exactly one response line.
/// `Subscribe` switches the connection into streaming mode: the current
/// status is delivered as a catch-up event, then every change until the
/// client hangs up.
pub async fn handle_client(
    stream: UnixStream,
    session: SessionController,
    status: Arc<StatusBroker>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("client disconnected");
                return;
            }
            Err(e) => {
                error!("read error: {e}");
                return;
            }
        };

        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let resp = Response::Error {
                    message: format!("invalid request: {e}"),
                    code: ErrorCode::InvalidRequest,
                };
                if write_response(&mut writer, &resp).await.is_err() {
                    return;
                }
                continue;
            }
        };

        if matches!(request, Request::Subscribe) {
            // Receiver first, then the snapshot: a publish landing in
            // between shows up in the stream, the catch-up, or both.
            let (rx, last) = status.subscribe();
            let running = match last {
                Some(running) => running,
                // Nothing published yet; ask the coordinator.
                None => session.status().await.map(|r| r.running).unwrap_or(false),
            };
            if write_response(&mut writer, &Response::ok(None)).await.is_err() {
                return;
            }
            let catchup = Response::Event(Event::StatusChanged { running });
            if write_response(&mut writer, &catchup).await.is_err() {
                return;
            }
            forward_events(rx, writer).await;
            return;
        }

        let response = handle_request(request, &session).await;
        if let Err(e) = write_response(&mut writer, &response).await {
            error!("write error: {e}");
            return;
        }
    }
}

async fn handle_request(request: Request, session: &SessionController) -> Response {
    let reply = match request {
        Request::Start { origin } => session.start(origin).await,
        Request::Stop { origin } => session.stop(origin).await,
        Request::Status => session.status().await,
        // Handled by the caller before dispatch.
        Request::Subscribe => {
            return Response::Error {
                message: "subscribe cannot be nested".to_string(),
                code: ErrorCode::InvalidRequest,
            };
        }
    };

    match reply {
        Ok(report) => Response::Ok {
            data: Some(serde_json::to_value(&report).unwrap_or_default()),
        },
        Err(e) => {
            let (code, message) = e.to_error_code();
            Response::Error { message, code }
        }
    }
}

/// Forward status events to a subscribed client's write stream.
async fn forward_events(mut rx: broadcast::Receiver<Event>, mut writer: OwnedWriteHalf) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let resp = Response::Event(event);
                if write_response(&mut writer, &resp).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                // The client missed intermediate flips; the next event
                // carries the current truth.
                warn!(skipped = n, "status subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("status channel closed");
                break;
            }
        }
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &Response,
) -> Result<(), std::io::Error> {
    let json = serde_json::to_string(response)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libscast::capability::{CapabilityBroker, CapabilitySource, GrantOutcome};
    use libscast::process::{DisplayServer, ServerStatus};
    use libscast::spawn_session;
    use scast_protocol::{Origin, StatusReport};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct AlwaysGranted;

    impl CapabilitySource for AlwaysGranted {
        async fn request(&self) -> GrantOutcome {
            GrantOutcome::Granted
        }
    }

    struct FakeDisplay {
        running: AtomicBool,
    }

    impl DisplayServer for FakeDisplay {
        async fn start(
            &self,
            _token: &libscast::CaptureToken,
        ) -> Result<(), libscast::CastError> {
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) {
            self.running.store(false, Ordering::SeqCst);
        }

        async fn query_status(&self) -> ServerStatus {
            if self.running.load(Ordering::SeqCst) {
                ServerStatus::Running
            } else {
                ServerStatus::Stopped
            }
        }
    }

    struct Daemon {
        session: SessionController,
        status: Arc<StatusBroker>,
    }

    impl Daemon {
        fn new() -> Self {
            let capability = Arc::new(CapabilityBroker::new(AlwaysGranted));
            let display = Arc::new(FakeDisplay {
                running: AtomicBool::new(false),
            });
            let status = Arc::new(StatusBroker::default());
            let session = spawn_session(capability, display, Arc::clone(&status));
            Self { session, status }
        }

        fn connect(&self) -> Harness {
            let (client, server) = UnixStream::pair().expect("socket pair");
            tokio::spawn(handle_client(
                server,
                self.session.clone(),
                Arc::clone(&self.status),
            ));
            let (read_half, write_half) = client.into_split();
            Harness {
                reader: BufReader::new(read_half),
                writer: write_half,
            }
        }
    }

    struct Harness {
        reader: BufReader<tokio::net::unix::OwnedReadHalf>,
        writer: OwnedWriteHalf,
    }

    impl Harness {
        async fn send(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
            self.writer.flush().await.unwrap();
        }

        async fn recv(&mut self) -> Response {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            assert!(!line.is_empty(), "server closed connection");
            serde_json::from_str(&line).unwrap()
        }

        async fn roundtrip(&mut self, request: &Request) -> Response {
            self.send(&serde_json::to_string(request).unwrap()).await;
            self.recv().await
        }
    }

    fn report(response: Response) -> StatusReport {
        match response {
            Response::Ok { data: Some(data) } => serde_json::from_value(data).unwrap(),
            other => panic!("expected ok with data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_status_stop_over_the_wire() {
        let daemon = Daemon::new();
        let mut client = daemon.connect();

        let r = report(
            client
                .roundtrip(&Request::Start {
                    origin: Origin::Local,
                })
                .await,
        );
        assert!(r.running);

        let r = report(client.roundtrip(&Request::Status).await);
        assert!(r.running);
        assert!(r.grant);

        let r = report(
            client
                .roundtrip(&Request::Stop {
                    origin: Origin::Local,
                })
                .await,
        );
        assert!(!r.running);
        assert_eq!(r.state, "idle");
    }

    #[tokio::test]
    async fn invalid_json_gets_an_error_and_keeps_the_connection() {
        let daemon = Daemon::new();
        let mut client = daemon.connect();

        client.send("not json").await;
        match client.recv().await {
            Response::Error { code, .. } => assert_eq!(code, ErrorCode::InvalidRequest),
            other => panic!("expected error, got {other:?}"),
        }

        // Still serviceable.
        let r = report(client.roundtrip(&Request::Status).await);
        assert!(!r.running);
    }

    #[tokio::test]
    async fn subscribe_delivers_catchup_then_changes() {
        let daemon = Daemon::new();

        let mut watcher = daemon.connect();
        watcher.send(r#"{"cmd":"subscribe"}"#).await;
        match watcher.recv().await {
            Response::Ok { .. } => {}
            other => panic!("expected subscribe ack, got {other:?}"),
        }
        match watcher.recv().await {
            Response::Event(Event::StatusChanged { running }) => assert!(!running),
            other => panic!("expected catch-up event, got {other:?}"),
        }

        // A start on another connection reaches the watcher: first the
        // optimistic signal, then the authoritative confirmation.
        let mut controller = daemon.connect();
        let r = report(
            controller
                .roundtrip(&Request::Start {
                    origin: Origin::External,
                })
                .await,
        );
        assert!(r.running);

        for _ in 0..2 {
            match watcher.recv().await {
                Response::Event(Event::StatusChanged { running }) => assert!(running),
                other => panic!("expected running=true event, got {other:?}"),
            }
        }

        controller
            .roundtrip(&Request::Stop {
                origin: Origin::External,
            })
            .await;
        match watcher.recv().await {
            Response::Event(Event::StatusChanged { running }) => assert!(!running),
            other => panic!("expected running=false event, got {other:?}"),
        }
    }
}
