use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use scast_protocol::{Request, Response};

/// Client for communicating with the scast daemon over its Unix socket.
pub struct CastClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl CastClient {
    /// Connect to the scast daemon.
    pub async fn connect() -> anyhow::Result<Self> {
        let socket_path = scast_protocol::paths::default_socket_path();

        let stream = UnixStream::connect(&socket_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused
                || e.kind() == std::io::ErrorKind::NotFound
            {
                anyhow::anyhow!("scast daemon is not running. Start it with: scast server start")
            } else {
                anyhow::anyhow!(
                    "failed to connect to scast daemon at {}: {e}",
                    socket_path.display()
                )
            }
        })?;

        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    /// Send a request and read the response.
    pub async fn request(&mut self, req: &Request) -> anyhow::Result<Response> {
        let json = serde_json::to_string(req)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let mut line = String::new();
        self.reader.read_line(&mut line).await?;

        if line.is_empty() {
            anyhow::bail!("daemon closed connection");
        }

        let response: Response = serde_json::from_str(&line)?;
        Ok(response)
    }

    /// Read the next line from the daemon (for streaming responses).
    pub async fn read_line(&mut self) -> anyhow::Result<Option<Response>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        let response: Response = serde_json::from_str(&line)?;
        Ok(Some(response))
    }
}
