//! QEMU Machine Protocol (QMP) client, used to notice that the guest halted.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

/// VM run state as reported by `query-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Running,
    Paused,
    Shutdown,
    GuestPanicked,
    InternalError,
    #[serde(other)]
    Other,
}

impl RunState {
    /// States the guest can only leave through an external reset.
    ///
    /// With `-no-reboot -no-shutdown`, a guest reboot or power-off lands in
    /// `shutdown` and stays there.
    pub fn is_halted(self) -> bool {
        matches!(
            self,
            RunState::Shutdown | RunState::GuestPanicked | RunState::InternalError
        )
    }
}

#[derive(Deserialize)]
struct StatusInfo {
    status: RunState,
}

pub struct QmpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl QmpClient {
    /// Connect and negotiate capabilities.
    pub async fn connect(socket: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket)
            .await
            .with_context(|| format!("Failed to connect to QMP socket {}", socket.display()))?;
        let (read, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read),
            writer,
        };

        let greeting = client.read_message().await?;
        if greeting.get("QMP").is_none() {
            bail!("Invalid QMP greeting: {}", greeting);
        }
        client.execute("qmp_capabilities").await?;
        Ok(client)
    }

    /// Execute a command without arguments and return its `return` value.
    pub async fn execute(&mut self, command: &str) -> Result<Value> {
        let request = json!({ "execute": command }).to_string() + "\n";
        self.writer
            .write_all(request.as_bytes())
            .await
            .context("Failed to send QMP command")?;

        // Asynchronous events may arrive before the reply.
        loop {
            let mut message = self.read_message().await?;
            if let Some(error) = message.get("error") {
                bail!("QMP error for '{}': {}", command, error);
            }
            if let Some(ret) = message.get_mut("return") {
                return Ok(ret.take());
            }
        }
    }

    pub async fn query_status(&mut self) -> Result<RunState> {
        let ret = self.execute("query-status").await?;
        let info: StatusInfo = serde_json::from_value(ret).context("Malformed query-status reply")?;
        Ok(info.status)
    }

    async fn read_message(&mut self) -> Result<Value> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .context("Failed to read QMP message")?;
        if n == 0 {
            bail!("QMP socket closed");
        }
        serde_json::from_str(&line).context("Failed to parse QMP message")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[test]
    fn test_run_state_parsing() {
        let info: StatusInfo =
            serde_json::from_str(r#"{"status":"guest-panicked","running":false}"#).unwrap();
        assert_eq!(info.status, RunState::GuestPanicked);
        let info: StatusInfo = serde_json::from_str(r#"{"status":"prelaunch"}"#).unwrap();
        assert_eq!(info.status, RunState::Other);
    }

    #[test]
    fn test_halted_states() {
        assert!(RunState::Shutdown.is_halted());
        assert!(RunState::GuestPanicked.is_halted());
        assert!(!RunState::Running.is_halted());
        assert!(!RunState::Paused.is_halted());
    }

    #[tokio::test]
    async fn test_query_status_against_fake_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("qmp.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            write
                .write_all(b"{\"QMP\": {\"version\": {}, \"capabilities\": []}}\n")
                .await
                .unwrap();
            // qmp_capabilities
            lines.next_line().await.unwrap();
            write.write_all(b"{\"return\": {}}\n").await.unwrap();
            // query-status, preceded by an event
            lines.next_line().await.unwrap();
            write
                .write_all(b"{\"event\": \"SHUTDOWN\", \"data\": {\"guest\": true}}\n")
                .await
                .unwrap();
            write
                .write_all(b"{\"return\": {\"status\": \"shutdown\", \"running\": false}}\n")
                .await
                .unwrap();
        });

        let mut client = QmpClient::connect(&socket).await.unwrap();
        assert_eq!(client.query_status().await.unwrap(), RunState::Shutdown);
        server.await.unwrap();
    }
}
