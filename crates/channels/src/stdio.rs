use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use tabwire_bus::NativeTransport;
use tabwire_core::config::HostConfig;
use tabwire_core::{Error, Message, Result};

/// Writes one native-messaging frame: little-endian u32 length prefix
/// followed by the UTF-8 JSON body.
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .map_err(|_| Error::InvalidMessage("frame exceeds u32 length".to_string()))?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one native-messaging frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[derive(Debug)]
struct HostProcess {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    // Held so the process is killed when the transport is dropped.
    _child: Child,
}

/// Runs the external native process as a child and speaks the
/// native-messaging frame format on its stdio: one frame written, one
/// frame read back per exchange. Any stdio failure means the host
/// conversation is unrecoverable and surfaces as `ChannelClosed`.
#[derive(Debug)]
pub struct StdioHost {
    process: Mutex<HostProcess>,
}

impl StdioHost {
    pub fn spawn(config: &HostConfig) -> Result<Self> {
        if config.command.is_empty() {
            return Err(Error::Config("host.command is not set".to_string()));
        }
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ChannelClosed("host stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ChannelClosed("host stdout unavailable".to_string()))?;
        info!(command = %config.command, "Native host process started");
        Ok(Self {
            process: Mutex::new(HostProcess {
                stdin,
                stdout: BufReader::new(stdout),
                _child: child,
            }),
        })
    }
}

#[async_trait]
impl NativeTransport for StdioHost {
    async fn exchange(&self, message: &Message) -> Result<Message> {
        let mut process = self.process.lock().await;
        write_frame(&mut process.stdin, message)
            .await
            .map_err(|e| Error::ChannelClosed(format!("write to host failed: {}", e)))?;
        let reply = read_frame(&mut process.stdout)
            .await
            .map_err(|e| Error::ChannelClosed(format!("read from host failed: {}", e)))?;
        debug!(tag = reply.tag().unwrap_or("-"), "Host replied");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let msg = Message::request("start", "tabwire/coordinator", "Protocols/X")
            .with_input("step", json!(3));

        write_frame(&mut a, &msg).await.unwrap();
        let back = read_frame(&mut b).await.unwrap();
        assert_eq!(back, msg);
    }

    #[tokio::test]
    async fn test_frame_length_prefix_is_little_endian() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &Message::default()).await.unwrap();

        let mut len_bytes = [0u8; 4];
        b.read_exact(&mut len_bytes).await.unwrap();
        // `{}` is two bytes.
        assert_eq!(u32::from_le_bytes(len_bytes), 2);
        let mut body = [0u8; 2];
        b.read_exact(&mut body).await.unwrap();
        assert_eq!(&body, b"{}");
    }

    #[tokio::test]
    async fn test_truncated_frame_errors() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&8u32.to_le_bytes()).await.unwrap();
        a.write_all(b"{\"a").await.unwrap();
        drop(a);

        assert!(read_frame(&mut b).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exchange_with_echoing_child() {
        // `cat` echoes frames verbatim, which is enough to exercise the
        // full write-then-read exchange against a real child process.
        let config = HostConfig {
            command: "cat".to_string(),
            args: vec![],
        };
        let host = StdioHost::spawn(&config).unwrap();

        let msg = Message::action("keep_alive", "tabwire/coordinator", "com.tabwire.host");
        let reply = host.exchange(&msg).await.unwrap();
        assert_eq!(reply, msg);
    }

    #[test]
    fn test_spawn_requires_command() {
        let err = StdioHost::spawn(&HostConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
