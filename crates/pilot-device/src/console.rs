//! Android emulator console client
//!
//! Each emulator listens on `127.0.0.1:<port>` with a line-based console. A
//! session reads the banner, authenticates when asked to, sends `avd name`,
//! reads up to the `OK` terminator and sends `quit`.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use pilot_core::prelude::*;

/// Per-step deadline for console I/O
const CONSOLE_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves the AVD name behind an emulator console port
#[trait_variant::make(EmulatorConsole: Send)]
pub trait LocalEmulatorConsole {
    async fn avd_name(&self, port: u16) -> Result<String>;
}

/// Console client over a plain TCP connection
#[derive(Debug, Clone)]
pub struct TelnetConsole {
    host: String,
    auth_token_path: Option<PathBuf>,
    step_timeout: Duration,
}

impl Default for TelnetConsole {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            auth_token_path: dirs::home_dir().map(|home| home.join(".emulator_console_auth_token")),
            step_timeout: CONSOLE_STEP_TIMEOUT,
        }
    }
}

impl TelnetConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth_token_path = Some(path.into());
        self
    }

    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    fn read_auth_token(&self) -> Result<String> {
        let path = self
            .auth_token_path
            .as_ref()
            .ok_or_else(|| Error::telnet("console requires auth but no home directory is known"))?;
        let token = std::fs::read_to_string(path).map_err(|e| {
            Error::telnet(format!(
                "console requires auth, cannot read {}: {e}",
                path.display()
            ))
        })?;
        Ok(token.trim().to_string())
    }
}

/// One open console connection
struct ConsoleSession {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    step_timeout: Duration,
}

impl ConsoleSession {
    async fn connect(host: &str, port: u16, step_timeout: Duration) -> Result<Self> {
        let stream = timeout(step_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::timeout(format!("connecting to emulator console {host}:{port}")))?
            .map_err(|e| Error::telnet(format!("cannot connect to {host}:{port}: {e}")))?;

        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
            step_timeout,
        })
    }

    /// Read lines until `OK`; a `KO` line is an error
    async fn read_until_ok(&mut self) -> Result<Vec<String>> {
        let mut collected = Vec::new();
        loop {
            let line = timeout(self.step_timeout, self.lines.next_line())
                .await
                .map_err(|_| Error::timeout("reading emulator console reply"))??
                .ok_or_else(|| Error::telnet("console closed before OK"))?;

            let line = line.trim_end_matches('\r').to_string();
            if line == "OK" {
                return Ok(collected);
            }
            if let Some(reason) = line.strip_prefix("KO") {
                return Err(Error::telnet(format!(
                    "console rejected command: {}",
                    reason.trim_start_matches(':').trim()
                )));
            }
            collected.push(line);
        }
    }

    async fn send(&mut self, command: &str) -> Result<()> {
        trace!("console <- {}", command);
        timeout(self.step_timeout, async {
            self.writer.write_all(command.as_bytes()).await?;
            self.writer.write_all(b"\r\n").await?;
            self.writer.flush().await
        })
        .await
        .map_err(|_| Error::timeout(format!("writing '{command}' to emulator console")))??;
        Ok(())
    }

    async fn command(&mut self, command: &str) -> Result<Vec<String>> {
        self.send(command).await?;
        self.read_until_ok().await
    }
}

fn requires_auth(banner: &[String]) -> bool {
    banner
        .iter()
        .any(|line| line.contains("Authentication required"))
}

impl EmulatorConsole for TelnetConsole {
    async fn avd_name(&self, port: u16) -> Result<String> {
        let mut session = ConsoleSession::connect(&self.host, port, self.step_timeout).await?;

        let banner = session.read_until_ok().await?;
        if requires_auth(&banner) {
            let token = self.read_auth_token()?;
            session.command(&format!("auth {token}")).await?;
        }

        let reply = session.command("avd name").await?;
        let name = reply
            .iter()
            .rev()
            .map(|line| line.trim())
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::telnet(format!("empty avd name reply on port {port}")))?;

        if let Err(e) = session.send("quit").await {
            debug!("console quit on port {} failed: {}", port, e);
        }

        debug!("Emulator on port {} is {}", port, name);
        Ok(name)
    }
}
