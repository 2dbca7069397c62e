//! The relay engine: one full command cycle per loop pass.
//!
//! `LISTENING -> AWAITING_COMMAND -> FORWARDING -> AWAITING_DUT_RESPONSE
//! -> RELAYING_RESPONSE -> AWAITING_COMMAND`, terminal only at process
//! shutdown. Every runtime failure is recovered into a `status,*` line
//! toward the manager; only startup configuration is allowed to kill the
//! process.
//!
//! The manager always reaches the CA over TCP. The DUT link is TCP, UDP,
//! or serial per configuration: TCP and UDP connections are opened fresh
//! each cycle and closed at cycle end, the serial port is opened once
//! and reused.

use std::net::SocketAddr;
use std::time::Duration;

use certlink_core::error::{Error, Result};
use certlink_core::transport::Transport;
use certlink_core::types::{ConnKind, DutLink};
use certlink_proto::codec::{decode_frame, encode_frame, MAX_PAYLOAD};
use certlink_proto::framing::{read_frame, write_frame, FramerConfig};
use certlink_transport::{SerialTransport, TcpServer, TcpTransport, UdpTransport};

use crate::commands::CommandTable;
use crate::response::{
    ResponseTable, LINE_ERROR, LINE_INCORRECT_SYNTAX, LINE_INVALID, LINE_NO_SUCH_COMMAND,
    LINE_RESPONSE_TIMEOUT, LINE_RUNNING, LINE_SEND_FAILED,
};

/// Size of the manager-command receive buffer.
const CMD_BUF_LEN: usize = 1024;

/// Size of the DUT-response receive buffer.
const RESP_BUF_LEN: usize = 4096;

/// Relay engine configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Manager-side listen address.
    pub listen_addr: String,
    /// Manager-side listen port.
    pub listen_port: u16,
    /// How to reach the DUT agent.
    pub dut: DutLink,
    /// Control-socket wait applied to manager and DUT exchanges.
    pub ctrl_timeout: Duration,
    /// Bound on one accept wait; the loop spins rather than parking.
    pub accept_timeout: Duration,
    /// Outbound DUT connect timeout.
    pub connect_timeout: Duration,
    /// Pause between listener bind retries. Retries are unbounded.
    pub bind_retry_pause: Duration,
    /// Backoff before answering an unknown command name.
    pub unknown_backoff: Duration,
    /// Serial frame-assembly deadline.
    pub serial_deadline: Duration,
}

impl RelayConfig {
    /// Configuration with the deployed timeout policy.
    pub fn new(listen_addr: &str, listen_port: u16, dut: DutLink) -> Self {
        Self {
            listen_addr: listen_addr.to_string(),
            listen_port,
            dut,
            ctrl_timeout: Duration::from_secs(10),
            accept_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            bind_retry_pause: Duration::from_secs(5),
            unknown_backoff: Duration::from_secs(1),
            serial_deadline: Duration::from_secs(120),
        }
    }
}

/// Why a DUT exchange failed; each maps to its own status line.
enum DutFailure {
    Connect,
    Send,
    Receive,
}

/// The relay session: all state for the command cycle, threaded through
/// the loop by reference. No process globals.
pub struct Relay {
    config: RelayConfig,
    commands: CommandTable,
    responses: ResponseTable,
    listener: Option<TcpServer>,
    manager: Option<TcpTransport>,
    /// Persistent serial DUT handle; TCP/UDP handles live one cycle.
    serial_dut: Option<SerialTransport>,
}

impl Relay {
    /// Build a relay with the built-in command and response tables.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            commands: CommandTable::builtin(),
            responses: ResponseTable::builtin(),
            listener: None,
            manager: None,
            serial_dut: None,
        }
    }

    /// Build a relay with a custom command table (tests, vendor beds).
    pub fn with_tables(config: RelayConfig, commands: CommandTable, responses: ResponseTable) -> Self {
        Self {
            config,
            commands,
            responses,
            listener: None,
            manager: None,
            serial_dut: None,
        }
    }

    /// Bind the manager-facing listener now and report its address.
    ///
    /// `run` binds lazily (and retries forever); this exists for callers
    /// that need the bound port before connecting a manager, such as
    /// tests binding port 0.
    pub async fn bind_listener(&mut self) -> Result<SocketAddr> {
        if self.listener.is_none() {
            let endpoint = format!("{}:{}", self.config.listen_addr, self.config.listen_port);
            tracing::info!(endpoint = %endpoint, "control agent server starting");
            self.listener = Some(TcpServer::bind(&endpoint).await?);
        }
        Ok(self
            .listener
            .as_ref()
            .expect("listener bound above")
            .local_addr())
    }

    /// Run the relay until the process is shut down.
    ///
    /// This is a long-running service: listener bind failures log and
    /// retry after a pause, every other failure is recovered into a
    /// status line, and the loop never gives up on its own.
    pub async fn run(&mut self) {
        loop {
            self.cycle().await;
        }
    }

    /// One pass of the relay state machine.
    async fn cycle(&mut self) {
        // LISTENING: the manager-facing server must exist first.
        if self.listener.is_none() {
            if let Err(e) = self.bind_listener().await {
                tracing::error!(error = %e, "control agent server failed to start");
                tokio::time::sleep(self.config.bind_retry_pause).await;
                return;
            }
        }

        // Accept a manager peer, or keep serving the connected one.
        if self.manager.is_none() {
            let listener = self.listener.as_ref().expect("listener bound above");
            match listener.accept(self.config.accept_timeout).await {
                Ok(peer) => self.manager = Some(peer),
                Err(Error::Timeout) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    return;
                }
            }
        }

        // AWAITING_COMMAND.
        let mut cmd_buf = [0u8; CMD_BUF_LEN];
        let n = {
            let manager = self.manager.as_mut().expect("manager accepted above");
            match manager.receive(&mut cmd_buf, self.config.ctrl_timeout).await {
                Ok(n) => n,
                Err(Error::Timeout) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "manager link failed, restarting connection");
                    let _ = manager.close().await;
                    self.manager = None;
                    return;
                }
            }
        };
        if n == 0 {
            return;
        }

        let Some(line) = normalize_command(&cmd_buf[..n]) else {
            return;
        };
        tracing::info!(command = %line, "received command from test manager");

        // Acknowledge before any DUT interaction so the manager knows
        // the link is alive during slow DUT operations.
        self.reply(LINE_RUNNING).await;

        let (name, params) = split_command(&line);

        let Some(def) = self.commands.lookup(name) else {
            tokio::time::sleep(self.config.unknown_backoff).await;
            tracing::warn!(name = %name, "no such command");
            self.reply(LINE_NO_SUCH_COMMAND).await;
            return;
        };
        let (tag, encode) = (def.tag, def.encode);

        // FORWARDING: format the ASCII parameters into a TLV request.
        let payload = match encode(params) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "parameter encoding failed");
                self.reply(LINE_INCORRECT_SYNTAX).await;
                return;
            }
        };
        let request = encode_frame(tag, &payload);

        // AWAITING_DUT_RESPONSE.
        let response = match self.exchange_with_dut(&request).await {
            Ok(response) => response,
            Err(DutFailure::Connect) => {
                tracing::warn!("DUT connection failed");
                self.reply(LINE_ERROR).await;
                return;
            }
            Err(DutFailure::Send) => {
                tracing::warn!("DUT send failed");
                self.reply(LINE_SEND_FAILED).await;
                return;
            }
            Err(DutFailure::Receive) => {
                tracing::warn!("DUT response missing or timed out");
                self.reply(LINE_RESPONSE_TIMEOUT).await;
                return;
            }
        };

        // RELAYING_RESPONSE.
        let line = self.format_response(&response);
        tracing::info!(line = %line.trim_end(), "command response to test manager");
        self.reply(&line).await;
    }

    /// Render a raw DUT reply as the manager-facing status line.
    fn format_response(&self, response: &[u8]) -> String {
        let frame = match decode_frame(response, MAX_PAYLOAD) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed DUT response");
                return LINE_INVALID.to_string();
            }
        };

        let formatter = if frame.tag != 0 {
            self.responses.lookup(frame.tag)
        } else {
            None
        };
        match (formatter, frame.value) {
            (Some(formatter), Some(payload)) => formatter(&payload),
            (Some(_), None) => {
                tracing::warn!(tag = frame.tag, "DUT response payload overflowed");
                LINE_INVALID.to_string()
            }
            (None, _) => {
                tracing::warn!(tag = frame.tag, "no response formatter registered");
                LINE_INVALID.to_string()
            }
        }
    }

    /// Send one status line to the manager. A dead manager link is
    /// logged and torn down; the cycle outcome stands.
    async fn reply(&mut self, line: &str) {
        let Some(manager) = self.manager.as_mut() else {
            return;
        };
        if let Err(e) = manager.send(line.as_bytes()).await {
            tracing::warn!(error = %e, "failed to send status line to manager");
            let _ = manager.close().await;
            self.manager = None;
        }
    }

    /// Forward one request frame to the DUT and collect the reply.
    ///
    /// TCP/UDP handles are opened here and closed on every path out;
    /// the serial handle persists across cycles but is dropped on
    /// failure so the next cycle reopens it.
    async fn exchange_with_dut(&mut self, request: &[u8]) -> std::result::Result<Vec<u8>, DutFailure> {
        match self.config.dut.kind {
            ConnKind::Tcp => {
                let endpoint = self.config.dut.endpoint();
                let mut dut =
                    match TcpTransport::connect_with_timeout(&endpoint, self.config.connect_timeout)
                        .await
                    {
                        Ok(dut) => dut,
                        Err(_) => return Err(DutFailure::Connect),
                    };
                let result = self.exchange_frames(&mut dut, request).await;
                let _ = dut.close().await;
                result
            }
            ConnKind::Udp => {
                let mut dut = match UdpTransport::bind("0.0.0.0:0").await {
                    Ok(dut) => dut,
                    Err(_) => return Err(DutFailure::Connect),
                };
                let peer: SocketAddr = match self.config.dut.endpoint().parse() {
                    Ok(peer) => peer,
                    Err(_) => return Err(DutFailure::Connect),
                };
                if dut.connect(peer).await.is_err() {
                    return Err(DutFailure::Connect);
                }
                let result = self.exchange_frames(&mut dut, request).await;
                let _ = dut.close().await;
                result
            }
            ConnKind::Serial => self.exchange_serial(request).await,
        }
    }

    /// Stream-socket exchange: raw frame out, raw frame back.
    async fn exchange_frames(
        &self,
        dut: &mut dyn Transport,
        request: &[u8],
    ) -> std::result::Result<Vec<u8>, DutFailure> {
        if dut.send(request).await.is_err() {
            return Err(DutFailure::Send);
        }
        let mut buf = vec![0u8; RESP_BUF_LEN];
        match dut.receive(&mut buf, self.config.ctrl_timeout).await {
            Ok(n) if n > 0 => {
                buf.truncate(n);
                Ok(buf)
            }
            _ => Err(DutFailure::Receive),
        }
    }

    /// Serial exchange through the persistent port and the framing layer.
    async fn exchange_serial(&mut self, request: &[u8]) -> std::result::Result<Vec<u8>, DutFailure> {
        if self.serial_dut.is_none() {
            match SerialTransport::open(&self.config.dut.device, self.config.dut.baud).await {
                Ok(port) => self.serial_dut = Some(port),
                Err(e) => {
                    tracing::warn!(error = %e, "serial DUT open failed");
                    return Err(DutFailure::Connect);
                }
            }
        }
        let port = self.serial_dut.as_mut().expect("serial port opened above");

        if write_frame(port, request).await.is_err() {
            self.serial_dut = None;
            return Err(DutFailure::Send);
        }

        let framer = FramerConfig {
            poll_timeout: self.config.serial_deadline,
            deadline: self.config.serial_deadline,
            baud: port.baud(),
        };
        match read_frame(port, &framer, MAX_PAYLOAD).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) | Err(_) => {
                self.serial_dut = None;
                Err(DutFailure::Receive)
            }
        }
    }
}

/// Normalize raw manager input into a command line.
///
/// Strips one trailing CRLF pair if present, then trailing tabs and
/// spaces. Returns `None` for input that is empty after normalization.
pub fn normalize_command(raw: &[u8]) -> Option<String> {
    let mut text = String::from_utf8_lossy(raw).into_owned();
    if text.ends_with("\r\n") {
        text.truncate(text.len() - 2);
    }
    while text.ends_with(' ') || text.ends_with('\t') {
        text.pop();
    }
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Split a command line at the first comma into name and parameters.
pub fn split_command(line: &str) -> (&str, &str) {
    match line.split_once(',') {
        Some((name, params)) => (name, params),
        None => (line, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_crlf_then_trailing_whitespace() {
        assert_eq!(
            normalize_command(b"GetVersion,interface,eth0\r\n").as_deref(),
            Some("GetVersion,interface,eth0")
        );
        // Whitespace inside the CRLF-stripped tail goes too.
        assert_eq!(
            normalize_command(b"GetVersion \t \r\n").as_deref(),
            Some("GetVersion")
        );
        // Bare line without CRLF passes through.
        assert_eq!(
            normalize_command(b"GetVersion").as_deref(),
            Some("GetVersion")
        );
    }

    #[test]
    fn normalize_rejects_empty_results() {
        assert_eq!(normalize_command(b""), None);
        assert_eq!(normalize_command(b"\r\n"), None);
        assert_eq!(normalize_command(b"   \r\n"), None);
        assert_eq!(normalize_command(b"\t \t"), None);
    }

    #[test]
    fn normalize_keeps_lone_cr_or_lf() {
        // Only the exact CRLF pair is recognized as a terminator.
        assert_eq!(normalize_command(b"cmd\n").as_deref(), Some("cmd\n"));
        assert_eq!(normalize_command(b"cmd\r").as_deref(), Some("cmd\r"));
    }

    #[test]
    fn split_command_at_first_comma() {
        assert_eq!(
            split_command("GetVersion,interface,eth0"),
            ("GetVersion", "interface,eth0")
        );
        assert_eq!(split_command("GetVersion"), ("GetVersion", ""));
        assert_eq!(split_command(""), ("", ""));
        assert_eq!(split_command(",x"), ("", "x"));
    }
}
