//! Tag-indexed command dispatch and the DUT control loop.
//!
//! The dispatch table is dense: one slot per tag up to the top of the
//! tag space, built once at startup. A zero, unknown, or out-of-range
//! tag routes to the default "not implemented" handler, so every frame
//! that decodes produces some response and the loop never aborts on an
//! unknown command.
//!
//! The control loop mirrors the relay's single-command-in-flight
//! protocol: receive one frame, decode, dispatch, reply over the same
//! handle. Malformed frames are dropped with a log line.

use std::net::SocketAddr;
use std::time::Duration;

use certlink_core::error::{Error, Result};
use certlink_core::transport::Transport;
use certlink_core::types::ConnKind;
use certlink_proto::codec::{decode_frame, MAX_PAYLOAD};
use certlink_proto::framing::{read_frame, write_frame, FramerConfig};
use certlink_proto::tags;
use certlink_transport::{SerialTransport, TcpServer, TcpTransport, UdpTransport};

use crate::context::AgentContext;
use crate::handlers::{self, CommandHandler};

/// Size of the command receive buffer.
const CMD_BUF_LEN: usize = 1024;

/// Dense handler table with a default fallback.
pub struct DispatchTable {
    slots: Vec<Option<Box<dyn CommandHandler>>>,
    default: Box<dyn CommandHandler>,
}

impl DispatchTable {
    /// The built-in handler set.
    pub fn builtin() -> Self {
        let mut slots: Vec<Option<Box<dyn CommandHandler>>> =
            (0..tags::table_size()).map(|_| None).collect();

        slots[tags::GET_VERSION as usize] = Some(Box::new(handlers::GetVersion));
        slots[tags::DEVICE_GET_INFO as usize] = Some(Box::new(handlers::DeviceGetInfo));
        slots[tags::DEVICE_LIST_INTERFACES as usize] =
            Some(Box::new(handlers::DeviceListInterfaces));
        slots[tags::STA_GET_IP_CONFIG as usize] = Some(Box::new(handlers::StaGetIpConfig));
        slots[tags::STA_GET_MAC_ADDRESS as usize] = Some(Box::new(handlers::StaGetMacAddress));
        slots[tags::STA_IS_CONNECTED as usize] = Some(Box::new(handlers::StaIsConnected));
        slots[tags::STA_ASSOCIATE as usize] = Some(Box::new(handlers::StaAssociate));
        slots[tags::TRAFFIC_AGENT_CONFIG as usize] = Some(Box::new(handlers::TrafficAgentConfig));
        slots[tags::TRAFFIC_AGENT_SEND as usize] = Some(Box::new(handlers::TrafficAgentSend));
        slots[tags::TRAFFIC_AGENT_RECV_START as usize] =
            Some(Box::new(handlers::TrafficAgentReceiveStart));
        slots[tags::TRAFFIC_AGENT_RECV_STOP as usize] =
            Some(Box::new(handlers::TrafficAgentReceiveStop));
        slots[tags::TRAFFIC_AGENT_RESET as usize] = Some(Box::new(handlers::TrafficAgentReset));

        Self {
            slots,
            default: Box::new(handlers::NotImplemented),
        }
    }

    /// Route one decoded command to its handler and build the response.
    pub fn dispatch(&self, tag: u16, params: &[u8], ctx: &mut AgentContext) -> Vec<u8> {
        let handler = if tag == tags::TAG_NONE {
            None
        } else {
            self.slots.get(tag as usize).and_then(|slot| slot.as_ref())
        };

        match handler {
            Some(handler) => {
                tracing::debug!(tag, handler = handler.name(), "dispatching command");
                handler.handle(tag, params, ctx)
            }
            None => self.default.handle(tag, params, ctx),
        }
    }
}

/// DUT control-loop configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Link kind toward the CA.
    pub kind: ConnKind,
    /// Bind address for the IP kinds.
    pub listen_addr: String,
    /// Listen port for the IP kinds.
    pub listen_port: u16,
    /// Serial device path.
    pub device: String,
    /// Serial baud rate.
    pub baud: u32,
    /// Control receive wait per loop pass.
    pub ctrl_timeout: Duration,
    /// Bound on one accept wait.
    pub accept_timeout: Duration,
    /// Serial frame-assembly deadline.
    pub serial_deadline: Duration,
}

impl DispatcherConfig {
    /// TCP server configuration on the standard timeouts.
    pub fn tcp(listen_addr: &str, listen_port: u16) -> Self {
        Self {
            kind: ConnKind::Tcp,
            listen_addr: listen_addr.to_string(),
            listen_port,
            device: String::new(),
            baud: 0,
            ctrl_timeout: Duration::from_secs(10),
            accept_timeout: Duration::from_secs(1),
            serial_deadline: Duration::from_secs(120),
        }
    }

    /// UDP configuration on the standard timeouts.
    pub fn udp(listen_addr: &str, listen_port: u16) -> Self {
        Self {
            kind: ConnKind::Udp,
            ..Self::tcp(listen_addr, listen_port)
        }
    }

    /// Serial configuration on the standard timeouts.
    pub fn serial(device: &str, baud: u32) -> Self {
        Self {
            kind: ConnKind::Serial,
            listen_addr: String::new(),
            listen_port: 0,
            device: device.to_string(),
            baud,
            ctrl_timeout: Duration::from_secs(10),
            accept_timeout: Duration::from_secs(1),
            serial_deadline: Duration::from_secs(120),
        }
    }
}

/// The DUT agent's control loop.
pub struct Dispatcher {
    config: DispatcherConfig,
    table: DispatchTable,
    ctx: AgentContext,
    listener: Option<TcpServer>,
    peer: Option<TcpTransport>,
    udp: Option<UdpTransport>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, ctx: AgentContext) -> Self {
        Self {
            config,
            table: DispatchTable::builtin(),
            ctx,
            listener: None,
            peer: None,
            udp: None,
        }
    }

    /// Bind the CA-facing TCP listener and report its address.
    ///
    /// Unlike the CA's manager listener, a DUT bind failure is fatal:
    /// the device has nothing to serve without its control port.
    pub async fn bind_listener(&mut self) -> Result<SocketAddr> {
        if self.listener.is_none() {
            let endpoint = format!("{}:{}", self.config.listen_addr, self.config.listen_port);
            self.listener = Some(TcpServer::bind(&endpoint).await?);
        }
        Ok(self
            .listener
            .as_ref()
            .expect("listener bound above")
            .local_addr())
    }

    /// Run the control loop until process shutdown.
    ///
    /// Returns only on a fatal startup failure (bind or serial open).
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(kind = %self.config.kind, "DUT agent ready to receive");
        match self.config.kind {
            ConnKind::Tcp => self.run_tcp().await,
            ConnKind::Udp => self.run_udp().await,
            ConnKind::Serial => self.run_serial().await,
        }
    }

    async fn run_tcp(&mut self) -> Result<()> {
        self.bind_listener().await?;

        loop {
            if self.peer.is_none() {
                let listener = self.listener.as_ref().expect("listener bound above");
                match listener.accept(self.config.accept_timeout).await {
                    Ok(peer) => self.peer = Some(peer),
                    Err(Error::Timeout) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                }
            }

            let mut buf = [0u8; CMD_BUF_LEN];
            let n = {
                let peer = self.peer.as_mut().expect("peer accepted above");
                match peer.receive(&mut buf, self.config.ctrl_timeout).await {
                    Ok(n) => n,
                    Err(Error::Timeout) => continue,
                    Err(e) => {
                        tracing::debug!(error = %e, "control peer gone, awaiting next");
                        let _ = peer.close().await;
                        self.peer = None;
                        continue;
                    }
                }
            };
            if n == 0 {
                continue;
            }

            let Some(response) = self.serve_frame(&buf[..n]) else {
                continue;
            };

            let peer = self.peer.as_mut().expect("peer accepted above");
            if let Err(e) = peer.send(&response).await {
                tracing::warn!(error = %e, "failed to send response");
                let _ = peer.close().await;
                self.peer = None;
            }
        }
    }

    /// Bind the CA-facing UDP endpoint and report its address.
    pub async fn bind_udp(&mut self) -> Result<SocketAddr> {
        if self.udp.is_none() {
            let endpoint = format!("{}:{}", self.config.listen_addr, self.config.listen_port);
            let socket = UdpTransport::bind(&endpoint).await?;
            tracing::info!(local = %socket.local_addr(), "UDP control endpoint bound");
            self.udp = Some(socket);
        }
        Ok(self
            .udp
            .as_ref()
            .expect("socket bound above")
            .local_addr())
    }

    async fn run_udp(&mut self) -> Result<()> {
        self.bind_udp().await?;
        let socket = self.udp.take().expect("socket bound above");

        let mut buf = [0u8; CMD_BUF_LEN];
        loop {
            let (n, src) = match socket.recv_from(&mut buf, self.config.ctrl_timeout).await {
                Ok(received) => received,
                Err(Error::Timeout) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "control receive failed");
                    continue;
                }
            };
            if n == 0 {
                continue;
            }

            let Some(response) = self.serve_frame(&buf[..n]) else {
                continue;
            };

            if let Err(e) = socket.send_to(&response, src).await {
                tracing::warn!(error = %e, peer = %src, "failed to send response");
            }
        }
    }

    async fn run_serial(&mut self) -> Result<()> {
        let mut port = SerialTransport::open(&self.config.device, self.config.baud).await?;
        let framer = FramerConfig {
            poll_timeout: self.config.ctrl_timeout,
            deadline: self.config.serial_deadline,
            baud: port.baud(),
        };

        loop {
            let frame = match read_frame(&mut port, &framer, MAX_PAYLOAD).await {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "serial frame read failed");
                    continue;
                }
            };

            let Some(response) = self.serve_frame(&frame) else {
                continue;
            };

            if let Err(e) = write_frame(&mut port, &response).await {
                tracing::warn!(error = %e, "failed to send response");
            }
        }
    }

    /// Decode one received frame and dispatch it.
    ///
    /// A malformed frame is dropped with a log line; the loop decides
    /// nothing further (the CA times out and tells the manager).
    fn serve_frame(&mut self, raw: &[u8]) -> Option<Vec<u8>> {
        let frame = match decode_frame(raw, MAX_PAYLOAD) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                return None;
            }
        };

        let params = frame.value.unwrap_or_default();
        tracing::debug!(tag = frame.tag, len = frame.len, "command received");
        Some(self.table.dispatch(frame.tag, &params, &mut self.ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certlink_proto::codec::{
        encode_frame, split_response, STATUS_COMPLETE, STATUS_INVALID,
    };

    fn decode_response_frame(frame: &[u8]) -> (u16, u32) {
        let decoded = decode_frame(frame, MAX_PAYLOAD).unwrap();
        let payload = decoded.value.expect("payload");
        let (status, _) = split_response(&payload).expect("status");
        (decoded.tag, status)
    }

    #[tokio::test]
    async fn dispatch_routes_known_tags() {
        let mut ctx = AgentContext::new("wlan0");
        let table = DispatchTable::builtin();

        let response = table.dispatch(tags::GET_VERSION, b"", &mut ctx);
        let (tag, status) = decode_response_frame(&response);
        assert_eq!(tag, tags::response_tag(tags::GET_VERSION));
        assert_eq!(status, STATUS_COMPLETE);
        ctx.pool.shutdown().await;
    }

    #[tokio::test]
    async fn dispatch_routes_zero_and_unknown_tags_to_default() {
        let mut ctx = AgentContext::new("wlan0");
        let table = DispatchTable::builtin();

        for tag in [tags::TAG_NONE, 0x42, 0x7F, u16::MAX] {
            let response = table.dispatch(tag, b"", &mut ctx);
            // The default handler must still produce a decodable frame.
            let (resp_tag, status) = decode_response_frame(&response);
            assert_eq!(resp_tag, tags::response_tag(tags::TAG_NONE));
            assert_eq!(status, STATUS_INVALID);
        }
        ctx.pool.shutdown().await;
    }

    #[tokio::test]
    async fn serve_frame_drops_malformed_input() {
        let ctx = AgentContext::new("wlan0");
        let mut dispatcher = Dispatcher::new(DispatcherConfig::tcp("127.0.0.1", 0), ctx);

        // Bad separator.
        assert!(dispatcher.serve_frame(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05]).is_none());
        // Truncated header.
        assert!(dispatcher.serve_frame(&[0xAA, 0xAA, 0x01]).is_none());
        // Declared length beyond the received bytes.
        let mut lying = encode_frame(tags::GET_VERSION, b"abc");
        lying[4] = 0xFF;
        assert!(dispatcher.serve_frame(&lying).is_none());

        // A well-formed frame still dispatches.
        let good = encode_frame(tags::GET_VERSION, b"");
        assert!(dispatcher.serve_frame(&good).is_some());
    }
}
