//! Feature command handlers.
//!
//! Each handler is a leaf strategy: it receives the decoded parameter
//! bytes and the agent context, and returns a complete response frame.
//! Handlers never fail the dispatch loop; anything that goes wrong
//! becomes an INVALID or ERROR status in the response payload.
//!
//! The set here is the representative core of the catalog: identity and
//! station queries plus the traffic-agent commands that exercise the
//! worker pool. The full certification catalog plugs in the same way,
//! one strategy per tag.

use std::sync::atomic::Ordering;

use certlink_proto::codec::{encode_response, STATUS_COMPLETE, STATUS_ERROR, STATUS_INVALID};
use certlink_proto::params::param_value;
use certlink_proto::tags;
use tokio_util::sync::CancellationToken;

use crate::context::AgentContext;
use crate::traffic::{Direction, StreamId, StreamJob, StreamProfile};

/// One feature command implementation.
pub trait CommandHandler: Send + Sync {
    /// Handler name for logging.
    fn name(&self) -> &'static str;

    /// Execute the command and build the complete response frame.
    fn handle(&self, tag: u16, params: &[u8], ctx: &mut AgentContext) -> Vec<u8>;
}

fn complete(tag: u16, data: &[u8]) -> Vec<u8> {
    encode_response(tags::response_tag(tag), STATUS_COMPLETE, data)
}

fn errored(tag: u16) -> Vec<u8> {
    encode_response(tags::response_tag(tag), STATUS_ERROR, b"")
}

fn invalid(tag: u16) -> Vec<u8> {
    encode_response(tags::response_tag(tag), STATUS_INVALID, b"")
}

/// Fallback for unknown, zero, or unimplemented tags.
///
/// Responds on the reserved tag so the CA renders a generic INVALID
/// line; the loop itself never aborts on an unknown command.
pub struct NotImplemented;

impl CommandHandler for NotImplemented {
    fn name(&self) -> &'static str {
        "NotImplemented"
    }

    fn handle(&self, tag: u16, _params: &[u8], _ctx: &mut AgentContext) -> Vec<u8> {
        tracing::warn!(tag, "command not implemented");
        encode_response(tags::response_tag(tags::TAG_NONE), STATUS_INVALID, b"")
    }
}

pub struct GetVersion;

impl CommandHandler for GetVersion {
    fn name(&self) -> &'static str {
        "GetVersion"
    }

    fn handle(&self, tag: u16, _params: &[u8], ctx: &mut AgentContext) -> Vec<u8> {
        complete(tag, ctx.version.as_bytes())
    }
}

pub struct DeviceGetInfo;

impl CommandHandler for DeviceGetInfo {
    fn name(&self) -> &'static str {
        "DeviceGetInfo"
    }

    fn handle(&self, tag: u16, _params: &[u8], ctx: &mut AgentContext) -> Vec<u8> {
        let info = format!("vendor,certlink,model,dut-agent,version,{}", ctx.version);
        complete(tag, info.as_bytes())
    }
}

pub struct DeviceListInterfaces;

impl CommandHandler for DeviceListInterfaces {
    fn name(&self) -> &'static str {
        "DeviceListInterfaces"
    }

    fn handle(&self, tag: u16, _params: &[u8], ctx: &mut AgentContext) -> Vec<u8> {
        let list = format!("interfaceType,802.11,interfaceID,{}", ctx.iface);
        complete(tag, list.as_bytes())
    }
}

pub struct StaGetIpConfig;

impl CommandHandler for StaGetIpConfig {
    fn name(&self) -> &'static str {
        "StaGetIpConfig"
    }

    fn handle(&self, tag: u16, params: &[u8], _ctx: &mut AgentContext) -> Vec<u8> {
        let params = String::from_utf8_lossy(params);
        if param_value(&params, "interface").is_none() {
            return invalid(tag);
        }
        // Address reporting is owned by the platform port; the stock
        // agent reports the unconfigured state.
        complete(
            tag,
            b"dhcp,0,ip,0.0.0.0,mask,255.255.255.0,primary-dns,0.0.0.0",
        )
    }
}

pub struct StaGetMacAddress;

impl CommandHandler for StaGetMacAddress {
    fn name(&self) -> &'static str {
        "StaGetMacAddress"
    }

    fn handle(&self, tag: u16, params: &[u8], ctx: &mut AgentContext) -> Vec<u8> {
        let params = String::from_utf8_lossy(params);
        if param_value(&params, "interface").is_none() {
            return invalid(tag);
        }
        let data = format!("mac,{}", ctx.mac);
        complete(tag, data.as_bytes())
    }
}

pub struct StaIsConnected;

impl CommandHandler for StaIsConnected {
    fn name(&self) -> &'static str {
        "StaIsConnected"
    }

    fn handle(&self, tag: u16, _params: &[u8], _ctx: &mut AgentContext) -> Vec<u8> {
        complete(tag, b"connected,0")
    }
}

pub struct StaAssociate;

impl CommandHandler for StaAssociate {
    fn name(&self) -> &'static str {
        "StaAssociate"
    }

    fn handle(&self, tag: u16, params: &[u8], _ctx: &mut AgentContext) -> Vec<u8> {
        let params = String::from_utf8_lossy(params);
        let Some(ssid) = param_value(&params, "ssid") else {
            return invalid(tag);
        };
        tracing::info!(ssid = %ssid, "association requested");
        complete(tag, b"")
    }
}

pub struct TrafficAgentConfig;

impl CommandHandler for TrafficAgentConfig {
    fn name(&self) -> &'static str {
        "TrafficAgentConfig"
    }

    fn handle(&self, tag: u16, params: &[u8], ctx: &mut AgentContext) -> Vec<u8> {
        let params = String::from_utf8_lossy(params);
        let profile = StreamProfile {
            dest: param_value(&params, "destination").unwrap_or("").to_string(),
            port: param_value(&params, "destport")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            rate: param_value(&params, "rate")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            frame_count: param_value(&params, "framecount")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            payload_len: param_value(&params, "payloadsize")
                .and_then(|v| v.parse().ok())
                .unwrap_or(64),
        };

        match ctx.streams.configure(profile) {
            Ok(id) => {
                let data = format!("streamid,{id}");
                complete(tag, data.as_bytes())
            }
            Err(e) => {
                tracing::warn!(error = %e, "stream configuration failed");
                errored(tag)
            }
        }
    }
}

/// Parse the mandatory streamid parameter.
fn stream_id_param(params: &[u8]) -> Option<StreamId> {
    let params = String::from_utf8_lossy(params);
    param_value(&params, "streamid")?.parse().ok()
}

/// Shared activation path for send and receive streams.
///
/// Activation never blocks the dispatch loop: the job goes to the
/// stream's worker with a `try_send`, and a busy worker surfaces as an
/// ERROR response.
fn activate_stream(tag: u16, params: &[u8], direction: Direction, ctx: &mut AgentContext) -> Vec<u8> {
    let Some(id) = stream_id_param(params) else {
        return invalid(tag);
    };
    let Some(index) = ctx.streams.index_of(id) else {
        tracing::warn!(stream = id, "activation for unknown stream");
        return invalid(tag);
    };
    let Some(slot) = ctx.streams.get_mut(id) else {
        return invalid(tag);
    };
    if slot.active.is_some() {
        tracing::warn!(stream = id, "stream already active");
        return errored(tag);
    }

    let cancel = CancellationToken::new();
    let job = StreamJob {
        stream_id: id,
        direction,
        profile: slot.profile.clone(),
        stats: slot.stats.clone(),
        cancel: cancel.clone(),
    };
    match ctx.pool.activate(index, job) {
        Ok(()) => {
            if let Some(slot) = ctx.streams.get_mut(id) {
                slot.active = Some(cancel);
            }
            let data = format!("streamid,{id}");
            complete(tag, data.as_bytes())
        }
        Err(e) => {
            tracing::warn!(stream = id, error = %e, "worker activation failed");
            errored(tag)
        }
    }
}

pub struct TrafficAgentSend;

impl CommandHandler for TrafficAgentSend {
    fn name(&self) -> &'static str {
        "TrafficAgentSend"
    }

    fn handle(&self, tag: u16, params: &[u8], ctx: &mut AgentContext) -> Vec<u8> {
        activate_stream(tag, params, Direction::Send, ctx)
    }
}

pub struct TrafficAgentReceiveStart;

impl CommandHandler for TrafficAgentReceiveStart {
    fn name(&self) -> &'static str {
        "TrafficAgentReceiveStart"
    }

    fn handle(&self, tag: u16, params: &[u8], ctx: &mut AgentContext) -> Vec<u8> {
        activate_stream(tag, params, Direction::Receive, ctx)
    }
}

pub struct TrafficAgentReceiveStop;

impl CommandHandler for TrafficAgentReceiveStop {
    fn name(&self) -> &'static str {
        "TrafficAgentReceiveStop"
    }

    fn handle(&self, tag: u16, params: &[u8], ctx: &mut AgentContext) -> Vec<u8> {
        let Some(id) = stream_id_param(params) else {
            return invalid(tag);
        };
        let Some(slot) = ctx.streams.get_mut(id) else {
            return invalid(tag);
        };

        if let Some(cancel) = slot.active.take() {
            cancel.cancel();
        }
        let data = format!(
            "streamid,{id},txFrames,{},rxFrames,{},txBytes,{},rxBytes,{}",
            slot.stats.tx_frames.load(Ordering::Relaxed),
            slot.stats.rx_frames.load(Ordering::Relaxed),
            slot.stats.tx_bytes.load(Ordering::Relaxed),
            slot.stats.rx_bytes.load(Ordering::Relaxed),
        );
        complete(tag, data.as_bytes())
    }
}

pub struct TrafficAgentReset;

impl CommandHandler for TrafficAgentReset {
    fn name(&self) -> &'static str {
        "TrafficAgentReset"
    }

    fn handle(&self, tag: u16, _params: &[u8], ctx: &mut AgentContext) -> Vec<u8> {
        ctx.streams.reset();
        complete(tag, b"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certlink_proto::codec::{decode_frame, split_response, MAX_PAYLOAD};

    fn decode(frame: &[u8]) -> (u16, u32, Vec<u8>) {
        let decoded = decode_frame(frame, MAX_PAYLOAD).unwrap();
        let payload = decoded.value.expect("payload present");
        let (status, data) = split_response(&payload).expect("status word present");
        (decoded.tag, status, data.to_vec())
    }

    #[tokio::test]
    async fn get_version_reports_the_agent_version() {
        let mut ctx = AgentContext::new("wlan0");
        let frame = GetVersion.handle(tags::GET_VERSION, b"interface,eth0", &mut ctx);
        let (tag, status, data) = decode(&frame);
        assert_eq!(tag, tags::response_tag(tags::GET_VERSION));
        assert_eq!(status, STATUS_COMPLETE);
        assert_eq!(data, ctx.version.as_bytes());
        ctx.pool.shutdown().await;
    }

    #[tokio::test]
    async fn associate_requires_ssid() {
        let mut ctx = AgentContext::new("wlan0");

        let frame = StaAssociate.handle(tags::STA_ASSOCIATE, b"interface,eth0", &mut ctx);
        let (_, status, _) = decode(&frame);
        assert_eq!(status, STATUS_INVALID);

        let frame = StaAssociate.handle(
            tags::STA_ASSOCIATE,
            b"interface,eth0,ssid,lab-net",
            &mut ctx,
        );
        let (_, status, _) = decode(&frame);
        assert_eq!(status, STATUS_COMPLETE);
        ctx.pool.shutdown().await;
    }

    #[tokio::test]
    async fn not_implemented_always_builds_a_valid_frame() {
        let mut ctx = AgentContext::new("wlan0");
        for tag in [0u16, 0x55, 0xFFFF] {
            let frame = NotImplemented.handle(tag, b"", &mut ctx);
            let (resp_tag, status, _) = decode(&frame);
            assert_eq!(resp_tag, tags::response_tag(tags::TAG_NONE));
            assert_eq!(status, STATUS_INVALID);
        }
        ctx.pool.shutdown().await;
    }

    #[tokio::test]
    async fn traffic_config_assigns_stream_ids() {
        let mut ctx = AgentContext::new("wlan0");
        let frame = TrafficAgentConfig.handle(
            tags::TRAFFIC_AGENT_CONFIG,
            b"destination,127.0.0.1,destport,9999,rate,100,framecount,10",
            &mut ctx,
        );
        let (_, status, data) = decode(&frame);
        assert_eq!(status, STATUS_COMPLETE);
        assert_eq!(data, b"streamid,1");
        assert_eq!(ctx.streams.configured(), 1);
        ctx.pool.shutdown().await;
    }

    #[tokio::test]
    async fn traffic_send_requires_a_configured_stream() {
        let mut ctx = AgentContext::new("wlan0");
        let frame =
            TrafficAgentSend.handle(tags::TRAFFIC_AGENT_SEND, b"streamid,42", &mut ctx);
        let (_, status, _) = decode(&frame);
        assert_eq!(status, STATUS_INVALID);
        ctx.pool.shutdown().await;
    }

    #[tokio::test]
    async fn traffic_send_then_stop_reports_stats() {
        let mut ctx = AgentContext::new("wlan0");

        // Sink for the generated datagrams.
        let sink = certlink_transport::UdpTransport::bind("127.0.0.1:0")
            .await
            .unwrap();
        let port = sink.local_addr().port();

        let config = format!("destination,127.0.0.1,destport,{port},rate,1000,framecount,5");
        let frame =
            TrafficAgentConfig.handle(tags::TRAFFIC_AGENT_CONFIG, config.as_bytes(), &mut ctx);
        let (_, status, _) = decode(&frame);
        assert_eq!(status, STATUS_COMPLETE);

        let frame = TrafficAgentSend.handle(tags::TRAFFIC_AGENT_SEND, b"streamid,1", &mut ctx);
        let (_, status, _) = decode(&frame);
        assert_eq!(status, STATUS_COMPLETE);

        // Let the 5-frame budget drain.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let frame = TrafficAgentReceiveStop.handle(
            tags::TRAFFIC_AGENT_RECV_STOP,
            b"streamid,1",
            &mut ctx,
        );
        let (_, status, data) = decode(&frame);
        assert_eq!(status, STATUS_COMPLETE);
        let text = String::from_utf8(data).unwrap();
        assert!(text.starts_with("streamid,1,txFrames,5,"), "got: {text}");

        ctx.pool.shutdown().await;
    }

    #[tokio::test]
    async fn traffic_reset_clears_streams() {
        let mut ctx = AgentContext::new("wlan0");
        TrafficAgentConfig.handle(
            tags::TRAFFIC_AGENT_CONFIG,
            b"destination,127.0.0.1,destport,9999",
            &mut ctx,
        );
        assert_eq!(ctx.streams.configured(), 1);

        let frame = TrafficAgentReset.handle(tags::TRAFFIC_AGENT_RESET, b"", &mut ctx);
        let (_, status, _) = decode(&frame);
        assert_eq!(status, STATUS_COMPLETE);
        assert_eq!(ctx.streams.configured(), 0);
        ctx.pool.shutdown().await;
    }
}
