//! Manager-command table: names, tags, and parameter encoders.
//!
//! The table is built once at startup and read-only afterwards. Each
//! entry pairs a matchable command name with its wire tag and the
//! encoder that turns the ASCII `param,value,...` tail into a TLV
//! payload.
//!
//! Name matching runs under an explicit [`MatchPolicy`]. The shipped
//! default is [`MatchPolicy::SubstringFirst`]: the first table entry
//! whose name occurs anywhere in the received command name wins, in
//! table order. Deployed test scripts rely on that lookup, so it is kept
//! as-is; [`MatchPolicy::Exact`] is available where a bed controls both
//! ends.

use certlink_core::error::{Error, Result};
use certlink_proto::codec::MAX_PAYLOAD;
use certlink_proto::params::param_value;
use certlink_proto::tags;

/// Turns the ASCII parameter tail into a TLV payload.
pub type ParamEncoder = fn(&str) -> Result<Vec<u8>>;

/// One registered manager command.
pub struct CommandDef {
    /// Matchable command name.
    pub name: &'static str,
    /// Wire tag sent to the DUT.
    pub tag: u16,
    /// Parameter encoder; failure is surfaced as incorrect_syntax.
    pub encode: ParamEncoder,
}

/// How a received command name is matched against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// First entry whose name is a substring of the received name, in
    /// table order. Compatible with deployed scripts; ambiguous when one
    /// registered name contains another.
    SubstringFirst,
    /// Exact name equality.
    Exact,
}

/// The static, read-only command table.
pub struct CommandTable {
    defs: Vec<CommandDef>,
    policy: MatchPolicy,
}

impl CommandTable {
    /// The built-in command set under the default matching policy.
    pub fn builtin() -> Self {
        Self {
            defs: vec![
                CommandDef {
                    name: "GetVersion",
                    tag: tags::GET_VERSION,
                    encode: encode_params,
                },
                CommandDef {
                    name: "DeviceGetInfo",
                    tag: tags::DEVICE_GET_INFO,
                    encode: encode_params,
                },
                CommandDef {
                    name: "DeviceListInterfaces",
                    tag: tags::DEVICE_LIST_INTERFACES,
                    encode: encode_params,
                },
                CommandDef {
                    name: "StaGetIpConfig",
                    tag: tags::STA_GET_IP_CONFIG,
                    encode: encode_with_interface,
                },
                CommandDef {
                    name: "StaGetMacAddress",
                    tag: tags::STA_GET_MAC_ADDRESS,
                    encode: encode_with_interface,
                },
                CommandDef {
                    name: "StaIsConnected",
                    tag: tags::STA_IS_CONNECTED,
                    encode: encode_with_interface,
                },
                CommandDef {
                    name: "StaAssociate",
                    tag: tags::STA_ASSOCIATE,
                    encode: encode_associate,
                },
                CommandDef {
                    name: "TrafficAgentConfig",
                    tag: tags::TRAFFIC_AGENT_CONFIG,
                    encode: encode_params,
                },
                CommandDef {
                    name: "TrafficAgentSend",
                    tag: tags::TRAFFIC_AGENT_SEND,
                    encode: encode_with_stream_id,
                },
                CommandDef {
                    name: "TrafficAgentReceiveStart",
                    tag: tags::TRAFFIC_AGENT_RECV_START,
                    encode: encode_with_stream_id,
                },
                CommandDef {
                    name: "TrafficAgentReceiveStop",
                    tag: tags::TRAFFIC_AGENT_RECV_STOP,
                    encode: encode_with_stream_id,
                },
                CommandDef {
                    name: "TrafficAgentReset",
                    tag: tags::TRAFFIC_AGENT_RESET,
                    encode: encode_params,
                },
            ],
            policy: MatchPolicy::SubstringFirst,
        }
    }

    /// Override the matching policy.
    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The active matching policy.
    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Look up a received command name. First match in table order wins.
    pub fn lookup(&self, cmd_name: &str) -> Option<&CommandDef> {
        match self.policy {
            MatchPolicy::SubstringFirst => {
                self.defs.iter().find(|def| cmd_name.contains(def.name))
            }
            MatchPolicy::Exact => self.defs.iter().find(|def| cmd_name == def.name),
        }
    }

    #[cfg(test)]
    fn from_defs(defs: Vec<CommandDef>) -> Self {
        Self {
            defs,
            policy: MatchPolicy::SubstringFirst,
        }
    }
}

/// Baseline encoder: the parameter tail travels as-is.
///
/// Rejects tails the TLV length field or the DUT's parameter buffer
/// cannot carry, and non-ASCII input that would corrupt field splitting
/// on the far side.
pub fn encode_params(params: &str) -> Result<Vec<u8>> {
    if params.len() > MAX_PAYLOAD {
        return Err(Error::InvalidParameter(format!(
            "parameter tail of {} bytes exceeds {MAX_PAYLOAD}",
            params.len()
        )));
    }
    if !params.is_ascii() {
        return Err(Error::InvalidParameter("parameters must be ASCII".into()));
    }
    Ok(params.as_bytes().to_vec())
}

/// Encoder for commands addressed to one interface.
fn encode_with_interface(params: &str) -> Result<Vec<u8>> {
    if param_value(params, "interface").is_none() {
        return Err(Error::InvalidParameter("missing interface parameter".into()));
    }
    encode_params(params)
}

/// Encoder for association: an SSID is mandatory.
fn encode_associate(params: &str) -> Result<Vec<u8>> {
    if param_value(params, "ssid").is_none() {
        return Err(Error::InvalidParameter("missing ssid parameter".into()));
    }
    encode_params(params)
}

/// Encoder for per-stream traffic commands.
fn encode_with_stream_id(params: &str) -> Result<Vec<u8>> {
    let id = param_value(params, "streamid")
        .ok_or_else(|| Error::InvalidParameter("missing streamid parameter".into()))?;
    id.parse::<u32>()
        .map_err(|_| Error::InvalidParameter(format!("streamid '{id}' is not a number")))?;
    encode_params(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup_matches_each_command() {
        let table = CommandTable::builtin();
        for (name, tag) in [
            ("GetVersion", tags::GET_VERSION),
            ("StaAssociate", tags::STA_ASSOCIATE),
            ("TrafficAgentReset", tags::TRAFFIC_AGENT_RESET),
        ] {
            let def = table.lookup(name).expect(name);
            assert_eq!(def.tag, tag);
        }
    }

    #[test]
    fn builtin_lookup_rejects_unknown() {
        let table = CommandTable::builtin();
        assert!(table.lookup("NoSuchThing").is_none());
        assert!(table.lookup("").is_none());
    }

    #[test]
    fn substring_policy_matches_decorated_names() {
        // A name with vendor decoration around a registered command
        // still matches under the substring policy.
        let table = CommandTable::builtin();
        let def = table.lookup("xyzGetVersion2").unwrap();
        assert_eq!(def.tag, tags::GET_VERSION);
    }

    #[test]
    fn substring_policy_is_first_match_in_table_order() {
        // Two entries where one name contains the other: the earlier
        // entry wins regardless of specificity.
        let table = CommandTable::from_defs(vec![
            CommandDef {
                name: "Send",
                tag: 0x01,
                encode: encode_params,
            },
            CommandDef {
                name: "SendFrame",
                tag: 0x02,
                encode: encode_params,
            },
        ]);
        let def = table.lookup("SendFrame").unwrap();
        assert_eq!(def.tag, 0x01, "first table entry must win");
    }

    #[test]
    fn exact_policy_requires_equality() {
        let table = CommandTable::builtin().with_policy(MatchPolicy::Exact);
        assert!(table.lookup("GetVersion").is_some());
        assert!(table.lookup("xyzGetVersion2").is_none());
    }

    #[test]
    fn encode_params_round_trips_ascii() {
        let payload = encode_params("interface,eth0").unwrap();
        assert_eq!(payload, b"interface,eth0");
        assert_eq!(encode_params("").unwrap(), b"");
    }

    #[test]
    fn encode_params_rejects_oversize_and_non_ascii() {
        let big = "x".repeat(MAX_PAYLOAD + 1);
        assert!(matches!(
            encode_params(&big).unwrap_err(),
            Error::InvalidParameter(_)
        ));
        assert!(matches!(
            encode_params("ssid,caf\u{00e9}").unwrap_err(),
            Error::InvalidParameter(_)
        ));
    }

    #[test]
    fn associate_requires_ssid() {
        assert!(encode_associate("interface,eth0").is_err());
        assert!(encode_associate("interface,eth0,ssid,lab-net").is_ok());
    }

    #[test]
    fn stream_commands_require_numeric_streamid() {
        assert!(encode_with_stream_id("interface,eth0").is_err());
        assert!(encode_with_stream_id("streamid,abc").is_err());
        assert!(encode_with_stream_id("streamid,3").is_ok());
    }
}
