//! Shared configuration types for the control and DUT agents.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The kind of link carrying TLV frames between the CA and the DUT.
///
/// The numeric values match the legacy `-T` option (serial=1, tcp=2,
/// udp=3) so existing test-bed launch scripts keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    Serial,
    Tcp,
    Udp,
}

impl ConnKind {
    /// Legacy numeric code for this kind.
    pub fn code(self) -> u8 {
        match self {
            ConnKind::Serial => 1,
            ConnKind::Tcp => 2,
            ConnKind::Udp => 3,
        }
    }
}

impl fmt::Display for ConnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnKind::Serial => "serial",
            ConnKind::Tcp => "tcp",
            ConnKind::Udp => "udp",
        };
        f.write_str(s)
    }
}

impl FromStr for ConnKind {
    type Err = Error;

    /// Accepts the symbolic names and the legacy numeric codes.
    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "serial" => Ok(ConnKind::Serial),
            "2" | "tcp" => Ok(ConnKind::Tcp),
            "3" | "udp" => Ok(ConnKind::Udp),
            other => Err(Error::Config(format!(
                "unknown connection type '{other}' (expected serial|tcp|udp or 1|2|3)"
            ))),
        }
    }
}

/// Where and how to reach the DUT agent.
///
/// Built once from the command line at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct DutLink {
    /// Link kind for TLV frames.
    pub kind: ConnKind,
    /// Serial device path (serial) or unused (tcp/udp).
    pub device: String,
    /// DUT IP address (tcp/udp).
    pub addr: String,
    /// DUT port (tcp/udp).
    pub port: u16,
    /// Baud rate (serial).
    pub baud: u32,
}

impl DutLink {
    /// `host:port` endpoint string for the IP kinds.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    /// Validate that the fields required by `kind` are present.
    ///
    /// A missing required combination is a fatal startup error.
    pub fn validate(&self) -> Result<(), Error> {
        match self.kind {
            ConnKind::Serial => {
                if self.device.is_empty() {
                    return Err(Error::Config("serial link requires a device path".into()));
                }
                if self.baud == 0 {
                    return Err(Error::Config("serial link requires a baud rate".into()));
                }
            }
            ConnKind::Tcp | ConnKind::Udp => {
                if self.addr.is_empty() {
                    return Err(Error::Config(format!(
                        "{} link requires a DUT address",
                        self.kind
                    )));
                }
                if self.port == 0 {
                    return Err(Error::Config(format!(
                        "{} link requires a DUT port",
                        self.kind
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_kind_parses_names_and_codes() {
        assert_eq!("serial".parse::<ConnKind>().unwrap(), ConnKind::Serial);
        assert_eq!("TCP".parse::<ConnKind>().unwrap(), ConnKind::Tcp);
        assert_eq!("3".parse::<ConnKind>().unwrap(), ConnKind::Udp);
        assert_eq!("1".parse::<ConnKind>().unwrap(), ConnKind::Serial);
        assert!("5".parse::<ConnKind>().is_err());
        assert!("ethernet".parse::<ConnKind>().is_err());
    }

    #[test]
    fn conn_kind_codes_round_trip() {
        for kind in [ConnKind::Serial, ConnKind::Tcp, ConnKind::Udp] {
            let parsed: ConnKind = kind.code().to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn dut_link_tcp_requires_addr_and_port() {
        let link = DutLink {
            kind: ConnKind::Tcp,
            device: String::new(),
            addr: String::new(),
            port: 9000,
            baud: 0,
        };
        assert!(link.validate().is_err());

        let link = DutLink {
            addr: "192.168.0.5".into(),
            port: 0,
            ..link
        };
        assert!(link.validate().is_err());

        let link = DutLink {
            kind: ConnKind::Tcp,
            device: String::new(),
            addr: "192.168.0.5".into(),
            port: 9000,
            baud: 0,
        };
        assert!(link.validate().is_ok());
        assert_eq!(link.endpoint(), "192.168.0.5:9000");
    }

    #[test]
    fn dut_link_serial_requires_device_and_baud() {
        let link = DutLink {
            kind: ConnKind::Serial,
            device: "/dev/ttyUSB0".into(),
            addr: String::new(),
            port: 0,
            baud: 0,
        };
        assert!(link.validate().is_err());

        let link = DutLink { baud: 115200, ..link };
        assert!(link.validate().is_ok());
    }
}
