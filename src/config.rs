//! Environment-style configuration for the VNC video device.
//!
//! Every option is read from a key/value [`Environment`], which is either the
//! process environment or an in-memory map. Values are validated
//! independently; the first invalid one is reported as
//! [`VideoError::InvalidConfig`] naming the offending key.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use crate::error::{Result, VideoError};

/// Allow more than one viewer at a time (`0` or `1`).
pub const ALWAYS_SHARED: &str = "RFB_VIDEO_ALWAYS_SHARED";
/// Display number for IPv4; the listening port is `5900 + display`.
pub const DISPLAY: &str = "RFB_VIDEO_DISPLAY";
/// Display number for IPv6.
pub const DISPLAY6: &str = "RFB_VIDEO_DISPLAY6";
/// IPv4 interface to listen on.
pub const LISTEN_IFACE: &str = "RFB_VIDEO_LISTEN_IFACE";
/// IPv6 interface to listen on.
pub const LISTEN_IFACE6: &str = "RFB_VIDEO_LISTEN_IFACE6";
/// Ignore remote input and cursor changes when set to `1`.
pub const VIEW_ONLY: &str = "RFB_VIDEO_VIEW_ONLY";
/// Colour depth reported by mode enumeration; `0` reports every depth.
pub const DEPTH: &str = "RFB_VIDEO_DEPTH";

/// First port of the RFB display-number convention.
pub const SERVER_PORT_OFFSET: u16 = 5900;

/// Depth reported by mode enumeration when [`DEPTH`] is unset.
pub const DEFAULT_REPORTED_DEPTH: u8 = 16;

type Lookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// A source of configuration values.
#[derive(Clone)]
pub struct Environment {
    lookup: Arc<Lookup>,
}

impl Environment {
    /// Reads values from the process environment.
    pub fn process() -> Self {
        Self {
            lookup: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    /// Reads values from a fixed set of pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            lookup: Arc::new(move |name| map.get(name).cloned()),
        }
    }

    /// Returns the raw value of `name`, if set.
    pub fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn int(&self, name: &'static str, default: i64) -> Result<i64> {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<i64>().map_err(|_| VideoError::InvalidConfig {
                name,
                reason: format!("must be an integer, got {:?}", raw),
            }),
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment").finish_non_exhaustive()
    }
}

/// How the server picks its listening ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSelection {
    /// Let the server pick the first free display.
    Auto,
    /// Fixed ports for each address family.
    Fixed { v4: u16, v6: u16 },
}

/// Where and how the server accepts viewers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenConfig {
    pub ports: PortSelection,
    pub iface: Option<Ipv4Addr>,
    pub iface6: Option<Ipv6Addr>,
    pub always_shared: bool,
}

/// Validated device configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VncConfig {
    pub listen: ListenConfig,
    pub view_only: bool,
    /// Depth reported by mode enumeration, `0` for all depths.
    pub reported_depth: u8,
}

impl Default for VncConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig {
                ports: PortSelection::Auto,
                iface: None,
                iface6: None,
                always_shared: true,
            },
            view_only: false,
            reported_depth: DEFAULT_REPORTED_DEPTH,
        }
    }
}

impl VncConfig {
    /// Parses and validates every option from `env`.
    pub fn from_env(env: &Environment) -> Result<Self> {
        let always_shared = match env.int(ALWAYS_SHARED, 1)? {
            0 => false,
            1 => true,
            _ => {
                return Err(VideoError::InvalidConfig {
                    name: ALWAYS_SHARED,
                    reason: "must be set to either 0 or 1".into(),
                })
            }
        };

        let display = display_port(env, DISPLAY)?;
        let display6 = display_port(env, DISPLAY6)?;
        let ports = match (display, display6) {
            (None, None) => PortSelection::Auto,
            (Some(v4), None) => PortSelection::Fixed { v4, v6: v4 },
            (v4, Some(v6)) => PortSelection::Fixed {
                v4: v4.unwrap_or(SERVER_PORT_OFFSET),
                v6,
            },
        };

        let iface = match env.get(LISTEN_IFACE) {
            None => None,
            Some(raw) => Some(raw.trim().parse::<Ipv4Addr>().map_err(|_| {
                VideoError::InvalidConfig {
                    name: LISTEN_IFACE,
                    reason: format!("is not an IPv4 address: {:?}", raw),
                }
            })?),
        };
        let iface6 = match env.get(LISTEN_IFACE6) {
            None => None,
            Some(raw) => Some(raw.trim().parse::<Ipv6Addr>().map_err(|_| {
                VideoError::InvalidConfig {
                    name: LISTEN_IFACE6,
                    reason: format!("is not an IPv6 address: {:?}", raw),
                }
            })?),
        };

        let view_only = env.int(VIEW_ONLY, 0)? == 1;

        let reported_depth = env.int(DEPTH, i64::from(DEFAULT_REPORTED_DEPTH))?;
        let reported_depth = u8::try_from(reported_depth)
            .ok()
            .filter(|d| *d <= 32)
            .ok_or_else(|| VideoError::InvalidConfig {
                name: DEPTH,
                reason: format!("must be between 0 and 32, got {}", reported_depth),
            })?;

        Ok(Self {
            listen: ListenConfig {
                ports,
                iface,
                iface6,
                always_shared,
            },
            view_only,
            reported_depth,
        })
    }
}

/// Reads a display number and turns it into a port. `-1` means "auto".
fn display_port(env: &Environment, name: &'static str) -> Result<Option<u16>> {
    let display = env.int(name, -1)?;
    if display < -1 {
        return Err(VideoError::InvalidConfig {
            name,
            reason: "must be > -1".into(),
        });
    }
    if display == -1 {
        return Ok(None);
    }
    u16::try_from(display)
        .ok()
        .and_then(|d| SERVER_PORT_OFFSET.checked_add(d))
        .map(Some)
        .ok_or_else(|| VideoError::InvalidConfig {
            name,
            reason: format!("display {} is beyond the last TCP port", display),
        })
}
