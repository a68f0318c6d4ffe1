//! Built-in leaf plugins
//!
//! Pure computations over scalar arguments, plus the suppression latch which
//! is the one builtin touching the shared store.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use once_cell::sync::Lazy;
use tracing::warn;

use super::{AppendPlugin, CheckPlugin, PluginRegistry, PluginValue};
use crate::kv::SharedStore;
use crate::{HubError, Result};

/// Key namespace for the suppression latch
pub const SUPPRESS_KEY_PREFIX: &str = "suppress_once:";

/// Register every built-in under its canonical name
pub fn register(registry: &mut PluginRegistry, store: SharedStore) {
    registry.register_check("suppress_once", Arc::new(SuppressOnce { store }));
    registry.register_check("is_private_ip", Arc::new(IsPrivateIp));
    registry.register_append("now", Arc::new(Now));
    registry.register_append("parse_int", Arc::new(ParseInt));
}

/// First-within-window latch for alert suppression
///
/// `suppress_once(key, window_sec)` returns true on the first invocation for
/// a key within the window and false afterwards. A store failure behaves as
/// already-suppressed.
pub struct SuppressOnce {
    store: SharedStore,
}

#[async_trait]
impl CheckPlugin for SuppressOnce {
    async fn check(&self, args: &[PluginValue]) -> Result<bool> {
        let [key, window] = args else {
            return Err(HubError::Plugin(
                "suppress_once expects (key, window_sec)".to_string(),
            ));
        };
        let window = window
            .as_int()
            .filter(|w| *w > 0)
            .ok_or_else(|| HubError::Plugin("suppress_once window must be a positive integer".to_string()))?;
        let store_key = format!("{}{}", SUPPRESS_KEY_PREFIX, key.render());
        match self.store.setnx(&store_key, "1", window as u64).await {
            Ok(first) => Ok(first),
            Err(err) => {
                warn!(key = %store_key, error = %err, "suppression store unavailable, failing closed");
                Ok(false)
            }
        }
    }
}

static PRIVATE_NETS: Lazy<Vec<IpNetwork>> = Lazy::new(|| {
    [
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "fc00::/7",
        "fe80::/10",
        "::1/128",
    ]
    .iter()
    .filter_map(|net| net.parse().ok())
    .collect()
});

/// Check plugin: is the argument an RFC1918/loopback/link-local address
pub struct IsPrivateIp;

#[async_trait]
impl CheckPlugin for IsPrivateIp {
    async fn check(&self, args: &[PluginValue]) -> Result<bool> {
        let [value] = args else {
            return Err(HubError::Plugin("is_private_ip expects (ip)".to_string()));
        };
        let addr: IpAddr = value
            .render()
            .parse()
            .map_err(|_| HubError::Plugin(format!("not an IP address: {}", value.render())))?;
        Ok(PRIVATE_NETS.iter().any(|net| net.contains(addr)))
    }
}

/// Append plugin: current epoch seconds
pub struct Now;

#[async_trait]
impl AppendPlugin for Now {
    async fn produce(&self, _args: &[PluginValue]) -> Result<PluginValue> {
        Ok(PluginValue::Int(chrono::Utc::now().timestamp()))
    }
}

/// Append plugin: parse the argument as a base-10 integer
pub struct ParseInt;

#[async_trait]
impl AppendPlugin for ParseInt {
    async fn produce(&self, args: &[PluginValue]) -> Result<PluginValue> {
        let [value] = args else {
            return Err(HubError::Plugin("parse_int expects (value)".to_string()));
        };
        value
            .as_int()
            .map(PluginValue::Int)
            .ok_or_else(|| HubError::Plugin(format!("not an integer: {}", value.render())))
    }
}
