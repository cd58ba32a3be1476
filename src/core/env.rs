//! Environment layering for per-host task arguments.

use crate::config::EnvMap;

/// Global env overlaid with the host's env. The host wins on a shared key.
///
/// Always returns a fresh map; neither input is touched.
pub fn merge(global: &EnvMap, host: &EnvMap) -> EnvMap {
    let mut merged = global.clone();
    merged.extend(host.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
