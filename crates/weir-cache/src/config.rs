//! Cache parameter sourcing and header scrubbing.
//!
//! Parameters come from, in precedence order: an explicit config string
//! passed at construction, the persistent process property
//! `persist.sys.media.cache-params`, then `media.stagefright.cache-params`.
//! Properties are read through the process environment. Malformed values
//! are logged and ignored rather than failing construction.

use std::collections::HashMap;

use tracing::{debug, warn};
use weir_types::CacheParams;

/// Persistent property consulted first.
const PERSIST_PARAMS_PROPERTY: &str = "persist.sys.media.cache-params";
/// Legacy property consulted second.
const PARAMS_PROPERTY: &str = "media.stagefright.cache-params";

/// Header carrying a cache params string for this stream only.
const CACHE_CONFIG_HEADER: &str = "x-cache-config";
/// Header requesting connection teardown at the high watermark.
const DISCONNECT_AT_HI_HEADER: &str = "x-disconnect-at-highwatermark";

/// Resolve effective cache parameters.
///
/// Starts from defaults, overlays the first property that parses, then
/// overlays `explicit` if it parses. Unparseable inputs are logged and
/// skipped.
#[must_use]
pub fn resolve_params(explicit: Option<&str>) -> CacheParams {
    let mut params = CacheParams::default();

    for property in [PERSIST_PARAMS_PROPERTY, PARAMS_PROPERTY] {
        if let Ok(value) = std::env::var(property) {
            debug!(property, %value, "cache params from property");
            match value.parse() {
                Ok(parsed) => params = parsed,
                Err(err) => warn!(property, %err, "ignoring unparseable cache params"),
            }
            break;
        }
    }

    if let Some(value) = explicit {
        match value.parse() {
            Ok(parsed) => params = parsed,
            Err(err) => warn!(value, %err, "ignoring unparseable cache config"),
        }
    }

    params
}

/// Extract and remove the cache-specific entries from a header map.
///
/// Returns the `x-cache-config` value (if present) and whether
/// `x-disconnect-at-highwatermark` was present. All other headers pass
/// through untouched.
pub fn scrub_cache_headers(headers: &mut HashMap<String, String>) -> (Option<String>, bool) {
    let cache_config = headers.remove(CACHE_CONFIG_HEADER);
    if let Some(ref value) = cache_config {
        debug!(%value, "using per-stream cache config");
    }

    let disconnect_at_hi = headers.remove(DISCONNECT_AT_HI_HEADER).is_some();
    if disconnect_at_hi {
        debug!("client requested disconnect at high watermark");
    }

    (cache_config, disconnect_at_hi)
}
