//! Per-provider upload arguments.

use serde_json::{Map, Value};
use skycat_core::{HintValue, ProviderKind, SolveHints};

/// Defaults sent to a local solver before hints are applied.
pub fn local_defaults() -> SolveHints {
    let mut defaults = SolveHints::blind();
    defaults.set_text("scale_units", "degwidth");
    defaults.set_number("scale_lower", 0.1);
    defaults.set_number("scale_upper", 180.0);
    defaults
}

/// Hints that actually reach the given provider.
///
/// The public service always solves blind; a local one gets its wide scale
/// defaults with the caller's hints layered on top.
pub fn effective_hints(provider: ProviderKind, hints: &SolveHints) -> SolveHints {
    if !provider.accepts_hints() {
        return SolveHints::blind();
    }
    let mut merged = local_defaults();
    merged.merge(hints);
    merged
}

/// The `request-json` object for an upload.
pub fn upload_request(provider: ProviderKind, session: &str, hints: &SolveHints) -> Map<String, Value> {
    let mut request = Map::new();
    request.insert("publicly_visible".into(), Value::from("n"));
    request.insert("allow_commercial_use".into(), Value::from("d"));
    request.insert("allow_modifications".into(), Value::from("d"));
    request.insert("session".into(), Value::from(session));

    for (key, value) in effective_hints(provider, hints).iter() {
        let value = match value {
            HintValue::Number(n) => Value::from(*n),
            HintValue::Text(s) => Value::from(s.as_str()),
        };
        request.insert(key.clone(), value);
    }
    request
}
