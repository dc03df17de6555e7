//! CLI execution surface. Framing and correlation only — execution itself
//! is the server's responsibility, matching the out-of-scope boundary that
//! the transport is injected rather than owned by this crate.

use serde_json::Value as JsonValue;

/// Result of a successfully completed `cli_request`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
}

/// Parses a `{op:"cli_response", id, result:bool, stdout?, stderr?,
/// exit_code?, error?}` envelope's success payload into a [`CliOutput`].
pub fn parse_cli_output(envelope: &JsonValue) -> CliOutput {
    CliOutput {
        stdout: envelope
            .get("stdout")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string(),
        stderr: envelope
            .get("stderr")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string(),
        exit_code: envelope.get("exit_code").and_then(JsonValue::as_i64),
    }
}
