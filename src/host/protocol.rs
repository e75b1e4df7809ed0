//! JSON-lines wire format spoken with the host automation bridge.
//!
//! One request per line on the bridge's stdin, one response per line on its
//! stdout, correlated by `id`.

use super::HostError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct BridgeRequest<'a> {
    pub id: u64,
    pub cmd: &'a str,
    pub params: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeResponse {
    pub id: u64,
    pub status: BridgeStatus,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
}

impl BridgeResponse {
    /// Turn an error status into [`HostError::Automation`].
    pub fn into_result(self) -> Result<Value, HostError> {
        match self.status {
            BridgeStatus::Ok => Ok(self.data),
            BridgeStatus::Error => Err(HostError::Automation {
                message: self
                    .message
                    .unwrap_or_else(|| "host automation call failed".to_string()),
                code: self.code,
            }),
        }
    }
}

pub fn encode_request(request: &BridgeRequest<'_>) -> Result<String, HostError> {
    let mut line = serde_json::to_string(request)
        .map_err(|err| HostError::Protocol(format!("failed to encode request: {err}")))?;
    line.push('\n');
    Ok(line)
}

pub fn decode_response(line: &str, expected_id: u64) -> Result<BridgeResponse, HostError> {
    let response: BridgeResponse = serde_json::from_str(line.trim())
        .map_err(|err| HostError::Protocol(format!("invalid response line: {err}")))?;
    if response.id != expected_id {
        return Err(HostError::Protocol(format!(
            "response id {} does not match request id {expected_id}",
            response.id
        )));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn request_is_one_line() {
        let line = encode_request(&BridgeRequest {
            id: 7,
            cmd: "merge",
            params: json!({"sheet": "Sheet1", "range": "A1:C1"}),
        })
        .unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["cmd"], "merge");
        assert_eq!(parsed["params"]["range"], "A1:C1");
    }

    #[test]
    fn error_status_becomes_automation_error() {
        let response = decode_response(
            r#"{"id":3,"status":"error","message":"Add failed","code":-2147352567}"#,
            3,
        )
        .unwrap();
        assert_matches!(
            response.into_result(),
            Err(HostError::Automation { code: Some(-2147352567), .. })
        );
    }

    #[test]
    fn mismatched_ids_are_protocol_errors() {
        let err = decode_response(r#"{"id":1,"status":"ok","data":null}"#, 2).unwrap_err();
        assert_matches!(err, HostError::Protocol(_));
    }
}
