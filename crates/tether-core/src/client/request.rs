//! Service method requests.

use crate::Result;
use serde::{Deserialize, Serialize};

/// A call to a named service method, e.g. `Player.GetGameBadgeLevels#1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    method: String,
    #[serde(default)]
    body: serde_json::Value,
}

impl ServiceRequest {
    /// Request for a fully qualified method name.
    pub fn new(method: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            body,
        }
    }

    /// Request for `<service>.<method>#<version>` with an empty body.
    pub fn method(service: &str, method: &str, version: u32) -> Self {
        Self::new(Self::method_name(service, method, version), serde_json::Value::Null)
    }

    pub fn method_name(service: &str, method: &str, version: u32) -> String {
        format!("{}.{}#{}", service, method, version)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    /// Set the body from any serializable value.
    pub fn with_json<T: Serialize>(self, body: &T) -> Result<Self> {
        Ok(self.with_body(serde_json::to_value(body)?))
    }

    pub fn name(&self) -> &str {
        &self.method
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    pub(crate) fn into_payload(self) -> serde_json::Value {
        serde_json::json!({ "method": self.method, "body": self.body })
    }
}
