//! Request/response envelope threaded through a pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The five operations a service answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Create,
    Find,
    Get,
    Patch,
    Remove,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Create,
        Method::Find,
        Method::Get,
        Method::Patch,
        Method::Remove,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Create => "create",
            Method::Find => "find",
            Method::Get => "get",
            Method::Patch => "patch",
            Method::Remove => "remove",
        }
    }

    /// Maps an HTTP verb to a method. `has_id` tells whether the matched
    /// route carried an `:id` segment.
    pub fn from_http(verb: &str, has_id: bool) -> Option<Method> {
        match (verb.to_ascii_uppercase().as_str(), has_id) {
            ("GET", true) => Some(Method::Get),
            ("GET", false) => Some(Method::Find),
            ("POST", _) => Some(Method::Create),
            ("PATCH", _) | ("PUT", _) => Some(Method::Patch),
            ("DELETE", _) => Some(Method::Remove),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown method '{}'", s))
    }
}

/// Mutable envelope created once per inbound request.
///
/// Setting `result` before the service runs short-circuits the service
/// handler; after-hooks still see the context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub method: Method,
    pub path: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub query: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    #[serde(default)]
    pub locals: Map<String, Value>,
}

impl Context {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: HashMap::new(),
            query: Map::new(),
            data: None,
            result: None,
            status_code: None,
            headers: HashMap::new(),
            user: None,
            locals: Map::new(),
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: Map<String, Value>) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: Value) -> Self {
        self.user = Some(user);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// A result counts as produced unless it is absent or `null`.
    pub fn has_result(&self) -> bool {
        !matches!(self.result, None | Some(Value::Null))
    }

    /// Status code of the response, `200` when nothing set one.
    pub fn status(&self) -> u16 {
        self.status_code.unwrap_or(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_from_http() {
        assert_eq!(Method::from_http("get", true), Some(Method::Get));
        assert_eq!(Method::from_http("GET", false), Some(Method::Find));
        assert_eq!(Method::from_http("POST", false), Some(Method::Create));
        assert_eq!(Method::from_http("PUT", true), Some(Method::Patch));
        assert_eq!(Method::from_http("DELETE", true), Some(Method::Remove));
        assert_eq!(Method::from_http("OPTIONS", false), None);
    }

    #[test]
    fn test_has_result() {
        let mut ctx = Context::new(Method::Find, "/posts");
        assert!(!ctx.has_result());
        ctx.result = Some(Value::Null);
        assert!(!ctx.has_result());
        ctx.result = Some(json!([]));
        assert!(ctx.has_result());
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let ctx = Context::new(Method::Get, "/").with_header("Authorization", "Bearer x");
        assert_eq!(ctx.header("authorization"), Some("Bearer x"));
        assert_eq!(ctx.header("AUTHORIZATION"), Some("Bearer x"));
    }

    #[test]
    fn test_context_deserializes_with_defaults() {
        let ctx: Context = serde_json::from_value(json!({ "method": "find", "path": "/posts" })).unwrap();
        assert_eq!(ctx.method, Method::Find);
        assert!(ctx.query.is_empty());
        assert_eq!(ctx.status(), 200);
    }
}
