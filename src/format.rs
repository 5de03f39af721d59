//! Response formatting: the one payload-aware transform the router
//! performs. Hex-encoded `result` strings are converted to base-10 so
//! clients never have to reach for arbitrary-precision arithmetic
//! themselves, since blockchain `wei` values routinely exceed 64 bits.

use num_bigint::BigUint;
use num_traits::Num;
use serde_json::{Value, json};

/// Transforms an upstream's raw JSON-RPC reply into the client-facing
/// shape: `id`/`jsonrpc` pass through, `sessionId` is attached, and a
/// `0x`-prefixed string `result` is rewritten to its decimal form.
pub fn format_reply(reply: &Value, session_id: &str) -> Value {
    let Some(obj) = reply.as_object() else {
        return json!({ "error": "Invalid response format" });
    };

    let mut out = serde_json::Map::new();
    if let Some(id) = obj.get("id") {
        out.insert("id".to_string(), id.clone());
    }
    if let Some(jsonrpc) = obj.get("jsonrpc") {
        out.insert("jsonrpc".to_string(), jsonrpc.clone());
    }
    out.insert("sessionId".to_string(), json!(session_id));

    if let Some(error) = obj.get("error") {
        out.insert("error".to_string(), error.clone());
    }

    if let Some(result) = obj.get("result") {
        out.insert("result".to_string(), convert_result(result));
    }

    Value::Object(out)
}

fn convert_result(result: &Value) -> Value {
    match result.as_str() {
        Some(s) if s.starts_with("0x") => {
            match BigUint::from_str_radix(&s[2..], 16) {
                Ok(n) => json!(n.to_str_radix(10)),
                Err(_) => json!("Error converting result to decimal"),
            }
        }
        _ => result.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_hex_result_to_decimal() {
        let reply = json!({"jsonrpc":"2.0","id":7,"result":"0x2540be400"});
        let formatted = format_reply(&reply, "sess-1");
        assert_eq!(formatted["result"], json!("10000000000"));
        assert_eq!(formatted["id"], json!(7));
        assert_eq!(formatted["sessionId"], json!("sess-1"));
    }

    #[test]
    fn non_string_result_passes_through() {
        let reply = json!({"jsonrpc":"2.0","id":1,"result":{"nested":true}});
        let formatted = format_reply(&reply, "sess-1");
        assert_eq!(formatted["result"], json!({"nested": true}));
    }

    #[test]
    fn malformed_hex_yields_error_string() {
        let reply = json!({"jsonrpc":"2.0","id":1,"result":"0xzzzz"});
        let formatted = format_reply(&reply, "sess-1");
        assert_eq!(formatted["result"], json!("Error converting result to decimal"));
    }

    #[test]
    fn non_object_reply_is_invalid() {
        let reply = json!("not an object");
        let formatted = format_reply(&reply, "sess-1");
        assert_eq!(formatted, json!({"error": "Invalid response format"}));
    }

    #[test]
    fn upstream_error_body_passes_through_formatted() {
        let reply = json!({"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"boom"}});
        let formatted = format_reply(&reply, "sess-1");
        assert_eq!(formatted["error"]["message"], json!("boom"));
        assert_eq!(formatted["sessionId"], json!("sess-1"));
    }
}
