//! RPC documents and reply parsing (RFC 6241)

use crate::error::{Error, Result};
use deploykit::{Datastore, RpcError, RpcReply};
use regex::Regex;
use std::sync::LazyLock;

pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
pub const NAMESPACE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

// Element names may carry any namespace prefix
static RPC_REPLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:[\w.-]+:)?rpc-reply\b([^>]*)>").expect("valid pattern"));
static MESSAGE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"message-id\s*=\s*["']([^"']*)["']"#).expect("valid pattern"));
static RPC_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:[\w.-]+:)?rpc-error\b[^>]*>(.*?)</(?:[\w.-]+:)?rpc-error>")
        .expect("valid pattern")
});
static ERROR_TAG: LazyLock<Regex> = LazyLock::new(|| element("error-tag"));
static ERROR_SEVERITY: LazyLock<Regex> = LazyLock::new(|| element("error-severity"));
static ERROR_MESSAGE: LazyLock<Regex> = LazyLock::new(|| element("error-message"));
static CAPABILITY: LazyLock<Regex> = LazyLock::new(|| element("capability"));
static SESSION_ID: LazyLock<Regex> = LazyLock::new(|| element("session-id"));
static XML_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*<\?xml[^>]*\?>").expect("valid pattern"));
static CONFIG_ROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<(?:[\w.-]+:)?config[\s/>]").expect("valid pattern"));

fn element(name: &str) -> Regex {
    Regex::new(&format!(
        r"(?s)<(?:[\w.-]+:)?{name}\b[^>]*>(.*?)</(?:[\w.-]+:)?{name}>"
    ))
    .expect("valid pattern")
}

// ============================================================================
// Requests
// ============================================================================

/// Client hello advertising both base versions
pub fn client_hello() -> String {
    format!(
        "{XML_DECLARATION}\n<hello xmlns=\"{NAMESPACE}\">\
         <capabilities>\
         <capability>{BASE_1_0}</capability>\
         <capability>{BASE_1_1}</capability>\
         </capabilities></hello>"
    )
}

/// Wrap an operation in an `<rpc>` envelope
pub fn wrap_rpc(message_id: u64, operation: &str) -> String {
    format!(
        "{XML_DECLARATION}\n<rpc message-id=\"{message_id}\" xmlns=\"{NAMESPACE}\">{operation}</rpc>"
    )
}

pub fn lock(datastore: Datastore) -> String {
    format!("<lock><target><{datastore}/></target></lock>")
}

pub fn unlock(datastore: Datastore) -> String {
    format!("<unlock><target><{datastore}/></target></unlock>")
}

/// `<edit-config>` loading a rendered document into a datastore
///
/// The document is used as the `<config>` element when it already is one,
/// otherwise it is wrapped in one. A leading XML declaration is dropped.
pub fn edit_config(datastore: Datastore, document: &str) -> String {
    let body = XML_DECL.replace(document, "");
    let body = body.trim();
    let config = if CONFIG_ROOT.is_match(body) {
        body.to_string()
    } else {
        format!("<config>{body}</config>")
    };
    format!("<edit-config><target><{datastore}/></target>{config}</edit-config>")
}

pub fn commit() -> String {
    "<commit/>".to_string()
}

pub fn close_session() -> String {
    "<close-session/>".to_string()
}

// ============================================================================
// Server messages
// ============================================================================

/// Capabilities a hello advertises
pub fn capabilities(hello: &str) -> Vec<String> {
    CAPABILITY
        .captures_iter(hello)
        .map(|c| c[1].trim().to_string())
        .collect()
}

/// Whether the peer's hello allows chunked framing
pub fn supports_chunked(hello: &str) -> bool {
    capabilities(hello).iter().any(|c| c == BASE_1_1)
}

pub fn session_id(hello: &str) -> Option<String> {
    SESSION_ID
        .captures(hello)
        .map(|c| c[1].trim().to_string())
}

/// `message-id` attribute of an `<rpc>` or `<rpc-reply>`
pub fn message_id(message: &str) -> Option<String> {
    let attrs = RPC_REPLY
        .captures(message)
        .map(|c| c.get(1).map_or("", |m| m.as_str()).to_string())
        .or_else(|| {
            let start = message.find("<rpc ")?;
            let end = message[start..].find('>')?;
            Some(message[start..start + end].to_string())
        })?;
    MESSAGE_ID.captures(&attrs).map(|c| c[1].to_string())
}

/// Parse an `<rpc-reply>` for the request with `expected_id`
///
/// Returns `None` for a reply to some other request, which happens when a
/// reply arrives after its request already timed out.
pub fn parse_reply(message: &str, expected_id: u64) -> Result<Option<RpcReply>> {
    if !RPC_REPLY.is_match(message) {
        let preview: String = message.chars().take(80).collect();
        return Err(Error::Malformed(format!("expected rpc-reply, got '{preview}'")));
    }

    if let Some(id) = message_id(message) {
        if id != expected_id.to_string() {
            return Ok(None);
        }
    }

    let errors: Vec<RpcError> = RPC_ERROR
        .captures_iter(message)
        .map(|c| parse_rpc_error(&c[1]))
        .collect();

    Ok(Some(if errors.is_empty() {
        RpcReply::ok(message)
    } else {
        RpcReply::rejected(message, errors)
    }))
}

fn parse_rpc_error(block: &str) -> RpcError {
    let text = |re: &Regex| {
        re.captures(block)
            .map(|c| unescape(c[1].trim()))
            .filter(|s| !s.is_empty())
    };

    RpcError {
        tag: text(&ERROR_TAG).unwrap_or_else(|| "unknown".to_string()),
        severity: text(&ERROR_SEVERITY).unwrap_or_else(|| "error".to_string()),
        message: text(&ERROR_MESSAGE),
    }
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_HELLO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities>
    <capability>urn:ietf:params:netconf:base:1.0</capability>
    <capability>urn:ietf:params:netconf:base:1.1</capability>
    <capability>urn:ietf:params:netconf:capability:candidate:1.0</capability>
  </capabilities>
  <session-id>4242</session-id>
</hello>"#;

    #[test]
    fn test_hello_capabilities() {
        assert_eq!(capabilities(SERVER_HELLO).len(), 3);
        assert!(supports_chunked(SERVER_HELLO));
        assert_eq!(session_id(SERVER_HELLO).as_deref(), Some("4242"));

        let old = SERVER_HELLO.replace(BASE_1_1, "urn:example:other");
        assert!(!supports_chunked(&old));
        assert!(supports_chunked(&client_hello()));
    }

    #[test]
    fn test_rpc_envelope() {
        let rpc = wrap_rpc(7, &lock(Datastore::Candidate));
        assert!(rpc.contains(r#"<rpc message-id="7""#));
        assert!(rpc.contains("<lock><target><candidate/></target></lock>"));
        assert_eq!(message_id(&rpc).as_deref(), Some("7"));
    }

    #[test]
    fn test_edit_config_wraps_bare_document() {
        let op = edit_config(Datastore::Running, "<system><hostname>r1</hostname></system>");
        assert_eq!(
            op,
            "<edit-config><target><running/></target>\
             <config><system><hostname>r1</hostname></system></config></edit-config>"
        );
    }

    #[test]
    fn test_edit_config_keeps_config_root() {
        let document = "<?xml version=\"1.0\"?>\n<config xmlns=\"urn:x\">\n  <a/>\n</config>\n";
        let op = edit_config(Datastore::Candidate, document);
        assert!(op.contains("<target><candidate/></target><config xmlns=\"urn:x\">"));
        assert!(!op.contains("<?xml"));
        assert_eq!(op.matches("<config").count(), 1);

        // <configuration> is not a config root
        let op = edit_config(Datastore::Candidate, "<configuration/>");
        assert!(op.contains("<config><configuration/></config>"));
    }

    #[test]
    fn test_parse_ok_reply() {
        let raw = r#"<rpc-reply message-id="3" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><ok/></rpc-reply>"#;
        let reply = parse_reply(raw, 3).unwrap().unwrap();
        assert!(reply.is_ok());
        assert!(reply.errors.is_empty());
        assert_eq!(reply.raw, raw);
    }

    #[test]
    fn test_parse_rpc_error() {
        let raw = r#"<nc:rpc-reply xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="2">
  <nc:rpc-error>
    <nc:error-type>protocol</nc:error-type>
    <nc:error-tag>lock-denied</nc:error-tag>
    <nc:error-severity>error</nc:error-severity>
    <nc:error-message xml:lang="en">Lock held by session 12 &amp; others</nc:error-message>
  </nc:rpc-error>
</nc:rpc-reply>"#;
        let reply = parse_reply(raw, 2).unwrap().unwrap();
        assert!(!reply.is_ok());
        assert_eq!(reply.errors.len(), 1);
        assert_eq!(reply.errors[0].tag, "lock-denied");
        assert_eq!(reply.errors[0].severity, "error");
        assert_eq!(
            reply.errors[0].message.as_deref(),
            Some("Lock held by session 12 & others")
        );
    }

    #[test]
    fn test_warning_only_reply_is_ok() {
        let raw = r#"<rpc-reply message-id="5"><rpc-error><error-tag>operation-failed</error-tag><error-severity>warning</error-severity></rpc-error><ok/></rpc-reply>"#;
        let reply = parse_reply(raw, 5).unwrap().unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.errors.len(), 1);
        assert_eq!(reply.errors[0].message, None);
    }

    #[test]
    fn test_stale_reply_is_skipped() {
        let raw = r#"<rpc-reply message-id="4"><ok/></rpc-reply>"#;
        assert!(parse_reply(raw, 5).unwrap().is_none());
    }

    #[test]
    fn test_non_reply_is_malformed() {
        assert!(matches!(
            parse_reply("<notification/>", 1),
            Err(Error::Malformed(_))
        ));
    }
}
