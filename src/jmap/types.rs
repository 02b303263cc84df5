use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const USING_MAIL: [&str; 2] = ["urn:ietf:params:jmap:core", "urn:ietf:params:jmap:mail"];

// JMAP Session (from .well-known/jmap)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JmapSession {
    pub username: String,
    pub api_url: String,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub primary_accounts: HashMap<String, String>,
    #[serde(default)]
    pub accounts: HashMap<String, JmapAccount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JmapAccount {
    pub name: String,
    #[serde(default)]
    pub is_read_only: bool,
}

impl JmapSession {
    pub fn mail_account_id(&self) -> Option<&str> {
        if let Some(id) = self.primary_accounts.get("urn:ietf:params:jmap:mail") {
            return Some(id.as_str());
        }

        // a lone account is the mail account
        if self.accounts.len() == 1 {
            return self.accounts.keys().next().map(|s| s.as_str());
        }

        None
    }
}

// JMAP Request/Response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JmapRequest {
    pub using: Vec<&'static str>,
    pub method_calls: Vec<MethodCall>,
}

impl JmapRequest {
    pub fn single(method: &'static str, args: serde_json::Value) -> Self {
        JmapRequest {
            using: USING_MAIL.to_vec(),
            method_calls: vec![MethodCall(method, args, "0".to_string())],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MethodCall(pub &'static str, pub serde_json::Value, pub String);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JmapResponse {
    pub method_responses: Vec<MethodResponse>,
}

#[derive(Debug, Deserialize)]
pub struct MethodResponse(
    pub String,
    pub serde_json::Value,
    #[allow(dead_code)] pub String,
);

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Mailbox {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MailboxGetResponse {
    pub list: Vec<Mailbox>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailQueryResponse {
    pub ids: Vec<String>,
    #[serde(default)]
    pub position: u32,
    #[serde(default)]
    pub total: Option<u32>,
}

/// The slice of an Email object the store needs to fetch and route it.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EmailMeta {
    pub id: String,
    #[serde(default)]
    pub blob_id: Option<String>,
    #[serde(default)]
    pub received_at: Option<String>,
    #[serde(default)]
    pub keywords: HashMap<String, bool>,
    #[serde(default)]
    pub mailbox_ids: HashMap<String, bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailGetResponse {
    pub list: Vec<EmailMeta>,
    #[serde(default)]
    pub not_found: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_minimal_jmap_session() {
        let data = json!({
            "username": "user@example.com",
            "apiUrl": "https://api.example.com/jmap"
        });
        let session: JmapSession = serde_json::from_value(data).unwrap();
        assert_eq!(session.username, "user@example.com");
        assert_eq!(session.api_url, "https://api.example.com/jmap");
        assert!(session.download_url.is_none());
        assert_eq!(session.mail_account_id(), None);
    }

    #[test]
    fn test_mail_account_id_primary() {
        let data = json!({
            "username": "u@e.com",
            "apiUrl": "https://api.e.com/jmap",
            "primaryAccounts": {
                "urn:ietf:params:jmap:mail": "primary-id"
            },
            "accounts": {
                "primary-id": { "name": "Main" },
                "other-id": { "name": "Other", "isReadOnly": true }
            }
        });
        let session: JmapSession = serde_json::from_value(data).unwrap();
        assert_eq!(session.mail_account_id(), Some("primary-id"));
        assert!(session.accounts["other-id"].is_read_only);
    }

    #[test]
    fn test_mail_account_id_fallback_single() {
        let data = json!({
            "username": "u@e.com",
            "apiUrl": "https://api.e.com/jmap",
            "accounts": {
                "only-one": { "name": "Solo" }
            }
        });
        let session: JmapSession = serde_json::from_value(data).unwrap();
        assert_eq!(session.mail_account_id(), Some("only-one"));
    }

    #[test]
    fn test_deserialize_email_meta() {
        let data = json!({
            "id": "e1",
            "blobId": "b1",
            "receivedAt": "2025-01-01T00:00:00Z",
            "keywords": {"$seen": true, "Work": true},
            "mailboxIds": {"mb-archive": true}
        });
        let email: EmailMeta = serde_json::from_value(data).unwrap();
        assert_eq!(email.blob_id.as_deref(), Some("b1"));
        assert_eq!(email.keywords.len(), 2);
        assert!(email.mailbox_ids.contains_key("mb-archive"));

        let bare: EmailMeta = serde_json::from_value(json!({"id": "e2"})).unwrap();
        assert!(bare.blob_id.is_none());
        assert!(bare.keywords.is_empty());
    }

    #[test]
    fn test_deserialize_query_response() {
        let data = json!({
            "accountId": "acc-1",
            "queryState": "state-1",
            "ids": ["e1", "e2"],
            "position": 0,
            "total": 42
        });
        let resp: EmailQueryResponse = serde_json::from_value(data).unwrap();
        assert_eq!(resp.ids, vec!["e1", "e2"]);
        assert_eq!(resp.total, Some(42));
        assert_eq!(resp.position, 0);
    }

    #[test]
    fn test_request_serializes_as_triples() {
        let req = JmapRequest::single("Core/echo", json!({"ping": true}));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["using"][1], "urn:ietf:params:jmap:mail");
        assert_eq!(value["methodCalls"][0][0], "Core/echo");
        assert_eq!(value["methodCalls"][0][1]["ping"], true);
        assert_eq!(value["methodCalls"][0][2], "0");
    }
}
