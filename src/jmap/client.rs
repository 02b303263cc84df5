use base64::Engine;
use serde_json::json;
use std::io::Read as _;

use super::types::*;

/// Page size for `Email/query` paging.
pub const QUERY_PAGE: u32 = 500;

pub struct JmapClient {
    username: String,
    password: String,
    api_url: String,
    account_id: String,
    download_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum JmapError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("API error: {0}")]
    Api(String),
}

impl JmapClient {
    fn auth_header(username: &str, password: &str) -> String {
        let credentials = format!("{}:{}", username, password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        format!("Basic {}", encoded)
    }

    /// GET a URL, following redirects manually so the auth header survives
    /// every hop.
    fn get_following_redirects(
        url: &str,
        auth: &str,
        max_redirects: u32,
    ) -> Result<Vec<u8>, JmapError> {
        let agent = ureq::AgentBuilder::new().redirects(0).build();

        let mut current_url = url.to_string();

        for hop in 0..max_redirects {
            tracing::debug!(hop = hop + 1, url = %current_url, "JMAP GET");

            let response = agent.get(&current_url).set("Authorization", auth).call();

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if (300..400).contains(&status) {
                        let Some(location) = resp.header("location") else {
                            return Err(JmapError::Http(format!(
                                "Redirect {} without Location header",
                                status
                            )));
                        };
                        tracing::debug!(status, location, "Following redirect");
                        current_url = Self::resolve_redirect(&current_url, location);
                        continue;
                    }

                    let mut bytes = Vec::new();
                    resp.into_reader()
                        .read_to_end(&mut bytes)
                        .map_err(|e| JmapError::Parse(format!("Failed to read response: {}", e)))?;
                    tracing::debug!(status, bytes = bytes.len(), "JMAP GET complete");
                    return Ok(bytes);
                }
                Err(ureq::Error::Status(code, resp)) if (300..400).contains(&code) => {
                    let Some(location) = resp.header("location") else {
                        return Err(JmapError::Http(format!(
                            "Redirect {} without Location header",
                            code
                        )));
                    };
                    tracing::debug!(status = code, location, "Following redirect");
                    current_url = Self::resolve_redirect(&current_url, location);
                }
                Err(ureq::Error::Status(401, _)) => {
                    return Err(JmapError::Http(
                        "Authentication failed (401 Unauthorized)".to_string(),
                    ));
                }
                Err(ureq::Error::Status(code, resp)) => {
                    let body = resp.into_string().unwrap_or_default();
                    return Err(JmapError::Http(format!(
                        "HTTP {} error: {}",
                        code,
                        if body.is_empty() {
                            "(empty response)"
                        } else {
                            truncate_str(&body, 200)
                        }
                    )));
                }
                Err(e) => return Err(JmapError::Http(e.to_string())),
            }
        }

        Err(JmapError::Http("Too many redirects".to_string()))
    }

    /// Resolve a redirect location against a base URL.
    fn resolve_redirect(base_url: &str, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else if location.starts_with('/') {
            if let Some(idx) = base_url.find("://") {
                let after_scheme = &base_url[idx + 3..];
                if let Some(path_start) = after_scheme.find('/') {
                    let host_part = &base_url[..idx + 3 + path_start];
                    format!("{}{}", host_part, location)
                } else {
                    format!("{}{}", base_url, location)
                }
            } else {
                location.to_string()
            }
        } else if let Some(last_slash) = base_url.rfind('/') {
            format!("{}/{}", &base_url[..last_slash], location)
        } else {
            location.to_string()
        }
    }

    pub fn discover(
        well_known_url: &str,
        username: &str,
        password: &str,
    ) -> Result<(JmapSession, Self), JmapError> {
        tracing::info!(url = well_known_url, "Discovering JMAP session");
        let auth = Self::auth_header(username, password);

        let body = Self::get_following_redirects(well_known_url, &auth, 5)?;
        if body.is_empty() {
            return Err(JmapError::Http("Server returned empty session".to_string()));
        }
        let text = String::from_utf8_lossy(&body);

        let session: JmapSession = serde_json::from_str(&text).map_err(|e| {
            JmapError::Parse(format!(
                "Failed to parse session: {}. Response was: {}",
                e,
                truncate_str(&text, 500)
            ))
        })?;

        let account_id = session
            .mail_account_id()
            .ok_or_else(|| JmapError::Api("No mail account found in session".to_string()))?
            .to_string();

        tracing::info!(account = %account_id, api = %session.api_url, "JMAP session ready");

        let client = JmapClient {
            username: username.to_string(),
            password: password.to_string(),
            api_url: session.api_url.clone(),
            account_id,
            download_url: session.download_url.clone(),
        };

        Ok((session, client))
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    fn call(&self, request: JmapRequest) -> Result<JmapResponse, JmapError> {
        let auth = Self::auth_header(&self.username, &self.password);

        let response = ureq::post(&self.api_url)
            .set("Authorization", &auth)
            .set("Content-Type", "application/json")
            .send_json(&request)
            .map_err(|e| JmapError::Http(e.to_string()))?;

        let response_text = response
            .into_string()
            .map_err(|e| JmapError::Parse(format!("Failed to read response: {}", e)))?;

        tracing::trace!(body = truncate_str(&response_text, 1000), "JMAP response");

        serde_json::from_str(&response_text)
            .map_err(|e| JmapError::Parse(format!("Failed to parse response: {}", e)))
    }

    /// Send a single method call and return its arguments, turning a JMAP
    /// `error` response into `JmapError::Api`.
    fn invoke(
        &self,
        method: &'static str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, JmapError> {
        tracing::debug!(method, "JMAP call");
        let response = self.call(JmapRequest::single(method, args))?;

        match response.method_responses.into_iter().next() {
            Some(MethodResponse(name, args, _)) if name == method => Ok(args),
            Some(MethodResponse(name, args, _)) if name == "error" => Err(JmapError::Api(format!(
                "{} failed: {}",
                method,
                args.get("type").and_then(|t| t.as_str()).unwrap_or("unknown")
            ))),
            Some(MethodResponse(name, _, _)) => Err(JmapError::Api(format!(
                "Unexpected response {} for {}",
                name, method
            ))),
            None => Err(JmapError::Api(format!("Empty response for {}", method))),
        }
    }

    /// Cheap round trip used as the liveness probe.
    pub fn echo(&self) -> Result<(), JmapError> {
        self.invoke("Core/echo", json!({ "ping": true }))?;
        Ok(())
    }

    pub fn get_mailboxes(&self) -> Result<Vec<Mailbox>, JmapError> {
        let args = self.invoke(
            "Mailbox/get",
            json!({
                "accountId": self.account_id,
                "ids": null,
                "properties": ["id", "name", "parentId", "role"]
            }),
        )?;
        let mailbox_response: MailboxGetResponse =
            serde_json::from_value(args).map_err(|e| JmapError::Parse(e.to_string()))?;
        tracing::debug!(count = mailbox_response.list.len(), "Mailbox/get");
        Ok(mailbox_response.list)
    }

    /// Every email id matching `filter`, paged through `Email/query`
    /// without thread collapsing.
    pub fn query_all(&self, filter: serde_json::Value) -> Result<Vec<String>, JmapError> {
        let mut ids = Vec::new();
        let mut position: u32 = 0;

        loop {
            let args = self.invoke(
                "Email/query",
                json!({
                    "accountId": self.account_id,
                    "filter": filter,
                    "sort": [{ "property": "receivedAt", "isAscending": true }],
                    "collapseThreads": false,
                    "limit": QUERY_PAGE,
                    "position": position
                }),
            )?;
            let page: EmailQueryResponse =
                serde_json::from_value(args).map_err(|e| JmapError::Parse(e.to_string()))?;

            let fetched = page.ids.len() as u32;
            ids.extend(page.ids);
            position = page.position + fetched;

            let exhausted = match page.total {
                Some(total) => position >= total,
                None => fetched < QUERY_PAGE,
            };
            if fetched == 0 || exhausted {
                break;
            }
        }

        tracing::debug!(count = ids.len(), %filter, "Email/query");
        Ok(ids)
    }

    pub fn get_email_meta(&self, ids: &[String]) -> Result<Vec<EmailMeta>, JmapError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let args = self.invoke(
            "Email/get",
            json!({
                "accountId": self.account_id,
                "ids": ids,
                "properties": ["id", "blobId", "keywords", "mailboxIds", "receivedAt"]
            }),
        )?;
        let email_response: EmailGetResponse =
            serde_json::from_value(args).map_err(|e| JmapError::Parse(e.to_string()))?;
        if !email_response.not_found.is_empty() {
            tracing::debug!(missing = ?email_response.not_found, "Email/get notFound");
        }
        Ok(email_response.list)
    }

    pub fn download_blob(
        &self,
        blob_id: &str,
        name: &str,
        content_type: &str,
    ) -> Result<Vec<u8>, JmapError> {
        let Some(download_url) = &self.download_url else {
            return Err(JmapError::Api("No download URL available".to_string()));
        };

        let url = download_url
            .replace("{accountId}", &self.account_id)
            .replace("{blobId}", blob_id)
            .replace("{name}", name)
            .replace("{type}", content_type);

        let auth = Self::auth_header(&self.username, &self.password);
        let bytes = Self::get_following_redirects(&url, &auth, 5)?;
        tracing::debug!(blob = blob_id, bytes = bytes.len(), "Blob downloaded");
        Ok(bytes)
    }

    /// Set a keyword on one email. Setting a keyword it already has is a
    /// no-op on the server.
    pub fn add_keyword(&self, id: &str, keyword: &str) -> Result<(), JmapError> {
        let path = format!("keywords/{}", keyword);
        let patch = json!({ path: true });
        self.update_email(id, patch)
    }

    /// Replace the email's mailboxes with `to_mailbox_id`.
    pub fn move_email(&self, id: &str, to_mailbox_id: &str) -> Result<(), JmapError> {
        let patch = json!({ "mailboxIds": { to_mailbox_id: true } });
        self.update_email(id, patch)
    }

    fn update_email(&self, id: &str, patch: serde_json::Value) -> Result<(), JmapError> {
        let args = self.invoke(
            "Email/set",
            json!({
                "accountId": self.account_id,
                "update": { id: patch }
            }),
        )?;

        if let Some(reason) = args.get("notUpdated").and_then(|n| n.get(id)) {
            return Err(JmapError::Api(format!(
                "Email/set rejected {}: {}",
                id, reason
            )));
        }
        Ok(())
    }
}

fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        let mut end = max_len;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}
