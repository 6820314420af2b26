use rand::Rng;
use std::collections::BTreeMap;

use crate::models::{TestConfig, TrafficType, UserAgentType};
use crate::payloads::{AttackCategory, PayloadPools};
use crate::transport::set_header;

/// URL, body and headers of a request carrying an attack payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackRequest {
    pub url: String,
    pub body: String,
    pub headers: BTreeMap<String, String>,
    /// Category and injection site, e.g. "sql (query parameter)"
    pub attack_info: String,
}

/// Pick the user agent for a request.
///
/// Custom user agent first, then the explicit user-agent type, then a default
/// derived from the traffic type.
pub fn select_user_agent(config: &TestConfig, pools: &PayloadPools) -> String {
    if let Some(custom) = &config.custom_user_agent {
        return custom.clone();
    }

    let kind = config.user_agent_type.unwrap_or(match config.traffic_type {
        TrafficType::Attack => UserAgentType::Scanner,
        TrafficType::Normal => UserAgentType::Legitimate,
    });
    pools.random_user_agent(kind)
}

/// A uniformly random attack category
pub fn random_attack_category() -> AttackCategory {
    let index = rand::thread_rng().gen_range(0..AttackCategory::ALL.len());
    AttackCategory::ALL[index]
}

/// Build a request with a random payload from a random category injected.
///
/// When the drawn category has no payloads the request is left as configured.
pub fn build_attack_request(config: &TestConfig, pools: &PayloadPools) -> AttackRequest {
    let category = random_attack_category();
    match pools.random_payload(category) {
        Some(payload) => {
            let scanner_agent = pools.random_user_agent(UserAgentType::Scanner);
            inject_payload(config, category, payload, scanner_agent)
        }
        None => AttackRequest {
            url: config.target_url.clone(),
            body: config.request_body.clone(),
            headers: config.custom_headers.clone(),
            attack_info: "No payloads available".to_string(),
        },
    }
}

/// Inject `payload` according to the configured method.
///
/// GET requests get it twice in the query string; every other method gets it
/// in the body. The user agent is always overridden.
pub fn inject_payload(
    config: &TestConfig,
    category: AttackCategory,
    payload: &str,
    scanner_agent: String,
) -> AttackRequest {
    let mut headers = config.custom_headers.clone();
    set_header(&mut headers, "User-Agent", scanner_agent);

    if config.is_get() {
        AttackRequest {
            url: inject_query(&config.target_url, payload),
            body: config.request_body.clone(),
            headers,
            attack_info: format!("{} (query parameter)", category),
        }
    } else {
        AttackRequest {
            url: config.target_url.clone(),
            body: inject_body(&config.request_body, payload),
            headers,
            attack_info: format!("{} (request body)", category),
        }
    }
}

/// Append `id=<payload>&search=<payload>` to the query string verbatim
pub fn inject_query(url: &str, payload: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}id={payload}&search={payload}")
}

/// Add the payload to a request body.
///
/// An empty body becomes a fresh JSON object. A non-empty body is spliced
/// textually: one trailing `}` is stripped and an `"attack"` key appended.
/// Bodies that do not end in `}` produce invalid JSON.
pub fn inject_body(body: &str, payload: &str) -> String {
    if body.is_empty() {
        return format!(r#"{{"id": "{payload}", "search": "{payload}"}}"#);
    }
    let head = body.strip_suffix('}').unwrap_or(body);
    format!(r#"{head}, "attack": "{payload}"}}"#)
}

/// A URL under `base` that should not exist on the target
pub fn generate_404_url(base: &str) -> String {
    let base = base.strip_suffix('/').unwrap_or(base);
    let suffix: u32 = rand::thread_rng().gen_range(0..999_999);
    format!(
        "{}/nonexistent-path-{}-{}",
        base,
        chrono::Utc::now().timestamp(),
        suffix
    )
}
