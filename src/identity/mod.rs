use axum::http::HeaderMap;
use std::net::IpAddr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no identity signal present in request")]
    NoSignal,
}

/// Stable identity for one incoming request. Never persisted on its own,
/// only embedded into ledger rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub user_id: Option<Uuid>,
    pub session_fingerprint: String,
    pub ip_address: String,
    pub user_agent: String,
}

impl RequestIdentity {
    /// Quota bucket key. The user id wins over the fingerprint, the
    /// fingerprint over the bare IP.
    pub fn bucket(&self) -> String {
        if let Some(user_id) = &self.user_id {
            return format!("user:{}", user_id);
        }
        if !self.session_fingerprint.is_empty() {
            return format!("anon:{}", self.session_fingerprint);
        }
        format!("ip:{}", self.ip_address)
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Derive a request identity from headers and body fields. Pure, no side
/// effects. Fails only when there is no signal at all: no user id, no
/// fingerprint and no extractable IP.
pub fn resolve(
    headers: &HeaderMap,
    user_id: Option<&str>,
    session_fingerprint: Option<&str>,
    peer_ip: Option<IpAddr>,
) -> Result<RequestIdentity, IdentityError> {
    // A malformed user id downgrades the request to anonymous instead of
    // rejecting it; the fingerprint still buckets it.
    let user_id = user_id.and_then(|raw| Uuid::parse_str(raw.trim()).ok());

    let session_fingerprint = session_fingerprint
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let ip_address = client_ip(headers, peer_ip).unwrap_or_default();

    if user_id.is_none() && session_fingerprint.is_empty() && ip_address.is_empty() {
        return Err(IdentityError::NoSignal);
    }

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    Ok(RequestIdentity {
        user_id,
        session_fingerprint,
        ip_address,
        user_agent,
    })
}

/// First hop of `x-forwarded-for`, then `x-real-ip`, then the socket
/// address.
pub fn client_ip(headers: &HeaderMap, peer_ip: Option<IpAddr>) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return Some(real_ip.to_string());
        }
    }
    peer_ip.map(|ip| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn user_id_wins_for_bucketing() {
        let uid = Uuid::new_v4();
        let identity = resolve(
            &headers(&[("x-forwarded-for", "10.0.0.1")]),
            Some(&uid.to_string()),
            Some("fp-123"),
            None,
        )
        .unwrap();
        assert_eq!(identity.bucket(), format!("user:{}", uid));
    }

    #[test]
    fn fingerprint_buckets_anonymous_requests() {
        let identity = resolve(
            &headers(&[("x-forwarded-for", "10.0.0.1")]),
            None,
            Some("fp-123"),
            None,
        )
        .unwrap();
        assert_eq!(identity.bucket(), "anon:fp-123");
    }

    #[test]
    fn bare_ip_is_the_last_resort_bucket() {
        let identity = resolve(&headers(&[("x-real-ip", "10.0.0.9")]), None, None, None).unwrap();
        assert_eq!(identity.bucket(), "ip:10.0.0.9");
    }

    #[test]
    fn forwarded_for_takes_the_first_hop() {
        let headers = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1, 10.0.0.2")]);
        assert_eq!(client_ip(&headers, None).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn peer_address_backstops_missing_headers() {
        let peer: IpAddr = "192.0.2.4".parse().unwrap();
        assert_eq!(
            client_ip(&HeaderMap::new(), Some(peer)).as_deref(),
            Some("192.0.2.4")
        );
    }

    #[test]
    fn malformed_user_id_degrades_to_anonymous() {
        let identity = resolve(&HeaderMap::new(), Some("not-a-uuid"), Some("fp-1"), None).unwrap();
        assert!(identity.user_id.is_none());
        assert_eq!(identity.bucket(), "anon:fp-1");
    }

    #[test]
    fn no_signal_at_all_is_an_error() {
        let err = resolve(&HeaderMap::new(), None, None, None);
        assert!(matches!(err, Err(IdentityError::NoSignal)));
    }
}
