use actix_web::dev::ConnectionInfo;
use actix_web::{http::header, HttpRequest};

const MAX_USER_AGENT_LEN: usize = 256;

/// Client address used for rate limiting and audit entries. Forwarded headers
/// are honoured only when `trust_forwarded_for` is set.
pub fn client_ip_from(info: &ConnectionInfo, trust_forwarded_for: bool) -> Option<String> {
    let raw = if trust_forwarded_for {
        info.realip_remote_addr()
    } else {
        info.peer_addr()
    }?;
    Some(strip_port(raw).to_string())
}

pub fn client_ip(req: &HttpRequest, trust_forwarded_for: bool) -> Option<String> {
    client_ip_from(&req.connection_info(), trust_forwarded_for)
}

pub fn user_agent(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect())
}

fn strip_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        // [::1]:8080
        return rest.split(']').next().unwrap_or(rest);
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("10.0.0.1:5000"), "10.0.0.1");
        assert_eq!(strip_port("10.0.0.1"), "10.0.0.1");
        assert_eq!(strip_port("[::1]:8080"), "::1");
        assert_eq!(strip_port("::1"), "::1");
    }

    #[test]
    fn test_forwarded_header_needs_trust() {
        let req = TestRequest::default()
            .peer_addr("127.0.0.1:4000".parse().unwrap())
            .insert_header(("x-forwarded-for", "203.0.113.9"))
            .to_http_request();

        assert_eq!(client_ip(&req, false).as_deref(), Some("127.0.0.1"));
        assert_eq!(client_ip(&req, true).as_deref(), Some("203.0.113.9"));
    }
}
