//! HTTP/1.1 response fragments for HTTP/3 advertisement.

/// `Alt-Svc: h3=":<port>"`, appended to the next HTTP/1.1 response on a
/// connection where HTTP/3 is being advertised.
pub fn alt_svc_header(h3_port: u16) -> String {
    format!("Alt-Svc: h3=\":{h3_port}\"\r\n")
}

/// Scans a raw HTTP/1.1 request's header block for `Upgrade: h3` alongside
/// `Connection: Upgrade`, case-insensitively, per RFC 9114 Non-goal note:
/// browsers don't actually send this (they use ALPN), but intermediaries
/// and custom clients may.
pub fn wants_h3_upgrade(header_block: &str) -> bool {
    let mut has_upgrade_h3 = false;
    let mut has_connection_upgrade = false;
    for line in header_block.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("upgrade") && value.eq_ignore_ascii_case("h3") {
            has_upgrade_h3 = true;
        }
        if name.eq_ignore_ascii_case("connection") && token_list_contains(value, "upgrade") {
            has_connection_upgrade = true;
        }
    }
    has_upgrade_h3 && has_connection_upgrade
}

fn token_list_contains(value: &str, token: &str) -> bool {
    value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// A complete `101 Switching Protocols` response for an `Upgrade: h3`
/// request.
pub fn switching_protocols_response() -> Vec<u8> {
    b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: h3\r\n\r\n".to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alt_svc_header_names_the_h3_port() {
        assert_eq!(alt_svc_header(443), "Alt-Svc: h3=\":443\"\r\n");
    }

    #[test]
    fn detects_upgrade_request_case_insensitively() {
        let headers = "Host: example.com\r\nConnection: keep-alive, Upgrade\r\nUpgrade: H3\r\n";
        assert!(wants_h3_upgrade(headers));
    }

    #[test]
    fn rejects_upgrade_header_without_connection_token() {
        let headers = "Host: example.com\r\nUpgrade: h3\r\n";
        assert!(!wants_h3_upgrade(headers));
    }
}
