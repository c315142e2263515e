use shared::protocol::SSDP_ADDR;

/// Headers of interest from an M-SEARCH response
#[derive(Debug, Clone, PartialEq)]
pub struct SsdpResponse {
    pub location: String,
    pub st: String,
    pub usn: String,
}

pub fn search_request(search_target: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 3\r\n\
         ST: {}\r\n\
         \r\n",
        SSDP_ADDR, search_target
    )
}

/// Parse an M-SEARCH response. Returns `None` unless LOCATION and ST are present.
pub fn parse_response(response: &str) -> Option<SsdpResponse> {
    let mut location = None;
    let mut st = None;
    let mut usn = None;

    for line in response.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();

        match name.trim().to_ascii_uppercase().as_str() {
            "LOCATION" => location = Some(value),
            "ST" => st = Some(value),
            "USN" => usn = Some(value),
            _ => {}
        }
    }

    Some(SsdpResponse {
        location: location.filter(|l| !l.is_empty())?,
        st: st?,
        usn: usn.unwrap_or_default(),
    })
}
