//! Mozilla autoconfig XML parsing
//!
//! Extracts IMAP server definitions from the `config-v1.1.xml` format
//! served by the Thunderbird ISPDB and by self-hosted autoconfig
//! endpoints. Only `incomingServer` elements with `type="imap"` are
//! considered; entries missing a hostname or carrying a non-integer port
//! are skipped, and malformed XML yields an empty list rather than an
//! error.

use super::{SecurityMode, UsernameFormat};
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;

/// Server fields extracted from one `incomingServer` element
///
/// Source and priority are the calling strategy's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoconfigServer {
    pub hostname: String,
    pub port: u16,
    pub security: SecurityMode,
    pub username_format: UsernameFormat,
}

#[derive(Default)]
struct PartialServer {
    hostname: Option<String>,
    port: Option<String>,
    socket_type: Option<String>,
    username: Option<String>,
}

impl PartialServer {
    fn finish(self) -> Option<AutoconfigServer> {
        let hostname = self.hostname.filter(|h| !h.is_empty())?;
        let port: u16 = self.port?.trim().parse().ok()?;

        let security = match self.socket_type.as_deref() {
            Some("SSL") => SecurityMode::Ssl,
            Some("STARTTLS") => SecurityMode::StartTls,
            _ => SecurityMode::None,
        };
        let username_format = match self.username.as_deref() {
            Some("%EMAILLOCALPART%") => UsernameFormat::LocalPart,
            _ => UsernameFormat::Email,
        };

        Some(AutoconfigServer {
            hostname,
            port,
            security,
            username_format,
        })
    }
}

/// Parse autoconfig XML into IMAP server entries
#[must_use]
pub fn parse_autoconfig(xml: &str) -> Vec<AutoconfigServer> {
    try_parse(xml).unwrap_or_else(|e| {
        debug!("Discarding malformed autoconfig XML: {}", e);
        Vec::new()
    })
}

fn try_parse(xml: &str) -> Result<Vec<AutoconfigServer>, quick_xml::Error> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut servers = Vec::new();
    let mut current: Option<PartialServer> = None;
    let mut field: Option<Vec<u8>> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                if name == b"incomingServer" {
                    let is_imap = e
                        .try_get_attribute("type")?
                        .map(|attr| attr.value.as_ref() == b"imap")
                        .unwrap_or(false);
                    current = is_imap.then(PartialServer::default);
                } else if current.is_some()
                    && matches!(
                        name.as_slice(),
                        b"hostname" | b"port" | b"socketType" | b"username"
                    )
                {
                    field = Some(name);
                }
            }
            Event::Text(t) => {
                if let (Some(server), Some(field)) = (current.as_mut(), field.as_deref()) {
                    let text = t.unescape()?.into_owned();
                    match field {
                        b"hostname" => server.hostname = Some(text),
                        b"port" => server.port = Some(text),
                        b"socketType" => server.socket_type = Some(text),
                        b"username" => server.username = Some(text),
                        _ => {}
                    }
                }
            }
            Event::End(e) => {
                let name = e.name().as_ref().to_vec();
                if name == b"incomingServer" {
                    if let Some(finished) = current.take().and_then(PartialServer::finish) {
                        servers.push(finished);
                    }
                } else if field.as_deref() == Some(name.as_slice()) {
                    field = None;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(servers)
}

/// Fetch and parse an autoconfig document; any failure yields an empty list
pub(crate) async fn fetch_autoconfig(
    client: &reqwest::Client,
    url: &str,
) -> Vec<AutoconfigServer> {
    let response = match client.get(url).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            debug!("Autoconfig fetch of {} returned {}", url, response.status());
            return Vec::new();
        }
        Err(e) => {
            debug!("Autoconfig fetch of {} failed: {}", url, e);
            return Vec::new();
        }
    };
    match response.text().await {
        Ok(body) => parse_autoconfig(&body),
        Err(e) => {
            debug!("Autoconfig body read from {} failed: {}", url, e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<clientConfig version="1.1">
  <emailProvider id="example.com">
    <incomingServer type="imap">
      <hostname>imap.example.com</hostname>
      <port>993</port>
      <socketType>SSL</socketType>
      <username>%EMAILADDRESS%</username>
    </incomingServer>
    <incomingServer type="imap">
      <hostname>imap2.example.com</hostname>
      <port>143</port>
      <socketType>STARTTLS</socketType>
      <username>%EMAILLOCALPART%</username>
    </incomingServer>
    <incomingServer type="pop3">
      <hostname>pop.example.com</hostname>
      <port>995</port>
      <socketType>SSL</socketType>
    </incomingServer>
    <outgoingServer type="smtp">
      <hostname>smtp.example.com</hostname>
      <port>587</port>
    </outgoingServer>
  </emailProvider>
</clientConfig>"#;

    #[test]
    fn test_parses_imap_servers_only() {
        let servers = parse_autoconfig(SAMPLE);
        assert_eq!(servers.len(), 2);

        assert_eq!(servers[0].hostname, "imap.example.com");
        assert_eq!(servers[0].port, 993);
        assert_eq!(servers[0].security, SecurityMode::Ssl);
        assert_eq!(servers[0].username_format, UsernameFormat::Email);

        assert_eq!(servers[1].hostname, "imap2.example.com");
        assert_eq!(servers[1].port, 143);
        assert_eq!(servers[1].security, SecurityMode::StartTls);
        assert_eq!(servers[1].username_format, UsernameFormat::LocalPart);
    }

    #[test]
    fn test_unknown_socket_type_maps_to_none() {
        let xml = r#"<incomingServer type="imap">
            <hostname>h.example.com</hostname>
            <port>143</port>
            <socketType>plain</socketType>
        </incomingServer>"#;
        let servers = parse_autoconfig(xml);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].security, SecurityMode::None);
    }

    #[test]
    fn test_missing_hostname_is_skipped() {
        let xml = r#"<incomingServer type="imap">
            <port>993</port>
            <socketType>SSL</socketType>
        </incomingServer>"#;
        assert!(parse_autoconfig(xml).is_empty());
    }

    #[test]
    fn test_non_integer_port_is_skipped() {
        let xml = r#"<incomingServer type="imap">
            <hostname>imap.example.com</hostname>
            <port>imaps</port>
        </incomingServer>"#;
        assert!(parse_autoconfig(xml).is_empty());
    }

    #[test]
    fn test_missing_port_is_skipped() {
        let xml = r#"<incomingServer type="imap">
            <hostname>imap.example.com</hostname>
        </incomingServer>"#;
        assert!(parse_autoconfig(xml).is_empty());
    }

    #[test]
    fn test_malformed_xml_yields_empty() {
        assert!(parse_autoconfig("<incomingServer type=\"imap\"><hostname>x").is_empty());
        assert!(parse_autoconfig("not xml at all").is_empty());
        assert!(parse_autoconfig("").is_empty());
    }

    #[test]
    fn test_untyped_incoming_server_is_skipped() {
        let xml = r#"<incomingServer>
            <hostname>imap.example.com</hostname>
            <port>993</port>
        </incomingServer>"#;
        assert!(parse_autoconfig(xml).is_empty());
    }
}
