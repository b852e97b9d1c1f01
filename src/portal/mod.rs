use reqwest::Url;
use thiserror::Error;

use self::cookies::CookieJar;
use self::http::{HttpReply, HttpTransport};

pub mod cookies;
pub mod http;
pub mod login;
pub mod logout;
pub mod query;

pub const OK: u16 = 200;
pub const FOUND: u16 = 302;

/// Landing page of the ride-history UI; doubles as the Referer for the
/// JSON API calls, which is what the portal expects from a browser.
pub const HISTORY_PAGE: &str = "https://www.hsl.fi/omat-tiedot/kaupunkipyorat/matkahistoria";

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:138.0) Gecko/20100101 Firefox/138.0";

const DEFAULT_HEADERS: [(&str, &str); 3] = [
    ("DNT", "1"),
    ("Sec-GPC", "1"),
    ("Connection", "keep-alive"),
];

/// Failures the portal can produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortalError {
    /// No HTTP response at all (DNS, TLS, connection reset, ...).
    #[error("no response from the portal")]
    Network,

    /// A response arrived with a status the flow did not expect.
    #[error("unexpected HTTP status {0}")]
    Http(u16),

    /// The portal rejected the sign-in; the message is whatever the
    /// login UI displayed, possibly empty.
    #[error("sign-in rejected: {0}")]
    Credentials(String),
}

impl PortalError {
    /// The HTTP status to record for this failure, 0 for no response.
    pub fn status(&self) -> u16 {
        match self {
            PortalError::Http(status) => *status,
            _ => 0,
        }
    }
}

/// HTTP client bound to the portal: browser-mimicking default headers
/// plus an explicit cookie jar read before and updated after every
/// request.
pub struct PortalClient<T> {
    transport: T,
    cookies: CookieJar,
}

impl<T: HttpTransport> PortalClient<T> {
    pub fn new(transport: T) -> Self {
        PortalClient {
            transport,
            cookies: CookieJar::new(),
        }
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn cookies_mut(&mut self) -> &mut CookieJar {
        &mut self.cookies
    }

    pub fn set_cookies(&mut self, cookies: CookieJar) {
        self.cookies = cookies;
    }

    pub async fn get(
        &mut self,
        url: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<HttpReply, PortalError> {
        let parsed = parse_url(url)?;
        let headers = self.request_headers(&parsed, extra_headers);
        let refs: Vec<(&str, &str)> = headers.iter().map(|(n, v)| (*n, v.as_str())).collect();
        log::debug!("GET {url}");
        let reply = self.transport.get(url, &refs).await?;
        self.absorb_cookies(&parsed, &reply);
        log::debug!("GET {url} -> {}", reply.status);
        Ok(reply)
    }

    pub async fn post(
        &mut self,
        url: &str,
        extra_headers: &[(&str, &str)],
        content_type: &str,
        body: String,
    ) -> Result<HttpReply, PortalError> {
        let parsed = parse_url(url)?;
        let headers = self.request_headers(&parsed, extra_headers);
        let refs: Vec<(&str, &str)> = headers.iter().map(|(n, v)| (*n, v.as_str())).collect();
        log::debug!("POST {url}");
        let reply = self.transport.post(url, &refs, content_type, body).await?;
        self.absorb_cookies(&parsed, &reply);
        log::debug!("POST {url} -> {}", reply.status);
        Ok(reply)
    }

    fn request_headers<'a>(
        &self,
        url: &Url,
        extra_headers: &[(&'a str, &'a str)],
    ) -> Vec<(&'a str, String)> {
        let mut headers: Vec<(&str, String)> =
            Vec::with_capacity(DEFAULT_HEADERS.len() + extra_headers.len() + 2);
        headers.push(("User-Agent", USER_AGENT.to_owned()));
        for (name, value) in DEFAULT_HEADERS {
            headers.push((name, value.to_owned()));
        }
        for (name, value) in extra_headers {
            headers.push((name, (*value).to_owned()));
        }
        if let Some(cookie) = self.cookies.header_for(url) {
            headers.push(("Cookie", cookie));
        }
        headers
    }

    fn absorb_cookies(&mut self, url: &Url, reply: &HttpReply) {
        let lines: Vec<String> = reply.set_cookies().map(str::to_owned).collect();
        for line in lines {
            self.cookies.update(url, &line);
        }
    }
}

fn parse_url(url: &str) -> Result<Url, PortalError> {
    Url::parse(url).map_err(|err| {
        log::debug!("unusable url {url}: {err}");
        PortalError::Network
    })
}

/// Header set for the JSON API endpoints (profile, service, history).
pub(crate) fn json_api_headers() -> [(&'static str, &'static str); 6] {
    [
        ("Referer", HISTORY_PAGE),
        ("Sec-Fetch-Dest", "empty"),
        ("Sec-Fetch-Mode", "cors"),
        ("Sec-Fetch-Site", "same-origin"),
        ("TE", "trailers"),
        ("Priority", "u=4"),
    ]
}

#[cfg(test)]
mod tests {
    use super::http::testing::{ok, with_cookie, ScriptedTransport};
    use super::*;

    #[tokio::test]
    async fn cookies_flow_from_response_to_next_request() {
        let transport = ScriptedTransport::new()
            .reply(with_cookie(ok(""), "SESSION=abc"))
            .reply(ok(""));
        let mut client = PortalClient::new(transport);

        client.get("https://id.hsl.fi/first", &[]).await.unwrap();
        client.get("https://id.hsl.fi/second", &[]).await.unwrap();

        let requests = client.transport.requests.borrow();
        let first_cookie = requests[0]
            .headers
            .iter()
            .find(|(name, _)| name == "Cookie");
        assert!(first_cookie.is_none());
        let second_cookie = requests[1]
            .headers
            .iter()
            .find(|(name, _)| name == "Cookie")
            .map(|(_, value)| value.clone());
        assert_eq!(second_cookie, Some("SESSION=abc".to_owned()));
    }

    #[tokio::test]
    async fn default_headers_applied() {
        let transport = ScriptedTransport::new().reply(ok(""));
        let mut client = PortalClient::new(transport);

        client
            .get("https://www.hsl.fi/", &[("Referer", "https://www.hsl.fi/")])
            .await
            .unwrap();

        let requests = client.transport.requests.borrow();
        let names: Vec<&str> = requests[0]
            .headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert!(names.contains(&"User-Agent"));
        assert!(names.contains(&"DNT"));
        assert!(names.contains(&"Referer"));
    }
}
