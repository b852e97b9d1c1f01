use std::borrow::Cow;

use super::PortalError;

/// A plain HTTP reply: status, response headers and raw body.
///
/// Redirects are never followed by the transport; the flows follow
/// `Location` themselves where the protocol expects it.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpReply {
    /// First header with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every `Set-Cookie` header value, in response order.
    pub fn set_cookies(&self) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("Set-Cookie"))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Transport capability consumed by the portal client.
///
/// Kept behind a trait so the login/logout flows and queries can be
/// driven by a scripted fake in tests.
#[allow(async_fn_in_trait)]
pub trait HttpTransport {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpReply, PortalError>;

    async fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        content_type: &str,
        body: String,
    ) -> Result<HttpReply, PortalError>;
}

/// reqwest-backed transport. Cookies and redirects are handled by the
/// caller, not the library.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        Ok(ReqwestTransport {
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()?,
        })
    }

    async fn reply(response: reqwest::Response) -> Result<HttpReply, PortalError> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await.map_err(|err| {
            log::debug!("failed to read response body: {err}");
            PortalError::Network
        })?;
        Ok(HttpReply {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpReply, PortalError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await.map_err(|err| {
            log::debug!("GET {url} failed: {err}");
            PortalError::Network
        })?;
        Self::reply(response).await
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        content_type: &str,
        body: String,
    ) -> Result<HttpReply, PortalError> {
        let mut request = self.client.post(url).header("Content-Type", content_type);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.body(body).send().await.map_err(|err| {
            log::debug!("POST {url} failed: {err}");
            PortalError::Network
        })?;
        Self::reply(response).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;

    #[derive(Debug)]
    pub(crate) struct LoggedRequest {
        pub method: &'static str,
        pub url: String,
        pub headers: Vec<(String, String)>,
        pub body: String,
    }

    enum Scripted {
        Reply(HttpReply),
        Fail,
    }

    /// Transport that replays a canned sequence of replies and records
    /// every request it saw.
    pub(crate) struct ScriptedTransport {
        script: RefCell<VecDeque<Scripted>>,
        pub(crate) requests: RefCell<Vec<LoggedRequest>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            ScriptedTransport {
                script: RefCell::new(VecDeque::new()),
                requests: RefCell::new(Vec::new()),
            }
        }

        pub fn reply(self, reply: HttpReply) -> Self {
            self.script.borrow_mut().push_back(Scripted::Reply(reply));
            self
        }

        pub fn fail(self) -> Self {
            self.script.borrow_mut().push_back(Scripted::Fail);
            self
        }

        pub fn request_urls(&self) -> Vec<String> {
            self.requests
                .borrow()
                .iter()
                .map(|request| request.url.clone())
                .collect()
        }

        fn next(
            &self,
            method: &'static str,
            url: &str,
            headers: &[(&str, &str)],
            body: String,
        ) -> Result<HttpReply, PortalError> {
            self.requests.borrow_mut().push(LoggedRequest {
                method,
                url: url.to_owned(),
                headers: headers
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect(),
                body,
            });
            match self.script.borrow_mut().pop_front() {
                Some(Scripted::Reply(reply)) => Ok(reply),
                Some(Scripted::Fail) => Err(PortalError::Network),
                None => panic!("no scripted reply for {method} {url}"),
            }
        }
    }

    impl HttpTransport for ScriptedTransport {
        async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpReply, PortalError> {
            self.next("GET", url, headers, String::new())
        }

        async fn post(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            _content_type: &str,
            body: String,
        ) -> Result<HttpReply, PortalError> {
            self.next("POST", url, headers, body)
        }
    }

    pub(crate) fn ok(body: &str) -> HttpReply {
        HttpReply {
            status: 200,
            headers: vec![],
            body: body.as_bytes().to_vec(),
        }
    }

    pub(crate) fn found(location: &str) -> HttpReply {
        HttpReply {
            status: 302,
            headers: vec![("Location".to_owned(), location.to_owned())],
            body: vec![],
        }
    }

    pub(crate) fn status(status: u16) -> HttpReply {
        HttpReply {
            status,
            headers: vec![],
            body: vec![],
        }
    }

    pub(crate) fn with_cookie(mut reply: HttpReply, set_cookie: &str) -> HttpReply {
        reply
            .headers
            .push(("Set-Cookie".to_owned(), set_cookie.to_owned()));
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let reply = HttpReply {
            status: 302,
            headers: vec![("location".to_owned(), "https://example.com/".to_owned())],
            body: vec![],
        };
        assert_eq!(reply.header("Location"), Some("https://example.com/"));
    }

    #[test]
    fn set_cookies_returns_every_value() {
        let reply = HttpReply {
            status: 200,
            headers: vec![
                ("Set-Cookie".to_owned(), "a=1".to_owned()),
                ("Content-Type".to_owned(), "text/html".to_owned()),
                ("set-cookie".to_owned(), "b=2".to_owned()),
            ],
            body: vec![],
        };
        let cookies: Vec<&str> = reply.set_cookies().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }
}
