use reqwest::Url;

/// One stored cookie. The domain is kept without a leading dot;
/// `host_only` records whether the server sent a `Domain` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    domain: String,
    path: String,
    secure: bool,
    host_only: bool,
}

impl Cookie {
    /// Parses a `Set-Cookie` header value in the context of the request
    /// URL that produced it. Unknown attributes are ignored.
    pub fn parse(set_cookie: &str, request_url: &Url) -> Option<Cookie> {
        let mut parts = set_cookie.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Cookie {
            name: name.to_owned(),
            value: value.trim().to_owned(),
            domain: request_url.host_str()?.to_ascii_lowercase(),
            path: "/".to_owned(),
            secure: false,
            host_only: true,
        };

        for attribute in parts {
            let (key, val) = match attribute.split_once('=') {
                Some((key, val)) => (key.trim(), val.trim()),
                None => (attribute.trim(), ""),
            };
            if key.eq_ignore_ascii_case("domain") && !val.is_empty() {
                cookie.domain = val.trim_start_matches('.').to_ascii_lowercase();
                cookie.host_only = false;
            } else if key.eq_ignore_ascii_case("path") && !val.is_empty() {
                cookie.path = val.to_owned();
            } else if key.eq_ignore_ascii_case("secure") {
                cookie.secure = true;
            }
        }
        Some(cookie)
    }

    fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            host == self.domain || host.ends_with(&format!(".{}", self.domain))
        };
        let path_ok = url.path().starts_with(&self.path);
        let scheme_ok = !self.secure || url.scheme() == "https";
        domain_ok && path_ok && scheme_ok
    }

    fn same_slot(&self, other: &Cookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }

    /// Raw single-line form, suitable for the persisted cookies file.
    /// The domain and path are always spelled out so a reloaded line
    /// reconstructs the cookie exactly.
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{}={}; Domain={}; Path={}",
            self.name, self.value, self.domain, self.path
        );
        if self.secure {
            line.push_str("; Secure");
        }
        line
    }
}

/// Cookie jar shared by every request of a portal session.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        CookieJar::default()
    }

    /// Applies one `Set-Cookie` line received for `url`. An empty value
    /// or `Max-Age=0` removes the cookie.
    pub fn update(&mut self, url: &Url, set_cookie: &str) {
        let Some(cookie) = Cookie::parse(set_cookie, url) else {
            return;
        };
        let expired = cookie.value.is_empty()
            || set_cookie
                .split(';')
                .skip(1)
                .filter_map(|attr| attr.split_once('='))
                .any(|(key, val)| {
                    key.trim().eq_ignore_ascii_case("max-age") && val.trim() == "0"
                });

        self.cookies.retain(|existing| !existing.same_slot(&cookie));
        if !expired {
            self.cookies.push(cookie);
        }
    }

    /// The `Cookie` request header value for `url`, or `None` when no
    /// stored cookie applies.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|cookie| cookie.matches(url))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cookies.iter().any(|cookie| cookie.name == name)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    pub fn to_lines(&self) -> Vec<String> {
        self.cookies.iter().map(Cookie::to_line).collect()
    }

    /// Rebuilds a jar from persisted lines. Lines that fail to parse
    /// are skipped; persisted lines always carry a `Domain` attribute.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        // The fallback context only supplies a host for malformed lines
        // with no Domain attribute.
        let fallback = Url::parse("https://www.hsl.fi/").expect("static url");
        let mut jar = CookieJar::new();
        for line in lines {
            if let Some(cookie) = Cookie::parse(line.as_ref(), &fallback) {
                jar.cookies.push(cookie);
            }
        }
        jar
    }
}
