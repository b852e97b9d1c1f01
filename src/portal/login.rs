use serde_json::{json, Map, Value};

use super::http::{HttpReply, HttpTransport};
use super::{PortalClient, PortalError, FOUND, HISTORY_PAGE, OK};

const LOGIN_URL: &str = "https://www.hsl.fi/user/auth/login?language=en";
const AUTH_ORIGIN: &str = "https://id.hsl.fi";
const AUTH_REDIRECT_MARKER: &str = "https://www.hsl.fi/user/auth/hslid?";

// Bootstrap parameters the identity UI page should provide. Scanning
// the page is best effort; these fallbacks track the deployed portal
// and break silently when it upgrades.
const FALLBACK_APP_ID: &str = "ROOT-2521314";
const FALLBACK_VERSION: &str = "8.27.3";

const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

const USERNAME_FIELD_STYLE: &str = "login-username-field";
const PASSWORD_FIELD_STYLE: &str = "password-hidden-field";
const LOGIN_BUTTON_STYLE: &str = "login-button";
const FAILURE_STYLE: &str = "failure";

/// Field ids the login UI assigns dynamically, discovered by scanning
/// the bootstrap state map for marker styles. Missing markers leave the
/// id empty; the flow then fails at the portal rather than locally,
/// matching what a browser would do.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FieldIds {
    pub username_field: String,
    pub password_field: String,
    pub login_button: String,
}

/// Per-attempt RPC session: CSRF token, sync counters and endpoint.
#[derive(Debug)]
struct UidlSession {
    auth_ui_url: String,
    uidl_url: String,
    csrf_token: String,
    sync_id: i64,
    client_id: i64,
    version: String,
    fields: FieldIds,
}

/// Drives the whole identity-UI login sequence. On success the portal
/// identity cookie is in the client's jar.
pub async fn sign_in<T: HttpTransport>(
    client: &mut PortalClient<T>,
    login: &str,
    password: &str,
) -> Result<(), PortalError> {
    // The entry point bounces us to the identity service...
    let reply = client
        .get(
            LOGIN_URL,
            &[
                ("Referer", HISTORY_PAGE),
                ("Sec-Fetch-Dest", "document"),
                ("Sec-Fetch-Mode", "navigate"),
                ("Sec-Fetch-Site", "same-origin"),
                ("Sec-Fetch-User", "?1"),
                ("Priority", "u=0, i"),
                ("TE", "trailers"),
                ("Upgrade-Insecure-Requests", "1"),
            ],
        )
        .await?;
    let auth_url = expect_redirect(&reply)?;

    // ...which bounces once more to the Vaadin UI page.
    let reply = client
        .get(
            &auth_url,
            &[
                ("Referer", "https://www.hsl.fi/"),
                ("Sec-Fetch-Dest", "document"),
                ("Sec-Fetch-Mode", "navigate"),
                ("Sec-Fetch-Site", "same-site"),
                ("Sec-Fetch-User", "?1"),
                ("Priority", "u=0, i"),
                ("Upgrade-Insecure-Requests", "1"),
            ],
        )
        .await?;
    let auth_ui_url = expect_redirect(&reply)?;

    let reply = client
        .get(
            &auth_ui_url,
            &[
                ("Referer", "https://www.hsl.fi/"),
                ("Sec-Fetch-Dest", "document"),
                ("Sec-Fetch-Mode", "navigate"),
                ("Sec-Fetch-Site", "same-site"),
                ("Sec-Fetch-User", "?1"),
                ("Priority", "u=0, i"),
                ("TE", "trailers"),
                ("Upgrade-Insecure-Requests", "1"),
            ],
        )
        .await?;
    if reply.status != OK {
        return Err(PortalError::Http(reply.status));
    }
    let page = reply.text().into_owned();
    let app_id = scan_quoted(&page, "v-appId").unwrap_or_else(|| FALLBACK_APP_ID.to_owned());
    let version =
        scan_quoted(&page, "vaadinVersion").unwrap_or_else(|| FALLBACK_VERSION.to_owned());

    // Bootstrap the UI session; the reply carries the CSRF token, the
    // sync counters and the state map with the dynamic field ids.
    let bootstrap_url = format!(
        "{auth_ui_url}&v-{}",
        chrono::Utc::now().timestamp_millis()
    );
    let body = format!(
        "v-browserDetails=1&v-sh=1440&v-sw=2560&v-cw=1702&v-ch=679&v-vw=1702&v-vh=0\
         &theme=openid&v-appId={app_id}&v-loc={}&v-wn={app_id}-1",
        percent_encode(&bootstrap_url)
    );
    let reply = client
        .post(
            &bootstrap_url,
            &[
                ("Origin", AUTH_ORIGIN),
                ("Referer", auth_ui_url.as_str()),
                ("Sec-Fetch-Dest", "empty"),
                ("Sec-Fetch-Mode", "cors"),
                ("Sec-Fetch-Site", "same-origin"),
                ("TE", "trailers"),
            ],
            FORM_CONTENT_TYPE,
            body,
        )
        .await?;
    if reply.status != OK {
        return Err(PortalError::Http(reply.status));
    }
    let mut session = parse_bootstrap(&reply.text(), &auth_ui_url, version);
    log::debug!(
        "csrf {:?} username field {:?} password field {:?} login button {:?}",
        session.csrf_token,
        session.fields.username_field,
        session.fields.password_field,
        session.fields.login_button
    );

    rpc_call(
        client,
        &mut session,
        json!(["0", "com.vaadin.shared.ui.DelayedCallbackRpc", "received", [0]]),
        true,
    )
    .await?;

    rpc_call(
        client,
        &mut session,
        json!(["0", "com.vaadin.shared.ui.ui.UIServerRpc", "resize", [1700, 680, 1700, 680]]),
        false,
    )
    .await?;

    let password_rpc = json!([
        session.fields.password_field,
        "com.vaadin.shared.ui.textfield.AbstractTextFieldServerRpc",
        "setText",
        [password, password.chars().count()]
    ]);
    rpc_call(client, &mut session, password_rpc, false).await?;

    let username_rpc = json!([
        session.fields.username_field,
        "com.vaadin.shared.ui.textfield.AbstractTextFieldServerRpc",
        "setText",
        [login, login.chars().count()]
    ]);
    rpc_call(client, &mut session, username_rpc, false).await?;

    let click_rpc = json!([
        session.fields.login_button,
        "com.vaadin.shared.ui.button.ButtonServerRpc",
        "click",
        [{
            "altKey": false,
            "button": "LEFT",
            "clientX": 832,
            "clientY": 480,
            "ctrlKey": false,
            "metaKey": false,
            "relativeX": 94,
            "relativeY": 45,
            "shiftKey": false,
            "type": 1
        }]
    ]);
    let reply_json = rpc_call(client, &mut session, click_rpc, false).await?;

    let changes = reply_json
        .get("changes")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if let Some(src) = find_open_redirect(&changes) {
        return follow_auth_redirect(client, &src).await;
    }

    // No redirect; the state map should explain why.
    let empty = Map::new();
    let state = reply_json
        .get("state")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    Err(PortalError::Credentials(
        failure_message(state).unwrap_or_default(),
    ))
}

/// Completes the flow once the UI ordered a client-side redirect: the
/// redirect page embeds the URL that finally hands out the identity
/// cookie.
async fn follow_auth_redirect<T: HttpTransport>(
    client: &mut PortalClient<T>,
    src: &str,
) -> Result<(), PortalError> {
    let document_headers = [
        ("Sec-Fetch-Dest", "document"),
        ("Sec-Fetch-Mode", "navigate"),
        ("Sec-Fetch-Site", "same-origin"),
        ("Sec-Fetch-User", "?1"),
        ("Priority", "u=0, i"),
        ("TE", "trailers"),
        ("Upgrade-Insecure-Requests", "1"),
    ];

    let reply = client.get(src, &document_headers).await?;
    if reply.status != OK {
        return Err(PortalError::Http(reply.status));
    }
    let html = reply.text().into_owned();
    let Some(url) = find_marked_url(&html, AUTH_REDIRECT_MARKER) else {
        // A 200 page without the expected marker; the protocol shape
        // has changed under us.
        return Err(PortalError::Http(OK));
    };

    let reply = client.get(url, &document_headers).await?;
    if reply.status == OK || reply.status == FOUND {
        log::info!("signed in, identity cookie received");
        Ok(())
    } else {
        Err(PortalError::Http(reply.status))
    }
}

fn expect_redirect(reply: &HttpReply) -> Result<String, PortalError> {
    if reply.status == FOUND {
        if let Some(location) = reply.header("Location") {
            return Ok(location.to_owned());
        }
    }
    Err(PortalError::Http(reply.status))
}

/// One UIDL round trip: posts the RPC with the current CSRF token and
/// sync counters, then refreshes the counters from the reply (falling
/// back to previous + 1 when the reply omits them).
async fn rpc_call<T: HttpTransport>(
    client: &mut PortalClient<T>,
    session: &mut UidlSession,
    rpc: Value,
    with_version: bool,
) -> Result<Value, PortalError> {
    let mut payload = json!({
        "csrfToken": session.csrf_token,
        "rpc": [rpc],
        "syncId": session.sync_id,
        "clientId": session.client_id,
    });
    if with_version {
        payload["wsver"] = json!(session.version);
    }

    let reply = client
        .post(
            &session.uidl_url,
            &[
                ("Accept", "*/*"),
                ("Origin", AUTH_ORIGIN),
                ("Referer", session.auth_ui_url.as_str()),
                ("Sec-Fetch-Dest", "empty"),
                ("Sec-Fetch-Mode", "cors"),
                ("Sec-Fetch-Site", "same-origin"),
                ("TE", "trailers"),
            ],
            JSON_CONTENT_TYPE,
            payload.to_string(),
        )
        .await?;
    if reply.status != OK {
        return Err(PortalError::Http(reply.status));
    }

    let reply_json: Value =
        serde_json::from_str(strip_rpc_envelope(&reply.text())).unwrap_or_default();
    session.sync_id = reply_json
        .get("syncId")
        .and_then(Value::as_i64)
        .unwrap_or(session.sync_id + 1);
    session.client_id = reply_json
        .get("clientId")
        .and_then(Value::as_i64)
        .unwrap_or(session.client_id + 1);
    Ok(reply_json)
}

fn parse_bootstrap(body: &str, auth_ui_url: &str, version: String) -> UidlSession {
    let outer: Value = serde_json::from_str(body).unwrap_or_default();
    let ui_id = outer.get("v-uiId").and_then(Value::as_i64).unwrap_or(0);

    // The interesting part is a JSON document embedded as a string.
    let uidl: Value = outer
        .get("uidl")
        .and_then(Value::as_str)
        .and_then(|embedded| serde_json::from_str(embedded).ok())
        .unwrap_or_default();

    let empty = Map::new();
    let state = uidl.get("state").and_then(Value::as_object).unwrap_or(&empty);

    UidlSession {
        auth_ui_url: auth_ui_url.to_owned(),
        uidl_url: format!("{AUTH_ORIGIN}/UIDL/?v-uiId={ui_id}"),
        csrf_token: uidl
            .get("Vaadin-Security-Key")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        sync_id: uidl.get("syncId").and_then(Value::as_i64).unwrap_or(0),
        client_id: uidl.get("clientId").and_then(Value::as_i64).unwrap_or(0),
        version,
        fields: extract_field_ids(state),
    }
}

/// Scans the UI state map for the entries whose `styles` carry the
/// known marker classes and records their keys as field ids.
pub fn extract_field_ids(state: &Map<String, Value>) -> FieldIds {
    let mut fields = FieldIds::default();
    for (key, entry) in state {
        let Some(styles) = entry.get("styles").and_then(Value::as_array) else {
            continue;
        };
        for style in styles.iter().filter_map(Value::as_str) {
            match style {
                USERNAME_FIELD_STYLE => fields.username_field = key.clone(),
                PASSWORD_FIELD_STYLE => fields.password_field = key.clone(),
                LOGIN_BUTTON_STYLE => fields.login_button = key.clone(),
                _ => {}
            }
        }
    }
    fields
}

/// UIDL replies come wrapped in an XSSI guard: `for(;;);[{...}]`.
pub(crate) fn strip_rpc_envelope(body: &str) -> &str {
    body.strip_prefix("for(;;);[")
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(body)
}

/// Looks through a `changes` array for the nested
/// `["change",...,["0",...,["open",{"src":...}]]]` structure ordering a
/// client-side redirect.
pub(crate) fn find_open_redirect(changes: &[Value]) -> Option<String> {
    changes.iter().find_map(|change| {
        let outer = change.as_array()?;
        if outer.len() <= 2 || outer.first()?.as_str()? != "change" {
            return None;
        }
        let inner = outer.get(2)?.as_array()?;
        if inner.len() <= 2 || inner.first()?.as_str()? != "0" {
            return None;
        }
        let open = inner.get(2)?.as_array()?;
        if open.len() <= 1 || open.first()?.as_str()? != "open" {
            return None;
        }
        open.get(1)?.get("src")?.as_str().map(str::to_owned)
    })
}

/// The user-facing message of the last state entry styled "failure".
/// The portal occasionally styles several entries; the last one wins.
pub(crate) fn failure_message(state: &Map<String, Value>) -> Option<String> {
    let mut message = None;
    for entry in state.values() {
        let Some(styles) = entry.get("styles").and_then(Value::as_array) else {
            continue;
        };
        if styles.iter().any(|style| style.as_str() == Some(FAILURE_STYLE)) {
            message = Some(
                entry
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            );
        }
    }
    message
}

/// Finds a URL in an HTML page that starts with `marker` and runs until
/// the character immediately preceding the marker (its quote) repeats.
pub(crate) fn find_marked_url<'a>(html: &'a str, marker: &str) -> Option<&'a str> {
    let start = html.find(marker)?;
    if start == 0 {
        return None;
    }
    let delimiter = html[..start].chars().next_back()?;
    let rest = &html[start..];
    let end = rest.find(delimiter)?;
    Some(&rest[..end])
}

/// Extracts `"<key>":"<value>"` from a page, tolerating whitespace
/// around the colon.
fn scan_quoted(page: &str, key: &str) -> Option<String> {
    let needle = format!("\"{key}\"");
    let after = &page[page.find(&needle)? + needle.len()..];
    let after = after.trim_start();
    let after = after.strip_prefix(':')?.trim_start();
    let after = after.strip_prefix('"')?;
    let end = after.find('"')?;
    Some(after[..end].to_owned())
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3 / 2);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
