use super::http::HttpTransport;
use super::{PortalClient, PortalError, FOUND};

const LOGOUT_URL: &str = "https://www.hsl.fi/user/auth/logout";

/// At most this many redirects are followed; anything past that is
/// treated as the final reply so a redirect loop cannot hang us.
const MAX_REDIRECTS: u32 = 2;

fn logout_headers() -> [(&'static str, &'static str); 6] {
    [
        ("Referer", "https://www.hsl.fi/"),
        ("Sec-Fetch-Dest", "iframe"),
        ("Sec-Fetch-Mode", "navigate"),
        ("Sec-Fetch-Site", "same-site"),
        ("Priority", "u=4"),
        ("Upgrade-Insecure-Requests", "1"),
    ]
}

/// Drives the portal logout sequence and returns the final HTTP status.
/// Only a transport failure is an error; the caller decides how much a
/// non-200 final status matters.
pub async fn log_out<T: HttpTransport>(
    client: &mut PortalClient<T>,
) -> Result<u16, PortalError> {
    let mut reply = client.get(LOGOUT_URL, &logout_headers()).await?;
    let mut redirects = 0;
    while reply.status == FOUND && redirects < MAX_REDIRECTS {
        let Some(location) = reply.header("Location").map(str::to_owned) else {
            break;
        };
        redirects += 1;
        log::debug!("following logout redirect {redirects}");
        reply = client.get(&location, &logout_headers()).await?;
    }
    Ok(reply.status)
}
