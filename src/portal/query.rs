use serde::Deserialize;
use serde_json::{Map, Value};

use super::http::HttpTransport;
use super::{json_api_headers, PortalClient, PortalError, OK};

pub const USER_INFO_URL: &str =
    "https://www.hsl.fi/api/rest/v1/menu?language=en&path=/omat-tiedot/kaupunkipyorat/matkahistoria";
pub const SERVICE_URL: &str = "https://www.hsl.fi/api/rest/v1/citybikes/cbf/maas-user";
pub const HISTORY_URL: &str = "https://www.hsl.fi/api/rest/v1/citybikes/cbf/history?language=en";

/// GET a JSON object from an API endpoint. Any non-200 status is an
/// error; a body that is not a JSON object yields an empty map.
pub async fn fetch_object<T: HttpTransport>(
    client: &mut PortalClient<T>,
    url: &str,
) -> Result<Map<String, Value>, PortalError> {
    let reply = client.get(url, &json_api_headers()).await?;
    if reply.status != OK {
        log::debug!("{url}: {}", reply.text());
        return Err(PortalError::Http(reply.status));
    }
    let object = serde_json::from_slice::<Value>(&reply.body)
        .ok()
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();
    Ok(object)
}

/// Same as [fetch_object] but for endpoints replying with a JSON array.
pub async fn fetch_array<T: HttpTransport>(
    client: &mut PortalClient<T>,
    url: &str,
) -> Result<Vec<Value>, PortalError> {
    let reply = client.get(url, &json_api_headers()).await?;
    if reply.status != OK {
        log::debug!("{url}: {}", reply.text());
        return Err(PortalError::Http(reply.status));
    }
    let array = serde_json::from_slice::<Value>(&reply.body)
        .ok()
        .and_then(|value| match value {
            Value::Array(items) => Some(items),
            _ => None,
        })
        .unwrap_or_default();
    Ok(array)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserInfo {
    pub authenticated: bool,
    pub user: User,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
    pub name: PersonName,
    pub legal_information: LegalName,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersonName {
    pub given_name: String,
    pub family_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LegalName {
    pub first_names: String,
    pub last_name: String,
}

impl UserInfo {
    /// First names and last name, falling back to the legal information
    /// when the user-friendly name is missing entirely.
    pub fn names(&self) -> (String, String) {
        let name = &self.user.name;
        if name.given_name.is_empty() && name.family_name.is_empty() {
            let legal = &self.user.legal_information;
            (legal.first_names.clone(), legal.last_name.clone())
        } else {
            (name.given_name.clone(), name.family_name.clone())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServiceInfo {
    pub ident_type: String,
    pub ident_data: String,
}

/// Authenticated-user check; also the profile source.
pub async fn user_info<T: HttpTransport>(
    client: &mut PortalClient<T>,
) -> Result<UserInfo, PortalError> {
    let object = fetch_object(client, USER_INFO_URL).await?;
    Ok(serde_json::from_value(Value::Object(object)).unwrap_or_default())
}

/// City-bike service record carrying the identity-card fields.
pub async fn service_info<T: HttpTransport>(
    client: &mut PortalClient<T>,
) -> Result<ServiceInfo, PortalError> {
    let object = fetch_object(client, SERVICE_URL).await?;
    Ok(serde_json::from_value(Value::Object(object)).unwrap_or_default())
}

/// The raw ride-history array, most recent ride first.
pub async fn ride_history<T: HttpTransport>(
    client: &mut PortalClient<T>,
) -> Result<Vec<Value>, PortalError> {
    fetch_array(client, HISTORY_URL).await
}

#[cfg(test)]
mod tests {
    use super::super::http::testing::{ok, status, ScriptedTransport};
    use super::*;

    #[tokio::test]
    async fn object_query_parses_reply() {
        let transport = ScriptedTransport::new().reply(ok(r#"{"authenticated":true}"#));
        let mut client = PortalClient::new(transport);

        let object = fetch_object(&mut client, USER_INFO_URL).await.unwrap();
        assert_eq!(object.get("authenticated"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn object_query_reports_http_error() {
        let transport = ScriptedTransport::new().reply(status(403));
        let mut client = PortalClient::new(transport);

        let err = fetch_object(&mut client, USER_INFO_URL).await.unwrap_err();
        assert_eq!(err, PortalError::Http(403));
    }

    #[tokio::test]
    async fn object_query_reports_network_error() {
        let transport = ScriptedTransport::new().fail();
        let mut client = PortalClient::new(transport);

        let err = fetch_object(&mut client, USER_INFO_URL).await.unwrap_err();
        assert_eq!(err, PortalError::Network);
    }

    #[tokio::test]
    async fn malformed_object_body_is_tolerated() {
        let transport = ScriptedTransport::new().reply(ok("not json"));
        let mut client = PortalClient::new(transport);

        let object = fetch_object(&mut client, USER_INFO_URL).await.unwrap();
        assert!(object.is_empty());
    }

    #[tokio::test]
    async fn history_query_returns_array() {
        let transport =
            ScriptedTransport::new().reply(ok(r#"[{"bike":"A1"},{"bike":"B2"}]"#));
        let mut client = PortalClient::new(transport);

        let history = ride_history(&mut client).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["bike"], "A1");
    }

    #[test]
    fn names_fall_back_to_legal_information() {
        let with_name: UserInfo = serde_json::from_str(
            r#"{"authenticated":true,"user":{"name":{"givenName":"Ann","familyName":"Virtanen"}}}"#,
        )
        .unwrap();
        assert_eq!(
            with_name.names(),
            ("Ann".to_owned(), "Virtanen".to_owned())
        );

        let legal_only: UserInfo = serde_json::from_str(
            r#"{"authenticated":true,"user":{"legalInformation":{"firstNames":"Ann Mari","lastName":"Virtanen"}}}"#,
        )
        .unwrap();
        assert_eq!(
            legal_only.names(),
            ("Ann Mari".to_owned(), "Virtanen".to_owned())
        );
    }
}
