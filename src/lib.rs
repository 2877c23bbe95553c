#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod auth;
pub mod cache;
pub mod environment;
pub mod error;
pub(crate) mod serde_helpers;
pub mod session;
#[cfg(feature = "social")]
pub mod social;
#[cfg(feature = "social")]
pub mod xmpp;

use std::fmt::Write as _;

use reqwest::header::HeaderMap;
use reqwest::{Method, Request};
use serde::Serialize;
use serde_json::Value;

use crate::error::{BadClaims, Error};

pub use session::{Config, FetchOptions, Session};

pub type Result<T> = std::result::Result<T, Error>;

/// Timestamp in seconds since [`std::time::UNIX_EPOCH`]
pub(crate) type Timestamp = i64;

/// `errorCode` reported by the Riot APIs when the presented tokens are no longer accepted.
pub const BAD_CLAIMS: &str = "BAD_CLAIMS";

/// Trait for converting request types to URL query parameters.
///
/// This trait is automatically implemented for all types that implement [`Serialize`].
/// It uses [`serde_html_form`] to serialize the struct fields into a query string.
pub trait ToQueryParams: Serialize {
    /// Converts the request to a URL query string.
    ///
    /// Returns an empty string if no parameters are set, otherwise returns
    /// a string starting with `?` followed by URL-encoded key-value pairs.
    fn query_params(&self) -> String {
        let params = serde_html_form::to_string(self)
            .inspect_err(|e| {
                #[cfg(feature = "tracing")]
                tracing::error!("Unable to convert to URL-encoded string {e:?}");
                #[cfg(not(feature = "tracing"))]
                let _: &serde_html_form::ser::Error = e;
            })
            .unwrap_or_default();

        let mut query = String::new();
        if !params.is_empty() {
            let _ = write!(query, "?{params}");
        }
        query
    }
}

impl<T: Serialize> ToQueryParams for T {}

/// Returns `true` if a JSON body carries `"errorCode": "BAD_CLAIMS"`.
pub(crate) fn is_bad_claims(value: &Value) -> bool {
    value.get("errorCode").and_then(Value::as_str) == Some(BAD_CLAIMS)
}

/// Executes `request` and returns the body as text.
///
/// Non-successful responses become [`error::Status`] errors, except a `BAD_CLAIMS` body which
/// becomes [`BadClaims`] so that callers can renew credentials and retry.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip(client, request, headers),
        fields(
            method = %request.method(),
            path = request.url().path(),
            status_code
        )
    )
)]
pub(crate) async fn request_text(
    client: &reqwest::Client,
    mut request: Request,
    headers: Option<HeaderMap>,
) -> Result<String> {
    let method = request.method().clone();
    let path = request.url().path().to_owned();

    if let Some(h) = headers {
        request.headers_mut().extend(h);
    }

    let response = client.execute(request).await?;
    let status_code = response.status();

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("status_code", status_code.as_u16());

    let body = response.text().await?;

    if !status_code.is_success() {
        if serde_json::from_str::<Value>(&body).is_ok_and(|value| is_bad_claims(&value)) {
            return Err(BadClaims { method, path }.into());
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(
            status = %status_code,
            method = %method,
            path = %path,
            message = %body,
            "API request failed"
        );

        return Err(Error::status(status_code, method, path, body));
    }

    Ok(body)
}

/// Executes `request` and parses the body as JSON.
pub(crate) async fn request(
    client: &reqwest::Client,
    request: Request,
    headers: Option<HeaderMap>,
) -> Result<Value> {
    let method = request.method().clone();
    let path = request.url().path().to_owned();

    let body = request_text(client, request, headers).await?;
    parse_body(&body, method, path)
}

/// Parses a successful response body. An empty body becomes [`Value::Null`].
pub(crate) fn parse_body(body: &str, method: Method, path: String) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    let value: Value = serde_json::from_str(body)?;

    if is_bad_claims(&value) {
        return Err(BadClaims { method, path }.into());
    }

    Ok(value)
}

/// Builds the cache key for a call: method, target and a stable rendering of the arguments.
pub(crate) fn cache_key(method: &Method, target: &str, query: &str, body: Option<&Value>) -> String {
    let body = body.map(Value::to_string).unwrap_or_default();
    format!("{method}_{target}-{query}-{body}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Serialize)]
    struct PlayerConfigQuery<'a> {
        os: &'a str,
        region: &'a str,
    }

    #[test]
    fn query_params_should_succeed() {
        let query = PlayerConfigQuery {
            os: "windows",
            region: "na",
        };

        assert_eq!(query.query_params(), "?os=windows&region=na");
    }

    #[test]
    fn bad_claims_detection() {
        assert!(is_bad_claims(&json!({ "errorCode": "BAD_CLAIMS" })));
        assert!(!is_bad_claims(&json!({ "errorCode": "RESOURCE_NOT_FOUND" })));
        assert!(!is_bad_claims(&json!({ "accessToken": "x" })));
    }

    #[test]
    fn parse_body_should_succeed() -> Result<()> {
        assert_eq!(parse_body("", Method::GET, "/".to_owned())?, Value::Null);
        assert_eq!(
            parse_body(r#"{"a":1}"#, Method::GET, "/".to_owned())?,
            json!({ "a": 1 })
        );

        let err = parse_body(
            r#"{"httpStatus":400,"errorCode":"BAD_CLAIMS"}"#,
            Method::GET,
            "/help".to_owned(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), error::Kind::Authentication);
        assert!(err.downcast_ref::<BadClaims>().is_some());

        Ok(())
    }

    #[test]
    fn cache_key_folds_arguments() {
        let a = cache_key(&Method::GET, "local/help", "?a=1", None);
        let b = cache_key(&Method::GET, "local/help", "?a=2", None);
        let c = cache_key(&Method::GET, "local/help", "?a=1", Some(&json!({ "x": 1 })));

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, "GET_local/help-?a=1-");
    }
}
