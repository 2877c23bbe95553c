//! Credentials for the local client API, the remote PVP endpoints and the social stream.
//!
//! There are three tiers, each derived from the one before it:
//!
//! 1. [`LocalCredential`]: the Basic header built from the Riot Client lockfile.
//! 2. [`RemoteCredential`]: bearer + entitlement tokens obtained from the local
//!    `entitlements/v1/token` endpoint.
//! 3. [`SignedToken`]: the PAS token fetched with the remote credential, used to log into the
//!    social stream and to discover the account's chat affinity.
//!
//! [`CredentialManager`] caches all three. Renewal is driven by callers (a forced refresh, or a
//! `BAD_CLAIMS` answer observed by [`crate::Session`]), never by a timer, except for the signed
//! token whose `exp` claim is honoured.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use base64::Engine as _;
use base64::alphabet::URL_SAFE;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client as ReqwestClient, Method};
/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;

use crate::environment::{self, Lockfile};
use crate::error::Error;
use crate::session::Config;
use crate::{Result, Timestamp, serde_helpers};

pub(crate) const ENTITLEMENTS_HEADER: &str = "X-Riot-Entitlements-JWT";
pub(crate) const CLIENT_PLATFORM_HEADER: &str = "X-Riot-ClientPlatform";
pub(crate) const CLIENT_VERSION_HEADER: &str = "X-Riot-ClientVersion";

/// Base64 of the JSON platform descriptor the game itself sends.
const CLIENT_PLATFORM: &str = "ew0KCSJwbGF0Zm9ybVR5cGUiOiAiUEMiLA0KCSJwbGF0Zm9ybU9TIjog\
                               IldpbmRvd3MiLA0KCSJwbGF0Zm9ybU9TVmVyc2lvbiI6ICIxMC4wLjE5\
                               MDQyLjEuMjU2LjY0Yml0IiwNCgkicGxhdGZvcm1DaGlwc2V0IjogIlVua25vd24iDQp9";
const GAME_USER_AGENT: &str = "ShooterGame/13 Windows/10.0.19043.1.256.64bit";

const LOCAL_USERNAME: &str = "riot";
const TOKEN_EXCHANGE_PATH: &str = "entitlements/v1/token";

/// Accepts base64url with or without trailing `=` padding, as found in compact tokens.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Basic credential for the local client API, derived from the lockfile.
#[derive(Clone)]
pub struct LocalCredential {
    lockfile: Lockfile,
    authorization: SecretString,
}

impl fmt::Debug for LocalCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCredential")
            .field("lockfile", &self.lockfile)
            .field("authorization", &self.authorization)
            .finish()
    }
}

impl LocalCredential {
    #[must_use]
    pub fn from_lockfile(lockfile: Lockfile) -> Self {
        let basic = STANDARD.encode(format!("{LOCAL_USERNAME}:{}", lockfile.expose_password()));

        Self {
            lockfile,
            authorization: SecretString::from(format!("Basic {basic}")),
        }
    }

    #[must_use]
    pub fn lockfile(&self) -> &Lockfile {
        &self.lockfile
    }

    /// The `Authorization` header value for local calls.
    #[must_use]
    pub fn authorization(&self) -> &SecretString {
        &self.authorization
    }

    /// Absolute URL of `path` on the local API.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.lockfile.base_url(),
            path.trim_start_matches('/')
        )
    }

    pub(crate) fn headers(&self) -> Result<HeaderMap> {
        let mut value = HeaderValue::from_str(self.authorization.expose_secret())?;
        value.set_sensitive(true);

        let mut map = HeaderMap::new();
        map.insert(AUTHORIZATION, value);
        Ok(map)
    }
}

/// Bearer and entitlement tokens for the remote PVP endpoints.
///
/// The upstream expiry of these tokens is opaque to us; they are kept until a caller observes
/// a rejection and asks for a renewal.
#[derive(Clone, Debug)]
pub struct RemoteCredential {
    access_token: SecretString,
    entitlement_token: SecretString,
    client_version: String,
}

impl RemoteCredential {
    #[must_use]
    pub fn new(access_token: String, entitlement_token: String, client_version: String) -> Self {
        Self {
            access_token: SecretString::from(access_token),
            entitlement_token: SecretString::from(entitlement_token),
            client_version,
        }
    }

    #[must_use]
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    #[must_use]
    pub fn entitlement_token(&self) -> &SecretString {
        &self.entitlement_token
    }

    /// Client version in the form the API expects, e.g. `release-08.11-shipping-15-2575361`.
    #[must_use]
    pub fn client_version(&self) -> &str {
        &self.client_version
    }

    /// Headers for an authenticated remote call.
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut bearer =
            HeaderValue::from_str(&format!("Bearer {}", self.access_token.expose_secret()))?;
        bearer.set_sensitive(true);
        let mut entitlement = HeaderValue::from_str(self.entitlement_token.expose_secret())?;
        entitlement.set_sensitive(true);

        let mut map = HeaderMap::new();
        map.insert(AUTHORIZATION, bearer);
        map.insert(ENTITLEMENTS_HEADER, entitlement);
        map.insert(
            CLIENT_PLATFORM_HEADER,
            HeaderValue::from_static(CLIENT_PLATFORM),
        );
        map.insert(
            CLIENT_VERSION_HEADER,
            HeaderValue::from_str(&self.client_version)?,
        );
        map.insert(USER_AGENT, HeaderValue::from_static(GAME_USER_AGENT));

        Ok(map)
    }

    fn same_tokens(&self, other: &RemoteCredential) -> bool {
        self.access_token.expose_secret() == other.access_token.expose_secret()
    }
}

/// A compact `header.payload.signature` token issued by the PAS service.
#[derive(Clone)]
pub struct SignedToken {
    header: Value,
    payload: Value,
    signature: String,
    raw: SecretString,
}

impl fmt::Debug for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedToken")
            .field("header", &self.header)
            .field("payload", &self.payload)
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}

impl SignedToken {
    /// Splits and decodes a compact token. The signature segment is kept verbatim.
    pub fn parse(compact: &str) -> Result<Self> {
        let compact = compact.trim();
        let segments: Vec<&str> = compact.split('.').collect();
        let [header, payload, signature] = segments.as_slice() else {
            return Err(Error::validation(format!(
                "signed token must have 3 segments, found {}",
                segments.len()
            )));
        };

        Ok(Self {
            header: decode_segment(header)?,
            payload: decode_segment(payload)?,
            signature: (*signature).to_owned(),
            raw: SecretString::from(compact.to_owned()),
        })
    }

    #[must_use]
    pub fn header(&self) -> &Value {
        &self.header
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// The token exactly as issued, for presenting to the social stream.
    #[must_use]
    pub fn compact(&self) -> &SecretString {
        &self.raw
    }

    /// Chat affinity of the account, from the `affinity` claim.
    #[must_use]
    pub fn affinity(&self) -> Option<&str> {
        self.payload.get("affinity").and_then(Value::as_str)
    }

    /// Expiry from the `exp` claim.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let exp: Timestamp = self.payload.get("exp").and_then(Value::as_i64)?;
        DateTime::from_timestamp(exp, 0)
    }

    /// A token without an `exp` claim is treated as already expired.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = TimeDelta::from_std(margin).unwrap_or(TimeDelta::zero());
        self.expires_at()
            .is_none_or(|expires_at| expires_at - margin <= now)
    }
}

fn decode_segment(segment: &str) -> Result<Value> {
    let bytes = URL_SAFE_LENIENT.decode(segment)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenExchangeResponse {
    access_token: String,
    #[serde(rename = "token")]
    entitlement_token: String,
}

/// Owns and renews every credential tier.
///
/// All methods take `&self`; concurrent callers are serialized per tier, so a renewal is never
/// performed twice for the same rejected token.
pub struct CredentialManager {
    lockfile_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
    pas_url: Url,
    expiry_margin: Duration,
    /// Client for the local API, which presents a self-signed certificate.
    local_client: ReqwestClient,
    remote_client: ReqwestClient,
    local: Mutex<Option<LocalCredential>>,
    remote: Mutex<Option<RemoteCredential>>,
    signed: Mutex<Option<SignedToken>>,
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialManager")
            .field("lockfile_path", &self.lockfile_path)
            .field("log_path", &self.log_path)
            .field("pas_url", &self.pas_url)
            .finish_non_exhaustive()
    }
}

impl CredentialManager {
    pub fn new(config: &Config) -> Result<Self> {
        let local_client = ReqwestClient::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        let remote_client = ReqwestClient::builder().build()?;

        Ok(Self {
            lockfile_path: config.lockfile_path.clone(),
            log_path: config.log_path.clone(),
            pas_url: Url::parse(&config.pas_url)?,
            expiry_margin: config.expiry_margin,
            local_client,
            remote_client,
            local: Mutex::new(None),
            remote: Mutex::new(None),
            signed: Mutex::new(None),
        })
    }

    pub(crate) fn local_client(&self) -> &ReqwestClient {
        &self.local_client
    }

    pub(crate) fn remote_client(&self) -> &ReqwestClient {
        &self.remote_client
    }

    pub(crate) fn log_path(&self) -> Result<PathBuf> {
        match &self.log_path {
            Some(path) => Ok(path.clone()),
            None => environment::default_log_path(),
        }
    }

    fn lockfile_path(&self) -> Result<PathBuf> {
        match &self.lockfile_path {
            Some(path) => Ok(path.clone()),
            None => environment::default_lockfile_path(),
        }
    }

    /// Returns the local credential, reading the lockfile only if nothing is cached or
    /// `force_reload` is set.
    pub async fn local_credential(&self, force_reload: bool) -> Result<LocalCredential> {
        let mut local = self.local.lock().await;

        if !force_reload && let Some(credential) = local.as_ref() {
            return Ok(credential.clone());
        }

        let path = self.lockfile_path()?;
        let credential = LocalCredential::from_lockfile(Lockfile::read(&path).await?);

        #[cfg(feature = "tracing")]
        tracing::debug!(port = credential.lockfile.port, "read lockfile");

        *local = Some(credential.clone());
        Ok(credential)
    }

    /// Drops the cached local credential; the lockfile is read again on next use.
    pub async fn invalidate_local(&self) {
        *self.local.lock().await = None;
    }

    /// Returns the remote credential, exchanging a new one only if nothing is cached or
    /// `force_renew` is set.
    pub async fn remote_credential(&self, force_renew: bool) -> Result<RemoteCredential> {
        let mut remote = self.remote.lock().await;

        if !force_renew && let Some(credential) = remote.as_ref() {
            return Ok(credential.clone());
        }

        let credential = self.exchange().await?;
        *remote = Some(credential.clone());
        Ok(credential)
    }

    /// Recovers from a `BAD_CLAIMS` answer: drops the local credential and exchanges new tokens.
    ///
    /// `rejected` is the remote credential the failing call observed (if any). When another
    /// caller has already replaced it, the newer credential is returned without a second
    /// exchange.
    pub async fn renew_rejected(
        &self,
        rejected: Option<&RemoteCredential>,
    ) -> Result<RemoteCredential> {
        let mut remote = self.remote.lock().await;

        if let Some(current) = remote.as_ref() {
            let already_renewed = match rejected {
                Some(rejected) => !current.same_tokens(rejected),
                None => false,
            };
            if already_renewed {
                return Ok(current.clone());
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("credentials rejected, renewing");

        self.invalidate_local().await;
        let credential = self.exchange().await?;
        *remote = Some(credential.clone());
        Ok(credential)
    }

    /// Headers for an authenticated remote call.
    pub async fn remote_headers(&self) -> Result<HeaderMap> {
        self.remote_credential(false).await?.headers()
    }

    /// Returns the signed token, fetching a new one if nothing is cached, the cached token is
    /// within the expiry margin, or `force_renew` is set.
    pub async fn signed_token(&self, force_renew: bool) -> Result<SignedToken> {
        let mut signed = self.signed.lock().await;

        if !force_renew
            && let Some(token) = signed.as_ref()
            && !token.is_expired(Utc::now(), self.expiry_margin)
        {
            return Ok(token.clone());
        }

        let headers = self.remote_headers().await?;
        let request = self
            .remote_client
            .request(Method::GET, self.pas_url.clone())
            .build()?;
        let body = crate::request_text(&self.remote_client, request, Some(headers)).await?;
        let token = SignedToken::parse(&body)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(expires_at = ?token.expires_at(), "fetched signed token");

        *signed = Some(token.clone());
        Ok(token)
    }

    /// Trades the local credential for bearer and entitlement tokens.
    ///
    /// This call is never retried: a `BAD_CLAIMS` answer here surfaces as an error.
    async fn exchange(&self) -> Result<RemoteCredential> {
        let local = self.local_credential(false).await?;
        let request = self
            .local_client
            .request(Method::GET, local.url(TOKEN_EXCHANGE_PATH))
            .build()?;
        let value = crate::request(&self.local_client, request, Some(local.headers()?)).await?;
        let response: TokenExchangeResponse = serde_helpers::deserialize_with_warnings(value)
            .map_err(|e| Error::validation(format!("unexpected token exchange response: {e}")))?;

        let log_path = self.log_path()?;
        let log = environment::read_log(&log_path).await?;
        let client_version = environment::client_version(&log).ok_or_else(|| {
            Error::environment(Some(log_path.clone()), "client version marker not found")
        })?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%client_version, "exchanged remote credential");

        Ok(RemoteCredential::new(
            response.access_token,
            response.entitlement_token,
            client_version,
        ))
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;

    use super::*;
    use crate::environment::Lockfile;

    fn compact(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(json!({ "alg": "RS256", "kid": "s1" }).to_string());
        let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{payload}.c2lnbmF0dXJl")
    }

    #[test]
    fn local_credential_builds_basic_header() -> Result<()> {
        let lockfile = Lockfile::parse("Riot Client:42:51234:pw:https").map_err(Error::validation)?;
        let credential = LocalCredential::from_lockfile(lockfile);

        // base64("riot:pw")
        assert_eq!(credential.authorization().expose_secret(), "Basic cmlvdDpwdw==");
        assert_eq!(
            credential.url("/entitlements/v1/token"),
            "https://127.0.0.1:51234/entitlements/v1/token"
        );
        assert!(credential.headers()?[AUTHORIZATION].is_sensitive());

        Ok(())
    }

    #[test]
    fn remote_headers_should_succeed() -> Result<()> {
        let credential = RemoteCredential::new(
            "access".to_owned(),
            "entitlement".to_owned(),
            "release-08.11-shipping-15-2575361".to_owned(),
        );

        let headers = credential.headers()?;

        assert_eq!(headers[AUTHORIZATION], "Bearer access");
        assert_eq!(headers[ENTITLEMENTS_HEADER], "entitlement");
        assert_eq!(
            headers[CLIENT_VERSION_HEADER],
            "release-08.11-shipping-15-2575361"
        );
        assert_eq!(headers[CLIENT_PLATFORM_HEADER], CLIENT_PLATFORM);

        Ok(())
    }

    #[test]
    fn signed_token_parse_should_succeed() -> Result<()> {
        let raw = compact(&json!({ "affinity": "na", "exp": 4_102_444_800_i64 }));

        let token = SignedToken::parse(&raw)?;

        assert_eq!(token.header()["alg"], "RS256");
        assert_eq!(token.affinity(), Some("na"));
        assert_eq!(token.signature(), "c2lnbmF0dXJl");
        assert_eq!(token.compact().expose_secret(), raw);
        assert!(!token.is_expired(Utc::now(), Duration::from_secs(60)));

        Ok(())
    }

    #[test]
    fn signed_token_accepts_padded_segments() -> Result<()> {
        let header = base64::engine::general_purpose::URL_SAFE.encode(r#"{"alg":"RS256"}"#);
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":1}"#);

        let token = SignedToken::parse(&format!("{header}.{payload}.sig"))?;

        assert_eq!(token.payload()["exp"], 1);
        assert!(token.is_expired(Utc::now(), Duration::ZERO));

        Ok(())
    }

    #[test]
    fn signed_token_with_wrong_segment_count_should_fail() {
        let err = SignedToken::parse("only.two").unwrap_err();

        assert_eq!(err.kind(), crate::error::Kind::Validation);
        assert!(err.to_string().contains("found 2"));
    }

    #[test]
    fn signed_token_within_margin_is_expired() -> Result<()> {
        let exp = Utc::now().timestamp() + 30;
        let token = SignedToken::parse(&compact(&json!({ "exp": exp })))?;

        assert!(!token.is_expired(Utc::now(), Duration::ZERO));
        assert!(token.is_expired(Utc::now(), Duration::from_secs(60)));

        Ok(())
    }

    #[test]
    fn debug_does_not_expose_secrets() {
        let credential = RemoteCredential::new(
            "my_super_secret_access".to_owned(),
            "my_super_secret_entitlement".to_owned(),
            "release".to_owned(),
        );

        let debug_output = format!("{credential:?}");

        assert!(
            !debug_output.contains("my_super_secret_access"),
            "Debug output should NOT contain the access token. Got: {debug_output}"
        );
        assert!(
            !debug_output.contains("my_super_secret_entitlement"),
            "Debug output should NOT contain the entitlement token. Got: {debug_output}"
        );
    }
}
