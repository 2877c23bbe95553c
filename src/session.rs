//! Session facade over the local client API and the remote PVP endpoints.
//!
//! # Example
//!
//! ```no_run
//! use valorant_client_sdk::{FetchOptions, Session};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::new(Default::default())?;
//!
//! let help = session.fetch_local("help", &FetchOptions::default()).await?;
//! let season = session.current_season(true, true).await?;
//! println!("{season:?}");
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::auth::CredentialManager;
use crate::cache::{DEFAULT_LIFETIME, ExpiringCache, Lifetime};
use crate::environment::{self, Region};
use crate::error::{BadClaims, Error};
use crate::{Result, cache_key, serde_helpers};

const DEFAULT_PAS_URL: &str = "https://riot-geo.pas.si.riotgames.com/pas/v1/service/chat";
const DEFAULT_CLIENT_CONFIG_URL: &str = "https://clientconfig.rpg.riotgames.com/api/v1/config/player";
const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Configuration for [`Session`]
#[non_exhaustive]
#[derive(Clone, Debug, Builder)]
pub struct Config {
    /// Path of the Riot Client lockfile. Defaults to
    /// `%LOCALAPPDATA%/Riot Games/Riot Client/Config/lockfile`.
    #[builder(into)]
    pub(crate) lockfile_path: Option<PathBuf>,
    /// Path of the game log. Defaults to `%LOCALAPPDATA%/VALORANT/Saved/Logs/ShooterGame.log`.
    #[builder(into)]
    pub(crate) log_path: Option<PathBuf>,
    /// Endpoint issuing the signed token used by the social stream.
    #[builder(into, default = DEFAULT_PAS_URL.to_owned())]
    pub(crate) pas_url: String,
    /// Endpoint of the player client configuration, which carries the chat server details.
    #[builder(into, default = DEFAULT_CLIENT_CONFIG_URL.to_owned())]
    pub(crate) client_config_url: String,
    /// Override for the content service URL. Defaults to the shard's shared endpoint.
    /// This is primarily useful for testing.
    #[builder(into)]
    pub(crate) content_url: Option<String>,
    /// How long responses stay cached when a call does not say otherwise. The default is three
    /// hours.
    #[builder(default = DEFAULT_LIFETIME)]
    pub(crate) cache_lifetime: Duration,
    /// A signed token is renewed once it is this close to its expiry.
    #[builder(default = DEFAULT_EXPIRY_MARGIN)]
    pub(crate) expiry_margin: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

impl Config {
    #[must_use]
    pub fn client_config_url(&self) -> &str {
        &self.client_config_url
    }
}

/// Per-call options for [`Session::fetch_local`] and [`Session::fetch`].
#[non_exhaustive]
#[derive(Clone, Debug, Builder)]
pub struct FetchOptions {
    #[builder(default = Method::GET)]
    pub method: Method,
    /// Whether the response may be served from and stored into the cache.
    #[builder(default = true)]
    pub use_cache: bool,
    /// Cache lifetime for this response. `None` uses the session's default.
    pub lifetime: Option<Lifetime>,
    /// Query string appended verbatim to the target, including the leading `?`.
    /// See [`crate::ToQueryParams`].
    #[builder(into)]
    pub query: Option<String>,
    /// JSON request body.
    pub body: Option<Value>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions::builder().build()
    }
}

impl FetchOptions {
    fn query(&self) -> &str {
        self.query.as_deref().unwrap_or_default()
    }

    fn is_cacheable(&self) -> bool {
        self.use_cache && self.method != Method::POST
    }

    fn apply_body(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.body {
            Some(body) => builder.json(body),
            None => builder,
        }
    }
}

/// Entry point for every call against the local client API and the remote endpoints.
///
/// Cloning is cheap; clones share credentials, cache and memoized region.
#[derive(Clone, Debug)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    config: Config,
    credentials: Arc<CredentialManager>,
    cache: ExpiringCache<Value>,
    region: OnceCell<Region>,
}

impl Session {
    pub fn new(config: Config) -> Result<Self> {
        let credentials = Arc::new(CredentialManager::new(&config)?);
        Ok(Self::with_credentials(config, credentials))
    }

    /// Builds a session around an existing [`CredentialManager`], so that several sessions
    /// share one set of credentials.
    #[must_use]
    pub fn with_credentials(config: Config, credentials: Arc<CredentialManager>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                cache: ExpiringCache::new(config.cache_lifetime),
                config,
                credentials,
                region: OnceCell::new(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.inner.credentials
    }

    #[must_use]
    pub fn cache(&self) -> &ExpiringCache<Value> {
        &self.inner.cache
    }

    /// Calls `path` on the local client API and returns the JSON response.
    ///
    /// A `BAD_CLAIMS` answer renews the credentials and retries once; a second `BAD_CLAIMS` is an
    /// [`crate::error::Kind::Authentication`] error.
    pub async fn fetch_local(&self, path: &str, options: &FetchOptions) -> Result<Value> {
        let path = path.trim_start_matches('/');
        let key = cache_key(
            &options.method,
            &format!("local/{path}"),
            options.query(),
            options.body.as_ref(),
        );

        if let Some(value) = self.cached(&key, options) {
            return Ok(value);
        }

        let credentials = &self.inner.credentials;
        let mut renewed = false;

        loop {
            let local = credentials.local_credential(false).await?;
            let url = format!("{}{}", local.url(path), options.query());
            let builder = credentials.local_client().request(options.method.clone(), url);
            let request = options.apply_body(builder).build()?;

            match crate::request(credentials.local_client(), request, Some(local.headers()?)).await {
                Ok(value) => {
                    self.store(key, &value, options);
                    return Ok(value);
                }
                Err(e) if is_bad_claims(&e) => {
                    if renewed {
                        return Err(Error::authentication(
                            format!("local/{path}"),
                            "BAD_CLAIMS after credential renewal",
                        ));
                    }

                    #[cfg(feature = "tracing")]
                    tracing::warn!(path, "local call returned BAD_CLAIMS, renewing credentials");

                    credentials.renew_rejected(None).await?;
                    renewed = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Calls a remote endpoint with the current bearer credentials.
    ///
    /// `POST` calls are never cached and return `None` without parsing the response body.
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<Option<Value>> {
        let key = cache_key(
            &options.method,
            url,
            options.query(),
            options.body.as_ref(),
        );

        if let Some(value) = self.cached(&key, options) {
            return Ok(Some(value));
        }

        let credentials = &self.inner.credentials;
        let mut renewed = false;

        loop {
            let remote = credentials.remote_credential(false).await?;
            let builder = credentials
                .remote_client()
                .request(options.method.clone(), format!("{url}{}", options.query()));
            let request = options.apply_body(builder).build()?;

            let result = if options.method == Method::POST {
                crate::request_text(credentials.remote_client(), request, Some(remote.headers()?))
                    .await
                    .map(|_| None)
            } else {
                crate::request(credentials.remote_client(), request, Some(remote.headers()?))
                    .await
                    .map(Some)
            };

            match result {
                Ok(Some(value)) => {
                    self.store(key, &value, options);
                    return Ok(Some(value));
                }
                Ok(None) => return Ok(None),
                Err(e) if is_bad_claims(&e) => {
                    if renewed {
                        return Err(Error::authentication(
                            url,
                            "BAD_CLAIMS after credential renewal",
                        ));
                    }

                    #[cfg(feature = "tracing")]
                    tracing::warn!(url, "remote call returned BAD_CLAIMS, renewing credentials");

                    credentials.renew_rejected(Some(&remote)).await?;
                    renewed = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Like [`Session::fetch`], deserializing the response into `T`.
    pub async fn fetch_as<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<T> {
        let value = self
            .fetch(url, options)
            .await?
            .ok_or_else(|| Error::validation(format!("{url} returned no body")))?;

        serde_helpers::deserialize_with_warnings(value)
    }

    /// Region and shard of the account, read once from the game log.
    pub async fn region(&self) -> Result<Region> {
        self.inner
            .region
            .get_or_try_init(|| async {
                let path = self.inner.credentials.log_path()?;
                let log = environment::read_log(&path).await?;

                environment::region(&log).ok_or_else(|| {
                    Error::environment(
                        Some(path),
                        "no game server URL found; start the game so that it logs its region",
                    )
                })
            })
            .await
            .cloned()
    }

    /// Seasons, acts and events known to the content service.
    pub async fn content(&self) -> Result<Value> {
        let url = match &self.inner.config.content_url {
            Some(url) => url.clone(),
            None => {
                let shard = self.region().await?.shard;
                format!("https://shared.{shard}.a.pvp.net/content-service/v3/content")
            }
        };

        self.fetch(&url, &FetchOptions::default())
            .await?
            .ok_or_else(|| Error::validation("content service returned no body"))
    }

    /// ID of the first active season matching the filters, or `None` when nothing is active.
    pub async fn current_season(
        &self,
        include_acts: bool,
        include_episodes: bool,
    ) -> Result<Option<String>> {
        if !include_acts && !include_episodes {
            return Err(Error::validation(
                "at least one of include_acts and include_episodes must be set",
            ));
        }

        let content = self.content().await?;
        let seasons = content
            .get("Seasons")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::validation("content has no Seasons array"))?;

        let current = seasons.iter().find(|season| {
            let active = season.get("IsActive").and_then(Value::as_bool) == Some(true);
            let kind = season.get("Type").and_then(Value::as_str);

            active
                && !(kind == Some("act") && !include_acts)
                && !(kind == Some("episode") && !include_episodes)
        });

        Ok(current
            .and_then(|season| season.get("ID"))
            .and_then(Value::as_str)
            .map(str::to_owned))
    }

    /// Description of the local API's events, functions and types.
    pub async fn help(&self) -> Result<Value> {
        self.fetch_local("help", &FetchOptions::default()).await
    }

    fn cached(&self, key: &str, options: &FetchOptions) -> Option<Value> {
        if !options.is_cacheable() {
            return None;
        }

        let value = self.inner.cache.get(key);

        #[cfg(feature = "tracing")]
        tracing::debug!(key, hit = value.is_some(), "cache lookup");

        value
    }

    fn store(&self, key: String, value: &Value, options: &FetchOptions) {
        if options.is_cacheable() {
            self.inner
                .cache
                .insert(key, value.clone(), options.lifetime.unwrap_or_default());
        }
    }
}

fn is_bad_claims(error: &Error) -> bool {
    error.downcast_ref::<BadClaims>().is_some()
}
