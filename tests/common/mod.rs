#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Deeply nested uses in sub-modules are falsely flagged as being unused"
)]

use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use httpmock::{Mock, MockServer};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tempfile::TempDir;
use valorant_client_sdk::Config;

pub const PASSWORD: &str = "lockfile-password";
pub const RENEWED_PASSWORD: &str = "renewed-password";

pub const ACCESS_TOKEN: &str = "access-token";
pub const ENTITLEMENT_TOKEN: &str = "entitlement-token";
pub const CLIENT_VERSION: &str = "release-08.07-shipping-15-2444158";

pub const AUTHORIZATION: &str = "authorization";
pub const ENTITLEMENTS_HEADER: &str = "x-riot-entitlements-jwt";
pub const CLIENT_VERSION_HEADER: &str = "x-riot-clientversion";

pub const TOKEN_PATH: &str = "/entitlements/v1/token";
pub const PAS_PATH: &str = "/pas/v1/service/chat";
pub const CLIENT_CONFIG_PATH: &str = "/api/v1/config/player";
pub const CONTENT_PATH: &str = "/content-service/v3/content";

pub const LOG: &str = "\
[2024.05.28-09.12.41:263][  0]LogInit: Display: Running engine for game: ShooterGame
[2024.05.28-09.12.41:270][  0]LogShooter: Display: CI server version: release-08.07-15-2444158
[2024.05.28-09.13.02:115][ 12]LogPlatformSessionManager: Display: GET https://glz-na-1.na.a.pvp.net/session/v1/sessions/me
";

/// Lockfile and game log in a temporary directory, pointing at a mock server.
pub struct LocalFiles {
    pub dir: TempDir,
    pub lockfile: PathBuf,
    pub log: PathBuf,
}

impl LocalFiles {
    pub fn new(server: &MockServer) -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let files = Self {
            lockfile: dir.path().join("lockfile"),
            log: dir.path().join("ShooterGame.log"),
            dir,
        };

        files.write_lockfile(server, PASSWORD)?;
        std::fs::write(&files.log, LOG)?;

        Ok(files)
    }

    /// Simulates the Riot Client restarting with a new password.
    pub fn write_lockfile(&self, server: &MockServer, password: &str) -> anyhow::Result<()> {
        std::fs::write(
            &self.lockfile,
            format!("Riot Client:4242:{}:{password}:http", server.port()),
        )?;
        Ok(())
    }

    pub fn config(&self, server: &MockServer) -> Config {
        Config::builder()
            .lockfile_path(self.lockfile.clone())
            .log_path(self.log.clone())
            .pas_url(server.url(PAS_PATH))
            .client_config_url(server.url(CLIENT_CONFIG_PATH))
            .content_url(server.url(CONTENT_PATH))
            .build()
    }
}

#[must_use]
pub fn basic(password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("riot:{password}")))
}

#[must_use]
pub fn bearer(access_token: &str) -> String {
    format!("Bearer {access_token}")
}

/// Token exchange answering only when presented `password`.
pub fn mock_token_exchange<'a>(
    server: &'a MockServer,
    password: &str,
    access_token: &str,
) -> Mock<'a> {
    let body = json!({
        "accessToken": access_token,
        "token": ENTITLEMENT_TOKEN,
        "subject": "puuid-self",
        "issuer": "https://auth.riotgames.com",
        "entitlements": []
    });

    server.mock(|when, then| {
        when.method(httpmock::Method::GET)
            .path(TOKEN_PATH)
            .header(AUTHORIZATION, basic(password));
        then.status(StatusCode::OK).json_body(body);
    })
}

/// Compact signed token with the given payload and a dummy signature.
#[must_use]
pub fn signed_token(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(json!({ "alg": "RS256", "kid": "s1" }).to_string());
    let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

pub fn init_tracing() {
    _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
