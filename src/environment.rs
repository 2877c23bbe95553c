//! Readers for the files the Riot Client and the game leave on the local machine.
//!
//! - The **lockfile** is published by the Riot Client while it runs and carries the port and
//!   password of the local HTTP API.
//! - The **companion log** (`ShooterGame.log`) is written by the game and is scanned for the
//!   client version and the region/shard the account is routed to.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use secrecy::{ExposeSecret as _, SecretString};

use crate::Result;
use crate::error::Error;

/// Environment variable the default file locations are resolved against.
pub const LOCAL_APP_DATA_VAR: &str = "LOCALAPPDATA";

const LOCKFILE_RELATIVE_PATH: &str = "Riot Games/Riot Client/Config/lockfile";
const LOG_RELATIVE_PATH: &str = "VALORANT/Saved/Logs/ShooterGame.log";

const VERSION_MARKER: &str = "CI server version:";
const VERSION_SEGMENT: &str = "shipping";
const VERSION_SEGMENT_INDEX: usize = 2;

static REGION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://glz-(.+?)-1\.(.+?)\.a\.pvp\.net").expect("region pattern is valid")
});

/// Contents of the Riot Client lockfile: `name:pid:port:password:protocol`.
#[non_exhaustive]
#[derive(Clone)]
pub struct Lockfile {
    pub name: String,
    pub pid: u32,
    pub port: u16,
    pub(crate) password: SecretString,
    pub protocol: String,
}

impl fmt::Debug for Lockfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lockfile")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("port", &self.port)
            .field("password", &self.password)
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl Lockfile {
    /// Parses the colon-delimited lockfile contents.
    pub fn parse(contents: &str) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = contents.trim().split(':').collect();
        let [name, pid, port, password, protocol] = fields.as_slice() else {
            return Err(format!("expected 5 fields, found {}", fields.len()));
        };

        let pid = pid
            .parse()
            .map_err(|e| format!("invalid process id `{pid}`: {e}"))?;
        let port = port
            .parse()
            .map_err(|e| format!("invalid port `{port}`: {e}"))?;

        if password.is_empty() {
            return Err("password field is empty".to_owned());
        }

        Ok(Self {
            name: (*name).to_owned(),
            pid,
            port,
            password: SecretString::from((*password).to_owned()),
            protocol: (*protocol).to_owned(),
        })
    }

    /// Reads and parses the lockfile at `path`.
    pub async fn read(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::environment(Some(path.to_owned()), e.to_string()))?;

        Self::parse(&contents).map_err(|reason| Error::environment(Some(path.to_owned()), reason))
    }

    /// Returns the password of the local API.
    #[must_use]
    pub fn password(&self) -> &SecretString {
        &self.password
    }

    /// Base URL of the local API, e.g. `https://127.0.0.1:54321/`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://127.0.0.1:{}/", self.protocol, self.port)
    }

    pub(crate) fn expose_password(&self) -> &str {
        self.password.expose_secret()
    }
}

/// The region and shard an account is routed to, as found in the companion log.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Routing region, e.g. `na`, `eu`, `ap`, `kr`
    pub region: String,
    /// Backend shard serving the region, e.g. `na`, `eu`, `ap`, `kr`, `pbe`
    pub shard: String,
}

/// Extracts the client version from the companion log.
///
/// The log reports `release-08.07-15-2444158`; the API expects
/// `release-08.07-shipping-15-2444158`.
#[must_use]
pub fn client_version(log: &str) -> Option<String> {
    let line = log.lines().find(|line| line.contains(VERSION_MARKER))?;
    let (_, raw) = line.split_once(VERSION_MARKER)?;

    let mut segments: Vec<&str> = raw.trim().split('-').collect();
    let index = VERSION_SEGMENT_INDEX.min(segments.len());
    segments.insert(index, VERSION_SEGMENT);

    Some(segments.join("-"))
}

/// Extracts the region and shard from the first game-server URL in the companion log.
#[must_use]
pub fn region(log: &str) -> Option<Region> {
    let captures = REGION_PATTERN.captures(log)?;

    Some(Region {
        region: captures.get(1)?.as_str().to_owned(),
        shard: captures.get(2)?.as_str().to_owned(),
    })
}

pub(crate) async fn read_log(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::environment(Some(path.to_owned()), e.to_string()))?;

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub(crate) fn default_lockfile_path() -> Result<PathBuf> {
    local_app_data().map(|base| base.join(LOCKFILE_RELATIVE_PATH))
}

pub(crate) fn default_log_path() -> Result<PathBuf> {
    local_app_data().map(|base| base.join(LOG_RELATIVE_PATH))
}

fn local_app_data() -> Result<PathBuf> {
    env::var_os(LOCAL_APP_DATA_VAR)
        .map(PathBuf::from)
        .ok_or_else(|| Error::environment(None, format!("{LOCAL_APP_DATA_VAR} is not set")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockfile_parse_should_succeed() {
        let lockfile = Lockfile::parse("Riot Client:9872:51234:s3cr3t:https\n").unwrap();

        assert_eq!(lockfile.name, "Riot Client");
        assert_eq!(lockfile.pid, 9872);
        assert_eq!(lockfile.port, 51234);
        assert_eq!(lockfile.expose_password(), "s3cr3t");
        assert_eq!(lockfile.base_url(), "https://127.0.0.1:51234/");
    }

    #[test]
    fn lockfile_with_missing_fields_should_fail() {
        let err = Lockfile::parse("Riot Client:9872:51234").unwrap_err();
        assert_eq!(err, "expected 5 fields, found 3");
    }

    #[test]
    fn lockfile_with_bad_port_should_fail() {
        let err = Lockfile::parse("Riot Client:9872:port:pw:https").unwrap_err();
        assert!(err.starts_with("invalid port"), "got: {err}");
    }

    #[test]
    fn lockfile_debug_does_not_expose_password() {
        let lockfile = Lockfile::parse("Riot Client:1:2:hunter2:https").unwrap();
        let debug_output = format!("{lockfile:?}");

        assert!(
            !debug_output.contains("hunter2"),
            "Debug output should NOT contain the password. Got: {debug_output}"
        );
    }

    #[tokio::test]
    async fn missing_lockfile_is_environment_error() {
        let err = Lockfile::read(Path::new("/definitely/not/here/lockfile"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::Kind::Environment);
    }

    #[test]
    fn client_version_inserts_shipping_segment() {
        let log = "[2024.06.01-10.00.00:000][  0]LogInit: Build: ++Ares-Core+release-08.11\n\
                   [2024.06.01-10.00.00:000][  0]LogShooter: Display: CI server version: release-08.11-15-2575361\n";

        assert_eq!(
            client_version(log).as_deref(),
            Some("release-08.11-shipping-15-2575361")
        );
    }

    #[test]
    fn client_version_missing_marker_is_none() {
        assert_eq!(client_version("LogInit: nothing to see here"), None);
    }

    #[test]
    fn region_should_be_found_in_log() {
        let log = "LogPlatformSession: https://glz-eu-1.eu.a.pvp.net/session/v1/sessions";

        assert_eq!(
            region(log),
            Some(Region {
                region: "eu".to_owned(),
                shard: "eu".to_owned()
            })
        );
    }

    #[test]
    fn region_differs_from_shard_for_latam() {
        let log = "GET https://glz-latam-1.na.a.pvp.net/parties/v1/players";
        let found = region(log).unwrap();

        assert_eq!(found.region, "latam");
        assert_eq!(found.shard, "na");
    }
}
