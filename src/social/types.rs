//! Events delivered to social listeners.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::Value;

use crate::Result;
use crate::error::Error;
use crate::xmpp::Element;

/// Root tag of a stream fragment. Names compare case-insensitively.
#[non_exhaustive]
#[derive(Debug, Clone, Eq)]
pub enum Tag {
    Presence,
    Message,
    Iq,
    /// Any other root tag, with the name as received
    Other(String),
}

impl Tag {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Presence => "presence",
            Self::Message => "message",
            Self::Iq => "iq",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for Tag {
    fn from(name: &str) -> Self {
        if name.eq_ignore_ascii_case("presence") {
            Self::Presence
        } else if name.eq_ignore_ascii_case("message") {
            Self::Message
        } else if name.eq_ignore_ascii_case("iq") {
            Self::Iq
        } else {
            Self::Other(name.to_owned())
        }
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.as_str().eq_ignore_ascii_case(other.as_str())
    }
}

impl std::hash::Hash for Tag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed fragment, as handed to listeners.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum SocialEvent {
    Presence(Box<PresenceUpdate>),
    /// A fragment without a registered decoder
    Raw { tag: Tag, element: Element },
}

impl SocialEvent {
    #[must_use]
    pub fn tag(&self) -> Tag {
        match self {
            Self::Presence(_) => Tag::Presence,
            Self::Raw { tag, .. } => tag.clone(),
        }
    }

    /// The markup the event was decoded from.
    #[must_use]
    pub fn element(&self) -> &Element {
        match self {
            Self::Presence(update) => &update.element,
            Self::Raw { element, .. } => element,
        }
    }
}

/// Result of running a decoder over a fragment.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Decoded {
    Event(SocialEvent),
    /// The fragment is recognized but unusable; it is not delivered
    Invalid,
}

/// Turns the element of a known tag into an event.
pub type Decoder = fn(&Element) -> Decoded;

/// Game state carried in the `<p>` payload of a presence, base64-encoded JSON.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceDetails {
    pub competitive_tier: Option<u32>,
    pub account_level: Option<u32>,
    pub is_idle: Option<bool>,
    pub queue_id: Option<String>,
    /// `MENUS`, `PREGAME` or `INGAME`
    pub session_loop_state: Option<String>,
    pub party_size: Option<u32>,
    pub max_party_size: Option<u32>,
    pub party_owner_match_score_ally_team: Option<i32>,
    pub party_owner_match_score_enemy_team: Option<i32>,
    pub party_owner_match_current_team: Option<String>,
    pub match_map: Option<String>,
    pub party_id: Option<String>,
}

impl PresenceDetails {
    fn is_in_game_without_team(&self) -> bool {
        self.session_loop_state.as_deref() == Some("INGAME")
            && self
                .party_owner_match_current_team
                .as_deref()
                .is_none_or(str::is_empty)
    }
}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct PresenceUpdate {
    /// User id of the sender, without domain and resource
    pub from: String,
    /// User id of the recipient
    pub to: String,
    pub is_self: bool,
    pub unavailable: bool,
    /// Decoded game state. `None` for unavailable presences.
    pub details: Option<PresenceDetails>,
    pub element: Element,
}

impl PresenceUpdate {
    /// [`Decoder`] for `<presence>` fragments.
    ///
    /// A presence without a `<p>` payload, or in game without a team, is [`Decoded::Invalid`].
    #[must_use]
    pub fn decode(element: &Element) -> Decoded {
        match Self::try_from_element(element) {
            Ok(Some(update)) => Decoded::Event(SocialEvent::Presence(Box::new(update))),
            Ok(None) => Decoded::Invalid,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "unable to decode presence");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                Decoded::Invalid
            }
        }
    }

    fn try_from_element(element: &Element) -> Result<Option<Self>> {
        let (Some(from), Some(to)) = (element.attr("from"), element.attr("to")) else {
            return Ok(None);
        };
        let Some(payload) = element.descendant("p") else {
            return Ok(None);
        };

        let from = user_id(from).to_owned();
        let to = user_id(to).to_owned();
        let unavailable = element.attr("type") == Some("unavailable");

        let details = if unavailable {
            None
        } else {
            let bytes = STANDARD.decode(payload.text().trim())?;
            let details: PresenceDetails = serde_json::from_slice(&bytes)
                .map_err(|e| Error::validation(format!("unexpected presence payload: {e}")))?;

            if details.is_in_game_without_team() {
                return Ok(None);
            }
            Some(details)
        };

        Ok(Some(Self {
            is_self: from == to,
            from,
            to,
            unavailable,
            details,
            element: element.clone(),
        }))
    }
}

fn user_id(jid: &str) -> &str {
    jid.split_once('@').map_or(jid, |(id, _)| id)
}

/// Where the chat server for an account lives.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDetails {
    pub server: String,
    pub port: u16,
    /// Domain prefix announced in the stream header, `{xmpp_region}.pvp.net`
    pub xmpp_region: String,
}

impl ServerDetails {
    /// Reads the chat entries for `affinity` out of the player client configuration.
    pub fn from_client_config(config: &Value, affinity: &str) -> Result<Self> {
        let server = config
            .get("chat.affinities")
            .and_then(|affinities| affinities.get(affinity))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation(format!("no chat server for affinity {affinity}")))?;
        let port = config
            .get("chat.port")
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
            .ok_or_else(|| Error::validation("client config has no valid chat.port"))?;
        let xmpp_region = config
            .get("chat.affinity_domains")
            .and_then(|domains| domains.get(affinity))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation(format!("no chat domain for affinity {affinity}")))?;

        Ok(Self {
            server: server.to_owned(),
            port,
            xmpp_region: xmpp_region.to_owned(),
        })
    }
}
