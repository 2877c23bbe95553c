//! Login sequence of the chat stream.
//!
//! Each message is answered by a fixed number of responses, and the next message is only sent
//! once all of them were read.

use secrecy::ExposeSecret as _;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::time::timeout;

use super::types::ServerDetails;
use crate::Result;
use crate::auth::{RemoteCredential, SignedToken};
use crate::error::Error;
use crate::xmpp::{Config, StreamError};

/// Sent once the handshake completed: an initial presence and a roster request.
pub(crate) const BOOTSTRAP: [&str; 2] = [
    "<presence/>",
    r#"<iq type="get" id="2"><query xmlns="jabber:iq:riotgames:roster" last_state="true" /></iq>"#,
];

/// Sent before the transport is shut down.
pub(crate) const CLOSE_STREAM: &str = "</stream:stream>";

#[derive(Debug)]
pub(crate) struct Step {
    pub phase: &'static str,
    pub content: String,
    pub responses: usize,
}

/// The six login messages with the number of responses each one expects: 2, 1, 2, 1, 1, 1.
pub(crate) fn steps(
    server: &ServerDetails,
    remote: &RemoteCredential,
    signed: &SignedToken,
) -> [Step; 6] {
    let domain = format!("{}.pvp.net", server.xmpp_region);

    [
        Step {
            phase: "stream open",
            content: format!(
                r#"<?xml version="1.0" encoding="UTF-8"?><stream:stream to="{domain}" xml:lang="en" version="1.0" xmlns="jabber:client" xmlns:stream="http://etherx.jabber.org/streams">"#
            ),
            responses: 2,
        },
        Step {
            phase: "auth",
            content: format!(
                r#"<auth mechanism="X-Riot-RSO-PAS" xmlns="urn:ietf:params:xml:ns:xmpp-sasl"><rso_token>{}</rso_token><pas_token>{}</pas_token></auth>"#,
                remote.access_token().expose_secret(),
                signed.compact().expose_secret()
            ),
            responses: 1,
        },
        Step {
            phase: "stream restart",
            content: format!(
                r#"<?xml version="1.0"?><stream:stream to="{domain}" version="1.0" xmlns:stream="http://etherx.jabber.org/streams">"#
            ),
            responses: 2,
        },
        Step {
            phase: "bind",
            content: r#"<iq id="_xmpp_bind1" type="set"><bind xmlns="urn:ietf:params:xml:ns:xmpp-bind"></bind></iq>"#
                .to_owned(),
            responses: 1,
        },
        Step {
            phase: "session",
            content: r#"<iq id="_xmpp_session1" type="set"><session xmlns="urn:ietf:params:xml:ns:xmpp-session"/></iq>"#
                .to_owned(),
            responses: 1,
        },
        Step {
            phase: "entitlements",
            content: format!(
                r#"<iq id="xmpp_entitlements_0" type="set"><entitlements xmlns="urn:riotgames:entitlements"><token xmlns="">{}</token></entitlements></iq>"#,
                remote.entitlement_token().expose_secret()
            ),
            responses: 1,
        },
    ]
}

/// Runs `steps` in lockstep over `transport`.
///
/// A `<failure>` in any response means the credentials were refused.
pub(crate) async fn authenticate<T>(transport: &mut T, steps: &[Step], config: &Config) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    for step in steps {
        transport
            .write_all(step.content.as_bytes())
            .await
            .map_err(StreamError::from)?;

        for _ in 0..step.responses {
            let response = timeout(config.handshake_timeout, read_response(transport, config))
                .await
                .map_err(|_e| StreamError::Timeout { phase: step.phase })??;

            #[cfg(feature = "tracing")]
            tracing::trace!(phase = step.phase, %response, "handshake response");

            if response.contains("<failure") {
                return Err(Error::authentication(
                    format!("chat {}", step.phase),
                    response,
                ));
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(phase = step.phase, "handshake step complete");
    }

    Ok(())
}

/// Reads until a read comes back shorter than the buffer.
async fn read_response<T>(transport: &mut T, config: &Config) -> Result<String>
where
    T: AsyncRead + Unpin,
{
    let mut buf = vec![0_u8; config.read_buffer_size];
    let mut response = Vec::new();

    loop {
        let read = transport.read(&mut buf).await.map_err(StreamError::from)?;
        if read == 0 {
            return Err(StreamError::ConnectionClosed.into());
        }

        response.extend_from_slice(&buf[..read]);
        if read < buf.len() {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&response).into_owned())
}
