use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::Stream;
use serde::Serialize;
use strum_macros::Display;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWriteExt as _, ReadHalf, WriteHalf};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::handshake::{self, BOOTSTRAP, CLOSE_STREAM};
use super::types::{Decoded, Decoder, PresenceUpdate, ServerDetails, SocialEvent, Tag};
use crate::error::Error;
use crate::session::{FetchOptions, Session};
use crate::xmpp::{BoxedTransport, Config, Connector, Element, Framer, StreamError, TlsConnector};
use crate::{Result, ToQueryParams as _};

/// Connection state of the social [`Client`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    /// Resolving the chat server and opening the transport
    Connecting,
    /// Running the login handshake
    Authenticating,
    /// Handshake complete, events are being dispatched
    Listening {
        /// When the handshake completed
        since: Instant,
    },
    Disconnecting,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_listening(self) -> bool {
        matches!(self, Self::Listening { .. })
    }
}

/// Handle of a registered listener, used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&SocialEvent) + Send + Sync>;

#[derive(Clone)]
struct Listener {
    id: ListenerId,
    filter: Option<Tag>,
    callback: Callback,
}

impl Listener {
    fn accepts(&self, tag: &Tag) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter == tag)
    }
}

#[derive(Serialize)]
struct ClientConfigQuery<'a> {
    os: &'a str,
    region: &'a str,
    app: &'a str,
}

/// Client for the chat stream: presences, messages and roster updates.
///
/// [`Client::start`] logs in and spawns two tasks: a writer that sends keepalives and queued
/// stanzas, and a reader that frames incoming data and dispatches it to listeners.
/// [`Client::stop`] cancels both and waits for them, so no listener runs after it returns.
/// Dropping the last handle without stopping cancels the tasks too, which then close the
/// stream on their own.
///
/// # Example
///
/// ```no_run
/// use valorant_client_sdk::Session;
/// use valorant_client_sdk::social::{Client, SocialEvent, Tag};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let session = Session::new(Default::default())?;
/// let client = Client::new(session, Default::default())?;
///
/// client.add_listener(
///     |event| {
///         if let SocialEvent::Presence(update) = event {
///             println!("{} is {:?}", update.from, update.details);
///         }
///     },
///     Some(Tag::Presence),
/// );
///
/// client.start().await?;
/// // ...
/// client.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
    /// Parent of every connection's token. Kept out of [`ClientInner`] because the reader task
    /// holds that.
    lifetime: Arc<DroppingCancellationToken>,
}

/// Cancels its token once dropped.
#[derive(Debug, Default)]
struct DroppingCancellationToken(CancellationToken);

impl Drop for DroppingCancellationToken {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

struct ClientInner {
    session: Session,
    config: Config,
    connector: Arc<dyn Connector>,
    state_tx: watch::Sender<ConnectionState>,
    listeners: Mutex<Vec<Listener>>,
    decoders: Mutex<HashMap<Tag, Decoder>>,
    next_listener_id: AtomicU64,
    /// Present while a connection and its tasks exist
    running: AsyncMutex<Option<Running>>,
}

struct Running {
    token: CancellationToken,
    outgoing: mpsc::UnboundedSender<String>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .field("connector", &self.inner.connector)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client that connects over TLS.
    pub fn new(session: Session, config: Config) -> Result<Self> {
        Ok(Self::with_connector(
            session,
            config,
            Arc::new(TlsConnector::new()?),
        ))
    }

    #[must_use]
    pub fn with_connector(session: Session, config: Config, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let mut decoders: HashMap<Tag, Decoder> = HashMap::new();
        decoders.insert(Tag::Presence, PresenceUpdate::decode);

        Self {
            inner: Arc::new(ClientInner {
                session,
                config,
                connector,
                state_tx,
                listeners: Mutex::new(Vec::new()),
                decoders: Mutex::new(decoders),
                next_listener_id: AtomicU64::new(0),
                running: AsyncMutex::new(None),
            }),
            lifetime: Arc::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Resolves the chat server of the account from its signed token's affinity.
    pub async fn server_details(&self) -> Result<ServerDetails> {
        let session = &self.inner.session;
        let signed = session.credentials().signed_token(false).await?;
        let affinity = signed
            .affinity()
            .ok_or_else(|| Error::validation("signed token has no affinity claim"))?;

        let query = ClientConfigQuery {
            os: "windows",
            region: affinity,
            app: "Riot Client",
        }
        .query_params();
        let options = FetchOptions::builder().query(query).build();
        let config = session
            .fetch(session.config().client_config_url(), &options)
            .await?
            .ok_or_else(|| Error::validation("client config returned no body"))?;

        ServerDetails::from_client_config(&config, affinity)
    }

    /// Connects, logs in and starts dispatching. Returns once both background tasks run.
    ///
    /// Does nothing if the client is already listening. A zero keepalive interval is a
    /// validation error.
    pub async fn start(&self) -> Result<()> {
        if self.inner.config.keepalive_interval.is_zero() {
            return Err(Error::validation(
                "keepalive interval must be greater than zero",
            ));
        }

        let mut running = self.inner.running.lock().await;

        if let Some(current) = running.take() {
            if self.state().is_listening() {
                *running = Some(current);
                return Ok(());
            }

            // The peer closed the previous connection; reap its tasks first.
            current.shutdown().await;
        }

        self.set_state(ConnectionState::Connecting);

        match self.connect().await {
            Ok(connection) => {
                *running = Some(connection);
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Cancels both background tasks, closes the transport and waits for the tasks to end.
    ///
    /// Does nothing if the client is not running.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.inner.running.lock().await;
        let Some(current) = running.take() else {
            return Ok(());
        };

        self.set_state(ConnectionState::Disconnecting);
        current.shutdown().await;
        self.set_state(ConnectionState::Disconnected);

        Ok(())
    }

    /// Queues a raw stanza for sending.
    pub async fn send<S: Into<String>>(&self, raw: S) -> Result<()> {
        if !self.state().is_listening() {
            return Err(StreamError::NotConnected.into());
        }

        let running = self.inner.running.lock().await;
        let current = running.as_ref().ok_or(StreamError::NotConnected)?;
        current
            .outgoing
            .send(raw.into())
            .map_err(|_e| StreamError::NotConnected)?;

        Ok(())
    }

    /// Registers `callback` for every event, or only for events whose tag equals `filter`.
    ///
    /// Listeners run on the reader task, in registration order. They must not block.
    pub fn add_listener<F>(&self, callback: F, filter: Option<Tag>) -> ListenerId
    where
        F: Fn(&SocialEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));

        self.inner.listeners().push(Listener {
            id,
            filter,
            callback: Arc::new(callback),
        });

        id
    }

    /// Removes a listener. Unknown ids are a [`StreamError::ListenerNotFound`] error.
    pub fn remove_listener(&self, id: ListenerId) -> Result<()> {
        let mut listeners = self.inner.listeners();
        let position = listeners
            .iter()
            .position(|listener| listener.id == id)
            .ok_or(StreamError::ListenerNotFound)?;

        listeners.remove(position);
        Ok(())
    }

    /// Decodes fragments tagged `tag` with `decoder` instead of delivering them raw.
    pub fn register_decoder(&self, tag: Tag, decoder: Decoder) {
        self.inner
            .decoders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag, decoder);
    }

    fn set_state(&self, state: ConnectionState) {
        #[cfg(feature = "tracing")]
        tracing::debug!(%state, "social connection state changed");

        _ = self.inner.state_tx.send_replace(state);
    }

    async fn connect(&self) -> Result<Running> {
        let server = self.server_details().await?;
        let credentials = self.inner.session.credentials();
        let remote = credentials.remote_credential(false).await?;
        let signed = credentials.signed_token(false).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(server = %server.server, port = server.port, "connecting to chat server");

        let mut transport = self
            .inner
            .connector
            .connect(&server.server, server.port)
            .await?;

        self.set_state(ConnectionState::Authenticating);

        let steps = handshake::steps(&server, &remote, &signed);
        handshake::authenticate(&mut transport, &steps, &self.inner.config).await?;

        for stanza in BOOTSTRAP {
            transport
                .write_all(stanza.as_bytes())
                .await
                .map_err(StreamError::from)?;
        }

        // Set before the reader exists so that an immediate disconnect is not overwritten.
        self.set_state(ConnectionState::Listening {
            since: Instant::now(),
        });

        Ok(self.spawn_tasks(transport).await)
    }

    async fn spawn_tasks(&self, transport: BoxedTransport) -> Running {
        let (read_half, write_half) = tokio::io::split(transport);
        let token = self.lifetime.0.child_token();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let writer = tokio::spawn(write_loop(
            write_half,
            outgoing_rx,
            token.clone(),
            self.inner.config.keepalive_interval,
        ));
        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&self.inner),
            token.clone(),
            ready_tx,
        ));

        _ = ready_rx.await;

        Running {
            token,
            outgoing,
            writer,
            reader,
        }
    }
}

impl Running {
    async fn shutdown(self) {
        self.token.cancel();

        for (task, handle) in [("writer", self.writer), ("reader", self.reader)] {
            if let Err(e) = handle.await {
                #[cfg(feature = "tracing")]
                tracing::error!(task, error = %e, "social task did not end cleanly");
                #[cfg(not(feature = "tracing"))]
                let _ = (task, &e);
            }
        }
    }
}

impl ClientInner {
    fn listeners(&self) -> MutexGuard<'_, Vec<Listener>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Parses each fragment, decodes it if its tag has a decoder and hands it to every matching
    /// listener.
    fn dispatch(&self, fragments: Vec<String>) {
        for fragment in fragments {
            #[cfg(feature = "tracing")]
            tracing::trace!(%fragment, "dispatching fragment");

            let element = match Element::parse(&fragment) {
                Ok(element) => element,
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%fragment, error = %e, "unparseable stream fragment");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                    continue;
                }
            };

            let tag = Tag::from(element.name.as_str());
            let decoder = self
                .decoders
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&tag)
                .copied();

            let event = match decoder {
                Some(decode) => match decode(&element) {
                    Decoded::Event(event) => event,
                    Decoded::Invalid => continue,
                },
                None => SocialEvent::Raw {
                    tag: tag.clone(),
                    element,
                },
            };

            // Listeners may add or remove listeners; call them on a snapshot.
            let listeners = self.listeners().clone();
            for listener in listeners.iter().filter(|listener| listener.accepts(&tag)) {
                (listener.callback)(&event);
            }
        }
    }
}

async fn write_loop(
    mut write_half: WriteHalf<BoxedTransport>,
    mut outgoing_rx: mpsc::UnboundedReceiver<String>,
    token: CancellationToken,
    keepalive_interval: std::time::Duration,
) {
    let mut keepalive = time::interval(keepalive_interval);
    keepalive.tick().await;

    loop {
        let result = tokio::select! {
            () = token.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Keepalive cancellation requested, terminating...");
                break
            },
            _ = keepalive.tick() => write_half.write_all(b" ").await,
            Some(raw) = outgoing_rx.recv() => write_half.write_all(raw.as_bytes()).await,
        };

        if let Err(e) = result {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %e, "unable to write to chat server");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
            token.cancel();
            break;
        }
    }

    _ = write_half.write_all(CLOSE_STREAM.as_bytes()).await;
    _ = write_half.shutdown().await;
}

async fn read_loop(
    read_half: ReadHalf<BoxedTransport>,
    inner: Arc<ClientInner>,
    token: CancellationToken,
    ready_tx: oneshot::Sender<()>,
) {
    let mut framer = Framer::new(inner.config.max_buffered_bytes);
    let chunks = chunks(read_half, inner.config.read_buffer_size);

    _ = ready_tx.send(());

    let result = tokio::select! {
        () = token.cancelled() => return,
        result = framer.consume(chunks, |fragments| inner.dispatch(fragments)) => result,
    };

    match result {
        Ok(()) => {
            #[cfg(feature = "tracing")]
            tracing::debug!("chat server closed the stream");
        }
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %e, "social receive loop failed");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }

    token.cancel();
    _ = inner.state_tx.send_replace(ConnectionState::Disconnected);
}

/// Text chunks read from `reader`. An empty chunk marks the end of the stream.
///
/// A multi-byte character split across reads is held back until it is complete.
fn chunks<R>(mut reader: R, read_size: usize) -> impl Stream<Item = std::result::Result<String, StreamError>>
where
    R: AsyncRead + Unpin,
{
    async_stream::try_stream! {
        let mut buf = vec![0_u8; read_size];
        let mut pending: Vec<u8> = Vec::new();

        loop {
            let read = reader.read(&mut buf).await.map_err(StreamError::from)?;
            if read == 0 {
                yield String::new();
                break;
            }

            pending.extend_from_slice(&buf[..read]);
            let text = take_utf8(&mut pending);
            if !text.is_empty() {
                yield text;
            }
        }
    }
}

/// Removes and returns the longest decodable prefix of `pending`. Invalid bytes are replaced.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_owned();
            pending.clear();
            text
        }
        // Only an incomplete sequence at the end: keep it for the next read.
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use futures::StreamExt as _;

    use super::*;
    use crate::error::Kind;
    use crate::session::Config as SessionConfig;
    use crate::xmpp::TcpConnector;

    fn client() -> Client {
        let session = Session::new(SessionConfig::default()).unwrap();
        Client::with_connector(session, Config::default(), Arc::new(TcpConnector))
    }

    fn recorder(client: &Client, filter: Option<Tag>) -> (ListenerId, Arc<StdMutex<Vec<Tag>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = client.add_listener(move |event| sink.lock().unwrap().push(event.tag()), filter);
        (id, seen)
    }

    #[test]
    fn only_matching_listeners_receive_events() {
        let client = client();
        let (_, presences) = recorder(&client, Some(Tag::Presence));
        let (_, everything) = recorder(&client, None);

        client.inner.dispatch(vec![
            r#"<message from="a@ap1.pvp.net" type="chat"><body>gg</body></message>"#.to_owned(),
        ]);

        assert!(presences.lock().unwrap().is_empty());
        assert_eq!(*everything.lock().unwrap(), vec![Tag::Message]);
    }

    #[test]
    fn filter_matches_case_insensitively() {
        let client = client();
        let (_, iqs) = recorder(&client, Some(Tag::Other("IQ".to_owned())));

        client
            .inner
            .dispatch(vec![r#"<iq type="result" id="2"/>"#.to_owned()]);

        assert_eq!(*iqs.lock().unwrap(), vec![Tag::Iq]);
    }

    #[test]
    fn invalid_and_unparseable_fragments_are_skipped() {
        let client = client();
        let (_, everything) = recorder(&client, None);

        client.inner.dispatch(vec![
            r#"<presence from="a@ap1.pvp.net" to="b@ap1.pvp.net"/>"#.to_owned(),
            "<iq><broken></iq>".to_owned(),
            r#"<stream:features xmlns:stream="http://etherx.jabber.org/streams"/>"#.to_owned(),
        ]);

        assert_eq!(
            *everything.lock().unwrap(),
            vec![Tag::Other("features".to_owned())]
        );
    }

    #[test]
    fn registered_decoder_replaces_raw_delivery() {
        fn drop_all(_: &Element) -> Decoded {
            Decoded::Invalid
        }

        let client = client();
        let (_, everything) = recorder(&client, None);
        client.register_decoder(Tag::Message, drop_all);

        client
            .inner
            .dispatch(vec![r#"<message><body>hidden</body></message>"#.to_owned()]);

        assert!(everything.lock().unwrap().is_empty());
    }

    #[test]
    fn remove_listener_should_succeed() {
        let client = client();
        let (id, seen) = recorder(&client, None);

        client.remove_listener(id).unwrap();
        client.inner.dispatch(vec!["<iq/>".to_owned()]);

        assert!(seen.lock().unwrap().is_empty());
        let err = client.remove_listener(id).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StreamError>(),
            Some(StreamError::ListenerNotFound)
        ));
    }

    #[test]
    fn state_display_is_snake_case() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(
            ConnectionState::Listening {
                since: Instant::now()
            }
            .to_string(),
            "listening"
        );
    }

    #[tokio::test]
    async fn send_when_not_listening_should_fail() {
        let client = client();

        let err = client.send("<presence/>").await.unwrap_err();

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(
            err.downcast_ref::<StreamError>(),
            Some(StreamError::NotConnected)
        ));
        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn zero_keepalive_interval_is_rejected_before_connecting() {
        let session = Session::new(SessionConfig::default()).unwrap();
        let config = Config::builder().keepalive_interval(Duration::ZERO).build();
        let client = Client::with_connector(session, config, Arc::new(TcpConnector));

        let err = client.start().await.unwrap_err();

        assert_eq!(err.kind(), Kind::Validation);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn take_utf8_holds_back_split_characters() {
        let bytes = "héllo".as_bytes();
        let mut pending = bytes[..2].to_vec();

        assert_eq!(take_utf8(&mut pending), "h");
        assert_eq!(pending, vec![0xC3]);

        pending.extend_from_slice(&bytes[2..]);
        assert_eq!(take_utf8(&mut pending), "éllo");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn chunks_end_with_empty_sentinel() {
        let data: &[u8] = b"<iq/><presence/>";
        let collected: Vec<String> = chunks(data, 4)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(collected.concat(), "<iq/><presence/>");
        assert_eq!(collected.last().map(String::as_str), Some(""));
    }
}
