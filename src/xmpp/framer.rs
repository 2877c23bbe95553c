//! Incremental framing of the chat stream into complete markup fragments.
//!
//! The framer matches one root tag at a time: it looks for the first `<name` and then for the
//! first `</name` after it. Nested elements sharing the root's name are not supported, which
//! the chat protocol never produces.

use std::pin::pin;
use std::sync::LazyLock;

use futures::{Stream, StreamExt as _};
use regex::Regex;

use super::config::DEFAULT_MAX_BUFFERED_BYTES;
use super::error::StreamError;

/// Fragments starting with one of these are passed through whole, without tag matching.
const SELF_DELIMITING_PREFIXES: [&str; 3] = ["<?xml", "<stream:features>", "<message"];

static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(\w+)").expect("open tag pattern is valid"));

/// Incomplete data grew past the buffer limit and was discarded.
///
/// Fragments completed by the same chunk are not lost; they are carried here.
#[non_exhaustive]
#[derive(Debug)]
pub struct Overflow {
    pub limit: usize,
    /// Complete fragments found before the discarded tail
    pub fragments: Vec<String>,
}

impl From<Overflow> for StreamError {
    fn from(overflow: Overflow) -> Self {
        Self::BufferOverflow {
            limit: overflow.limit,
        }
    }
}

/// Buffers partial stream data and emits complete fragments.
#[derive(Debug)]
pub struct Framer {
    buffer: String,
    max_buffered_bytes: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFERED_BYTES)
    }
}

impl Framer {
    #[must_use]
    pub fn new(max_buffered_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            max_buffered_bytes,
        }
    }

    /// Appends `chunk` to the retained data and returns every fragment that is now complete.
    ///
    /// Whatever follows the last complete fragment is retained for the next call. If that tail is
    /// longer than the limit it is dropped, the buffer is left empty and the fragments are
    /// returned through [`Overflow`].
    pub fn parse_chunk(&mut self, chunk: &str) -> Result<Vec<String>, Overflow> {
        let mut text = std::mem::take(&mut self.buffer);
        text.push_str(chunk);

        let mut fragments = Vec::new();
        let mut rest = text.as_str();

        while !rest.is_empty() {
            if SELF_DELIMITING_PREFIXES
                .iter()
                .any(|prefix| rest.starts_with(prefix))
            {
                fragments.push(rest.to_owned());
                rest = "";
                break;
            }

            let Some(end) = fragment_end(rest) else {
                break;
            };

            let (fragment, tail) = rest.split_at(end);
            fragments.push(fragment.to_owned());
            rest = tail;
        }

        if rest.len() > self.max_buffered_bytes {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                buffered = rest.len(),
                limit = self.max_buffered_bytes,
                "discarding incomplete stream data"
            );

            return Err(Overflow {
                limit: self.max_buffered_bytes,
                fragments,
            });
        }

        rest.clone_into(&mut self.buffer);
        Ok(fragments)
    }

    /// Data received but not yet part of a complete fragment.
    #[must_use]
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Feeds every chunk of `chunks` through [`Framer::parse_chunk`], calling `on_fragments` with
    /// each non-empty batch.
    ///
    /// Returns when the source ends or yields an empty chunk, which signals that the peer
    /// disconnected. An overflow ends consumption after the fragments completed by the
    /// offending chunk were handed over.
    pub async fn consume<S, F>(&mut self, chunks: S, mut on_fragments: F) -> Result<(), StreamError>
    where
        S: Stream<Item = Result<String, StreamError>>,
        F: FnMut(Vec<String>),
    {
        let mut chunks = pin!(chunks);

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                break;
            }

            #[cfg(feature = "tracing")]
            tracing::trace!(%chunk, "received stream chunk");

            let (fragments, overflow) = match self.parse_chunk(&chunk) {
                Ok(fragments) => (fragments, None),
                Err(Overflow { limit, fragments }) => {
                    (fragments, Some(StreamError::BufferOverflow { limit }))
                }
            };

            if !fragments.is_empty() {
                on_fragments(fragments);
            }
            if let Some(e) = overflow {
                return Err(e);
            }
        }

        Ok(())
    }
}

/// Byte offset just past the first complete fragment of `text`, if there is one.
#[expect(
    clippy::string_slice,
    reason = "Every offset comes from a match or `find` on `text` and is a char boundary"
)]
fn fragment_end(text: &str) -> Option<usize> {
    let captures = OPEN_TAG.captures(text)?;
    let tag = captures.get(1)?;
    let after_name = tag.end();

    // `<name ... />` closes itself.
    let open_end = after_name + text[after_name..].find('>')?;
    if text[..open_end].ends_with('/') {
        return Some(open_end + 1);
    }

    let closing = format!("</{}", tag.as_str());
    let mut from = open_end;

    loop {
        let start = from + text[from..].find(&closing)?;
        let after = start + closing.len();

        match text[after..].chars().next()? {
            '>' => return Some(after + 1),
            c if c.is_whitespace() => return Some(after + text[after..].find('>')? + 1),
            // `</presence` matched a prefix of a longer name such as `</presences>`.
            _ => from = after,
        }
    }
}

#[cfg(test)]
#[expect(
    clippy::string_slice,
    reason = "Fixtures are split at checked char boundaries"
)]
mod tests {
    use futures::stream;

    use super::*;

    const PRESENCE: &str = r#"<presence from="a@ap1.pvp.net/RC-1" to="b@ap1.pvp.net"><show>chat</show><games><valorant><p>eyJpc0lkbGUiOmZhbHNlfQ==</p></valorant></games></presence>"#;
    const IQ: &str = r#"<iq type="result" id="2"><query xmlns="jabber:iq:riotgames:roster"/></iq>"#;

    #[test]
    fn complete_fragment_is_returned_whole() -> Result<(), StreamError> {
        let mut framer = Framer::default();

        assert_eq!(framer.parse_chunk(PRESENCE)?, vec![PRESENCE]);
        assert_eq!(framer.buffered(), "");

        Ok(())
    }

    #[test]
    fn fragment_split_at_every_boundary_is_emitted_once() -> Result<(), StreamError> {
        for split in 1..PRESENCE.len() {
            if !PRESENCE.is_char_boundary(split) {
                continue;
            }

            let mut framer = Framer::default();
            let mut emitted = framer.parse_chunk(&PRESENCE[..split])?;
            emitted.extend(framer.parse_chunk(&PRESENCE[split..])?);

            assert_eq!(emitted, vec![PRESENCE], "split at {split}");
            assert_eq!(framer.buffered(), "");
        }

        Ok(())
    }

    #[test]
    fn fragment_split_in_three_is_emitted_once() -> Result<(), StreamError> {
        for first in (1..IQ.len()).step_by(3) {
            for second in (first + 1..IQ.len()).step_by(5) {
                let mut framer = Framer::default();
                let mut emitted = Vec::new();

                for chunk in [&IQ[..first], &IQ[first..second], &IQ[second..]] {
                    emitted.extend(framer.parse_chunk(chunk)?);
                }

                assert_eq!(emitted.concat(), IQ, "splits at {first}/{second}");
                assert_eq!(emitted.len(), 1);
            }
        }

        Ok(())
    }

    #[test]
    fn missing_closing_tag_is_buffered() -> Result<(), StreamError> {
        let mut framer = Framer::default();
        let (head, tail) = PRESENCE.split_at(PRESENCE.len() - 20);

        assert!(framer.parse_chunk(head)?.is_empty());
        assert_eq!(framer.buffered(), head);

        assert_eq!(framer.parse_chunk(tail)?, vec![PRESENCE]);
        assert_eq!(framer.buffered(), "");

        Ok(())
    }

    #[test]
    fn several_fragments_in_one_chunk() -> Result<(), StreamError> {
        let mut framer = Framer::default();
        let partial = "<presence from=\"c@ap1.pvp.net\"><show>";
        let chunk = format!("{IQ}{PRESENCE}{partial}");

        assert_eq!(framer.parse_chunk(&chunk)?, vec![IQ, PRESENCE]);
        assert_eq!(framer.buffered(), partial);

        Ok(())
    }

    #[test]
    fn text_without_tags_is_buffered() -> Result<(), StreamError> {
        let mut framer = Framer::default();

        assert!(framer.parse_chunk(" ")?.is_empty());
        assert_eq!(framer.buffered(), " ");

        Ok(())
    }

    #[test]
    fn self_closing_root_is_complete() -> Result<(), StreamError> {
        let mut framer = Framer::default();

        assert_eq!(
            framer.parse_chunk("<presence/><iq type=\"get\"")?,
            vec!["<presence/>"]
        );
        assert_eq!(framer.buffered(), "<iq type=\"get\"");

        Ok(())
    }

    #[test]
    fn longer_closing_name_does_not_match() -> Result<(), StreamError> {
        let mut framer = Framer::default();
        let fragment = "<p><ps>x</ps></p>";

        assert_eq!(framer.parse_chunk(fragment)?, vec![fragment]);

        Ok(())
    }

    #[test]
    fn self_delimiting_prefixes_pass_through() -> Result<(), StreamError> {
        let mut framer = Framer::default();
        let opening = r#"<?xml version="1.0"?><stream:stream from="ap1.pvp.net" version="1.0">"#;
        let message = r#"<message from="a@ap1.pvp.net" type="chat"><body>hi"#;

        assert_eq!(framer.parse_chunk(opening)?, vec![opening]);
        assert_eq!(framer.parse_chunk(message)?, vec![message]);

        let chunk = format!("{IQ}<stream:features><bind/></stream:features>");
        assert_eq!(
            framer.parse_chunk(&chunk)?,
            vec![IQ, "<stream:features><bind/></stream:features>"]
        );

        Ok(())
    }

    #[test]
    fn overflow_clears_buffer() {
        let mut framer = Framer::new(16);

        let overflow = framer
            .parse_chunk("<presence from=\"somebody@ap1.pvp.net\">")
            .unwrap_err();

        assert_eq!(overflow.limit, 16);
        assert!(overflow.fragments.is_empty());
        assert!(matches!(
            StreamError::from(overflow),
            StreamError::BufferOverflow { limit: 16 }
        ));
        assert_eq!(framer.buffered(), "");
    }

    #[test]
    fn overflow_keeps_fragments_completed_by_the_chunk() {
        let mut framer = Framer::new(32);

        let overflow = framer
            .parse_chunk("<iq id=\"1\"/><presence from=\"somebody-long@ap1.pvp.net\">")
            .unwrap_err();

        assert_eq!(overflow.fragments, vec!["<iq id=\"1\"/>"]);
        assert_eq!(framer.buffered(), "");

        // The framer is usable again afterwards.
        assert_eq!(framer.parse_chunk(IQ).unwrap(), vec![IQ]);
    }

    #[tokio::test]
    async fn consume_delivers_fragments_before_overflow() {
        let chunks = stream::iter([
            Ok("<iq id=\"1\"/><presence from=\"somebody-long@ap1.pvp.net\">".to_owned()),
            Ok(IQ.to_owned()),
        ]);
        let mut batches = Vec::new();

        let err = Framer::new(32)
            .consume(chunks, |fragments| batches.push(fragments))
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::BufferOverflow { limit: 32 }));
        assert_eq!(batches, vec![vec!["<iq id=\"1\"/>".to_owned()]]);
    }

    #[test]
    fn multibyte_text_is_split_safely() -> Result<(), StreamError> {
        let fragment = "<iq id=\"1\"><body>héllo wörld</body></iq>";
        let mut framer = Framer::default();
        let mut emitted = Vec::new();

        for (index, c) in fragment.char_indices() {
            emitted.extend(framer.parse_chunk(&fragment[index..index + c.len_utf8()])?);
        }

        assert_eq!(emitted, vec![fragment]);

        Ok(())
    }

    #[tokio::test]
    async fn consume_stops_at_empty_chunk() -> Result<(), StreamError> {
        let (head, tail) = IQ.split_at(10);
        let chunks = stream::iter(
            [head, tail, "", PRESENCE]
                .into_iter()
                .map(|chunk| Ok(chunk.to_owned())),
        );
        let mut batches = Vec::new();

        Framer::default()
            .consume(chunks, |fragments| batches.push(fragments))
            .await?;

        assert_eq!(batches, vec![vec![IQ.to_owned()]]);

        Ok(())
    }

    #[tokio::test]
    async fn consume_propagates_source_errors() {
        let chunks = stream::iter([Ok(IQ.to_owned()), Err(StreamError::ConnectionClosed)]);
        let mut count = 0;

        let err = Framer::default()
            .consume(chunks, |fragments| count += fragments.len())
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::ConnectionClosed));
        assert_eq!(count, 1);
    }
}
