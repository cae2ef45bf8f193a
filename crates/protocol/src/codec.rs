//! tokio-util Codec fuer den Control-Kanal
//!
//! Implementiert `Encoder<Outgoing>` und `Decoder` fuer nahtlose
//! Integration mit `tokio_util::codec::Framed`. Der Encoder signiert mit
//! der Geraete-Identitaet, vergibt die QueueNum und verpackt auf Wunsch in
//! einen `ENCRYPTED`-Umschlag. Der Decoder synchronisiert sich nach
//! kaputten Frames selbst neu.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::codec::Framed;
//! use streamsound_protocol::codec::MessageCodec;
//! use streamsound_crypto::Identity;
//!
//! // let stream = TcpStream::connect(...).await?;
//! // let framed = Framed::new(stream, MessageCodec::new(Arc::new(Identity::generate())));
//! ```

use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use streamsound_core::StreamError;
use streamsound_crypto::{Identity, SessionKey};
use tokio_util::codec::{Decoder, Encoder};

use crate::body::MessageBody;
use crate::envelope;
use crate::frame::{self, DecodeStep, Message};
use crate::magic::Magic;

// ---------------------------------------------------------------------------
// Outgoing
// ---------------------------------------------------------------------------

/// Zu sendende Nachricht
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub magic: Magic,
    pub id: u32,
    pub body: MessageBody,
    /// Falls gesetzt, wird der Frame in `ENCRYPTED` verpackt
    pub seal_with: Option<SessionKey>,
}

impl Outgoing {
    pub fn new(magic: Magic, id: u32, body: MessageBody) -> Self {
        Self {
            magic,
            id,
            body,
            seal_with: None,
        }
    }

    /// Verpackt die Nachricht mit dem Session-Schluessel
    pub fn versiegelt(mut self, key: Option<SessionKey>) -> Self {
        self.seal_with = key;
        self
    }
}

// ---------------------------------------------------------------------------
// MessageCodec
// ---------------------------------------------------------------------------

/// Codec einer Verbindung (QueueNum ist pro Verbindung)
#[derive(Debug)]
pub struct MessageCodec {
    identity: Arc<Identity>,
    next_queue_num: u32,
    verworfen: u64,
}

impl MessageCodec {
    pub fn new(identity: Arc<Identity>) -> Self {
        Self {
            identity,
            next_queue_num: 0,
            verworfen: 0,
        }
    }

    /// Anzahl der bisher verworfenen Frames
    pub fn verworfene_frames(&self) -> u64 {
        self.verworfen
    }

    fn naechste_queue_num(&mut self) -> u32 {
        let n = self.next_queue_num;
        self.next_queue_num = self.next_queue_num.wrapping_add(1);
        n
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match frame::decode(src) {
                DecodeStep::Frame { message, start, end } => {
                    if start > 0 {
                        tracing::debug!(bytes = start, "Muell vor Frame verworfen");
                    }
                    src.advance(end);
                    tracing::trace!(
                        magic = %message.magic,
                        id = message.id,
                        queue_num = message.queue_num,
                        "Frame empfangen"
                    );
                    return Ok(Some(message));
                }
                DecodeStep::NeedMore { keep_from } => {
                    if keep_from > 0 {
                        tracing::debug!(bytes = keep_from, "Muell verworfen, warte auf Daten");
                        src.advance(keep_from);
                    }
                    return Ok(None);
                }
                DecodeStep::Invalid {
                    start,
                    resume_at,
                    error,
                } => {
                    self.verworfen += 1;
                    tracing::warn!(offset = start, fehler = %error, "Ungueltiger Frame verworfen");
                    src.advance(resume_at);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let message = self.decode(buf)?;
        if message.is_none() && !buf.is_empty() {
            tracing::debug!(bytes = buf.len(), "Unvollstaendiger Frame am Verbindungsende");
            buf.clear();
        }
        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl Encoder<Outgoing> for MessageCodec {
    type Error = StreamError;

    fn encode(&mut self, item: Outgoing, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let queue_num = self.naechste_queue_num();
        let mut bytes = frame::encode(&self.identity, item.magic, queue_num, item.id, &item.body)?;

        if let Some(key) = &item.seal_with {
            let body = envelope::wrap(&bytes, key)?;
            let aeussere_queue_num = self.naechste_queue_num();
            bytes = frame::encode(
                &self.identity,
                Magic::Encrypted,
                aeussere_queue_num,
                item.id,
                &body,
            )?;
        }

        tracing::trace!(
            magic = %item.magic,
            id = item.id,
            verschluesselt = item.seal_with.is_some(),
            bytes = bytes.len(),
            "Frame gesendet"
        );
        dst.reserve(bytes.len());
        dst.put_slice(&bytes);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
