//! `ENCRYPTED`-Umschlag
//!
//! Nach dem ECDH-Austausch wird jeder Control-Frame vollstaendig (inklusive
//! Signatur und CRC) mit dem Session-Schluessel versiegelt und als Body
//! eines aeusseren `ENCRYPTED`-Frames mit derselben Id verschickt.

use streamsound_core::{Result, StreamError};
use streamsound_crypto::{aead, SessionKey};

use crate::body::MessageBody;
use crate::error::from_crypto;
use crate::frame::{self, Message};
use crate::magic::Magic;

/// Versiegelt einen fertig kodierten inneren Frame
pub fn wrap(inner: &[u8], key: &SessionKey) -> Result<MessageBody> {
    let sealed = aead::seal(key.as_bytes(), inner).map_err(from_crypto)?;
    Ok(MessageBody::Sealed(sealed))
}

/// Oeffnet einen `ENCRYPTED`-Frame und dekodiert den inneren Frame
///
/// Der innere Frame muss dieselbe Id tragen und darf selbst kein
/// `ENCRYPTED` sein. Seine Signatur prueft der Aufrufer.
pub fn unwrap(outer: &Message, key: &SessionKey) -> Result<Message> {
    let MessageBody::Sealed(sealed) = &outer.body else {
        return Err(StreamError::FrameInvalid(format!(
            "{}: Body ist {} statt Sealed",
            outer.magic,
            outer.body.art()
        )));
    };
    if outer.magic != Magic::Encrypted {
        return Err(StreamError::FrameInvalid(format!(
            "{} ist kein ENCRYPTED-Frame",
            outer.magic
        )));
    }
    let inner_bytes = aead::open(key.as_bytes(), sealed).map_err(from_crypto)?;
    let inner = frame::decode_exact(&inner_bytes)?;
    if inner.magic == Magic::Encrypted {
        return Err(StreamError::FrameInvalid(
            "verschachtelter ENCRYPTED-Frame".into(),
        ));
    }
    if inner.id != outer.id {
        return Err(StreamError::FrameInvalid(format!(
            "innere Id {} passt nicht zur aeusseren Id {}",
            inner.id, outer.id
        )));
    }
    Ok(inner)
}
