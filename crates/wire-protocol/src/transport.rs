//! Postcard framing for tarpc transports.
//!
//! Every crosswire channel carries tarpc frames as length-delimited postcard
//! messages. [`PostcardFormat`] plugs into `tarpc::serde_transport` on both
//! ends; the stream underneath may be plain TCP, a Unix socket, or either of
//! those wrapped in TLS.

use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tarpc::tokio_serde::{Deserializer, Serializer};
use tokio_util::bytes;

/// Postcard serialization format for tarpc.
#[derive(Default, Clone, Debug)]
pub struct PostcardFormat;

impl<Item> Serializer<Item> for PostcardFormat
where
    Item: Serialize,
{
    type Error = std::io::Error;

    fn serialize(self: Pin<&mut Self>, item: &Item) -> Result<bytes::Bytes, Self::Error> {
        let serialized = postcard::to_allocvec(item)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(bytes::Bytes::from(serialized))
    }
}

impl<Item> Deserializer<Item> for PostcardFormat
where
    Item: for<'de> Deserialize<'de>,
{
    type Error = std::io::Error;

    fn deserialize(self: Pin<&mut Self>, src: &bytes::BytesMut) -> Result<Item, Self::Error> {
        postcard::from_bytes(src)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarpc::tokio_serde::{Deserializer, Serializer};

    #[test]
    fn round_trips_via_postcard() {
        let mut format = PostcardFormat;
        let item = ("greeting".to_string(), vec![1u8, 2, 3]);
        let bytes = Pin::new(&mut format).serialize(&item).unwrap();
        let buf = bytes::BytesMut::from(&bytes[..]);
        let back: (String, Vec<u8>) = Pin::new(&mut format).deserialize(&buf).unwrap();
        assert_eq!(back, item);
    }
}
