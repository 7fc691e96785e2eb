//! Frame codec: a 4-byte big-endian length prefix carrying a MessagePack
//! `TransportMessage`.

use std::io;
use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use courier_core::{Codec, CodecError, MsgPackCodec};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Failure reading or writing a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("frame payload invalid: {0}")]
    Codec(#[from] CodecError),
}

/// Encodes `Out` frames and decodes `In` frames on one stream.
///
/// The client side is `TransportCodec<TransportMessage<InvokeMessage>,
/// TransportMessage<ServiceResult>>`; the server side is the reverse.
#[derive(Debug)]
pub struct TransportCodec<Out, In> {
    framing: LengthDelimitedCodec,
    codec: MsgPackCodec,
    _types: PhantomData<fn(Out) -> In>,
}

impl<Out, In> TransportCodec<Out, In> {
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            framing: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_length)
                .new_codec(),
            codec: MsgPackCodec,
            _types: PhantomData,
        }
    }
}

impl<Out, In> Clone for TransportCodec<Out, In> {
    fn clone(&self) -> Self {
        Self {
            framing: self.framing.clone(),
            codec: self.codec,
            _types: PhantomData,
        }
    }
}

impl<Out: Serialize, In> Encoder<Out> for TransportCodec<Out, In> {
    type Error = FrameError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = self.codec.serialize(&item)?;
        self.framing.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}

impl<Out, In: DeserializeOwned> Decoder for TransportCodec<Out, In> {
    type Item = In;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.framing.decode(src)? {
            Some(frame) => Ok(Some(self.codec.deserialize(&frame)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{InvokeMessage, Metadata, TransportMessage, Value};

    use super::*;

    type Request = TransportMessage<InvokeMessage>;

    #[test]
    fn frame_is_length_prefixed() {
        let mut codec = TransportCodec::<Request, Request>::new(1024);
        let mut buf = BytesMut::new();
        let frame = TransportMessage::new(
            "id-1",
            InvokeMessage::new("Calc/Add", vec![Value::from(2)], Metadata::new()),
        );
        codec.encode(frame.clone(), &mut buf).unwrap();

        let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(declared, buf.len() - 4);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut codec = TransportCodec::<Request, Request>::new(1024);
        let mut full = BytesMut::new();
        codec
            .encode(
                TransportMessage::new("id-2", InvokeMessage::default()),
                &mut full,
            )
            .unwrap();

        let mut partial = full.split_to(full.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = TransportCodec::<Request, Request>::new(8);
        let mut buf = BytesMut::new();
        let result = codec.encode(
            TransportMessage::new("a-rather-long-id", InvokeMessage::default()),
            &mut buf,
        );
        assert!(matches!(result, Err(FrameError::Io(_))));
    }

    #[test]
    fn garbage_payload_is_a_codec_error() {
        let mut codec = TransportCodec::<Request, Request>::new(1024);
        let mut buf = BytesMut::from(&[0, 0, 0, 1, 0xc1][..]);
        assert!(matches!(codec.decode(&mut buf), Err(FrameError::Codec(_))));
    }
}
