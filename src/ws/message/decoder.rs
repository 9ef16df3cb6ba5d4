use super::{error, DecodeError, Packet};
use crate::ws::{inflate::Inflater, socket::Frame};

/// Turns received frames into packets.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    inflater: Option<Inflater>,
}

impl FrameDecoder {
    /// Create a decoder, `compress` enables zlib stream decompression.
    pub fn new(compress: bool) -> Self {
        Self {
            inflater: compress.then(Inflater::new),
        }
    }

    /// Decode one frame.
    ///
    /// Returns `None` for close frames and for compressed frames that do not finish a message.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Packet>, DecodeError> {
        let data = match frame {
            Frame::Text(text) => text.into_bytes(),
            Frame::Binary(data) => data,
            Frame::Fragments(parts) => parts.concat(),
            Frame::Close { .. } => return Ok(None),
        };

        match self.inflater.as_mut() {
            Some(inflater) => match inflater
                .push(&data)
                .map_err(|status| error::Inflate { status }.build())?
            {
                Some(message) => Packet::decode(&message).map(Some),
                None => Ok(None),
            },
            None => Packet::decode(&data).map(Some),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ws::message::Message;

    #[test]
    fn test_decode_text_and_fragments() {
        let mut decoder = FrameDecoder::new(false);

        let packet = decoder
            .push(Frame::Text(r#"{"op":11}"#.to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(packet.message, Message::HeartbeatAck);

        let packet = decoder
            .push(Frame::Fragments(vec![
                br#"{"op":10,"d":{"heartbeat_"#.to_vec(),
                br#"interval":1000}}"#.to_vec(),
            ]))
            .unwrap()
            .unwrap();
        assert_eq!(packet.message.into_hello().unwrap().heartbeat_interval, 1000);
    }

    #[test]
    fn test_close_frame_is_not_data() {
        let mut decoder = FrameDecoder::new(true);
        let result = decoder.push(Frame::Close {
            code: 1000,
            reason: String::new(),
        });
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_decode_error_is_reported() {
        let mut decoder = FrameDecoder::new(false);
        assert!(decoder.push(Frame::Binary(b"{".to_vec())).is_err());
        // the decoder stays usable
        assert!(decoder
            .push(Frame::Binary(br#"{"op":1}"#.to_vec()))
            .unwrap()
            .is_some());
    }
}
