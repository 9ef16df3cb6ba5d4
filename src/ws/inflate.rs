//! Zlib stream shared by every frame of one connection.

use miniz_oxide::{
    inflate::stream::{inflate, InflateState},
    DataFormat, MZError, MZFlush, MZStatus,
};

/// Suffix the server appends to the last frame of a flushed message.
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

const CHUNK_SIZE: usize = 128 * 1024;

/// Streaming zlib decompressor.
///
/// The dictionary persists across frames, so one instance must see every frame of a
/// connection in order, and a fresh one is needed for each new connection.
pub struct Inflater {
    state: Box<InflateState>,
    chunk: Vec<u8>,
    output: Vec<u8>,
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater")
            .field("pending", &self.output.len())
            .finish()
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

impl Inflater {
    /// Create a decompressor with an empty dictionary.
    pub fn new() -> Self {
        Self {
            state: InflateState::new_boxed(DataFormat::Zlib),
            chunk: vec![0; CHUNK_SIZE],
            output: Vec::new(),
        }
    }

    /// Feed one frame.
    ///
    /// Returns the whole decompressed message once a frame ends with [`ZLIB_SUFFIX`],
    /// `None` while the message is still incomplete.
    pub fn push(&mut self, data: &[u8]) -> Result<Option<Vec<u8>>, MZError> {
        let mut input = data;

        loop {
            let result = inflate(&mut self.state, input, &mut self.chunk, MZFlush::None);
            self.output
                .extend_from_slice(&self.chunk[..result.bytes_written]);
            input = &input[result.bytes_consumed..];

            match result.status {
                Ok(MZStatus::StreamEnd) => break,
                Ok(_) => {}
                // no progress possible until more input arrives
                Err(MZError::Buf) if result.bytes_consumed == 0 && result.bytes_written == 0 => {
                    break
                }
                Err(err) => {
                    self.output.clear();
                    return Err(err);
                }
            }

            if input.is_empty() && result.bytes_written < self.chunk.len() {
                break;
            }
        }

        if data.ends_with(&ZLIB_SUFFIX) {
            log::trace!("Inflated message of {} bytes", self.output.len());
            Ok(Some(std::mem::take(&mut self.output)))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use miniz_oxide::deflate::core::{
        compress, create_comp_flags_from_zip_params, CompressorOxide, TDEFLFlush,
    };

    /// zlib stream with one sync flush per message, the way the gateway sends it
    pub(crate) fn compress_messages(messages: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut compressor = CompressorOxide::new(create_comp_flags_from_zip_params(6, 15, 0));
        let mut frames = Vec::new();
        for message in messages {
            let mut out = vec![0; 4096];
            let (_, _, written) = compress(&mut compressor, message, &mut out, TDEFLFlush::Sync);
            out.truncate(written);
            frames.push(out);
        }
        frames
    }

    #[test]
    fn test_inflate_keeps_dictionary_between_messages() {
        let first = br#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
        let second = br#"{"op":11,"d":null}"#;
        let frames = compress_messages(&[first, second]);
        assert!(frames.iter().all(|frame| frame.ends_with(&ZLIB_SUFFIX)));

        let mut inflater = Inflater::new();
        assert_eq!(inflater.push(&frames[0]).unwrap().unwrap(), first.to_vec());
        assert_eq!(inflater.push(&frames[1]).unwrap().unwrap(), second.to_vec());
    }

    #[test]
    fn test_inflate_waits_for_suffix() {
        let message = br#"{"op":1,"d":null}"#;
        let frame = compress_messages(&[message]).remove(0);
        let (head, tail) = frame.split_at(frame.len() / 2);

        let mut inflater = Inflater::new();
        assert!(inflater.push(head).unwrap().is_none());
        assert_eq!(inflater.push(tail).unwrap().unwrap(), message.to_vec());
    }

    #[test]
    fn test_inflate_rejects_garbage() {
        let mut inflater = Inflater::new();
        let mut garbage = vec![0x12, 0x34, 0x56, 0x78, 0x9a];
        garbage.extend_from_slice(&ZLIB_SUFFIX);
        assert!(inflater.push(&garbage).is_err());
    }
}
