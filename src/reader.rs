//! Incremental, charset-aware reading of newly appended bytes.
//!
//! Bytes are decoded to text with the source charset and then encoded with
//! the destination charset. Decoding runs with `last = false` while data keeps
//! arriving, so a multi-byte character split across two reads is carried in
//! the decoder until its remaining bytes show up.

use encoding_rs::{CoderResult, Decoder, Encoder, EncoderResult, Encoding};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Smallest decode buffer that always leaves room for at least one character.
const MIN_DECODE_CAPACITY: usize = 64;

/// Substituted for characters the destination charset cannot represent.
const UNMAPPABLE_REPLACEMENT: &str = "?";

/// Reusable buffers plus the charset pair for one session.
pub(crate) struct StreamDecoder {
    source: &'static Encoding,
    destination: &'static Encoding,
    read_buffer: Vec<u8>,
    text: String,
    output: Vec<u8>,
}

impl StreamDecoder {
    pub(crate) fn new(
        source: &'static Encoding,
        destination: &'static Encoding,
        read_capacity: usize,
        decode_capacity: usize,
    ) -> Self {
        Self {
            source,
            destination,
            read_buffer: vec![0; read_capacity.max(1)],
            text: String::with_capacity(decode_capacity.max(MIN_DECODE_CAPACITY)),
            output: Vec::new(),
        }
    }

    /// Reads until no more bytes are available, writing transcoded output to `sink`.
    ///
    /// Returns the number of source bytes consumed. On error the caller must
    /// not trust any position past its last confirmed offset.
    pub(crate) async fn pass<R, W>(&mut self, reader: &mut R, sink: &mut W) -> std::io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut transcoder = Transcoder::new(self.source, self.destination);
        let mut consumed = 0u64;

        loop {
            let read = reader.read(&mut self.read_buffer).await?;
            if read == 0 {
                break;
            }
            consumed += read as u64;

            self.output.clear();
            transcoder.feed(&self.read_buffer[..read], false, &mut self.text, &mut self.output);
            if !self.output.is_empty() {
                sink.write_all(&self.output).await?;
            }
        }

        // End of the available data: emit whatever the decoder is still holding.
        self.output.clear();
        transcoder.feed(&[], true, &mut self.text, &mut self.output);
        if !self.output.is_empty() {
            sink.write_all(&self.output).await?;
        }
        sink.flush().await?;

        Ok(consumed)
    }
}

/// A decoder/encoder pair that converts bytes of one charset into bytes of another.
pub struct Transcoder {
    decoder: Decoder,
    encoder: Encoder,
}

impl Transcoder {
    pub fn new(source: &'static Encoding, destination: &'static Encoding) -> Self {
        Self {
            decoder: source.new_decoder_without_bom_handling(),
            encoder: destination.new_encoder(),
        }
    }

    /// Decodes `input` and appends the re-encoded result to `output`.
    ///
    /// `text` is scratch space and is left empty. Malformed input becomes
    /// U+FFFD; characters the destination cannot hold become `?`. With
    /// `last = false` an incomplete trailing sequence stays in the decoder.
    pub fn feed(&mut self, mut input: &[u8], last: bool, text: &mut String, output: &mut Vec<u8>) {
        loop {
            if text.capacity() - text.len() < MIN_DECODE_CAPACITY {
                text.reserve(MIN_DECODE_CAPACITY);
            }
            let (result, read, _) = self.decoder.decode_to_string(input, text, last);
            input = &input[read..];

            self.encode(text, false, output);
            text.clear();

            if result == CoderResult::InputEmpty {
                break;
            }
        }

        if last {
            // Stateful encodings (ISO-2022-JP) return to their initial shift state here.
            self.encode("", true, output);
        }
    }

    fn encode(&mut self, mut text: &str, last: bool, output: &mut Vec<u8>) {
        if let Some(needed) = self
            .encoder
            .max_buffer_length_from_utf8_without_replacement(text.len())
        {
            output.reserve(needed);
        }

        loop {
            let (result, read) =
                self.encoder
                    .encode_from_utf8_to_vec_without_replacement(text, output, last);
            text = &text[read..];

            match result {
                EncoderResult::InputEmpty => break,
                EncoderResult::OutputFull => output.reserve(text.len().max(16) * 4),
                EncoderResult::Unmappable(_) => self.encode(UNMAPPABLE_REPLACEMENT, false, output),
            }
        }
    }
}

/// Detect if the file was truncated by comparing current size with last position
pub(crate) fn detect_file_truncation(current_size: u64, last_position: u64) -> bool {
    current_size < last_position
}
