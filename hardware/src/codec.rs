//! MP3 decoding for network streams.
//!
//! The stream arrives as byte chunks over a channel and leaves as 16-bit
//! little-endian interleaved stereo, ready for the I2S writer.

use std::io::{self, Read};
use std::sync::mpsc::Receiver;
use std::sync::{Mutex, PoisonError};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{HardwareError, MusicInfo};

/// Blocking reader over chunks handed in by a fetch thread. A closed
/// channel reads as end of stream.
pub struct ChunkReader {
    chunks: Mutex<Receiver<io::Result<Vec<u8>>>>,
    pending: Vec<u8>,
    pos: usize,
}

impl ChunkReader {
    pub fn new(chunks: Receiver<io::Result<Vec<u8>>>) -> Self {
        Self {
            chunks: Mutex::new(chunks),
            pending: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.pending.len() {
            let chunks = self.chunks.get_mut().unwrap_or_else(PoisonError::into_inner);
            match chunks.recv() {
                Ok(Ok(chunk)) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// One decoded MP3 frame.
pub struct Frame {
    pub info: MusicInfo,
    pub pcm: Vec<u8>,
}

pub struct Mp3Stream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    samples: Option<SampleBuffer<i16>>,
}

impl Mp3Stream {
    /// Detect the stream format and set up the decoder. Blocks until
    /// enough bytes for the first frame header have arrived.
    pub fn open<R>(reader: R) -> Result<Self, HardwareError>
    where
        R: Read + Send + Sync + 'static,
    {
        let source = MediaSourceStream::new(
            Box::new(ReadOnlySource::new(reader)),
            Default::default(),
        );
        let mut hint = Hint::new();
        hint.with_extension("mp3");

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                source,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(map_codec_err)?;
        let format = probed.format;
        let track = format
            .default_track()
            .ok_or(HardwareError::Audio("stream without audio track"))?;
        let track_id = track.id;
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(map_codec_err)?;

        Ok(Self {
            format,
            decoder,
            track_id,
            samples: None,
        })
    }

    /// Next decoded frame, `None` at end of stream. Corrupt frames are
    /// skipped.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, HardwareError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err))
                    if err.kind() == io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(err) => return Err(map_codec_err(err)),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(err)) => {
                    log::debug!("mp3: skipping bad frame: {err}");
                    continue;
                }
                Err(err) => return Err(map_codec_err(err)),
            };

            let spec = *decoded.spec();
            let frames = decoded.capacity() as u64;
            let needed = decoded.capacity() * spec.channels.count();
            if self.samples.as_ref().map_or(true, |buf| buf.capacity() < needed) {
                self.samples = Some(SampleBuffer::new(frames, spec));
            }
            let Some(samples) = self.samples.as_mut() else {
                continue;
            };
            samples.copy_interleaved_ref(decoded);

            let channels = spec.channels.count();
            return Ok(Some(Frame {
                info: MusicInfo {
                    sample_rate: spec.rate,
                    bits: 16,
                    channels: 2,
                },
                pcm: to_stereo_bytes(samples.samples(), channels),
            }));
        }
    }
}

/// Interleaved samples with `channels` per frame to 16-bit LE stereo.
/// Mono is duplicated, extra channels are dropped.
pub fn to_stereo_bytes(samples: &[i16], channels: usize) -> Vec<u8> {
    let channels = channels.max(1);
    let mut out = Vec::with_capacity(samples.len() / channels * 4);
    for frame in samples.chunks_exact(channels) {
        let left = frame[0];
        let right = frame.get(1).copied().unwrap_or(left);
        out.extend_from_slice(&left.to_le_bytes());
        out.extend_from_slice(&right.to_le_bytes());
    }
    out
}

fn map_codec_err(err: SymphoniaError) -> HardwareError {
    log::error!("mp3 error: {err}");
    match err {
        SymphoniaError::IoError(_) => HardwareError::Audio("stream read"),
        SymphoniaError::Unsupported(_) => HardwareError::Unsupported("stream format"),
        _ => HardwareError::Audio("mp3 decode"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::channel;

    use super::*;

    #[test]
    fn chunks_read_back_in_order() {
        let (tx, rx) = channel();
        tx.send(Ok(vec![1, 2, 3])).unwrap();
        tx.send(Ok(vec![])).unwrap();
        tx.send(Ok(vec![4, 5])).unwrap();
        drop(tx);

        let mut body = Vec::new();
        ChunkReader::new(rx).read_to_end(&mut body).unwrap();
        assert_eq!(body, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn fetch_errors_surface_from_read() {
        let (tx, rx) = channel();
        tx.send(Err(io::Error::other("connection reset"))).unwrap();
        let mut buf = [0u8; 4];
        assert!(ChunkReader::new(rx).read(&mut buf).is_err());
    }

    #[test]
    fn stereo_conversion() {
        assert_eq!(to_stereo_bytes(&[1, -1], 2), [1, 0, 0xff, 0xff]);
        // mono is doubled
        assert_eq!(to_stereo_bytes(&[2, 3], 1), [2, 0, 2, 0, 3, 0, 3, 0]);
        // surround keeps front left and right
        assert_eq!(to_stereo_bytes(&[1, 2, 9, 9, 9, 9], 6), [1, 0, 2, 0]);
    }

    #[test]
    fn non_mp3_body_is_rejected() {
        let (tx, rx) = channel();
        tx.send(Ok(b"<html>not audio</html>".to_vec())).unwrap();
        drop(tx);
        assert!(Mp3Stream::open(ChunkReader::new(rx)).is_err());
    }
}
