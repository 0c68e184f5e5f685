//! Stream metadata carried by every element.

/// Identifier of the codec carried by a stream. The engine never decodes;
/// this is metadata handed between elements and observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecFormat {
    /// Unknown or not yet detected.
    #[default]
    Unknown,
    /// Raw PCM samples.
    Pcm,
    /// AAC compressed audio.
    Aac,
    /// MP3 compressed audio.
    Mp3,
    /// Opus compressed audio.
    Opus,
    /// G.711 a-law.
    G711a,
    /// G.711 u-law.
    G711u,
    /// G.722 wideband.
    G722,
    /// SBC (Bluetooth) audio.
    Sbc,
    /// WAV container.
    Wav,
}

/// Stream metadata and position accounting for one element.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u8,
    /// Bit depth.
    pub bits: u8,
    /// Codec carried by the stream.
    pub codec: CodecFormat,
    /// Average bit rate in bits per second, when known.
    pub bit_rate: u32,
    /// Stream duration in milliseconds, when known.
    pub duration_ms: u32,
    /// Bytes processed so far.
    pub byte_pos: u64,
    /// Total stream length in bytes, when known.
    pub total_bytes: u64,
    /// Source locator, when the element reads from an addressable source.
    pub uri: Option<String>,
}

impl Default for StreamInfo {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            bits: 16,
            codec: CodecFormat::default(),
            bit_rate: 0,
            duration_ms: 0,
            byte_pos: 0,
            total_bytes: 0,
            uri: None,
        }
    }
}

impl StreamInfo {
    /// The fields whose change triggers a republish through the bus.
    pub(crate) fn signature(&self) -> (u32, u8, u8, CodecFormat) {
        (self.sample_rate, self.channels, self.bits, self.codec)
    }
}
