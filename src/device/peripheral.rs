use crate::error::Result;

/// Microphone handle. Dropping it releases the input peripheral.
pub trait CaptureStream: Send {
    /// Read up to `buf.len()` bytes of 16-bit PCM. Returns bytes read (0 if none ready).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Speaker handle. Dropping it releases the output peripheral.
pub trait PlaybackSink: Send {
    /// Write one segment of 16-bit PCM.
    ///
    /// Returns once the samples are handed to the hardware, not when they
    /// finish sounding.
    fn write(&mut self, pcm: &[u8]) -> Result<()>;
}

/// Audio peripheral provider
///
/// Implementations:
/// - `WavPeripherals`: WAV files standing in for microphone and speaker
/// - test doubles asserting that input and output are never held together
pub trait AudioPeripherals: Send {
    /// Acquire the input peripheral at `sample_rate`
    fn open_input(&mut self, sample_rate: u32) -> Result<Box<dyn CaptureStream>>;

    /// Acquire the output peripheral at `sample_rate`
    fn open_output(&mut self, sample_rate: u32) -> Result<Box<dyn PlaybackSink>>;

    /// Hint that released buffers may be reclaimed now
    fn reclaim(&mut self) {}

    /// Get provider name for logging
    fn name(&self) -> &str;
}
