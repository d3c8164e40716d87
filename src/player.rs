//! External playback sink
//!
//! Physical rendering is delegated to an external player process; the
//! pipeline only needs the blocking `play` contract. `ProcessPlayer`
//! hands each chunk over as a temp WAV file.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::PlaybackError;

/// Renders one chunk of PCM16 audio, returning once playback finished
#[async_trait]
pub trait PlayerSink: Send + Sync + 'static {
    async fn play(
        &self,
        data: Bytes,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(), PlaybackError>;
}

/// Plays chunks by writing a temp WAV and invoking a player command
#[cfg(feature = "wav-player")]
#[derive(Debug, Clone)]
pub struct ProcessPlayer {
    command: String,
    args: Vec<String>,
}

#[cfg(feature = "wav-player")]
impl ProcessPlayer {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[cfg(feature = "wav-player")]
impl Default for ProcessPlayer {
    fn default() -> Self {
        Self::new("aplay", vec!["-q".to_string()])
    }
}

#[cfg(feature = "wav-player")]
fn write_wav(
    path: &std::path::Path,
    data: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<(), PlaybackError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| PlaybackError::WavWrite(e.to_string()))?;
    // Trailing odd byte cannot form a PCM16 sample and is ignored.
    for sample in data.chunks_exact(2) {
        let value = i16::from_le_bytes([sample[0], sample[1]]);
        writer
            .write_sample(value)
            .map_err(|e| PlaybackError::WavWrite(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| PlaybackError::WavWrite(e.to_string()))?;
    Ok(())
}

#[cfg(feature = "wav-player")]
#[async_trait]
impl PlayerSink for ProcessPlayer {
    async fn play(
        &self,
        data: Bytes,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(), PlaybackError> {
        let path = std::env::temp_dir().join(format!("voicelink-{}.wav", uuid::Uuid::new_v4()));
        let wav_path = path.clone();
        let written = tokio::task::spawn_blocking(move || {
            write_wav(&wav_path, &data, sample_rate, channels)
        })
        .await
        .unwrap_or_else(|e| Err(PlaybackError::WavWrite(e.to_string())));
        if let Err(err) = written {
            // A failed write can still leave a partial file behind
            let _ = std::fs::remove_file(&path);
            return Err(err);
        }

        let status = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .arg(&path)
            .status()
            .await;
        let _ = std::fs::remove_file(&path);

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(PlaybackError::PlayerExit(status.code().unwrap_or(-1))),
            Err(e) => Err(PlaybackError::SpawnFailed(e.to_string())),
        }
    }
}
