//! Chromaprint fingerprints over decoded previews.

use rusty_chromaprint::{Configuration, Fingerprinter};

use crate::error::{PipelineError, PipelineResult};

use super::decoder::decode_media;

/// Chromaprint's preferred input rate.
const FINGERPRINT_SAMPLE_RATE: u32 = 11025;

/// An uncompressed fingerprint with the measured clip duration.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFingerprint {
    pub items: Vec<u32>,
    pub duration_s: f64,
}

impl RawFingerprint {
    /// Distinct item count, the diversity measure used to reject
    /// near-silent clips.
    #[must_use]
    pub fn unique_items(&self) -> usize {
        let mut sorted = self.items.clone();
        sorted.sort_unstable();
        sorted.dedup();
        sorted.len()
    }

    /// Little-endian item blob, as stored on the source row.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.items.len() * 4);
        for item in &self.items {
            bytes.extend_from_slice(&item.to_le_bytes());
        }
        bytes
    }

    /// Inverse of [`Self::to_bytes`].
    pub fn items_from_bytes(bytes: &[u8]) -> PipelineResult<Vec<u32>> {
        if bytes.len() % 4 != 0 {
            return Err(PipelineError::Audio(format!(
                "fingerprint blob length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

/// Decode a media blob and fingerprint it.
pub fn fingerprint_media(bytes: Vec<u8>, ext_hint: &str) -> PipelineResult<RawFingerprint> {
    let audio = decode_media(bytes, ext_hint, FINGERPRINT_SAMPLE_RATE)?;

    let config = Configuration::preset_test2();
    let mut fpr = Fingerprinter::new(&config);

    #[allow(clippy::cast_possible_truncation)]
    let samples: Vec<i16> = audio
        .samples
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect();

    fpr.start(audio.sample_rate, 1)
        .map_err(|e| PipelineError::Audio(format!("fingerprinter rejected stream: {e}")))?;
    fpr.consume(&samples);
    fpr.finish();

    Ok(RawFingerprint {
        items: fpr.fingerprint().to_vec(),
        duration_s: audio.duration_s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_round_trip() {
        let fp = RawFingerprint {
            items: vec![0, 1, 0xdead_beef, u32::MAX],
            duration_s: 30.0,
        };
        let bytes = fp.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(RawFingerprint::items_from_bytes(&bytes).unwrap(), fp.items);
    }

    #[test]
    fn ragged_blob_rejected() {
        assert!(RawFingerprint::items_from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn unique_items_counts_distinct() {
        let fp = RawFingerprint {
            items: vec![7, 7, 8, 8, 9],
            duration_s: 1.0,
        };
        assert_eq!(fp.unique_items(), 3);
    }
}
