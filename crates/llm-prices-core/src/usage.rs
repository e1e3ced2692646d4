use serde::{Deserialize, Serialize};

/// Token-priced usage dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    #[serde(rename = "input_tokens")]
    Input,
    #[serde(rename = "cache_write_tokens")]
    CacheWrite,
    #[serde(rename = "cache_read_tokens")]
    CacheRead,
    #[serde(rename = "output_tokens")]
    Output,
    #[serde(rename = "input_audio_tokens")]
    InputAudio,
    #[serde(rename = "cache_audio_read_tokens")]
    CacheAudioRead,
    #[serde(rename = "output_audio_tokens")]
    OutputAudio,
}

impl Dimension {
    pub const ALL: [Dimension; 7] = [
        Self::Input,
        Self::CacheWrite,
        Self::CacheRead,
        Self::Output,
        Self::InputAudio,
        Self::CacheAudioRead,
        Self::OutputAudio,
    ];

    /// Output-class dimensions are billed into `output_price`, the rest into `input_price`.
    pub fn is_output(self) -> bool {
        matches!(self, Self::Output | Self::OutputAudio)
    }
}

/// Token and request counts for one API call. Unset dimensions are not billed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_audio_read_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_tokens: Option<u64>,
    /// Number of requests; treated as 1 when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests: Option<u64>,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            ..Self::default()
        }
    }

    pub fn get(&self, dim: Dimension) -> Option<u64> {
        match dim {
            Dimension::Input => self.input_tokens,
            Dimension::CacheWrite => self.cache_write_tokens,
            Dimension::CacheRead => self.cache_read_tokens,
            Dimension::Output => self.output_tokens,
            Dimension::InputAudio => self.input_audio_tokens,
            Dimension::CacheAudioRead => self.cache_audio_read_tokens,
            Dimension::OutputAudio => self.output_audio_tokens,
        }
    }

    fn slot(&mut self, dim: Dimension) -> &mut Option<u64> {
        match dim {
            Dimension::Input => &mut self.input_tokens,
            Dimension::CacheWrite => &mut self.cache_write_tokens,
            Dimension::CacheRead => &mut self.cache_read_tokens,
            Dimension::Output => &mut self.output_tokens,
            Dimension::InputAudio => &mut self.input_audio_tokens,
            Dimension::CacheAudioRead => &mut self.cache_audio_read_tokens,
            Dimension::OutputAudio => &mut self.output_audio_tokens,
        }
    }

    pub fn set(&mut self, dim: Dimension, count: u64) {
        *self.slot(dim) = Some(count);
    }

    /// Add to a dimension, starting from zero if it was unset.
    pub fn add(&mut self, dim: Dimension, count: u64) {
        let slot = self.slot(dim);
        *slot = Some(slot.unwrap_or(0).saturating_add(count));
    }

    pub fn request_count(&self) -> u64 {
        self.requests.unwrap_or(1)
    }

    pub fn is_empty(&self) -> bool {
        Dimension::ALL.iter().all(|d| self.get(*d).is_none())
    }
}
