//! Runtime settings of connections and the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tabula_compress::{Codec, Lz4Codec, SharedStatsRateEvaluator};
use tabula_config::{CompressionConfig, TabulaConfig};
use tabula_types::{Consistency, ProtocolVersion};

use crate::error::{ClientError, ClientResult};
use crate::frame::MAX_BODY_SIZE;

/// Configuration for connections and request dispatch.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub protocol_version: ProtocolVersion,
    /// Consistency used when a statement does not set one.
    pub consistency: Consistency,
    /// How long a request waits for its response.
    pub request_timeout: Duration,
    /// Largest frame body accepted from the server.
    pub max_frame_size: usize,
    /// Idle outgoing frame buffers kept per connection.
    pub buffer_pool_size: usize,
    /// Client-side value compression; `None` disables it.
    pub compression: Option<CompressionConfig>,
    /// Learn tablets from responses and route by them.
    pub tablet_aware: bool,
    /// Coalesce event-triggered refreshes.
    pub debounce_refresh: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::V4,
            consistency: Consistency::default(),
            request_timeout: Duration::from_secs(12),
            max_frame_size: MAX_BODY_SIZE,
            buffer_pool_size: 64,
            compression: None,
            tablet_aware: true,
            debounce_refresh: true,
        }
    }
}

impl ClientConfig {
    /// Builds the configured value codec, if compression is enabled.
    pub fn value_codec(&self) -> ClientResult<Option<Arc<dyn Codec>>> {
        let Some(settings) = &self.compression else {
            return Ok(None);
        };
        let codec = Lz4Codec::new()
            .with_prefix(settings.prefix.as_bytes())?
            .with_threshold(settings.threshold)
            .with_max_uncompressed(settings.max_uncompressed);
        let codec: Arc<dyn Codec> = if settings.adaptive {
            Arc::new(codec.with_evaluator(SharedStatsRateEvaluator::new(settings.target_ratio)))
        } else {
            Arc::new(codec)
        };
        Ok(Some(codec))
    }
}

impl TryFrom<&TabulaConfig> for ClientConfig {
    type Error = ClientError;

    fn try_from(config: &TabulaConfig) -> ClientResult<Self> {
        let protocol_version = ProtocolVersion::try_from(config.connection.protocol_version)?;
        Ok(Self {
            protocol_version,
            consistency: config.connection.consistency,
            request_timeout: Duration::from_millis(config.connection.request_timeout_ms),
            max_frame_size: config.connection.max_frame_size,
            buffer_pool_size: config.connection.buffer_pool_size,
            compression: config
                .compression
                .enabled
                .then(|| config.compression.clone()),
            tablet_aware: config.routing.tablet_aware,
            debounce_refresh: config.routing.debounce_refresh,
        })
    }
}
