//! Builder pattern for `StreamRip`.

use std::path::PathBuf;
use std::sync::Arc;

use url::Url;

use crate::event::spawn_dispatcher;
use crate::format::{SymphoniaVolumeDecoder, VolumeDecoder};
use crate::metadata::RuleSet;
use crate::pipeline::{spawn_producer, Producer, Ripper, StreamState, TrackRouter};
use crate::session::{Session, SessionState};
use crate::sink::{FileSink, TrackSink};
use crate::source::http::redact;
use crate::{relay, status_callback, RipConfig, RipError, StatusCallback, StatusEvent};

/// Builder for configuring and starting a rip.
///
/// Use [`StreamRip::builder()`] to create a new builder.
///
/// # Example
///
/// ```no_run
/// use stream_rip::{RipConfig, StreamRip};
///
/// let session = StreamRip::builder()
///     .url("http://radio.example.com:8000/stream")
///     .config(RipConfig::default())
///     .output_dir("rips")
///     .on_status(|event| println!("{event:?}"))
///     .start()?;
///
/// println!("relay on port {:?}", session.relay_port());
/// session.wait()?;
/// # Ok::<(), stream_rip::RipError>(())
/// ```
///
/// [`StreamRip::builder()`]: crate::StreamRip::builder
#[must_use]
pub struct RipBuilder {
    url: Option<String>,
    config: RipConfig,
    sinks: Vec<Box<dyn TrackSink>>,
    /// Directory for a [`FileSink`] created at start with the configured
    /// overwrite policy.
    output_dir: Option<PathBuf>,
    status_callback: Option<StatusCallback>,
    decoder: Option<Box<dyn VolumeDecoder>>,
}

impl Default for RipBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RipBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            url: None,
            config: RipConfig::default(),
            sinks: Vec::new(),
            output_dir: None,
            status_callback: None,
            decoder: None,
        }
    }

    /// Stream or playlist URL. `http://` only; credentials in the URL are
    /// sent as basic auth.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the session configuration.
    pub fn config(mut self, config: RipConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a sink that receives every saved track.
    pub fn add_sink<S: TrackSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Save tracks as files under `dir`.
    ///
    /// Shorthand for a [`FileSink`] using the configured
    /// [`overwrite`](RipConfig::overwrite) policy.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Set a callback to receive status events.
    ///
    /// The callback runs on a dedicated dispatcher thread, in event order.
    pub fn on_status<F>(mut self, callback: F) -> Self
    where
        F: Fn(StatusEvent) + Send + Sync + 'static,
    {
        self.status_callback = Some(status_callback(callback));
        self
    }

    /// Replace the decoder used to find quiet split points in MP3 streams.
    pub fn volume_decoder<D: VolumeDecoder + 'static>(mut self, decoder: D) -> Self {
        self.decoder = Some(Box::new(decoder));
        self
    }

    fn parse_url(&self) -> Result<Url, RipError> {
        let raw = self
            .url
            .as_deref()
            .ok_or_else(|| RipError::Config("no stream url configured".into()))?;
        let url = Url::parse(raw).map_err(|e| RipError::Config(format!("invalid url: {e}")))?;
        if url.scheme() != "http" {
            return Err(RipError::Config(format!(
                "unsupported url scheme `{}`",
                url.scheme()
            )));
        }
        Ok(url)
    }

    /// Validates the builder configuration.
    fn validate(&self) -> Result<Url, RipError> {
        let url = self.parse_url()?;
        self.config.validate()?;
        if self.sinks.is_empty() && self.output_dir.is_none() && !self.config.relay.enabled {
            return Err(RipError::Config(
                "nothing to do: no sinks configured and the relay is disabled".into(),
            ));
        }
        Ok(url)
    }

    /// Start ripping.
    ///
    /// Connecting happens on the producer thread; connection problems are
    /// reported through status events, not here.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The URL is missing or invalid
    /// - The configuration is inconsistent
    /// - The metadata rules can't be loaded
    /// - The relay port can't be bound
    /// - A background thread can't be spawned
    pub fn start(self) -> Result<Session, RipError> {
        let url = self.validate()?;
        let rules = RuleSet::load(&self.config.rules)?;
        tracing::debug!(rules = rules.len(), url = %redact(&url), "starting rip");

        let mut sinks = self.sinks;
        if let Some(dir) = self.output_dir {
            sinks.push(Box::new(
                FileSink::new(dir).with_overwrite(self.config.overwrite),
            ));
        }
        let decoder = self
            .decoder
            .unwrap_or_else(|| Box::new(SymphoniaVolumeDecoder::new()));

        let (status, dispatcher) = spawn_dispatcher(self.status_callback)
            .map_err(|e| RipError::Thread(format!("failed to spawn status dispatcher: {e}")))?;
        let shared = StreamState::shared(status.clone());
        let state = Arc::new(SessionState::new());

        let relay = if self.config.relay.enabled {
            let server = relay::start(&self.config.relay, &shared, &state)?;
            tracing::info!(port = server.port, "relay listening");
            Some(server)
        } else {
            None
        };
        let relay_port = relay.as_ref().map(|server| server.port);

        let producer = Producer {
            url,
            ripper: Ripper::new(&self.config, rules, decoder),
            router: TrackRouter::new(sinks, &self.config, status.clone(), Arc::clone(&state)),
            config: self.config,
            shared: Arc::clone(&shared),
            session: Arc::clone(&state),
            status,
            relay_threads: relay.map(|server| server.threads).unwrap_or_default(),
        };
        let handle = spawn_producer(producer).map_err(|e| {
            state.request_stop();
            RipError::Thread(format!("failed to spawn producer thread: {e}"))
        })?;

        Ok(Session::new(state, shared, relay_port, handle, dispatcher))
    }
}

/// Main entry point for stream-rip.
///
/// Use [`StreamRip::builder()`] to start configuring a rip.
pub struct StreamRip;

impl StreamRip {
    /// Creates a new builder for configuring a rip.
    pub fn builder() -> RipBuilder {
        RipBuilder::new()
    }
}
