//! # Depth map publishing
//!
//! Wraps each normalised map in a header with a monotonically increasing sequence number and
//! hands it to the output sinks. Publishing is fire-and-forget: there is no acknowledgement, no
//! retry and no queue, so a slow consumer simply misses intermediate maps.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::time::SystemTime;

use image::GrayImage;
use tracing::{debug, info, trace, warn};

use crate::error::*;
use crate::frame::{Encoding, FrameHeader};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Fixed name of the output endpoint.
pub const OUTPUT_TOPIC: &str = "/depthmap/image_raw";

/// Encoding tag of every published map.
pub const OUTPUT_ENCODING: Encoding = Encoding::Mono8;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A published, normalised depth map.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    pub header: FrameHeader,
    pub encoding: Encoding,
    pub image: GrayImage,
}

/// Process-lifetime publish counter.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: u64,
}

pub struct Publisher {
    counter: SequenceCounter,
    sinks: Vec<Box<dyn Sink>>,
}

/// Sink handing maps to an in-process consumer through a one-slot channel.
pub struct ChannelSink {
    name: String,
    tx: SyncSender<DepthImage>,
}

/// Sink writing every map as `<seq>.png` into a directory.
pub struct DirectorySink {
    dir: PathBuf,
}

/// Sink that logs map summaries.
pub struct LogSink {
    name: String,
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// Destination for published maps.
pub trait Sink: Send {
    fn name(&self) -> &str;

    fn send(&mut self, msg: &DepthImage) -> Result<()>;
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DepthImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl SequenceCounter {
    /// Number of publishes so far.
    pub fn value(&self) -> u64 {
        self.next
    }

    /// Take the current value for a header and advance by one.
    fn advance(&mut self) -> u64 {
        let seq = self.next;
        self.next += 1;
        seq
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher {
    pub fn new() -> Self {
        Self {
            counter: SequenceCounter::default(),
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: impl Sink + 'static) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn add_sink(&mut self, sink: impl Sink + 'static) {
        info!(sink = sink.name(), topic = OUTPUT_TOPIC, "sink attached");
        self.sinks.push(Box::new(sink));
    }

    pub fn sequence(&self) -> &SequenceCounter {
        &self.counter
    }

    /// Stamp `image` with the next sequence number and emit it on every sink.
    ///
    /// Sink failures are logged and do not affect the sequence.
    pub fn publish(&mut self, image: GrayImage) -> FrameHeader {
        let msg = DepthImage {
            header: FrameHeader {
                seq: self.counter.advance(),
                stamp: SystemTime::now(),
                frame_id: OUTPUT_TOPIC.to_string(),
            },
            encoding: OUTPUT_ENCODING,
            image,
        };

        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.send(&msg) {
                warn!(sink = sink.name(), seq = msg.header.seq, error = %e, "sink write failed");
            }
        }

        debug!(
            seq = msg.header.seq,
            width = msg.width(),
            height = msg.height(),
            "depth map published"
        );

        msg.header
    }
}

impl ChannelSink {
    /// Create a sink and the receiving end for its consumer.
    pub fn new(name: impl Into<String>) -> (Self, Receiver<DepthImage>) {
        let (tx, rx) = mpsc::sync_channel(1);
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

impl Sink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, msg: &DepthImage) -> Result<()> {
        match self.tx.try_send(msg.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                trace!(sink = %self.name, seq = msg.header.seq, "consumer busy, map dropped")
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!(sink = %self.name, seq = msg.header.seq, "no consumer, map dropped")
            }
        }
        Ok(())
    }
}

impl DirectorySink {
    /// Open (and create if needed) the output directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| Error::bind(dir.display().to_string(), e))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("{:06}.png", seq))
    }
}

impl Sink for DirectorySink {
    fn name(&self) -> &str {
        "directory"
    }

    fn send(&mut self, msg: &DepthImage) -> Result<()> {
        msg.image.save(self.path_for(msg.header.seq))?;
        Ok(())
    }
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Sink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, msg: &DepthImage) -> Result<()> {
        info!(
            sink = %self.name,
            topic = %msg.header.frame_id,
            seq = msg.header.seq,
            encoding = %msg.encoding,
            width = msg.width(),
            height = msg.height(),
            "depth map"
        );
        Ok(())
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
