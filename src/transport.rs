//! # Transport
//!
//! Thin plumbing around the node: directory replay sources that stand in for the camera
//! endpoints, the single-context dispatch loop that feeds their frames to the node, and a
//! line-based control channel for the parameter store.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use tracing::{debug, error, info, warn};

use crate::error::*;
use crate::frame::Frame;
use crate::node::DepthMapNode;
use crate::params::{ParamFile, ParameterStore};
use crate::sync::Side;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "pgm", "ppm", "bmp", "tif"];

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A frame arriving on one of the input endpoints.
#[derive(Debug)]
pub struct FrameEvent {
    pub side: Side,
    pub frame: Frame,
}

/// Replays the image files of a directory, in name order, as one side's frame stream.
#[derive(Debug)]
pub struct DirectorySource {
    endpoint: String,
    side: Side,
    files: Vec<PathBuf>,
    interval: Duration,
}

/// Counters from one dispatch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub published: u64,
    pub failed: u64,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DirectorySource {
    /// Bind `endpoint` to the images in `dir`.
    pub fn open(
        endpoint: impl Into<String>,
        side: Side,
        dir: impl AsRef<Path>,
        interval: Duration,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        let dir = dir.as_ref();

        let entries = std::fs::read_dir(dir)
            .map_err(|e| Error::bind(&endpoint, format!("{}: {}", dir.display(), e)))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| Error::bind(&endpoint, e))?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(Error::bind(
                &endpoint,
                format!("no images in {}", dir.display()),
            ));
        }

        info!(%endpoint, %side, frames = files.len(), dir = %dir.display(), "endpoint bound");

        Ok(Self {
            endpoint,
            side,
            files,
            interval,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Start replaying on a background thread. The thread ends after the last file or once the
    /// receiving side hangs up.
    pub fn spawn(self, tx: Sender<FrameEvent>) -> JoinHandle<()> {
        thread::spawn(move || {
            for (i, path) in self.files.iter().enumerate() {
                if i > 0 {
                    thread::sleep(self.interval);
                }

                let img = match image::open(path) {
                    Ok(img) => img,
                    Err(e) => {
                        error!(endpoint = %self.endpoint, path = %path.display(), error = %e, "unreadable frame skipped");
                        continue;
                    }
                };

                let event = FrameEvent {
                    side: self.side,
                    frame: Frame::from_dynamic(&img, SystemTime::now()),
                };

                if tx.send(event).is_err() {
                    debug!(endpoint = %self.endpoint, "dispatcher gone, stopping replay");
                    return;
                }
            }

            debug!(endpoint = %self.endpoint, "replay finished");
        })
    }
}

/// Feed every event to the node from the calling thread until all senders are gone.
///
/// The control file, if any, is polled before each arrival so parameter changes take effect on
/// the next cycle.
pub fn dispatch(
    node: &DepthMapNode,
    events: &Receiver<FrameEvent>,
    mut params_file: Option<&mut ParamFile>,
) -> DispatchStats {
    let mut stats = DispatchStats::default();

    for event in events.iter() {
        if let Some(file) = params_file.as_deref_mut() {
            if let Err(e) = file.poll(node.params()) {
                warn!(path = %file.path().display(), error = %e, "control file rejected");
            }
        }

        stats.received += 1;
        match node.arrive(event.side, event.frame) {
            Ok(Some(_)) => stats.published += 1,
            Ok(None) => {}
            // Already logged by the node
            Err(_) => stats.failed += 1,
        }
    }

    stats
}

/// Apply `name=value` lines read from `input` to `store` on a background thread.
pub fn spawn_control<R>(store: ParameterStore, input: R) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "control input closed");
                    return;
                }
            };

            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Err(e) = store.apply_command(line) {
                warn!(command = line, error = %e, "control command rejected");
            }
        }
    })
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
