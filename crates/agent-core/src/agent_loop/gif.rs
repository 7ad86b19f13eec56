//! Animated replay of a run built from step screenshots.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::{self, FilterType};
use image::{Delay, Frame, RgbaImage};
use tracing::{info, warn};

use super::history::AgentHistoryList;
use crate::errors::AgentError;

/// Display time of every frame.
const FRAME_DELAY_MS: u32 = 3000;

/// Write every stored screenshot of `history` to an animated GIF at `path`.
///
/// Frames are resized to the dimensions of the first screenshot. Screenshots
/// that fail to decode are skipped.
pub fn create_history_gif(
    task: &str,
    history: &AgentHistoryList,
    path: impl AsRef<Path>,
) -> Result<(), AgentError> {
    let path = path.as_ref();
    let mut frames: Vec<RgbaImage> = Vec::new();
    for (step, screenshot) in history.screenshots().into_iter().enumerate() {
        let Some(encoded) = screenshot else {
            continue;
        };
        match decode_screenshot(&encoded) {
            Ok(image) => frames.push(image),
            Err(err) => warn!(step = step + 1, error = %err, "skipping unreadable screenshot"),
        }
    }

    let Some(first) = frames.first() else {
        warn!(task, "no screenshots in history, skipping gif");
        return Ok(());
    };
    let (width, height) = first.dimensions();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut encoder = GifEncoder::new(BufWriter::new(file));
    encoder
        .set_repeat(Repeat::Infinite)
        .map_err(|err| AgentError::Gif(err.to_string()))?;

    let count = frames.len();
    let delay = Delay::from_numer_denom_ms(FRAME_DELAY_MS, 1);
    let frames = frames.into_iter().map(|image| {
        let image = if image.dimensions() == (width, height) {
            image
        } else {
            imageops::resize(&image, width, height, FilterType::Triangle)
        };
        Frame::from_parts(image, 0, 0, delay)
    });
    encoder
        .encode_frames(frames)
        .map_err(|err| AgentError::Gif(err.to_string()))?;

    info!(path = %path.display(), frames = count, "created history gif");
    Ok(())
}

fn decode_screenshot(encoded: &str) -> Result<RgbaImage, AgentError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|err| AgentError::Gif(format!("invalid base64: {err}")))?;
    let image = image::load_from_memory(&bytes).map_err(|err| AgentError::Gif(err.to_string()))?;
    Ok(image.to_rgba8())
}
