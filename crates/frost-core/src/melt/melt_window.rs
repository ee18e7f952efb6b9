//! Melt window isolation.
//!
//! Snow extent is smoothed with a centred rolling OR over time to suppress
//! single-step flicker, then the series is cut at the step of lowest extent.
//! Anything after that (late-season snowfall) is discarded.

use tracing::debug;

use super::snow_mask::SnowMask;
use crate::error::{Error, Result};

/// Inclusive bounds of the centred window of `window` steps around step `i`,
/// clipped to `0..n`. An even window leans one step into the past.
fn window_bounds(i: usize, window: usize, n: usize) -> (usize, usize) {
    let before = window / 2;
    let after = window - 1 - before;
    (i.saturating_sub(before), (i + after).min(n - 1))
}

/// Per time step, the number of pixels with snow anywhere in the centred window.
pub fn smoothed_snow_counts(mask: &SnowMask, window: usize) -> Result<Vec<usize>> {
    if window == 0 {
        return Err(Error::InvalidParameter {
            name: "smoothing_window",
            value: window.to_string(),
            reason: "must be at least one time step".into(),
        });
    }
    let n = mask.n_times();
    let n_pix = mask.n_pixels();
    let mut counts = vec![0usize; n];
    if n == 0 {
        return Ok(counts);
    }

    // Per-pixel prefix sums of snow observations make each window O(1).
    let mut prefix = vec![0u32; n + 1];
    for p in 0..n_pix {
        for t in 0..n {
            prefix[t + 1] = prefix[t] + mask.cells[t * n_pix + p].is_snow() as u32;
        }
        for (i, count) in counts.iter_mut().enumerate() {
            let (lo, hi) = window_bounds(i, window, n);
            if prefix[hi + 1] > prefix[lo] {
                *count += 1;
            }
        }
    }
    Ok(counts)
}

/// Index of the lowest smoothed snow extent. Ties resolve to the earliest step.
pub fn lowest_snow_cover_step(mask: &SnowMask, window: usize) -> Result<usize> {
    let counts = smoothed_snow_counts(mask, window)?;
    let mut best: Option<(usize, usize)> = None;
    for (i, &c) in counts.iter().enumerate() {
        if best.map_or(true, |(_, b)| c < b) {
            best = Some((i, c));
        }
    }
    let (idx, count) = best.ok_or(Error::EmptyTimeAxis)?;
    debug!(idx, count, "lowest smoothed snow extent");
    Ok(idx)
}

/// Restrict the (unsmoothed) mask to the melt-down phase.
pub fn isolate_melt_window(mask: &SnowMask, window: usize) -> Result<SnowMask> {
    let idx = lowest_snow_cover_step(mask, window)?;
    Ok(mask.truncate_through(idx))
}
