//! Per-channel histograms and percentile bounds.
use super::ProbeError;
use crate::types::PixelBuffer;

/// Result of one statistics pass over a sampled image.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStats {
    /// `(low, high)` value at the requested percentiles, per RGBA channel.
    pub bounds: [(f32, f32); 4],
    pub histograms: [Vec<u32>; 4],
}

impl ChannelStats {
    pub fn low(&self) -> [f32; 4] {
        self.bounds.map(|(low, _)| low)
    }

    pub fn high(&self) -> [f32; 4] {
        self.bounds.map(|(_, high)| high)
    }
}

/// Histograms `pixels` into `bins` buckets per channel and finds the values
/// at the `low` and `high` percentiles (0..=100).
pub fn channel_stats(
    pixels: &PixelBuffer,
    bins: usize,
    low: f64,
    high: f64,
) -> Result<ChannelStats, ProbeError> {
    let count = pixels.pixel_count();
    if count == 0 || bins == 0 {
        return Err(ProbeError::NoSamples);
    }
    // min/max folds skip NaN, so check up front.
    if pixels.pixels().flatten().any(|v| !v.is_finite()) {
        return Err(ProbeError::NonFinite);
    }

    let mut bounds = [(0.0f32, 0.0f32); 4];
    let mut histograms: [Vec<u32>; 4] = Default::default();
    for channel in 0..4 {
        let values = || pixels.pixels().map(move |px| px[channel] as f64);
        let min = values().fold(f64::INFINITY, f64::min);
        let max = values().fold(f64::NEG_INFINITY, f64::max);
        let scale = bins as f64 / (max - min + 1e-15);

        let mut histogram = vec![0u32; bins];
        for v in values() {
            let index = (((v - min) * scale).floor() as usize).min(bins - 1);
            histogram[index] += 1;
        }

        let percentile_bin = |p: f64| {
            let target = p / 100.0;
            let mut cumulative = 0u64;
            for (index, n) in histogram.iter().enumerate() {
                cumulative += *n as u64;
                if cumulative as f64 / count as f64 >= target {
                    return index;
                }
            }
            bins - 1
        };
        let bound = |index: usize| (index as f64 / scale + min) as f32;
        bounds[channel] = (bound(percentile_bin(low)), bound(percentile_bin(high)));
        histograms[channel] = histogram;
    }
    Ok(ChannelStats { bounds, histograms })
}
