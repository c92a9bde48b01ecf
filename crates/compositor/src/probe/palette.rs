//! Palette extraction from sampled OKLab points.
//!
//! Points are optionally rotated into their principal-component frame,
//! reshaped by the balance parameters, binned into a 3-D histogram and then
//! reduced to the requested palette size.
use std::collections::BTreeMap;
use std::f64::consts::PI;

use super::color::{chroma_hue, Lab};
use super::pca::Basis;
use super::ProbeError;

/// Largest palette the `Palette` uniform block holds.
pub const MAX_PALETTE: usize = 16;
/// Histogram cells per axis.
pub const HISTOGRAM_RESOLUTION: f64 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaletteBin {
    pub lab: Lab,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefineStrategy {
    #[default]
    None,
    KMeans,
    Merge,
}

impl RefineStrategy {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "none" => Some(RefineStrategy::None),
            "kmeans" | "k-means" => Some(RefineStrategy::KMeans),
            "merge" => Some(RefineStrategy::Merge),
            _ => None,
        }
    }
}

/// Shaping applied to every point before binning, in field order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceParams {
    pub chroma_boost: f64,
    pub contrast: f64,
    pub hue_warp: f64,
    pub balance_shift: f64,
    pub gamma: f64,
}

impl Default for BalanceParams {
    fn default() -> Self {
        Self {
            chroma_boost: 1.0,
            contrast: 1.0,
            hue_warp: 0.0,
            balance_shift: 0.0,
            gamma: 1.0,
        }
    }
}

impl BalanceParams {
    pub fn apply(&self, lab: Lab) -> Lab {
        let [l, a, b] = lab;
        let (a, b) = (a * self.chroma_boost, b * self.chroma_boost);
        let l = (l - 0.5) * self.contrast + 0.5;

        let (chroma, hue) = chroma_hue([l, a, b]);
        let hue = hue + self.hue_warp * (0.3 * hue).sin();
        let (a, b) = (chroma * hue.cos(), chroma * hue.sin());

        let shift = self.balance_shift;
        let l = (l + shift * (l - 0.5)).clamp(0.0, 1.0);
        let a = (a + shift * a).clamp(-1.0, 1.0);
        let b = (b + shift * b).clamp(-1.0, 1.0);

        [l.powf(self.gamma), a, b]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaletteOptions {
    pub size: usize,
    /// Lightness, chroma and hue weights for [`delta_e_weighted`].
    pub weights: [f64; 3],
    pub strategy: RefineStrategy,
    pub use_furthest: bool,
    pub use_pca: bool,
    pub balance: BalanceParams,
}

impl Default for PaletteOptions {
    fn default() -> Self {
        Self {
            size: 6,
            weights: [1.0, 1.0, 1e-4],
            strategy: RefineStrategy::KMeans,
            use_furthest: false,
            use_pca: false,
            balance: BalanceParams::default(),
        }
    }
}

/// Weighted distance over lightness, chroma and hue; hue difference is
/// wrapped to `[-π, π]` and measured in degrees.
pub fn delta_e_weighted(p: &Lab, q: &Lab, weights: &[f64; 3]) -> f64 {
    let dl = p[0] - q[0];
    let (c1, h1) = chroma_hue(*p);
    let (c2, h2) = chroma_hue(*q);
    let dc = c1 - c2;
    let mut dh = h1 - h2;
    while dh > PI {
        dh -= 2.0 * PI;
    }
    while dh < -PI {
        dh += 2.0 * PI;
    }
    let dh = dh.to_degrees();
    (weights[0] * dl * dl + weights[1] * dc * dc + weights[2] * dh * dh).sqrt()
}

/// Buckets points into cells of `1 / resolution`; each bin is the centroid of
/// its points weighted by their count. Bins are ordered by cell.
pub fn histogram3d(points: &[[f64; 3]], resolution: f64) -> Vec<PaletteBin> {
    let mut cells: BTreeMap<[i64; 3], ([f64; 3], usize)> = BTreeMap::new();
    for point in points {
        let key = point.map(|v| (v * resolution).floor() as i64);
        let (sum, count) = cells.entry(key).or_insert(([0.0; 3], 0));
        for (s, v) in sum.iter_mut().zip(point) {
            *s += v;
        }
        *count += 1;
    }
    cells
        .into_values()
        .map(|(sum, count)| PaletteBin {
            lab: sum.map(|s| s / count as f64),
            weight: count as f64,
        })
        .collect()
}

/// One assignment pass seeded from the `k` heaviest bins. Clusters that end
/// up with no weight are dropped.
pub fn kmeans_one_pass(bins: &[PaletteBin], k: usize, weights: &[f64; 3]) -> Vec<PaletteBin> {
    if bins.len() <= k {
        return bins.to_vec();
    }
    let mut sorted = bins.to_vec();
    sorted.sort_by(|x, y| y.weight.total_cmp(&x.weight));
    let centroids: Vec<Lab> = sorted.iter().take(k).map(|bin| bin.lab).collect();

    let mut sums = vec![([0.0; 3], 0.0); k];
    for bin in &sorted {
        let nearest = centroids
            .iter()
            .enumerate()
            .map(|(index, centroid)| (index, delta_e_weighted(&bin.lab, centroid, weights)))
            .min_by(|x, y| x.1.total_cmp(&y.1))
            .map(|(index, _)| index)
            .unwrap_or(0);
        let (sum, weight) = &mut sums[nearest];
        for (s, v) in sum.iter_mut().zip(bin.lab) {
            *s += v * bin.weight;
        }
        *weight += bin.weight;
    }
    sums.into_iter()
        .filter(|(_, weight)| *weight > 0.0)
        .map(|(sum, weight)| PaletteBin {
            lab: sum.map(|s| s / weight),
            weight,
        })
        .collect()
}

/// Repeatedly merges the closest pair into their weighted mean.
pub fn merge_closest(bins: &[PaletteBin], target: usize, weights: &[f64; 3]) -> Vec<PaletteBin> {
    let mut bins = bins.to_vec();
    while bins.len() > target.max(1) {
        let mut closest = (0, 1, f64::INFINITY);
        for i in 0..bins.len() - 1 {
            for j in i + 1..bins.len() {
                let d = delta_e_weighted(&bins[i].lab, &bins[j].lab, weights);
                if d < closest.2 {
                    closest = (i, j, d);
                }
            }
        }
        let (i, j, _) = closest;
        let b = bins.remove(j);
        let a = bins.remove(i);
        let total = a.weight + b.weight;
        let lab = if total > 0.0 {
            [0, 1, 2].map(|c| (a.lab[c] * a.weight + b.lab[c] * b.weight) / total)
        } else {
            a.lab
        };
        bins.push(PaletteBin { lab, weight: total });
    }
    bins
}

/// Greedy farthest-point selection starting from the first bin.
pub fn furthest_spread(bins: &[PaletteBin], n: usize, weights: &[f64; 3]) -> Vec<PaletteBin> {
    if bins.len() <= n {
        return bins.to_vec();
    }
    let mut selected = vec![0usize];
    while selected.len() < n {
        let best = (0..bins.len())
            .filter(|index| !selected.contains(index))
            .map(|index| {
                let nearest = selected
                    .iter()
                    .map(|chosen| delta_e_weighted(&bins[index].lab, &bins[*chosen].lab, weights))
                    .fold(f64::INFINITY, f64::min);
                (index, nearest)
            })
            .max_by(|x, y| x.1.total_cmp(&y.1));
        match best {
            Some((index, _)) => selected.push(index),
            None => break,
        }
    }
    selected.into_iter().map(|index| bins[index]).collect()
}

/// Reduces raw histogram bins to at most `options.size` entries.
pub fn refine(bins: &[PaletteBin], options: &PaletteOptions) -> Vec<PaletteBin> {
    let size = options.size.max(1);
    if options.strategy == RefineStrategy::None && !options.use_furthest {
        let mut heaviest = bins.to_vec();
        heaviest.sort_by(|x, y| y.weight.total_cmp(&x.weight));
        heaviest.truncate(size);
        return heaviest;
    }
    let scale = if options.use_furthest { 2 } else { 1 };
    let intermediate = bins.len().min(size * scale);
    let reduced = match options.strategy {
        RefineStrategy::None => bins.to_vec(),
        RefineStrategy::KMeans => kmeans_one_pass(bins, intermediate, &options.weights),
        RefineStrategy::Merge => merge_closest(bins, intermediate, &options.weights),
    };
    if options.use_furthest {
        furthest_spread(&reduced, size, &options.weights)
    } else {
        reduced
    }
}

/// Scales weights to sum to one and orders by ascending lightness.
pub fn normalize(mut bins: Vec<PaletteBin>) -> Result<Vec<PaletteBin>, ProbeError> {
    let total: f64 = bins.iter().map(|bin| bin.weight).sum();
    if bins.is_empty() || total <= 0.0 {
        return Err(ProbeError::NoSamples);
    }
    for bin in &mut bins {
        bin.weight /= total;
    }
    if bins
        .iter()
        .any(|bin| !bin.weight.is_finite() || bin.lab.iter().any(|v| !v.is_finite()))
    {
        return Err(ProbeError::NonFinite);
    }
    bins.sort_by(|x, y| x.lab[0].total_cmp(&y.lab[0]));
    Ok(bins)
}

/// Full extraction. With `basis`, points are binned in its frame and the
/// bins are taken back to OKLab before reduction.
pub fn extract_palette(
    samples: &[Lab],
    options: &PaletteOptions,
    basis: Option<&Basis>,
) -> Result<Vec<PaletteBin>, ProbeError> {
    if samples.is_empty() {
        return Err(ProbeError::NoSamples);
    }
    let coords: Vec<[f64; 3]> = samples
        .iter()
        .map(|lab| {
            let point = match basis {
                Some(basis) => basis.project(*lab),
                None => *lab,
            };
            options.balance.apply(point)
        })
        .collect();
    let mut bins = histogram3d(&coords, HISTOGRAM_RESOLUTION);
    if let Some(basis) = basis {
        for bin in &mut bins {
            bin.lab = basis.unproject(bin.lab);
        }
    }
    normalize(refine(&bins, options))
}

/// `vec4(L, a, b, weight)` per entry, zero padded to [`MAX_PALETTE`], then a
/// final `vec4(count, 0, 0, 0)`.
pub fn pack_palette(bins: &[PaletteBin]) -> Vec<f32> {
    let mut packed = vec![0.0f32; (MAX_PALETTE + 1) * 4];
    let count = bins.len().min(MAX_PALETTE);
    for (i, bin) in bins.iter().take(count).enumerate() {
        packed[i * 4] = bin.lab[0] as f32;
        packed[i * 4 + 1] = bin.lab[1] as f32;
        packed[i * 4 + 2] = bin.lab[2] as f32;
        packed[i * 4 + 3] = bin.weight as f32;
    }
    packed[MAX_PALETTE * 4] = count as f32;
    packed
}
