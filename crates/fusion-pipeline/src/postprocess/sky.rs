use std::collections::VecDeque;

use fusion_core::{median, Mask, Real, Result, RgbImage, ScalarMap};
use fusion_optim::Scene;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Colour and shape rules of the sky segmenter.
///
/// Saturation and value are in `[0, 1]`, hue in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkyMaskOptions {
    /// Hue interval of blue sky.
    pub hue_range_deg: [Real; 2],
    /// Minimum value for a blue pixel to count as sky.
    pub min_blue_value: Real,
    /// Bright, unsaturated pixels: `(max saturation, min value)` pairs.
    pub bright_rules: Vec<[Real; 2]>,
    /// Also flag pixels deeper than this multiple of the median depth.
    pub far_depth_factor: Option<Real>,
    /// Side of the square structuring element used for the opening.
    pub opening_size: usize,
    /// Components smaller than this fraction of the image are dropped.
    pub min_area_fraction: Real,
}

impl Default for SkyMaskOptions {
    fn default() -> Self {
        Self {
            hue_range_deg: [180.0, 240.0],
            min_blue_value: 100.0 / 255.0,
            bright_rules: vec![
                [10.0 / 255.0, 150.0 / 255.0],
                [30.0 / 255.0, 180.0 / 255.0],
                [50.0 / 255.0, 220.0 / 255.0],
            ],
            far_depth_factor: None,
            opening_size: 5,
            min_area_fraction: 0.0,
        }
    }
}

/// `(hue in degrees, saturation, value)` of an RGB triple in `[0, 1]`.
fn rgb_to_hsv([r, g, b]: [f32; 3]) -> (Real, Real, Real) {
    let (r, g, b) = (r as Real, g as Real, b as Real);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let s = if max > 0.0 { delta / max } else { 0.0 };
    let h = if delta <= 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    (h, s, max)
}

fn is_sky_colour(rgb: [f32; 3], opts: &SkyMaskOptions) -> bool {
    let (h, s, v) = rgb_to_hsv(rgb);
    let [h_lo, h_hi] = opts.hue_range_deg;
    let blue = s > 0.0 && h >= h_lo && h <= h_hi && v >= opts.min_blue_value;
    blue || opts
        .bright_rules
        .iter()
        .any(|&[max_s, min_v]| s < max_s && v > min_v)
}

/// Min (`erode`) or max filter of half-width `r` along one axis. Outside the
/// image counts as unset.
fn filter_axis(mask: &Mask, r: usize, horizontal: bool, erode: bool) -> Mask {
    let (w, h) = mask.shape();
    Mask::from_fn(w, h, |x, y| {
        let (pos, len) = if horizontal { (x, w) } else { (y, h) };
        if erode && (pos < r || pos + r >= len) {
            return false;
        }
        let lo = pos.saturating_sub(r);
        let hi = (pos + r).min(len - 1);
        let mut window = (lo..=hi).map(|k| {
            if horizontal {
                *mask.get(k, y)
            } else {
                *mask.get(x, k)
            }
        });
        if erode {
            window.all(|m| m)
        } else {
            window.any(|m| m)
        }
    })
}

/// Morphological opening with a `size × size` square.
fn open(mask: &Mask, size: usize) -> Mask {
    let r = size / 2;
    if r == 0 {
        return mask.clone();
    }
    let eroded = filter_axis(&filter_axis(mask, r, true, true), r, false, true);
    filter_axis(&filter_axis(&eroded, r, true, false), r, false, false)
}

/// Label 8-connected components; returns the label map (`usize::MAX` for
/// unset pixels) and the size of each component.
fn connected_components(mask: &Mask) -> (Vec<usize>, Vec<usize>) {
    let (w, h) = mask.shape();
    let mut labels = vec![usize::MAX; w * h];
    let mut sizes = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..w * h {
        if !mask.as_slice()[start] || labels[start] != usize::MAX {
            continue;
        }
        let label = sizes.len();
        let mut size = 0;
        labels[start] = label;
        queue.push_back(start);
        while let Some(i) = queue.pop_front() {
            size += 1;
            let (x, y) = ((i % w) as isize, (i / w) as isize);
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                        continue;
                    }
                    let j = ny as usize * w + nx as usize;
                    if mask.as_slice()[j] && labels[j] == usize::MAX {
                        labels[j] = label;
                        queue.push_back(j);
                    }
                }
            }
        }
        sizes.push(size);
    }
    (labels, sizes)
}

/// Sky pixels of one image.
///
/// Colour candidates (plus optional far-depth candidates) are opened to drop
/// specks, then only connected regions larger than half of the largest one
/// are kept.
pub fn segment_sky(image: &RgbImage, depth: Option<&ScalarMap>, opts: &SkyMaskOptions) -> Mask {
    let far = match (opts.far_depth_factor, depth) {
        (Some(factor), Some(d)) => median(d.as_slice()).map(|m| factor * m),
        _ => None,
    };
    let candidates = Mask::from_fn(image.width(), image.height(), |x, y| {
        let by_depth = match (far, depth) {
            (Some(limit), Some(d)) => *d.get(x, y) > limit,
            _ => false,
        };
        by_depth || is_sky_colour(*image.get(x, y), opts)
    });

    let opened = open(&candidates, opts.opening_size);
    let (labels, sizes) = connected_components(&opened);
    let Some(&largest) = sizes.iter().max() else {
        return opened;
    };
    let min_area = opts.min_area_fraction * image.len() as Real;
    let keep: Vec<bool> = sizes
        .iter()
        .map(|&s| 2 * s > largest && s as Real >= min_area)
        .collect();

    let (w, h) = image.shape();
    Mask::from_fn(w, h, |x, y| {
        let l = labels[y * w + x];
        l != usize::MAX && keep[l]
    })
}

/// Zero the confidence of sky pixels in every view.
///
/// Returns the number of pixels whose confidence changed.
pub fn mask_sky(scene: &mut Scene, opts: &SkyMaskOptions) -> Result<usize> {
    let masks: Vec<Mask> = scene
        .views()
        .par_iter()
        .map(|v| segment_sky(&v.image, Some(&v.depth), opts))
        .collect();

    let mut total = 0;
    for (i, mask) in masks.iter().enumerate() {
        let n = scene.suppress(i, mask, 0.0)?;
        log::debug!("sky: view {i}: {} sky pixels, {n} changed", mask.count());
        total += n;
    }
    if total == 0 {
        log::warn!("mask_sky found no sky pixels to suppress");
    } else {
        log::info!("mask_sky suppressed {total} pixels");
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use fusion_core::{ConfTransform, Grid, Iso3};
    use fusion_optim::SceneView;

    const SKY: [f32; 3] = [0.3, 0.5, 0.9];
    const GROUND: [f32; 3] = [0.5, 0.3, 0.1];

    #[test]
    fn hsv_of_primaries() {
        let (h, s, v) = rgb_to_hsv([0.0, 0.0, 1.0]);
        assert!((h - 240.0).abs() < 1e-9 && s == 1.0 && v == 1.0);
        let (h, _, _) = rgb_to_hsv([1.0, 0.0, 0.0]);
        assert_eq!(h, 0.0);
        let (_, s, _) = rgb_to_hsv([0.0, 0.0, 0.0]);
        assert_eq!(s, 0.0);
    }

    #[test]
    fn upper_half_sky_is_segmented() {
        let img = Grid::from_fn(20, 16, |_, y| if y < 8 { SKY } else { GROUND });
        let mask = segment_sky(&img, None, &SkyMaskOptions::default());
        assert_eq!(mask.count(), 160);
        assert!(*mask.get(0, 0) && !*mask.get(0, 8));
    }

    #[test]
    fn specks_are_removed_by_opening() {
        let img = Grid::from_fn(20, 16, |x, y| {
            if (10..12).contains(&x) && (10..12).contains(&y) {
                SKY
            } else {
                GROUND
            }
        });
        let mask = segment_sky(&img, None, &SkyMaskOptions::default());
        assert_eq!(mask.count(), 0);
    }

    #[test]
    fn small_regions_next_to_a_large_one_are_dropped() {
        // 8x8 block (64 px) and a separate 5x5 block (25 px < 32).
        let img = Grid::from_fn(24, 12, |x, y| {
            if (x < 8 && y < 8) || ((16..21).contains(&x) && (2..7).contains(&y)) {
                SKY
            } else {
                GROUND
            }
        });
        let mask = segment_sky(&img, None, &SkyMaskOptions::default());
        assert_eq!(mask.count(), 64);
        assert!(!*mask.get(18, 4));
    }

    #[test]
    fn bright_overcast_counts_as_sky() {
        let img = Grid::filled(10, 10, [0.95f32, 0.95, 0.95]);
        let mask = segment_sky(&img, None, &SkyMaskOptions::default());
        assert_eq!(mask.count(), 100);
    }

    #[test]
    fn far_depth_adds_candidates() {
        let img = Grid::filled(12, 12, GROUND);
        let depth = Grid::from_fn(12, 12, |x, _| if x < 6 { 100.0 } else { 2.0 });
        let opts = SkyMaskOptions {
            far_depth_factor: Some(5.0),
            ..SkyMaskOptions::default()
        };
        assert_eq!(segment_sky(&img, Some(&depth), &SkyMaskOptions::default()).count(), 0);
        // median is 51, so nothing exceeds 5x the median
        assert_eq!(segment_sky(&img, Some(&depth), &opts).count(), 0);
        let depth = Grid::from_fn(12, 12, |x, _| if x < 5 { 100.0 } else { 2.0 });
        assert_eq!(segment_sky(&img, Some(&depth), &opts).count(), 60);
    }

    #[test]
    fn sky_stays_masked_out_at_low_thresholds() -> anyhow::Result<()> {
        let img = Grid::from_fn(20, 16, |_, y| if y < 8 { SKY } else { GROUND });
        let view = SceneView {
            name: "sky".into(),
            image: Arc::new(img),
            cam_to_world: Iso3::identity(),
            focal: 20.0,
            depth: Grid::filled(20, 16, 3.0),
            confidence: Grid::filled(20, 16, 5.0),
        };
        let mut scene = Scene::from_views(vec![view], ConfTransform::Log)?;
        assert_eq!(mask_sky(&mut scene, &SkyMaskOptions::default())?, 160);
        for thr in [3.0, 1.0, 0.5, 0.0] {
            let mask = &scene.masks(thr)[0];
            assert_eq!(mask.count(), 160, "threshold {thr}");
            assert!(!*mask.get(0, 0) && *mask.get(0, 8));
        }
        Ok(())
    }
}
