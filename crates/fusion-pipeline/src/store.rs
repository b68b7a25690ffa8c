//! Image store: discovery, decoding and size normalization.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fusion_core::{FusionError, Grid, ImageSet, InputImage, Result, RgbImage};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use rayon::prelude::*;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Image files directly inside `dir`, sorted by path.
pub fn discover_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        FusionError::input(format!("cannot list input directory {}: {e}", dir.display()))
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| {
                    let ext = ext.to_ascii_lowercase();
                    IMAGE_EXTENSIONS.contains(&ext.as_str())
                })
                .unwrap_or(false)
        })
        .collect();
    if paths.is_empty() {
        return Err(FusionError::input(format!(
            "no images (jpg, jpeg, png) found in {}",
            dir.display()
        )));
    }
    paths.sort();
    Ok(paths)
}

fn resize_long_side(img: &DynamicImage, long_side: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    let s = w.max(h);
    let filter = if s > long_side {
        FilterType::Lanczos3
    } else {
        FilterType::CatmullRom
    };
    let scale = long_side as f64 / s as f64;
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    img.resize_exact(nw, nh, filter)
}

/// Resize and center-crop a decoded image to the network resolution.
///
/// `size == 224`: the short side becomes 224, then a centered 224×224 square
/// is cut. Any other size: the long side becomes `size`, then both sides are
/// cropped to a multiple of 16; square inputs are cropped to 4:3.
pub fn prepare_image(img: &DynamicImage, size: u32) -> Result<RgbImage> {
    let (w1, h1) = img.dimensions();
    if w1 == 0 || h1 == 0 {
        return Err(FusionError::input("image has no pixels"));
    }
    let resized = if size == 224 {
        let aspect = (w1 as f64 / h1 as f64).max(h1 as f64 / w1 as f64);
        resize_long_side(img, (size as f64 * aspect).round() as u32)
    } else {
        resize_long_side(img, size)
    };

    let (w, h) = resized.dimensions();
    let (cx, cy) = (w / 2, h / 2);
    let (half_w, half_h) = if size == 224 {
        let half = cx.min(cy);
        (half, half)
    } else {
        let half_w = (2 * cx) / 16 * 8;
        let mut half_h = (2 * cy) / 16 * 8;
        if w == h {
            half_h = 3 * half_w / 4;
        }
        (half_w, half_h)
    };
    if half_w == 0 || half_h == 0 {
        return Err(FusionError::input(format!(
            "image of {w1}x{h1} pixels is too small for size {size}"
        )));
    }
    let cropped = resized.crop_imm(cx - half_w, cy - half_h, 2 * half_w, 2 * half_h);
    let rgb = cropped.to_rgb8();
    let (cw, ch) = rgb.dimensions();
    let data = rgb
        .pixels()
        .map(|p| {
            [
                p[0] as f32 / 255.0,
                p[1] as f32 / 255.0,
                p[2] as f32 / 255.0,
            ]
        })
        .collect();
    Grid::from_vec(cw as usize, ch as usize, data)
}

/// Quantize a normalized image to 8-bit RGB for encoding.
pub fn to_rgb8(img: &RgbImage) -> image::RgbImage {
    let quantize = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    image::RgbImage::from_fn(img.width() as u32, img.height() as u32, |x, y| {
        let [r, g, b] = *img.get(x as usize, y as usize);
        image::Rgb([quantize(r), quantize(g), quantize(b)])
    })
}

fn load_one(id: usize, path: &Path, size: u32) -> Result<InputImage> {
    let unreadable =
        |e: &dyn std::fmt::Display| FusionError::input(format!("unreadable image {}: {e}", path.display()));
    let img = ImageReader::open(path)
        .map_err(|e| unreadable(&e))?
        .with_guessed_format()
        .map_err(|e| unreadable(&e))?
        .decode()
        .map_err(|e| unreadable(&e))?;
    let (w, h) = img.dimensions();
    let rgb = prepare_image(&img, size)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    log::debug!(
        "loaded {name} {w}x{h} -> {}x{}",
        rgb.width(),
        rgb.height()
    );
    Ok(InputImage {
        id,
        name,
        rgb: Arc::new(rgb),
        original_size: (w as usize, h as usize),
    })
}

/// Decode and normalize every path into an [`ImageSet`], in path order.
pub fn load_images(paths: &[PathBuf], size: u32) -> Result<ImageSet> {
    if paths.is_empty() {
        return Err(FusionError::input("no images to load"));
    }
    let images = paths
        .par_iter()
        .enumerate()
        .map(|(id, path)| load_one(id, path, size))
        .collect::<Result<Vec<_>>>()?;
    log::info!("loaded {} images at size {size}", images.len());
    ImageSet::new(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage as Rgb8};

    fn gradient(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(Rgb8::from_fn(w, h, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    #[test]
    fn size_512_keeps_aspect_and_multiples_of_16() {
        let img = prepare_image(&gradient(1024, 768), 512).unwrap();
        assert_eq!(img.shape(), (512, 384));
        let img = prepare_image(&gradient(1000, 700), 512).unwrap();
        assert_eq!(img.width() % 16, 0);
        assert_eq!(img.height() % 16, 0);
        assert!(img.width() <= 512);
    }

    #[test]
    fn square_input_is_cropped_to_four_by_three() {
        let img = prepare_image(&gradient(600, 600), 512).unwrap();
        assert_eq!(img.shape(), (512, 384));
    }

    #[test]
    fn size_224_is_a_center_square() {
        let img = prepare_image(&gradient(640, 480), 224).unwrap();
        assert_eq!(img.shape(), (224, 224));
    }

    #[test]
    fn pixels_are_normalized() {
        let img = prepare_image(&gradient(64, 48), 64).unwrap();
        assert!(img
            .iter()
            .all(|p| p.iter().all(|&c| (0.0..=1.0).contains(&c))));
    }

    #[test]
    fn discovery_filters_and_sorts() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        gradient(32, 24).save(dir.path().join("b.png"))?;
        gradient(32, 24).save(dir.path().join("a.PNG"))?;
        std::fs::write(dir.path().join("notes.txt"), "x")?;
        let paths = discover_images(dir.path())?;
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PNG", "b.png"]);

        let set = load_images(&paths, 32)?;
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(1).unwrap().original_size, (32, 24));
        Ok(())
    }

    #[test]
    fn empty_directory_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_images(dir.path()).unwrap_err();
        assert!(matches!(err, FusionError::Input(_)));
    }
}
