//
// clahe.rs
// IML-Prep
//
// Contrast-limited adaptive histogram equalization over an 8x8 tile grid.
//

use image::{DynamicImage, GrayImage, RgbImage};

pub const CLIP_LIMIT: f64 = 2.0;
pub const TILE_GRID: u32 = 8;

/// Applies CLAHE to gray images directly and to the luma of color images.
pub fn apply(img: &DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(gray) => {
            DynamicImage::ImageLuma8(equalize(gray, CLIP_LIMIT, TILE_GRID))
        }
        other => DynamicImage::ImageRgb8(equalize_rgb(&other.to_rgb8())),
    }
}

fn equalize_rgb(rgb: &RgbImage) -> RgbImage {
    let (w, h) = rgb.dimensions();
    let mut luma = GrayImage::new(w, h);
    let mut chroma = Vec::with_capacity((w * h) as usize);
    for (x, y, p) in rgb.enumerate_pixels() {
        let [r, g, b] = p.0.map(|v| v as f64);
        let yv = 0.299 * r + 0.587 * g + 0.114 * b;
        chroma.push(((b - yv) * 0.564, (r - yv) * 0.713));
        luma.put_pixel(x, y, image::Luma([yv.round().clamp(0.0, 255.0) as u8]));
    }

    let equalized = equalize(&luma, CLIP_LIMIT, TILE_GRID);
    let mut out = RgbImage::new(w, h);
    for ((x, y, p), (cb, cr)) in out.enumerate_pixels_mut().zip(chroma) {
        let yv = equalized.get_pixel(x, y).0[0] as f64;
        let r = yv + 1.403 * cr;
        let g = yv - 0.714 * cr - 0.344 * cb;
        let b = yv + 1.773 * cb;
        *p = image::Rgb([r, g, b].map(|v| v.round().clamp(0.0, 255.0) as u8));
    }
    out
}

/// Tile boundaries `[start, end)` splitting `len` into at most `tiles` non-empty ranges.
fn tile_bounds(len: u32, tiles: u32) -> Vec<(u32, u32)> {
    let tiles = tiles.clamp(1, len.max(1));
    (0..tiles)
        .map(|i| (i * len / tiles, (i + 1) * len / tiles))
        .collect()
}

fn tile_lut(img: &GrayImage, xs: (u32, u32), ys: (u32, u32), clip_limit: f64) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in ys.0..ys.1 {
        for x in xs.0..xs.1 {
            hist[img.get_pixel(x, y).0[0] as usize] += 1;
        }
    }
    let area = (xs.1 - xs.0) * (ys.1 - ys.0);
    let mut lut = [0u8; 256];
    if area == 0 {
        for (i, v) in lut.iter_mut().enumerate() {
            *v = i as u8;
        }
        return lut;
    }

    let limit = ((clip_limit * area as f64 / 256.0) as u32).max(1);
    let mut clipped = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            clipped += *bin - limit;
            *bin = limit;
        }
    }
    let bonus = clipped / 256;
    let residual = clipped % 256;
    for bin in hist.iter_mut() {
        *bin += bonus;
    }
    if residual > 0 {
        let step = (256 / residual).max(1) as usize;
        for bin in hist.iter_mut().step_by(step).take(residual as usize) {
            *bin += 1;
        }
    }

    let scale = 255.0 / area as f64;
    let mut cdf = 0u32;
    for (bin, out) in hist.iter().zip(lut.iter_mut()) {
        cdf += bin;
        *out = (cdf as f64 * scale).round().min(255.0) as u8;
    }
    lut
}

/// Locates `pos` between tile centres: (lower tile, upper tile, weight of upper).
fn interpolation_cell(pos: u32, bounds: &[(u32, u32)]) -> (usize, usize, f64) {
    let centre = |i: usize| (bounds[i].0 + bounds[i].1) as f64 / 2.0;
    let p = pos as f64 + 0.5;
    let last = bounds.len() - 1;
    if p <= centre(0) {
        return (0, 0, 0.0);
    }
    if p >= centre(last) {
        return (last, last, 0.0);
    }
    let lower = (0..last).rev().find(|&i| centre(i) <= p).unwrap_or(0);
    let upper = lower + 1;
    let span = centre(upper) - centre(lower);
    let weight = if span > 0.0 { (p - centre(lower)) / span } else { 0.0 };
    (lower, upper, weight)
}

pub fn equalize(img: &GrayImage, clip_limit: f64, grid: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let xb = tile_bounds(w, grid);
    let yb = tile_bounds(h, grid);

    let luts: Vec<Vec<[u8; 256]>> = yb
        .iter()
        .map(|&ys| xb.iter().map(|&xs| tile_lut(img, xs, ys, clip_limit)).collect())
        .collect();

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let (ty0, ty1, wy) = interpolation_cell(y, &yb);
        for x in 0..w {
            let (tx0, tx1, wx) = interpolation_cell(x, &xb);
            let v = img.get_pixel(x, y).0[0] as usize;
            let top = luts[ty0][tx0][v] as f64 * (1.0 - wx) + luts[ty0][tx1][v] as f64 * wx;
            let bottom = luts[ty1][tx0][v] as f64 * (1.0 - wx) + luts[ty1][tx1][v] as f64 * wx;
            let value = top * (1.0 - wy) + bottom * wy;
            out.put_pixel(x, y, image::Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn tile_bounds_cover_the_axis() {
        let bounds = tile_bounds(20, 8);
        assert_eq!(bounds.len(), 8);
        assert_eq!(bounds[0].0, 0);
        assert_eq!(bounds[7].1, 20);
        assert!(bounds.windows(2).all(|w| w[0].1 == w[1].0));
        assert_eq!(tile_bounds(3, 8).len(), 3);
    }

    #[test]
    fn low_contrast_gradient_gets_stretched() {
        let img = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x % 8) as u8]));
        let out = equalize(&img, CLIP_LIMIT, TILE_GRID);
        let spread = |g: &GrayImage| {
            let min = g.pixels().map(|p| p.0[0]).min().unwrap_or(0);
            let max = g.pixels().map(|p| p.0[0]).max().unwrap_or(0);
            max - min
        };
        assert!(spread(&out) > spread(&img));
        assert_eq!(out.dimensions(), (64, 64));
    }

    #[test]
    fn rgb_output_keeps_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(10, 7, |x, y| {
            image::Rgb([(x * 20) as u8, (y * 30) as u8, 90])
        }));
        let out = apply(&img);
        assert_eq!((out.width(), out.height()), (10, 7));
    }

    #[test]
    fn replicated_gray_matches_gray_path() {
        let gray = GrayImage::from_fn(32, 24, |x, y| Luma([(40 + x * 3 + y) as u8]));
        let direct = DynamicImage::ImageLuma8(equalize(&gray, CLIP_LIMIT, TILE_GRID)).to_rgb8();
        let replicated = DynamicImage::ImageRgb8(DynamicImage::ImageLuma8(gray).to_rgb8());
        let via_rgb = apply(&replicated).to_rgb8();
        assert_eq!(via_rgb, direct);
    }
}
