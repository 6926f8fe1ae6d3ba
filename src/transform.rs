//
// transform.rs
// IML-Prep
//
// Pure geometric image operations shared by the redaction, resize and organize commands.
//

use image::{imageops, imageops::FilterType, DynamicImage, Rgb, RgbImage};

/// Centres the image on a black square canvas of side `max(w, h)`.
pub fn pad_to_square(img: &DynamicImage) -> DynamicImage {
    let side = img.width().max(img.height());
    pad_to(img, side, side, Rgb([0, 0, 0]))
}

/// Centres the image on a `w x h` canvas; the extra pixel of an odd padding goes bottom/right.
pub fn pad_to(img: &DynamicImage, w: u32, h: u32, fill: Rgb<u8>) -> DynamicImage {
    let mut canvas = RgbImage::from_pixel(w, h, fill);
    let left = w.saturating_sub(img.width()) / 2;
    let top = h.saturating_sub(img.height()) / 2;
    imageops::overlay(&mut canvas, &img.to_rgb8(), left as i64, top as i64);
    DynamicImage::ImageRgb8(canvas)
}

/// Pads to a square, then averages source pixels into each target pixel (area resampling).
pub fn pad_and_resize(img: &DynamicImage, target: u32) -> DynamicImage {
    pad_to_square(img).thumbnail_exact(target, target)
}

/// Fits inside `target x target` without upscaling, then pads to the full square.
pub fn letterbox(img: &DynamicImage, target: u32, fill: Rgb<u8>) -> DynamicImage {
    let fitted = if img.width() > target || img.height() > target {
        img.resize(target, target, FilterType::Lanczos3)
    } else {
        img.clone()
    };
    pad_to(&fitted, target, target, fill)
}

/// Scales to cover `target x target` (times `extra_zoom`) and crops the centre.
pub fn zoom_crop(img: &DynamicImage, target: u32, extra_zoom: f64) -> DynamicImage {
    let (w, h) = (img.width().max(1) as f64, img.height().max(1) as f64);
    let t = target as f64;
    let scale = (t / w).max(t / h) * extra_zoom;
    let new_w = ((w * scale).round() as u32).max(1);
    let new_h = ((h * scale).round() as u32).max(1);
    let scaled = img.to_rgb8();
    let scaled = imageops::resize(&scaled, new_w, new_h, FilterType::Lanczos3);

    // Negative offsets (zoom < 1) leave a black margin, as cropping past the edge does.
    let left = (new_w as i64 - target as i64).div_euclid(2);
    let top = (new_h as i64 - target as i64).div_euclid(2);
    let mut canvas = RgbImage::new(target, target);
    imageops::overlay(&mut canvas, &scaled, -left, -top);
    DynamicImage::ImageRgb8(canvas)
}

/// Blackens a `size x size` square in the top-right corner, clipped to the image.
pub fn black_square(img: &mut DynamicImage, size: u32) {
    let (w, h) = (img.width(), img.height());
    let x0 = w.saturating_sub(size);
    let y1 = size.min(h);
    let mut rgb = img.to_rgb8();
    for y in 0..y1 {
        for x in x0..w {
            rgb.put_pixel(x, y, Rgb([0, 0, 0]));
        }
    }
    *img = DynamicImage::ImageRgb8(rgb);
}

pub fn mirror(img: &DynamicImage) -> DynamicImage {
    img.fliph()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn white(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([255, 255, 255])))
    }

    #[test]
    fn pad_to_square_centres_content() {
        let out = pad_to_square(&white(4, 2));
        assert_eq!(out.dimensions(), (4, 4));
        // pad 2 rows: 1 on top, 1 at the bottom
        assert_eq!(out.get_pixel(0, 0).0[..3], [0, 0, 0]);
        assert_eq!(out.get_pixel(0, 1).0[..3], [255, 255, 255]);
        assert_eq!(out.get_pixel(3, 2).0[..3], [255, 255, 255]);
        assert_eq!(out.get_pixel(3, 3).0[..3], [0, 0, 0]);
    }

    #[test]
    fn odd_padding_goes_bottom_right() {
        let out = pad_to_square(&white(2, 5));
        assert_eq!(out.dimensions(), (5, 5));
        // pad 3 columns: 1 left, 2 right
        assert_eq!(out.get_pixel(0, 2).0[..3], [0, 0, 0]);
        assert_eq!(out.get_pixel(1, 2).0[..3], [255, 255, 255]);
        assert_eq!(out.get_pixel(2, 2).0[..3], [255, 255, 255]);
        assert_eq!(out.get_pixel(3, 2).0[..3], [0, 0, 0]);
    }

    #[test]
    fn pad_and_resize_hits_target() {
        let out = pad_and_resize(&white(300, 120), 64);
        assert_eq!(out.dimensions(), (64, 64));
    }

    #[test]
    fn pad_and_resize_averages_whole_blocks() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(8, 8, |x, _| {
            if x < 4 {
                Rgb([0, 0, 0])
            } else {
                Rgb([200, 200, 200])
            }
        }));
        let out = pad_and_resize(&img, 4);
        // columns next to the edge only see their own 2x2 source block
        assert_eq!(out.get_pixel(1, 2).0[..3], [0, 0, 0]);
        assert_eq!(out.get_pixel(2, 2).0[..3], [200, 200, 200]);
    }

    #[test]
    fn letterbox_never_upscales() {
        let out = letterbox(&white(10, 20), 64, Rgb([0, 0, 0]));
        assert_eq!(out.dimensions(), (64, 64));
        assert_eq!(out.get_pixel(0, 0).0[..3], [0, 0, 0]);
        assert_eq!(out.get_pixel(32, 32).0[..3], [255, 255, 255]);
        assert_eq!(out.get_pixel(32, 10).0[..3], [0, 0, 0]);
    }

    #[test]
    fn zoom_crop_fills_target() {
        let out = zoom_crop(&white(200, 100), 50, 1.2);
        assert_eq!(out.dimensions(), (50, 50));
        assert!(out.to_rgb8().pixels().all(|p| p.0[0] > 200));
    }

    #[test]
    fn black_square_is_clipped_to_image() {
        let mut img = white(30, 10);
        black_square(&mut img, 50);
        assert!(img.to_rgb8().pixels().all(|p| p.0 == [0, 0, 0]));

        let mut img = white(100, 100);
        black_square(&mut img, 40);
        assert_eq!(img.get_pixel(99, 0).0[..3], [0, 0, 0]);
        assert_eq!(img.get_pixel(60, 39).0[..3], [0, 0, 0]);
        assert_eq!(img.get_pixel(59, 0).0[..3], [255, 255, 255]);
        assert_eq!(img.get_pixel(99, 40).0[..3], [255, 255, 255]);
    }

    #[test]
    fn mirror_flips_columns() {
        let mut img = white(4, 1);
        black_square(&mut img, 1);
        let flipped = mirror(&img);
        assert_eq!(flipped.get_pixel(0, 0).0[..3], [0, 0, 0]);
        assert_eq!(flipped.get_pixel(3, 0).0[..3], [255, 255, 255]);
    }
}
