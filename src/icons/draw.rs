//! Raster routines for marker artwork: the synthesized default dot, exact
//! resizing of decoded icons, and circular avatar composition.
//!
//! Everything here is pure and CPU-bound; callers run it on the blocking
//! pool via [`crate::runtime::execute_blocking`].

use image::{imageops::FilterType, DynamicImage, Rgba, RgbaImage};

use crate::icons::source::MarkerColor;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Anti-aliased coverage of a pixel whose center lies `distance` from the
/// circle center.
fn coverage(distance: f32, radius: f32) -> f32 {
    (radius - distance + 0.5).clamp(0.0, 1.0)
}

/// Source-over blend of `src` scaled by `coverage` onto `dst`
fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>, coverage: f32) {
    let src_alpha = (src[3] as f32 / 255.0) * coverage;
    if src_alpha <= 0.0 {
        return;
    }
    let dst_alpha = dst[3] as f32 / 255.0;
    let out_alpha = src_alpha + dst_alpha * (1.0 - src_alpha);

    for channel in 0..3 {
        let value = (src[channel] as f32 * src_alpha
            + dst[channel] as f32 * dst_alpha * (1.0 - src_alpha))
            / out_alpha;
        dst[channel] = value.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Iterate every pixel with its distance from the canvas center
fn for_each_pixel(canvas: &mut RgbaImage, mut f: impl FnMut(u32, u32, f32, &mut Rgba<u8>)) {
    let cx = canvas.width() as f32 / 2.0;
    let cy = canvas.height() as f32 / 2.0;
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let dx = x as f32 + 0.5 - cx;
        let dy = y as f32 + 0.5 - cy;
        f(x, y, (dx * dx + dy * dy).sqrt(), pixel);
    }
}

/// Fill a disk of `color` and a white ring of `ring_width` on its rim
fn draw_ringed_disk(canvas: &mut RgbaImage, radius: f32, ring_width: f32, color: Rgba<u8>) {
    let inner = radius - ring_width;
    for_each_pixel(canvas, |_, _, distance, pixel| {
        let outer_cov = coverage(distance, radius);
        blend(pixel, color, outer_cov);
        let ring_cov = (outer_cov - coverage(distance, inner)).max(0.0);
        blend(pixel, WHITE, ring_cov);
    });
}

/// Synthesized default marker: a filled circle with a white stroke border.
pub fn default_marker(width: u32, height: u32, color: MarkerColor, stroke: f32) -> RgbaImage {
    let mut canvas = RgbaImage::new(width.max(1), height.max(1));
    let radius = canvas.width().min(canvas.height()) as f32 / 2.0;
    draw_ringed_disk(&mut canvas, radius, stroke, color.to_rgba());
    canvas
}

/// Scale to exactly `width` x `height`. Aspect ratio is not preserved:
/// non-square targets stretch the source.
pub fn resize_exact(image: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    let (width, height) = (width.max(1), height.max(1));
    if image.width() == width && image.height() == height {
        return image.to_rgba8();
    }
    image
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgba8()
}

/// Circular avatar-in-dot: a `color` disk, a white ring `border` wide on
/// its rim, and the avatar center-cropped into the inner circle that lies
/// `border + padding` inside the edge.
pub fn compose_avatar(
    avatar: &DynamicImage,
    size: u32,
    color: MarkerColor,
    border: f32,
    padding: f32,
) -> RgbaImage {
    let size = size.max(1);
    let mut canvas = RgbaImage::new(size, size);
    let radius = size as f32 / 2.0;
    draw_ringed_disk(&mut canvas, radius, border, color.to_rgba());

    let inner_radius = radius - border - padding;
    if inner_radius <= 0.0 || avatar.width() == 0 || avatar.height() == 0 {
        return canvas;
    }

    // Center-crop: scale so the avatar covers the inner circle, then center
    let diameter = inner_radius * 2.0;
    let scale = (diameter / avatar.width() as f32).max(diameter / avatar.height() as f32);
    let scaled_width = (avatar.width() as f32 * scale).ceil().max(1.0) as u32;
    let scaled_height = (avatar.height() as f32 * scale).ceil().max(1.0) as u32;
    let scaled = resize_exact(avatar, scaled_width, scaled_height);
    let offset_x = (scaled_width as f32 - diameter) / 2.0;
    let offset_y = (scaled_height as f32 - diameter) / 2.0;
    let left = radius - inner_radius;

    for_each_pixel(&mut canvas, |x, y, distance, pixel| {
        let clip = coverage(distance, inner_radius);
        if clip <= 0.0 {
            return;
        }
        let sx = (x as f32 + 0.5 - left + offset_x).floor();
        let sy = (y as f32 + 0.5 - left + offset_y).floor();
        if sx < 0.0 || sy < 0.0 {
            return;
        }
        let (sx, sy) = (sx as u32, sy as u32);
        if sx < scaled_width && sy < scaled_height {
            blend(pixel, *scaled.get_pixel(sx, sy), clip);
        }
    });

    canvas
}
