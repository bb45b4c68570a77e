use image::{Rgb, RgbImage};

pub(crate) const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Outlines `[x1, y1, x2, y2]` with a border `thickness` pixels wide,
/// clipped to the image.
pub(crate) fn draw_rect(image: &mut RgbImage, bbox: [u32; 4], thickness: u32, color: Rgb<u8>) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }

    let [x1, y1, x2, y2] = bbox;
    let x2 = x2.min(w - 1);
    let y2 = y2.min(h - 1);

    if x1 > x2 || y1 > y2 {
        return;
    }

    for t in 0..thickness {
        for x in x1..=x2 {
            if y1 + t <= y2 {
                image.put_pixel(x, y1 + t, color);
            }
            if y2 >= y1 + t {
                image.put_pixel(x, y2 - t, color);
            }
        }
        for y in y1..=y2 {
            if x1 + t <= x2 {
                image.put_pixel(x1 + t, y, color);
            }
            if x2 >= x1 + t {
                image.put_pixel(x2 - t, y, color);
            }
        }
    }
}

/// Fills `[x1, y1, x2, y2]`, clipped to the image.
pub(crate) fn fill_rect(image: &mut RgbImage, bbox: [u32; 4], color: Rgb<u8>) {
    let (w, h) = image.dimensions();
    let [x1, y1, x2, y2] = bbox;

    for y in y1..y2.min(h) {
        for x in x1..x2.min(w) {
            image.put_pixel(x, y, color);
        }
    }
}
