use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detections::Detection;
use crate::error::ServiceError;

// Per-class box colors, cycled by class hash.
const BOX_COLORS: [[u8; 3]; 6] = [
    [0, 0, 255],
    [255, 80, 0],
    [0, 200, 80],
    [200, 0, 200],
    [255, 200, 0],
    [0, 200, 200],
];

/// Draw detection boxes over the original image.
///
/// Boxes are two pixels thick, colored per class label. Labels themselves are
/// not rasterized onto the image; the textual tables in the response carry
/// class and confidence.
pub fn draw_detections(image: &DynamicImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);

    for detection in detections {
        let [x1, y1, x2, y2] = detection.bbox;
        let x1 = x1.clamp(0, width - 1);
        let y1 = y1.clamp(0, height - 1);
        let x2 = x2.clamp(0, width - 1);
        let y2 = y2.clamp(0, height - 1);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        let color = Rgb(class_color(&detection.label));
        for inset in 0..2i32 {
            let rect_w = (x2 - x1 + 1 - 2 * inset).max(1) as u32;
            let rect_h = (y2 - y1 + 1 - 2 * inset).max(1) as u32;
            let rect = Rect::at(x1 + inset, y1 + inset).of_size(rect_w, rect_h);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
    }

    canvas
}

fn class_color(label: &str) -> [u8; 3] {
    let hash: usize = label.bytes().map(|b| b as usize).sum();
    BOX_COLORS[hash % BOX_COLORS.len()]
}

/// Encode the annotated image losslessly as PNG and base64 the result for
/// transport inside the JSON response.
pub fn encode_png_base64(image: &RgbImage) -> Result<String, ServiceError> {
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut bytes, ImageFormat::Png)
        .map_err(|err| ServiceError::Internal(format!("failed to encode annotated image: {err}")))?;
    Ok(BASE64.encode(bytes.into_inner()))
}
