use std::io::Cursor;

use super::*;

fn png(w: u32, h: u32, px: impl Fn(u32, u32) -> [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(w, h, |x, y| image::Rgba(px(x, y)));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn decoder_with(id: &str, bytes: Vec<u8>) -> ImageRegionDecoder<MemoryMediaSource> {
    let src = MemoryMediaSource::new();
    src.insert(id, bytes);
    ImageRegionDecoder::new(src)
}

#[test]
fn memory_source_reports_missing_media() {
    let src = MemoryMediaSource::new();
    let err = src.open(&MediaId::new("nope")).unwrap_err();
    assert!(format!("{err:#}").contains("nope"));
}

#[test]
fn intrinsic_size_reads_header() {
    let dec = decoder_with("a.png", png(12, 7, |_, _| [0, 0, 0, 255]));
    assert_eq!(
        dec.intrinsic_size(&MediaId::new("a.png")).unwrap(),
        Size::new(12, 7)
    );
}

#[test]
fn decode_region_crops_and_premultiplies() {
    let dec = decoder_with("a.png", png(8, 8, |x, y| [x as u8 * 10, y as u8 * 10, 200, 128]));
    let out = dec
        .decode_region(&MediaId::new("a.png"), IRect::new(2, 3, 6, 5), 1)
        .unwrap();
    assert_eq!(out.size(), Size::new(4, 2));
    assert_eq!(
        out.pixel(0, 0),
        [
            ((20u16 * 128 + 127) / 255) as u8,
            ((30u16 * 128 + 127) / 255) as u8,
            ((200u16 * 128 + 127) / 255) as u8,
            128
        ]
    );
}

#[test]
fn decode_region_downsamples_by_sample_size() {
    let dec = decoder_with("a.png", png(16, 10, |_, _| [255, 0, 0, 255]));
    let out = dec
        .decode_region(&MediaId::new("a.png"), IRect::new(0, 0, 16, 10), 4)
        .unwrap();
    assert_eq!(out.size(), Size::new(4, 3));
    assert_eq!(out.pixel(1, 1), [255, 0, 0, 255]);
}

#[test]
fn garbage_bytes_are_decode_errors() {
    let dec = decoder_with("bad", b"not an image".to_vec());
    let err = dec
        .decode_region(&MediaId::new("bad"), IRect::new(0, 0, 1, 1), 1)
        .unwrap_err();
    assert!(matches!(err, PixelflowError::Decode(_)));
    assert!(matches!(
        dec.intrinsic_size(&MediaId::new("missing")),
        Err(PixelflowError::Decode(_))
    ));
}

#[test]
fn sampled_size_rounds_up() {
    assert_eq!(sampled_size(IRect::new(0, 0, 10, 9), 4), Size::new(3, 3));
    assert_eq!(sampled_size(IRect::new(0, 0, 1, 1), 8), Size::new(1, 1));
    assert_eq!(sampled_size(IRect::new(0, 0, 5, 5), 0), Size::new(5, 5));
}
