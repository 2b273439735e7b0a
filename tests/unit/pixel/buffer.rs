use super::*;

fn gradient_buffer(w: u32, h: u32) -> PixelBuffer {
    let mut b = PixelBuffer::new_transparent(Size::new(w, h));
    for y in 0..h {
        for x in 0..w {
            b.set_pixel(x, y, [x as u8, y as u8, 0, 255]);
        }
    }
    b
}

#[test]
fn from_raw_validates_length() {
    assert!(PixelBuffer::from_raw(Size::new(2, 2), vec![0u8; 15]).is_err());
    let b = PixelBuffer::from_raw(Size::new(2, 2), vec![0u8; 16]).unwrap();
    assert_eq!(b.byte_len(), 16);
    assert_eq!(b.format(), PixelFormat::Rgba8Premul);
}

#[test]
fn crop_copies_sub_rect() {
    let b = gradient_buffer(8, 6);
    let c = b.crop(IRect::new(2, 1, 5, 4)).unwrap();
    assert_eq!(c.size(), Size::new(3, 3));
    assert_eq!(c.pixel(0, 0), [2, 1, 0, 255]);
    assert_eq!(c.pixel(2, 2), [4, 3, 0, 255]);
}

#[test]
fn crop_clips_and_rejects_disjoint() {
    let b = gradient_buffer(4, 4);
    let c = b.crop(IRect::new(2, 2, 10, 10)).unwrap();
    assert_eq!(c.size(), Size::new(2, 2));
    assert!(b.crop(IRect::new(10, 10, 12, 12)).is_err());
}

#[test]
fn resized_constant_stays_constant() {
    let b = PixelBuffer::filled(Size::new(4, 4), Rgba8Premul::from_argb(0xFF40_8020));
    let r = b.resized(Size::new(9, 3)).unwrap();
    assert_eq!(r.size(), Size::new(9, 3));
    for px in r.data().chunks_exact(4) {
        assert_eq!(px, &[0x40, 0x80, 0x20, 0xFF]);
    }
}

#[test]
fn out_of_bounds_pixel_access_is_inert() {
    let mut b = PixelBuffer::new_transparent(Size::new(1, 1));
    b.set_pixel(5, 5, [1, 2, 3, 4]);
    assert_eq!(b.pixel(5, 5), [0; 4]);
    assert_eq!(b.pixel(0, 0), [0; 4]);
}
