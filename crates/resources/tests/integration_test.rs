//! Integration tests for image and shader loading from disk.

use std::io::Cursor;
use std::path::PathBuf;

use vkinterop_resources::{ResourceError, SPIRV_MAGIC, decode_pixels, load_pixels, load_spirv};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("vkinterop-{}-{name}", std::process::id()))
}

fn encode_png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([x as u8, y as u8, 0x80, 0xff])
    });
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    bytes
}

#[test]
fn test_load_png_from_disk() {
    let path = temp_path("texture.png");
    std::fs::write(&path, encode_png(3, 2)).unwrap();

    let decoded = load_pixels(&path).expect("Failed to load png");
    std::fs::remove_file(&path).ok();

    assert_eq!((decoded.width, decoded.height), (3, 2));
    assert_eq!(decoded.channels, 4);
    assert_eq!(decoded.pixels.len(), 3 * 2 * 4);
    // Row 1, column 2
    let offset = (3 + 2) * 4;
    assert_eq!(&decoded.pixels[offset..offset + 4], &[2, 1, 0x80, 0xff]);
}

#[test]
fn test_decode_matches_load() {
    let bytes = encode_png(4, 4);
    let path = temp_path("same.png");
    std::fs::write(&path, &bytes).unwrap();

    let from_disk = load_pixels(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(decode_pixels(&bytes).unwrap(), from_disk);
}

#[test]
fn test_missing_files_reported() {
    let path = temp_path("does-not-exist.png");
    assert!(matches!(
        load_pixels(&path),
        Err(ResourceError::FileNotFound(p)) if p == path
    ));
    assert!(matches!(
        load_spirv(&path),
        Err(ResourceError::FileNotFound(_))
    ));
}

#[test]
fn test_load_spirv() {
    let mut module = SPIRV_MAGIC.to_le_bytes().to_vec();
    module.extend_from_slice(&0x0001_0000u32.to_le_bytes());
    let path = temp_path("shader.spv");
    std::fs::write(&path, &module).unwrap();

    let loaded = load_spirv(&path).expect("Failed to load SPIR-V");
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded, module);
}

#[test]
fn test_load_spirv_rejects_unaligned() {
    let path = temp_path("broken.spv");
    std::fs::write(&path, [0x03, 0x02, 0x23, 0x07, 0x00]).unwrap();

    let result = load_spirv(&path);
    std::fs::remove_file(&path).ok();
    assert!(matches!(result, Err(ResourceError::InvalidSpirv { .. })));
}
