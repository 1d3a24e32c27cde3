//! Integration tests for decoding assets from disk.

use std::path::PathBuf;

use frameflow_assets::{AssetError, ImageData, SPIRV_MAGIC, SpirvBlob};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("frameflow-assets-{}-{}", std::process::id(), name))
}

#[test]
fn test_load_png_as_rgba8() {
    let path = temp_path("checker.png");
    let mut png = image::RgbImage::new(3, 2);
    png.put_pixel(0, 0, image::Rgb([255, 0, 0]));
    png.put_pixel(2, 1, image::Rgb([0, 0, 255]));
    png.save(&path).expect("Failed to write test PNG");

    let decoded = ImageData::load(&path).expect("Failed to decode test PNG");
    std::fs::remove_file(&path).ok();

    assert_eq!((decoded.width(), decoded.height()), (3, 2));
    assert_eq!(decoded.byte_len(), 3 * 2 * 4);
    // RGB input gains an opaque alpha channel.
    assert_eq!(&decoded.pixels()[0..4], &[255, 0, 0, 255]);
    let last = decoded.pixels().len() - 4;
    assert_eq!(&decoded.pixels()[last..], &[0, 0, 255, 255]);
}

#[test]
fn test_load_corrupt_image_is_error() {
    let path = temp_path("corrupt.png");
    std::fs::write(&path, b"definitely not a png").unwrap();

    let result = ImageData::load(&path);
    std::fs::remove_file(&path).ok();

    assert!(matches!(result, Err(AssetError::Image(_))));
}

#[test]
fn test_load_spirv_file() {
    let path = temp_path("shader.spv");
    let bytes: Vec<u8> = [SPIRV_MAGIC, 0x0001_0000, 0, 8, 0]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect();
    std::fs::write(&path, &bytes).unwrap();

    let blob = SpirvBlob::load(&path).expect("Failed to load SPIR-V");
    std::fs::remove_file(&path).ok();

    assert_eq!(blob.words().len(), 5);
    assert_eq!(blob.words()[3], 8);
}

#[test]
fn test_decode_png_from_memory() {
    let mut bytes = std::io::Cursor::new(Vec::new());
    image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 40]))
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("Failed to encode test PNG");

    let decoded = ImageData::from_encoded(bytes.get_ref()).expect("Failed to decode PNG bytes");
    assert_eq!((decoded.width(), decoded.height()), (2, 2));
    assert_eq!(&decoded.pixels()[0..4], &[10, 20, 30, 40]);
}
