//! RGB to I420 conversion through the public converter API.

use recorda::capture::{Pattern, PatternSource};
use recorda::config::ConverterConfig;
use recorda::converters::{ColorConverter, ColorMatrix, ColorRange, ScaleAlgorithm};
use recorda::frame::FrameBuffer;

fn close_to(actual: u8, expected: u8) -> bool {
    actual.abs_diff(expected) <= 1
}

/// `(Y, U, V)` near the centre of a solid frame converted from `src` to `dst` size.
fn convert_solid(
    config: ConverterConfig,
    rgb: [u8; 3],
    src: (u32, u32),
    dst: (u32, u32),
) -> (u8, u8, u8) {
    let image = PatternSource::new(src.0, src.1)
        .with_pattern(Pattern::Solid(rgb))
        .render(0);
    let mut converter = ColorConverter::new(config);
    let mut buffer = FrameBuffer::new(dst.0, dst.1).expect("Should allocate buffer");
    converter
        .convert(image.data(), image.width(), image.height(), &mut buffer)
        .expect("Should convert");

    let planar = buffer.as_planar();
    let (cx, cy) = (dst.0 as usize / 4, dst.1 as usize / 4);
    let (u, v) = planar.chroma(cx, cy);
    (planar.luma(cx * 2, cy * 2), u, v)
}

#[test]
fn test_bt601_limited_primaries() {
    let config = ConverterConfig::default();
    let cases = [
        ([255, 0, 0], (81, 90, 240)),
        ([0, 255, 0], (145, 54, 34)),
        ([0, 0, 255], (41, 240, 110)),
        ([255, 255, 255], (235, 128, 128)),
        ([0, 0, 0], (16, 128, 128)),
    ];

    for (rgb, (y, u, v)) in cases {
        let (ay, au, av) = convert_solid(config, rgb, (64, 48), (64, 48));
        assert!(close_to(ay, y), "{:?}: Y {} != {}", rgb, ay, y);
        assert!(close_to(au, u), "{:?}: U {} != {}", rgb, au, u);
        assert!(close_to(av, v), "{:?}: V {} != {}", rgb, av, v);
    }
}

#[test]
fn test_full_range_and_bt709() {
    let full = ConverterConfig::new().range(ColorRange::Full);
    assert_eq!(convert_solid(full, [255, 255, 255], (32, 32), (32, 32)).0, 255);
    assert_eq!(convert_solid(full, [0, 0, 0], (32, 32), (32, 32)).0, 0);

    // BT.709 weighs green more heavily than BT.601
    let hd = ConverterConfig::new().matrix(ColorMatrix::Bt709);
    let green_709 = convert_solid(hd, [0, 255, 0], (32, 32), (32, 32)).0;
    let green_601 = convert_solid(ConverterConfig::default(), [0, 255, 0], (32, 32), (32, 32)).0;
    assert!(green_709 > green_601);
}

#[test]
fn test_uniform_colour_survives_scaling() {
    for algorithm in [
        ScaleAlgorithm::NearestNeighbor,
        ScaleAlgorithm::Bilinear,
        ScaleAlgorithm::Bicubic,
    ] {
        let config = ConverterConfig::new().algorithm(algorithm);
        let direct = convert_solid(config, [30, 160, 200], (96, 64), (96, 64));
        let down = convert_solid(config, [30, 160, 200], (1920, 1080), (96, 64));
        let up = convert_solid(config, [30, 160, 200], (50, 30), (96, 64));
        assert_eq!(direct, down, "{:?} downscale", algorithm);
        assert_eq!(direct, up, "{:?} upscale", algorithm);
    }
}

#[test]
fn test_scale_context_is_rebuilt_on_size_change() {
    let mut converter = ColorConverter::default();
    let mut buffer = FrameBuffer::new(64, 64).expect("Should allocate buffer");

    let small = vec![0u8; 32 * 32 * 3];
    converter
        .convert(&small, 32, 32, &mut buffer)
        .expect("Should convert");
    assert_eq!(converter.context().map(|c| c.src_size()), Some((32, 32)));

    let large = vec![0u8; 128 * 96 * 3];
    converter
        .convert(&large, 128, 96, &mut buffer)
        .expect("Should convert");
    let context = converter.context().expect("Should keep a context");
    assert_eq!(context.src_size(), (128, 96));
    assert_eq!(context.dst_size(), (64, 64));
    assert_eq!(context.algorithm(), ScaleAlgorithm::Bicubic);
}
