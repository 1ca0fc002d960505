mod common;

use tilesr_core::config::{EngineConfig, TileSize};
use tilesr_core::types::Image;

use common::*;

fn config(scale: u32, tile: u32, prepadding: u32) -> EngineConfig {
    EngineConfig::builder()
        .scale(scale)
        .tile_size(tile)
        .prepadding(prepadding)
        .build()
        .expect("valid config")
}

#[test]
fn output_size_is_input_times_scale() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    for scale in [1u32, 2, 4, 8] {
        let model = identity_model(dir.path(), &format!("nearest-x{scale}"), scale as usize);
        let engine = engine_with(config(scale, 16, 2), &model);
        assert_eq!(engine.metadata().expect("metadata").scale, scale);

        let input = test_image(21, 13, 3, scale as u64);
        let output = engine.process(&input).expect("process");
        assert_eq!(output.size(), (21 * scale, 13 * scale), "scale x{scale}");
        assert_eq!(output.channels(), 3);
    }
}

#[test]
fn nearest_network_replicates_pixels_across_tiles() {
    let dir = tempfile::tempdir().expect("tempdir");
    let model = identity_model(dir.path(), "nearest-x2", 2);
    let engine = engine_with(config(2, 4, 1), &model);

    let input = test_image(9, 7, 3, 42);
    let output = engine.process(&input).expect("process");
    for y in 0..7 {
        for x in 0..9 {
            let src = input.pixel(x, y);
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                assert_eq!(output.pixel(2 * x + dx, 2 * y + dy), src, "at ({x},{y})");
            }
        }
    }
}

#[test]
fn single_pixel_at_x4_is_4x4() {
    let dir = tempfile::tempdir().expect("tempdir");
    let model = identity_model(dir.path(), "nearest-x4", 4);
    let engine = engine_with(config(4, 200, 10), &model);

    let input = Image::new(1, 1, 3, vec![10, 20, 30]).expect("image");
    let output = engine.process(&input).expect("process");
    assert_eq!(output.size(), (4, 4));
    assert!(output.as_bytes().chunks(3).all(|px| px == [10, 20, 30]));
}

#[test]
fn pointwise_tiling_is_bit_identical_to_single_tile() {
    let dir = tempfile::tempdir().expect("tempdir");
    let model = pointwise_model(dir.path(), "pointwise-x2");
    let input = test_image(37, 23, 3, 7);

    let untiled = engine_with(config(2, 0, 0), &model)
        .process(&input)
        .expect("untiled");
    for tile in [1u32, 5, 8, 16, 64] {
        let tiled = engine_with(config(2, tile, 0), &model)
            .process(&input)
            .expect("tiled");
        assert_eq!(tiled, untiled, "tile size {tile}");
    }
}

#[test]
fn padded_tiling_is_bit_identical_for_3x3_network() {
    let dir = tempfile::tempdir().expect("tempdir");
    let model = conv3x3_model(dir.path(), "conv3x3-x2");
    let input = test_image(29, 18, 3, 99);

    for prepadding in [2u32, 3] {
        let untiled = engine_with(config(2, 0, prepadding), &model)
            .process(&input)
            .expect("untiled");
        for tile in [4u32, 7, 16] {
            let tiled = engine_with(config(2, tile, prepadding), &model)
                .process(&input)
                .expect("tiled");
            assert_eq!(tiled, untiled, "tile {tile}, prepadding {prepadding}");
        }
    }
}

#[test]
fn requested_scale_differs_from_native_scale() {
    let dir = tempfile::tempdir().expect("tempdir");
    let model = identity_model(dir.path(), "nearest-x2", 2);
    let input = Image::new(3, 2, 3, [90u8, 160, 220].repeat(6)).expect("image");

    for scale in [1u32, 4] {
        let engine = engine_with(config(scale, 0, 0), &model);
        let output = engine.process(&input).expect("process");
        assert_eq!(output.size(), (3 * scale, 2 * scale));
        assert!(
            output.as_bytes().chunks(3).all(|px| px == [90, 160, 220]),
            "flat colour must survive x{scale} resampling"
        );
    }
}

#[test]
fn rgba_alpha_is_upscaled_separately() {
    let dir = tempfile::tempdir().expect("tempdir");
    let model = identity_model(dir.path(), "nearest-x2", 2);
    let engine = engine_with(config(2, 3, 1), &model);

    let data: Vec<u8> = (0..5 * 4).flat_map(|i| [i as u8, 0, 255, 128]).collect();
    let input = Image::new(5, 4, 4, data).expect("image");
    let output = engine.process(&input).expect("process");
    assert_eq!(output.size(), (10, 8));
    assert_eq!(output.channels(), 4);
    for px in output.as_bytes().chunks(4) {
        assert_eq!(px[3], 128, "constant alpha stays constant");
        assert_eq!(px[2], 255);
    }
    assert_eq!(&output.pixel(3, 5)[..3], &input.pixel(1, 2)[..3]);
}

#[test]
fn tta_on_equivariant_network_matches_plain_pass() {
    let dir = tempfile::tempdir().expect("tempdir");
    let model = identity_model(dir.path(), "nearest-x2", 2);
    let input = test_image(11, 6, 3, 5);

    let plain = engine_with(config(2, 4, 1), &model)
        .process(&input)
        .expect("plain");
    let mut engine = engine_with(config(2, 4, 1), &model);
    engine.set_tta(true);
    let augmented = engine.process(&input).expect("tta");
    assert_eq!(augmented, plain);
}

#[test]
fn f16_weights_load_and_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let model = identity_model_f16(dir.path(), "nearest-x2-f16", 2);
    let engine = engine_with(config(2, 0, 0), &model);
    let input = test_image(4, 4, 3, 3);
    let output = engine.process(&input).expect("process");
    assert_eq!(output.pixel(7, 7), input.pixel(3, 3));
}

#[test]
fn auto_tile_size_follows_heap_budget() {
    let dir = tempfile::tempdir().expect("tempdir");
    let model = identity_model(dir.path(), "nearest-x2", 2);
    let config = EngineConfig::builder()
        .scale(2)
        .tile_policy(TileSize::Auto)
        .build()
        .expect("config");
    let mut engine =
        tilesr_pipeline::Engine::with_devices(config.clone(), cpu_devices(2, 600 << 20))
            .expect("engine");
    engine.load(&model.param, &model.bin).expect("load");

    let input = test_image(250, 90, 3, 1);
    let (output, stats) = engine
        .process_with_stats(&input, &config)
        .expect("process");
    assert_eq!(stats.tile_size, 100);
    assert_eq!(stats.tiles, 3);
    assert_eq!(output.size(), (500, 180));
}

#[test]
fn per_call_config_overrides_engine_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let model = identity_model(dir.path(), "nearest-x2", 2);
    let engine = engine_with(config(2, 0, 0), &model);
    let input = test_image(6, 5, 3, 8);

    let per_call = engine.config().with_scale(4).expect("x4");
    let output = engine.process_with(&input, &per_call).expect("process");
    assert_eq!(output.size(), (24, 20));
    assert_eq!(engine.scale(), 2, "engine config is unchanged");
}
