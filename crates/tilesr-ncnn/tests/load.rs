use std::fs;

use tilesr_core::error::EngineError;
use tilesr_core::types::Tensor;
use tilesr_ncnn::Model;

fn tagged_f32(values: &[f32]) -> Vec<u8> {
    let mut out = 0u32.to_le_bytes().to_vec();
    out.extend(values.iter().flat_map(|v| v.to_le_bytes()));
    out
}

#[test]
fn interp_network_needs_no_weights() {
    let param = "7767517\n2 2\n\
        Input data 0 1 data\n\
        Interp up 1 1 data output 0=1 1=4.0 2=4.0\n";
    let model = Model::from_bytes("interp-x4", param, &[]).expect("model");
    assert_eq!(model.scale(), 4);
    assert_eq!(model.metadata().weight_bytes, 0);
    assert_eq!(model.metadata().layer_count, 2);

    let mut data = vec![0.25f32; 4];
    data.extend([0.5; 4]);
    data.extend([0.75; 4]);
    let input = Tensor::from_vec(3, 2, 2, data).expect("tensor");
    let out = model.forward(input).expect("forward");
    assert_eq!(out.shape(), (3, 8, 8));
    assert!(out.plane(1).iter().all(|&v| v == 0.5));
}

#[test]
fn strided_convolution_divides_native_scale() {
    let param = "7767517\n3 3\n\
        Input data 0 1 data\n\
        Convolution down 1 1 data feat 0=48 1=1 3=2 6=144\n\
        PixelShuffle up 1 1 feat output 0=4\n";
    let model = Model::from_bytes("stride", param, &tagged_f32(&[0.0; 144])).expect("model");
    assert_eq!(model.scale(), 2);

    let out = model.forward(Tensor::zeros(3, 6, 6)).expect("forward");
    assert_eq!(out.shape(), (3, 12, 12));
}

#[test]
fn blob_named_output_is_preferred_over_later_sinks() {
    let param = "7767517\n4 5\n\
        Input data 0 1 data\n\
        Split split 1 2 data a b\n\
        Noop keep 1 1 b output\n\
        Noop side 1 1 a z\n";
    let model = Model::from_bytes("two-sinks", param, &[]).expect("model");
    assert_eq!(model.graph().output_name(), "output");
    assert_eq!(model.graph().input_name(), "data");
    assert_eq!(model.scale(), 1);
}

#[test]
fn fixed_size_interp_has_no_native_scale() {
    let param = "7767517\n2 2\n\
        Input data 0 1 data\n\
        Interp up 1 1 data output 0=2 3=64 4=64\n";
    let err = Model::from_bytes("fixed", param, &[]).expect_err("no integer scale");
    match err {
        EngineError::ModelParse { message, .. } => assert!(message.contains("upscale factor")),
        other => panic!("unexpected error variant: {other:?}"),
    }
}

#[test]
fn working_set_counts_input_and_two_largest_blobs() {
    let param = "7767517\n3 3\n\
        Input data 0 1 data\n\
        Convolution route 1 1 data feat 0=12 1=1 6=36\n\
        PixelShuffle up 1 1 feat output 0=2\n";
    let model = Model::from_bytes("x2", param, &tagged_f32(&[0.0; 36])).expect("model");
    // input 3·100·4, feat 12·100·4, output 3·400·4
    assert_eq!(model.graph().working_set_bytes(10, 10), 1200 + 4800 + 4800);
}

#[test]
fn binary_param_file_is_a_parse_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let param = dir.path().join("packed.param");
    let bin = dir.path().join("packed.bin");
    fs::write(&param, [0xDDu8, 0x85, 0x76, 0x00, 0xFF, 0xFE]).expect("write param");
    fs::write(&bin, b"").expect("write bin");

    let err = Model::load(&param, &bin).expect_err("binary param");
    match err {
        EngineError::ModelParse { path, .. } => assert_eq!(path, param),
        other => panic!("unexpected error variant: {other:?}"),
    }
}

#[test]
fn loaded_model_records_its_paths() {
    let dir = tempfile::tempdir().expect("tempdir");
    let param = dir.path().join("flat.param");
    let bin = dir.path().join("flat.bin");
    fs::write(
        &param,
        "7767517\n2 2\nInput data 0 1 data\nInterp up 1 1 data output 0=3 1=2.0 2=2.0\n",
    )
    .expect("write param");
    fs::write(&bin, b"").expect("write bin");

    let model = Model::load(&param, &bin).expect("load");
    assert_eq!(model.metadata().name, "flat");
    assert_eq!(model.param_path(), param);
    assert_eq!(model.weights_path(), bin);
    assert_eq!(model.scale(), 2);
}

#[test]
fn oversized_convolution_is_rejected_at_load() {
    let param = "7767517\n2 2\n\
        Input data 0 1 data\n\
        Convolution huge 1 1 data output 0=2147483647 1=2147483647 11=2147483647 6=1\n";
    let err = Model::from_bytes("huge", param, &[]).expect_err("kernel size overflows");
    match err {
        EngineError::ModelParse { message, .. } => assert!(message.contains("overflows")),
        other => panic!("unexpected error variant: {other:?}"),
    }
}

#[test]
fn chained_interp_scales_that_overflow_are_rejected() {
    let param = "7767517\n4 4\n\
        Input data 0 1 data\n\
        Interp a 1 1 data x1 0=1 1=4294967296.0 2=4294967296.0\n\
        Interp b 1 1 x1 x2 0=1 1=4294967296.0 2=4294967296.0\n\
        Interp c 1 1 x2 output 0=1 1=4294967296.0 2=4294967296.0\n";
    let err = Model::from_bytes("chain", param, &[]).expect_err("ratio overflows");
    match err {
        EngineError::ModelParse { message, .. } => assert!(message.contains("overflows")),
        other => panic!("unexpected error variant: {other:?}"),
    }
}

#[test]
fn working_set_saturates_for_huge_inputs() {
    let param = "7767517\n2 2\n\
        Input data 0 1 data\n\
        Interp up 1 1 data output 0=1 1=2.0 2=2.0\n";
    let model = Model::from_bytes("x2", param, &[]).expect("model");
    assert_eq!(model.graph().working_set_bytes(usize::MAX, usize::MAX), usize::MAX);
}
