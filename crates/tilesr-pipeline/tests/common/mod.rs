//! Model fixtures written to temporary directories.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use half::f16;
use tilesr_core::config::EngineConfig;
use tilesr_core::context::{DeviceInfo, DeviceKind, DeviceManager};
use tilesr_core::types::Image;
use tilesr_pipeline::Engine;

pub struct ModelFiles {
    pub param: PathBuf,
    pub bin: PathBuf,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn write_model(dir: &Path, name: &str, param: &str, bin: &[u8]) -> ModelFiles {
    let files = ModelFiles {
        param: dir.join(format!("{name}.param")),
        bin: dir.join(format!("{name}.bin")),
    };
    fs::write(&files.param, param).expect("write param");
    fs::write(&files.bin, bin).expect("write bin");
    files
}

/// Flag-prefixed f32 kernel.
pub fn kernel_f32(values: &[f32]) -> Vec<u8> {
    let mut out = 0u32.to_le_bytes().to_vec();
    out.extend(raw_f32(values));
    out
}

/// Flag-prefixed f16 kernel, padded to 4 bytes.
pub fn kernel_f16(values: &[f32]) -> Vec<u8> {
    let mut out = 0x0130_6B47u32.to_le_bytes().to_vec();
    for v in values {
        out.extend(f16::from_f32(*v).to_le_bytes());
    }
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

pub fn raw_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Deterministic values in `[-0.5, 0.5)`.
pub fn noise(len: usize, seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 40) as f32 / (1u64 << 24) as f32) - 0.5
        })
        .collect()
}

pub fn test_image(width: u32, height: u32, channels: usize, seed: u64) -> Image {
    let data = noise(width as usize * height as usize * channels, seed)
        .into_iter()
        .map(|v| ((v + 0.5) * 255.0) as u8)
        .collect();
    Image::new(width, height, channels, data).expect("test image")
}

/// `n×` nearest-neighbour network: a 1×1 conv that routes input channel
/// `c` to the `n²` sub-pixel channels of output channel `c`, then a pixel
/// shuffle.
pub fn identity_model(dir: &Path, name: &str, n: usize) -> ModelFiles {
    let (param, kernel) = identity_parts(n);
    write_model(dir, name, &param, &kernel_f32(&kernel))
}

/// As [`identity_model`] with f16 kernel storage.
pub fn identity_model_f16(dir: &Path, name: &str, n: usize) -> ModelFiles {
    let (param, kernel) = identity_parts(n);
    write_model(dir, name, &param, &kernel_f16(&kernel))
}

fn identity_parts(n: usize) -> (String, Vec<f32>) {
    let out_c = 3 * n * n;
    let param = format!(
        "7767517\n3 3\n\
         Input data 0 1 data 0=0 1=0 2=3\n\
         Convolution route 1 1 data feat 0={out_c} 1=1 6={}\n\
         PixelShuffle up 1 1 feat output 0={n}\n",
        out_c * 3
    );
    let mut kernel = vec![0.0f32; out_c * 3];
    for oc in 0..out_c {
        kernel[oc * 3 + oc / (n * n)] = 1.0;
    }
    (param, kernel)
}

/// ×2 network made only of pointwise layers (1×1 conv with leaky ReLU,
/// 1×1 conv, pixel shuffle).
pub fn pointwise_model(dir: &Path, name: &str) -> ModelFiles {
    let param = "7767517\n4 4\n\
        Input data 0 1 data\n\
        Convolution conv0 1 1 data feat0 0=8 1=1 5=1 6=24 9=2 -23310=1,0.1\n\
        Convolution conv1 1 1 feat0 feat1 0=12 1=1 5=1 6=96\n\
        PixelShuffle up 1 1 feat1 output 0=2\n";
    let mut bin = kernel_f32(&noise(24, 1));
    bin.extend(raw_f32(&noise(8, 2)));
    bin.extend(kernel_f32(&noise(96, 3)));
    bin.extend(raw_f32(&noise(12, 4)));
    write_model(dir, name, param, &bin)
}

/// ×2 network with two stacked 3×3 convolutions (receptive radius 2), a
/// sigmoid gate and a pixel shuffle.
pub fn conv3x3_model(dir: &Path, name: &str) -> ModelFiles {
    let param = "7767517\n7 8\n\
        Input data 0 1 data\n\
        Convolution conv0 1 1 data feat0 0=8 1=3 4=1 5=1 6=216 9=1\n\
        Convolution conv1 1 1 feat0 feat1 0=12 1=3 4=-233 5=1 6=864\n\
        Split split 1 2 feat1 a b\n\
        Sigmoid gate 1 1 a g\n\
        BinaryOp mix 2 1 b g mixed 0=2\n\
        PixelShuffle up 1 1 mixed output 0=2\n";
    let mut bin = kernel_f32(&noise(216, 11));
    bin.extend(raw_f32(&noise(8, 12)));
    bin.extend(kernel_f32(&noise(864, 13)));
    bin.extend(raw_f32(&noise(12, 14)));
    write_model(dir, name, param, &bin)
}

/// ×2 network that ignores its input and emits `value` everywhere.
pub fn constant_model(dir: &Path, name: &str, value: f32) -> ModelFiles {
    let param = "7767517\n3 3\n\
        Input data 0 1 data\n\
        Convolution c 1 1 data feat 0=12 1=1 5=1 6=36\n\
        PixelShuffle up 1 1 feat output 0=2\n";
    let mut bin = kernel_f32(&[0.0; 36]);
    bin.extend(raw_f32(&[value; 12]));
    write_model(dir, name, param, &bin)
}

/// One CPU device with an explicit budget and queue count.
pub fn cpu_devices(queues: usize, budget: usize) -> DeviceManager {
    DeviceManager::with_devices(vec![DeviceInfo {
        index: 0,
        name: "fixture-cpu".into(),
        kind: DeviceKind::Cpu,
        heap_budget_bytes: budget,
        queue_count: queues,
    }])
}

pub fn engine_with(config: EngineConfig, model: &ModelFiles) -> Engine {
    let mut engine = Engine::with_devices(config, cpu_devices(4, 1 << 30)).expect("engine");
    engine.load(&model.param, &model.bin).expect("load model");
    engine
}
