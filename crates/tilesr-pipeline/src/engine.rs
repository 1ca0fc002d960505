//! Engine facade: device, model and configuration behind one handle.
//!
//! ```text
//!  Image ──► TileGrid ──► extract ──► InferenceExecutor ──► Stitcher ──► Image
//!              │            (per tile, in parallel on the device queues)
//!              └── tile size from config or device heap budget
//! ```
//!
//! # Concurrency
//!
//! `process` takes `&self` and may run concurrently from several threads.
//! The model and the compute context are shared read-only through `Arc`;
//! each call owns its tiles and output buffer.  Configuration setters take
//! `&mut self`, so they cannot interleave with in-flight calls on the same
//! engine.  Separate engines share nothing mutable.
//!
//! # Reloading
//!
//! `load` swaps the active `Arc<Model>`.  Calls already running keep the
//! model they started with; it is released when the last of them finishes.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rayon::prelude::*;
use serde::Serialize;
use tilesr_core::backend::{ModelMetadata, UpscaleBackend};
use tilesr_core::config::{EngineConfig, ScaleFactor, TileSize};
use tilesr_core::context::{ComputeContext, DeviceInfo, DeviceManager};
use tilesr_core::error::{EngineError, Result};
use tilesr_core::types::Image;
use tilesr_ncnn::Model;
use tracing::{debug, info, instrument};

use crate::executor::{InferenceExecutor, InferenceMetrics, InferenceMetricsSnapshot, OutputTile};
use crate::stitcher;
use crate::tiler::TileGrid;

/// Summary of one `process` call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProcessStats {
    pub tiles: usize,
    /// Resolved tile size in pixels; `0` means untiled.
    pub tile_size: u32,
    pub scale: u32,
    pub output_width: u32,
    pub output_height: u32,
    #[serde(serialize_with = "serialize_duration_ms")]
    pub elapsed: Duration,
    /// Peak device memory reserved by this engine's context so far.
    pub peak_reserved_bytes: usize,
}

fn serialize_duration_ms<S: serde::Serializer>(
    d: &Duration,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// A super-resolution engine bound to one compute device.
pub struct Engine {
    config: EngineConfig,
    devices: DeviceManager,
    ctx: Arc<ComputeContext>,
    model: Option<Arc<Model>>,
    metrics: Arc<InferenceMetrics>,
}

impl Engine {
    /// Validate `config`, discover devices and open the selected one.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_devices(config, DeviceManager::discover())
    }

    /// As [`Engine::new`] with an explicit device list.
    pub fn with_devices(config: EngineConfig, devices: DeviceManager) -> Result<Self> {
        config.validate()?;
        let ctx = devices.select(config.device, config.memory_limit_bytes)?;
        info!(
            device = ctx.info().index,
            name = %ctx.info().name,
            scale = config.scale.get(),
            tile_size = ?config.tile_size,
            prepadding = config.prepadding,
            tta = config.tta,
            "Engine created"
        );
        Ok(Self {
            config,
            devices,
            ctx,
            model: None,
            metrics: Arc::new(InferenceMetrics::new()),
        })
    }

    // ─── Model ──────────────────────────────────────────────────────────

    /// Load (or replace) the active model.
    pub fn load(&mut self, param_path: &Path, weights_path: &Path) -> Result<()> {
        let model = Model::load(param_path, weights_path)?;
        if let Some(prev) = self.model.as_ref() {
            debug!(previous = %prev.metadata().name, "Replacing loaded model");
        }
        self.model = Some(Arc::new(model));
        Ok(())
    }

    /// Load `<models_dir>/<name>.param` and `<models_dir>/<name>.bin`.
    pub fn load_named(&mut self, name: &str) -> Result<()> {
        let (param, bin) = self.config.model_paths(name);
        self.load(&param, &bin)
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn metadata(&self) -> Result<&ModelMetadata> {
        self.model
            .as_deref()
            .map(Model::metadata)
            .ok_or(EngineError::NotLoaded)
    }

    // ─── Processing ─────────────────────────────────────────────────────

    /// Upscale `image` with the engine's current configuration.
    pub fn process(&self, image: &Image) -> Result<Image> {
        self.process_with(image, &self.config)
    }

    /// Upscale `image` with an explicit per-call configuration.
    ///
    /// The device selector and memory limit of `config` are ignored; the
    /// engine stays on the device it was created with.
    pub fn process_with(&self, image: &Image, config: &EngineConfig) -> Result<Image> {
        self.process_with_stats(image, config).map(|(img, _)| img)
    }

    pub fn process_with_stats(
        &self,
        image: &Image,
        config: &EngineConfig,
    ) -> Result<(Image, ProcessStats)> {
        config.validate()?;
        let model = self.model.clone().ok_or(EngineError::NotLoaded)?;
        run_pipeline(&self.ctx, &model, &self.metrics, config, image)
    }

    // ─── Configuration ──────────────────────────────────────────────────

    /// Set the output scale; must be a power of two.
    pub fn set_scale(&mut self, scale: u32) -> Result<()> {
        self.config.scale = ScaleFactor::new(scale)?;
        Ok(())
    }

    /// Set the tile size in pixels; `0` disables tiling.
    pub fn set_tile_size(&mut self, tile_size: u32) {
        self.config.tile_size = TileSize::from_pixels(tile_size);
    }

    pub fn set_tile_policy(&mut self, policy: TileSize) -> Result<()> {
        if policy == TileSize::Fixed(0) {
            return Err(EngineError::Config(
                "fixed tile size must be > 0; use Disabled for a single tile".into(),
            ));
        }
        self.config.tile_size = policy;
        Ok(())
    }

    /// Set the context pixels added on each tile side; at most
    /// [`MAX_PREPADDING`](tilesr_core::config::MAX_PREPADDING).
    pub fn set_prepadding(&mut self, prepadding: u32) -> Result<()> {
        self.config = self.config.with_prepadding(prepadding)?;
        Ok(())
    }

    pub fn set_tta(&mut self, tta: bool) {
        self.config.tta = tta;
    }

    pub fn scale(&self) -> u32 {
        self.config.scale.get()
    }

    pub fn tile_size(&self) -> TileSize {
        self.config.tile_size
    }

    pub fn prepadding(&self) -> u32 {
        self.config.prepadding
    }

    pub fn tta(&self) -> bool {
        self.config.tta
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─── Device ─────────────────────────────────────────────────────────

    pub fn device(&self) -> &DeviceInfo {
        self.ctx.info()
    }

    pub fn devices(&self) -> &DeviceManager {
        &self.devices
    }

    pub fn context(&self) -> &Arc<ComputeContext> {
        &self.ctx
    }

    pub fn metrics(&self) -> InferenceMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("device", self.ctx.info())
            .field("model", &self.model.as_ref().map(|m| &m.metadata().name))
            .finish_non_exhaustive()
    }
}

/// Tile, infer and stitch one image.
#[instrument(skip_all, name = "upscale", fields(width = image.width(), height = image.height()))]
fn run_pipeline(
    ctx: &ComputeContext,
    model: &Model,
    metrics: &InferenceMetrics,
    config: &EngineConfig,
    image: &Image,
) -> Result<(Image, ProcessStats)> {
    let start = Instant::now();
    let scale = config.scale.get();
    let (w, h) = image.size();

    let tile_size = config.tile_size.resolve(ctx.heap_budget());
    let grid = TileGrid::new(w, h, tile_size, config.prepadding, scale)?;
    info!(
        tiles = grid.len(),
        cols = grid.cols(),
        rows = grid.rows(),
        tile_size,
        prepadding = config.prepadding,
        scale,
        native_scale = model.scale(),
        tta = config.tta,
        "Tile plan"
    );

    // The canvas and the finished tiles live until stitching completes.
    let _held = ctx.reserve(stitcher::held_bytes(&grid, image.channels())?)?;
    let has_alpha = image.layout().has_alpha();
    let executor = InferenceExecutor::new(model, ctx, metrics, scale, config.tta);
    let outputs: Vec<OutputTile> = ctx.install(|| {
        (0..grid.len())
            .into_par_iter()
            .map(|i| {
                let spec = grid.tile(i).ok_or_else(|| {
                    EngineError::InvariantViolation(format!("tile {i} missing from grid"))
                })?;
                let _input = ctx.reserve(spec.extracted_bytes(has_alpha)?)?;
                let tile = grid.extract(image, &spec)?;
                executor.run(&tile)
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let result = stitcher::stitch(grid, outputs, image.channels())?;

    let (_, peak) = ctx.memory_usage();
    let stats = ProcessStats {
        tiles: grid.len(),
        tile_size,
        scale,
        output_width: result.width(),
        output_height: result.height(),
        elapsed: start.elapsed(),
        peak_reserved_bytes: peak,
    };
    info!(
        tiles = stats.tiles,
        output_w = stats.output_width,
        output_h = stats.output_height,
        elapsed_ms = stats.elapsed.as_millis() as u64,
        peak_reserved_mb = stats.peak_reserved_bytes as f64 / (1024.0 * 1024.0),
        "Upscale complete"
    );
    Ok((result, stats))
}

// ─── Async backend ──────────────────────────────────────────────────────────

#[async_trait]
impl UpscaleBackend for Engine {
    async fn initialize(&self) -> Result<()> {
        let meta = self.metadata()?;
        info!(
            model = %meta.name,
            native_scale = meta.scale,
            device = %self.ctx.info().name,
            "Backend initialized"
        );
        Ok(())
    }

    async fn process(&self, input: Image) -> Result<Image> {
        let model = self.model.clone().ok_or(EngineError::NotLoaded)?;
        let ctx = self.ctx.clone();
        let metrics = self.metrics.clone();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            run_pipeline(&ctx, &model, &metrics, &config, &input).map(|(img, _)| img)
        })
        .await
        .map_err(|e| EngineError::TaskJoin(e.to_string()))?
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down engine");
        self.metrics.report();
        let (current, peak) = self.ctx.memory_usage();
        if current != 0 {
            return Err(EngineError::InvariantViolation(format!(
                "{current} bytes still reserved at shutdown"
            )));
        }
        debug!(peak_reserved_bytes = peak, "Engine shutdown complete");
        Ok(())
    }

    fn metadata(&self) -> Result<ModelMetadata> {
        Engine::metadata(self).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilesr_core::context::DeviceKind;

    fn one_cpu(budget: usize) -> DeviceManager {
        DeviceManager::with_devices(vec![DeviceInfo {
            index: 0,
            name: "test-cpu".into(),
            kind: DeviceKind::Cpu,
            heap_budget_bytes: budget,
            queue_count: 2,
        }])
    }

    #[test]
    fn process_without_model_is_not_loaded() {
        let engine =
            Engine::with_devices(EngineConfig::default(), one_cpu(1 << 30)).expect("engine");
        let img = Image::zeroed(4, 4, 3).expect("image");
        assert!(matches!(engine.process(&img), Err(EngineError::NotLoaded)));
        assert!(matches!(engine.metadata(), Err(EngineError::NotLoaded)));
    }

    #[test]
    fn setters_update_config() {
        let mut engine =
            Engine::with_devices(EngineConfig::default(), one_cpu(1 << 30)).expect("engine");
        engine.set_scale(2).expect("power of two");
        engine.set_tile_size(0);
        engine.set_prepadding(7).expect("prepadding");
        engine.set_tta(true);
        assert_eq!(engine.scale(), 2);
        assert_eq!(engine.tile_size(), TileSize::Disabled);
        assert_eq!(engine.prepadding(), 7);
        assert!(engine.tta());

        let err = engine.set_scale(3).expect_err("3 is not a power of two");
        assert!(matches!(err, EngineError::Config(_)));
        assert_eq!(engine.scale(), 2, "failed setter leaves scale unchanged");

        let err = engine
            .set_prepadding(u32::MAX / 2 + 1)
            .expect_err("prepadding beyond the maximum");
        assert!(matches!(err, EngineError::Config(_)));
        assert_eq!(engine.prepadding(), 7, "failed setter leaves prepadding unchanged");
    }

    #[test]
    fn tile_policy_rejects_fixed_zero() {
        let mut engine =
            Engine::with_devices(EngineConfig::default(), one_cpu(1 << 30)).expect("engine");
        assert!(engine.set_tile_policy(TileSize::Fixed(0)).is_err());
        engine.set_tile_policy(TileSize::Auto).expect("auto");
        assert_eq!(engine.tile_size(), TileSize::Auto);
    }

    #[test]
    fn device_index_out_of_range_fails_construction() {
        let config = EngineConfig::builder()
            .device(tilesr_core::config::DeviceSelector::Index(4))
            .build()
            .expect("config");
        let err = Engine::with_devices(config, one_cpu(1 << 30)).expect_err("no device 4");
        assert!(matches!(err, EngineError::DeviceUnavailable(_)));
    }
}
