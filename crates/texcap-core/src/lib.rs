use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Deepest mip bias the search will consider; pathological inputs get the
/// tenth-halving result instead of a longer loop.
pub const MAX_MIP_BIAS: u32 = 10;

pub const DEFAULT_TARGET_CAP: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestedMethod {
    Auto,
    MipBias,
    ProportionalResize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffectiveMethod {
    MipBias,
    ProportionalResize,
}

impl Display for EffectiveMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MipBias => f.write_str("mip-bias"),
            Self::ProportionalResize => f.write_str("proportional-resize"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn max_dim(self) -> u32 {
        self.width.max(self.height)
    }

    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn is_power_of_two(self) -> bool {
        self.width.is_power_of_two() && self.height.is_power_of_two()
    }

    /// Floor-halve both axes `levels` times, never dropping below 1 per axis.
    pub fn halved(self, levels: u32) -> Self {
        let shift = levels.min(31);
        Self {
            width: (self.width >> shift).max(1),
            height: (self.height >> shift).max(1),
        }
    }
}

impl Display for Dimensions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("texture dimensions must be positive (got {width}x{height})")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("target cap must be positive")]
    InvalidTargetCap,
    #[error("source file unavailable")]
    SourceUnavailable,
    #[error("backend error: {0}")]
    Backend(String),
}

/// Size-estimation knobs for reported savings. The defaults reproduce the
/// common case of four 8-bit channels under 4:1 block compression (one byte
/// per pixel in GPU memory), with stored-file savings tracking 80% of the
/// memory savings for re-encoded assets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SavingsModel {
    pub bytes_per_pixel: f64,
    pub file_ratio: f64,
}

impl Default for SavingsModel {
    fn default() -> Self {
        Self {
            bytes_per_pixel: 1.0,
            file_ratio: 0.8,
        }
    }
}

impl SavingsModel {
    pub fn estimate_bytes(&self, dimensions: Dimensions) -> u64 {
        (dimensions.pixel_count() as f64 * self.bytes_per_pixel).round() as u64
    }

    fn memory_saved(&self, original: Dimensions, reduced: Dimensions) -> u64 {
        self.estimate_bytes(original)
            .saturating_sub(self.estimate_bytes(reduced))
    }

    fn file_saved(&self, memory_saved: u64) -> u64 {
        (memory_saved as f64 * self.file_ratio).round() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    #[serde(rename_all = "camelCase")]
    AlreadyWithinTarget {
        dimensions: Dimensions,
        target_cap: u32,
    },
    NoEffectiveReduction,
    SourceUnavailable,
    Failed {
        message: String,
    },
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyWithinTarget {
                dimensions,
                target_cap,
            } => write!(f, "already within target size ({dimensions} <= {target_cap})"),
            Self::NoEffectiveReduction => f.write_str("could not compute a reduction"),
            Self::SourceUnavailable => f.write_str("source file unavailable"),
            Self::Failed { message } => f.write_str(message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReductionRequest {
    pub dimensions: Dimensions,
    pub target_cap: u32,
    pub method: RequestedMethod,
    pub source_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReductionOutcome {
    pub method: EffectiveMethod,
    pub original_dimensions: Dimensions,
    pub final_dimensions: Dimensions,
    pub mip_bias_level: Option<u32>,
    pub succeeded: bool,
    pub estimated_memory_saved_bytes: u64,
    pub estimated_file_saved_bytes: u64,
    /// Recorded by [`plan_reduction`] and the batch runner; the bare compute
    /// functions have no source notion and leave it false.
    pub source_available: bool,
    pub reason: Option<FailureReason>,
}

impl ReductionOutcome {
    fn unchanged(method: EffectiveMethod, dimensions: Dimensions, reason: FailureReason) -> Self {
        Self {
            method,
            original_dimensions: dimensions,
            final_dimensions: dimensions,
            mip_bias_level: None,
            succeeded: false,
            estimated_memory_saved_bytes: 0,
            estimated_file_saved_bytes: 0,
            source_available: false,
            reason: Some(reason),
        }
    }
}

fn validate(dimensions: Dimensions, target_cap: u32) -> Result<(), CoreError> {
    if dimensions.width == 0 || dimensions.height == 0 {
        return Err(CoreError::InvalidDimensions {
            width: dimensions.width,
            height: dimensions.height,
        });
    }
    if target_cap == 0 {
        return Err(CoreError::InvalidTargetCap);
    }
    Ok(())
}

/// Smallest number of halvings that brings the larger axis to or below the
/// cap, capped at [`MAX_MIP_BIAS`]. Zero when already within the cap.
pub fn mip_bias_level(dimensions: Dimensions, target_cap: u32) -> u32 {
    if dimensions.max_dim() <= target_cap {
        return 0;
    }
    let mut probe = dimensions;
    let mut bias = 0;
    while probe.max_dim() > target_cap && bias < MAX_MIP_BIAS {
        probe = probe.halved(1);
        bias += 1;
    }
    bias
}

pub fn compute_mip_bias_reduction(
    dimensions: Dimensions,
    target_cap: u32,
) -> Result<ReductionOutcome, CoreError> {
    compute_mip_bias_reduction_with_model(dimensions, target_cap, &SavingsModel::default())
}

pub fn compute_mip_bias_reduction_with_model(
    dimensions: Dimensions,
    target_cap: u32,
    savings: &SavingsModel,
) -> Result<ReductionOutcome, CoreError> {
    validate(dimensions, target_cap)?;
    if dimensions.max_dim() <= target_cap {
        return Ok(ReductionOutcome::unchanged(
            EffectiveMethod::MipBias,
            dimensions,
            FailureReason::AlreadyWithinTarget {
                dimensions,
                target_cap,
            },
        ));
    }

    let bias = mip_bias_level(dimensions, target_cap);
    if bias == 0 {
        return Ok(ReductionOutcome::unchanged(
            EffectiveMethod::MipBias,
            dimensions,
            FailureReason::NoEffectiveReduction,
        ));
    }

    let final_dimensions = dimensions.halved(bias);
    Ok(ReductionOutcome {
        method: EffectiveMethod::MipBias,
        original_dimensions: dimensions,
        final_dimensions,
        mip_bias_level: Some(bias),
        succeeded: true,
        estimated_memory_saved_bytes: savings.memory_saved(dimensions, final_dimensions),
        // A mip bias leaves the stored asset untouched.
        estimated_file_saved_bytes: 0,
        source_available: false,
        reason: None,
    })
}

pub fn compute_proportional_resize(
    dimensions: Dimensions,
    target_cap: u32,
) -> Result<ReductionOutcome, CoreError> {
    compute_proportional_resize_with_model(dimensions, target_cap, &SavingsModel::default())
}

pub fn compute_proportional_resize_with_model(
    dimensions: Dimensions,
    target_cap: u32,
    savings: &SavingsModel,
) -> Result<ReductionOutcome, CoreError> {
    validate(dimensions, target_cap)?;
    if dimensions.max_dim() <= target_cap {
        return Ok(ReductionOutcome::unchanged(
            EffectiveMethod::ProportionalResize,
            dimensions,
            FailureReason::AlreadyWithinTarget {
                dimensions,
                target_cap,
            },
        ));
    }

    let aspect = f64::from(dimensions.width) / f64::from(dimensions.height);
    let (final_width, final_height) = if dimensions.width >= dimensions.height {
        (target_cap, (f64::from(target_cap) / aspect).round() as u32)
    } else {
        ((f64::from(target_cap) * aspect).round() as u32, target_cap)
    };
    let final_dimensions = Dimensions::new(final_width.max(1), final_height.max(1));

    let memory_saved = savings.memory_saved(dimensions, final_dimensions);
    Ok(ReductionOutcome {
        method: EffectiveMethod::ProportionalResize,
        original_dimensions: dimensions,
        final_dimensions,
        mip_bias_level: None,
        succeeded: true,
        estimated_memory_saved_bytes: memory_saved,
        estimated_file_saved_bytes: savings.file_saved(memory_saved),
        source_available: false,
        reason: None,
    })
}

pub fn select_method(requested: RequestedMethod, source_available: bool) -> EffectiveMethod {
    match requested {
        RequestedMethod::MipBias => EffectiveMethod::MipBias,
        RequestedMethod::ProportionalResize if source_available => {
            EffectiveMethod::ProportionalResize
        }
        // A destructive resize needs source data to re-encode from.
        RequestedMethod::ProportionalResize => EffectiveMethod::MipBias,
        RequestedMethod::Auto if source_available => EffectiveMethod::ProportionalResize,
        RequestedMethod::Auto => EffectiveMethod::MipBias,
    }
}

pub fn plan_reduction(request: &ReductionRequest) -> Result<ReductionOutcome, CoreError> {
    plan_reduction_with_model(request, &SavingsModel::default())
}

pub fn plan_reduction_with_model(
    request: &ReductionRequest,
    savings: &SavingsModel,
) -> Result<ReductionOutcome, CoreError> {
    let mut outcome = match select_method(request.method, request.source_available) {
        EffectiveMethod::MipBias => {
            compute_mip_bias_reduction_with_model(request.dimensions, request.target_cap, savings)?
        }
        EffectiveMethod::ProportionalResize => {
            compute_proportional_resize_with_model(request.dimensions, request.target_cap, savings)?
        }
    };
    outcome.source_available = request.source_available;
    Ok(outcome)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureDescriptor {
    pub name: String,
    pub path: Option<PathBuf>,
    /// Re-encode master for this texture; `None` means no source data exists
    /// and destructive methods fall back to a mip bias.
    pub source_path: Option<PathBuf>,
    pub dimensions: Dimensions,
}

impl TextureDescriptor {
    pub fn source_available(&self) -> bool {
        self.source_path.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    pub target_cap: u32,
    pub method: RequestedMethod,
    /// When false the batch is a dry run: plans are computed and reported
    /// but the backend is never invoked.
    pub apply: bool,
    pub savings: SavingsModel,
}

pub trait ReductionBackend: Send + Sync {
    fn apply_mip_bias(&self, texture: &TextureDescriptor, bias: u32) -> Result<(), CoreError>;
    fn apply_resize(&self, texture: &TextureDescriptor, target: Dimensions)
        -> Result<(), CoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchEventKind {
    BatchStart,
    TexturePlanned,
    TextureReduced,
    TextureSkipped,
    TextureFailed,
    BatchComplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEvent {
    pub kind: BatchEventKind,
    pub texture: Option<String>,
    pub method: Option<EffectiveMethod>,
    pub duration_ms: Option<u64>,
    pub detail: Option<String>,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: BatchEvent);
}

fn emit(events: Option<&dyn EventSink>, event: BatchEvent) {
    if let Some(sink) = events {
        sink.emit(event);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureOutcome {
    pub texture: String,
    pub outcome: ReductionOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub processed: usize,
    pub reduced: usize,
    pub mip_bias_count: usize,
    pub resize_count: usize,
    pub with_source: usize,
    pub memory_saved_bytes: u64,
    pub file_saved_bytes: u64,
}

/// Outcomes are independent, so totals are a plain fold; callers that plan
/// textures elsewhere can aggregate with the same function.
pub fn summarize(results: &[TextureOutcome]) -> BatchSummary {
    let mut summary = BatchSummary::default();
    for result in results {
        let outcome = &result.outcome;
        summary.processed += 1;
        if outcome.succeeded {
            summary.reduced += 1;
        }
        match outcome.method {
            EffectiveMethod::MipBias => summary.mip_bias_count += 1,
            EffectiveMethod::ProportionalResize => summary.resize_count += 1,
        }
        if outcome.source_available {
            summary.with_source += 1;
        }
        summary.memory_saved_bytes += outcome.estimated_memory_saved_bytes;
        summary.file_saved_bytes += outcome.estimated_file_saved_bytes;
    }
    summary
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results: Vec<TextureOutcome>,
    pub summary: BatchSummary,
}

pub fn run_batch(
    backend: &dyn ReductionBackend,
    textures: &[TextureDescriptor],
    settings: &BatchSettings,
    events: Option<&dyn EventSink>,
) -> Result<BatchReport, CoreError> {
    if settings.target_cap == 0 {
        return Err(CoreError::InvalidTargetCap);
    }

    let start = Instant::now();
    emit(
        events,
        BatchEvent {
            kind: BatchEventKind::BatchStart,
            texture: None,
            method: None,
            duration_ms: None,
            detail: Some(format!(
                "textures={},targetCap={},apply={}",
                textures.len(),
                settings.target_cap,
                settings.apply
            )),
        },
    );

    let mut results = Vec::with_capacity(textures.len());
    for texture in textures {
        let request = ReductionRequest {
            dimensions: texture.dimensions,
            target_cap: settings.target_cap,
            method: settings.method,
            source_available: texture.source_available(),
        };
        let mut outcome = match plan_reduction_with_model(&request, &settings.savings) {
            Ok(outcome) => outcome,
            // Bad descriptors are recorded per texture; the batch goes on.
            Err(err) => {
                let mut failed = ReductionOutcome::unchanged(
                    select_method(settings.method, texture.source_available()),
                    texture.dimensions,
                    FailureReason::Failed {
                        message: err.to_string(),
                    },
                );
                failed.source_available = texture.source_available();
                failed
            }
        };

        emit(
            events,
            BatchEvent {
                kind: BatchEventKind::TexturePlanned,
                texture: Some(texture.name.clone()),
                method: Some(outcome.method),
                duration_ms: None,
                detail: Some(format!(
                    "original={},final={},npot={}",
                    outcome.original_dimensions,
                    outcome.final_dimensions,
                    !texture.dimensions.is_power_of_two()
                )),
            },
        );

        if outcome.succeeded && settings.apply {
            let applied = match outcome.method {
                EffectiveMethod::MipBias => {
                    backend.apply_mip_bias(texture, outcome.mip_bias_level.unwrap_or(0))
                }
                EffectiveMethod::ProportionalResize => {
                    backend.apply_resize(texture, outcome.final_dimensions)
                }
            };
            match applied {
                Ok(()) => emit(
                    events,
                    BatchEvent {
                        kind: BatchEventKind::TextureReduced,
                        texture: Some(texture.name.clone()),
                        method: Some(outcome.method),
                        duration_ms: None,
                        detail: None,
                    },
                ),
                Err(err) => {
                    let detail = err.to_string();
                    outcome.succeeded = false;
                    outcome.estimated_memory_saved_bytes = 0;
                    outcome.estimated_file_saved_bytes = 0;
                    outcome.reason = Some(match err {
                        CoreError::SourceUnavailable => FailureReason::SourceUnavailable,
                        _ => FailureReason::Failed {
                            message: detail.clone(),
                        },
                    });
                    emit(
                        events,
                        BatchEvent {
                            kind: BatchEventKind::TextureFailed,
                            texture: Some(texture.name.clone()),
                            method: Some(outcome.method),
                            duration_ms: None,
                            detail: Some(detail),
                        },
                    );
                }
            }
        } else if !outcome.succeeded {
            let kind = match &outcome.reason {
                Some(FailureReason::Failed { .. }) => BatchEventKind::TextureFailed,
                _ => BatchEventKind::TextureSkipped,
            };
            let detail = outcome.reason.as_ref().map(|reason| reason.to_string());
            emit(
                events,
                BatchEvent {
                    kind,
                    texture: Some(texture.name.clone()),
                    method: Some(outcome.method),
                    duration_ms: None,
                    detail,
                },
            );
        }

        results.push(TextureOutcome {
            texture: texture.name.clone(),
            outcome,
        });
    }

    let summary = summarize(&results);
    emit(
        events,
        BatchEvent {
            kind: BatchEventKind::BatchComplete,
            texture: None,
            method: None,
            duration_ms: Some(start.elapsed().as_millis() as u64),
            detail: Some(format!(
                "reduced={}/{},memorySavedBytes={}",
                summary.reduced, summary.processed, summary.memory_saved_bytes
            )),
        },
    );

    Ok(BatchReport { results, summary })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanConfig {
    pub target_cap: u32,
    pub method: String,
    pub bytes_per_pixel: f64,
    pub file_ratio: f64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        let savings = SavingsModel::default();
        Self {
            target_cap: DEFAULT_TARGET_CAP,
            method: "auto".to_string(),
            bytes_per_pixel: savings.bytes_per_pixel,
            file_ratio: savings.file_ratio,
        }
    }
}

impl PlanConfig {
    pub fn savings_model(&self) -> SavingsModel {
        SavingsModel {
            bytes_per_pixel: self.bytes_per_pixel,
            file_ratio: self.file_ratio,
        }
    }
}

pub fn resolve_plan_config(overrides: PlanConfig) -> PlanConfig {
    let mut cfg = PlanConfig::default();
    if overrides.target_cap > 0 {
        cfg.target_cap = overrides.target_cap;
    }
    if !overrides.method.trim().is_empty() {
        cfg.method = overrides.method;
    }
    if overrides.bytes_per_pixel > 0.0 {
        cfg.bytes_per_pixel = overrides.bytes_per_pixel;
    }
    if overrides.file_ratio >= 0.0 {
        cfg.file_ratio = overrides.file_ratio;
    }
    cfg
}
