use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use image::imageops::FilterType;
use regex::Regex;
use texcap_core::{
    resolve_plan_config, run_batch, BatchSettings, Dimensions, PlanConfig, RequestedMethod,
    TextureDescriptor,
};
use texcap_events::sink_from_env;
use texcap_fs::LooseFileBackend;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "texcap", version, about = "Batch texture resolution planning and reduction")]
struct Cli {
    #[command(subcommand)]
    command: TopLevelCommand,
}

#[derive(Subcommand, Debug)]
enum TopLevelCommand {
    /// Compute reduction plans without touching any file.
    Plan(PlanArgs),
    /// Compute reduction plans and apply them to the matched files.
    Apply(ApplyArgs),
    /// List the built-in target resolution presets.
    Presets,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Texture file, directory, or regex matched against file names.
    #[arg(long, short = 'i')]
    input: String,
    /// Root directory for regex input matching (defaults to current directory).
    #[arg(long, short = 'r')]
    input_root: Option<PathBuf>,
    /// Recurse when scanning directories / regex matches.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    recursive: bool,
    /// If set, abort the whole run on the first input error.
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    strict: bool,
    /// Largest allowed dimension after reduction.
    #[arg(long, short = 't', default_value_t = texcap_core::DEFAULT_TARGET_CAP)]
    target: u32,
    /// Reduction method: auto, mip-bias, or resize.
    #[arg(long, short = 'M', default_value = "auto")]
    method: String,
    /// Directory holding re-encode source images, mirrored by relative path.
    #[arg(long)]
    source_root: Option<PathBuf>,
    /// Estimated GPU bytes per pixel for the savings report.
    #[arg(long)]
    bytes_per_pixel: Option<f64>,
    /// Fraction of memory savings counted as stored-file savings on resize.
    #[arg(long)]
    file_ratio: Option<f64>,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    #[command(flatten)]
    plan: PlanArgs,
    /// Write reduced files here instead of replacing the inputs.
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,
    /// Resampling filter: nearest, triangle, catmull-rom, gaussian, or lanczos3.
    #[arg(long, default_value = "lanczos3")]
    filter: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        TopLevelCommand::Plan(args) => {
            run_reduction(&args, None)?;
        }
        TopLevelCommand::Apply(args) => {
            let backend =
                LooseFileBackend::new(args.output_dir.clone(), parse_filter(&args.filter)?);
            run_reduction(&args.plan, Some(backend))?;
        }
        TopLevelCommand::Presets => {
            println!("{}", texcap_presets::describe(&texcap_presets::default_presets()));
        }
    }

    Ok(())
}

fn run_reduction(args: &PlanArgs, apply_backend: Option<LooseFileBackend>) -> Result<()> {
    let (input_base, inputs) = resolve_inputs(args)?;
    if inputs.is_empty() {
        return Err(anyhow!("no input textures matched"));
    }

    let cfg = resolve_plan_config(PlanConfig {
        target_cap: args.target,
        method: args.method.clone(),
        // Negative / zero overrides mean "keep the default".
        bytes_per_pixel: args.bytes_per_pixel.unwrap_or(0.0),
        file_ratio: args.file_ratio.unwrap_or(-1.0),
    });
    let method = parse_method(&cfg.method)?;

    let bulk_mode = inputs.len() > 1;
    let mut descriptors = Vec::with_capacity(inputs.len());
    let mut errors = Vec::new();
    for input_path in inputs {
        let dimensions = match image::image_dimensions(&input_path) {
            Ok((width, height)) => Dimensions::new(width, height),
            Err(err) => {
                if bulk_mode && !args.strict {
                    errors.push(serde_json::json!({
                        "input": input_path,
                        "error": format!("failed to read texture header: {}", err),
                    }));
                    continue;
                }
                return Err(anyhow!(
                    "failed to read texture header {}: {}",
                    input_path.display(),
                    err
                ));
            }
        };
        let source_path = resolve_source(args.source_root.as_deref(), &input_base, &input_path);
        descriptors.push(TextureDescriptor {
            name: texture_name(&input_path)?,
            path: Some(input_path),
            source_path,
            dimensions,
        });
    }

    let apply = apply_backend.is_some();
    let backend = apply_backend.unwrap_or_default();
    let settings = BatchSettings {
        target_cap: cfg.target_cap,
        method,
        apply,
        savings: cfg.savings_model(),
    };
    let events = sink_from_env();
    let events_ref = events.as_ref().map(|sink| sink.as_ref());

    let report = run_batch(&backend, &descriptors, &settings, events_ref)?;

    let mut results: Vec<serde_json::Value> = descriptors
        .iter()
        .zip(report.results.iter())
        .map(|(descriptor, result)| {
            serde_json::json!({
                "input": descriptor.path,
                "texture": result.texture,
                "outcome": result.outcome,
            })
        })
        .collect();
    results.extend(errors);

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "targetCap": cfg.target_cap,
            "method": cfg.method,
            "apply": apply,
            "results": results,
            "summary": report.summary,
        }))?
    );

    if apply {
        eprintln!(
            "Reduced {}/{} textures; estimated {:.1} MiB of texture memory saved.",
            report.summary.reduced,
            report.summary.processed,
            bytes_to_mib(report.summary.memory_saved_bytes)
        );
    }
    Ok(())
}

/// Returns the scan base (used for relative source mapping) and the matched
/// texture paths.
fn resolve_inputs(args: &PlanArgs) -> Result<(PathBuf, Vec<PathBuf>)> {
    let candidate = PathBuf::from(&args.input);
    if candidate.exists() {
        if candidate.is_dir() {
            let paths = collect_textures_in_dir(&candidate, args.recursive)?;
            return Ok((candidate, paths));
        }
        let base = candidate
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        return Ok((base, vec![candidate]));
    }
    // Treat as regex matching file name under input_root.
    let root = match args.input_root.clone() {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let re = Regex::new(&args.input).map_err(|e| anyhow!("invalid regex: {}", e))?;
    let paths = collect_textures_by_regex(&root, args.recursive, &re)?;
    Ok((root, paths))
}

fn collect_textures_in_dir(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let walker = if recursive {
        WalkDir::new(dir)
    } else {
        WalkDir::new(dir).max_depth(1)
    };
    for entry in walker.into_iter().filter_map(std::result::Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let p = entry.into_path();
        if is_supported_texture(&p) {
            out.push(p);
        }
    }
    out.sort();
    Ok(out)
}

fn collect_textures_by_regex(root: &Path, recursive: bool, re: &Regex) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let walker = if recursive {
        WalkDir::new(root)
    } else {
        WalkDir::new(root).max_depth(1)
    };
    for entry in walker.into_iter().filter_map(std::result::Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let p = entry.into_path();
        if !is_supported_texture(&p) {
            continue;
        }
        let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if re.is_match(name) {
            out.push(p);
        }
    }
    out.sort();
    Ok(out)
}

fn is_supported_texture(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    matches!(ext.as_str(), "png" | "jpg" | "jpeg")
}

fn texture_name(input: &Path) -> Result<String> {
    let stem = input
        .file_stem()
        .ok_or_else(|| anyhow!("input file must include a valid file name"))?
        .to_string_lossy();
    Ok(stem.into_owned())
}

/// Without a source root the file itself serves as its own re-encode source.
/// With one, the source mirrors the texture's path relative to the scan base.
fn resolve_source(source_root: Option<&Path>, base: &Path, input: &Path) -> Option<PathBuf> {
    let root = match source_root {
        None => return Some(input.to_path_buf()),
        Some(root) => root,
    };
    let relative = input
        .strip_prefix(base)
        .ok()
        .or_else(|| input.file_name().map(Path::new))?;
    let candidate = root.join(relative);
    candidate.exists().then_some(candidate)
}

fn parse_method(value: &str) -> Result<RequestedMethod> {
    match value.to_ascii_lowercase().as_str() {
        "auto" => Ok(RequestedMethod::Auto),
        "mip-bias" | "bias" | "lod" => Ok(RequestedMethod::MipBias),
        "resize" | "proportional" | "proportional-resize" => Ok(RequestedMethod::ProportionalResize),
        other => Err(anyhow!(
            "unknown method '{}'; expected one of: auto, mip-bias, resize",
            other
        )),
    }
}

fn parse_filter(value: &str) -> Result<FilterType> {
    match value.to_ascii_lowercase().as_str() {
        "nearest" => Ok(FilterType::Nearest),
        "triangle" | "bilinear" => Ok(FilterType::Triangle),
        "catmull-rom" | "cubic" => Ok(FilterType::CatmullRom),
        "gaussian" => Ok(FilterType::Gaussian),
        "lanczos3" | "lanczos" => Ok(FilterType::Lanczos3),
        other => Err(anyhow!(
            "unknown filter '{}'; expected one of: nearest, triangle, catmull-rom, gaussian, lanczos3",
            other
        )),
    }
}

fn bytes_to_mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
