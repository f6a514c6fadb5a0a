//! imgx: apply an image edit pipeline from the command line.
//!
//! Runs resize, compress, convert, transform and filter on one image
//! and writes the result. Also converts images to and from base64 data
//! URLs and manages the recent-images cache.
//!
//! # Usage
//!
//! ```text
//! imgx apply photo.png -o small.webp --width 640 --format webp --quality 70 --diagnostics
//! imgx apply photo.png -o out.png --options-json '{"filter": {"sepia": 1.0}}'
//! imgx base64 icon.png > icon.txt
//! imgx decode icon.txt -o icon.png
//! imgx recent list
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use imgx_io::{
    AcquireError, AcquireLimits, ExportError, RecentError, RecentImages, acquire, compression_ratio,
    decode_data_url, encode_data_url, format_file_size, looks_like_base64, write_to_path,
};
use imgx_pipeline::{
    Codec, CodecConfig, Dimensions, ImageFormat, MonotonicClock, PipelineError, PipelineOptions,
    ResizePreset, SourceImage, run_pipeline_with_diagnostics,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Recent-images cache used when `--cache` is not given.
const DEFAULT_CACHE: &str = "imgx-recent.json";

/// Chain raster image edits: resize, compress, convert, transform, filter.
#[derive(Parser)]
#[command(name = "imgx", version)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace). `RUST_LOG`
    /// takes precedence when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file (JSON) with `codec` and `limits` sections.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Recent-images cache file.
    #[arg(long, global = true, default_value = DEFAULT_CACHE)]
    cache: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline on an image and write the result.
    Apply(ApplyArgs),

    /// Print an image as a base64 data URL.
    Base64 {
        /// Image to encode.
        input: PathBuf,
    },

    /// Turn a data URL or bare base64 payload back into an image file.
    Decode {
        /// Text file holding the data URL, or `-` for stdin.
        input: PathBuf,

        /// Where to write the image.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Manage the recent-images cache.
    Recent {
        #[command(subcommand)]
        action: RecentAction,
    },
}

#[derive(Subcommand)]
enum RecentAction {
    /// List cached images, newest first.
    List {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Write a cached image to a file.
    Restore {
        /// Record id as shown by `recent list`.
        id: String,
        /// Where to write the image.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Remove every cached image.
    Clear,
}

#[derive(Args)]
struct ApplyArgs {
    /// Input image (JPEG, PNG, WebP, GIF).
    input: PathBuf,

    /// Where to write the result.
    #[arg(short, long)]
    output: PathBuf,

    #[command(flatten)]
    stages: StageArgs,

    /// Pipeline options as JSON. Fields left out keep their defaults
    /// for this image. Per-stage flags are ignored.
    #[arg(long, conflicts_with = "options_file")]
    options_json: Option<String>,

    /// Like `--options-json`, read from a file.
    #[arg(long)]
    options_file: Option<PathBuf>,

    /// Print a per-stage timing and size report.
    #[arg(long)]
    diagnostics: bool,

    /// Print diagnostics as JSON instead of the report.
    #[arg(long)]
    json: bool,

    /// Add the input to the recent-images cache.
    #[arg(long)]
    remember: bool,
}

/// Per-stage overrides on top of the defaults for the input image.
#[derive(Args, Default)]
struct StageArgs {
    /// Target width. Alone with aspect-lock on, the height follows.
    #[arg(long, help_heading = "Resize")]
    width: Option<u32>,

    /// Target height. Alone with aspect-lock on, the width follows.
    #[arg(long, help_heading = "Resize")]
    height: Option<u32>,

    /// Use width and height exactly, distorting if needed.
    #[arg(long, help_heading = "Resize")]
    no_aspect: bool,

    /// Common target size. `--width`/`--height` override it.
    #[arg(long, value_enum, help_heading = "Resize")]
    preset: Option<Preset>,

    /// Compression quality (1-100).
    #[arg(long, help_heading = "Compress")]
    quality: Option<u8>,

    /// Output format.
    #[arg(long, value_enum, help_heading = "Convert")]
    format: Option<Format>,

    /// Encoder quality for the conversion (1-100, default 100).
    #[arg(long, help_heading = "Convert")]
    convert_quality: Option<u8>,

    /// Clockwise rotation in degrees.
    #[arg(long, allow_negative_numbers = true, help_heading = "Transform")]
    angle: Option<f64>,

    /// Mirror left-right.
    #[arg(long, help_heading = "Transform")]
    flip_h: bool,

    /// Mirror top-bottom.
    #[arg(long, help_heading = "Transform")]
    flip_v: bool,

    /// Horizontal skew in degrees (-45 to 45).
    #[arg(long, allow_negative_numbers = true, help_heading = "Transform")]
    skew_x: Option<f64>,

    /// Vertical skew in degrees (-45 to 45).
    #[arg(long, allow_negative_numbers = true, help_heading = "Transform")]
    skew_y: Option<f64>,

    /// Opacity (0-1).
    #[arg(long, help_heading = "Filter")]
    opacity: Option<f32>,

    /// Brightness multiplier (0-2).
    #[arg(long, help_heading = "Filter")]
    brightness: Option<f32>,

    /// Contrast multiplier (0-2).
    #[arg(long, help_heading = "Filter")]
    contrast: Option<f32>,

    /// Grayscale amount (0-1).
    #[arg(long, help_heading = "Filter")]
    grayscale: Option<f32>,

    /// Sepia amount (0-1).
    #[arg(long, help_heading = "Filter")]
    sepia: Option<f32>,

    /// Invert amount (0-1).
    #[arg(long, help_heading = "Filter")]
    invert: Option<f32>,

    /// Blur radius in pixels (0-10).
    #[arg(long, help_heading = "Filter")]
    blur: Option<f32>,
}

/// Output format selection.
#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// JPEG (no alpha; transparent areas become black).
    #[value(alias = "jpg")]
    Jpeg,
    /// PNG.
    Png,
    /// WebP (lossless at quality 100).
    Webp,
    /// GIF (first frame, palette).
    Gif,
}

impl From<Format> for ImageFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Jpeg => Self::Jpeg,
            Format::Png => Self::Png,
            Format::Webp => Self::WebP,
            Format::Gif => Self::Gif,
        }
    }
}

/// Resize preset selection.
#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    /// 150x150.
    Thumbnail,
    /// 640x480.
    Small,
    /// 1280x720.
    Medium,
    /// 1920x1080.
    Hd,
    /// 3840x2160.
    #[value(name = "4k")]
    Uhd4k,
}

impl From<Preset> for ResizePreset {
    fn from(preset: Preset) -> Self {
        match preset {
            Preset::Thumbnail => Self::Thumbnail,
            Preset::Small => Self::Small,
            Preset::Medium => Self::Medium,
            Preset::Hd => Self::Hd,
            Preset::Uhd4k => Self::Uhd4k,
        }
    }
}

/// Contents of the `--config` file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Settings {
    codec: CodecConfig,
    limits: AcquireLimits,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Recent(#[from] RecentError),

    #[error("invalid {what}: {source}")]
    Json {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no recent image with id {0:?}")]
    UnknownRecent(String),
}

fn json_error(what: &'static str) -> impl FnOnce(serde_json::Error) -> CliError {
    move |source| CliError::Json { what, source }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let settings = load_settings(cli.config.as_deref())?;
    let codec = Codec::new(settings.codec.clone());

    match &cli.command {
        Command::Apply(args) => apply(args, &codec, &settings.limits, &cli.cache),
        Command::Base64 { input } => {
            let source = acquire::from_path(input, &settings.limits)?;
            println!("{}", encode_data_url(&source));
            Ok(())
        }
        Command::Decode { input, output } => {
            let text = read_text(input)?;
            if !looks_like_base64(&text) {
                warn!("input does not look like a base64 image");
            }
            let image = decode_data_url(&text, &settings.limits)?;
            write_to_path(&image, output)?;
            eprintln!(
                "{}: {} {}",
                output.display(),
                image.dimensions(),
                image.format()
            );
            Ok(())
        }
        Command::Recent { action } => recent(action, codec, &settings.limits, &cli.cache),
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, CliError> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let settings = serde_json::from_str(&read_text(path)?).map_err(json_error("settings"))?;
    debug!(?settings, "loaded settings");
    Ok(settings)
}

/// Read a whole text file, or stdin for `-`.
fn read_text(path: &Path) -> Result<String, CliError> {
    let read_error = |source| CliError::Read {
        path: path.display().to_string(),
        source,
    };
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(read_error)?;
        return Ok(text);
    }
    std::fs::read_to_string(path).map_err(read_error)
}

fn apply(
    args: &ApplyArgs,
    codec: &Codec,
    limits: &AcquireLimits,
    cache: &Path,
) -> Result<(), CliError> {
    let source = acquire::from_path(&args.input, limits)?;

    let requested = if let Some(json) = &args.options_json {
        options_from_json(&source, json)?
    } else if let Some(path) = &args.options_file {
        options_from_json(&source, &read_text(path)?)?
    } else {
        let mut options = PipelineOptions::for_source(&source);
        apply_flags(&mut options, &args.stages, source.dimensions());
        options
    };
    let options = requested.clamped();
    if options != requested {
        warn!("some options were out of range and have been clamped");
    }
    debug!(?options, "pipeline options");

    let (output, diagnostics) =
        run_pipeline_with_diagnostics(codec, &source, &options, &MonotonicClock::new())?;

    if args.json {
        let json = serde_json::to_string_pretty(&diagnostics).map_err(json_error("diagnostics"))?;
        println!("{json}");
    } else if args.diagnostics {
        println!("{}", diagnostics.report());
    }

    let extension_mime = args
        .output
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(acquire::mime_for_extension);
    if extension_mime.is_some_and(|mime| mime != output.format().mime()) {
        warn!(
            path = %args.output.display(),
            format = %output.format(),
            "output extension does not match the encoded format"
        );
    }
    write_to_path(&output, &args.output)?;

    let ratio = compression_ratio(source.byte_size() as u64, output.byte_size() as u64);
    let change = if ratio >= 0 {
        format!("{ratio}% smaller")
    } else {
        format!("{}% larger", -ratio)
    };
    eprintln!(
        "{}: {} {}, {} ({change})",
        args.output.display(),
        output.dimensions(),
        output.format(),
        format_file_size(output.byte_size() as u64),
    );

    if args.remember {
        remember(codec, cache, &source, &args.input);
    }
    Ok(())
}

/// Parse a possibly partial options document over the defaults for
/// `source`.
fn options_from_json(source: &SourceImage, json: &str) -> Result<PipelineOptions, CliError> {
    let patch: Value = serde_json::from_str(json).map_err(json_error("pipeline options"))?;
    let mut merged = serde_json::to_value(PipelineOptions::for_source(source))
        .map_err(json_error("pipeline options"))?;
    merge_json(&mut merged, patch);
    serde_json::from_value(merged).map_err(json_error("pipeline options"))
}

/// Recursively overlay `patch` onto `base`. Objects merge key by key;
/// anything else replaces.
fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                merge_json(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, patch) => *base = patch,
    }
}

fn apply_flags(options: &mut PipelineOptions, flags: &StageArgs, native: Dimensions) {
    let resize = &mut options.resize;
    if flags.no_aspect {
        resize.maintain_aspect_ratio = false;
    }
    if let Some(preset) = flags.preset {
        *resize = resize.with_preset(preset.into(), native);
    }
    match (flags.width, flags.height) {
        (Some(width), Some(height)) => {
            resize.width = width;
            resize.height = height;
        }
        (Some(width), None) => {
            resize.width = width;
            if resize.maintain_aspect_ratio {
                resize.height = 0;
            }
        }
        (None, Some(height)) => {
            resize.height = height;
            if resize.maintain_aspect_ratio {
                resize.width = 0;
            }
        }
        (None, None) => {}
    }

    if let Some(quality) = flags.quality {
        options.compress.quality = quality;
    }

    if let Some(format) = flags.format {
        options.convert.format = format.into();
    }
    if let Some(quality) = flags.convert_quality {
        options.convert.quality = Some(quality);
    }

    let transform = &mut options.transform;
    if let Some(angle) = flags.angle {
        transform.angle = angle;
    }
    transform.horizontal |= flags.flip_h;
    transform.vertical |= flags.flip_v;
    if let Some(skew) = flags.skew_x {
        transform.skew_x = skew;
    }
    if let Some(skew) = flags.skew_y {
        transform.skew_y = skew;
    }

    let filter = &mut options.filter;
    for (flag, field) in [
        (flags.opacity, &mut filter.opacity),
        (flags.brightness, &mut filter.brightness),
        (flags.contrast, &mut filter.contrast),
        (flags.grayscale, &mut filter.grayscale),
        (flags.sepia, &mut filter.sepia),
        (flags.invert, &mut filter.invert),
        (flags.blur, &mut filter.blur),
    ] {
        if let Some(value) = flag {
            *field = value;
        }
    }
}

/// Add `source` to the cache. Failures are logged, never fatal.
fn remember(codec: &Codec, cache: &Path, source: &SourceImage, input: &Path) {
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let result =
        RecentImages::open(cache, codec.clone()).and_then(|mut recent| recent.add(source, &name));
    match result {
        Ok(record) => info!(id = %record.id, name = %record.name, "remembered input"),
        Err(e) => warn!(error = %e, cache = %cache.display(), "could not update recent images"),
    }
}

/// One line of `recent list --json`; the image payloads are left out.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecentEntry<'a> {
    id: &'a str,
    name: &'a str,
    created_at: u64,
    data_url_len: usize,
    has_thumbnail: bool,
}

fn recent(
    action: &RecentAction,
    codec: Codec,
    limits: &AcquireLimits,
    cache: &Path,
) -> Result<(), CliError> {
    let mut recent = RecentImages::open(cache, codec)?;
    match action {
        RecentAction::List { json } => {
            let entries: Vec<_> = recent
                .list()
                .iter()
                .map(|record| RecentEntry {
                    id: &record.id,
                    name: &record.name,
                    created_at: record.created_at,
                    data_url_len: record.data_url.len(),
                    has_thumbnail: record.thumbnail_data_url.is_some(),
                })
                .collect();
            if *json {
                let text = serde_json::to_string_pretty(&entries).map_err(json_error("recent list"))?;
                println!("{text}");
            } else if entries.is_empty() {
                eprintln!("No recent images in {}", cache.display());
            } else {
                for entry in entries {
                    println!(
                        "{}  {:>13}  {:>10}  {}",
                        entry.id,
                        entry.created_at,
                        format_file_size(entry.data_url_len as u64),
                        entry.name,
                    );
                }
            }
        }
        RecentAction::Restore { id, output } => {
            let record = recent
                .get(id)
                .ok_or_else(|| CliError::UnknownRecent(id.clone()))?;
            let source = RecentImages::to_source(record, limits)?;
            write_to_path(&source, output)?;
            eprintln!("{}: {} {}", output.display(), source.dimensions(), source.format());
        }
        RecentAction::Clear => {
            let count = recent.list().len();
            recent.clear()?;
            eprintln!("Removed {count} recent images");
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory as _;
    use imgx_pipeline::RgbaImage;

    use super::*;

    fn source(width: u32, height: u32) -> SourceImage {
        Codec::default()
            .encode(&RgbaImage::new(width, height), ImageFormat::Png, 100)
            .unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_apply_flags() {
        let cli = Cli::try_parse_from([
            "imgx", "apply", "in.png", "-o", "out.jpg", "--width", "400", "--format", "jpg",
            "--angle", "-90", "--sepia", "0.5", "--diagnostics",
        ])
        .unwrap();
        let Command::Apply(args) = cli.command else {
            unreachable!("parsed a different subcommand");
        };
        assert_eq!(args.stages.width, Some(400));
        assert!(matches!(args.stages.format, Some(Format::Jpeg)));
        assert_eq!(args.stages.angle, Some(-90.0));
        assert!(args.diagnostics);
        assert_eq!(cli.cache, PathBuf::from(DEFAULT_CACHE));
    }

    #[test]
    fn options_json_conflicts_with_options_file() {
        let parsed = Cli::try_parse_from([
            "imgx", "apply", "a.png", "-o", "b.png", "--options-json", "{}", "--options-file",
            "o.json",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn width_alone_derives_height() {
        let src = source(800, 600);
        let mut options = PipelineOptions::for_source(&src);
        let flags = StageArgs {
            width: Some(400),
            ..StageArgs::default()
        };
        apply_flags(&mut options, &flags, src.dimensions());
        assert_eq!((options.resize.width, options.resize.height), (400, 0));
    }

    #[test]
    fn no_aspect_keeps_native_height() {
        let src = source(800, 600);
        let mut options = PipelineOptions::for_source(&src);
        let flags = StageArgs {
            width: Some(400),
            no_aspect: true,
            ..StageArgs::default()
        };
        apply_flags(&mut options, &flags, src.dimensions());
        assert_eq!((options.resize.width, options.resize.height), (400, 600));
        assert!(!options.resize.maintain_aspect_ratio);
    }

    #[test]
    fn preset_then_filters() {
        let src = source(4000, 3000);
        let mut options = PipelineOptions::for_source(&src);
        let flags = StageArgs {
            preset: Some(Preset::Hd),
            blur: Some(2.0),
            flip_h: true,
            format: Some(Format::Webp),
            ..StageArgs::default()
        };
        apply_flags(&mut options, &flags, src.dimensions());
        assert_eq!((options.resize.width, options.resize.height), (1440, 1080));
        assert!((options.filter.blur - 2.0).abs() < f32::EPSILON);
        assert!(options.transform.horizontal);
        assert_eq!(options.convert.format, ImageFormat::WebP);
    }

    #[test]
    fn partial_json_keeps_source_defaults() {
        let src = source(30, 20);
        let options =
            options_from_json(&src, r#"{"filter": {"sepia": 1.0}, "convert": {"format": "image/webp"}}"#)
                .unwrap();
        assert!((options.filter.sepia - 1.0).abs() < f32::EPSILON);
        assert!((options.filter.brightness - 1.0).abs() < f32::EPSILON);
        assert_eq!(options.convert.format, ImageFormat::WebP);
        assert_eq!((options.resize.width, options.resize.height), (30, 20));
        assert_eq!(options.compress.quality, 80);
    }

    #[test]
    fn bad_json_names_what_failed() {
        let err = options_from_json(&source(2, 2), r#"{"compress": {"quality": "high"}}"#)
            .unwrap_err();
        assert!(err.to_string().starts_with("invalid pipeline options"));
    }

    #[test]
    fn merge_replaces_scalars_and_merges_objects() {
        let mut base = serde_json::json!({"a": {"x": 1, "y": 2}, "b": 3});
        merge_json(&mut base, serde_json::json!({"a": {"y": 5}, "b": null}));
        assert_eq!(base, serde_json::json!({"a": {"x": 1, "y": 5}, "b": null}));
    }

    #[test]
    fn settings_file_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"limits": {"max_bytes": 5}}"#).unwrap();
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.limits.max_bytes, 5);
        assert_eq!(settings.limits.formats, ImageFormat::ALL.to_vec());
        assert_eq!(settings.codec, CodecConfig::default());
    }

    #[test]
    fn missing_settings_file_is_an_error() {
        let err = load_settings(Some(Path::new("/nonexistent/settings.json"))).unwrap_err();
        assert!(matches!(err, CliError::Read { .. }));
    }
}
