use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use trackfit::config::{ColorBand, Hsv, PipelineConfig};
use trackfit::export::JsonTableWriter;
use trackfit::pipeline::{self, Pipeline};
use trackfit::video::{CvSegmenter, KeyboardInput, PngChartRenderer, VideoFileSource, Viewer};
use trackfit::FrameSource;

/// Tracks a colored object in a video and fits a projectile-motion model to it
#[derive(Parser, Debug)]
#[command(name = "trackfit", version)]
struct Args {
    /// video file to analyze
    video: String,

    /// lower HSV bound as H,S,V
    #[arg(long, default_value = "35,50,50", value_parser = parse_hsv)]
    lower: Hsv,

    /// upper HSV bound as H,S,V
    #[arg(long, default_value = "85,255,255", value_parser = parse_hsv)]
    upper: Hsv,

    /// side of the square opening kernel
    #[arg(long, default_value_t = 5)]
    kernel: usize,

    /// output directory for the table and charts
    #[arg(long, default_value = "resultados")]
    out_dir: PathBuf,

    /// table file name inside the output directory
    #[arg(long, default_value = "resultados.json")]
    table: String,

    /// milliseconds to wait for a key between frames
    #[arg(long, default_value_t = 30)]
    delay: i32,

    /// show the raw and opened masks next to the video
    #[arg(long)]
    masks: bool,

    /// write charts without opening chart windows
    #[arg(long)]
    no_chart_window: bool,
}

fn parse_hsv(s: &str) -> Result<Hsv, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<u8>().map_err(|e| format!("{}: {}", p, e)))
        .collect::<Result<Vec<_>, _>>()?;

    match parts.as_slice() {
        [h, s, v] => Ok(Hsv::new(*h, *s, *v)),
        _ => Err(format!("expected H,S,V, got {:?}", s)),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = PipelineConfig::default();
    config.segmentation.band = ColorBand {
        lower: args.lower,
        upper: args.upper,
    };
    config.segmentation.kernel_size = args.kernel;
    config.export.dir = args.out_dir.clone();
    config.export.file_name = args.table.clone();
    config.validate()?;

    let mut source = VideoFileSource::open(&args.video)
        .map_err(|err| anyhow!("No se pudo abrir el video {}: {}", args.video, err))?;

    let detector = CvSegmenter::new(config.segmentation.clone())?;
    let mut pipeline = Pipeline::with_detector(config, source.fps(), Box::new(detector))?;
    let mut viewer = Viewer::new("Frame", args.masks)?;
    let mut input = KeyboardInput::new(&viewer, args.delay)?;

    let summary = pipeline.run_observed(&mut source, &mut input, &mut viewer);

    if summary.source_error.is_none() && !summary.stopped_early {
        println!("Video terminado.");
    }
    log::info!(
        "{} frames, {} detections{}",
        summary.frames,
        summary.detections,
        if summary.stopped_early { " (stopped)" } else { "" }
    );

    let analysis = pipeline.analyze();
    if let Some(diagnostic) = &analysis.diagnostic {
        println!("Comparación con el modelo omitida: {}", diagnostic);
    }

    let mut writer = JsonTableWriter::from_config(&pipeline.config().export);
    let mut renderer = PngChartRenderer::new(&pipeline.config().export.dir, !args.no_chart_window);

    match pipeline::export(&analysis, &mut writer, &mut renderer) {
        Ok(Some(path)) => println!("Tabla guardada correctamente en '{}'", path.display()),
        Ok(None) => println!("Sin datos para exportar."),
        Err(err) => eprintln!("No se pudo guardar la tabla: {}", err),
    }

    Ok(())
}
