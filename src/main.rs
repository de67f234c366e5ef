use clap::{Parser, ValueEnum};
use rfcapture::{CaptureConfig, ImageFormat, Rect};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Visible,
    Full,
    Selection,
}

/// Capture a web page as one stitched image.
#[derive(Debug, Parser)]
#[command(name = "rfcapture", version, about)]
struct Args {
    /// Page to load
    url: String,

    #[arg(long, value_enum, default_value_t = Mode::Full)]
    mode: Mode,

    /// Selection rectangle in document CSS pixels: x,y,w,h
    #[arg(long, value_parser = parse_rect)]
    rect: Option<Rect>,

    /// png or jpeg (overrides the config file)
    #[arg(long)]
    format: Option<ImageFormat>,

    /// JPEG quality 1-100 (overrides the config file)
    #[arg(long)]
    quality: Option<u8>,

    /// JSON capture configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output file (defaults to capture.<ext>)
    #[arg(long)]
    out: Option<PathBuf>,
}

fn parse_rect(s: &str) -> Result<Rect, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("bad number '{}': {}", p, e)))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [x, y, w, h] => Ok(Rect::new(*x, *y, *w, *h)),
        _ => Err(format!("expected x,y,w,h but got {} values", parts.len())),
    }
}

fn load_config(args: &Args) -> anyhow::Result<CaptureConfig> {
    let mut config = match &args.config {
        Some(path) => CaptureConfig::from_json_file(path)?,
        None => CaptureConfig::default(),
    };
    if let Some(format) = args.format {
        config.format = format;
    }
    if let Some(quality) = args.quality {
        config.quality = quality;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(feature = "cdp")]
async fn run(args: Args) -> anyhow::Result<()> {
    use rfcapture::cdp::CdpHost;
    use rfcapture::CaptureRequest;

    let config = load_config(&args)?;
    let request = match args.mode {
        Mode::Visible => CaptureRequest::Visible,
        Mode::Full => CaptureRequest::FullPage,
        Mode::Selection => {
            let rect = args
                .rect
                .ok_or_else(|| anyhow::anyhow!("--mode selection requires --rect x,y,w,h"))?;
            CaptureRequest::Selection { rect, container: None }
        }
    };

    let host = CdpHost::launch(&config)?;
    host.load_url(&args.url).await?;

    let mut capturer = rfcapture::new_capturer(config.clone())?;
    let progress: rfcapture::ProgressFn = std::sync::Arc::new(|pct| log::info!("{}%", pct));
    let shot = capturer.run(&host, request, Some(progress)).await?;

    for d in &shot.diagnostics {
        log::warn!("{:?}", d);
    }
    let out = args
        .out
        .unwrap_or_else(|| PathBuf::from(format!("capture.{}", config.format.extension())));
    std::fs::write(&out, &shot.image)?;
    log::info!("sha256 {}", shot.sha256_hex());
    println!("{} ({}x{}, {} bytes)", out.display(), shot.width, shot.height, shot.image.len());
    Ok(())
}

#[cfg(not(feature = "cdp"))]
async fn run(args: Args) -> anyhow::Result<()> {
    load_config(&args)?;
    anyhow::bail!("rfcapture was built without a capture backend; rebuild with --features cdp")
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("rfcapture: {:#}", e);
        std::process::exit(1);
    }
}
