//! ChitraScan - Command-line front end for the scanner protocol engine
//!
//! Connects to a configured device, negotiates capabilities, runs one scan
//! with the configured defaults and writes the result as a PNM image
//! (P4 for binary, P5 for grayscale, P6 for color).

use chitra_scan::scan::plan::RectMm;
use chitra_scan::{ColorMode, Config, DeviceRegistry, Error, Result, ScanRequest, Source};
use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};

/// Parse command line arguments.
///
/// Supports:
/// - `chitra-scan --config <path>` (default `/etc/chitrascan.toml`)
/// - `chitra-scan --device <name>` (default: first configured device)
/// - `chitra-scan --output <path>` (default `scan.pnm`)
/// - `chitra-scan --source flatbed|adf|tpu`
struct Args {
    config_path: String,
    device: Option<String>,
    output: String,
    source: Source,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args {
        config_path: "/etc/chitrascan.toml".to_string(),
        device: None,
        output: "scan.pnm".to_string(),
        source: Source::Flatbed,
    };

    let mut i = 1;
    while i < args.len() {
        let flag_value = |i: usize| -> Result<String> {
            args.get(i + 1)
                .cloned()
                .ok_or_else(|| Error::InvalidParameter(format!("{} needs a value", args[i])))
        };
        match args[i].as_str() {
            "--config" | "-c" => {
                parsed.config_path = flag_value(i)?;
                i += 2;
            }
            "--device" | "-d" => {
                parsed.device = Some(flag_value(i)?);
                i += 2;
            }
            "--output" | "-o" => {
                parsed.output = flag_value(i)?;
                i += 2;
            }
            "--source" | "-s" => {
                parsed.source = match flag_value(i)?.as_str() {
                    "flatbed" => Source::Flatbed,
                    "adf" => Source::Adf,
                    "tpu" => Source::TpuPrimary,
                    other => {
                        return Err(Error::InvalidParameter(format!(
                            "unknown source: {}",
                            other
                        )))
                    }
                };
                i += 2;
            }
            other => {
                return Err(Error::InvalidParameter(format!(
                    "unknown argument: {}",
                    other
                )));
            }
        }
    }
    Ok(parsed)
}

fn parse_mode(mode: &str) -> Result<ColorMode> {
    match mode {
        "binary" => Ok(ColorMode::Binary),
        "gray" => Ok(ColorMode::Gray),
        "color" => Ok(ColorMode::Color),
        other => Err(Error::InvalidParameter(format!(
            "unknown color mode: {}",
            other
        ))),
    }
}

/// Write the scan as PNM. 16-bit samples arrive little-endian off the wire
/// and PNM wants big-endian, so deep scans are byte-swapped on the way out.
fn write_pnm(
    path: &str,
    image: &[u8],
    width: u32,
    bytes_per_line: usize,
    mode: ColorMode,
    depth: u8,
) -> Result<()> {
    let lines = image.len() / bytes_per_line;
    let mut out = BufWriter::new(File::create(path)?);
    match mode {
        ColorMode::Binary => writeln!(out, "P4\n{} {}", width, lines)?,
        ColorMode::Gray => writeln!(out, "P5\n{} {}\n{}", width, lines, maxval(depth))?,
        _ => writeln!(out, "P6\n{} {}\n{}", width, lines, maxval(depth))?,
    }
    if depth == 16 {
        for pair in image.chunks_exact(2) {
            out.write_all(&[pair[1], pair[0]])?;
        }
    } else {
        out.write_all(image)?;
    }
    out.flush()?;
    Ok(())
}

fn maxval(depth: u8) -> u32 {
    (1u32 << depth) - 1
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("ChitraScan v0.4.0 starting...");

    let args = parse_args()?;
    log::info!("Using config: {}", args.config_path);
    let config = Config::load(&args.config_path)?;

    let registry = DeviceRegistry::from_config(&config);
    let device_name = match &args.device {
        Some(name) => name.clone(),
        None => registry
            .names()
            .next()
            .ok_or_else(|| Error::InvalidParameter("no devices configured".to_string()))?
            .to_string(),
    };

    let mut session = registry.open(&device_name)?;
    let caps = session.negotiate(
        registry
            .get(&device_name)
            .and_then(|d| d.model_override.as_deref()),
    )?;
    log::info!("Attached to {}", caps.model);

    let request = ScanRequest {
        resolution: config.scan.resolution,
        mode: parse_mode(&config.scan.mode)?,
        depth: config.scan.depth,
        area: RectMm {
            left: config.scan.area_mm[0],
            top: config.scan.area_mm[1],
            width: config.scan.area_mm[2],
            height: config.scan.area_mm[3],
        },
        source: args.source,
    };
    let params = session.configure(&request)?.clone();
    log::info!(
        "Scanning {}x{} px at {} dpi ({} bytes/line)",
        params.rect.width,
        params.rect.height,
        params.resolution,
        params.bytes_per_line
    );

    // Ctrl-C cancels at the next block boundary
    let cancel = session.cancel_handle();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        cancel.cancel();
    })
    .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    session.start()?;

    let mut image = Vec::with_capacity(params.total_bytes());
    let mut buf = vec![0u8; 65536];
    loop {
        let (n, done) = session.read(&mut buf)?;
        image.extend_from_slice(&buf[..n]);
        if done {
            break;
        }
    }
    session.finish()?;

    write_pnm(
        &args.output,
        &image,
        params.rect.width,
        params.bytes_per_line,
        params.mode,
        params.depth,
    )?;
    log::info!(
        "Wrote {} ({} bytes, {} lines)",
        args.output,
        image.len(),
        image.len() / params.bytes_per_line
    );
    Ok(())
}
