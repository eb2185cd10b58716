//! `platecam` - CLI for the camera acquisition layer
//!
//! This binary streams from the configured camera, runs the hardware smoke
//! test, captures stills and inspects configuration.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use platecam::camera::{Camera, CameraSession, Capabilities, Frame};
use platecam::cli::{
    CapabilitiesCommand, CaptureCommand, CheckCommand, Cli, Command, ConfigCommand, RunCommand,
};
use platecam::snapshot::{self, default_snapshot_path, SnapshotFormat};
use platecam::transform::{self, Orientation};
use platecam::{
    init_logging, CameraFactory, Config, DriverKind, FpsMeter, FrameStream, SmokeTest,
};

#[cfg(target_os = "linux")]
use platecam_linux as platform;

#[cfg(not(target_os = "linux"))]
mod platform {
    pub fn init() -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }

    pub fn platform_name() -> &'static str {
        std::env::consts::OS
    }

    pub fn list_devices() -> Vec<u32> {
        Vec::new()
    }

    pub fn device_path(index: u32) -> String {
        format!("video{index}")
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // `config path` and `config validate` must work with a broken config file
    if let Command::Config(ConfigCommand::Path) = &cli.command {
        println!("{}", config_path(&cli).display());
        return Ok(());
    }
    if let Command::Config(ConfigCommand::Validate { file }) = &cli.command {
        return handle_validate(file.clone().unwrap_or_else(|| config_path(&cli)));
    }

    let mut config = Config::load_from(cli.config.clone()).context("loading configuration")?;
    cli.apply_overrides(&mut config);

    platform::init().map_err(|e| anyhow::anyhow!("platform init failed: {e}"))?;

    match cli.command {
        Command::Run(cmd) => tokio::runtime::Runtime::new()
            .context("starting async runtime")?
            .block_on(handle_run(&config, &cmd)),
        Command::Check(cmd) => handle_check(&config, &cmd),
        Command::Capture(cmd) => handle_capture(&config, &cmd),
        Command::Capabilities(cmd) => handle_capabilities(&config, &cmd),
        Command::Drivers => {
            handle_drivers(&config);
            Ok(())
        }
        Command::Config(ConfigCommand::Show { json }) => show_config(&config, json),
        Command::Config(ConfigCommand::Path | ConfigCommand::Validate { .. }) => Ok(()),
    }
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(Config::default_config_path)
}

async fn handle_run(config: &Config, cmd: &RunCommand) -> anyhow::Result<()> {
    let mut camera = CameraFactory::create(config)?;
    camera.open(None).context("opening camera")?;
    info!(
        camera = camera.name(),
        resolution = %camera.current_config().resolution,
        fps = camera.current_config().framerate,
        "Camera ready"
    );

    let mut stream = FrameStream::spawn(
        camera,
        config.read_timeout(),
        config.capture.channel_capacity,
    )
    .context("starting camera stream")?;
    let handle = stream.handle();

    let snapshot_every = match cmd.snapshot_every {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => config.snapshot_every(),
    };
    let mut last_snapshot: Option<Instant> = None;
    let mut meter = FpsMeter::new();
    let mut report = tokio::time::interval(config.report_interval());
    report.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    info!("Streaming, press Ctrl-C to stop");

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!(error = %e, "Could not listen for Ctrl-C");
                }
                info!("Interrupted");
                break;
            }
            _ = report.tick() => {
                info!(
                    fps = format!("{:.1}", meter.take_window()),
                    frames = meter.frames(),
                    timeouts = handle.timeouts(),
                    dropped = handle.dropped(),
                    "Streaming"
                );
            }
            frame = stream.recv() => {
                let Some(frame) = frame else { break };
                meter.tick();

                if let Some(every) = snapshot_every {
                    if last_snapshot.map_or(true, |at| at.elapsed() >= every) {
                        last_snapshot = Some(Instant::now());
                        spawn_snapshot(frame, config);
                    }
                }
                if cmd.max_frames.is_some_and(|max| meter.frames() >= max) {
                    break;
                }
            }
        }
    }

    let outcome = stream.stop().await?;
    let mut camera = outcome.camera;
    camera.close().context("closing camera")?;
    info!(
        frames = meter.frames(),
        fps = format!("{:.1}", meter.fps()),
        "Stream finished"
    );

    if let Some(e) = outcome.error {
        return Err(anyhow::Error::new(e).context("camera stream failed"));
    }
    Ok(())
}

/// Orient, crop and write a frame off the async threads.
fn spawn_snapshot(frame: Frame, config: &Config) {
    let orientation = config.orientation();
    let roi = config.camera.roi;
    let dir = config.snapshot_dir();
    let format = config.capture.snapshot_format;

    tokio::task::spawn_blocking(move || {
        match write_snapshot(&frame, orientation, roi, &dir, format) {
            Ok(path) => info!(path = %path.display(), "Snapshot saved"),
            Err(e) => warn!(error = %e, "Snapshot failed"),
        }
    });
}

fn write_snapshot(
    frame: &Frame,
    orientation: Orientation,
    roi: Option<(f64, f64, f64, f64)>,
    dir: &Path,
    format: SnapshotFormat,
) -> platecam::Result<PathBuf> {
    let prepared = transform::prepare(frame, orientation, roi)?;
    let path = default_snapshot_path(dir, &prepared, format);
    snapshot::save(&prepared, &path)?;
    Ok(path)
}

fn handle_check(config: &Config, cmd: &CheckCommand) -> anyhow::Result<()> {
    let camera = CameraFactory::create(config)?;
    let test = SmokeTest {
        frames: cmd.frames.unwrap_or(config.capture.check_frames),
        timeout: config.read_timeout(),
        output: cmd.output.clone(),
    };

    let report = test.run(camera).context("camera check failed")?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Camera:      {}", report.camera);
        println!("Frames:      {}", report.frames);
        println!("FPS:         {:.1}", report.fps);
        println!("Still:       {} {}", report.resolution, report.pixel_format);
        if let Some(path) = &report.saved_to {
            println!("Saved to:    {}", path.display());
        }
        println!();
        println!("Camera check passed.");
    }
    Ok(())
}

fn handle_capture(config: &Config, cmd: &CaptureCommand) -> anyhow::Result<()> {
    let camera = CameraFactory::create(config)?;
    let mut session = CameraSession::open(camera).context("opening camera")?;

    let mut frame = session.capture().context("capturing still")?;
    if !cmd.raw {
        frame = transform::prepare(&frame, config.orientation(), config.camera.roi)?;
    }

    let path = cmd.path.clone().unwrap_or_else(|| {
        default_snapshot_path(
            &config.snapshot_dir(),
            &frame,
            config.capture.snapshot_format,
        )
    });
    snapshot::save(&frame, &path)?;
    session.close().context("closing camera")?;

    println!("{}", path.display());
    Ok(())
}

fn handle_capabilities(config: &Config, cmd: &CapabilitiesCommand) -> anyhow::Result<()> {
    let camera = CameraFactory::create(config)?;
    let session = CameraSession::open(camera).context("opening camera")?;
    let name = session.name().to_string();
    let caps = session.capabilities()?;
    session.close()?;

    if cmd.json {
        let out = serde_json::json!({
            "camera": name,
            "capabilities": caps,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_capabilities(&name, &caps);
    }
    Ok(())
}

fn print_capabilities(name: &str, caps: &Capabilities) {
    let join = |items: Vec<String>| {
        if items.is_empty() {
            "none".to_string()
        } else {
            items.join(", ")
        }
    };
    let modes = |auto: bool, manual: bool, manual_label: &str| {
        let mut out = Vec::new();
        if auto {
            out.push("auto".to_string());
        }
        if manual {
            out.push(manual_label.to_string());
        }
        join(out)
    };

    let controls = &caps.controls;
    let mut exposure = modes(controls.exposure.auto, controls.exposure.manual, "manual");
    if let (Some(min), Some(max)) = (controls.exposure.min_us, controls.exposure.max_us) {
        exposure.push_str(&format!(" ({min}-{max} us)"));
    }

    println!("Camera:        {name}");
    println!(
        "Resolutions:   {}",
        join(caps.resolutions.iter().map(ToString::to_string).collect())
    );
    println!(
        "Formats:       {}",
        join(caps.pixel_formats.iter().map(ToString::to_string).collect())
    );
    println!("Exposure:      {exposure}");
    println!(
        "White balance: {}",
        modes(
            controls.white_balance.auto,
            controls.white_balance.manual_gains,
            "manual gains"
        )
    );
    println!(
        "Focus:         {}",
        modes(
            controls.focus.auto,
            controls.focus.manual_distance,
            "manual distance"
        )
    );
    println!(
        "ROI:           {}",
        if caps.roi_supported {
            "driver"
        } else {
            "software"
        }
    );
}

fn handle_drivers(config: &Config) {
    println!("Platform: {}", platform::platform_name());
    println!();
    for kind in DriverKind::ALL {
        let active = if kind == config.camera.driver { "*" } else { " " };
        let status = if kind.is_available() {
            "available"
        } else {
            "not built for this platform"
        };
        println!(" {active} {kind:<6} {status}");
    }

    let devices = platform::list_devices();
    if !devices.is_empty() {
        println!();
        println!("Video devices:");
        for index in devices {
            let marker = if index == config.camera.device_index {
                "*"
            } else {
                " "
            };
            println!(" {marker} {}", platform::device_path(index));
        }
    }
}

fn show_config(config: &Config, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    let camera = &config.camera;
    let capture = &config.capture;
    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Camera]");
    println!("  Driver:             {}", camera.driver);
    println!("  Device index:       {}", camera.device_index);
    println!("  Resolution:         {}", camera.default_resolution);
    println!("  Frame rate:         {}", camera.default_framerate);
    println!("  Rotation:           {}", camera.rotation_deg);
    println!("  Flip (h/v):         {}/{}", camera.hflip, camera.vflip);
    match camera.roi {
        Some((x, y, w, h)) => println!("  ROI:                {x}, {y}, {w}, {h}"),
        None => println!("  ROI:                full frame"),
    }
    println!();
    println!("[Capture]");
    println!("  Read timeout (ms):  {}", capture.read_timeout_ms);
    println!("  Check frames:       {}", capture.check_frames);
    println!("  Snapshot dir:       {}", config.snapshot_dir().display());
    println!("  Snapshot format:    {}", capture.snapshot_format.extension());
    println!("  Snapshot every (s): {}", capture.snapshot_every_secs);
    println!("  Report every (s):   {}", capture.report_interval_secs);
    Ok(())
}

fn handle_validate(path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration: {}", path.display());
    if !path.exists() {
        println!("(file not found, defaults and environment only)");
    }
    match Config::load_from(Some(path)) {
        Ok(_) => {
            println!("Configuration is valid.");
            Ok(())
        }
        Err(e) => bail!("configuration error: {e}"),
    }
}
