use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use whistler_core::{
    record::replay,
    AppConfig, Expectation, FrameMatcher, Kikee, Matcher, Recording, ReplayFilter,
    RisingWhistle, WhistlerError,
};

fn main() -> whistler_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::live_defaults(),
    };

    match cli.command {
        Commands::Listen { device, gesture } => live::listen(&config, device.as_deref(), gesture),
        Commands::Record {
            testdir,
            name,
            negative,
            device,
        } => {
            let expectation = if negative {
                Expectation::Negative
            } else {
                Expectation::Positive
            };
            live::record(&config, device.as_deref(), &testdir, &name, expectation)
        }
        Commands::Test {
            testdir,
            file,
            gesture,
        } => run_tests(&config, &testdir, file.as_deref(), gesture),
        Commands::Devices => live::list_devices(),
    }
}

fn run_tests(
    config: &AppConfig,
    testdir: &Path,
    file: Option<&str>,
    gesture: GestureChoice,
) -> whistler_core::Result<()> {
    let names = match file {
        Some(file) => vec![file.to_string()],
        None => fixture_names(testdir)?,
    };
    let filter = ReplayFilter::from(&config.replay);

    let mut passes = 0;
    let mut fails = 0;
    for name in &names {
        let expectation = Expectation::from_file_name(name)?;
        let recording = Recording::load(testdir.join(name))?;
        let matches: usize = build_matchers(config, gesture)
            .iter_mut()
            .map(|matcher| replay(matcher.as_mut(), &recording, &filter).matches())
            .sum();

        if expectation.is_met_by(matches) {
            passes += 1;
            println!("[PASS] {name} has {matches} matches");
        } else {
            fails += 1;
            println!("[FAIL] {name} has {matches} matches");
        }
    }

    let total = passes + fails;
    if fails > 0 {
        println!("[FAIL] {passes} / {total} passed");
        Err(WhistlerError::msg(format!("{fails} fixture(s) failed")))
    } else {
        println!("[PASS] {passes} / {total} passed");
        Ok(())
    }
}

fn fixture_names(testdir: &Path) -> whistler_core::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(testdir)? {
        let path = entry?.path();
        if path.extension().map(|ext| ext == "json").unwrap_or(false) {
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    tracing::info!(?testdir, fixtures = names.len(), "collected fixtures");
    Ok(names)
}

fn build_matchers(config: &AppConfig, gesture: GestureChoice) -> Vec<Box<dyn FrameMatcher>> {
    let policy = config.matcher.policy;
    let mut matchers: Vec<Box<dyn FrameMatcher>> = Vec::new();
    if gesture.includes_rising() {
        matchers.push(Box::new(
            Matcher::new(RisingWhistle::definition(config.gestures.rising.clone()))
                .with_policy(policy),
        ));
    }
    if gesture.includes_kikee() {
        matchers.push(Box::new(
            Matcher::new(Kikee::definition(config.gestures.kikee.clone())).with_policy(policy),
        ));
    }
    matchers
}

#[cfg(feature = "capture")]
mod live {
    use std::{path::Path, sync::atomic::Ordering, thread};

    use whistler_core::{
        record::fixture_file_name, AppConfig, AudioCapture, AudioConfig, Detector, Expectation,
        Kikee, Recording, RisingWhistle, WhistlerError,
    };

    use super::{wait_for_enter, GestureChoice};

    pub fn list_devices() -> whistler_core::Result<()> {
        for name in AudioCapture::list_devices()? {
            println!("{name}");
        }
        Ok(())
    }

    fn detector_for(config: &AppConfig, capture: &AudioCapture) -> whistler_core::Result<Detector> {
        let audio = AudioConfig {
            sample_rate: capture.sample_rate(),
            ..config.audio.clone()
        };
        Ok(Detector::new(&audio)?.with_matcher_config(config.matcher.clone()))
    }

    pub fn listen(
        config: &AppConfig,
        device: Option<&str>,
        gesture: GestureChoice,
    ) -> whistler_core::Result<()> {
        let mut capture = AudioCapture::open(device)?;
        let mut detector = detector_for(config, &capture)?;

        let mut sinks = Vec::new();
        if gesture.includes_rising() {
            sinks.push(detector.register(RisingWhistle::definition(config.gestures.rising.clone())));
        }
        if gesture.includes_kikee() {
            sinks.push(detector.register(Kikee::definition(config.gestures.kikee.clone())));
        }
        let dropped = detector.drop_counter();

        let printers: Vec<_> = sinks
            .into_iter()
            .map(|events| {
                thread::spawn(move || {
                    for event in events {
                        println!(
                            "Whistle whistle! {} at {:.2}s",
                            event.gesture,
                            event.stream_time.as_secs_f64()
                        );
                    }
                })
            })
            .collect();

        capture.start(detector)?;
        println!("Listening on {}. Press ENTER to quit", capture.device_name());
        let waited = wait_for_enter();
        capture.close();

        for printer in printers {
            if printer.join().is_err() {
                tracing::warn!("notification printer panicked");
            }
        }
        tracing::info!(
            dropped = dropped.load(Ordering::Relaxed),
            "stopped listening"
        );
        waited
    }

    pub fn record(
        config: &AppConfig,
        device: Option<&str>,
        testdir: &Path,
        name: &str,
        expectation: Expectation,
    ) -> whistler_core::Result<()> {
        let mut capture = AudioCapture::open(device)?;
        let mut detector = detector_for(config, &capture)?;
        let frames = detector.tap(256);

        let collector = thread::spawn(move || {
            let mut recording = Recording::new();
            for waves in frames {
                recording.push(waves);
            }
            recording
        });

        capture.start(detector)?;
        println!("Recording from {}. Press ENTER to stop", capture.device_name());
        let waited = wait_for_enter();
        capture.close();
        waited?;

        let recording = collector
            .join()
            .map_err(|_| WhistlerError::msg("recording thread panicked"))?;
        let timestamp = chrono::Local::now().format("%H%M%S%m%d%Y").to_string();
        let path = fixture_file_name(testdir, name, expectation, &timestamp);
        recording.save(&path)?;

        println!("Wrote file {}", path.display());
        Ok(())
    }
}

#[cfg(not(feature = "capture"))]
mod live {
    use std::path::Path;

    use whistler_core::{AppConfig, Expectation, WhistlerError};

    use super::GestureChoice;

    fn unavailable() -> whistler_core::Result<()> {
        Err(WhistlerError::device(
            "built without the `capture` feature",
        ))
    }

    pub fn list_devices() -> whistler_core::Result<()> {
        unavailable()
    }

    pub fn listen(
        _config: &AppConfig,
        _device: Option<&str>,
        _gesture: GestureChoice,
    ) -> whistler_core::Result<()> {
        unavailable()
    }

    pub fn record(
        _config: &AppConfig,
        _device: Option<&str>,
        _testdir: &Path,
        _name: &str,
        _expectation: Expectation,
    ) -> whistler_core::Result<()> {
        unavailable()
    }
}

#[cfg_attr(not(feature = "capture"), allow(dead_code))]
fn wait_for_enter() -> whistler_core::Result<()> {
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Listens for whistled gestures", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen on the microphone and report recognised gestures.
    Listen {
        /// Input device name; the system default when omitted.
        #[arg(short, long)]
        device: Option<String>,
        #[arg(short, long, value_enum, default_value_t = GestureChoice::All)]
        gesture: GestureChoice,
    },
    /// Record analysed frames into a fixture file.
    Record {
        /// Directory where the fixture is written.
        #[arg(long)]
        testdir: PathBuf,
        /// Name embedded in the fixture file name.
        #[arg(long, default_value = "recording")]
        name: String,
        /// Mark the recording as one that must not match.
        #[arg(long)]
        negative: bool,
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Replay recorded fixtures and check them against their expectation.
    Test {
        /// Directory holding `pos_*.json` and `neg_*.json` fixtures.
        #[arg(long)]
        testdir: PathBuf,
        /// Replay a single fixture from the directory.
        #[arg(long)]
        file: Option<String>,
        #[arg(short, long, value_enum, default_value_t = GestureChoice::Kikee)]
        gesture: GestureChoice,
    },
    /// List available input devices.
    Devices,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum GestureChoice {
    Rising,
    Kikee,
    All,
}

impl GestureChoice {
    fn includes_rising(self) -> bool {
        matches!(self, GestureChoice::Rising | GestureChoice::All)
    }

    fn includes_kikee(self) -> bool {
        matches!(self, GestureChoice::Kikee | GestureChoice::All)
    }
}
