use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, warn};

use cubechip::audio::AudioOut;
use cubechip::{
    emu_state, AppConfig, CoreEnv, CoreError, CoreRegistry, CoreWorker, DisplaySink, GlobalAudio,
    HomeDirManager, NullAudioOut, RodioAudioOut, SharedKeyboard, SystemCore,
};

#[derive(Parser, Debug)]
#[command(version, about = "CubeChip, a multi-system emulator engine")]
struct Args {
    /// Path to the program file to run
    program: PathBuf,

    /// Override the home directory
    #[arg(long)]
    home: Option<PathBuf>,

    /// Anchor the home directory at the working directory
    #[arg(long)]
    portable: bool,

    /// Stop after this many seconds; 0 runs until the program halts
    #[arg(long, default_value_t = 0)]
    run_seconds: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(run_error) => {
            error!("{}", run_error);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), CoreError> {
    let home = Arc::new(HomeDirManager::initialize(
        args.home.as_deref(),
        "cubechip.toml",
        args.portable,
        "CubeChip",
        "cubechip",
    )?);
    let config = home.parse_main_app_config();
    let audio_base = Arc::new(GlobalAudio::new(config.audio));

    let mut registry = CoreRegistry::with_builtin_cores();
    registry.load_program_db(Some(&home.home_path().join("programs.json")));

    if !home.validate_game_file(&args.program, &mut registry)? {
        let extension = args
            .program
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        return Err(CoreError::NoEligibleCore { extension });
    }

    // prefer a real playback device, fall back to silence
    let rodio_stream = rodio::OutputStream::try_default();
    let (_stream, audio_out): (Option<rodio::OutputStream>, Arc<dyn AudioOut>) = match rodio_stream
    {
        Ok((stream, handle)) => (Some(stream), Arc::new(RodioAudioOut::new(handle))),
        Err(stream_error) => {
            warn!("no audio playback device: {}", stream_error);
            (None, Arc::new(NullAudioOut))
        }
    };

    let env = CoreEnv {
        video: Arc::new(DisplaySink::new()),
        audio_out,
        audio_base: Arc::clone(&audio_base),
        keyboard: Arc::new(SharedKeyboard::new()),
        home: Arc::clone(&home),
    };

    let core = registry.construct_core(0, &env)?;
    let shared = core.shared();
    info!(
        "running '{}' on the {} core",
        home.file_name(),
        registry.current_core().map(|c| c.name).unwrap_or("?")
    );

    let mut worker = CoreWorker::new();
    worker.start_worker(core);

    let started = Instant::now();
    loop {
        std::thread::sleep(Duration::from_millis(500));

        let overlay = shared.copy_overlay_data();
        if let Some(line) = overlay.lines().next() {
            print!("\r{}          ", line);
            let _ = io::stdout().flush();
        }

        let state = shared.system_state();
        if state & (emu_state::HALTED | emu_state::FATAL) != 0 {
            println!();
            if state & emu_state::FATAL != 0 {
                warn!("the program faulted; see the log for the offending opcode");
            } else {
                info!("the program halted normally");
            }
            break;
        }
        if args.run_seconds > 0 && started.elapsed().as_secs() >= args.run_seconds {
            println!();
            info!("run window elapsed, stopping");
            break;
        }
    }
    worker.stop_worker();

    home.write_main_app_config(&AppConfig {
        audio: audio_base.export_settings(),
    })?;
    Ok(())
}
