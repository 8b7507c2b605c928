use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

use crate::audio::{AudioOut, GlobalAudio};
use crate::homedir::HomeDirManager;
use crate::keystate::KeyStateSource;
use crate::pacer::FrameLimiter;
use crate::video::DisplaySink;
use crate::well512::Well512;

/// Bit flags composing the observable run state of a core instance.
pub mod emu_state {
    pub const NORMAL: u32 = 0x00;
    /// The hosting window is hidden; the core idles.
    pub const HIDDEN: u32 = 0x01;
    /// Paused by the user.
    pub const PAUSED: u32 = 0x02;
    /// The program reached its normal end path.
    pub const HALTED: u32 = 0x04;
    /// The program faulted.
    pub const FATAL: u32 = 0x08;
    /// Benchmarking mode, uncapped pacing.
    pub const BENCH: u32 = 0x10;

    /// While any of these bits is set, the instruction loop must not
    /// advance VM state.
    pub const NOT_RUNNING: u32 = HIDDEN | PAUSED | HALTED | FATAL;
}

/// State a core shares with its host across the worker thread boundary:
/// the run-state bitmask, the target framerate, and the overlay text slot.
///
/// Readers of the overlay observe either the previous string or the fully
/// constructed new one; the slot swaps whole `Arc`s under a short lock, the
/// portable equivalent of an atomic shared pointer.
pub struct SystemShared {
    state: AtomicU32,
    fps_bits: AtomicU32,
    overlay: RwLock<Arc<String>>,
}

impl Default for SystemShared {
    fn default() -> Self {
        SystemShared {
            state: AtomicU32::new(emu_state::NORMAL),
            fps_bits: AtomicU32::new(60.0f32.to_bits()),
            overlay: RwLock::new(Arc::new(String::new())),
        }
    }
}

impl SystemShared {
    pub fn new() -> Arc<Self> {
        Arc::new(SystemShared::default())
    }

    pub fn add_system_state(&self, state: u32) {
        self.state.fetch_or(state, Ordering::AcqRel);
    }

    pub fn sub_system_state(&self, state: u32) {
        self.state.fetch_and(!state, Ordering::AcqRel);
    }

    pub fn xor_system_state(&self, state: u32) {
        self.state.fetch_xor(state, Ordering::AcqRel);
    }

    pub fn set_system_state(&self, state: u32) {
        self.state.store(state, Ordering::Release);
    }

    pub fn system_state(&self) -> u32 {
        self.state.load(Ordering::Acquire)
    }

    pub fn is_system_running(&self) -> bool {
        self.system_state() & emu_state::NOT_RUNNING == 0
    }

    pub fn system_framerate(&self) -> f32 {
        f32::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn store_framerate(&self, value: f32) {
        self.fps_bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Publishes a freshly built overlay string.
    pub fn save_overlay_data(&self, data: &str) {
        *self.overlay.write().unwrap() = Arc::new(data.to_string());
    }

    /// Fetches a copy of the overlay string; safe from any thread.
    pub fn copy_overlay_data(&self) -> String {
        self.overlay.read().unwrap().as_ref().clone()
    }
}

/// Everything a core constructor needs from the host: the sinks, the key
/// source, the audio base, and the home-directory service holding the
/// loaded program.
pub struct CoreEnv {
    pub video: Arc<DisplaySink>,
    pub audio_out: Arc<dyn AudioOut>,
    pub audio_base: Arc<GlobalAudio>,
    pub keyboard: Arc<dyn KeyStateSource>,
    pub home: Arc<HomeDirManager>,
}

/// Per-core harness state living on the worker side: pacer, RNG, sinks and
/// the shared slot back to the host.
pub struct SystemContext {
    pub shared: Arc<SystemShared>,
    pub pacer: FrameLimiter,
    pub video: Arc<DisplaySink>,
    pub keyboard: Arc<dyn KeyStateSource>,
    pub rng: Well512,
    pub elapsed_cycles: u64,
}

impl SystemContext {
    pub fn new(env: &CoreEnv) -> Self {
        SystemContext {
            shared: SystemShared::new(),
            pacer: FrameLimiter::default(),
            video: Arc::clone(&env.video),
            keyboard: Arc::clone(&env.keyboard),
            rng: Well512::new(),
            elapsed_cycles: 0,
        }
    }

    /// Sets the target framerate on both the shared slot and the pacer.
    pub fn set_system_framerate(&mut self, value: f32) {
        self.shared.store_framerate(value);
        self.pacer.set_limiter(value);
    }

    /// Builds the two-line framerate/frametime overlay string.
    pub fn make_overlay_data(&self) -> String {
        let frame_ms = self.pacer.elapsed_millis_last();
        let elapsed = self.pacer.elapsed_micros_since() / 1000.0;
        let rate = if frame_ms <= 0.0 {
            self.shared.system_framerate()
        } else {
            (1000.0 / frame_ms * 100.0).round() / 100.0
        };
        format!(
            "Framerate:{:9.3} fps |{:9.3}ms\nFrametime:{:9.3} ms ({:3.2}%)\n",
            rate,
            frame_ms,
            elapsed,
            elapsed / self.pacer.framespan_millis() * 100.0
        )
    }

    /// Publishes the overlay once every other validated frame.
    pub fn push_overlay_data(&mut self) {
        if self.pacer.valid_frame_counter() & 0x1 == 1 {
            let data = self.make_overlay_data();
            self.shared.save_overlay_data(&data);
        }
    }
}

/// A runnable core instance. The worker thread drives
/// [SystemCore::main_system_loop] until cancelled.
pub trait SystemCore: Send {
    /// One full iteration: pace, sample input, advance the VM, render.
    fn main_system_loop(&mut self);

    /// The state slot this core shares with its host.
    fn shared(&self) -> Arc<SystemShared>;

    fn max_display_w(&self) -> i32;
    fn max_display_h(&self) -> i32;

    fn display_size(&self) -> i32 {
        self.max_display_w() * self.max_display_h()
    }
}

/// Owns the dedicated worker thread of a core instance.
///
/// Cancellation is cooperative: the worker polls the stop token between
/// frames, so `stop_worker` returns only after a clean join. The worker is
/// joined on drop as well; a core instance never outlives its owner.
pub struct CoreWorker {
    thread: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl Default for CoreWorker {
    fn default() -> Self {
        CoreWorker {
            thread: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl CoreWorker {
    pub fn new() -> Self {
        CoreWorker::default()
    }

    pub fn is_worker_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Spawns the worker thread for `core`. A second call while a worker is
    /// already running is a no-op (the core stays with the first worker).
    pub fn start_worker(&mut self, mut core: Box<dyn SystemCore>) {
        if self.thread.is_some() {
            return;
        }
        self.stop.store(false, Ordering::Release);
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name("cubechip-core".to_string())
            .spawn(move || {
                // an elevated scheduling priority would go here; std offers
                // no portable handle for it
                while !stop.load(Ordering::Acquire) {
                    core.main_system_loop();
                }
            })
            .expect("worker thread spawn failed");
        self.thread = Some(handle);
    }

    /// Signals the stop token and joins the worker.
    pub fn stop_worker(&mut self) {
        if let Some(handle) = self.thread.take() {
            self.stop.store(true, Ordering::Release);
            let _ = handle.join();
        }
    }
}

impl Drop for CoreWorker {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_bit_composition() {
        let shared = SystemShared::new();
        assert!(shared.is_system_running());
        shared.add_system_state(emu_state::PAUSED);
        shared.add_system_state(emu_state::BENCH);
        assert!(!shared.is_system_running());
        shared.sub_system_state(emu_state::PAUSED);
        assert!(shared.is_system_running());
        assert_eq!(shared.system_state(), emu_state::BENCH);
    }

    #[test]
    fn test_overlay_round_trip() {
        let shared = SystemShared::new();
        assert_eq!(shared.copy_overlay_data(), "");
        shared.save_overlay_data("two\nlines\n");
        assert_eq!(shared.copy_overlay_data(), "two\nlines\n");
    }

    struct SpinCore {
        shared: Arc<SystemShared>,
    }

    impl SystemCore for SpinCore {
        fn main_system_loop(&mut self) {
            std::thread::yield_now();
        }
        fn shared(&self) -> Arc<SystemShared> {
            Arc::clone(&self.shared)
        }
        fn max_display_w(&self) -> i32 {
            64
        }
        fn max_display_h(&self) -> i32 {
            32
        }
    }

    #[test]
    fn test_worker_starts_and_joins() {
        let mut worker = CoreWorker::new();
        let core = SpinCore {
            shared: SystemShared::new(),
        };
        worker.start_worker(Box::new(core));
        assert!(worker.is_worker_running());
        worker.stop_worker();
        assert!(!worker.is_worker_running());
    }
}
