pub mod audio;
pub mod color;
pub mod cores;
pub mod error;
pub mod font;
pub mod harness;
pub mod homedir;
pub mod keystate;
pub mod map2d;
pub mod pacer;
pub mod registry;
pub mod ring_buffer;
pub mod video;
pub mod well512;

// Re-exports
pub use crate::audio::{AudioOut, GlobalAudio, NullAudioOut, RodioAudioOut};
pub use crate::error::CoreError;
pub use crate::harness::{emu_state, CoreEnv, CoreWorker, SystemCore, SystemShared};
pub use crate::homedir::{AppConfig, HomeDirManager};
pub use crate::keystate::{Scancode, SharedKeyboard};
pub use crate::registry::{CoreDescriptor, CoreRegistry};
pub use crate::video::DisplaySink;
