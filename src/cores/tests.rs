//! Whole-frame scenarios driving the interpreter cores end to end.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::{env, fs};

use crate::audio::{AudioSettings, GlobalAudio, NullAudioOut};
use crate::cores::chip8_context::{Chip8Core, Interrupt, VOICE_BUZZER};
use crate::cores::chip8_modern::{self, Chip8Modern};
use crate::cores::chip8x;
use crate::cores::megachip::{self, Megachip};
use crate::cores::schip_legacy::{self, SchipLegacy};
use crate::cores::schip_modern::{self, SchipModern};
use crate::cores::xochip::{self, Xochip};
use crate::cores::{bytepusher, bytepusher::BytePusher};
use crate::harness::{CoreEnv, SystemCore};
use crate::homedir::HomeDirManager;
use crate::keystate::{Scancode, SharedKeyboard};
use crate::registry::CoreRegistry;
use crate::video::DisplaySink;

static HOME_SEQ: AtomicU32 = AtomicU32::new(0);

struct TestRig {
    env: CoreEnv,
    keyboard: Arc<SharedKeyboard>,
    home_dir: PathBuf,
}

impl Drop for TestRig {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.home_dir);
    }
}

fn rig_with_program(name: &str, program: &[u8]) -> TestRig {
    let home_dir = env::temp_dir().join(format!(
        "cubechip-scenario-{}-{}",
        std::process::id(),
        HOME_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&home_dir).unwrap();
    let home =
        HomeDirManager::initialize(Some(&home_dir), "cubechip.toml", false, "CubeChip", "cubechip")
            .unwrap();
    home.cache_program(name, program.to_vec());
    let keyboard = Arc::new(SharedKeyboard::new());
    TestRig {
        env: CoreEnv {
            video: Arc::new(DisplaySink::new()),
            audio_out: Arc::new(NullAudioOut),
            audio_base: Arc::new(GlobalAudio::new(AudioSettings::default())),
            keyboard: Arc::clone(&keyboard) as Arc<dyn crate::keystate::KeyStateSource>,
            home: Arc::new(home),
        },
        keyboard,
        home_dir,
    }
}

#[test]
fn test_jump_to_self_raises_sound_interrupt() {
    let rig = rig_with_program("loop.ch8", &[0x12, 0x00]);
    let mut core = Chip8Modern::new(&rig.env).unwrap();

    core.process_frame();

    assert_eq!(core.ctx().pc, 0x200);
    assert_eq!(core.ctx().interrupt, Interrupt::Sound);
}

#[test]
fn test_key_wait_suspends_until_press() {
    let rig = rig_with_program("wait.ch8", &[0x60, 0x41, 0xF0, 0x0A, 0x00, 0xE0]);
    let mut core = Chip8Modern::new(&rig.env).unwrap();

    core.process_frame();
    assert_eq!(core.ctx().interrupt, Interrupt::Input);
    assert_eq!(core.ctx().v[0], 0x41);
    assert!(core.ctx().target_cpf < 0);

    // frame 2: key 1 goes down
    rig.keyboard.set_pressed(Scancode::from_char('1'), true);
    core.process_frame();
    assert_eq!(core.ctx().interrupt, Interrupt::Clear);
    assert_eq!(core.ctx().v[0], 0x1);
    assert!(core.ctx().target_cpf > 0);
    // one short confirmation beep is scheduled
    assert_eq!(core.ctx().voices[VOICE_BUZZER].timer, 2);
}

#[test]
fn test_sprite_draw_sets_pixel_then_collides() {
    // draw the same one-pixel sprite twice via a jump back onto Dxy1
    let rig = rig_with_program(
        "draw.ch8",
        &[0x62, 0x03, 0x63, 0x03, 0xA3, 0x00, 0xD2, 0x31, 0x12, 0x06],
    );
    let mut core = Chip8Modern::new(&rig.env).unwrap();
    chip8_modern::tests::poke_memory(&mut core, 0x300, 0x80);

    core.process_frame();
    assert!(chip8_modern::tests::display_pixel(&core, 3, 3));
    assert_eq!(core.ctx().v[0xF], 0);

    core.process_frame();
    assert!(!chip8_modern::tests::display_pixel(&core, 3, 3));
    assert_eq!(core.ctx().v[0xF], 1);
}

#[test]
fn test_xochip_register_range_store() {
    let rig = rig_with_program(
        "range.xo8",
        &[
            0x60, 0x01, 0x61, 0x02, 0x62, 0x03, 0xA4, 0x00, 0x50, 0x22,
        ],
    );
    let mut core = Xochip::new(&rig.env).unwrap();
    xochip::tests::set_planar_mask(&mut core, 3);

    core.process_frame();

    assert_eq!(xochip::tests::memory_at(&core, 0x400), 1);
    assert_eq!(xochip::tests::memory_at(&core, 0x401), 2);
    assert_eq!(xochip::tests::memory_at(&core, 0x402), 3);
    assert_eq!(core.ctx().reg_i, 0x400);
}

#[test]
fn test_xochip_long_index_load_is_double_wide() {
    let rig = rig_with_program(
        "longload.xo8",
        &[0xF0, 0x00, 0x43, 0x21, 0x6E, 0x07, 0x12, 0x06],
    );
    let mut core = Xochip::new(&rig.env).unwrap();

    core.process_frame();

    assert_eq!(core.ctx().reg_i, 0x4321);
    // the operand word was stepped over, so 6E07 executed
    assert_eq!(core.ctx().v[0xE], 0x07);
}

#[test]
fn test_xochip_skip_over_long_load_is_four_bytes() {
    // 3000 skips the F000 NNNN pair entirely, landing on 6F42
    let rig = rig_with_program(
        "skiplong.xo8",
        &[0x30, 0x00, 0xF0, 0x00, 0x12, 0x34, 0x6F, 0x42, 0x12, 0x08],
    );
    let mut core = Xochip::new(&rig.env).unwrap();

    core.process_frame();

    assert_eq!(core.ctx().v[0xF], 0x42);
    assert_eq!(core.ctx().reg_i, 0);
}

#[test]
fn test_xochip_palette_expansion() {
    // 5004 expands the RGB 3:3:2 byte at I into palette entry 0; the byte
    // is zero, replacing the default colour with black
    let rig = rig_with_program("palette.xo8", &[0xA4, 0x00, 0x50, 0x04, 0x12, 0x04]);
    let mut core = Xochip::new(&rig.env).unwrap();

    let before = xochip::tests::palette_entry(&core, 0);
    core.process_frame();
    let after = xochip::tests::palette_entry(&core, 0);

    assert_ne!(before, after);
    assert_eq!((after.r, after.g, after.b), (0x00, 0x00, 0x00));
}

#[test]
fn test_schip_modern_resizes_display_on_hires() {
    // 00FF doubles the live resolution; the draw lands on the new grid.
    // I points at the built-in glyph "0", whose first row is 0x60.
    let rig = rig_with_program(
        "hires.sc8",
        &[0x00, 0xFF, 0xA0, 0x00, 0xD0, 0x01, 0x12, 0x06],
    );
    let mut core = SchipModern::new(&rig.env).unwrap();
    assert_eq!(schip_modern::tests::display_width(&core), 64);

    core.process_frame();

    assert_eq!(schip_modern::tests::display_width(&core), 128);
    assert!(!schip_modern::tests::display_pixel(&core, 0, 0));
    assert!(schip_modern::tests::display_pixel(&core, 1, 0));
    assert!(schip_modern::tests::display_pixel(&core, 2, 0));
    assert!(!schip_modern::tests::display_pixel(&core, 3, 0));
}

#[test]
fn test_xochip_draw_targets_selected_plane() {
    // F201 selects plane 1 only; the glyph row 0x60 lands there
    let rig = rig_with_program(
        "plane.xo8",
        &[0xF2, 0x01, 0xA0, 0x00, 0xD0, 0x01, 0x12, 0x06],
    );
    let mut core = Xochip::new(&rig.env).unwrap();

    core.process_frame();

    assert!(xochip::tests::plane_pixel(&core, 1, 1, 0));
    assert!(xochip::tests::plane_pixel(&core, 1, 2, 0));
    assert!(!xochip::tests::plane_pixel(&core, 0, 1, 0));
    assert_eq!(core.ctx().v[0xF], 0);
}

#[test]
fn test_schip_legacy_draw16_in_hires_and_lores() {
    let program = [0xA4, 0x00, 0xD0, 0x00, 0x12, 0x04];

    // high resolution: 32 bytes render as a 16x16 sprite
    let rig = rig_with_program("big.sc8", &program);
    let mut core = SchipLegacy::new(&rig.env).unwrap();
    schip_legacy::tests::set_hires(&mut core);
    for offset in 0..32 {
        schip_legacy::tests::poke_memory(&mut core, 0x400 + offset, 0xFF);
    }
    core.process_frame();
    assert!(schip_legacy::tests::display_pixel(&core, 0, 0));
    assert!(schip_legacy::tests::display_pixel(&core, 15, 15));
    assert!(!schip_legacy::tests::display_pixel(&core, 16, 0));
    // every row collided zero times, the counter stays clear
    assert_eq!(core.ctx().v[0xF], 0);

    // low resolution: the same draw covers 32x16 via pixel doubling
    let rig = rig_with_program("big2.sc8", &program);
    let mut core = SchipLegacy::new(&rig.env).unwrap();
    for offset in 0..16 {
        schip_legacy::tests::poke_memory(&mut core, 0x400 + offset, 0x80);
    }
    core.process_frame();
    assert!(schip_legacy::tests::display_pixel(&core, 0, 0));
    assert!(schip_legacy::tests::display_pixel(&core, 1, 0));
    assert!(schip_legacy::tests::display_pixel(&core, 0, 1));
    assert!(!schip_legacy::tests::display_pixel(&core, 2, 0));
}

#[test]
fn test_megachip_enters_manual_refresh_mode() {
    let rig = rig_with_program("enter.mc8", &[0x00, 0x11, 0x12, 0x02]);
    let mut core = Megachip::new(&rig.env).unwrap();

    core.process_frame();
    assert!(megachip::tests::is_manual_refresh(&core));
}

#[test]
fn test_megachip_mode_round_trip_scraps_buffers() {
    // 0010 directly after 0011 lands back in legacy mode with every
    // buffer zeroed, all within the same frame
    let rig = rig_with_program("mode.mc8", &[0x00, 0x11, 0x00, 0x10, 0x12, 0x04]);
    let mut core = Megachip::new(&rig.env).unwrap();

    core.process_frame();
    assert!(!megachip::tests::is_manual_refresh(&core));
    assert!(megachip::tests::buffers_all_clear(&core));
}

#[test]
fn test_megachip_texture_draw_detects_collision() {
    // enter mega mode, set a 1x1 texture, draw it twice at the same spot
    let rig = rig_with_program(
        "texture.mc8",
        &[
            0x00, 0x11, // enter manual-refresh mode
            0x03, 0x01, // texture width 1
            0x04, 0x01, // texture height 1
            0x09, 0x05, // collision index 5
            0xA1, 0x00, // I = 0x100
            0xD0, 0x01, // draw at (0, 0)
            0xD0, 0x01, // draw again, collides
            0x12, 0x0C, // spin
        ],
    );
    let mut core = Megachip::new(&rig.env).unwrap();
    megachip::tests::poke_memory(&mut core, 0x100, 0x05);
    megachip::tests::poke_palette(
        &mut core,
        0x05,
        crate::color::Rgba::new(0x20, 0x40, 0x60, 0xFF),
    );

    // frame 1 stops on the mode-switch interrupt, frame 2 runs the draws
    core.process_frame();
    core.process_frame();

    let pixel = megachip::tests::background_pixel(&core, 0, 0);
    assert_eq!((pixel.r, pixel.g, pixel.b), (0x20, 0x40, 0x60));
    assert_eq!(core.ctx().v[0xF], 1);
}

#[test]
fn test_perma_regs_round_trip_preserves_tail() {
    let rig = rig_with_program("rpl.sc8", &[0x12, 0x00]);
    let mut core = SchipLegacy::new(&rig.env).unwrap();

    core.ctx_mut().v[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    core.ctx_mut().set_perma_regs(4);

    // a second save of fewer registers must not disturb the tail
    core.ctx_mut().v[0] = 0x11;
    core.ctx_mut().set_perma_regs(1);

    core.ctx_mut().v[..4].fill(0);
    core.ctx_mut().get_perma_regs(4);
    assert_eq!(&core.ctx().v[..4], &[0x11, 0xAD, 0xBE, 0xEF]);

    // the on-disk file is exactly 16 bytes
    let file = fs::read(
        core.ctx()
            .perma_regs_dir
            .join(&core.ctx().program_sha1),
    )
    .unwrap();
    assert_eq!(file.len(), 16);
    assert!(file[4..].iter().all(|&b| b == 0));
}

#[test]
fn test_perma_regs_missing_file_reads_zero() {
    let rig = rig_with_program("fresh.sc8", &[0x12, 0x00]);
    let mut core = SchipLegacy::new(&rig.env).unwrap();
    core.ctx_mut().v[..8].fill(0x5A);
    core.ctx_mut().get_perma_regs(8);
    assert!(core.ctx().v[..8].iter().all(|&b| b == 0));
}

#[test]
fn test_bytepusher_copy_and_jump_cycle() {
    let rig = rig_with_program("cycle.BytePusher", &[0x00]);
    let mut core = BytePusher::new(&rig.env).unwrap();

    // program pointer starts at 0x080000
    bytepusher::tests::poke_memory(&mut core, 2, 0x08);
    bytepusher::tests::poke_memory(&mut core, 3, 0x00);
    bytepusher::tests::poke_memory(&mut core, 4, 0x00);

    // first instruction: copy [0x000100] -> [0x000200], then jump to a
    // self-looping no-op at 0x080009
    let inst = [
        0x00u8, 0x01, 0x00, // A
        0x00, 0x02, 0x00, // B
        0x08, 0x00, 0x09, // C
        0x00, 0x03, 0x00, // A' (no-op copies onto itself)
        0x00, 0x03, 0x00, // B'
        0x08, 0x00, 0x09, // C' loops forever
    ];
    for (offset, byte) in inst.iter().enumerate() {
        bytepusher::tests::poke_memory(&mut core, 0x080000 + offset, *byte);
    }
    bytepusher::tests::poke_memory(&mut core, 0x100, 0xAB);

    bytepusher::tests::run_one_frame(&mut core);

    assert_eq!(bytepusher::tests::memory_at(&core, 0x200), 0xAB);
    // the pointer field in memory is host-owned and untouched
    assert_eq!(bytepusher::tests::program_pointer(&core), 0x080000);
}

#[test]
fn test_chip8x_background_cycle_and_color_zone() {
    // 02A0 advances the background colour; BXY0 paints a colour zone
    let rig = rig_with_program(
        "color.c8x",
        &[
            0x02, 0xA0, // cycle background
            0x60, 0x00, // V0 = 0 (zone origin)
            0x61, 0x00, // V1 = 0
            0x62, 0x04, // V2 = colour index 4 (green)
            0xB0, 0x20, // BXY0 with X=0, Y=2
            0x13, 0x08, // spin
        ],
    );
    let mut core = chip8x::Chip8X::new(&rig.env).unwrap();
    assert_eq!(chip8x::tests::background_index(&core), 0);

    core.process_frame();

    assert_eq!(chip8x::tests::background_index(&core), 1);
    use crate::cores::chip8_context::FORE_COLORS;
    assert_eq!(chip8x::tests::color_zone(&core, 0, 0), FORE_COLORS[4]);
}

#[test]
fn test_alu_carry_is_written_after_result() {
    let rig = rig_with_program("alu.ch8", &[0x12, 0x00]);
    let mut core = Chip8Modern::new(&rig.env).unwrap();

    // 8xy4 carry
    core.ctx_mut().v[0] = 200;
    core.ctx_mut().v[1] = 100;
    core.ctx_mut().exec_alu(0, 1, 0x4);
    assert_eq!(core.ctx().v[0], 44);
    assert_eq!(core.ctx().v[0xF], 1);

    // 8xy5 with x == 0xF: the borrow flag must win over the difference
    core.ctx_mut().v[0xF] = 10;
    core.ctx_mut().v[2] = 20;
    core.ctx_mut().exec_alu(0xF, 2, 0x5);
    assert_eq!(core.ctx().v[0xF], 0);

    core.ctx_mut().v[0xF] = 30;
    core.ctx_mut().v[2] = 20;
    core.ctx_mut().exec_alu(0xF, 2, 0x5);
    assert_eq!(core.ctx().v[0xF], 1);
}

#[test]
fn test_registry_constructs_running_core() {
    let rig = rig_with_program("boot.ch8", &[0x12, 0x00]);
    let mut registry = CoreRegistry::with_builtin_cores();
    let data = rig.env.home.file_data();
    assert!(registry.validate_program(&data, ".ch8", &rig.env.home.file_sha1()));

    let core = registry.construct_core(0, &rig.env).unwrap();
    assert!(core.shared().is_system_running());
    assert_eq!(core.max_display_w(), 64);
    assert_eq!(registry.current_core().unwrap().name, "CHIP8_MODERN");

    registry.clear_eligible_cores();
    assert!(registry.current_core().is_none());
}
