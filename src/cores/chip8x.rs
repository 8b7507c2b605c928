use tracing::warn;

use crate::audio::make_pulse_wave;
use crate::color::Rgba;
use crate::cores::chip8_context::{
    decay_pixel_trails, impl_chip8_system_core, Chip8Context, Chip8Core, Interrupt, BACK_COLORS, FORE_COLORS,
    PIXEL_OPACITY, TONAL_OFFSET, VOICE_BUZZER, VOICE_UNIQUE,
};
use crate::error::CoreError;
use crate::font;
use crate::harness::{CoreEnv, SystemCore};
use crate::map2d::Map2D;

const TOTAL_MEMORY: usize = 16 * 1024;
const SAFEZONE_OOB: usize = 32;
const GAME_LOAD_POS: usize = 768;
const START_OFFSET: u32 = 768;
const REFRESH_RATE: f32 = 61.0;

const RES_SIZE_MULT: i32 = 8;
const SCREEN_SIZE_X: i32 = 64;
const SCREEN_SIZE_Y: i32 = 32;
const INST_SPEED_HI: i32 = 30;

/// CHIP-8X: the VP-590 expansion set, with a colour-zone map over the mono
/// display, a two-player keypad, and a tunable buzzer.
pub struct Chip8X {
    ctx: Chip8Context,
    mem: Vec<u8>,
    display: Map2D<u8>,
    colored_buffer: Map2D<Rgba>,
    /// Row mask selecting zone granularity: 0xFC in 4-row zones, 0xFF in
    /// single-row zones.
    color_resolution: u8,
    background_color: usize,
}

impl Chip8X {
    pub fn validate_program(data: &[u8]) -> bool {
        !data.is_empty() && data.len() + GAME_LOAD_POS <= TOTAL_MEMORY
    }

    pub fn construct(env: &CoreEnv) -> Result<Box<dyn SystemCore>, CoreError> {
        Ok(Box::new(Chip8X::new(env)?))
    }

    pub fn new(env: &CoreEnv) -> Result<Self, CoreError> {
        let mut ctx = Chip8Context::new(env)?;
        let mut mem = vec![0u8; TOTAL_MEMORY + SAFEZONE_OOB];
        mem[TOTAL_MEMORY..].fill(0xFF);

        let data = env.home.file_data();
        mem[GAME_LOAD_POS..GAME_LOAD_POS + data.len()].copy_from_slice(&data);
        font::copy_font_to_memory(&mut mem, font::SMALL_FONT_SIZE);

        ctx.display.set(SCREEN_SIZE_X, SCREEN_SIZE_Y);
        ctx.sys
            .video
            .set_viewport_sizes(true, SCREEN_SIZE_X, SCREEN_SIZE_Y, RES_SIZE_MULT, 2);
        ctx.sys.set_system_framerate(REFRESH_RATE);

        ctx.pc = START_OFFSET;
        ctx.target_cpf = INST_SPEED_HI;

        let mut colored_buffer = Map2D::new(SCREEN_SIZE_X >> 3, SCREEN_SIZE_Y);
        // the original hardware powers on with the first colour zone lit
        colored_buffer.set(0, 0, FORE_COLORS[2]);

        Ok(Chip8X {
            ctx,
            mem,
            display: Map2D::new(SCREEN_SIZE_X, SCREEN_SIZE_Y),
            colored_buffer,
            color_resolution: 0xFC,
            background_color: 0,
        })
    }

    fn read_memory_i(&self, pos: usize) -> u8 {
        self.mem[self.ctx.reg_i as usize + pos]
    }

    fn write_memory_i(&mut self, value: u8, pos: usize) {
        let index = self.ctx.reg_i as usize + pos;
        let valid = if index < TOTAL_MEMORY {
            index
        } else {
            TOTAL_MEMORY + SAFEZONE_OOB - 1
        };
        self.mem[valid] = value;
    }

    fn skip_instruction(&mut self) {
        self.ctx.pc = self.ctx.pc.wrapping_add(2);
    }

    fn set_buzzer_pitch(&mut self, pitch: u8) {
        let pitch = if pitch != 0 { pitch } else { 0x80 };
        let tone = ((0xFF - pitch as i32) >> 3 << 4) as f64;
        self.ctx.voices[VOICE_UNIQUE].step = (TONAL_OFFSET + tone) / self.ctx.sample_rate();
    }

    /// Fills 4-row colour zones; the covered span widens with the operand
    /// coordinates.
    fn draw_lores_color(&mut self, x: i32, y: i32, index: usize) {
        let color = FORE_COLORS[index & 0x7];
        for py in 0..=(y >> 4) {
            for px in 0..=(x >> 4) {
                *self
                    .colored_buffer
                    .pixel_mut((x + px) & 0x7, ((y + py) << 2) & 0x1F) = color;
            }
        }
        self.color_resolution = 0xFC;
    }

    /// Paints one column of single-row colour zones.
    fn draw_hires_color(&mut self, x: i32, y: i32, index: usize, n: i32) {
        let color = FORE_COLORS[index & 0x7];
        let px = x >> 3;
        for py in y..y + n {
            *self.colored_buffer.pixel_mut(px & 0x7, py & 0x1F) = color;
        }
        self.color_resolution = 0xFF;
    }

    fn draw_byte(&mut self, x: i32, y: i32, data: u8) {
        if data == 0 {
            return;
        }
        let width = self.ctx.display.w;
        let mut x = x;
        if self.ctx.quirk.wrap_sprite {
            x &= width - 1;
        } else if x >= width {
            return;
        }
        for bit in 0..8 {
            if data & (0x80 >> bit) != 0 {
                let pixel = self.display.pixel_mut(x, y);
                *pixel ^= 0x8;
                if *pixel & 0x8 == 0 {
                    self.ctx.v[0xF] = 1;
                }
            }
            if !self.ctx.quirk.wrap_sprite && x == width - 1 {
                return;
            }
            x = (x + 1) & (width - 1);
        }
    }

    fn op_dxyn(&mut self, x: usize, y: usize, n: usize) {
        self.ctx.trigger_interrupt(Interrupt::Frame);

        let width_mask = self.ctx.display.w - 1;
        let height_mask = self.ctx.display.h - 1;
        let px = self.ctx.v[x] as i32 & width_mask;
        let mut py = self.ctx.v[y] as i32 & height_mask;
        self.ctx.v[0xF] = 0;

        if n == 0 {
            for row in 0..16 {
                self.draw_byte(px, py, self.read_memory_i(row * 2));
                self.draw_byte(px + 8, py, self.read_memory_i(row * 2 + 1));
                if !self.ctx.quirk.wrap_sprite && py == height_mask {
                    break;
                }
                py = (py + 1) & height_mask;
            }
        } else {
            for row in 0..n {
                self.draw_byte(px, py, self.read_memory_i(row));
                if !self.ctx.quirk.wrap_sprite && py == height_mask {
                    break;
                }
                py = (py + 1) & height_mask;
            }
        }
    }
}

impl_chip8_system_core!(Chip8X);

impl Chip8Core for Chip8X {
    fn ctx(&self) -> &Chip8Context {
        &self.ctx
    }

    fn ctx_mut(&mut self) -> &mut Chip8Context {
        &mut self.ctx
    }

    fn max_display(&self) -> (i32, i32) {
        (SCREEN_SIZE_X, SCREEN_SIZE_Y)
    }

    fn instruction_loop(&mut self) {
        let mut cycles = 0i32;
        while cycles < self.ctx.target_cpf {
            let pc = self.ctx.pc as usize;
            let (hi, lo) = if pc + 1 < self.mem.len() {
                (self.mem[pc], self.mem[pc + 1])
            } else {
                (0xFF, 0xFF)
            };
            self.ctx.next_instruction();

            let x = (hi & 0xF) as usize;
            let y = (lo >> 4) as usize;
            let nnn = ((hi as u32 & 0xF) << 8) | lo as u32;

            match hi >> 4 {
                0x0 => match (hi as u16) << 8 | lo as u16 {
                    0x00E0 => {
                        self.ctx.trigger_interrupt(Interrupt::Frame);
                        self.display.initialize();
                    }
                    0x00EE => self.ctx.pop_call_stack(),
                    0x02A0 => {
                        self.background_color = (self.background_color + 1) & 0x3;
                        self.ctx
                            .sys
                            .video
                            .set_border_color(BACK_COLORS[self.background_color]);
                    }
                    _ => self.ctx.instruction_error(hi, lo),
                },
                0x1 => self.ctx.perform_prog_jump(nnn),
                0x2 => {
                    self.ctx.push_call_stack();
                    self.ctx.perform_prog_jump(nnn);
                }
                0x3 => {
                    if self.ctx.v[x] == lo {
                        self.skip_instruction();
                    }
                }
                0x4 => {
                    if self.ctx.v[x] != lo {
                        self.skip_instruction();
                    }
                }
                0x5 => match lo & 0xF {
                    0x0 => {
                        if self.ctx.v[x] == self.ctx.v[y] {
                            self.skip_instruction();
                        }
                    }
                    // 5XY1: nibble-wise add without carry between nibbles
                    0x1 => {
                        let len_x =
                            (self.ctx.v[x] as i32 & 0x70) + (self.ctx.v[y] as i32 & 0x70);
                        let len_y = (self.ctx.v[x] as i32 + self.ctx.v[y] as i32) & 0x7;
                        self.ctx.v[x] = (len_x | len_y) as u8;
                    }
                    _ => self.ctx.instruction_error(hi, lo),
                },
                0x6 => self.ctx.v[x] = lo,
                0x7 => self.ctx.v[x] = self.ctx.v[x].wrapping_add(lo),
                0x8 => {
                    if !self.ctx.exec_alu(x, y, lo & 0xF) {
                        self.ctx.instruction_error(hi, lo);
                    }
                }
                0x9 => {
                    if lo & 0xF != 0 {
                        self.ctx.instruction_error(hi, lo);
                    } else if self.ctx.v[x] != self.ctx.v[y] {
                        self.skip_instruction();
                    }
                }
                0xA => self.ctx.reg_i = nnn & 0xFFF,
                // BXYN paints colour zones rather than jumping
                0xB => {
                    if hi == 0xBF {
                        self.ctx.instruction_error(hi, lo);
                    } else {
                        let n = (lo & 0xF) as i32;
                        let vx = self.ctx.v[x] as i32;
                        let vx1 = self.ctx.v[(x + 1) & 0xF] as i32;
                        let color = (self.ctx.v[y] & 0x7) as usize;
                        if n != 0 {
                            self.draw_hires_color(vx, vx1, color, n);
                        } else {
                            self.draw_lores_color(vx, vx1, color);
                        }
                    }
                }
                0xC => self.ctx.v[x] = self.ctx.sys.rng.next_u8() & lo,
                0xD => self.op_dxyn(x, y, (lo & 0xF) as usize),
                0xE => match lo {
                    0x9E => {
                        if self.ctx.keyboard.key_held_p1(self.ctx.v[x] as u32) {
                            self.skip_instruction();
                        }
                    }
                    0xA1 => {
                        if !self.ctx.keyboard.key_held_p1(self.ctx.v[x] as u32) {
                            self.skip_instruction();
                        }
                    }
                    0xF2 => {
                        if self.ctx.keyboard.key_held_p2(self.ctx.v[x] as u32) {
                            self.skip_instruction();
                        }
                    }
                    0xF5 => {
                        if !self.ctx.keyboard.key_held_p2(self.ctx.v[x] as u32) {
                            self.skip_instruction();
                        }
                    }
                    _ => self.ctx.instruction_error(hi, lo),
                },
                0xF => match lo {
                    0x07 => self.ctx.v[x] = self.ctx.delay_timer,
                    0x0A => {
                        self.ctx.trigger_interrupt(Interrupt::Input);
                        self.ctx.input_reg = x;
                    }
                    0x15 => self.ctx.delay_timer = self.ctx.v[x],
                    0x18 => {
                        let value = self.ctx.v[x] as u32;
                        self.ctx.voices[VOICE_UNIQUE].timer = value + (value == 1) as u32;
                    }
                    0x1E => {
                        self.ctx.reg_i = (self.ctx.reg_i + self.ctx.v[x] as u32) & 0xFFF;
                    }
                    0x29 => {
                        self.ctx.reg_i =
                            (self.ctx.v[x] as u32 & 0xF) * 5 + font::SMALL_FONT_OFFSET as u32;
                    }
                    0x33 => {
                        let value = self.ctx.v[x];
                        self.write_memory_i(value / 100, 0);
                        self.write_memory_i(value / 10 % 10, 1);
                        self.write_memory_i(value % 10, 2);
                    }
                    0x55 => {
                        for idx in 0..=x {
                            self.write_memory_i(self.ctx.v[idx], idx);
                        }
                        if !self.ctx.quirk.idx_reg_no_inc {
                            self.ctx.reg_i = (self.ctx.reg_i + x as u32 + 1) & 0xFFF;
                        }
                    }
                    0x65 => {
                        for idx in 0..=x {
                            self.ctx.v[idx] = self.read_memory_i(idx);
                        }
                        if !self.ctx.quirk.idx_reg_no_inc {
                            self.ctx.reg_i = (self.ctx.reg_i + x as u32 + 1) & 0xFFF;
                        }
                    }
                    0xF8 => {
                        let pitch = self.ctx.v[x];
                        self.set_buzzer_pitch(pitch);
                    }
                    0xFB => {
                        // the expansion's input port is not wired up
                        warn!("unsupported port wait requested, continuing");
                        self.ctx.trigger_interrupt(Interrupt::Frame);
                    }
                    _ => self.ctx.instruction_error(hi, lo),
                },
                _ => unreachable!(),
            }
            cycles += 1;
        }
        self.ctx.sys.elapsed_cycles += cycles.max(0) as u64;
    }

    fn render_audio(&mut self) {
        let length = self.ctx.audio_frame_len();
        let mut samples = vec![0.0f32; length];
        make_pulse_wave(&mut samples, &mut self.ctx.voices[VOICE_UNIQUE]);
        make_pulse_wave(&mut samples, &mut self.ctx.voices[VOICE_BUZZER]);
        self.ctx.push_audio_frame(&samples);

        const ACTIVE_FORE: [usize; 4] = [2, 7, 4, 1];
        let border = if self.ctx.sound_timers_active() {
            FORE_COLORS[ACTIVE_FORE[self.background_color]]
        } else {
            BACK_COLORS[self.background_color]
        };
        self.ctx.sys.video.set_border_color(border);
    }

    fn render_video(&mut self) {
        let trails = self.ctx.traits.using_pixel_trails;
        let width = self.ctx.display.w;
        let color_mask = self.color_resolution as i32;
        let background = BACK_COLORS[self.background_color];
        let colors = self.colored_buffer.clone();
        let mut index = 0usize;

        self.ctx.sys.video.write_map(&self.display, move |pixel| {
            let i = index as i32;
            index += 1;
            let zone_y = (i / width) & color_mask;
            let zone_x = (i % width) >> 3;
            let foreground = colors.get(zone_x, zone_y & (colors.height() - 1));
            if trails {
                if pixel != 0 {
                    foreground.with_alpha(PIXEL_OPACITY[(pixel & 0xF) as usize]).packed()
                } else {
                    background.with_alpha(0xFF).packed()
                }
            } else if pixel & 0x8 != 0 {
                foreground.with_alpha(0xFF).packed()
            } else {
                background.with_alpha(0xFF).packed()
            }
        });
        decay_pixel_trails(self.display.as_mut_slice());
    }
}
