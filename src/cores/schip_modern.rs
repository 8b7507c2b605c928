use crate::audio::make_pulse_wave;
use crate::cores::chip8_context::{
    decay_pixel_trails, impl_chip8_system_core, Chip8Context, Chip8Core, Interrupt, Resolution, BIT_COLORS,
    PIXEL_OPACITY, VOICE_BUZZER, VOICE_ID0, VOICE_ID1, VOICE_ID2,
};
use crate::error::CoreError;
use crate::font;
use crate::harness::{CoreEnv, SystemCore};
use crate::map2d::Map2D;

const TOTAL_MEMORY: usize = 4096;
const SAFEZONE_OOB: usize = 32;
const GAME_LOAD_POS: usize = 512;
const START_OFFSET: u32 = 512;
const REFRESH_RATE: f32 = 60.0;

const RES_SIZE_MULT: i32 = 8;
const SCREEN_SIZE_X: i32 = 64;
const SCREEN_SIZE_Y: i32 = 32;
const INST_SPEED: i32 = 30;

const MAX_DISPLAY_W: i32 = 128;
const MAX_DISPLAY_H: i32 = 64;

/// SUPER-CHIP with a display buffer that genuinely changes resolution on
/// `00FE`/`00FF`, rather than emulating low-res on a fixed high-res grid.
pub struct SchipModern {
    ctx: Chip8Context,
    mem: Vec<u8>,
    display: Map2D<u8>,
}

impl SchipModern {
    pub fn validate_program(data: &[u8]) -> bool {
        !data.is_empty() && data.len() + GAME_LOAD_POS <= TOTAL_MEMORY
    }

    pub fn construct(env: &CoreEnv) -> Result<Box<dyn SystemCore>, CoreError> {
        Ok(Box::new(SchipModern::new(env)?))
    }

    pub fn new(env: &CoreEnv) -> Result<Self, CoreError> {
        let mut ctx = Chip8Context::new(env)?;
        let mut mem = vec![0u8; TOTAL_MEMORY + SAFEZONE_OOB];
        mem[TOTAL_MEMORY..].fill(0xFF);

        let data = env.home.file_data();
        mem[GAME_LOAD_POS..GAME_LOAD_POS + data.len()].copy_from_slice(&data);
        font::copy_font_to_memory(&mut mem, font::FONT_DATA.len());

        ctx.quirk.shift_vx = true;
        ctx.quirk.idx_reg_no_inc = true;
        ctx.stop_on_self_jump = true;
        ctx.display.set(SCREEN_SIZE_X, SCREEN_SIZE_Y);
        ctx.sys
            .video
            .set_viewport_sizes(true, SCREEN_SIZE_X, SCREEN_SIZE_Y, RES_SIZE_MULT, 2);
        ctx.sys.set_system_framerate(REFRESH_RATE);

        ctx.pc = START_OFFSET;
        ctx.target_cpf = INST_SPEED;

        Ok(SchipModern {
            ctx,
            mem,
            display: Map2D::new(SCREEN_SIZE_X, SCREEN_SIZE_Y),
        })
    }

    fn read_memory_i(&self, pos: usize) -> u8 {
        self.mem[self.ctx.reg_i as usize + pos]
    }

    fn write_memory_i(&mut self, value: u8, pos: usize) {
        let index = self.ctx.reg_i as usize + pos;
        if index & TOTAL_MEMORY == 0 {
            self.mem[index] = value;
        }
    }

    fn skip_instruction(&mut self) {
        self.ctx.pc = self.ctx.pc.wrapping_add(2);
    }

    fn prep_display_area(&mut self, mode: Resolution) {
        let was_larger = self.ctx.traits.larger_display;
        self.ctx.traits.larger_display = mode != Resolution::Lo;
        self.ctx.traits.resolution_changed = was_larger != self.ctx.traits.larger_display;

        let (w, h) = if self.ctx.traits.larger_display {
            (SCREEN_SIZE_X * 2, SCREEN_SIZE_Y * 2)
        } else {
            (SCREEN_SIZE_X, SCREEN_SIZE_Y)
        };
        self.ctx.display.set(w, h);
        self.display.resize_clean(w, h);
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
        if self.ctx.quirk.wait_vblank {
            self.ctx.trigger_interrupt(Interrupt::Frame);
        }
        let width = self.ctx.display.w;
        let height = self.ctx.display.h;
        let px = (self.ctx.v[x] as i32) & (width - 1);
        let mut py = (self.ctx.v[y] as i32) & (height - 1);
        self.ctx.v[0xF] = 0;

        if n == 0 {
            for row in 0..16 {
                self.draw_byte(px, py, self.read_memory_i(row * 2));
                self.draw_byte(px + 8, py, self.read_memory_i(row * 2 + 1));
                if !self.ctx.quirk.wrap_sprite && py == height - 1 {
                    break;
                }
                py = (py + 1) & (height - 1);
            }
        } else {
            for row in 0..n {
                self.draw_byte(px, py, self.read_memory_i(row));
                if !self.ctx.quirk.wrap_sprite && py == height - 1 {
                    break;
                }
                py = (py + 1) & (height - 1);
            }
        }
    }
}

impl_chip8_system_core!(SchipModern);

impl Chip8Core for SchipModern {
    fn ctx(&self) -> &Chip8Context {
        &self.ctx
    }

    fn ctx_mut(&mut self) -> &mut Chip8Context {
        &mut self.ctx
    }

    fn max_display(&self) -> (i32, i32) {
        (MAX_DISPLAY_W, MAX_DISPLAY_H)
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
                    0x00C1..=0x00CF => {
                        if self.ctx.quirk.wait_scroll {
                            self.ctx.trigger_interrupt(Interrupt::Frame);
                        }
                        self.display.shift(0, (lo & 0xF) as i32);
                    }
                    0x00E0 => {
                        if self.ctx.quirk.wait_vblank {
                            self.ctx.trigger_interrupt(Interrupt::Frame);
                        }
                        self.display.initialize();
                    }
                    0x00EE => self.ctx.pop_call_stack(),
                    0x00FB => {
                        if self.ctx.quirk.wait_scroll {
                            self.ctx.trigger_interrupt(Interrupt::Frame);
                        }
                        self.display.shift(4, 0);
                    }
                    0x00FC => {
                        if self.ctx.quirk.wait_scroll {
                            self.ctx.trigger_interrupt(Interrupt::Frame);
                        }
                        self.display.shift(-4, 0);
                    }
                    0x00FD => self.ctx.trigger_interrupt(Interrupt::Sound),
                    0x00FE => {
                        if self.ctx.quirk.wait_vblank {
                            self.ctx.trigger_interrupt(Interrupt::Frame);
                        }
                        self.prep_display_area(Resolution::Lo);
                    }
                    0x00FF => {
                        if self.ctx.quirk.wait_vblank {
                            self.ctx.trigger_interrupt(Interrupt::Frame);
                        }
                        self.prep_display_area(Resolution::Hi);
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
                0x5 => {
                    if lo & 0xF != 0 {
                        self.ctx.instruction_error(hi, lo);
                    } else if self.ctx.v[x] == self.ctx.v[y] {
                        self.skip_instruction();
                    }
                }
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
                0xB => self.ctx.perform_prog_jump(nnn + self.ctx.v[0] as u32),
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
                        self.ctx.start_voice(value + (value == 1) as u32);
                    }
                    0x1E => {
                        self.ctx.reg_i = (self.ctx.reg_i + self.ctx.v[x] as u32) & 0xFFF;
                    }
                    0x29 => {
                        self.ctx.reg_i =
                            (self.ctx.v[x] as u32 & 0xF) * 5 + font::SMALL_FONT_OFFSET as u32;
                    }
                    0x30 => {
                        self.ctx.reg_i =
                            (self.ctx.v[x] as u32 & 0xF) * 10 + font::LARGE_FONT_OFFSET as u32;
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
                    0x75 => {
                        let n = x.min(7) + 1;
                        self.ctx.set_perma_regs(n);
                    }
                    0x85 => {
                        let n = x.min(7) + 1;
                        self.ctx.get_perma_regs(n);
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
        for index in [VOICE_ID0, VOICE_ID1, VOICE_ID2, VOICE_BUZZER] {
            make_pulse_wave(&mut samples, &mut self.ctx.voices[index]);
        }
        self.ctx.push_audio_frame(&samples);

        let border = BIT_COLORS[self.ctx.sound_timers_active() as usize];
        self.ctx.sys.video.set_border_color(border);
    }

    fn render_video(&mut self) {
        let trails = self.ctx.traits.using_pixel_trails;
        self.ctx.sys.video.write_map(&self.display, |pixel| {
            if trails {
                BIT_COLORS[(pixel != 0) as usize]
                    .with_alpha(PIXEL_OPACITY[(pixel & 0xF) as usize])
                    .packed()
            } else {
                BIT_COLORS[(pixel >> 3) as usize].with_alpha(0xFF).packed()
            }
        });
        let upscale = if self.ctx.traits.larger_display {
            RES_SIZE_MULT / 2
        } else {
            RES_SIZE_MULT
        };
        let changed = self.ctx.traits.resolution_changed;
        self.ctx.traits.resolution_changed = false;
        self.ctx.sys.video.set_viewport_sizes(
            changed,
            self.ctx.display.w,
            self.ctx.display.h,
            upscale,
            2,
        );
        decay_pixel_trails(self.display.as_mut_slice());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn display_width(core: &SchipModern) -> i32 {
        core.display.width()
    }

    pub(crate) fn display_pixel(core: &SchipModern, x: i32, y: i32) -> bool {
        core.display.get(x, y) & 0x8 != 0
    }
}
