use std::collections::HashSet;
use std::sync::Mutex;

/// A host keyboard scancode. The engine only compares these for equality, so
/// any stable numbering works; the built-in constants use ASCII uppercase.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Scancode(pub u16);

impl Scancode {
    pub const UNKNOWN: Scancode = Scancode(0);

    pub const fn from_char(ch: char) -> Scancode {
        Scancode(ch as u16)
    }
}

/// A thread-safe source of raw host key states.
///
/// The worker thread calls [KeyStateSource::update_states] once per frame
/// before sampling individual keys.
pub trait KeyStateSource: Send + Sync {
    /// Polls the host for fresh key states. A push-driven implementation may
    /// treat this as a no-op.
    fn update_states(&self);

    fn is_pressed(&self, key: Scancode) -> bool;
}

/// A push-driven [KeyStateSource]: the host thread records presses and
/// releases, the worker reads them.
#[derive(Default)]
pub struct SharedKeyboard {
    pressed: Mutex<HashSet<Scancode>>,
}

impl SharedKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pressed(&self, key: Scancode, down: bool) {
        let mut pressed = self.pressed.lock().unwrap();
        if down {
            pressed.insert(key);
        } else {
            pressed.remove(&key);
        }
    }

    pub fn release_all(&self) {
        self.pressed.lock().unwrap().clear();
    }
}

impl KeyStateSource for SharedKeyboard {
    fn update_states(&self) {}

    fn is_pressed(&self, key: Scancode) -> bool {
        key != Scancode::UNKNOWN && self.pressed.lock().unwrap().contains(&key)
    }
}

/// One logical key of the hex keypad, mapped to up to two host scancodes.
#[derive(Copy, Clone, Debug)]
pub struct KeyBinding {
    pub index: u32,
    pub key: Scancode,
    pub alt: Scancode,
}

/// The CHIP-8 hex keypad state machine.
///
/// Tracks current/previous frame bitmasks plus a lock mask (keys excluded
/// from held checks after being consumed) and a loop mask (the key currently
/// repeating through an `Fx0A` wait). The repeat schedule grants 20 ticks of
/// grace on a fresh press and 5 on subsequent repeats.
pub struct HexKeyboard {
    binds: Vec<KeyBinding>,
    tick_last: u32,
    tick_span: u32,
    keys_curr: u32,
    keys_prev: u32,
    keys_lock: u32,
    keys_loop: u32,
}

impl Default for HexKeyboard {
    fn default() -> Self {
        let mut keyboard = HexKeyboard {
            binds: Vec::new(),
            tick_last: 0,
            tick_span: 0,
            keys_curr: 0,
            keys_prev: 0,
            keys_lock: 0,
            keys_loop: 0,
        };
        keyboard.load_preset_binds();
        keyboard
    }
}

impl HexKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the standard QWERTY layout for the 4x4 hex pad.
    pub fn load_preset_binds(&mut self) {
        const NONE: Scancode = Scancode::UNKNOWN;
        let layout: [(u32, char); 16] = [
            (0x1, '1'), (0x2, '2'), (0x3, '3'), (0xC, '4'),
            (0x4, 'Q'), (0x5, 'W'), (0x6, 'E'), (0xD, 'R'),
            (0x7, 'A'), (0x8, 'S'), (0x9, 'D'), (0xE, 'F'),
            (0xA, 'Z'), (0x0, 'X'), (0xB, 'C'), (0xF, 'V'),
        ];
        let binds = layout
            .iter()
            .map(|&(index, ch)| KeyBinding {
                index,
                key: Scancode::from_char(ch),
                alt: NONE,
            })
            .collect::<Vec<_>>();
        self.load_custom_binds(binds);
    }

    /// Replaces the binding table and resets all edge/lock state.
    pub fn load_custom_binds(&mut self, binds: Vec<KeyBinding>) {
        self.binds = binds;
        self.keys_prev = 0;
        self.keys_curr = 0;
        self.keys_lock = 0;
        self.keys_loop = 0;
    }

    /// Samples the host key source into the current-frame bitmask and
    /// releases locks on any key whose state flipped.
    pub fn update_key_states(&mut self, source: &dyn KeyStateSource) {
        if self.binds.is_empty() {
            return;
        }
        self.keys_prev = self.keys_curr;
        self.keys_curr = 0;

        for bind in &self.binds {
            if source.is_pressed(bind.key) || source.is_pressed(bind.alt) {
                self.keys_curr |= 1 << bind.index;
            }
        }

        self.keys_lock &= !(self.keys_prev ^ self.keys_curr);
        self.keys_loop &= self.keys_lock;
    }

    /// Drives an `Fx0A` key wait. Returns true once a qualifying press is
    /// observed this frame, writing the pressed key's index to `out_key`.
    pub fn key_pressed(&mut self, out_key: &mut u8, tick: u32) -> bool {
        if self.binds.is_empty() {
            return false;
        }
        if tick >= self.tick_last.wrapping_add(self.tick_span) {
            self.keys_prev &= !self.keys_loop;
        }

        let press_keys = self.keys_curr & !self.keys_prev;
        if press_keys != 0 {
            let press_diff = press_keys & !self.keys_loop;
            let valid_keys = if press_diff != 0 {
                press_diff
            } else {
                self.keys_loop
            };

            self.keys_lock |= valid_keys;
            self.tick_last = tick;
            self.tick_span = if valid_keys != self.keys_loop { 20 } else { 5 };
            self.keys_loop = valid_keys & valid_keys.wrapping_neg();
            *out_key = (self.keys_loop.trailing_zeros() & 0xFF) as u8;
        }
        press_keys != 0
    }

    /// The raw bitmask of logical keys held this frame.
    pub fn keys_current(&self) -> u32 {
        self.keys_curr
    }

    /// True while player 1's key `index` (low 16 logical keys) is held and
    /// not locked.
    pub fn key_held_p1(&self, index: u32) -> bool {
        self.keys_curr & !self.keys_lock & (0x01 << (index & 0xF)) != 0
    }

    /// True while player 2's key `index` (upper bank) is held and not locked.
    pub fn key_held_p2(&self, index: u32) -> bool {
        self.keys_curr & !self.keys_lock & (0x10 << (index & 0xF)) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(keyboard: &mut HexKeyboard, host: &SharedKeyboard, ch: char) {
        host.set_pressed(Scancode::from_char(ch), true);
        keyboard.update_key_states(host);
    }

    #[test]
    fn test_held_p1_follows_host_state() {
        let host = SharedKeyboard::new();
        let mut keyboard = HexKeyboard::new();
        press(&mut keyboard, &host, 'W'); // logical key 5
        assert!(keyboard.key_held_p1(0x5));
        assert!(!keyboard.key_held_p1(0x6));

        host.set_pressed(Scancode::from_char('W'), false);
        keyboard.update_key_states(&host);
        assert!(!keyboard.key_held_p1(0x5));
    }

    #[test]
    fn test_key_pressed_reports_edge_once() {
        let host = SharedKeyboard::new();
        let mut keyboard = HexKeyboard::new();
        let mut key = 0xFFu8;

        assert!(!keyboard.key_pressed(&mut key, 1));

        press(&mut keyboard, &host, '1'); // logical key 1
        assert!(keyboard.key_pressed(&mut key, 2));
        assert_eq!(key, 0x1);

        // still held next frame: no new edge until the repeat span expires
        keyboard.update_key_states(&host);
        assert!(!keyboard.key_pressed(&mut key, 3));
    }

    #[test]
    fn test_key_repeats_after_span() {
        let host = SharedKeyboard::new();
        let mut keyboard = HexKeyboard::new();
        let mut key = 0u8;

        press(&mut keyboard, &host, 'X'); // logical key 0
        assert!(keyboard.key_pressed(&mut key, 10));
        assert_eq!(key, 0x0);

        // hold through the 20-tick grace window, then the key re-fires
        for tick in 11..30 {
            keyboard.update_key_states(&host);
            assert!(!keyboard.key_pressed(&mut key, tick));
        }
        keyboard.update_key_states(&host);
        assert!(keyboard.key_pressed(&mut key, 30));
    }

    #[test]
    fn test_new_press_wins_over_repeat() {
        let host = SharedKeyboard::new();
        let mut keyboard = HexKeyboard::new();
        let mut key = 0u8;

        press(&mut keyboard, &host, '1');
        assert!(keyboard.key_pressed(&mut key, 0));
        press(&mut keyboard, &host, '2');
        assert!(keyboard.key_pressed(&mut key, 1));
        assert_eq!(key, 0x2);
    }
}
