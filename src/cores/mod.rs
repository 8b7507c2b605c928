pub mod bytepusher;
pub mod chip8_context;
pub mod chip8_modern;
pub mod chip8x;
pub mod megachip;
pub mod schip_legacy;
pub mod schip_modern;
pub mod xochip;

#[cfg(test)]
mod tests;

use crate::registry::CoreDescriptor;

/// Every core this build ships, ready for
/// [CoreRegistry::register_core](crate::registry::CoreRegistry::register_core).
///
/// Registration order is unobservable, but extensions claimed by more than
/// one core resolve to the earlier entry by default.
pub fn builtin_core_descriptors() -> Vec<CoreDescriptor> {
    vec![
        CoreDescriptor {
            name: "CHIP8_MODERN",
            construct: chip8_modern::Chip8Modern::construct,
            validate: chip8_modern::Chip8Modern::validate_program,
            extensions: &[".ch8"],
        },
        CoreDescriptor {
            name: "SCHIP_MODERN",
            construct: schip_modern::SchipModern::construct,
            validate: schip_modern::SchipModern::validate_program,
            extensions: &[".sc8"],
        },
        CoreDescriptor {
            name: "SCHIP_LEGACY",
            construct: schip_legacy::SchipLegacy::construct,
            validate: schip_legacy::SchipLegacy::validate_program,
            extensions: &[".sc8"],
        },
        CoreDescriptor {
            name: "XOCHIP",
            construct: xochip::Xochip::construct,
            validate: xochip::Xochip::validate_program,
            extensions: &[".xo8"],
        },
        CoreDescriptor {
            name: "MEGACHIP",
            construct: megachip::Megachip::construct,
            validate: megachip::Megachip::validate_program,
            extensions: &[".mc8"],
        },
        CoreDescriptor {
            name: "CHIP8X",
            construct: chip8x::Chip8X::construct,
            validate: chip8x::Chip8X::validate_program,
            extensions: &[".c2x", ".c4x", ".c8x"],
        },
        CoreDescriptor {
            name: "BYTEPUSHER_STANDARD",
            construct: bytepusher::BytePusher::construct,
            validate: bytepusher::BytePusher::validate_program,
            extensions: &[".BytePusher"],
        },
    ]
}
