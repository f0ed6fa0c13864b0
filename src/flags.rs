//! The G10 FLAGS register: `Z N H C V` packed into the top five bits of a
//! byte (bit 7 is the MSB, matching §3's "bit 7 is MSB" convention).
//!
//! Modeled the way the teacher crate models its status register
//! (`status_register.rs`): a plain struct of named booleans with `From<u8>`/
//! `Into<u8>` conversions, rather than raw bit-twiddling scattered through
//! the interpreter.

const Z_BIT: u8 = 7;
const N_BIT: u8 = 6;
const H_BIT: u8 = 5;
const C_BIT: u8 = 4;
const V_BIT: u8 = 3;

/// The 8-bit FLAGS register. Bits 0-2 are unused and always read 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    pub z: bool,
    pub n: bool,
    pub h: bool,
    pub c: bool,
    pub v: bool,
}

impl Flags {
    /// The power-on value: `Z` set, all other flags clear (§3 reset values).
    pub const RESET: Self = Self { z: true, n: false, h: false, c: false, v: false };

    pub fn set_z(&mut self, v: bool) { self.z = v; }
    pub fn set_n(&mut self, v: bool) { self.n = v; }
    pub fn set_h(&mut self, v: bool) { self.h = v; }
    pub fn set_c(&mut self, v: bool) { self.c = v; }
    pub fn set_v(&mut self, v: bool) { self.v = v; }
}

impl From<u8> for Flags {
    fn from(byte: u8) -> Self {
        Self {
            z: byte & (1 << Z_BIT) != 0,
            n: byte & (1 << N_BIT) != 0,
            h: byte & (1 << H_BIT) != 0,
            c: byte & (1 << C_BIT) != 0,
            v: byte & (1 << V_BIT) != 0,
        }
    }
}

impl From<Flags> for u8 {
    fn from(f: Flags) -> Self {
        (f.z as u8) << Z_BIT
            | (f.n as u8) << N_BIT
            | (f.h as u8) << H_BIT
            | (f.c as u8) << C_BIT
            | (f.v as u8) << V_BIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_value_matches_spec() {
        assert_eq!(u8::from(Flags::RESET), 0b1000_0000);
    }

    #[test]
    fn round_trips_through_u8() {
        for byte in 0..=0xF8u8 {
            let flags = Flags::from(byte);
            assert_eq!(u8::from(flags), byte & 0xF8);
        }
    }

    #[test]
    fn unused_bits_read_zero() {
        let flags = Flags::from(0xFF);
        assert_eq!(u8::from(flags) & 0x07, 0);
    }
}
