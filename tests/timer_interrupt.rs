//! End-to-end timer interrupt scenario: a program arms TIMA to overflow in
//! a handful of T-cycles, enables the timer interrupt, and HALTs; the core
//! should wake on the single resulting interrupt, run the handler exactly
//! once, and resume right after the HALT.

use g10::bus::ReferenceBus;
use g10::cpu::Cpu;
use g10::Bus;

const TMA_ADDR: u32 = 0xFFFF_FF0B;
const TIMA_ADDR: u32 = 0xFFFF_FF0A;
const TAC_ADDR: u32 = 0xFFFF_FF0C;
const IE_BYTE0_ADDR: u32 = 0xFFFF_FF04;
const RESULT_ADDR: u32 = 0x8000_0004;

/// Handler lives at the timer vector's address, `vector_address(3)`.
const HANDLER_ADDR: u32 = 0x1180;

fn ld_imm8(dst: u8, value: u8, out: &mut Vec<u8>) {
    out.extend_from_slice(&[0x11, dst << 4, value]); // Load8/LdRImm
}

fn st_abs8(src: u8, addr: u32, out: &mut Vec<u8>) {
    out.push(0x15); // Load8/LdAbsR
    out.push(src);
    out.extend_from_slice(&addr.to_le_bytes());
}

fn build_rom() -> Vec<u8> {
    let mut rom = vec![0u8; 0x3000];

    let mut main = Vec::new();
    main.extend_from_slice(&[0x31, 0x20]); // LdRImm.l D2, <imm32>
    main.extend_from_slice(&0x8000_0800u32.to_le_bytes());
    main.extend_from_slice(&[0x38, 0x02]); // LdSpD src=D2

    ld_imm8(0, 0x00, &mut main);
    st_abs8(0, TMA_ADDR, &mut main); // TMA = 0
    ld_imm8(0, 0xFF, &mut main);
    st_abs8(0, TIMA_ADDR, &mut main); // TIMA = 0xFF, one increment from overflow
    ld_imm8(0, 0x05, &mut main);
    st_abs8(0, TAC_ADDR, &mut main); // enabled, clock select 01 -> bit 3
    ld_imm8(0, 0x09, &mut main);
    st_abs8(0, IE_BYTE0_ADDR, &mut main); // IE bit 0 (fixed) | bit 3 (timer)

    main.extend_from_slice(&[0x04, 0x00]); // Ei
    main.extend_from_slice(&[0x02, 0x00]); // Halt

    // Resumes here once the handler Reti's back.
    ld_imm8(1, 0x01, &mut main);
    st_abs8(1, RESULT_ADDR, &mut main);
    main.extend_from_slice(&[0x01, 0x00]); // Stop

    rom[0x2000..0x2000 + main.len()].copy_from_slice(&main);
    rom[HANDLER_ADDR as usize..HANDLER_ADDR as usize + 2].copy_from_slice(&[0x44, 0x00]); // Reti
    rom
}

#[test]
fn timer_overflow_delivers_exactly_one_interrupt_and_resumes_after_halt() {
    let rom = build_rom();
    let mut bus = ReferenceBus::new(rom, 0x1000);
    let mut cpu = Cpu::new();

    let mut handler_entries = 0;
    let mut guard = 0;
    while !cpu.is_stopped() {
        if cpu.regs().pc == HANDLER_ADDR {
            handler_entries += 1;
        }
        assert!(cpu.tick(&mut bus), "unexpected double fault, EC={:#04x}", cpu.ec());
        guard += 1;
        assert!(guard < 100_000, "program did not stop");
    }

    assert_eq!(cpu.ec(), 0);
    assert_eq!(handler_entries, 1, "the handler must run exactly once");
    assert_eq!(bus.ram()[4], 1, "execution must resume right after HALT");
    assert_eq!(bus.read(TIMA_ADDR), Some(0x00), "TIMA must reload from TMA on overflow");
}
