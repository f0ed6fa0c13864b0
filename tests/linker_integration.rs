//! Links two hand-built object files (a caller resolving an extern symbol
//! defined in a second object) and runs the result to completion, the way
//! the §8 "linker cross-file" scenario exercises the whole pipeline:
//! object files in, a running program out.

use g10::bus::ReferenceBus;
use g10::cpu::Cpu;
use g10::linker;
use g10::objfile::{ObjectFile, Relocation, RelocationType, Section, SectionFlags, Symbol, SymbolBinding, SymbolType};

/// `main`: sets SP into backed RAM, loads D0=5/D1=3, calls the extern
/// `add_numbers`, stores D0 at `$80000000`, then STOPs.
fn main_object() -> ObjectFile {
    let mut code = Vec::new();
    code.extend_from_slice(&[0x31, 0x20]); // LdRImm D2, <imm32>  (Load32/LdRImm)
    code.extend_from_slice(&0x8000_0800u32.to_le_bytes());
    code.extend_from_slice(&[0x38, 0x02]); // LdSpD src=D2
    code.extend_from_slice(&[0x11, 0x00, 0x05]); // LdRImm D0, 5   (Load8/LdRImm)
    code.extend_from_slice(&[0x11, 0x10, 0x03]); // LdRImm D1, 3
    let call_reloc_offset = code.len() as u32 + 2;
    code.extend_from_slice(&[0x42, 0x00]); // Call add_numbers (unconditional)
    code.extend_from_slice(&[0; 4]); // patched by the Abs32 relocation
    code.extend_from_slice(&[0x15, 0x00]); // LdAbsR src=D0 -> <addr32>  (Load8/LdAbsR)
    code.extend_from_slice(&0x8000_0000u32.to_le_bytes());
    code.extend_from_slice(&[0x01, 0x00]); // Stop

    ObjectFile {
        sections: vec![Section {
            base_address: 0x0000_2000,
            size: code.len() as u32,
            flags: SectionFlags { executable: true, writable: false, initialized: true, zero_init: false },
            alignment: 2,
            data: code,
        }],
        symbols: vec![
            Symbol { name: "main".into(), value: 0, section_index: Some(0), kind: SymbolType::Label, binding: SymbolBinding::Global, size: 0 },
            Symbol { name: "add_numbers".into(), value: 0, section_index: None, kind: SymbolType::Undefined, binding: SymbolBinding::Extern, size: 0 },
        ],
        relocations: vec![Relocation {
            offset: call_reloc_offset,
            section_index: 0,
            symbol_index: 1,
            addend: 0,
            kind: RelocationType::Abs32,
        }],
        source_name: "main.s".into(),
    }
}

/// `add_numbers`: `D0 += D1; Ret`.
fn mathlib_object() -> ObjectFile {
    ObjectFile {
        sections: vec![Section {
            base_address: 0x0000_3000,
            size: 4,
            flags: SectionFlags { executable: true, writable: false, initialized: true, zero_init: false },
            alignment: 2,
            data: vec![0x50, 0x01, 0x43, 0x00], // Add src=D1; Ret
        }],
        symbols: vec![Symbol { name: "add_numbers".into(), value: 0, section_index: Some(0), kind: SymbolType::Label, binding: SymbolBinding::Global, size: 0 }],
        relocations: vec![],
        source_name: "mathlib.s".into(),
    }
}

#[test]
fn linked_program_runs_and_leaves_the_sum_in_ram() {
    let executable = linker::link(&[main_object(), mathlib_object()], "sum").unwrap();
    assert_eq!(executable.entry_point, 0x0000_2000);

    let bytes = executable.write().unwrap();
    let reloaded = g10::execfile::Executable::read(&bytes).unwrap();

    let mut bus = ReferenceBus::new(vec![0; 0x4000], 0x1000);
    reloaded.load(&mut bus);

    let mut cpu = Cpu::new();
    let mut guard = 0;
    while !cpu.is_stopped() {
        assert!(cpu.tick(&mut bus), "unexpected double fault, EC={:#04x}", cpu.ec());
        guard += 1;
        assert!(guard < 10_000, "program did not stop");
    }

    assert_eq!(cpu.ec(), 0);
    assert_eq!(bus.ram()[0], 8);
}
