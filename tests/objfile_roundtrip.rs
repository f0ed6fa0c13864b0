//! Integration-level round-trips through the §6.1 object file format and
//! the §6.2 executable format it feeds into.

use g10::execfile::{Executable, Segment, SegmentFlags};
use g10::objfile::{ObjectFile, Relocation, RelocationType, Section, SectionFlags, Symbol, SymbolBinding, SymbolType};

fn two_section_object() -> ObjectFile {
    ObjectFile {
        sections: vec![
            Section {
                base_address: 0x0000_2000,
                size: 4,
                flags: SectionFlags { executable: true, writable: false, initialized: true, zero_init: false },
                alignment: 2,
                data: vec![0x31, 0x00, 0x01, 0x00],
            },
            Section {
                base_address: 0x8000_0000,
                size: 64,
                flags: SectionFlags { executable: false, writable: true, initialized: false, zero_init: true },
                alignment: 4,
                data: Vec::new(),
            },
        ],
        symbols: vec![Symbol {
            name: "main".into(),
            value: 0,
            section_index: Some(0),
            kind: SymbolType::Label,
            binding: SymbolBinding::Global,
            size: 4,
        }],
        relocations: vec![Relocation { offset: 0, section_index: 0, symbol_index: 0, addend: 0, kind: RelocationType::None }],
        source_name: "prog.s".into(),
    }
}

#[test]
fn object_file_bytes_survive_a_read_write_round_trip() {
    let object = two_section_object();
    let bytes = object.write();
    let parsed = ObjectFile::read(&bytes).unwrap();
    assert_eq!(parsed.write(), bytes);
    assert_eq!(parsed.sections[1].data.len(), 0);
    assert_eq!(parsed.sections[1].size, 64);
    assert_eq!(parsed.symbols[0].name, "main");
}

#[test]
fn executable_file_bytes_survive_a_read_write_round_trip() {
    let executable = Executable {
        entry_point: 0x0000_2000,
        stack_pointer: 0xFFFF_FFFC,
        program_name: "prog".into(),
        segments: vec![
            Segment {
                load_address: 0x0000_2000,
                memory_size: 4,
                flags: SegmentFlags { read: true, write: false, exec: true, zero_init: false },
                alignment: 2,
                data: vec![0x31, 0x00, 0x01, 0x00],
            },
            Segment {
                load_address: 0x8000_0000,
                memory_size: 64,
                flags: SegmentFlags { read: true, write: true, exec: false, zero_init: true },
                alignment: 4,
                data: Vec::new(),
            },
        ],
    };
    let bytes = executable.write().unwrap();
    let parsed = Executable::read(&bytes).unwrap();
    assert_eq!(parsed.entry_point, executable.entry_point);
    assert_eq!(parsed.segments[0].data, vec![0x31, 0x00, 0x01, 0x00]);
    assert!(parsed.segments[1].data.is_empty());
}
