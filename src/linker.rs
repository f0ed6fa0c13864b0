//! The six-phase linker (§4.4): resolve symbols across N object files,
//! merge sections by base address, assign final addresses, apply
//! relocations, emit segments, and pick an entry point.
//!
//! Grounded on the teacher's `assembler.rs` in spirit only (it emits
//! instruction bytes; there is no linker in the teacher crate to generalize
//! from), so this module follows the plain-pass, explicit-`Vec`-building
//! style the rest of this crate uses rather than borrowing any one teacher
//! function. Each phase is its own method, mirroring how `interpreter.rs`
//! gives every instruction its own small `exec_*` method instead of one
//! sprawling function.

use std::collections::HashMap;

use crate::error::LinkError;
use crate::execfile::{Executable, Segment, SegmentFlags};
use crate::objfile::{ObjectFile, RelocationType, SymbolBinding};

const DEFAULT_STACK_POINTER: u32 = 0xFFFF_FFFC;

/// A global symbol's resolved location, recorded during phase 1.
#[derive(Clone, Copy)]
struct GlobalSymbol {
    object_index: usize,
    section_index: u16,
    value: u32,
}

/// One merged group of same-base-address sections, built during phase 2.
struct MergedGroup {
    base_address: u32,
    flags: crate::objfile::SectionFlags,
    alignment: u16,
    data: Vec<u8>,
    /// (object_index, section_index) -> offset of that section within `data`.
    members: Vec<((usize, u16), u32)>,
}

/// Links `objects` (in command-line order) into an executable image.
pub fn link(objects: &[ObjectFile], program_name: &str) -> Result<Executable, LinkError> {
    let globals = build_global_table(objects)?;
    let groups = merge_sections(objects);
    let section_addresses = assign_addresses(&groups);
    let mut group_data: Vec<Vec<u8>> = groups.iter().map(|g| g.data.clone()).collect();
    apply_relocations(objects, &globals, &groups, &section_addresses, &mut group_data)?;
    let segments = build_segments(&groups, &group_data)?;
    let entry_point = find_entry_point(objects, &globals, &section_addresses, &segments)?;

    Ok(Executable {
        entry_point,
        stack_pointer: DEFAULT_STACK_POINTER,
        program_name: program_name.to_string(),
        segments,
    })
}

/// Phase 1: build the global symbol table and check every extern resolves.
fn build_global_table(objects: &[ObjectFile]) -> Result<HashMap<String, GlobalSymbol>, LinkError> {
    let mut globals = HashMap::new();
    for (object_index, object) in objects.iter().enumerate() {
        for symbol in &object.symbols {
            if symbol.binding == SymbolBinding::Global {
                let entry = GlobalSymbol {
                    object_index,
                    section_index: symbol.section_index.unwrap_or(0xFFFF),
                    value: symbol.value,
                };
                if globals.insert(symbol.name.clone(), entry).is_some() {
                    return Err(LinkError::DuplicateGlobalSymbol(symbol.name.clone()));
                }
            }
        }
    }
    for object in objects {
        for symbol in &object.symbols {
            if symbol.binding == SymbolBinding::Extern && !globals.contains_key(&symbol.name) {
                return Err(LinkError::UndefinedSymbol(symbol.name.clone()));
            }
        }
    }
    Ok(globals)
}

/// Phase 2: group sections by base address, in command-line order.
fn merge_sections(objects: &[ObjectFile]) -> Vec<MergedGroup> {
    let mut groups: Vec<MergedGroup> = Vec::new();
    for (object_index, object) in objects.iter().enumerate() {
        for (section_index, section) in object.sections.iter().enumerate() {
            let group = match groups.iter_mut().find(|g| g.base_address == section.base_address) {
                Some(g) => g,
                None => {
                    groups.push(MergedGroup {
                        base_address: section.base_address,
                        flags: crate::objfile::SectionFlags::default(),
                        alignment: 1,
                        data: Vec::new(),
                        members: Vec::new(),
                    });
                    groups.last_mut().unwrap()
                }
            };
            let offset = group.data.len() as u32;
            group.data.extend_from_slice(&section.data);
            if section.flags.zero_init {
                group.data.resize(group.data.len() + section.size as usize, 0);
            }
            group.flags = or_flags(group.flags, section.flags);
            group.alignment = group.alignment.max(section.alignment.max(1));
            group.members.push(((object_index, section_index as u16), offset));
        }
    }
    groups.sort_by_key(|g| g.base_address);
    groups
}

fn or_flags(a: crate::objfile::SectionFlags, b: crate::objfile::SectionFlags) -> crate::objfile::SectionFlags {
    crate::objfile::SectionFlags {
        executable: a.executable || b.executable,
        writable: a.writable || b.writable,
        initialized: a.initialized || b.initialized,
        zero_init: a.zero_init && b.zero_init,
    }
}

/// Phase 3: final address of every (object, section) pair, keyed the same
/// way relocation resolution looks symbols up.
fn assign_addresses(groups: &[MergedGroup]) -> HashMap<(usize, u16), u32> {
    let mut addresses = HashMap::new();
    for group in groups {
        for &((object_index, section_index), offset) in &group.members {
            addresses.insert((object_index, section_index), group.base_address + offset);
        }
    }
    addresses
}

/// Resolves `name` to its final address, first via the global table, then
/// as a local symbol within `home_object` (§4.4 phase 4).
fn resolve_symbol(
    name: &str,
    home_object: usize,
    objects: &[ObjectFile],
    globals: &HashMap<String, GlobalSymbol>,
    section_addresses: &HashMap<(usize, u16), u32>,
) -> Result<u32, LinkError> {
    if let Some(g) = globals.get(name) {
        return Ok(symbol_final_address(g.object_index, g.section_index, g.value, section_addresses));
    }
    let object = &objects[home_object];
    if let Some(symbol) = object.symbols.iter().find(|s| s.name == name) {
        let section_index = symbol.section_index.unwrap_or(0xFFFF);
        return Ok(symbol_final_address(home_object, section_index, symbol.value, section_addresses));
    }
    Err(LinkError::UndefinedSymbol(name.to_string()))
}

fn symbol_final_address(
    object_index: usize,
    section_index: u16,
    value: u32,
    section_addresses: &HashMap<(usize, u16), u32>,
) -> u32 {
    match section_addresses.get(&(object_index, section_index)) {
        Some(&base) => base.wrapping_add(value),
        None => value, // constants and absolute symbols keep their value.
    }
}

/// Phase 4: patch every relocation site directly into the merged group
/// buffers.
fn apply_relocations(
    objects: &[ObjectFile],
    globals: &HashMap<String, GlobalSymbol>,
    groups: &[MergedGroup],
    section_addresses: &HashMap<(usize, u16), u32>,
    group_data: &mut [Vec<u8>],
) -> Result<(), LinkError> {
    for (object_index, object) in objects.iter().enumerate() {
        for reloc in &object.relocations {
            let symbol = object
                .symbols
                .get(reloc.symbol_index as usize)
                .ok_or_else(|| LinkError::UndefinedSymbol(format!("#{}", reloc.symbol_index)))?;
            let s = resolve_symbol(&symbol.name, object_index, objects, globals, section_addresses)?;
            let a = reloc.addend;

            let (group_idx, local_offset) = locate(groups, object_index, reloc.section_index, reloc.offset);
            let p = groups[group_idx].base_address + local_offset;
            let value = match reloc.kind {
                RelocationType::None => continue,
                RelocationType::Abs32 => s.wrapping_add_signed(a),
                RelocationType::Abs16 => s.wrapping_add_signed(a) & 0xFFFF,
                RelocationType::Abs8 => s.wrapping_add_signed(a) & 0xFF,
                RelocationType::Rel32 => s.wrapping_sub(p).wrapping_add_signed(a),
                RelocationType::Rel16 => s.wrapping_sub(p).wrapping_add_signed(a) & 0xFFFF,
                RelocationType::Rel8 => s.wrapping_sub(p).wrapping_add_signed(a) & 0xFF,
                RelocationType::Hi16 => (s.wrapping_add_signed(a) >> 16) & 0xFFFF,
                RelocationType::Lo16 => s.wrapping_add_signed(a) & 0xFFFF,
            };
            patch(&mut group_data[group_idx], local_offset as usize, reloc.kind, value);
        }
    }
    Ok(())
}

fn locate(groups: &[MergedGroup], object_index: usize, section_index: u16, offset: u32) -> (usize, u32) {
    for (i, group) in groups.iter().enumerate() {
        if let Some(&(_, section_offset)) =
            group.members.iter().find(|&&((oi, si), _)| oi == object_index && si == section_index)
        {
            return (i, section_offset + offset);
        }
    }
    unreachable!("relocation refers to a section that was never merged")
}

fn patch(buf: &mut [u8], offset: usize, kind: RelocationType, value: u32) {
    match kind {
        RelocationType::None => {}
        RelocationType::Abs32 | RelocationType::Rel32 => {
            buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
        RelocationType::Abs16 | RelocationType::Rel16 | RelocationType::Hi16 | RelocationType::Lo16 => {
            buf[offset..offset + 2].copy_from_slice(&(value as u16).to_le_bytes());
        }
        RelocationType::Abs8 | RelocationType::Rel8 => {
            buf[offset] = value as u8;
        }
    }
}

/// Phase 5: one segment per merged group, sorted by load address, checked
/// for overlap.
fn build_segments(groups: &[MergedGroup], group_data: &[Vec<u8>]) -> Result<Vec<Segment>, LinkError> {
    let mut segments: Vec<Segment> = groups
        .iter()
        .zip(group_data)
        .map(|(group, data)| Segment {
            load_address: group.base_address,
            memory_size: data.len() as u32,
            flags: SegmentFlags {
                read: true,
                write: group.flags.writable,
                exec: group.flags.executable,
                zero_init: group.flags.zero_init,
            },
            alignment: group.alignment,
            data: if group.flags.zero_init { Vec::new() } else { data.clone() },
        })
        .collect();
    segments.sort_by_key(|s| s.load_address);

    for pair in segments.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.load_address + a.memory_size > b.load_address {
            return Err(LinkError::OverlappingSegments { a: a.load_address, b: b.load_address });
        }
    }
    Ok(segments)
}

/// Phase 6: `main`/`_start`/`start`, global first then any label, then the
/// lowest-address non-writable segment.
fn find_entry_point(
    objects: &[ObjectFile],
    globals: &HashMap<String, GlobalSymbol>,
    section_addresses: &HashMap<(usize, u16), u32>,
    segments: &[Segment],
) -> Result<u32, LinkError> {
    const CANDIDATES: [&str; 3] = ["main", "_start", "start"];

    for name in CANDIDATES {
        if let Some(g) = globals.get(name) {
            return Ok(symbol_final_address(g.object_index, g.section_index, g.value, section_addresses));
        }
    }
    for name in CANDIDATES {
        for (object_index, object) in objects.iter().enumerate() {
            if let Some(symbol) = object.symbols.iter().find(|s| {
                s.name == name && matches!(s.kind, crate::objfile::SymbolType::Label)
            }) {
                let section_index = symbol.section_index.unwrap_or(0xFFFF);
                return Ok(symbol_final_address(object_index, section_index, symbol.value, section_addresses));
            }
        }
    }
    segments
        .iter()
        .filter(|s| !s.flags.write)
        .map(|s| s.load_address)
        .min()
        .ok_or(LinkError::EntryPointNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objfile::{Relocation, Section, SectionFlags, Symbol, SymbolType};

    fn object_with_main() -> ObjectFile {
        ObjectFile {
            sections: vec![Section {
                base_address: 0x0000_2000,
                size: 4,
                flags: SectionFlags { executable: true, writable: false, initialized: true, zero_init: false },
                alignment: 1,
                data: vec![0x00, 0x00, 0x00, 0x00],
            }],
            symbols: vec![Symbol {
                name: "main".into(),
                value: 0,
                section_index: Some(0),
                kind: SymbolType::Label,
                binding: SymbolBinding::Global,
                size: 4,
            }],
            relocations: vec![],
            source_name: "a.s".into(),
        }
    }

    #[test]
    fn picks_main_as_entry_point() {
        let objects = vec![object_with_main()];
        let exe = link(&objects, "test").unwrap();
        assert_eq!(exe.entry_point, 0x0000_2000);
    }

    #[test]
    fn duplicate_global_symbol_is_an_error() {
        let mut objects = vec![object_with_main(), object_with_main()];
        objects[1].sections[0].base_address = 0x0000_3000;
        let err = link(&objects, "test").unwrap_err();
        assert!(matches!(err, LinkError::DuplicateGlobalSymbol(_)));
    }

    #[test]
    fn undefined_extern_symbol_is_an_error() {
        let mut object = object_with_main();
        object.symbols.push(Symbol {
            name: "missing".into(),
            value: 0,
            section_index: None,
            kind: SymbolType::Undefined,
            binding: SymbolBinding::Extern,
            size: 0,
        });
        let err = link(&[object], "test").unwrap_err();
        assert!(matches!(err, LinkError::UndefinedSymbol(_)));
    }

    #[test]
    fn abs32_relocation_writes_final_symbol_address() {
        let caller = ObjectFile {
            sections: vec![Section {
                base_address: 0x0000_2000,
                size: 8,
                flags: SectionFlags { executable: true, writable: false, initialized: true, zero_init: false },
                alignment: 1,
                data: vec![0; 8],
            }],
            symbols: vec![
                Symbol { name: "main".into(), value: 0, section_index: Some(0), kind: SymbolType::Label, binding: SymbolBinding::Global, size: 0 },
                Symbol { name: "target".into(), value: 0, section_index: None, kind: SymbolType::Undefined, binding: SymbolBinding::Extern, size: 0 },
            ],
            relocations: vec![Relocation { offset: 4, section_index: 0, symbol_index: 1, addend: 0, kind: RelocationType::Abs32 }],
            source_name: "a.s".into(),
        };
        let callee = ObjectFile {
            sections: vec![Section {
                base_address: 0x0000_3000,
                size: 4,
                flags: SectionFlags { executable: true, writable: false, initialized: true, zero_init: false },
                alignment: 1,
                data: vec![0; 4],
            }],
            symbols: vec![Symbol { name: "target".into(), value: 0, section_index: Some(0), kind: SymbolType::Label, binding: SymbolBinding::Global, size: 0 }],
            relocations: vec![],
            source_name: "b.s".into(),
        };
        let exe = link(&[caller, callee], "test").unwrap();
        let text = &exe.segments[0].data;
        assert_eq!(&text[4..8], &0x0000_3000u32.to_le_bytes());
    }
}
