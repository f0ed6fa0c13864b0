//! Benchmark for the interpreter's per-instruction cost.
//!
//! Make sure the result of the benchmarked function is used, whether by
//! sending it to black_box, or by returning it from the closure.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use g10::bus::ReferenceBus;
use g10::cpu::Cpu;

pub fn criterion_benchmark(c: &mut Criterion) {
    // Jpb (unconditional, §4.2.3) with a -4 displacement: jumps back onto
    // its own first byte, so the loop body never advances past this single
    // instruction.
    let mut rom = vec![0u8; 0x2004];
    rom[0x2000..0x2004].copy_from_slice(&[0x41, 0x00, 0xFC, 0xFF]);

    c.bench_function("tick", |b| {
        b.iter_batched(
            || (Cpu::new(), ReferenceBus::new(rom.clone(), 1024)),
            |(mut cpu, mut bus)| {
                for _ in 0..64 {
                    black_box(cpu.tick(black_box(&mut bus)));
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
