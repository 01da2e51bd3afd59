//! kernel/boot_stub/build.rs
//! Project: GuardBSD Winter Saga version 1.0.0
//! Package: boot_stub
//! Copyright © 2025 Cartesian School.
//! License: BSD-3-Clause
//!
//! Entry/IRQ/syscall stubs live inline as `core::arch::asm!`/`global_asm!`
//! blocks in the arch-gated modules now, so there is nothing left for this
//! script to assemble.

fn main() {}
