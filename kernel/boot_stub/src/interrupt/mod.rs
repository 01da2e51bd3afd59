//! kernel/boot_stub/src/interrupt/mod.rs
//! Project: GuardBSD Winter Saga version 1.0.0
//! Package: boot_stub
//! Copyright © 2025 Cartesian School. Developed by Siergej Sobolewski.
//! License: BSD-3-Clause
//!
//! Interrupt subsystem (IDT + entry stubs) for boot stub.

pub mod idt;
pub mod trampoline;
