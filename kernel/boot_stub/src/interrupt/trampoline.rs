//! kernel/boot_stub/src/interrupt/trampoline.rs
//! 32-bit interrupt entry stubs. Each pushes the general-purpose registers,
//! calls into a plain Rust handler, and `iret`s back to the interrupted
//! context. The syscall stub additionally rewrites the saved EAX slot with
//! the call's return value before popping, the usual trick for returning a
//! result through a register a `pushad`/`popad` pair otherwise restores
//! verbatim — but only when `syscall_isr` signals (via edx, the high dword
//! of its i64 return) that the syscall number was in range. An
//! out-of-range number leaves the caller's EAX exactly as it entered.

core::arch::global_asm!(
    r#"
.global syscall_entry
.global timer_irq_handler
.global keyboard_irq_handler

syscall_entry:
    pushad
    push edi
    push esi
    push edx
    push ecx
    push ebx
    push eax
    call syscall_isr
    add esp, 24
    test edx, edx
    jz 1f
    mov [esp + 28], eax
1:
    popad
    iretd

timer_irq_handler:
    pushad
    call timer_tick_isr
    mov al, 0x20
    out 0x20, al
    popad
    iretd

keyboard_irq_handler:
    pushad
    call keyboard_isr
    mov al, 0x20
    out 0x20, al
    popad
    iretd
"#
);
