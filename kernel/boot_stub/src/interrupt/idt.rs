// Interrupt Descriptor Table - 32-bit x86
// BSD 3-Clause License

#[repr(C, packed)]
#[derive(Copy, Clone)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    flags: u8,
    offset_high: u16,
}

#[repr(C, packed)]
struct IdtPtr {
    limit: u16,
    base: u32,
}

static mut IDT: [IdtEntry; 256] = [IdtEntry {
    offset_low: 0,
    selector: 0,
    zero: 0,
    flags: 0,
    offset_high: 0,
}; 256];

extern "C" {
    fn syscall_entry();
    fn keyboard_irq_handler();
    fn timer_irq_handler();
}

pub fn init_idt() {
    unsafe {
        // IRQ0 (timer) remapped to vector 0x20, IRQ1 (keyboard) to 0x21.
        set_idt_entry(0x20, timer_irq_handler as u32, 0x08, 0x8E);
        set_idt_entry(0x21, keyboard_irq_handler as u32, 0x08, 0x8E);

        // Syscall gate: DPL 3 (0xEE) so ring-3 code can `int 0x80`.
        set_idt_entry(0x80, syscall_entry as u32, 0x08, 0xEE);

        let idtr = IdtPtr {
            limit: (core::mem::size_of::<[IdtEntry; 256]>() - 1) as u16,
            base: core::ptr::addr_of!(IDT) as u32,
        };

        core::arch::asm!("lidt [{0}]", in(reg) &idtr, options(readonly, nostack, preserves_flags));
    }
}

unsafe fn set_idt_entry(index: usize, handler: u32, selector: u16, flags: u8) {
    IDT[index] = IdtEntry {
        offset_low: (handler & 0xFFFF) as u16,
        selector,
        zero: 0,
        flags,
        offset_high: ((handler >> 16) & 0xFFFF) as u16,
    };
}
