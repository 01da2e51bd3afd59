// Global Descriptor Table and Task State Segment - 32-bit x86
// BSD 3-Clause License
//
// Six flat descriptors: null, kernel code/data at ring 0, user code/data at
// ring 3, and one TSS descriptor whose `esp0` field is what the CPU loads
// into ESP on a ring3->ring0 interrupt. `kernel_thread::hw::switch_context`
// keeps this in sync with whichever thread is about to run so that a
// syscall or IRQ taken from user mode lands on that thread's own kernel
// stack rather than a stale one.

#[repr(C, packed)]
#[derive(Copy, Clone)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn new(base: u32, limit: u32, access: u8, granularity: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (granularity & 0xF0) | (((limit >> 16) & 0x0F) as u8),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }

    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }
}

#[repr(C, packed)]
struct GdtPtr {
    limit: u16,
    base: u32,
}

/// IA-32 32-bit TSS. Only `esp0`/`ss0` are ever written after boot; the rest
/// stay zeroed since this build never does hardware task-switching (`ltr`
/// is used only to point the CPU at this structure for stack switches on
/// privilege-level change, the software `switch_context` routine does the
/// actual register save/restore).
#[repr(C, packed)]
struct Tss {
    prev_task: u16,
    reserved0: u16,
    esp0: u32,
    ss0: u16,
    reserved1: u16,
    esp1: u32,
    ss1: u16,
    reserved2: u16,
    esp2: u32,
    ss2: u16,
    reserved3: u16,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u16,
    reserved4: u16,
    cs: u16,
    reserved5: u16,
    ss: u16,
    reserved6: u16,
    ds: u16,
    reserved7: u16,
    fs: u16,
    reserved8: u16,
    gs: u16,
    reserved9: u16,
    ldt: u16,
    reserved10: u16,
    trap: u16,
    iomap_base: u16,
}

impl Tss {
    const fn zeroed() -> Self {
        Self {
            prev_task: 0,
            reserved0: 0,
            esp0: 0,
            ss0: 0,
            reserved1: 0,
            esp1: 0,
            ss1: 0,
            reserved2: 0,
            esp2: 0,
            ss2: 0,
            reserved3: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            reserved4: 0,
            cs: 0,
            reserved5: 0,
            ss: 0,
            reserved6: 0,
            ds: 0,
            reserved7: 0,
            fs: 0,
            reserved8: 0,
            gs: 0,
            reserved9: 0,
            ldt: 0,
            reserved10: 0,
            trap: 0,
            iomap_base: core::mem::size_of::<Tss>() as u16,
        }
    }
}

pub const KERNEL_CS: u16 = 0x08;
pub const KERNEL_DS: u16 = 0x10;
pub const USER_CS: u16 = 0x1B;
pub const USER_DS: u16 = 0x23;
const TSS_SEL: u16 = 0x28;

static mut TSS: Tss = Tss::zeroed();

static mut GDT: [GdtEntry; 6] = [GdtEntry::null(); 6];

/// Build the flat GDT, point the TSS descriptor at [`TSS`], load both with
/// `lgdt`/`ltr`, and reload the segment registers. Must run once, before
/// any thread is created, since [`esp0_ptr`] is handed to every context
/// switch from then on.
pub fn init() {
    unsafe {
        GDT[0] = GdtEntry::null();
        GDT[1] = GdtEntry::new(0, 0xFFFFF, 0x9A, 0xC0); // kernel code, ring 0
        GDT[2] = GdtEntry::new(0, 0xFFFFF, 0x92, 0xC0); // kernel data, ring 0
        GDT[3] = GdtEntry::new(0, 0xFFFFF, 0xFA, 0xC0); // user code, ring 3
        GDT[4] = GdtEntry::new(0, 0xFFFFF, 0xF2, 0xC0); // user data, ring 3

        let tss_base = core::ptr::addr_of!(TSS) as u32;
        let tss_limit = (core::mem::size_of::<Tss>() - 1) as u32;
        GDT[5] = GdtEntry::new(tss_base, tss_limit, 0x89, 0x00); // TSS, available 32-bit

        TSS.ss0 = KERNEL_DS;

        let gdtr = GdtPtr {
            limit: (core::mem::size_of::<[GdtEntry; 6]>() - 1) as u16,
            base: core::ptr::addr_of!(GDT) as u32,
        };

        core::arch::asm!("lgdt [{0}]", in(reg) &gdtr, options(readonly, nostack, preserves_flags));
        reload_segments();

        core::arch::asm!("ltr {0:x}", in(reg) TSS_SEL, options(nostack, preserves_flags));
    }
}

/// Reload every segment register off the freshly loaded GDT and far-jump
/// onto the new code selector, the 32-bit analogue of the teacher's 64-bit
/// `retfq` sequence.
unsafe fn reload_segments() {
    core::arch::asm!(
        "push {cs}",
        "lea {tmp}, [1f]",
        "push {tmp}",
        "retf",
        "1:",
        "mov ax, {ds:x}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "mov ss, ax",
        cs = const KERNEL_CS as u32,
        ds = in(reg) KERNEL_DS as u32,
        tmp = out(reg) _,
        out("ax") _,
        options(nostack),
    );
}

/// Raw pointer to the live TSS `esp0` field, handed to every
/// `switch_context` call so the next ring3->ring0 transition lands on the
/// about-to-run thread's own kernel stack.
pub fn esp0_ptr() -> *mut u32 {
    unsafe { core::ptr::addr_of_mut!(TSS.esp0) }
}
