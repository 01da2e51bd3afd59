//! kernel/boot_stub/src/runtime.rs
//! Project: GuardBSD Winter Saga version 1.0.0
//! Package: boot_stub
//! Copyright © 2025 Cartesian School. Developed by Siergej Sobolewski.
//! License: BSD-3-Clause
//!
//! Global kernel state and the concrete `kernel_collab` collaborator
//! implementations that back it on real hardware, as opposed to the
//! in-memory stand-ins `kernel_collab::host` provides for unit tests.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use kernel_collab::sync::SpinLock;
use kernel_collab::{AddressSpace, MemoryAllocator, OneShotTimer, PhysAddr, ReadyQueue};
use kernel_log::klog_warn;
use kernel_ramfs::{RamfsMountArgs, RAMFS_TYPE};
use kernel_syscall::{ProcessContext, SyscallContext};
use kernel_thread::{ThreadId, ThreadTable};
use kernel_vfs::Vfs;

const MAX_RUN_QUEUE: usize = 64;
const MAX_TIMERS: usize = 32;

/// FIFO run queue over live thread ids, plus a `need_resched` latch the
/// timer tick and syscall return paths poll to decide whether to actually
/// drive a context switch. `take_next` is not part of the `ReadyQueue`
/// trait (the thread core never dequeues on its own) — it's the concrete
/// dequeue operation the scheduler loop in `main`/`on_timer_tick` uses.
pub struct PitReadyQueue {
    queue: [Option<u32>; MAX_RUN_QUEUE],
    need_resched: bool,
}

impl PitReadyQueue {
    const fn new() -> Self {
        Self {
            queue: [None; MAX_RUN_QUEUE],
            need_resched: false,
        }
    }

    /// Pop the next runnable thread id other than `current`, if any, and
    /// clear the resched latch. Leaves `current` in the queue untouched if
    /// it happens to be the only entry.
    pub fn take_next(&mut self, current: u32) -> Option<u32> {
        self.need_resched = false;
        let slot = self.queue.iter_mut().find(|s| matches!(s, Some(id) if *id != current))?;
        slot.take()
    }

    pub fn needs_resched(&self) -> bool {
        self.need_resched
    }
}

impl ReadyQueue for PitReadyQueue {
    fn insert_thread(&mut self, id: u32) {
        if self.queue.iter().flatten().any(|&x| x == id) {
            return;
        }
        if let Some(slot) = self.queue.iter_mut().find(|s| s.is_none()) {
            *slot = Some(id);
        }
    }

    fn reschedule(&mut self) {
        self.need_resched = true;
        kernel_log::klog_debug!("sched", "reschedule requested");
    }

    fn post_switch(&mut self) {
        kernel_log::klog_debug!("sched", "post-switch hook fired");
    }
}

/// One-shot timers keyed off the PIT tick count driven by `drivers::timer`.
/// `tick()` is called from the timer IRQ and fires any timer whose deadline
/// has passed.
pub struct PitTimer {
    next_handle: u32,
    armed: [Option<(u32, u64, u32)>; MAX_TIMERS],
}

impl PitTimer {
    const fn new() -> Self {
        Self {
            next_handle: 0,
            armed: [None; MAX_TIMERS],
        }
    }

    /// Returns thread ids whose timer deadline is at or before `now_ticks`.
    pub fn expired(&mut self, now_ticks: u64) -> [Option<u32>; MAX_TIMERS] {
        let mut out = [None; MAX_TIMERS];
        for (slot, entry) in self.armed.iter_mut().zip(out.iter_mut()) {
            if let Some((_, deadline, tid)) = slot {
                if *deadline <= now_ticks {
                    *entry = Some(*tid);
                    *slot = None;
                }
            }
        }
        out
    }
}

impl OneShotTimer for PitTimer {
    fn arm(&mut self, delay_ticks: u64, thread_id: u32) -> u32 {
        self.next_handle += 1;
        let handle = self.next_handle;
        let deadline = crate::drivers::timer::get_ticks() + delay_ticks;
        if let Some(slot) = self.armed.iter_mut().find(|s| s.is_none()) {
            *slot = Some((handle, deadline, thread_id));
        }
        handle
    }

    fn cancel(&mut self, handle: u32) {
        for slot in self.armed.iter_mut() {
            if matches!(slot, Some((h, _, _)) if *h == handle) {
                *slot = None;
            }
        }
    }
}

/// There is no paging in this build (demand paging is explicitly out of
/// scope), so there is nothing to unmap. Kept as a real collaborator
/// implementation, logging only, so a later paging-capable build has a
/// single seam to replace.
pub struct FlatAddressSpace;

impl AddressSpace for FlatAddressSpace {
    fn unmap_user_stack(&mut self, base: usize, size: usize) {
        kernel_log::klog_debug!("mm", "unmap_user_stack base={:#x} size={:#x} (no-op, flat address space)", base, size);
    }
}

/// Backing store for [`BumpPageAllocator`]: a fixed region reserved in BSS
/// since this build has no page tables to carve free physical memory out
/// of. Large enough for a handful of kernel stacks; exhausting it is a
/// boot-time configuration error, not something recovered from at runtime.
const ARENA_PAGES: usize = 64;
const ARENA_BYTES: usize = ARENA_PAGES * 4096;

#[repr(align(4096))]
struct PageArena([u8; ARENA_BYTES]);

static mut ARENA: PageArena = PageArena([0; ARENA_BYTES]);

/// Bump-pointer physical page allocator. Never frees: this build has no
/// thread reaping path that would make reuse meaningful yet, so `free_pages`
/// is a deliberate no-op rather than a real free list.
pub struct BumpPageAllocator {
    next: PhysAddr,
    limit: PhysAddr,
}

impl BumpPageAllocator {
    const fn new() -> Self {
        Self { next: 0, limit: 0 }
    }

    /// Point the allocator at [`ARENA`]. Must run once, before the first
    /// `alloc_pages` call.
    fn init(&mut self) {
        let base = core::ptr::addr_of!(ARENA) as usize;
        self.next = base;
        self.limit = base + ARENA_BYTES;
    }
}

impl MemoryAllocator for BumpPageAllocator {
    fn alloc_pages(&mut self, count: usize) -> Option<PhysAddr> {
        let addr = self.next;
        let end = addr.checked_add(count * 4096)?;
        if end > self.limit {
            return None;
        }
        self.next = end;
        Some(addr)
    }

    fn free_pages(&mut self, _addr: PhysAddr, _count: usize) {}
}

pub static THREADS: SpinLock<ThreadTable> = SpinLock::new(ThreadTable::new());
pub static RUN_QUEUE: SpinLock<PitReadyQueue> = SpinLock::new(PitReadyQueue::new());
pub static TIMERS: SpinLock<PitTimer> = SpinLock::new(PitTimer::new());
pub static ADDRESS_SPACE: SpinLock<FlatAddressSpace> = SpinLock::new(FlatAddressSpace);
pub static VFS: SpinLock<Vfs> = SpinLock::new(Vfs::new());
pub static PROCESS: SpinLock<Option<ProcessContext>> = SpinLock::new(None);
pub static MEMORY: SpinLock<BumpPageAllocator> = SpinLock::new(BumpPageAllocator::new());

/// Point [`MEMORY`] at its backing arena. Called once from `guardbsd_main`
/// before the first kernel stack is allocated.
pub fn init_memory() {
    MEMORY.lock().init();
}

/// Allocate a kernel stack of [`kernel_thread::KSTACK_PAGES`] pages and
/// return its top (one past the last valid byte, matching how x86 stacks
/// grow down from a "top" address).
pub fn alloc_kstack() -> u32 {
    let base = MEMORY
        .lock()
        .alloc_pages(kernel_thread::KSTACK_PAGES)
        .expect("kernel stack arena exhausted");
    (base + kernel_thread::KSTACK_SIZE) as u32
}

/// Registered with [`kernel_thread::hw::install_hooks`] so the thread
/// wrapper can reach this crate's concrete ready queue on first schedule-in.
extern "C" fn post_switch_hook() {
    RUN_QUEUE.lock().post_switch();
}

/// Registered with [`kernel_thread::hw::install_hooks`] as the thread-exit
/// path: runs death observers and reschedules through the real tables.
extern "C" fn thread_exit_hook(id: ThreadId) {
    let mut threads = THREADS.lock();
    let mut rq = RUN_QUEUE.lock();
    let mut addr_space = ADDRESS_SPACE.lock();
    if let Err(e) = threads.exit(id, &mut *addr_space, &mut *rq) {
        klog_warn!("sched", "thread {} exit hook failed: {:?}", id, e);
    }
}

/// Wire the thread wrapper's two callbacks to this crate's concrete state.
/// Must run once, before the first thread is ever switched to.
pub fn install_scheduler_hooks() {
    kernel_thread::hw::install_hooks(post_switch_hook, thread_exit_hook);
}

/// Ticks between CMOS re-reads. The RTC is seconds-granular and slow to
/// read, so the cached value in [`SyscallContext::now_unix`] is only
/// refreshed this often rather than on every timer tick.
const RTC_REFRESH_TICKS: u64 = 100;

static NOW_UNIX: AtomicU64 = AtomicU64::new(0);
static CURRENT_TID: AtomicU32 = AtomicU32::new(0);

pub fn set_current_thread(id: ThreadId) {
    CURRENT_TID.store(id, Ordering::Relaxed);
}

pub fn now_unix() -> u64 {
    NOW_UNIX.load(Ordering::Relaxed)
}

/// Read the RTC once at boot and seed the cached clock. Later refreshes
/// happen on the timer tick, at [`RTC_REFRESH_TICKS`] granularity.
pub fn init_clock() {
    let mut cmos = kernel_time::hw::Cmos;
    NOW_UNIX.store(kernel_syscall::read_wall_clock(&mut cmos), Ordering::Relaxed);
}

/// Register the ramdisk backend and mount the boot module handed in by the
/// boot protocol at `/`. Called once from `guardbsd_main`.
pub fn mount_root(archive: &'static [u8]) {
    let mut vfs = VFS.lock();
    vfs.register_type(&RAMFS_TYPE).expect("ramfs type registration");
    let args = RamfsMountArgs {
        base: archive.as_ptr(),
        len: archive.len(),
    };
    vfs.mount("ramfs", "/", 0, core::ptr::addr_of!(args) as usize)
        .expect("root ramfs mount");
}

/// Advance timers by the ticks the PIT has counted since the last call and
/// wake anyone whose sleep has timed out. Called from the timer IRQ.
pub fn on_timer_tick() {
    let now = crate::drivers::timer::get_ticks();
    let expired = TIMERS.lock().expired(now);
    {
        let mut threads = THREADS.lock();
        let mut rq = RUN_QUEUE.lock();
        for tid in expired.into_iter().flatten() {
            threads.on_sleep_timeout(tid, &mut *rq);
        }
    }
    if now % RTC_REFRESH_TICKS == 0 {
        init_clock();
    }
}

/// The interrupt-service-routine side of a software interrupt 0x80:
/// marshal the five argument registers into a [`SyscallContext`] built
/// from the global subsystem state and run the dispatch table.
///
/// `nr`/argument registers arrive in cdecl push order from
/// [`crate::interrupt::trampoline`]'s `syscall_entry` stub. The return
/// value is packed as `(handled: u32) << 32 | (result as u32)`, returned
/// in edx:eax per the standard i64 cdecl convention, so the trampoline can
/// tell an out-of-range syscall (edx = 0) apart from a real result (edx =
/// 1) and leave the caller's EAX untouched in the former case.
#[no_mangle]
pub extern "C" fn syscall_isr(nr: u32, ebx: i32, ecx: i32, edx: i32, esi: i32, edi: i32) -> i64 {
    let mut threads = THREADS.lock();
    let mut rq = RUN_QUEUE.lock();
    let mut timer = TIMERS.lock();
    let mut addr_space = ADDRESS_SPACE.lock();
    let mut vfs = VFS.lock();
    let mut proc_guard = PROCESS.lock();
    let proc = proc_guard.get_or_insert_with(|| ProcessContext::new(1));

    let mut ctx = SyscallContext {
        vfs: &mut *vfs,
        threads: &mut *threads,
        rq: &mut *rq,
        timer: &mut *timer,
        addr_space: &mut *addr_space,
        proc,
        current_tid: CURRENT_TID.load(Ordering::Relaxed),
        now_unix: now_unix(),
    };

    match kernel_syscall::dispatch(&mut ctx, nr, [ebx, ecx, edx, esi, edi]) {
        Some(result) => (1i64 << 32) | (result as i32 as u32 as i64),
        None => {
            klog_warn!("syscall", "out-of-range syscall number {}", nr);
            0 // handled=0: trampoline must leave the caller's EAX untouched.
        }
    }
}

#[no_mangle]
pub extern "C" fn timer_tick_isr() {
    crate::drivers::timer::handle_interrupt();
    on_timer_tick();
}

#[no_mangle]
pub extern "C" fn keyboard_isr() {
    crate::drivers::keyboard::handle_interrupt();
}
