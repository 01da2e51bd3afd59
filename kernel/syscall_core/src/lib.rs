//! kernel/syscall_core
//! Software-interrupt syscall dispatch: the table, argument marshalling, and
//! the thin per-process state (file descriptors, identity, hostname) the
//! syscall bodies read and mutate.
//! BSD 3-Clause License
#![no_std]

use kernel_collab::{AddressSpace, KError, OneShotTimer, ReadyQueue};
use kernel_log::{klog_info, klog_warn};
use kernel_thread::{ThreadId, ThreadSnapshot, ThreadTable};
use kernel_vfs::{Dirent, Node, NodeType, OpenFlags, Vfs};

pub const NR_SYSCALLS: usize = 27;
pub const MAX_FD_PER_PROCESS: usize = 64;
pub const HOSTNAME_MAX: usize = 256;
pub const DEFAULT_HOSTNAME: &str = "Matrix";

pub const SYS_PUTSTR: u32 = 0;
pub const SYS_OPEN: u32 = 1;
pub const SYS_READ: u32 = 2;
pub const SYS_WRITE: u32 = 3;
pub const SYS_CLOSE: u32 = 4;
pub const SYS_EXIT: u32 = 5;
pub const SYS_GETTIMEOFDAY: u32 = 6;
pub const SYS_SETTIMEOFDAY: u32 = 7;
pub const SYS_READDIR: u32 = 8;
pub const SYS_LSEEK: u32 = 9;
pub const SYS_LSTAT: u32 = 10;
pub const SYS_CHDIR: u32 = 11;
pub const SYS_MKDIR: u32 = 12;
pub const SYS_GETHOSTNAME: u32 = 13;
pub const SYS_SETHOSTNAME: u32 = 14;
pub const SYS_GETUID: u32 = 15;
pub const SYS_SETUID: u32 = 16;
pub const SYS_GETGID: u32 = 17;
pub const SYS_SETGID: u32 = 18;
pub const SYS_GETPID: u32 = 19;
pub const SYS_SLEEP: u32 = 20;
pub const SYS_CREATE_PROCESS: u32 = 21;
pub const SYS_WAITPID: u32 = 22;
pub const SYS_UNIT_TEST: u32 = 23;
pub const SYS_CLEAR: u32 = 24;
pub const SYS_SHUTDOWN: u32 = 25;
pub const SYS_SYSLOG: u32 = 26;

/// `st_mode` type bits, OR'd with the node's permission mask.
pub const S_IFREG: u32 = 0o100_000;
pub const S_IFDIR: u32 = 0o040_000;
pub const S_IFIFO: u32 = 0o010_000;
pub const S_IFCHR: u32 = 0o020_000;
pub const S_IFBLK: u32 = 0o060_000;
pub const S_IFLNK: u32 = 0o120_000;

/// `lstat` output, fixed layout so it can be copied byte-for-byte into a
/// user buffer.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct Stat {
    pub device: u32,
    pub inode: u32,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub size: u32,
}

#[derive(Copy, Clone)]
struct HostnameBuf {
    buf: [u8; HOSTNAME_MAX],
    len: u16,
}

impl HostnameBuf {
    fn from_str(s: &str) -> Self {
        let mut buf = [0u8; HOSTNAME_MAX];
        let n = s.len().min(HOSTNAME_MAX);
        buf[..n].copy_from_slice(&s.as_bytes()[..n]);
        Self { buf, len: n as u16 }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len as usize]).unwrap_or("")
    }
}

impl Default for HostnameBuf {
    fn default() -> Self {
        Self::from_str(DEFAULT_HOSTNAME)
    }
}

/// Per-process state a syscall body needs that is not itself one of the
/// four subsystems: open file descriptors, identity, and host name. The
/// process table proper (parent/child links, scheduling) is an external
/// collaborator this core does not implement.
pub struct ProcessContext {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
    hostname: HostnameBuf,
    fds: [Option<Node>; MAX_FD_PER_PROCESS],
}

impl ProcessContext {
    #[must_use]
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            uid: 0,
            gid: 0,
            hostname: HostnameBuf::default(),
            fds: [None; MAX_FD_PER_PROCESS],
        }
    }

    fn alloc_fd(&mut self, node: Node) -> Option<usize> {
        let slot = self.fds.iter().position(Option::is_none)?;
        self.fds[slot] = Some(node);
        Some(slot)
    }

    fn fd_mut(&mut self, fd: usize) -> Option<&mut Node> {
        self.fds.get_mut(fd)?.as_mut()
    }

    fn take_fd(&mut self, fd: usize) -> Option<Node> {
        self.fds.get_mut(fd)?.take()
    }
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Everything a syscall body may touch: the four subsystems plus the
/// calling thread/process identity. Built fresh by the dispatcher on each
/// interrupt; nothing here outlives one syscall.
pub struct SyscallContext<'a> {
    pub vfs: &'a mut Vfs,
    pub threads: &'a mut ThreadTable,
    pub rq: &'a mut dyn ReadyQueue,
    pub timer: &'a mut dyn OneShotTimer,
    pub addr_space: &'a mut dyn AddressSpace,
    pub proc: &'a mut ProcessContext,
    pub current_tid: ThreadId,
    /// Wall-clock seconds since the epoch, refreshed by the caller from
    /// [`kernel_time`] on a timer tick rather than re-read from CMOS on
    /// every syscall (CMOS I/O is slow enough that serializing syscalls
    /// behind it would be its own bottleneck).
    pub now_unix: u64,
}

/// Read the wall clock through any [`kernel_time::CmosPort`] implementation
/// and return the Unix-seconds value callers stash into
/// [`SyscallContext::now_unix`].
#[must_use]
pub fn read_wall_clock<P: kernel_time::CmosPort>(port: &mut P) -> u64 {
    kernel_time::now_unix(port)
}

pub type SyscallFn = fn(&mut SyscallContext, [i32; 5]) -> isize;

/// One dispatch table entry. `arity` is metadata only — every handler
/// still receives all five argument slots, but it documents how many it
/// actually reads, for logging and for a future strict-argument build.
pub struct SyscallDesc {
    pub name: &'static str,
    pub arity: u8,
    pub handler: SyscallFn,
}

/// Look up and invoke the syscall numbered `nr`. Returns `None` for an
/// out-of-range number: the caller leaves the accumulator register
/// untouched in that case, per the platform ABI's unspecified-on-overflow
/// contract, and logs a warning here.
pub fn dispatch(ctx: &mut SyscallContext, nr: u32, args: [i32; 5]) -> Option<isize> {
    let desc = SYSCALLS.get(nr as usize)?;
    Some((desc.handler)(ctx, args))
}

/// Read a user-space byte slice. This core assumes a flat, unpaged address
/// space (consistent with demand paging being out of scope): pointers from
/// registers are dereferenced directly, the way the original syscall bodies
/// do, rather than going through a formal copy-from-user path.
///
/// # Safety
/// `ptr`/`len` must describe memory that is actually mapped and large
/// enough; this is trusted, not validated.
unsafe fn user_slice<'a>(ptr: i32, len: i32) -> &'a [u8] {
    unsafe { core::slice::from_raw_parts(ptr as *const u8, len.max(0) as usize) }
}

/// # Safety
/// Same obligations as [`user_slice`].
unsafe fn user_slice_mut<'a>(ptr: i32, len: i32) -> &'a mut [u8] {
    unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len.max(0) as usize) }
}

/// # Safety
/// Same obligations as [`user_slice`]; non-UTF-8 input decodes to `""`
/// rather than faulting, since this core has no errno detail to report.
unsafe fn user_str<'a>(ptr: i32, len: i32) -> &'a str {
    let bytes = unsafe { user_slice(ptr, len) };
    core::str::from_utf8(bytes).unwrap_or("")
}

fn stat_type_bit(node_type: NodeType) -> u32 {
    match node_type {
        NodeType::File => S_IFREG,
        NodeType::Directory => S_IFDIR,
        NodeType::Pipe => S_IFIFO,
        NodeType::CharDevice => S_IFCHR,
        NodeType::BlockDevice => S_IFBLK,
        NodeType::Symlink => S_IFLNK,
    }
}

fn sys_putstr(_ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    let s = unsafe { user_str(args[0], args[1]) };
    klog_info!("user", "{}", s);
    s.len() as isize
}

fn sys_open(ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    let path = unsafe { user_str(args[0], args[1]) };
    let flags = OpenFlags::from_bits_truncate(args[2] as u32);
    match ctx.vfs.open(path, flags) {
        Ok(node) => match ctx.proc.alloc_fd(node) {
            Some(fd) => fd as isize,
            None => {
                let mut n = node;
                let _ = ctx.vfs.close(&mut n);
                KError::Capacity.to_errno()
            }
        },
        Err(e) => e.to_errno(),
    }
}

fn sys_read(ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    let fd = args[0] as usize;
    let buf = unsafe { user_slice_mut(args[1], args[2]) };
    let Some(node) = ctx.proc.fd_mut(fd) else {
        return KError::Inval.to_errno();
    };
    let ops = node.ops;
    match ops.read(node, node.seek, buf) {
        Ok(n) => {
            node.seek += n;
            n as isize
        }
        Err(e) => e.to_errno(),
    }
}

fn sys_write(ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    let fd = args[0] as usize;
    let buf = unsafe { user_slice(args[1], args[2]) };
    let Some(node) = ctx.proc.fd_mut(fd) else {
        return KError::Inval.to_errno();
    };
    let ops = node.ops;
    match ops.write(node, node.seek, buf) {
        Ok(n) => {
            node.seek += n;
            n as isize
        }
        Err(e) => e.to_errno(),
    }
}

fn sys_close(ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    let fd = args[0] as usize;
    match ctx.proc.take_fd(fd) {
        Some(mut node) => match ctx.vfs.close(&mut node) {
            Ok(()) => 0,
            Err(e) => e.to_errno(),
        },
        None => KError::Inval.to_errno(),
    }
}

fn sys_exit(ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    match ctx.threads.exit(ctx.current_tid, ctx.addr_space, ctx.rq) {
        Ok(()) => args[0] as isize,
        Err(e) => e.to_errno(),
    }
}

fn sys_gettimeofday(ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    let out = unsafe { user_slice_mut(args[0], 8) };
    if out.len() < 8 {
        return KError::Inval.to_errno();
    }
    out.copy_from_slice(&ctx.now_unix.to_ne_bytes());
    0
}

fn sys_settimeofday(_ctx: &mut SyscallContext, _args: [i32; 5]) -> isize {
    // The RTC core is read-only; there is no write-back path to CMOS here.
    KError::NotSupported.to_errno()
}

fn sys_readdir(ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    let fd = args[0] as usize;
    let index = args[1] as u32;
    let out_ptr = args[2];
    let Some(node) = ctx.proc.fd_mut(fd) else {
        return KError::Inval.to_errno();
    };
    let ops = node.ops;
    match ops.readdir(node, index) {
        Ok(dirent) => {
            let size = core::mem::size_of::<Dirent>();
            let out = unsafe { user_slice_mut(out_ptr, size as i32) };
            if out.len() < size {
                return KError::Inval.to_errno();
            }
            let bytes = unsafe { core::slice::from_raw_parts(core::ptr::addr_of!(dirent).cast::<u8>(), size) };
            out.copy_from_slice(bytes);
            0
        }
        Err(e) => e.to_errno(),
    }
}

fn sys_lseek(ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    let fd = args[0] as usize;
    let offset = args[1];
    let whence = args[2];
    let Some(node) = ctx.proc.fd_mut(fd) else {
        return KError::Inval.to_errno();
    };
    let new_off = match whence {
        0 => offset,
        1 => node.seek as i32 + offset,
        2 => node.length as i32 + offset,
        _ => return KError::Inval.to_errno(),
    };
    if new_off < 0 {
        return KError::Inval.to_errno();
    }
    node.seek = new_off as u32;
    new_off as isize
}

fn sys_lstat(ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    let fd = args[0] as usize;
    let out_ptr = args[1];
    let Some(node) = ctx.proc.fd_mut(fd) else {
        return KError::Inval.to_errno();
    };
    let stat = Stat {
        device: node.mount,
        inode: node.inode,
        mode: u32::from(node.perm) | stat_type_bit(node.node_type),
        nlink: 1,
        uid: node.uid,
        gid: node.gid,
        rdev: 0,
        size: node.length,
    };
    let size = core::mem::size_of::<Stat>();
    let out = unsafe { user_slice_mut(out_ptr, size as i32) };
    if out.len() < size {
        return KError::Inval.to_errno();
    }
    let bytes = unsafe { core::slice::from_raw_parts(core::ptr::addr_of!(stat).cast::<u8>(), size) };
    out.copy_from_slice(bytes);
    0
}

fn sys_chdir(_ctx: &mut SyscallContext, _args: [i32; 5]) -> isize {
    KError::NotSupported.to_errno()
}

fn sys_mkdir(_ctx: &mut SyscallContext, _args: [i32; 5]) -> isize {
    KError::NotSupported.to_errno()
}

fn sys_gethostname(ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    let out = unsafe { user_slice_mut(args[0], args[1]) };
    let s = ctx.proc.hostname.as_str();
    let n = s.len().min(out.len());
    out[..n].copy_from_slice(&s.as_bytes()[..n]);
    n as isize
}

fn sys_sethostname(ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    let s = unsafe { user_str(args[0], args[1]) };
    ctx.proc.hostname = HostnameBuf::from_str(s);
    0
}

fn sys_getuid(ctx: &mut SyscallContext, _args: [i32; 5]) -> isize {
    ctx.proc.uid as isize
}

fn sys_setuid(ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    ctx.proc.uid = args[0] as u32;
    0
}

fn sys_getgid(ctx: &mut SyscallContext, _args: [i32; 5]) -> isize {
    ctx.proc.gid as isize
}

fn sys_setgid(ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    ctx.proc.gid = args[0] as u32;
    0
}

fn sys_getpid(ctx: &mut SyscallContext, _args: [i32; 5]) -> isize {
    ctx.proc.pid as isize
}

fn sys_sleep(ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    let ticks = args[0] as u64;
    match ctx.threads.sleep(ctx.current_tid, None, ticks, true, ctx.rq, ctx.timer) {
        Ok(status) => status as isize,
        Err(e) => e.to_errno(),
    }
}

fn sys_create_process(_ctx: &mut SyscallContext, _args: [i32; 5]) -> isize {
    // No process table in this core; process creation is an external
    // collaborator's job.
    KError::NotSupported.to_errno()
}

fn sys_waitpid(_ctx: &mut SyscallContext, _args: [i32; 5]) -> isize {
    KError::NotSupported.to_errno()
}

fn sys_unit_test(ctx: &mut SyscallContext, _args: [i32; 5]) -> isize {
    let mut buf = [ThreadSnapshot::default(); 32];
    ctx.threads.list(&mut buf) as isize
}

fn sys_clear(_ctx: &mut SyscallContext, _args: [i32; 5]) -> isize {
    klog_info!("console", "clear");
    0
}

fn sys_shutdown(_ctx: &mut SyscallContext, _args: [i32; 5]) -> isize {
    klog_warn!("console", "shutdown requested");
    0
}

fn sys_syslog(_ctx: &mut SyscallContext, args: [i32; 5]) -> isize {
    let s = unsafe { user_str(args[1], args[2]) };
    match args[0] {
        0 => klog_info!("syslog", "{}", s),
        _ => klog_warn!("syslog", "{}", s),
    }
    0
}

/// Stable ABI: append-only, never reordered. Index is the syscall number.
pub static SYSCALLS: [SyscallDesc; NR_SYSCALLS] = [
    SyscallDesc { name: "putstr", arity: 2, handler: sys_putstr },
    SyscallDesc { name: "open", arity: 3, handler: sys_open },
    SyscallDesc { name: "read", arity: 3, handler: sys_read },
    SyscallDesc { name: "write", arity: 3, handler: sys_write },
    SyscallDesc { name: "close", arity: 1, handler: sys_close },
    SyscallDesc { name: "exit", arity: 1, handler: sys_exit },
    SyscallDesc { name: "gettimeofday", arity: 1, handler: sys_gettimeofday },
    SyscallDesc { name: "settimeofday", arity: 1, handler: sys_settimeofday },
    SyscallDesc { name: "readdir", arity: 3, handler: sys_readdir },
    SyscallDesc { name: "lseek", arity: 3, handler: sys_lseek },
    SyscallDesc { name: "lstat", arity: 2, handler: sys_lstat },
    SyscallDesc { name: "chdir", arity: 2, handler: sys_chdir },
    SyscallDesc { name: "mkdir", arity: 2, handler: sys_mkdir },
    SyscallDesc { name: "gethostname", arity: 2, handler: sys_gethostname },
    SyscallDesc { name: "sethostname", arity: 2, handler: sys_sethostname },
    SyscallDesc { name: "getuid", arity: 0, handler: sys_getuid },
    SyscallDesc { name: "setuid", arity: 1, handler: sys_setuid },
    SyscallDesc { name: "getgid", arity: 0, handler: sys_getgid },
    SyscallDesc { name: "setgid", arity: 1, handler: sys_setgid },
    SyscallDesc { name: "getpid", arity: 0, handler: sys_getpid },
    SyscallDesc { name: "sleep", arity: 1, handler: sys_sleep },
    SyscallDesc { name: "create_process", arity: 0, handler: sys_create_process },
    SyscallDesc { name: "waitpid", arity: 1, handler: sys_waitpid },
    SyscallDesc { name: "unit_test", arity: 0, handler: sys_unit_test },
    SyscallDesc { name: "clear", arity: 0, handler: sys_clear },
    SyscallDesc { name: "shutdown", arity: 0, handler: sys_shutdown },
    SyscallDesc { name: "syslog", arity: 3, handler: sys_syslog },
];

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_collab::host::{HostAddressSpace, HostReadyQueue, HostTimer};
    use kernel_vfs::{Dirent as VfsDirent, MountOps, MountResult, NodeOps, NodeName};

    struct MemNodeOps;
    struct MemMountOps;
    static MEM_NODE_OPS: MemNodeOps = MemNodeOps;
    static MEM_MOUNT_OPS: MemMountOps = MemMountOps;

    impl NodeOps for MemNodeOps {
        fn supports_read(&self) -> bool {
            true
        }
        fn read(&self, _node: &Node, offset: u32, buf: &mut [u8]) -> Result<u32, KError> {
            let data = b"hello world";
            if offset as usize >= data.len() {
                return Ok(0);
            }
            let n = (data.len() - offset as usize).min(buf.len());
            buf[..n].copy_from_slice(&data[offset as usize..offset as usize + n]);
            Ok(n as u32)
        }

        fn supports_write(&self) -> bool {
            true
        }
        fn write(&self, _node: &mut Node, _offset: u32, buf: &[u8]) -> Result<u32, KError> {
            Ok(buf.len() as u32)
        }

        fn supports_finddir(&self) -> bool {
            true
        }
        fn finddir(&self, node: &Node, name: &str) -> Result<u32, KError> {
            if node.inode == 1 && name == "greeting" {
                Ok(2)
            } else {
                Err(KError::NotFound)
            }
        }

        fn supports_readdir(&self) -> bool {
            true
        }
        fn readdir(&self, _node: &Node, index: u32) -> Result<VfsDirent, KError> {
            if index == 0 {
                Ok(VfsDirent { inode: 2, name: NodeName::from_str("greeting") })
            } else {
                Err(KError::NotFound)
            }
        }
    }

    impl MountOps for MemMountOps {
        fn read_node(&self, mount: &kernel_vfs::Mount, inode: u32) -> Result<Node, KError> {
            let node_type = if inode == 1 { NodeType::Directory } else { NodeType::File };
            Ok(Node {
                inode,
                name: NodeName::empty(),
                node_type,
                perm: 0o644,
                length: 11,
                uid: 0,
                gid: 0,
                seek: 0,
                refcount: 1,
                mount: mount.id,
                ops: &MEM_NODE_OPS,
            })
        }
    }

    struct MemFsType;
    impl kernel_vfs::FsType for MemFsType {
        fn name(&self) -> &'static str {
            "memfs"
        }
        fn mount(&self, _flags: u32, _data: usize) -> Result<MountResult, KError> {
            Ok(MountResult { root_inode: 1, ops: &MEM_MOUNT_OPS })
        }
    }
    static MEM_FS_TYPE: MemFsType = MemFsType;

    fn mounted_vfs() -> Vfs {
        let mut vfs = Vfs::new();
        vfs.register_type(&MEM_FS_TYPE).unwrap();
        vfs.mount("memfs", "/", 0, 0).unwrap();
        vfs
    }

    struct Harness {
        vfs: Vfs,
        threads: ThreadTable,
        rq: HostReadyQueue,
        timer: HostTimer,
        addr_space: HostAddressSpace,
        proc: ProcessContext,
        tid: ThreadId,
    }

    impl Harness {
        fn new() -> Self {
            let mut threads = ThreadTable::new();
            let mut rq = HostReadyQueue::default();
            let tid = threads.create("t", 1, 7, false, 0, |_| {}, 0).unwrap();
            threads.run(tid, &mut rq).unwrap();
            threads.set_running(tid, 0).unwrap();
            Self {
                vfs: mounted_vfs(),
                threads,
                rq,
                timer: HostTimer::default(),
                addr_space: HostAddressSpace::default(),
                proc: ProcessContext::new(7),
                tid,
            }
        }

        fn ctx(&mut self) -> SyscallContext<'_> {
            SyscallContext {
                vfs: &mut self.vfs,
                threads: &mut self.threads,
                rq: &mut self.rq,
                timer: &mut self.timer,
                addr_space: &mut self.addr_space,
                proc: &mut self.proc,
                current_tid: self.tid,
                now_unix: 1_785_196_800,
            }
        }
    }

    #[test]
    fn out_of_range_syscall_returns_none() {
        let mut h = Harness::new();
        let mut ctx = h.ctx();
        assert!(dispatch(&mut ctx, 999, [0; 5]).is_none());
    }

    #[test]
    fn getpid_returns_process_id() {
        let mut h = Harness::new();
        let mut ctx = h.ctx();
        assert_eq!(dispatch(&mut ctx, SYS_GETPID, [0; 5]), Some(7));
    }

    #[test]
    fn open_read_close_round_trip() {
        let mut h = Harness::new();
        let path = b"/greeting\0";
        let mut ctx = h.ctx();
        let fd = dispatch(&mut ctx, SYS_OPEN, [path.as_ptr() as i32, 9, OpenFlags::READ.bits() as i32, 0, 0]).unwrap();
        assert!(fd >= 0);

        let mut buf = [0u8; 16];
        let n = dispatch(&mut ctx, SYS_READ, [fd as i32, buf.as_mut_ptr() as i32, buf.len() as i32, 0, 0]).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf[..11], b"hello world");

        assert_eq!(dispatch(&mut ctx, SYS_CLOSE, [fd as i32, 0, 0, 0, 0]), Some(0));
    }

    #[test]
    fn read_on_closed_fd_is_rejected() {
        let mut h = Harness::new();
        let mut ctx = h.ctx();
        let mut buf = [0u8; 4];
        let n = dispatch(&mut ctx, SYS_READ, [3, buf.as_mut_ptr() as i32, 4, 0, 0]).unwrap();
        assert_eq!(n, KError::Inval.to_errno());
    }

    #[test]
    fn lseek_whence_variants() {
        let mut h = Harness::new();
        let path = b"/greeting\0";
        let mut ctx = h.ctx();
        let fd = dispatch(&mut ctx, SYS_OPEN, [path.as_ptr() as i32, 9, OpenFlags::READ.bits() as i32, 0, 0]).unwrap();

        assert_eq!(dispatch(&mut ctx, SYS_LSEEK, [fd as i32, 4, 0, 0, 0]), Some(4));
        assert_eq!(dispatch(&mut ctx, SYS_LSEEK, [fd as i32, 2, 1, 0, 0]), Some(6));
        assert_eq!(dispatch(&mut ctx, SYS_LSEEK, [fd as i32, 0, 2, 0, 0]), Some(11));
        assert_eq!(dispatch(&mut ctx, SYS_LSEEK, [fd as i32, -100, 0, 0, 0]), Some(KError::Inval.to_errno()));
    }

    #[test]
    fn hostname_set_then_get_round_trips() {
        let mut h = Harness::new();
        let mut ctx = h.ctx();
        let name = b"matrix-box";
        dispatch(&mut ctx, SYS_SETHOSTNAME, [name.as_ptr() as i32, name.len() as i32, 0, 0, 0]);

        let mut buf = [0u8; 32];
        let n = dispatch(&mut ctx, SYS_GETHOSTNAME, [buf.as_mut_ptr() as i32, buf.len() as i32, 0, 0, 0]).unwrap();
        assert_eq!(&buf[..n as usize], name);
    }

    #[test]
    fn setuid_then_getuid_round_trips() {
        let mut h = Harness::new();
        let mut ctx = h.ctx();
        dispatch(&mut ctx, SYS_SETUID, [42, 0, 0, 0, 0]);
        assert_eq!(dispatch(&mut ctx, SYS_GETUID, [0; 5]), Some(42));
    }

    #[test]
    fn stub_syscalls_return_not_supported() {
        let mut h = Harness::new();
        let mut ctx = h.ctx();
        for nr in [SYS_CHDIR, SYS_MKDIR, SYS_CREATE_PROCESS, SYS_WAITPID, SYS_SETTIMEOFDAY] {
            assert_eq!(dispatch(&mut ctx, nr, [0; 5]), Some(KError::NotSupported.to_errno()));
        }
    }

    #[test]
    fn gettimeofday_writes_cached_clock() {
        let mut h = Harness::new();
        let mut ctx = h.ctx();
        let mut out = [0u8; 8];
        dispatch(&mut ctx, SYS_GETTIMEOFDAY, [out.as_mut_ptr() as i32, 0, 0, 0, 0]);
        assert_eq!(u64::from_ne_bytes(out), 1_785_196_800);
    }

    #[test]
    fn sleep_zero_ticks_is_rejected() {
        let mut h = Harness::new();
        let mut ctx = h.ctx();
        assert_eq!(dispatch(&mut ctx, SYS_SLEEP, [0, 0, 0, 0, 0]), Some(KError::Inval.to_errno()));
    }

    #[test]
    fn syscall_table_is_append_ordered() {
        assert_eq!(SYSCALLS[SYS_GETPID as usize].name, "getpid");
        assert_eq!(SYSCALLS[SYS_SYSLOG as usize].name, "syslog");
        assert_eq!(SYSCALLS.len(), NR_SYSCALLS);
    }

    #[test]
    fn unit_test_reports_live_thread_count() {
        let mut h = Harness::new();
        let mut ctx = h.ctx();
        assert_eq!(dispatch(&mut ctx, SYS_UNIT_TEST, [0; 5]), Some(1));
    }
}
