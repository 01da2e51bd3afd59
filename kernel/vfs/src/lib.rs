//! kernel/vfs
//! Virtual file system core: node/mount/type abstraction with a pluggable
//! backend registry. Concrete backends (e.g. the ramdisk in `kernel_ramfs`)
//! implement `NodeOps`/`MountOps`/`FsType` against this crate.
//! BSD 3-Clause License
#![no_std]

use bitflags::bitflags;
use kernel_collab::KError;
use kernel_log::{klog_info, klog_warn};

pub const NAME_MAX: usize = 128;
pub const MAX_FS_TYPES: usize = 8;
pub const MAX_MOUNTS: usize = 8;

bitflags! {
    /// Mirrors the BSD-ish `O_*` flags the syscall ABI's `open` passes
    /// through unchanged.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ   = 0b0000_0001;
        const WRITE  = 0b0000_0010;
        const CREATE = 0b0000_0100;
        const APPEND = 0b0000_1000;
        const TRUNC  = 0b0001_0000;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
    Pipe,
    CharDevice,
    BlockDevice,
    Symlink,
}

/// A fixed-capacity name, stored inline so nodes need no allocation.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct NodeName {
    bytes: [u8; NAME_MAX],
    len: u8,
}

impl NodeName {
    pub const fn empty() -> Self {
        Self {
            bytes: [0; NAME_MAX],
            len: 0,
        }
    }

    pub fn from_str(s: &str) -> Self {
        let mut bytes = [0u8; NAME_MAX];
        let n = s.len().min(NAME_MAX);
        bytes[..n].copy_from_slice(&s.as_bytes()[..n]);
        Self {
            bytes,
            len: n as u8,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

pub type MountId = u32;

/// A node in the tree, as handed back by lookup/open. Mirrors the original
/// `struct vfs_node`: ops are looked up per node so a mount can mix node
/// kinds (e.g. a device special file inside an otherwise plain backend).
#[derive(Copy, Clone)]
pub struct Node {
    pub inode: u32,
    pub name: NodeName,
    pub node_type: NodeType,
    pub perm: u16,
    pub length: u32,
    pub uid: u32,
    pub gid: u32,
    pub seek: u32,
    pub refcount: u32,
    pub mount: MountId,
    pub ops: &'static dyn NodeOps,
}

impl Node {
    pub fn incref(&mut self) {
        self.refcount = self.refcount.saturating_add(1);
    }

    /// Returns the refcount after decrementing; callers close the node's
    /// backing resource once this reaches zero.
    pub fn decref(&mut self) -> u32 {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount
    }
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct Dirent {
    pub inode: u32,
    pub name: NodeName,
}

/// Per-node operation table. Every method has a `NotSupported` default so a
/// backend only overrides what it actually implements, and callers can ask
/// `supports_*` before calling rather than dispatching through a null
/// function pointer.
pub trait NodeOps: Sync {
    fn supports_read(&self) -> bool {
        false
    }
    fn read(&self, _node: &Node, _offset: u32, _buf: &mut [u8]) -> Result<u32, KError> {
        Err(KError::NotSupported)
    }

    fn supports_write(&self) -> bool {
        false
    }
    fn write(&self, _node: &mut Node, _offset: u32, _buf: &[u8]) -> Result<u32, KError> {
        Err(KError::NotSupported)
    }

    fn supports_create(&self) -> bool {
        false
    }
    fn create(&self, _parent: &Node, _name: &str, _node_type: NodeType) -> Result<Node, KError> {
        Err(KError::NotSupported)
    }

    fn supports_readdir(&self) -> bool {
        false
    }
    fn readdir(&self, _node: &Node, _index: u32) -> Result<Dirent, KError> {
        Err(KError::NotSupported)
    }

    fn supports_finddir(&self) -> bool {
        false
    }
    fn finddir(&self, _node: &Node, _name: &str) -> Result<u32, KError> {
        Err(KError::NotSupported)
    }

    fn close(&self, _node: &mut Node) -> Result<(), KError> {
        Ok(())
    }
}

pub struct Mount {
    pub id: MountId,
    pub root_inode: u32,
    pub ops: &'static dyn MountOps,
    /// Length of this mount's path prefix, so `Vfs::lookup` can strip it
    /// off before walking path components relative to the mount's root.
    prefix_len: u8,
}

pub trait MountOps: Sync {
    fn read_node(&self, mount: &Mount, inode: u32) -> Result<Node, KError>;

    fn umount(&mut self, _mount: &Mount) -> Result<(), KError> {
        Ok(())
    }

    fn flush(&mut self, _mount: &Mount) -> Result<(), KError> {
        Ok(())
    }
}

/// What a type's `mount` call hands back: the root inode to read through
/// `MountOps::read_node`, plus the ops table for the mount itself.
pub struct MountResult {
    pub root_inode: u32,
    pub ops: &'static dyn MountOps,
}

pub trait FsType: Sync {
    fn name(&self) -> &'static str;
    fn mount(&self, flags: u32, data: usize) -> Result<MountResult, KError>;
}

struct TypeEntry {
    name: NodeName,
    refcount: u32,
    ty: &'static dyn FsType,
}

struct MountEntry {
    path: NodeName,
    mount: Mount,
}

/// The VFS core: a type registry and a mount table. A real kernel keeps one
/// instance of this behind a global; tests construct their own.
pub struct Vfs {
    types: [Option<TypeEntry>; MAX_FS_TYPES],
    mounts: [Option<MountEntry>; MAX_MOUNTS],
    next_mount_id: MountId,
}

impl Vfs {
    pub const fn new() -> Self {
        Self {
            types: [const { None }; MAX_FS_TYPES],
            mounts: [const { None }; MAX_MOUNTS],
            next_mount_id: 1,
        }
    }

    pub fn register_type(&mut self, ty: &'static dyn FsType) -> Result<(), KError> {
        let name = ty.name();
        if self.find_type_slot(name).is_some() {
            return Err(KError::Duplicate);
        }
        let slot = self
            .types
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(KError::Capacity)?;
        *slot = Some(TypeEntry {
            name: NodeName::from_str(name),
            refcount: 0,
            ty,
        });
        klog_info!("vfs", "registered fs type {}", name);
        Ok(())
    }

    pub fn unregister_type(&mut self, name: &str) -> Result<(), KError> {
        let idx = self.find_type_slot(name).ok_or(KError::NotFound)?;
        if self.types[idx].as_ref().unwrap().refcount > 0 {
            return Err(KError::NotSupported);
        }
        self.types[idx] = None;
        Ok(())
    }

    fn find_type_slot(&self, name: &str) -> Option<usize> {
        self.types
            .iter()
            .position(|s| matches!(s, Some(e) if e.name.as_str() == name))
    }

    pub fn mount(&mut self, type_name: &str, path: &str, flags: u32, data: usize) -> Result<MountId, KError> {
        let idx = self.find_type_slot(type_name).ok_or(KError::NotFound)?;
        let result = self.types[idx].as_ref().unwrap().ty.mount(flags, data)?;

        let mount_slot = self
            .mounts
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(KError::Capacity)?;

        let id = self.next_mount_id;
        self.next_mount_id += 1;
        *mount_slot = Some(MountEntry {
            path: NodeName::from_str(path),
            mount: Mount {
                id,
                root_inode: result.root_inode,
                ops: result.ops,
                prefix_len: path.len().min(NAME_MAX) as u8,
            },
        });
        self.types[idx].as_mut().unwrap().refcount += 1;
        klog_info!("vfs", "mounted {} at {}", type_name, path);
        Ok(id)
    }

    pub fn umount(&mut self, path: &str) -> Result<(), KError> {
        let idx = self
            .mounts
            .iter()
            .position(|s| matches!(s, Some(e) if e.path.as_str() == path))
            .ok_or(KError::NotFound)?;
        self.mounts[idx] = None;
        Ok(())
    }

    /// Finds the mount whose recorded path is the longest prefix of
    /// `path`, matching the mount table's `find_mount` prefix scheme.
    fn find_mount(&self, path: &str) -> Option<&Mount> {
        let mut best: Option<(&Mount, usize)> = None;
        for entry in self.mounts.iter().flatten() {
            let mp = entry.path.as_str();
            if path.starts_with(mp) && (best.is_none() || mp.len() > best.unwrap().1) {
                best = Some((&entry.mount, mp.len()));
            }
        }
        best.map(|(m, _)| m)
    }

    /// Resolve `path` to a node within whichever mount owns it. The node is
    /// freshly read through `MountOps::read_node` on every call, matching
    /// the original backend's behavior of not caching live nodes.
    pub fn lookup(&self, path: &str) -> Result<Node, KError> {
        let mount = self.find_mount(path).ok_or(KError::NotFound)?;
        let relative = &path[mount.prefix_len as usize..];
        let mut current = mount.ops.read_node(mount, mount.root_inode)?;
        for component in relative.split('/').filter(|c| !c.is_empty()) {
            if current.node_type != NodeType::Directory {
                return Err(KError::Inval);
            }
            if !current.ops.supports_finddir() {
                klog_warn!("vfs", "finddir not supported on node {}", current.inode);
                return Err(KError::NotSupported);
            }
            let inode = current.ops.finddir(&current, component)?;
            current = mount.ops.read_node(mount, inode)?;
        }
        Ok(current)
    }

    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<Node, KError> {
        match self.lookup(path) {
            Ok(mut node) => {
                node.incref();
                Ok(node)
            }
            Err(KError::NotFound) if flags.contains(OpenFlags::CREATE) => self.create(path),
            Err(e) => Err(e),
        }
    }

    fn create(&self, path: &str) -> Result<Node, KError> {
        let (parent_path, name) = split_parent(path);
        let parent = self.lookup(parent_path)?;
        if parent.node_type != NodeType::Directory {
            return Err(KError::Inval);
        }
        if !parent.ops.supports_create() {
            return Err(KError::NotSupported);
        }
        parent.ops.create(&parent, name, NodeType::File)
    }

    pub fn close(&self, node: &mut Node) -> Result<(), KError> {
        if node.decref() == 0 {
            node.ops.close(node)?;
        }
        Ok(())
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => ("/", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemNodeOps;
    struct MemMountOps;

    static MEM_NODE_OPS: MemNodeOps = MemNodeOps;
    static MEM_MOUNT_OPS: MemMountOps = MemMountOps;

    impl NodeOps for MemNodeOps {
        fn supports_finddir(&self) -> bool {
            true
        }
        fn finddir(&self, node: &Node, name: &str) -> Result<u32, KError> {
            if node.inode == 1 && name == "hello" {
                Ok(2)
            } else {
                Err(KError::NotFound)
            }
        }

        fn supports_read(&self) -> bool {
            true
        }
        fn read(&self, _node: &Node, offset: u32, buf: &mut [u8]) -> Result<u32, KError> {
            let data = b"hi";
            if offset as usize >= data.len() {
                return Ok(0);
            }
            let n = (data.len() - offset as usize).min(buf.len());
            buf[..n].copy_from_slice(&data[offset as usize..offset as usize + n]);
            Ok(n as u32)
        }
    }

    impl MountOps for MemMountOps {
        fn read_node(&self, mount: &Mount, inode: u32) -> Result<Node, KError> {
            let node_type = if inode == 1 {
                NodeType::Directory
            } else {
                NodeType::File
            };
            Ok(Node {
                inode,
                name: NodeName::empty(),
                node_type,
                perm: 0o755,
                length: 2,
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
    impl FsType for MemFsType {
        fn name(&self) -> &'static str {
            "memfs"
        }
        fn mount(&self, _flags: u32, _data: usize) -> Result<MountResult, KError> {
            Ok(MountResult {
                root_inode: 1,
                ops: &MEM_MOUNT_OPS,
            })
        }
    }
    static MEM_FS_TYPE: MemFsType = MemFsType;

    fn mounted_vfs() -> Vfs {
        let mut vfs = Vfs::new();
        vfs.register_type(&MEM_FS_TYPE).unwrap();
        vfs.mount("memfs", "/", 0, 0).unwrap();
        vfs
    }

    #[test]
    fn register_duplicate_type_fails() {
        let mut vfs = Vfs::new();
        vfs.register_type(&MEM_FS_TYPE).unwrap();
        assert_eq!(vfs.register_type(&MEM_FS_TYPE), Err(KError::Duplicate));
    }

    #[test]
    fn lookup_root_then_child() {
        let vfs = mounted_vfs();
        let root = vfs.lookup("/").unwrap();
        assert_eq!(root.node_type, NodeType::Directory);
        let child = vfs.lookup("/hello").unwrap();
        assert_eq!(child.inode, 2);
    }

    #[test]
    fn lookup_missing_child_not_found() {
        let vfs = mounted_vfs();
        assert_eq!(vfs.lookup("/nope").unwrap_err(), KError::NotFound);
    }

    #[test]
    fn open_increments_refcount() {
        let vfs = mounted_vfs();
        let node = vfs.open("/hello", OpenFlags::READ).unwrap();
        assert_eq!(node.refcount, 2);
    }

    #[test]
    fn read_through_node_ops() {
        let vfs = mounted_vfs();
        let node = vfs.lookup("/hello").unwrap();
        let mut buf = [0u8; 8];
        let n = node.ops.read(&node, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n as usize], b"hi");
    }

    #[test]
    fn create_under_file_parent_is_inval() {
        let vfs = mounted_vfs();
        assert_eq!(
            vfs.open("/hello/newfile", OpenFlags::CREATE).unwrap_err(),
            KError::Inval
        );
    }

    #[test]
    fn unsupported_write_fails_cleanly() {
        let vfs = mounted_vfs();
        let mut node = vfs.lookup("/hello").unwrap();
        assert!(!node.ops.supports_write());
        assert_eq!(
            node.ops.write(&mut node, 0, b"x").unwrap_err(),
            KError::NotSupported
        );
    }
}
