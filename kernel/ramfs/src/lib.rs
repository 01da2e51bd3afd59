//! kernel/ramfs
//! Ramdisk (`ramfs`) backend: a read-only archive of files plus in-memory
//! directory creation slack, registered against `kernel_vfs`'s type
//! registry.
//! BSD 3-Clause License
#![no_std]

use kernel_collab::sync::SpinLock;
use kernel_collab::KError;
use kernel_log::klog_info;
use kernel_vfs::{Dirent, FsType, Mount, MountOps, MountResult, Node, NodeName, NodeOps, NodeType};

pub const RAMFS_NAME_MAX: usize = kernel_vfs::NAME_MAX;
/// Extra node-table capacity reserved at mount time for in-memory
/// directory creation, on top of the archive's own file count.
pub const SLACK: usize = 12;
/// Upper bound on `nr_files + SLACK` this backend can hold; archives that
/// would exceed it fail to mount with `Capacity`.
pub const MAX_RAMFS_NODES: usize = 256;

const HEADER_LEN: usize = 4;
const FILE_RECORD_LEN: usize = RAMFS_NAME_MAX + 4 + 4;
const ROOT_INODE: u32 = 0;

/// What `FsType::mount`'s opaque `data: usize` points to for this backend:
/// the archive's base address and length, the same (base, length) pair a
/// boot protocol hands a kernel for any memory-mapped module.
#[repr(C)]
pub struct RamfsMountArgs {
    pub base: *const u8,
    pub len: usize,
}

#[derive(Copy, Clone)]
struct RamNode {
    name: NodeName,
    node_type: NodeType,
    length: u32,
    mask: u16,
    /// Offset into the archive slice; meaningless for directories.
    data_offset: u32,
}

struct RamFsState {
    archive: Option<&'static [u8]>,
    nodes: [Option<RamNode>; MAX_RAMFS_NODES],
    nr_nodes: usize,
    nr_total: usize,
}

impl RamFsState {
    const fn new() -> Self {
        Self {
            archive: None,
            nodes: [None; MAX_RAMFS_NODES],
            nr_nodes: 0,
            nr_total: 0,
        }
    }

    fn mount(&mut self, archive: &'static [u8]) -> Result<(), KError> {
        if archive.len() < HEADER_LEN {
            return Err(KError::Inval);
        }
        let nr_files = u32::from_le_bytes(archive[0..4].try_into().unwrap()) as usize;
        let records_end = HEADER_LEN + nr_files * FILE_RECORD_LEN;
        if records_end > archive.len() {
            return Err(KError::Inval);
        }
        let nr_total = nr_files + SLACK;
        if nr_total > MAX_RAMFS_NODES {
            return Err(KError::Capacity);
        }

        let mut nodes = [None; MAX_RAMFS_NODES];
        for i in 0..nr_files {
            let rec_start = HEADER_LEN + i * FILE_RECORD_LEN;
            let name_bytes = &archive[rec_start..rec_start + RAMFS_NAME_MAX];
            let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(RAMFS_NAME_MAX);
            let name = core::str::from_utf8(&name_bytes[..name_len]).unwrap_or("");
            let off_start = rec_start + RAMFS_NAME_MAX;
            let offset = u32::from_le_bytes(archive[off_start..off_start + 4].try_into().unwrap());
            let length = u32::from_le_bytes(archive[off_start + 4..off_start + 8].try_into().unwrap());
            nodes[i] = Some(RamNode {
                name: NodeName::from_str(name),
                node_type: NodeType::File,
                length,
                mask: 0o755,
                data_offset: offset,
            });
        }

        self.archive = Some(archive);
        self.nodes = nodes;
        self.nr_nodes = nr_files;
        self.nr_total = nr_total;
        klog_info!("ramfs", "mounted archive with {} files, {} slack slots", nr_files, SLACK);
        Ok(())
    }

    fn read(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<u32, KError> {
        let node = self.node_at(inode).ok_or(KError::NotFound)?;
        if offset > node.length {
            return Ok(0);
        }
        let avail = node.length - offset;
        let n = avail.min(buf.len() as u32);
        if n == 0 {
            return Ok(0);
        }
        let archive = self.archive.ok_or(KError::NotFound)?;
        let start = node.data_offset as usize + offset as usize;
        let end = start + n as usize;
        if end > archive.len() {
            return Err(KError::Inval);
        }
        buf[..n as usize].copy_from_slice(&archive[start..end]);
        Ok(n)
    }

    fn finddir(&self, name: &str) -> Result<u32, KError> {
        for i in 0..self.nr_nodes {
            if let Some(n) = &self.nodes[i] {
                if n.name.as_str() == name {
                    return Ok((i + 1) as u32);
                }
            }
        }
        Err(KError::NotFound)
    }

    /// Flat, index-based directory listing: `index` addresses the global
    /// node table, not entries local to whichever directory was passed to
    /// `readdir`. This is a preserved property of the backend, not a bug —
    /// subdirectories therefore surface at the root when read this way.
    fn readdir(&self, index: u32) -> Result<Dirent, KError> {
        let idx = index as usize;
        if idx >= self.nr_nodes {
            return Err(KError::NotFound);
        }
        let n = self.nodes[idx].as_ref().ok_or(KError::NotFound)?;
        Ok(Dirent {
            inode: (idx + 1) as u32,
            name: n.name,
        })
    }

    fn create(&mut self, name: &str, node_type: NodeType) -> Result<u32, KError> {
        if node_type != NodeType::Directory {
            return Err(KError::NotSupported);
        }
        if self.nr_nodes >= self.nr_total {
            return Err(KError::Capacity);
        }
        let idx = self.nr_nodes;
        self.nodes[idx] = Some(RamNode {
            name: NodeName::from_str(name),
            node_type: NodeType::Directory,
            length: 0,
            mask: 0o755,
            data_offset: 0,
        });
        self.nr_nodes += 1;
        Ok((idx + 1) as u32)
    }

    fn node_at(&self, inode: u32) -> Option<RamNode> {
        if inode == 0 {
            return None;
        }
        self.nodes.get(inode as usize - 1).copied().flatten()
    }
}

static RAMFS_STATE: SpinLock<RamFsState> = SpinLock::new(RamFsState::new());

struct RamfsNodeOps;
static RAMFS_NODE_OPS: RamfsNodeOps = RamfsNodeOps;

impl NodeOps for RamfsNodeOps {
    fn supports_read(&self) -> bool {
        true
    }
    fn read(&self, node: &Node, offset: u32, buf: &mut [u8]) -> Result<u32, KError> {
        RAMFS_STATE.lock().read(node.inode, offset, buf)
    }

    fn supports_readdir(&self) -> bool {
        true
    }
    fn readdir(&self, _node: &Node, index: u32) -> Result<Dirent, KError> {
        RAMFS_STATE.lock().readdir(index)
    }

    fn supports_finddir(&self) -> bool {
        true
    }
    fn finddir(&self, _node: &Node, name: &str) -> Result<u32, KError> {
        RAMFS_STATE.lock().finddir(name)
    }

    fn supports_create(&self) -> bool {
        true
    }
    fn create(&self, parent: &Node, name: &str, node_type: NodeType) -> Result<Node, KError> {
        if parent.node_type != NodeType::Directory {
            return Err(KError::Inval);
        }
        let inode = RAMFS_STATE.lock().create(name, node_type)?;
        Ok(Node {
            inode,
            name: NodeName::from_str(name),
            node_type: NodeType::Directory,
            perm: 0o755,
            length: 0,
            uid: 0,
            gid: 0,
            seek: 0,
            refcount: 1,
            mount: parent.mount,
            ops: &RAMFS_NODE_OPS,
        })
    }
}

struct RamfsMountOps;
static RAMFS_MOUNT_OPS: RamfsMountOps = RamfsMountOps;

impl MountOps for RamfsMountOps {
    fn read_node(&self, mount: &Mount, inode: u32) -> Result<Node, KError> {
        if inode == ROOT_INODE {
            return Ok(Node {
                inode: ROOT_INODE,
                name: NodeName::from_str("initrd-root"),
                node_type: NodeType::Directory,
                perm: 0o755,
                length: 0,
                uid: 0,
                gid: 0,
                seek: 0,
                refcount: 1,
                mount: mount.id,
                ops: &RAMFS_NODE_OPS,
            });
        }
        let state = RAMFS_STATE.lock();
        let n = state.node_at(inode).ok_or(KError::NotFound)?;
        Ok(Node {
            inode,
            name: n.name,
            node_type: n.node_type,
            perm: n.mask,
            length: n.length,
            uid: 0,
            gid: 0,
            seek: 0,
            refcount: 1,
            mount: mount.id,
            ops: &RAMFS_NODE_OPS,
        })
    }
}

pub struct RamfsType;
pub static RAMFS_TYPE: RamfsType = RamfsType;

impl FsType for RamfsType {
    fn name(&self) -> &'static str {
        "ramfs"
    }

    fn mount(&self, _flags: u32, data: usize) -> Result<MountResult, KError> {
        if data == 0 {
            return Err(KError::Inval);
        }
        let args = unsafe { &*(data as *const RamfsMountArgs) };
        if args.base.is_null() {
            return Err(KError::Inval);
        }
        let archive = unsafe { core::slice::from_raw_parts(args.base, args.len) };
        // SAFETY: the caller guarantees the archive outlives the mount,
        // the same contract a boot-module pointer carries in practice.
        let archive: &'static [u8] = unsafe { core::mem::transmute(archive) };
        RAMFS_STATE.lock().mount(archive)?;
        Ok(MountResult {
            root_inode: ROOT_INODE,
            ops: &RAMFS_MOUNT_OPS,
        })
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use kernel_vfs::Vfs;
    use std::boxed::Box;
    use std::vec::Vec;

    fn build_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut data_blob: Vec<u8> = Vec::new();
        let mut records: Vec<u8> = Vec::new();
        for (name, bytes) in files {
            let mut name_buf = [0u8; RAMFS_NAME_MAX];
            name_buf[..name.len()].copy_from_slice(name.as_bytes());
            records.extend_from_slice(&name_buf);
            records.extend_from_slice(&(data_blob.len() as u32).to_le_bytes());
            records.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            data_blob.extend_from_slice(bytes);
        }
        let mut archive = Vec::new();
        archive.extend_from_slice(&(files.len() as u32).to_le_bytes());
        archive.extend_from_slice(&records);
        archive.extend_from_slice(&data_blob);
        archive
    }

    fn mount_archive(archive: &'static [u8]) -> Vfs {
        let mut vfs = Vfs::new();
        vfs.register_type(&RAMFS_TYPE).unwrap();
        let args = RamfsMountArgs {
            base: archive.as_ptr(),
            len: archive.len(),
        };
        vfs.mount("ramfs", "/", 0, &args as *const _ as usize).unwrap();
        vfs
    }

    #[test]
    fn mount_then_finddir_and_read() {
        let archive = build_archive(&[("hello", b"HELLO"), ("world", b"WORLD")]);
        let archive: &'static [u8] = Box::leak(archive.into_boxed_slice());
        let vfs = mount_archive(archive);

        let root = vfs.lookup("/").unwrap();
        assert!(root.ops.supports_finddir());
        let world_inode = root.ops.finddir(&root, "world").unwrap();
        assert_eq!(world_inode, 2);

        let world = vfs.lookup("/world").unwrap();
        let mut buf = [0u8; 10];
        let n = world.ops.read(&world, 2, &mut buf).unwrap();
        assert_eq!(&buf[..n as usize], b"RLD");
    }

    #[test]
    fn read_past_end_returns_zero() {
        let archive = build_archive(&[("hello", b"HELLO")]);
        let archive: &'static [u8] = Box::leak(archive.into_boxed_slice());
        let vfs = mount_archive(archive);
        let node = vfs.lookup("/hello").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(node.ops.read(&node, 5, &mut buf).unwrap(), 0);
        assert_eq!(node.ops.read(&node, 100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn create_directory_then_readdir_is_flat() {
        let archive = build_archive(&[("hello", b"HI")]);
        let archive: &'static [u8] = Box::leak(archive.into_boxed_slice());
        let vfs = mount_archive(archive);
        let root = vfs.lookup("/").unwrap();
        let created = root.ops.create(&root, "subdir", NodeType::Directory).unwrap();
        assert_eq!(created.inode, 2);

        // readdir against root returns index 1 (the new directory), even
        // though "subdir" was created under root specifically -- and the
        // same index addresses the same entry no matter which node object
        // the call was made through, since the listing is global.
        let dirent = root.ops.readdir(&root, 1).unwrap();
        assert_eq!(dirent.name.as_str(), "subdir");
    }

    #[test]
    fn create_file_type_is_not_supported() {
        let archive = build_archive(&[("hello", b"HI")]);
        let archive: &'static [u8] = Box::leak(archive.into_boxed_slice());
        let vfs = mount_archive(archive);
        let root = vfs.lookup("/").unwrap();
        assert_eq!(
            root.ops.create(&root, "file", NodeType::File).unwrap_err(),
            KError::NotSupported
        );
    }

    #[test]
    fn create_under_non_directory_parent_is_inval() {
        let archive = build_archive(&[("hello", b"HI")]);
        let archive: &'static [u8] = Box::leak(archive.into_boxed_slice());
        let vfs = mount_archive(archive);
        let file = vfs.lookup("/hello").unwrap();
        assert_eq!(
            file.ops.create(&file, "subdir", NodeType::Directory).unwrap_err(),
            KError::Inval
        );
    }

    #[test]
    fn archive_too_small_fails_mount() {
        let mut vfs = Vfs::new();
        vfs.register_type(&RAMFS_TYPE).unwrap();
        let archive: &'static [u8] = &[0u8; 2];
        let args = RamfsMountArgs {
            base: archive.as_ptr(),
            len: archive.len(),
        };
        assert_eq!(
            vfs.mount("ramfs", "/", 0, &args as *const _ as usize).unwrap_err(),
            KError::Inval
        );
    }
}
