//! Builds an empty file system on a blank disk.

use block_cache::BlockDevice as _;
use dataview::PodMethods as _;
use sv6_fs_types::{
    BITS_PER_BLOCK, BLOCK_SIZE, BmapBlock, DirEntry, INODES_PER_BLOCK, InodeBlock, InodeNo,
    SuperBlock, T_DIR,
};

use crate::param::LOG_SIZE;

use super::RamDisk;

/// Disk geometry for [`format`].
#[derive(Debug, Clone)]
pub struct Geometry {
    /// Total size of the file system in blocks.
    pub size: u32,
    /// Number of inodes.
    pub ninodes: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            size: 1000,
            ninodes: 200,
        }
    }
}

/// Formats `disk` with an empty file system: superblock, clean journal,
/// inode table with just the root directory, and free bitmap.
///
/// # Panics
///
/// Panics if the disk is smaller than the geometry or the geometry leaves
/// no data blocks.
pub fn format(disk: &RamDisk, geom: &Geometry) {
    let size = usize::try_from(geom.size).unwrap();
    let ninodes = usize::try_from(geom.ninodes).unwrap();
    assert!(disk.nblocks() >= size, "disk smaller than geometry");

    let nlog = 1 + LOG_SIZE; // header + body
    let ninode_blocks = ninodes / INODES_PER_BLOCK + 1;
    let nbitmap = size / BITS_PER_BLOCK + 1;
    let nmeta = 2 + nlog + ninode_blocks + nbitmap;
    assert!(nmeta + 1 < size, "geometry leaves no data blocks");

    let sb = SuperBlock {
        magic: SuperBlock::MAGIC,
        size: geom.size,
        nblocks: u32::try_from(size - nmeta).unwrap(),
        ninodes: geom.ninodes,
        nlog: u32::try_from(LOG_SIZE).unwrap(),
        log_start: 2,
        inode_start: u32::try_from(2 + nlog).unwrap(),
        bmap_start: u32::try_from(2 + nlog + ninode_blocks).unwrap(),
    };

    // Wipe every block the file system covers.
    let zero = [0_u8; BLOCK_SIZE];
    for bn in 0..size {
        disk.write(bn, &zero).unwrap();
    }

    let mut block = [0_u8; BLOCK_SIZE];
    block[..size_of::<SuperBlock>()].copy_from_slice(sb.as_bytes());
    disk.write(1, &block).unwrap();

    // Root directory: inode 1, containing "." and "..".
    let root_data_bn = nmeta;

    let mut inodes = InodeBlock::zeroed();
    let root = inodes.inode_mut(InodeNo::ROOT);
    root.allocate(T_DIR);
    root.nlink = 1;
    root.size = u32::try_from(2 * size_of::<DirEntry>()).unwrap();
    root.addrs[0] = u32::try_from(root_data_bn).unwrap();
    disk.write(
        sb.inode_block(InodeNo::ROOT).as_index(),
        inodes.as_bytes().try_into().unwrap(),
    )
    .unwrap();

    let mut block = [0_u8; BLOCK_SIZE];
    let dot = DirEntry::new(InodeNo::ROOT, b".");
    let dotdot = DirEntry::new(InodeNo::ROOT, b"..");
    block[..size_of::<DirEntry>()].copy_from_slice(dot.as_bytes());
    block[size_of::<DirEntry>()..2 * size_of::<DirEntry>()].copy_from_slice(dotdot.as_bytes());
    disk.write(root_data_bn, &block).unwrap();

    // Mark the metadata blocks and the root data block in use.
    let used = nmeta + 1;
    for bn0 in (0..used).step_by(BITS_PER_BLOCK) {
        let mut bmap = BmapBlock::zeroed();
        for bit in 0..usize::min(BITS_PER_BLOCK, used - bn0) {
            bmap.set_bit(bit);
        }
        disk.write(
            sb.bmap_block(bn0).as_index(),
            bmap.as_bytes().try_into().unwrap(),
        )
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileSystem;

    #[test]
    fn formatted_disk_mounts() {
        let disk = RamDisk::new(1000);
        format(&disk, &Geometry::default());
        let fs = FileSystem::mount(1, disk);

        let tx = fs.begin_tx();
        let mut root = fs.root(&tx).unwrap();
        let mut lip = root.lock();
        assert!(lip.is_dir());
        assert_eq!(lip.nlink, 1);
        let (dot, _) = lip.dir_lookup(b".").unwrap();
        assert_eq!(dot.ino(), InodeNo::ROOT);
        dot.put();
        let (dotdot, _) = lip.dir_lookup(b"..").unwrap();
        assert_eq!(dotdot.ino(), InodeNo::ROOT);
        dotdot.put();
        lip.unlock();
        root.put();
        tx.end();
    }
}
