//! End-to-end file-system scenarios, driven through the syscall
//! dispatcher.

mod common;

use std::sync::Arc;

use common::{UserProc, boot};
use sv6_fs_types::{T_DEV, T_DIR, T_FILE};
use sv6_kernel::{
    file::Device,
    memory::{UserPageTable, VirtAddr},
    param::NOFILE,
    proc,
};
use sv6_syscall::OpenFlags;

const CREATE_RW: OpenFlags = OpenFlags::CREATE.union(OpenFlags::READ_WRITE);

#[test]
fn create_write_read_roundtrip() {
    let k = boot();
    let mut u = UserProc::new(&k);

    let fd = u.open(&k, "/a", CREATE_RW);
    assert!(fd >= 0);
    assert_eq!(u.write(&k, fd as usize, b"hi"), 2);
    assert_eq!(u.close(&k, fd as usize), 0);

    let fd = u.open(&k, "/a", OpenFlags::READ_ONLY);
    assert!(fd >= 0);
    let (n, data) = u.read(&k, fd as usize, 2);
    assert_eq!(n, 2);
    assert_eq!(&data, b"hi");

    // At end of file, read returns 0.
    let (n, _) = u.read(&k, fd as usize, 16);
    assert_eq!(n, 0);
}

#[test]
fn open_missing_fails() {
    let k = boot();
    let mut u = UserProc::new(&k);
    assert_eq!(u.open(&k, "/nope", OpenFlags::READ_ONLY), -1);
}

#[test]
fn unlinked_path_does_not_resolve() {
    let k = boot();
    let mut u = UserProc::new(&k);

    let fd = u.open(&k, "/a", CREATE_RW);
    assert!(fd >= 0);
    assert_eq!(u.close(&k, fd as usize), 0);
    assert_eq!(u.unlink(&k, "/a"), 0);
    assert_eq!(u.open(&k, "/a", OpenFlags::READ_ONLY), -1);
}

#[test]
fn unlink_keeps_open_file_usable() {
    let k = boot();
    let mut u = UserProc::new(&k);

    let fd = u.open(&k, "/a", CREATE_RW) as usize;
    assert_eq!(u.write(&k, fd, b"data"), 4);
    assert_eq!(u.unlink(&k, "/a"), 0);

    // The inode lives on while the descriptor holds it.
    let fd2 = u.open(&k, "/a", OpenFlags::READ_ONLY);
    assert_eq!(fd2, -1);
    let (_, stat) = u.fstat(&k, fd);
    assert_eq!(stat.nlink, 0);
    assert_eq!(stat.size, 4);
    assert_eq!(u.close(&k, fd), 0);
}

#[test]
fn mkdir_nested_and_unlink_constraints() {
    let k = boot();
    let mut u = UserProc::new(&k);

    assert_eq!(u.mkdir(&k, "/d"), 0);
    let fd = u.open(&k, "/d/f", CREATE_RW);
    assert!(fd >= 0);
    assert_eq!(u.close(&k, fd as usize), 0);

    // A directory with entries other than "." and ".." cannot go.
    assert_eq!(u.unlink(&k, "/d"), -1);
    assert_eq!(u.unlink(&k, "/d/f"), 0);
    assert_eq!(u.unlink(&k, "/d"), 0);
    assert_eq!(u.open(&k, "/d", OpenFlags::READ_ONLY), -1);
}

#[test]
fn unlink_dots_fails() {
    let k = boot();
    let mut u = UserProc::new(&k);
    assert_eq!(u.mkdir(&k, "/d"), 0);
    assert_eq!(u.unlink(&k, "/d/."), -1);
    assert_eq!(u.unlink(&k, "/d/.."), -1);
}

#[test]
fn link_shares_inode_and_counts() {
    let k = boot();
    let mut u = UserProc::new(&k);

    let fd = u.open(&k, "/a", CREATE_RW) as usize;
    assert_eq!(u.write(&k, fd, b"shared"), 6);
    let (_, stat) = u.fstat(&k, fd);
    assert_eq!(stat.nlink, 1);
    assert_eq!(u.close(&k, fd), 0);

    assert_eq!(u.link(&k, "/a", "/b"), 0);

    let fd = u.open(&k, "/b", OpenFlags::READ_ONLY) as usize;
    let (_, stat) = u.fstat(&k, fd);
    assert_eq!(stat.nlink, 2);
    assert_eq!(u.close(&k, fd), 0);

    assert_eq!(u.unlink(&k, "/a"), 0);

    let fd = u.open(&k, "/b", OpenFlags::READ_ONLY) as usize;
    let (n, data) = u.read(&k, fd, 6);
    assert_eq!(n, 6);
    assert_eq!(&data, b"shared");
    let (_, stat) = u.fstat(&k, fd);
    assert_eq!(stat.nlink, 1);
    assert_eq!(u.close(&k, fd), 0);
}

#[test]
fn link_rejects_directories_and_duplicates() {
    let k = boot();
    let mut u = UserProc::new(&k);

    assert_eq!(u.mkdir(&k, "/d"), 0);
    assert_eq!(u.link(&k, "/d", "/d2"), -1);

    let fd = u.open(&k, "/a", CREATE_RW);
    assert_eq!(u.close(&k, fd as usize), 0);
    assert_eq!(u.link(&k, "/a", "/a"), -1);

    // A failed link leaves the count untouched.
    let fd = u.open(&k, "/a", OpenFlags::READ_ONLY) as usize;
    let (_, stat) = u.fstat(&k, fd);
    assert_eq!(stat.nlink, 1);
}

#[test]
fn dup_shares_offset() {
    let k = boot();
    let mut u = UserProc::new(&k);

    let fd = u.open(&k, "/a", CREATE_RW) as usize;
    assert_eq!(u.write(&k, fd, b"abc"), 3);
    let fd2 = u.dup(&k, fd) as usize;
    assert_eq!(u.write(&k, fd2, b"def"), 3);
    assert_eq!(u.close(&k, fd), 0);
    assert_eq!(u.close(&k, fd2), 0);

    let fd = u.open(&k, "/a", OpenFlags::READ_ONLY) as usize;
    let (n, data) = u.read(&k, fd, 16);
    assert_eq!(n, 6);
    assert_eq!(&data, b"abcdef");
}

#[test]
fn directories_open_read_only() {
    let k = boot();
    let mut u = UserProc::new(&k);

    assert!(u.open(&k, "/", OpenFlags::READ_ONLY) >= 0);
    assert_eq!(u.open(&k, "/", OpenFlags::WRITE_ONLY), -1);
    assert_eq!(u.open(&k, "/", OpenFlags::READ_WRITE), -1);

    // And reading one yields directory entries.
    let fd = u.open(&k, "/", OpenFlags::READ_ONLY) as usize;
    let (n, data) = u.read(&k, fd, 16);
    assert_eq!(n, 16);
    // First entry is ".", referring to the root inode.
    assert_eq!(u16::from_ne_bytes(data[0..2].try_into().unwrap()), 1);
    assert_eq!(&data[2..3], b".");
}

#[test]
fn chdir_changes_resolution_base() {
    let k = boot();
    let mut u = UserProc::new(&k);

    assert_eq!(u.mkdir(&k, "/d"), 0);
    assert_eq!(u.chdir(&k, "d"), 0);
    let fd = u.open(&k, "f", CREATE_RW) as usize;
    assert_eq!(u.write(&k, fd, b"x"), 1);
    assert_eq!(u.close(&k, fd), 0);

    assert!(u.open(&k, "/d/f", OpenFlags::READ_ONLY) >= 0);

    assert_eq!(u.chdir(&k, ".."), 0);
    assert!(u.open(&k, "d/f", OpenFlags::READ_ONLY) >= 0);

    // chdir to a file fails.
    assert_eq!(u.chdir(&k, "/d/f"), -1);
}

#[test]
fn fstat_reports_types() {
    let k = boot();
    let mut u = UserProc::new(&k);

    let fd = u.open(&k, "/", OpenFlags::READ_ONLY) as usize;
    let (ret, stat) = u.fstat(&k, fd);
    assert_eq!(ret, 0);
    assert_eq!(stat.ty, T_DIR);

    let fd = u.open(&k, "/f", CREATE_RW) as usize;
    let (_, stat) = u.fstat(&k, fd);
    assert_eq!(stat.ty, T_FILE);
    assert_eq!(stat.size, 0);
}

#[test]
fn fd_table_exhaustion() {
    let k = boot();
    let mut u = UserProc::new(&k);

    let fd = u.open(&k, "/a", CREATE_RW);
    assert_eq!(fd, 0);
    for _ in 1..NOFILE {
        assert!(u.open(&k, "/a", OpenFlags::READ_ONLY) >= 0);
    }
    assert_eq!(u.open(&k, "/a", OpenFlags::READ_ONLY), -1);

    // Closing one frees the lowest slot for reuse.
    assert_eq!(u.close(&k, 3), 0);
    assert_eq!(u.open(&k, "/a", OpenFlags::READ_ONLY), 3);
}

#[test]
fn pipe_roundtrip() {
    let k = boot();
    let mut u = UserProc::new(&k);

    let (ret, rfd, wfd) = u.pipe(&k);
    assert_eq!(ret, 0);
    assert_eq!(u.write(&k, wfd, b"x"), 1);
    let (n, data) = u.read(&k, rfd, 1);
    assert_eq!(n, 1);
    assert_eq!(&data, b"x");

    // Writer closed and drained: EOF.
    assert_eq!(u.close(&k, wfd), 0);
    let (n, _) = u.read(&k, rfd, 1);
    assert_eq!(n, 0);
}

#[test]
fn pipe_write_after_reader_close_fails() {
    let k = boot();
    let mut u = UserProc::new(&k);

    let (_, rfd, wfd) = u.pipe(&k);
    assert_eq!(u.close(&k, rfd), 0);
    assert_eq!(u.write(&k, wfd, b"x"), -1);
}

#[test]
fn pipe_blocks_until_writer_arrives() {
    let k = Arc::new(boot());
    let mut parent = UserProc::new(&k);

    let (_, rfd, wfd) = parent.pipe(&k);
    let child = proc::fork(&k, &parent.proc).unwrap();
    let mut child = UserProc::adopt(child);

    // The child blocks reading until the parent writes.
    let reader = {
        let k = Arc::clone(&k);
        std::thread::spawn(move || {
            let (n, data) = child.read(&k, rfd, 5);
            assert_eq!(n, 5);
            assert_eq!(&data, b"hello");
            child
        })
    };

    std::thread::sleep(std::time::Duration::from_millis(50));
    assert_eq!(parent.write(&k, wfd, b"hello"), 5);

    let child = reader.join().unwrap();
    proc::exit(&k, child.proc);
    proc::exit(&k, parent.proc);
}

#[test]
fn device_nodes_route_by_major() {
    struct Echo;
    impl Device for Echo {
        fn read(
            &self,
            pt: &UserPageTable,
            addr: VirtAddr,
            n: usize,
        ) -> Result<usize, sv6_kernel::KernelError> {
            let msg = b"echo";
            let n = usize::min(n, msg.len());
            pt.copy_out_bytes(addr, &msg[..n])?;
            Ok(n)
        }

        fn write(
            &self,
            _pt: &UserPageTable,
            _addr: VirtAddr,
            n: usize,
        ) -> Result<usize, sv6_kernel::KernelError> {
            Ok(n)
        }
    }

    let k = boot();
    k.devices().register(1, Arc::new(Echo));
    let mut u = UserProc::new(&k);

    assert_eq!(u.mknod(&k, "/console", 1, 0), 0);
    let fd = u.open(&k, "/console", OpenFlags::READ_WRITE) as usize;
    let (_, stat) = u.fstat(&k, fd);
    assert_eq!(stat.ty, T_DEV);

    assert_eq!(u.write(&k, fd, b"anything"), 8);
    let (n, data) = u.read(&k, fd, 16);
    assert_eq!(n, 4);
    assert_eq!(&data, b"echo");

    // Re-opening an existing device node with CREATE is idempotent.
    assert!(u.open(&k, "/console", CREATE_RW) >= 0);

    // Opening a device with an unregistered major fails at I/O time.
    assert_eq!(u.mknod(&k, "/null", 7, 0), 0);
    let fd = u.open(&k, "/null", OpenFlags::READ_WRITE) as usize;
    let (n, _) = u.read(&k, fd, 1);
    assert_eq!(n, -1);
}

#[test]
fn create_is_idempotent_for_files_only() {
    let k = boot();
    let mut u = UserProc::new(&k);

    let fd = u.open(&k, "/f", CREATE_RW) as usize;
    assert_eq!(u.write(&k, fd, b"keep"), 4);
    assert_eq!(u.close(&k, fd), 0);

    // Re-creating an existing file opens it, preserving content.
    let fd = u.open(&k, "/f", CREATE_RW) as usize;
    let (_, stat) = u.fstat(&k, fd);
    assert_eq!(stat.size, 4);
    assert_eq!(u.close(&k, fd), 0);

    // Creating over an existing directory fails.
    assert_eq!(u.mkdir(&k, "/d"), 0);
    assert_eq!(u.open(&k, "/d", CREATE_RW), -1);

    // mkdir over anything existing fails.
    assert_eq!(u.mkdir(&k, "/f"), -1);
    assert_eq!(u.mkdir(&k, "/d"), -1);
}

#[test]
fn fork_inherits_descriptors_and_cwd() {
    let k = boot();
    let mut parent = UserProc::new(&k);

    assert_eq!(parent.mkdir(&k, "/d"), 0);
    assert_eq!(parent.chdir(&k, "/d"), 0);
    let fd = parent.open(&k, "f", CREATE_RW) as usize;
    assert_eq!(parent.write(&k, fd, b"ab"), 2);

    let mut child = UserProc::adopt(proc::fork(&k, &parent.proc).unwrap());

    // The child's fd shares the parent's offset.
    assert_eq!(child.write(&k, fd, b"cd"), 2);
    // And its cwd is the parent's.
    assert!(child.open(&k, "f", OpenFlags::READ_ONLY) >= 0);

    proc::exit(&k, child.proc);

    let rfd = parent.open(&k, "/d/f", OpenFlags::READ_ONLY) as usize;
    let (n, data) = parent.read(&k, rfd, 8);
    assert_eq!(n, 4);
    assert_eq!(&data, b"abcd");

    proc::exit(&k, parent.proc);
}

#[test]
fn large_file_spills_into_indirect_blocks() {
    let k = boot();
    let mut u = UserProc::new(&k);

    // 14 blocks exceeds the 12 direct slots.
    let chunk = [7_u8; 512];
    let fd = u.open(&k, "/big", CREATE_RW) as usize;
    for _ in 0..14 {
        assert_eq!(u.write(&k, fd, &chunk), 512);
        u.scratch_reset();
    }
    assert_eq!(u.close(&k, fd), 0);

    let fd = u.open(&k, "/big", OpenFlags::READ_ONLY) as usize;
    let (_, stat) = u.fstat(&k, fd);
    assert_eq!(stat.size, 14 * 512);
    let mut total = 0;
    loop {
        let (n, data) = u.read(&k, fd, 512);
        if n == 0 {
            break;
        }
        assert!(data.iter().all(|&b| b == 7));
        total += n;
        u.scratch_reset();
    }
    assert_eq!(total, 14 * 512);
}
