pub mod addr;
pub mod layout;
pub mod page_table;
pub mod phys;
pub mod vm_user;

pub use self::{
    addr::{PAGE_SIZE, PageRound, PhysPageNum, VirtAddr, VirtPageNum},
    page_table::PtEntryFlags,
    phys::PhysMemory,
    vm_user::{DataDst, DataSrc, UserPageTable},
};
