pub mod addr_space;
pub mod shm;

pub use addr_space::AddrSpace;
pub use shm::{map_shared_pages, unmap_shared_pages};
