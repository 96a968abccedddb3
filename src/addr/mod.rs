//! Translation between local addresses and references both peers share

pub mod arena;
pub mod block_ref;
pub mod resolver;
pub mod table;

pub use arena::ArenaView;
pub use block_ref::{BlockRef, BlockRefParts};
pub use resolver::{ArenaIovaResolver, IovaResolver, PagemapResolver, ResolverKind};
pub use table::{BlockAddressTable, PageMapping};
