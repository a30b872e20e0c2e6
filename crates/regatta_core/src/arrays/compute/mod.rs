pub mod cmp;
pub mod concat;
pub mod hash;
pub mod take;
