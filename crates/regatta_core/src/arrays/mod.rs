pub mod array;
pub mod batch;
pub mod bitmap;
pub mod compute;
pub mod datatype;
pub mod ipc;
pub mod scalar;
pub mod schema;
pub mod storage;
