pub mod coordinator;
pub mod identity;
pub mod keys;
pub mod shutdown;
pub mod storage;
pub mod uploader;
