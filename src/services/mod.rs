pub mod local_storage;
pub mod staging;
pub mod storage;
pub mod sweeper;
pub mod transfer;
pub mod upload_service;
