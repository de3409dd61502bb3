pub mod blob;
pub mod chunk_store;
pub mod cleanup;
pub mod encoder;
pub mod job_store;
pub mod manifest;
pub mod orchestrator;
pub mod poller;
pub mod registry;
pub mod s3;
pub mod upload;
