pub mod asset;
pub mod transcode_quality;
