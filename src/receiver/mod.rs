//! Destination side: verified, atomic placement of uploads

mod handler;

pub use handler::{
    mirrored_checksum, ReceiveHandler, ReceiveStats, ReceiveStatsSnapshot, StagedUpload,
};
