mod config;
pub use config::Config;
pub use config::ObjectsBackend;
pub use config::TransferDefaults;

mod errors;
pub use errors::{Error, Result};

mod chunks;
pub use chunks::ChunkReader;

mod request;
pub use request::{TransferEvent, TransferRequest, TransferResult, DEFAULT_CHUNK_SIZE};

pub mod session;
pub use session::{SessionState, TransferSession};

mod uploader;
pub use uploader::{PartRecord, PartUploader};

pub mod source;
pub use source::{HttpSource, Source};

mod transfer;
pub use transfer::Transfer;

#[cfg(test)]
pub(crate) mod testing;
