//! imgx-io: everything around the pipeline that touches the outside
//! world.
//!
//! - [`acquire`]: accept files or bytes as a [`SourceImage`](imgx_pipeline::SourceImage).
//! - [`interchange`]: base64 data URLs in and out.
//! - [`export`]: download names, human-readable sizes, writing results.
//! - [`recent`]: the persisted recent-images cache.
//! - [`live`]: the debounced, last-request-wins recompute controller.

pub mod acquire;
pub mod export;
pub mod interchange;
pub mod live;
pub mod recent;

pub use acquire::{AcquireError, AcquireLimits, from_bytes, from_path};
pub use export::{
    ExportError, compression_ratio, download_filename, format_file_size, write_to_path,
};
pub use interchange::{decode_data_url, encode_data_url, looks_like_base64};
pub use live::{CodecRunner, ControllerConfig, LiveController, PipelineRunner, Preview};
pub use recent::{MAX_RECENTS, RecentError, RecentImage, RecentImages};
