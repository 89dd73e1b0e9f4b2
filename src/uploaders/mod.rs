pub mod http;
pub mod progress_stream;

pub use http::HttpUploadEndpoint;
pub use progress_stream::ProgressStream;
