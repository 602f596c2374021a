pub mod buffer;
pub mod request;
pub mod response;

pub use buffer::{MAX_REQUEST_SIZE, Overflow, RequestBuffer, find_subsequence};
pub use request::{Disposition, HttpRequest, Method, ParseError, classify_mime, try_parse};
pub use response::{HttpResponse, SERVER_NAME};
