pub mod http;
pub mod page;
pub mod rate_limit;

pub use http::UpstreamClient;
pub use page::{Page, PageCursor, PageFetcher, Paged, DEFAULT_PAGE_SIZE, PR_PAGE_SIZE};
pub use rate_limit::{RateLimitState, RateLimiter};
