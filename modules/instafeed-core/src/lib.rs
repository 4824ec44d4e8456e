pub mod cache;
pub mod clock;
pub mod fallback;
pub mod normalizer;
pub mod service;
pub mod testing;
pub mod traits;
pub mod views;

pub use cache::{CacheEntry, FeedCache};
pub use clock::{Clock, SystemClock};
pub use fallback::FallbackProvider;
pub use normalizer::{extract_hashtags, NormalizeError, Normalizer, NormalizerSettings};
pub use service::{AcquireError, FeedService, ServiceHealth, ServiceSettings};
pub use traits::RawPostSource;
