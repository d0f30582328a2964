//! Networking layer: URL validation, TLS trust, and the blocking fetcher.

pub mod fetch;
pub mod tls;
pub mod url;

pub use fetch::FetchedDocument;
pub use fetch::Header;
pub use fetch::HttpFetcher;
pub use tls::TrustStoreMode;
pub use url::Origin;
pub use url::Scheme;
pub use url::ShellUrl;
