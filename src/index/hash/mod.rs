pub mod bucket_page;
pub mod directory_page;
pub mod error;
pub mod table;

pub use bucket_page::HashBucketPage;
pub use directory_page::HashDirectoryPage;
pub use error::HashIndexError;
pub use table::{xxh3_key_hasher, ExtendibleHashTable};
