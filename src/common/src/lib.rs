pub mod aws;
pub mod client;
pub mod config;
pub mod model;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{
    ClientFactory, ListingToken, ProviderError, StorageClient, TargetError, UploadPage,
};
pub use model::{Target, UploadDescriptor};
