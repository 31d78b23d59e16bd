pub mod digest;
pub mod registry;

pub use digest::digest_file;
pub use registry::ChecksumRegistry;
