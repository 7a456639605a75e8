pub mod cipher;
pub mod encryption;

pub use cipher::SecretKey;
pub use encryption::EncryptionService;
