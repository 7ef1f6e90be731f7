pub mod conversation_service;
pub mod encryption;
pub mod match_authority;
pub mod message_service;
pub mod rate_limit;
pub mod read_receipt_service;
pub mod sanitizer;
pub mod user_directory;
