//! Mocked protocol and storage (useful for tests mostly).

pub mod dio;
pub mod storage;
