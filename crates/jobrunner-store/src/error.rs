use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no job with that id")]
    NotFound,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
