// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Storage error types.

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage corruption: {0}")]
    Corruption(String),

    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("intent without transaction")]
    IntentWithoutTxn,

    #[error("failed to read with epoch {our_epoch} due to a write intent with epoch {intent_epoch}")]
    EpochMismatch { our_epoch: u32, intent_epoch: u32 },

    #[error("incompatible merge values: {0}")]
    MergeIncompatible(&'static str),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}
