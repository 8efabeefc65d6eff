//! Shared utility modules used across gridshard components.

pub mod varint;
