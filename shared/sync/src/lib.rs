//! Synchronization primitives usable before any scheduler exists.
#![cfg_attr(not(test), no_std)]

pub mod mutex;
