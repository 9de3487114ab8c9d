mod client;

pub use client::{AccrualClient, AccrualError, AccrualResponse};
