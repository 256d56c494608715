#![forbid(unsafe_code)]

pub mod hash;
pub mod ids;
pub mod hotp;
pub mod cipher;
pub mod key_agreement;

#[cfg(test)]
mod proptests;
