pub mod canonical;
pub mod encoding;
pub mod events;
pub mod fingerprint;
pub mod mismatch;
pub mod ports;
pub mod row;
pub mod value_objects;
pub mod verification;
