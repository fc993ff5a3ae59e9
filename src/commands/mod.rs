pub mod ask;
pub mod calibrate;
pub mod ingest;
pub mod status;
