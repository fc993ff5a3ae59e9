mod advisor;
mod run;
mod stats;

pub use run::run;
