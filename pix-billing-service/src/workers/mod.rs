pub mod sweeps;

pub use sweeps::SweepScheduler;
