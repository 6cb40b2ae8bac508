pub mod active_set;
pub mod linalg;
pub mod solver;
pub mod sqp;
pub mod target_beta;
