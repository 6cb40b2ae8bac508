pub mod beta;
pub mod covariance;
pub mod estimator;
